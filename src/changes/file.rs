//! Ensure a regular file holds the given content, ownership and mode.

use super::{check_accounts, converge_attributes, Attributes, Change, ChangeContext};
use crate::core::error::{Error, Result};
use crate::journal::hasher;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

#[derive(Clone, PartialEq, Eq)]
pub struct EnsureFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub attributes: Attributes,
    /// Content comes from a secret-labeled source and must never be logged.
    pub sensitive: bool,
}

impl fmt::Debug for EnsureFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsureFile")
            .field("path", &self.path)
            .field("contents", &format_args!("<{} bytes>", self.contents.len()))
            .field("attributes", &self.attributes)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

impl EnsureFile {
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>, attributes: Attributes) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            attributes,
            sensitive: false,
        }
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }

    fn mode(&self) -> u32 {
        self.attributes.mode.unwrap_or(0o644)
    }
}

impl Change for EnsureFile {
    fn describe(&self) -> String {
        format!("ensure file {}", self.path.display())
    }

    fn apply(&self, ctx: &ChangeContext<'_>) -> Result<bool> {
        let transport = ctx.transport;
        let current = transport.stat(&self.path)?;
        if let Some(ref st) = current {
            if !st.is_file() {
                return Err(Error::InvalidProvider(format!(
                    "{} exists and is not a regular file",
                    self.path.display()
                )));
            }
        }

        let content_differs = match current {
            Some(_) => transport.get(&self.path)? != self.contents,
            None => true,
        };

        let mut changed = false;
        if content_differs {
            if self.sensitive {
                debug!(path = %self.path.display(), "content differs (sensitive)");
            } else {
                debug!(path = %self.path.display(), digest = %hasher::hash_bytes(&self.contents), "content differs");
            }
            check_accounts(ctx, &self.attributes)?;
            if !ctx.simulate {
                transport.put(&self.path, &self.contents, self.mode())?;
            }
            changed = true;
        }

        // A freshly written file already carries the target mode; a
        // simulated write leaves nothing to compare against.
        let after = if ctx.simulate && current.is_none() {
            None
        } else {
            transport.stat(&self.path)?
        };
        if let Some(st) = after {
            changed |= converge_attributes(ctx, &self.path, &st, &self.attributes)?;
        }
        Ok(changed)
    }
}
