//! Ensure a directory exists with the declared ownership and mode.

use super::{check_accounts, converge_attributes, Attributes, Change, ChangeContext};
use crate::core::error::{Error, Result};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureDirectory {
    pub path: PathBuf,
    pub attributes: Attributes,
    /// Create missing ancestors too.
    pub parents: bool,
}

impl EnsureDirectory {
    pub fn new(path: impl Into<PathBuf>, attributes: Attributes, parents: bool) -> Self {
        Self {
            path: path.into(),
            attributes,
            parents,
        }
    }

    fn mode(&self) -> u32 {
        self.attributes.mode.unwrap_or(0o755)
    }
}

impl Change for EnsureDirectory {
    fn describe(&self) -> String {
        format!("ensure directory {}", self.path.display())
    }

    fn apply(&self, ctx: &ChangeContext<'_>) -> Result<bool> {
        let transport = ctx.transport;
        match transport.stat(&self.path)? {
            Some(st) if st.is_dir() => converge_attributes(ctx, &self.path, &st, &self.attributes),
            Some(_) => Err(Error::InvalidProvider(format!(
                "{} exists and is not a directory",
                self.path.display()
            ))),
            None => {
                debug!(path = %self.path.display(), parents = self.parents, "creating directory");
                check_accounts(ctx, &self.attributes)?;
                if ctx.simulate {
                    return Ok(true);
                }
                if self.parents {
                    transport.makedirs(&self.path, self.mode())?;
                } else {
                    transport.mkdir(&self.path, self.mode())?;
                }
                let st = transport.stat(&self.path)?.ok_or_else(|| {
                    Error::InvalidProvider(format!("{} vanished after mkdir", self.path.display()))
                })?;
                converge_attributes(ctx, &self.path, &st, &self.attributes)?;
                Ok(true)
            }
        }
    }
}
