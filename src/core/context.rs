//! Per-resource execution context and file resolution.
//!
//! A [`Context`] lives for exactly one provider invocation. It hands the
//! provider the shared transport, the simulate flag and the file source, and
//! records the verdict of every change the provider registers.

use super::error::{Error, Result};
use crate::changes::Change;
pub use crate::changes::ChangeContext;
use crate::transport::Transport;
use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// Label marking content that must never appear in logs or diagnostics.
pub const SECRET_LABEL: &str = "secret";

// ============================================================================
// File resolution
// ============================================================================

#[derive(Clone, PartialEq, Eq)]
enum Origin {
    Inline(Vec<u8>),
    Path(PathBuf),
}

/// Handle to a named piece of source content (a patch, a template).
#[derive(Clone, PartialEq, Eq)]
pub struct FileHandle {
    id: String,
    origin: Origin,
    labels: Vec<String>,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match &self.origin {
            Origin::Inline(bytes) => format!("<{} inline bytes>", bytes.len()),
            Origin::Path(p) => p.display().to_string(),
        };
        f.debug_struct("FileHandle")
            .field("id", &self.id)
            .field("origin", &origin)
            .field("labels", &self.labels)
            .finish()
    }
}

impl FileHandle {
    pub fn inline(id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            id: id.into(),
            origin: Origin::Inline(content.into()),
            labels: Vec::new(),
        }
    }

    /// Content read from the controlling host's disk on demand.
    pub fn on_disk(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            origin: Origin::Path(path.into()),
            labels: Vec::new(),
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(labels.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn is_secret(&self) -> bool {
        self.labels.iter().any(|l| l == SECRET_LABEL)
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        match &self.origin {
            Origin::Inline(bytes) => Ok(bytes.clone()),
            Origin::Path(path) => std::fs::read(path).map_err(|e| Error::File {
                id: self.id.clone(),
                message: format!("{}: {}", path.display(), e),
            }),
        }
    }
}

/// Resolves file identifiers to handles.
pub trait FileSource: Send + Sync {
    fn get_file(&self, id: &str) -> Result<FileHandle>;
}

/// A fixed set of file handles keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    files: IndexMap<String, FileHandle>,
}

impl StaticFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: FileHandle) {
        self.files.insert(handle.id.clone(), handle);
    }

    pub fn with(mut self, handle: FileHandle) -> Self {
        self.insert(handle);
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FileSource for StaticFiles {
    fn get_file(&self, id: &str) -> Result<FileHandle> {
        self.files.get(id).cloned().ok_or_else(|| Error::File {
            id: id.to_string(),
            message: "no such file declared".to_string(),
        })
    }
}

// ============================================================================
// Context
// ============================================================================

/// Verdict of one registered change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub description: String,
    pub changed: bool,
}

pub struct Context<'a> {
    transport: &'a dyn Transport,
    files: &'a dyn FileSource,
    simulate: bool,
    changes: Vec<ChangeRecord>,
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("simulate", &self.simulate)
            .field("changes", &self.changes)
            .finish_non_exhaustive()
    }
}

impl<'a> Context<'a> {
    pub fn new(transport: &'a dyn Transport, files: &'a dyn FileSource, simulate: bool) -> Self {
        Self {
            transport,
            files,
            simulate,
            changes: Vec::new(),
        }
    }

    pub fn transport(&self) -> &'a dyn Transport {
        self.transport
    }

    pub fn simulate(&self) -> bool {
        self.simulate
    }

    pub fn get_file(&self, id: &str) -> Result<FileHandle> {
        self.files.get_file(id)
    }

    /// Apply (or simulate) a change right away and record its verdict.
    pub fn change<C: Change>(&mut self, change: C) -> Result<bool> {
        let ctx = ChangeContext {
            transport: self.transport,
            simulate: self.simulate,
        };
        let description = change.describe();
        let changed = change.apply(&ctx)?;
        debug!(change = %description, changed, simulate = self.simulate, "change");
        self.changes.push(ChangeRecord {
            description,
            changed,
        });
        Ok(changed)
    }

    pub fn changes(&self) -> &[ChangeRecord] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<ChangeRecord> {
        self.changes
    }
}
