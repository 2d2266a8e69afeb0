//! Error taxonomy for bundle construction, dispatch, and convergence.
//!
//! Every failure the engine can report is a variant of [`Error`]. The
//! variants fall into the kinds listed by [`ErrorKind`]; all of them are
//! fatal for the run except [`Error::NothingChanged`], which is a signal
//! that a real run found every resource already converged.

use super::types::ResourceId;
use std::path::PathBuf;
use thiserror::Error;

/// Placeholder that replaces sensitive command output in diagnostics.
pub const REDACTED: &str = "<redacted>";

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed declaration, detected while building the bundle.
    Construction,
    /// Missing or conflicting provider registration.
    Dispatch,
    /// The target system is not in a state the provider can act on.
    Precondition,
    /// A command or file resolution failed while converging.
    Execution,
    /// Not a failure: the run had nothing to do.
    Signal,
    /// Host I/O failure underneath the transport.
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate resource: {0}")]
    DuplicateResource(ResourceId),

    #[error("resource {resource} depends on unknown resource {dependency}")]
    UnresolvedDependency {
        resource: ResourceId,
        dependency: ResourceId,
    },

    #[error("dependency cycle detected involving: {}", join_ids(.members))]
    CircularDependency { members: Vec<ResourceId> },

    #[error("invalid resource {resource}: {message}")]
    InvalidResource { resource: ResourceId, message: String },

    #[error("no provider for {resource} (policy '{policy}')")]
    NoProvider { resource: ResourceId, policy: String },

    #[error("ambiguous provider for {resource}: {} all match", .providers.join(", "))]
    AmbiguousProvider {
        resource: ResourceId,
        providers: Vec<&'static str>,
    },

    #[error("path component missing: {}", .0.display())]
    PathComponentMissing(PathBuf),

    #[error("path component is not a directory: {}", .0.display())]
    PathComponentNotDirectory(PathBuf),

    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("unknown group: {0}")]
    UnknownGroup(String),

    /// A command exited non-zero. Both streams are already redacted when
    /// the command handled sensitive content.
    #[error("command `{command}` failed with exit code {exit_code}: {}", .stderr.trim())]
    Command {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("cannot resolve file '{id}': {message}")]
    File { id: String, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{resource} ({provider}): {source}")]
    Resource {
        resource: ResourceId,
        provider: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// A real run found every resource already converged.
    #[error("nothing changed")]
    NothingChanged,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateResource(_)
            | Self::UnresolvedDependency { .. }
            | Self::CircularDependency { .. }
            | Self::InvalidResource { .. }
            | Self::Parse(_) => ErrorKind::Construction,
            Self::NoProvider { .. } | Self::AmbiguousProvider { .. } => ErrorKind::Dispatch,
            Self::PathComponentMissing(_)
            | Self::PathComponentNotDirectory(_)
            | Self::InvalidProvider(_)
            | Self::UnknownUser(_)
            | Self::UnknownGroup(_) => ErrorKind::Precondition,
            Self::Command { .. } | Self::File { .. } => ErrorKind::Execution,
            Self::Io(_) => ErrorKind::Io,
            Self::Resource { source, .. } => source.kind(),
            Self::NothingChanged => ErrorKind::Signal,
        }
    }

    /// The underlying error with any resource wrappers peeled off.
    pub fn root(&self) -> &Error {
        match self {
            Self::Resource { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_nothing_changed(&self) -> bool {
        matches!(self.root(), Self::NothingChanged)
    }

    /// Attach the failing resource and provider to an error.
    pub fn in_resource(self, resource: &ResourceId, provider: &'static str) -> Self {
        match self {
            wrapped @ Self::Resource { .. } => wrapped,
            other => Self::Resource {
                resource: resource.clone(),
                provider,
                source: Box::new(other),
            },
        }
    }
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type Result<T> = std::result::Result<T, Error>;
