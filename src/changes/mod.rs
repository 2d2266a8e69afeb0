//! Changes: atomic, idempotent units of mutation.
//!
//! Each change probes current state first and reports whether it altered
//! (or, when simulating, would alter) the target. In simulate mode a change
//! may call read-only transport probes but never a mutating primitive.

pub mod command;
pub mod directory;
pub mod file;

pub use command::ShellCommand;
pub use directory::EnsureDirectory;
pub use file::EnsureFile;

use crate::core::error::{Error, Result};
use crate::transport::{FileStat, Transport};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// What a change sees: the transport and the simulate flag.
#[derive(Clone, Copy)]
pub struct ChangeContext<'a> {
    pub transport: &'a dyn Transport,
    pub simulate: bool,
}

/// One atomic mutation with a changed/unchanged verdict.
pub trait Change: fmt::Debug {
    /// Short human-readable description used in logs and reports.
    fn describe(&self) -> String;

    /// Probe, then mutate if needed. Returns whether state changed (or
    /// would change, when simulating).
    fn apply(&self, ctx: &ChangeContext<'_>) -> Result<bool>;
}

/// Ownership and permission bits a file or directory should end up with.
/// `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: Option<u32>,
}

enum Resolved {
    Id(u32),
    /// Unknown while simulating: an earlier resource may create it.
    Pending,
}

fn resolve_user(ctx: &ChangeContext<'_>, name: &str) -> Result<Resolved> {
    match ctx.transport.getpwnam(name)? {
        Some(uid) => Ok(Resolved::Id(uid)),
        None if ctx.simulate => Ok(Resolved::Pending),
        None => Err(Error::UnknownUser(name.to_string())),
    }
}

fn resolve_group(ctx: &ChangeContext<'_>, name: &str) -> Result<Resolved> {
    match ctx.transport.getgrnam(name)? {
        Some(gid) => Ok(Resolved::Id(gid)),
        None if ctx.simulate => Ok(Resolved::Pending),
        None => Err(Error::UnknownGroup(name.to_string())),
    }
}

/// Bring `path`'s mode and ownership in line with `attrs`.
///
/// `current` is the path's stat before this call. Returns whether anything
/// differed.
pub(crate) fn converge_attributes(
    ctx: &ChangeContext<'_>,
    path: &Path,
    current: &FileStat,
    attrs: &Attributes,
) -> Result<bool> {
    let mut changed = false;

    if let Some(mode) = attrs.mode {
        if current.mode != mode {
            debug!(path = %path.display(), from = format!("{:o}", current.mode), to = format!("{:o}", mode), "mode differs");
            if !ctx.simulate {
                ctx.transport.chmod(path, mode)?;
            }
            changed = true;
        }
    }

    let uid = match attrs.owner.as_deref().map(|o| resolve_user(ctx, o)).transpose()? {
        Some(Resolved::Id(uid)) if uid != current.uid => Some(uid),
        Some(Resolved::Pending) => {
            changed = true;
            None
        }
        _ => None,
    };
    let gid = match attrs.group.as_deref().map(|g| resolve_group(ctx, g)).transpose()? {
        Some(Resolved::Id(gid)) if gid != current.gid => Some(gid),
        Some(Resolved::Pending) => {
            changed = true;
            None
        }
        _ => None,
    };

    if uid.is_some() || gid.is_some() {
        debug!(path = %path.display(), ?uid, ?gid, "ownership differs");
        if !ctx.simulate {
            ctx.transport.chown(path, uid, gid)?;
        }
        changed = true;
    }

    Ok(changed)
}

/// Validate owner/group names up front so a real run fails before it
/// creates anything it cannot finish.
pub(crate) fn check_accounts(ctx: &ChangeContext<'_>, attrs: &Attributes) -> Result<()> {
    if let Some(ref owner) = attrs.owner {
        resolve_user(ctx, owner)?;
    }
    if let Some(ref group) = attrs.group {
        resolve_group(ctx, group)?;
    }
    Ok(())
}
