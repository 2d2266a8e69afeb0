//! Builtin resource types and their providers.
//!
//! Each type module registers a schema plus its policies with a
//! [`Registry`]. Providers only reach the host through the context's
//! transport.

pub mod checkout;
pub mod directory;
pub mod patch;
pub mod service;

use crate::changes::Attributes;
use crate::core::error::{Error, Result};
use crate::core::policy::Registry;
use crate::core::types::Resource;
use crate::transport::Transport;
use std::path::{Component, Path, PathBuf};

/// Register every builtin resource type.
pub fn register_builtins(registry: &mut Registry) {
    directory::register(registry);
    service::register(registry);
    patch::register(registry);
    checkout::register(registry);
}

/// Walk the ancestors of `directory` from the root down.
///
/// A component that exists but is not a directory always fails with
/// [`Error::PathComponentNotDirectory`]. A missing component fails with
/// [`Error::PathComponentMissing`] unless `tolerate_missing` is set, in
/// which case the walk stops there.
pub fn check_path(transport: &dyn Transport, directory: &Path, tolerate_missing: bool) -> Result<()> {
    if transport.isdir(directory)? {
        return Ok(());
    }
    let mut path = PathBuf::from("/");
    for component in directory.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        path.push(part);
        match transport.stat(&path)? {
            None if tolerate_missing => return Ok(()),
            None => return Err(Error::PathComponentMissing(path)),
            Some(st) if !st.is_dir() => return Err(Error::PathComponentNotDirectory(path)),
            Some(_) => {}
        }
    }
    Ok(())
}

/// Owner, group and mode as declared, with `default_mode` when unset.
pub(crate) fn declared_attributes(resource: &Resource, default_mode: u32) -> Attributes {
    Attributes {
        owner: resource.attr("owner").as_opt_string(),
        group: resource.attr("group").as_opt_string(),
        mode: Some(resource.attr("mode").as_mode().unwrap_or(default_mode)),
    }
}
