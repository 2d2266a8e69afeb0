//! Directory resource: ensure present, remove, or remove recursively.

use super::{check_path, declared_attributes};
use crate::changes::{EnsureDirectory, ShellCommand};
use crate::core::context::Context;
use crate::core::error::{Error, Result};
use crate::core::policy::{AttributeSchema, Policy, Registry, ResourceSchema};
use crate::core::provider::Provider;
use crate::core::types::{Resource, ValueKind};
use crate::transport::CommandSpec;
use std::path::Path;

pub const KIND: &str = "directory";

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        kind: KIND,
        description: "A directory on the target file system",
        default_policy: "apply",
        path_name: true,
        attributes: vec![
            AttributeSchema::optional("owner", ValueKind::Str),
            AttributeSchema::optional("group", ValueKind::Str),
            AttributeSchema::optional("mode", ValueKind::Mode),
            AttributeSchema::optional("parents", ValueKind::Bool),
        ],
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(
        schema(),
        [
            Policy::new("apply", "Directory", directory),
            Policy::new("remove", "RemoveDirectory", remove),
            Policy::new("remove-recursive", "RemoveDirectoryRecursive", remove_recursive),
        ],
    );
}

fn directory<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(Directory { resource })
}

fn remove<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(RemoveDirectory { resource })
}

fn remove_recursive<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(RemoveDirectoryRecursive { resource })
}

#[derive(Debug)]
pub struct Directory<'a> {
    resource: &'a Resource,
}

impl Provider for Directory<'_> {
    fn name(&self) -> &'static str {
        "Directory"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        let path = Path::new(self.resource.name());
        let parents = self.resource.attr("parents").as_bool(false);
        if let Some(parent) = path.parent() {
            // Missing ancestors may be created by an earlier resource when
            // simulating, or by makedirs when `parents` is set.
            check_path(ctx.transport(), parent, parents || ctx.simulate())?;
        }
        ctx.change(EnsureDirectory::new(
            path,
            declared_attributes(self.resource, 0o755),
            parents,
        ))
    }
}

/// Shared removal: refuse non-directories, otherwise run `argv` + path.
fn remove_with(ctx: &mut Context<'_>, name: &str, argv: &[&str]) -> Result<bool> {
    let path = Path::new(name);
    match ctx.transport().stat(path)? {
        Some(st) if !st.is_dir() => Err(Error::InvalidProvider(format!(
            "{} exists and is not a directory",
            name
        ))),
        Some(_) => {
            let command = CommandSpec::new(argv.iter().copied().chain([name]));
            ctx.change(ShellCommand::new(command))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[derive(Debug)]
pub struct RemoveDirectory<'a> {
    resource: &'a Resource,
}

impl Provider for RemoveDirectory<'_> {
    fn name(&self) -> &'static str {
        "RemoveDirectory"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        remove_with(ctx, self.resource.name(), &["/bin/rmdir"])
    }
}

#[derive(Debug)]
pub struct RemoveDirectoryRecursive<'a> {
    resource: &'a Resource,
}

impl Provider for RemoveDirectoryRecursive<'_> {
    fn name(&self) -> &'static str {
        "RemoveDirectoryRecursive"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        remove_with(ctx, self.resource.name(), &["/bin/rm", "-rf"])
    }
}
