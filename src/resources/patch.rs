//! Patch resource: write a file whose content is a source file with a
//! patch applied.
//!
//! The patched content is computed with `patch --dry-run -o -`, which only
//! reads, so it runs in simulate mode too. The result is then converged
//! with an [`EnsureFile`] change.

use super::{check_path, declared_attributes};
use crate::changes::EnsureFile;
use crate::core::context::Context;
use crate::core::error::{Result, REDACTED};
use crate::core::policy::{AttributeSchema, Policy, Registry, ResourceSchema};
use crate::core::provider::Provider;
use crate::core::types::{Resource, ValueKind};
use crate::transport::CommandSpec;
use std::path::Path;
use tracing::error;

pub const KIND: &str = "patch";

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        kind: KIND,
        description: "A file produced by applying a patch to a source file",
        default_policy: "apply",
        path_name: true,
        attributes: vec![
            AttributeSchema::required("source", ValueKind::Str),
            AttributeSchema::required("patch", ValueKind::Str),
            AttributeSchema::optional("owner", ValueKind::Str),
            AttributeSchema::optional("group", ValueKind::Str),
            AttributeSchema::optional("mode", ValueKind::Mode),
        ],
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(schema(), [Policy::new("apply", "Patch", patch)]);
}

fn patch<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(Patch { resource })
}

/// Build the dry-run invocation that prints the patched file to stdout.
pub fn patch_command(source: &str, diff: Vec<u8>) -> CommandSpec {
    CommandSpec::new([
        "patch", "-t", "--dry-run", "-N", "--silent", "-r", "-", "-o", "-", source, "-",
    ])
    .stdin(diff)
}

#[derive(Debug)]
pub struct Patch<'a> {
    resource: &'a Resource,
}

impl Patch<'_> {
    /// Patched content and whether the patch is secret-labeled.
    fn patched_content(&self, ctx: &Context<'_>) -> Result<(Vec<u8>, bool)> {
        let patch_id = self.resource.attr("patch").as_string("");
        let source = self.resource.attr("source").as_string("");

        let handle = ctx.get_file(&patch_id)?;
        let sensitive = handle.is_secret();
        let command = patch_command(&source, handle.read()?);
        let out = ctx.transport().execute(&command)?;

        if !out.success() {
            let stderr = if sensitive { REDACTED } else { out.stderr.trim() };
            error!(
                patch = %patch_id,
                source = %source,
                exit_code = out.exit_code,
                stderr = %stderr,
                "patch does not apply cleanly"
            );
            return Err(out.into_error(&command, sensitive));
        }
        Ok((out.stdout, sensitive))
    }
}

impl Provider for Patch<'_> {
    fn name(&self) -> &'static str {
        "Patch"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        let path = Path::new(self.resource.name());
        if let Some(parent) = path.parent() {
            check_path(ctx.transport(), parent, ctx.simulate())?;
        }

        let (contents, sensitive) = self.patched_content(ctx)?;
        ctx.change(
            EnsureFile::new(path, contents, declared_attributes(self.resource, 0o644))
                .sensitive(sensitive),
        )
    }
}
