//! Checkout resource. Only mounted working copies (scm `dummy`, `mounted`
//! or `mount`) have a provider; syncing one just touches the watched paths
//! so file watchers notice the new content.

use crate::changes::ShellCommand;
use crate::core::context::Context;
use crate::core::error::Result;
use crate::core::policy::{AttributeSchema, Policy, Registry, ResourceSchema};
use crate::core::provider::Provider;
use crate::core::types::{Resource, ValueKind};
use crate::transport::CommandSpec;
use std::path::Path;

pub const KIND: &str = "checkout";

const MOUNTED_SCMS: &[&str] = &["dummy", "mounted", "mount"];

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        kind: KIND,
        description: "A source checkout kept in sync with a repository",
        default_policy: "sync",
        path_name: true,
        attributes: vec![
            AttributeSchema::required("scm", ValueKind::Str),
            AttributeSchema::optional("repository", ValueKind::Str),
            AttributeSchema::optional("branch", ValueKind::Str),
            AttributeSchema::optional("watch", ValueKind::List),
        ],
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(
        schema(),
        [Policy::new("sync", "Mounted", mounted).when(is_mounted)],
    );
}

fn is_mounted(resource: &Resource) -> bool {
    let scm = resource.attr("scm").as_string("");
    MOUNTED_SCMS.iter().any(|s| *s == scm)
}

fn mounted<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(Mounted { resource })
}

#[derive(Debug)]
pub struct Mounted<'a> {
    resource: &'a Resource,
}

impl Provider for Mounted<'_> {
    fn name(&self) -> &'static str {
        "Mounted"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        let mut changed = false;
        for watched in self.resource.attr("watch").as_list() {
            if ctx.transport().exists(Path::new(&watched))? {
                changed |= ctx.change(ShellCommand::new(CommandSpec::new([
                    "touch", "-ac", watched.as_str(),
                ])))?;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::StaticFiles;
    use crate::core::error::Error;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::ExecOutput;

    fn checkout(scm: &str) -> Resource {
        Resource::new(KIND, "/srv/app")
            .with_attr("scm", scm)
            .with_attr(
                "watch",
                vec!["/srv/app/wsgi.py".to_string(), "/srv/app/missing.py".to_string()],
            )
    }

    #[test]
    fn test_checkout_policy_only_for_mounted_scms() {
        let reg = Registry::builtin();
        for scm in ["dummy", "mounted", "mount"] {
            assert_eq!(reg.resolve(&checkout(scm)).unwrap().provider, "Mounted");
        }
        assert!(matches!(
            reg.resolve(&checkout("git")),
            Err(Error::NoProvider { ref policy, .. }) if policy == "sync"
        ));
    }

    #[test]
    fn test_mounted_touches_existing_watched_paths() {
        let t = MemoryTransport::new()
            .with_file("/srv/app/wsgi.py", "app = 1\n", 0o644)
            .on_command("touch", |_, _| ExecOutput::ok(""));
        let files = StaticFiles::new();
        let r = checkout("mounted");
        let mut ctx = Context::new(&t, &files, false);
        assert!(Mounted { resource: &r }.apply(&mut ctx).unwrap());
        assert_eq!(
            t.executed(),
            vec![vec!["touch".to_string(), "-ac".to_string(), "/srv/app/wsgi.py".to_string()]]
        );
    }

    #[test]
    fn test_mounted_nothing_to_touch_is_unchanged() {
        let t = MemoryTransport::new();
        let files = StaticFiles::new();
        let r = checkout("dummy");
        let mut ctx = Context::new(&t, &files, false);
        assert!(!Mounted { resource: &r }.apply(&mut ctx).unwrap());
        assert!(t.executed().is_empty());
    }
}
