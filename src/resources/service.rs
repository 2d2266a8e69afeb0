//! Service resource: start, stop or restart a daemon through declared
//! shell commands.
//!
//! Status is probed, in order, from the `running` command's exit code, then
//! from the pid file and a signal-0 liveness check, and is otherwise
//! unknown.

use crate::changes::ShellCommand;
use crate::core::context::Context;
use crate::core::error::{Error, Result};
use crate::core::policy::{AttributeSchema, Policy, Registry, ResourceSchema};
use crate::core::provider::Provider;
use crate::core::types::{Resource, ValueKind};
use crate::transport::CommandSpec;
use std::fmt;
use std::path::Path;
use tracing::debug;

pub const KIND: &str = "service";

pub fn schema() -> ResourceSchema {
    ResourceSchema {
        kind: KIND,
        description: "A daemon controlled by shell commands",
        default_policy: "start",
        path_name: false,
        attributes: vec![
            AttributeSchema::optional("running", ValueKind::Str),
            AttributeSchema::optional("pidfile", ValueKind::Str),
            AttributeSchema::optional("start", ValueKind::Str),
            AttributeSchema::optional("stop", ValueKind::Str),
            AttributeSchema::optional("restart", ValueKind::Str),
        ],
    }
}

pub fn register(registry: &mut Registry) {
    registry.register(
        schema(),
        [
            Policy::new("start", "Start", start),
            Policy::new("stop", "Stop", stop),
            Policy::new("restart", "Restart", restart),
        ],
    );
}

fn start<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(Start(ServiceActions::new(resource)))
}

fn stop<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(Stop(ServiceActions::new(resource)))
}

fn restart<'a>(resource: &'a Resource) -> Box<dyn Provider + 'a> {
    Box::new(Restart(ServiceActions::new(resource)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    NotRunning,
    Unknown,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::NotRunning => write!(f, "not-running"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Behaviour shared by the service providers.
#[derive(Debug, Clone, Copy)]
pub struct ServiceActions<'a> {
    resource: &'a Resource,
}

impl<'a> ServiceActions<'a> {
    pub fn new(resource: &'a Resource) -> Self {
        Self { resource }
    }

    /// Optional capabilities. "restart" is present iff a restart command
    /// is declared.
    pub fn features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if self.resource.attr("restart").as_opt_string().is_some() {
            features.push("restart");
        }
        features
    }

    /// Probe the current status. Probes run even when simulating.
    pub fn status(&self, ctx: &Context<'_>) -> Result<ServiceStatus> {
        let transport = ctx.transport();

        if let Some(running) = self.resource.attr("running").as_opt_string() {
            let out = transport.execute(&CommandSpec::shell(&running))?;
            return Ok(if out.success() {
                ServiceStatus::Running
            } else {
                ServiceStatus::NotRunning
            });
        }

        let Some(pidfile) = self.resource.attr("pidfile").as_opt_string() else {
            return Ok(ServiceStatus::Unknown);
        };
        let pidfile = Path::new(&pidfile);
        if !transport.exists(pidfile)? {
            return Ok(ServiceStatus::NotRunning);
        }

        let raw = transport.get(pidfile)?;
        let pid = match String::from_utf8_lossy(&raw).trim().parse::<u32>() {
            Ok(pid) if pid > 0 => pid,
            _ => return Ok(ServiceStatus::Unknown),
        };

        let out = transport.execute(&CommandSpec::new(["kill", "-0", pid.to_string().as_str()]))?;
        Ok(if out.success() {
            ServiceStatus::Running
        } else {
            ServiceStatus::NotRunning
        })
    }

    /// Run the command declared for `action`.
    pub fn run_action(&self, ctx: &mut Context<'_>, action: &str) -> Result<()> {
        let command = self.resource.attr(action).as_opt_string().ok_or_else(|| {
            Error::InvalidResource {
                resource: self.resource.id().clone(),
                message: format!("no '{}' command declared", action),
            }
        })?;
        debug!(service = %self.resource.name(), action, "service action");
        ctx.change(ShellCommand::new(CommandSpec::shell(&command)))?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Start<'a>(ServiceActions<'a>);

impl Provider for Start<'_> {
    fn name(&self) -> &'static str {
        "Start"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        if self.0.status(ctx)? == ServiceStatus::Running {
            return Ok(false);
        }
        self.0.run_action(ctx, "start")?;
        Ok(true)
    }
}

#[derive(Debug)]
pub struct Stop<'a>(ServiceActions<'a>);

impl Provider for Stop<'_> {
    fn name(&self) -> &'static str {
        "Stop"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        if self.0.status(ctx)? == ServiceStatus::NotRunning {
            return Ok(false);
        }
        self.0.run_action(ctx, "stop")?;
        Ok(true)
    }
}

#[derive(Debug)]
pub struct Restart<'a>(ServiceActions<'a>);

impl Provider for Restart<'_> {
    fn name(&self) -> &'static str {
        "Restart"
    }

    fn apply(&self, ctx: &mut Context<'_>) -> Result<bool> {
        if self.0.status(ctx)? == ServiceStatus::NotRunning {
            self.0.run_action(ctx, "start")?;
            return Ok(true);
        }
        if self.0.features().contains(&"restart") {
            self.0.run_action(ctx, "restart")?;
        } else {
            self.0.run_action(ctx, "stop")?;
            self.0.run_action(ctx, "start")?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::StaticFiles;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::ExecOutput;

    const PIDFILE: &str = "/run/app.pid";

    /// A fake daemon: `sh -c <start>` writes the pid file, `<stop>` removes
    /// it, `kill -0 4242` succeeds while the pid file exists.
    fn daemon(t: MemoryTransport) -> MemoryTransport {
        t.with_dir("/run", 0o755)
            .on_command("sh", |cmd, fs| {
                let line = cmd.argv.get(2).cloned().unwrap_or_default();
                let pidfile = Path::new(PIDFILE);
                if line.starts_with("app-start") || line.starts_with("app-restart") {
                    let _ = fs.write(pidfile, "4242\n", 0o644);
                    ExecOutput::ok("")
                } else if line.starts_with("app-stop") {
                    let _ = fs.unlink(pidfile);
                    ExecOutput::ok("")
                } else if line.starts_with("app-status") {
                    if fs.exists(pidfile) {
                        ExecOutput::ok("")
                    } else {
                        ExecOutput::failed(3, "")
                    }
                } else {
                    ExecOutput::failed(127, "unknown")
                }
            })
            .on_command("kill", |cmd, fs| {
                if cmd.argv[2] == "4242" && fs.exists(Path::new(PIDFILE)) {
                    ExecOutput::ok("")
                } else {
                    ExecOutput::failed(1, "no such process")
                }
            })
    }

    fn service(policy: &str) -> Resource {
        Resource::new(KIND, "app")
            .with_policy(policy)
            .with_attr("pidfile", PIDFILE)
            .with_attr("start", "app-start")
            .with_attr("stop", "app-stop")
            .with_attr("restart", "app-restart")
    }

    fn apply(r: &Resource, t: &MemoryTransport, simulate: bool) -> Result<bool> {
        let files = StaticFiles::new();
        let mut ctx = Context::new(t, &files, simulate);
        let policy = Registry::builtin().resolve(r)?;
        (policy.factory)(r).apply(&mut ctx)
    }

    fn status(r: &Resource, t: &MemoryTransport) -> ServiceStatus {
        let files = StaticFiles::new();
        let ctx = Context::new(t, &files, true);
        ServiceActions::new(r).status(&ctx).unwrap()
    }

    fn shell_lines(t: &MemoryTransport) -> Vec<String> {
        t.executed()
            .into_iter()
            .filter(|argv| argv[0] == "sh")
            .map(|argv| argv[2].clone())
            .collect()
    }

    #[test]
    fn test_service_status_sources() {
        let t = daemon(MemoryTransport::new());
        assert_eq!(status(&Resource::new(KIND, "x"), &t), ServiceStatus::Unknown);
        assert_eq!(status(&service("start"), &t), ServiceStatus::NotRunning);

        let t = daemon(MemoryTransport::new()).with_file(PIDFILE, "4242\n", 0o644);
        assert_eq!(status(&service("start"), &t), ServiceStatus::Running);

        let t = daemon(MemoryTransport::new()).with_file(PIDFILE, "garbage", 0o644);
        assert_eq!(status(&service("start"), &t), ServiceStatus::Unknown);

        let t = daemon(MemoryTransport::new()).with_file(PIDFILE, "99", 0o644);
        assert_eq!(status(&service("start"), &t), ServiceStatus::NotRunning);
    }

    #[test]
    fn test_service_running_command_wins_over_pidfile() {
        let t = daemon(MemoryTransport::new()).with_file(PIDFILE, "garbage", 0o644);
        let r = service("start").with_attr("running", "app-status");
        assert_eq!(status(&r, &t), ServiceStatus::Running);
        assert!(t.executed().iter().all(|argv| argv[0] != "kill"));
    }

    #[test]
    fn test_service_start_and_stop_idempotent() {
        let t = daemon(MemoryTransport::new());
        assert!(apply(&service("start"), &t, false).unwrap());
        assert_eq!(status(&service("start"), &t), ServiceStatus::Running);
        assert!(!apply(&service("start"), &t, false).unwrap());

        assert!(apply(&service("stop"), &t, false).unwrap());
        assert_eq!(status(&service("stop"), &t), ServiceStatus::NotRunning);
        assert!(!apply(&service("stop"), &t, false).unwrap());
        assert_eq!(shell_lines(&t), vec!["app-start", "app-stop"]);
    }

    #[test]
    fn test_service_restart_state_machine() {
        let t = daemon(MemoryTransport::new());
        let restart = service("restart");

        // not-running -> running via start
        assert!(apply(&restart, &t, false).unwrap());
        assert_eq!(status(&restart, &t), ServiceStatus::Running);
        assert_eq!(shell_lines(&t), vec!["app-start"]);

        // running + restart feature -> native restart, still changed
        t.clear_history();
        assert!(apply(&restart, &t, false).unwrap());
        assert_eq!(shell_lines(&t), vec!["app-restart"]);

        // start on a running service is a no-op
        t.clear_history();
        assert!(!apply(&service("start"), &t, false).unwrap());
        assert!(shell_lines(&t).is_empty());
    }

    #[test]
    fn test_service_restart_without_feature_stops_then_starts() {
        let t = daemon(MemoryTransport::new()).with_file(PIDFILE, "4242", 0o644);
        let r = Resource::new(KIND, "app")
            .with_policy("restart")
            .with_attr("pidfile", PIDFILE)
            .with_attr("start", "app-start")
            .with_attr("stop", "app-stop");
        assert!(ServiceActions::new(&r).features().is_empty());
        assert!(apply(&r, &t, false).unwrap());
        assert_eq!(shell_lines(&t), vec!["app-stop", "app-start"]);
    }

    #[test]
    fn test_service_missing_command_is_invalid() {
        let t = daemon(MemoryTransport::new());
        let r = Resource::new(KIND, "app").with_attr("pidfile", PIDFILE);
        let err = apply(&r, &t, false).unwrap_err();
        assert!(matches!(err, Error::InvalidResource { ref message, .. } if message.contains("'start'")));
    }

    #[test]
    fn test_service_failed_action_is_command_error() {
        let t = daemon(MemoryTransport::new());
        let r = service("start").with_attr("start", "exit 1");
        let err = apply(&r, &t, false).unwrap_err();
        assert!(matches!(err, Error::Command { exit_code: 127, .. }));
    }

    #[test]
    fn test_service_simulate_probes_but_does_not_act() {
        let t = daemon(MemoryTransport::new());
        assert!(apply(&service("start"), &t, true).unwrap());
        assert!(shell_lines(&t).is_empty());
        assert_eq!(status(&service("start"), &t), ServiceStatus::NotRunning);
    }
}
