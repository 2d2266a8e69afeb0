//! Run a shell-level command. Success means a mutation happened.

use super::{Change, ChangeContext};
use crate::core::error::Result;
use crate::transport::CommandSpec;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub command: CommandSpec,
    /// Redact command output from diagnostics.
    pub sensitive: bool,
}

impl ShellCommand {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            sensitive: false,
        }
    }

    pub fn sensitive(mut self, sensitive: bool) -> Self {
        self.sensitive = sensitive;
        self
    }
}

impl Change for ShellCommand {
    fn describe(&self) -> String {
        format!("run {}", self.command)
    }

    fn apply(&self, ctx: &ChangeContext<'_>) -> Result<bool> {
        if ctx.simulate {
            debug!(command = %self.command, "would run");
            return Ok(true);
        }
        debug!(command = %self.command, "running");
        let out = ctx.transport.execute(&self.command)?;
        if out.success() {
            return Ok(true);
        }
        Err(out.into_error(&self.command, self.sensitive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{Error, REDACTED};
    use crate::transport::memory::MemoryTransport;
    use crate::transport::ExecOutput;

    #[test]
    fn test_shell_command_success_is_changed() {
        let t = MemoryTransport::new().on_command("true", |_, _| ExecOutput::ok(""));
        let ctx = ChangeContext { transport: &t, simulate: false };
        assert!(ShellCommand::new(CommandSpec::new(["true"])).apply(&ctx).unwrap());
        assert_eq!(t.executed().len(), 1);
    }

    #[test]
    fn test_shell_command_simulate_does_not_execute() {
        let t = MemoryTransport::new();
        let ctx = ChangeContext { transport: &t, simulate: true };
        assert!(ShellCommand::new(CommandSpec::new(["rm", "-rf", "/srv"])).apply(&ctx).unwrap());
        assert!(t.executed().is_empty());
    }

    #[test]
    fn test_shell_command_failure_carries_output() {
        let t = MemoryTransport::new().on_command("false", |_, _| ExecOutput {
            exit_code: 3,
            stdout: "partial".into(),
            stderr: "boom".into(),
        });
        let ctx = ChangeContext { transport: &t, simulate: false };
        let err = ShellCommand::new(CommandSpec::new(["false"])).apply(&ctx).unwrap_err();
        match err {
            Error::Command { exit_code, stdout, stderr, .. } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stdout, "partial");
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_shell_command_sensitive_redacts_output() {
        let t = MemoryTransport::new().on_command("false", |_, _| ExecOutput {
            exit_code: 1,
            stdout: "password=hunter2".into(),
            stderr: "bad token hunter2".into(),
        });
        let ctx = ChangeContext { transport: &t, simulate: false };
        let err = ShellCommand::new(CommandSpec::new(["false"]))
            .sensitive(true)
            .apply(&ctx)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Command { ref stdout, ref stderr, .. } if stdout == REDACTED && stderr == REDACTED
        ));
        assert!(!err.to_string().contains("hunter2"));
        assert!(!format!("{err:?}").contains("hunter2"));
    }
}
