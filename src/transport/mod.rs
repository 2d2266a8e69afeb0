//! Transport abstraction: the platform capability providers converge through.
//!
//! Providers and changes never touch the host directly; every probe and
//! mutation goes through a [`Transport`]. [`local::LocalTransport`] acts on
//! the real host, [`memory::MemoryTransport`] on an in-memory tree that
//! records what was executed.

pub mod local;
pub mod memory;

use crate::core::error::{Error, Result, REDACTED};
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

/// Output from executing a command on a target. Stdout is kept as raw
/// bytes since it may be file content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Stdout for diagnostics; invalid UTF-8 is replaced.
    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    /// The failure as an [`Error::Command`]. A sensitive command keeps
    /// neither stream, since tools like `patch` echo their input on stderr.
    pub fn into_error(self, command: &CommandSpec, sensitive: bool) -> Error {
        let (stdout, stderr) = if sensitive {
            (REDACTED.to_string(), REDACTED.to_string())
        } else {
            (self.stdout_str().into_owned(), self.stderr)
        };
        Error::Command {
            command: command.to_string(),
            exit_code: self.exit_code,
            stdout,
            stderr,
        }
    }
}

/// A command to execute: argv plus optional stdin, environment, working
/// directory and identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub stdin: Option<Vec<u8>>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl CommandSpec {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Run a command line through `sh -c`.
    pub fn shell(line: &str) -> Self {
        Self::new(["sh", "-c", line])
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Basename of the program, e.g. "rmdir" for "/bin/rmdir".
    pub fn program(&self) -> &str {
        self.argv
            .first()
            .map(|p| p.rsplit('/').next().unwrap_or(p))
            .unwrap_or("")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .argv
            .iter()
            .map(|arg| {
                if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || c == '\'') {
                    format!("'{}'", arg.replace('\'', r"'\''"))
                } else {
                    arg.clone()
                }
            })
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}

/// Kind of file-system entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// The subset of `stat(2)` the engine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    /// Permission bits only (`0o7777` mask).
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == FileKind::File
    }
}

/// Platform capability: read-only probes plus the mutating primitives
/// changes use. One handle is shared by every resource in a run.
pub trait Transport: Send + Sync {
    /// `stat` following symlinks; `None` when the path does not exist.
    fn stat(&self, path: &Path) -> Result<Option<FileStat>>;

    /// `lstat`; `None` when the path does not exist.
    fn lstat(&self, path: &Path) -> Result<Option<FileStat>>;

    fn readlink(&self, path: &Path) -> Result<PathBuf>;

    /// Read a whole file.
    fn get(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write a whole file and set its permission bits.
    fn put(&self, path: &Path, content: &[u8], mode: u32) -> Result<()>;

    /// Create one directory; the parent must exist.
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;

    /// Create a directory and any missing ancestors.
    fn makedirs(&self, path: &Path, mode: u32) -> Result<()>;

    fn unlink(&self, path: &Path) -> Result<()>;

    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()>;

    fn execute(&self, command: &CommandSpec) -> Result<ExecOutput>;

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn lexists(&self, path: &Path) -> Result<bool> {
        Ok(self.lstat(path)?.is_some())
    }

    fn isdir(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path)?.is_some_and(|s| s.is_dir()))
    }

    fn isfile(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path)?.is_some_and(|s| s.is_file()))
    }

    fn islink(&self, path: &Path) -> Result<bool> {
        Ok(self
            .lstat(path)?
            .is_some_and(|s| s.kind == FileKind::Symlink))
    }

    /// Look up a user's uid in the target's `/etc/passwd`.
    fn getpwnam(&self, name: &str) -> Result<Option<u32>> {
        lookup_id(self, Path::new("/etc/passwd"), name)
    }

    /// Look up a group's gid in the target's `/etc/group`.
    fn getgrnam(&self, name: &str) -> Result<Option<u32>> {
        lookup_id(self, Path::new("/etc/group"), name)
    }
}

/// Find `name` in a colon-separated account database (third field is the id).
fn lookup_id<T: Transport + ?Sized>(transport: &T, db: &Path, name: &str) -> Result<Option<u32>> {
    if !transport.isfile(db)? {
        return Ok(None);
    }
    let content = transport.get(db)?;
    Ok(parse_account_db(&String::from_utf8_lossy(&content), name))
}

fn parse_account_db(content: &str, name: &str) -> Option<u32> {
    content
        .lines()
        .filter(|line| !line.starts_with('#'))
        .map(|line| line.split(':').collect::<Vec<_>>())
        .find(|fields| fields.first() == Some(&name))
        .and_then(|fields| fields.get(2).and_then(|id| id.parse().ok()))
}
