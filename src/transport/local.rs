//! Local transport: converges the host the process runs on.

use super::{CommandSpec, ExecOutput, FileKind, FileStat, Transport};
use crate::core::error::{Error, Result};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Transport acting on the local file system and process table.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

fn to_stat(meta: &std::fs::Metadata) -> FileStat {
    let ft = meta.file_type();
    let kind = if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_file() {
        FileKind::File
    } else {
        FileKind::Other
    };
    FileStat {
        kind,
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.len(),
    }
}

fn missing_as_none(result: std::io::Result<std::fs::Metadata>) -> Result<Option<FileStat>> {
    match result {
        Ok(meta) => Ok(Some(to_stat(&meta))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Transport for LocalTransport {
    fn stat(&self, path: &Path) -> Result<Option<FileStat>> {
        missing_as_none(std::fs::metadata(path))
    }

    fn lstat(&self, path: &Path) -> Result<Option<FileStat>> {
        missing_as_none(std::fs::symlink_metadata(path))
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        Ok(std::fs::read_link(path)?)
    }

    fn get(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }

    fn put(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        // Write to a sibling temp file and rename so readers never see a
        // partially written file.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!(".{}.converge-tmp", file_name));
        std::fs::write(&tmp_path, content)?;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(mode))?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        std::fs::create_dir(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn makedirs(&self, path: &Path, mode: u32) -> Result<()> {
        std::fs::create_dir_all(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        Ok(())
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        Ok(std::fs::remove_file(path)?)
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        Ok(std::fs::set_permissions(
            path,
            std::fs::Permissions::from_mode(mode),
        )?)
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        Ok(std::os::unix::fs::chown(path, uid, gid)?)
    }

    fn execute(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or_else(|| Error::InvalidProvider("empty command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(ref cwd) = spec.cwd {
            cmd.current_dir(cwd);
        }
        if let Some(ref group) = spec.group {
            let gid = self
                .getgrnam(group)?
                .ok_or_else(|| Error::UnknownGroup(group.clone()))?;
            cmd.gid(gid);
        }
        if let Some(ref user) = spec.user {
            let uid = self
                .getpwnam(user)?
                .ok_or_else(|| Error::UnknownUser(user.clone()))?;
            cmd.uid(uid);
        }

        let mut child = cmd.spawn()?;
        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            stdin.write_all(input)?;
        }
        let output = child.wait_with_output()?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
