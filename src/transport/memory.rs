//! In-memory transport with a recorded command history.
//!
//! Holds a small file tree (directories, files, symlinks with mode and
//! ownership), user and group tables, and command handlers keyed by program
//! basename. Every executed command and every mutating primitive is
//! recorded, so tests can assert both the resulting tree and exactly what
//! ran against it.

use super::{CommandSpec, ExecOutput, FileKind, FileStat, Transport};
use crate::core::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Entry in the in-memory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Directory,
    File(Vec<u8>),
    Symlink(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    node: Node,
    mode: u32,
    uid: u32,
    gid: u32,
}

/// The in-memory file tree. Command handlers receive it mutably.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryFs {
    entries: BTreeMap<PathBuf, Entry>,
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            _ => {}
        }
    }
    out
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

impl Default for MemoryFs {
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            PathBuf::from("/"),
            Entry {
                node: Node::Directory,
                mode: 0o755,
                uid: 0,
                gid: 0,
            },
        );
        Self { entries }
    }
}

impl MemoryFs {
    /// Resolve symlinks in the final component (bounded to avoid loops).
    fn resolve(&self, path: &Path) -> PathBuf {
        let mut current = normalize(path);
        for _ in 0..16 {
            match self.entries.get(&current) {
                Some(Entry {
                    node: Node::Symlink(target),
                    ..
                }) => {
                    current = match current.parent() {
                        Some(parent) => normalize(&parent.join(target)),
                        None => normalize(target),
                    };
                }
                _ => break,
            }
        }
        current
    }

    fn stat_of(entry: &Entry) -> FileStat {
        let (kind, size) = match &entry.node {
            Node::Directory => (FileKind::Directory, 0),
            Node::File(content) => (FileKind::File, content.len() as u64),
            Node::Symlink(target) => (FileKind::Symlink, target.as_os_str().len() as u64),
        };
        FileStat {
            kind,
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            size,
        }
    }

    pub fn stat(&self, path: &Path) -> Option<FileStat> {
        self.entries.get(&self.resolve(path)).map(Self::stat_of)
    }

    pub fn lstat(&self, path: &Path) -> Option<FileStat> {
        self.entries.get(&normalize(path)).map(Self::stat_of)
    }

    pub fn node(&self, path: &Path) -> Option<&Node> {
        self.entries.get(&self.resolve(path)).map(|e| &e.node)
    }

    pub fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_some()
    }

    fn require_parent_dir(&self, path: &Path) -> io::Result<()> {
        let parent = path.parent().unwrap_or(Path::new("/"));
        match self.stat(parent) {
            Some(st) if st.is_dir() => Ok(()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: not a directory", parent.display()),
            )),
            None => Err(not_found(parent)),
        }
    }

    /// Create a directory; the parent must exist.
    pub fn mkdir(&mut self, path: &Path, mode: u32) -> io::Result<()> {
        let path = normalize(path);
        if self.entries.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{}: file exists", path.display()),
            ));
        }
        self.require_parent_dir(&path)?;
        self.entries.insert(
            path,
            Entry {
                node: Node::Directory,
                mode,
                uid: 0,
                gid: 0,
            },
        );
        Ok(())
    }

    /// Create a directory and its missing ancestors.
    pub fn makedirs(&mut self, path: &Path, mode: u32) -> io::Result<()> {
        let path = normalize(path);
        let mut current = PathBuf::from("/");
        for component in path.components().skip(1) {
            current.push(component);
            match self.stat(&current) {
                Some(st) if st.is_dir() => continue,
                Some(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("{}: not a directory", current.display()),
                    ))
                }
                None => self.mkdir(&current, mode)?,
            }
        }
        Ok(())
    }

    /// Write a file, replacing any existing content but keeping ownership.
    pub fn write(&mut self, path: &Path, content: impl Into<Vec<u8>>, mode: u32) -> io::Result<()> {
        let path = self.resolve(path);
        self.require_parent_dir(&path)?;
        let (uid, gid) = match self.entries.get(&path) {
            Some(Entry {
                node: Node::Directory,
                ..
            }) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{}: is a directory", path.display()),
                ))
            }
            Some(existing) => (existing.uid, existing.gid),
            None => (0, 0),
        };
        self.entries.insert(
            path,
            Entry {
                node: Node::File(content.into()),
                mode,
                uid,
                gid,
            },
        );
        Ok(())
    }

    pub fn symlink(&mut self, target: impl Into<PathBuf>, link: &Path) -> io::Result<()> {
        let link = normalize(link);
        self.require_parent_dir(&link)?;
        self.entries.insert(
            link,
            Entry {
                node: Node::Symlink(target.into()),
                mode: 0o777,
                uid: 0,
                gid: 0,
            },
        );
        Ok(())
    }

    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        match self.node(path) {
            Some(Node::File(content)) => Ok(content.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: not a regular file", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    /// Remove a single non-directory entry.
    pub fn unlink(&mut self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        match self.entries.get(&path) {
            Some(Entry {
                node: Node::Directory,
                ..
            }) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: is a directory", path.display()),
            )),
            Some(_) => {
                self.entries.remove(&path);
                Ok(())
            }
            None => Err(not_found(&path)),
        }
    }

    /// Remove an empty directory.
    pub fn rmdir(&mut self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        match self.entries.get(&path) {
            Some(Entry {
                node: Node::Directory,
                ..
            }) => {
                if self.children(&path).next().is_some() {
                    return Err(io::Error::new(
                        io::ErrorKind::Other,
                        format!("{}: directory not empty", path.display()),
                    ));
                }
                self.entries.remove(&path);
                Ok(())
            }
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{}: not a directory", path.display()),
            )),
            None => Err(not_found(&path)),
        }
    }

    /// Remove an entry and everything below it. Missing paths are fine.
    pub fn remove_tree(&mut self, path: &Path) {
        let path = normalize(path);
        self.entries
            .retain(|p, _| p != &path && !p.starts_with(&path));
    }

    fn children<'a>(&'a self, dir: &'a Path) -> impl Iterator<Item = &'a PathBuf> + 'a {
        self.entries
            .keys()
            .filter(move |p| p.parent() == Some(dir) && p.as_path() != dir)
    }

    pub fn chmod(&mut self, path: &Path, mode: u32) -> io::Result<()> {
        let path = self.resolve(path);
        let entry = self.entries.get_mut(&path).ok_or_else(|| not_found(&path))?;
        entry.mode = mode & 0o7777;
        Ok(())
    }

    pub fn chown(&mut self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        let path = self.resolve(path);
        let entry = self.entries.get_mut(&path).ok_or_else(|| not_found(&path))?;
        if let Some(uid) = uid {
            entry.uid = uid;
        }
        if let Some(gid) = gid {
            entry.gid = gid;
        }
        Ok(())
    }
}

/// Command handler: receives the command and the tree, returns the output.
pub type Handler = Box<dyn Fn(&CommandSpec, &mut MemoryFs) -> ExecOutput + Send>;

/// A mutating primitive or command recorded by [`MemoryTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Put(PathBuf),
    Mkdir(PathBuf),
    Unlink(PathBuf),
    Chmod(PathBuf, u32),
    Chown(PathBuf, Option<u32>, Option<u32>),
    Execute(Vec<String>),
}

impl Recorded {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Execute(_))
    }
}

struct State {
    fs: MemoryFs,
    users: HashMap<String, u32>,
    groups: HashMap<String, u32>,
    handlers: HashMap<String, Handler>,
    history: Vec<Recorded>,
}

/// Transport over an in-memory tree; see the module docs.
pub struct MemoryTransport {
    state: Mutex<State>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport").finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// An empty tree (just `/`) with `root` as uid/gid 0.
    pub fn new() -> Self {
        let state = State {
            fs: MemoryFs::default(),
            users: HashMap::from([("root".to_string(), 0)]),
            groups: HashMap::from([("root".to_string(), 0)]),
            handlers: HashMap::new(),
            history: Vec::new(),
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking handler poisons the lock; the tree is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_user(self, name: &str, uid: u32) -> Self {
        self.lock().users.insert(name.to_string(), uid);
        self
    }

    pub fn with_group(self, name: &str, gid: u32) -> Self {
        self.lock().groups.insert(name.to_string(), gid);
        self
    }

    /// Seed a directory (and its ancestors).
    ///
    /// # Panics
    ///
    /// Panics if a path component exists and is not a directory.
    pub fn with_dir(self, path: &str, mode: u32) -> Self {
        self.lock()
            .fs
            .makedirs(Path::new(path), mode)
            .unwrap_or_else(|e| panic!("seeding directory {path}: {e}"));
        self
    }

    /// Seed a file, creating missing parent directories.
    ///
    /// # Panics
    ///
    /// Panics if the path cannot hold a file.
    pub fn with_file(self, path: &str, content: impl Into<Vec<u8>>, mode: u32) -> Self {
        {
            let mut state = self.lock();
            let p = Path::new(path);
            if let Some(parent) = p.parent() {
                let _ = state.fs.makedirs(parent, 0o755);
            }
            state
                .fs
                .write(p, content, mode)
                .unwrap_or_else(|e| panic!("seeding file {path}: {e}"));
        }
        self
    }

    /// Seed a symlink at `link` pointing to `target`.
    ///
    /// # Panics
    ///
    /// Panics if the parent of `link` is not a directory.
    pub fn with_symlink(self, target: &str, link: &str) -> Self {
        self.lock()
            .fs
            .symlink(target, Path::new(link))
            .unwrap_or_else(|e| panic!("seeding symlink {link}: {e}"));
        self
    }

    /// Register a handler for a program basename (e.g. "rmdir").
    pub fn on_command<F>(self, program: &str, handler: F) -> Self
    where
        F: Fn(&CommandSpec, &mut MemoryFs) -> ExecOutput + Send + 'static,
    {
        self.lock()
            .handlers
            .insert(program.to_string(), Box::new(handler));
        self
    }

    /// Run a closure against the tree without recording anything.
    pub fn inspect<T>(&self, f: impl FnOnce(&MemoryFs) -> T) -> T {
        f(&self.lock().fs)
    }

    /// Snapshot of the tree.
    pub fn snapshot(&self) -> MemoryFs {
        self.lock().fs.clone()
    }

    pub fn history(&self) -> Vec<Recorded> {
        self.lock().history.clone()
    }

    /// Argv of every executed command, in order.
    pub fn executed(&self) -> Vec<Vec<String>> {
        self.lock()
            .history
            .iter()
            .filter_map(|r| match r {
                Recorded::Execute(argv) => Some(argv.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of mutating primitive calls (put, mkdir, unlink, chmod, chown).
    pub fn mutation_count(&self) -> usize {
        self.lock().history.iter().filter(|r| r.is_mutation()).count()
    }

    pub fn clear_history(&self) {
        self.lock().history.clear();
    }

    fn mutate(&self, record: Recorded, f: impl FnOnce(&mut MemoryFs) -> io::Result<()>) -> Result<()> {
        let mut state = self.lock();
        state.history.push(record);
        Ok(f(&mut state.fs)?)
    }
}

impl Transport for MemoryTransport {
    fn stat(&self, path: &Path) -> Result<Option<FileStat>> {
        Ok(self.lock().fs.stat(path))
    }

    fn lstat(&self, path: &Path) -> Result<Option<FileStat>> {
        Ok(self.lock().fs.lstat(path))
    }

    fn readlink(&self, path: &Path) -> Result<PathBuf> {
        match self.lock().fs.entries.get(&normalize(path)) {
            Some(Entry {
                node: Node::Symlink(target),
                ..
            }) => Ok(target.clone()),
            Some(_) => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{}: not a symlink", path.display()),
            )
            .into()),
            None => Err(not_found(path).into()),
        }
    }

    fn get(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(self.lock().fs.read(path)?)
    }

    fn put(&self, path: &Path, content: &[u8], mode: u32) -> Result<()> {
        self.mutate(Recorded::Put(normalize(path)), |fs| {
            fs.write(path, content, mode)
        })
    }

    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        self.mutate(Recorded::Mkdir(normalize(path)), |fs| fs.mkdir(path, mode))
    }

    fn makedirs(&self, path: &Path, mode: u32) -> Result<()> {
        self.mutate(Recorded::Mkdir(normalize(path)), |fs| {
            fs.makedirs(path, mode)
        })
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        self.mutate(Recorded::Unlink(normalize(path)), |fs| fs.unlink(path))
    }

    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.mutate(Recorded::Chmod(normalize(path), mode), |fs| {
            fs.chmod(path, mode)
        })
    }

    fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        self.mutate(Recorded::Chown(normalize(path), uid, gid), |fs| {
            fs.chown(path, uid, gid)
        })
    }

    fn execute(&self, command: &CommandSpec) -> Result<ExecOutput> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.history.push(Recorded::Execute(command.argv.clone()));
        let output = match state.handlers.get(command.program()) {
            Some(handler) => handler(command, &mut state.fs),
            None => ExecOutput::failed(
                127,
                format!("{}: command not found", command.program()),
            ),
        };
        Ok(output)
    }

    fn getpwnam(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.lock().users.get(name).copied())
    }

    fn getgrnam(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.lock().groups.get(name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_seeded_tree() {
        let t = MemoryTransport::new()
            .with_dir("/srv", 0o755)
            .with_file("/etc/motd", "hi", 0o644);
        assert!(t.isdir(Path::new("/")).unwrap());
        assert!(t.isdir(Path::new("/srv")).unwrap());
        assert!(t.isfile(Path::new("/etc/motd")).unwrap());
        assert_eq!(t.get(Path::new("/etc/motd")).unwrap(), b"hi");
        assert!(!t.exists(Path::new("/srv/app")).unwrap());
        assert_eq!(t.mutation_count(), 0);
    }

    #[test]
    fn test_memory_mkdir_requires_parent() {
        let t = MemoryTransport::new();
        assert!(t.mkdir(Path::new("/srv/app"), 0o755).is_err());
        t.makedirs(Path::new("/srv/app"), 0o700).unwrap();
        let st = t.stat(Path::new("/srv")).unwrap().unwrap();
        assert!(st.is_dir());
        assert_eq!(st.mode, 0o700);
    }

    #[test]
    fn test_memory_put_keeps_ownership() {
        let t = MemoryTransport::new().with_file("/f", "a", 0o644);
        t.chown(Path::new("/f"), Some(33), Some(33)).unwrap();
        t.put(Path::new("/f"), b"b", 0o600).unwrap();
        let st = t.stat(Path::new("/f")).unwrap().unwrap();
        assert_eq!((st.uid, st.gid, st.mode), (33, 33, 0o600));
        assert_eq!(t.mutation_count(), 2);
    }

    #[test]
    fn test_memory_symlinks() {
        let t = MemoryTransport::new()
            .with_dir("/data", 0o755)
            .with_symlink("/data", "/link");
        assert!(t.inspect(|fs| fs.lstat(Path::new("/link")).is_some()));
        assert!(t.islink(Path::new("/link")).unwrap());
        assert!(t.isdir(Path::new("/link")).unwrap());
        assert_eq!(t.readlink(Path::new("/link")).unwrap(), PathBuf::from("/data"));
        assert!(t.readlink(Path::new("/data")).is_err());
    }

    #[test]
    fn test_memory_rmdir_and_remove_tree() {
        let mut fs = MemoryFs::default();
        fs.makedirs(Path::new("/a/b"), 0o755).unwrap();
        assert!(fs.rmdir(Path::new("/a")).is_err());
        fs.rmdir(Path::new("/a/b")).unwrap();
        fs.makedirs(Path::new("/a/c/d"), 0o755).unwrap();
        fs.remove_tree(Path::new("/a"));
        assert!(!fs.exists(Path::new("/a")));
        assert!(!fs.exists(Path::new("/a/c/d")));
        assert!(fs.exists(Path::new("/")));
    }

    #[test]
    fn test_memory_execute_handlers_and_history() {
        let t = MemoryTransport::new()
            .with_dir("/srv/app", 0o755)
            .on_command("rmdir", |cmd, fs| match fs.rmdir(Path::new(&cmd.argv[1])) {
                Ok(()) => ExecOutput::ok(""),
                Err(e) => ExecOutput::failed(1, e.to_string()),
            });
        let out = t.execute(&CommandSpec::new(["/bin/rmdir", "/srv/app"])).unwrap();
        assert!(out.success());
        assert!(!t.exists(Path::new("/srv/app")).unwrap());

        let out = t.execute(&CommandSpec::new(["systemctl", "start"])).unwrap();
        assert_eq!(out.exit_code, 127);
        assert_eq!(
            t.executed(),
            vec![
                vec!["/bin/rmdir".to_string(), "/srv/app".to_string()],
                vec!["systemctl".to_string(), "start".to_string()],
            ]
        );
        assert_eq!(t.mutation_count(), 0);
    }

    #[test]
    fn test_memory_accounts() {
        let t = MemoryTransport::new().with_user("www", 33).with_group("www", 34);
        assert_eq!(t.getpwnam("root").unwrap(), Some(0));
        assert_eq!(t.getpwnam("www").unwrap(), Some(33));
        assert_eq!(t.getgrnam("www").unwrap(), Some(34));
        assert_eq!(t.getpwnam("ghost").unwrap(), None);
    }
}
