#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tordl::ftp::{Connector, FtpSession};

#[derive(Default)]
struct Tree {
    /// Directory path to child names, in listing order
    dirs: BTreeMap<String, Vec<String>>,
    files: HashMap<String, Vec<u8>>,
    failing_retrieve: HashSet<String>,
    failing_listing: HashSet<String>,
    /// Every RETR path, in request order
    retrievals: Vec<String>,
    refusals: u32,
    opened: usize,
    live: usize,
}

fn parent_and_name(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

impl Tree {
    fn link(&mut self, path: &str) {
        let (parent, name) = parent_and_name(path);
        if parent != path {
            self.ensure_dir(&parent);
        }
        let children = self.dirs.entry(parent).or_default();
        if !children.contains(&name) {
            children.push(name);
        }
    }

    fn ensure_dir(&mut self, path: &str) {
        if !self.dirs.contains_key(path) {
            self.dirs.insert(path.to_string(), Vec::new());
            if path != "/" {
                self.link(path);
            }
        }
    }
}

/// In-memory FTP server. Clones share the same tree.
#[derive(Clone)]
pub struct MemoryFtp {
    tree: Arc<Mutex<Tree>>,
    home: String,
    full_paths: bool,
}

impl MemoryFtp {
    /// Empty server whose sessions start in `home`.
    pub fn new(home: &str) -> Self {
        let ftp = Self {
            tree: Arc::default(),
            home: home.to_string(),
            full_paths: true,
        };
        ftp.tree().ensure_dir("/");
        ftp.tree().ensure_dir(home);
        ftp
    }

    /// Answer NLST with bare names instead of full paths.
    pub fn with_bare_names(mut self) -> Self {
        self.full_paths = false;
        self
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap()
    }

    pub fn add_dir(&self, path: &str) {
        self.tree().ensure_dir(path);
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let mut tree = self.tree();
        tree.files.insert(path.to_string(), contents.to_vec());
        tree.link(path);
    }

    pub fn fail_retrieve(&self, path: &str) {
        self.tree().failing_retrieve.insert(path.to_string());
    }

    pub fn fail_listing(&self, path: &str) {
        self.tree().failing_listing.insert(path.to_string());
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse(&self, count: u32) {
        self.tree().refusals = count;
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.tree().files.get(path).cloned()
    }

    pub fn retrieved(&self) -> Vec<String> {
        self.tree().retrievals.clone()
    }

    /// Successful connections so far.
    pub fn opened(&self) -> usize {
        self.tree().opened
    }

    /// Sessions opened and not closed yet.
    pub fn live_sessions(&self) -> usize {
        self.tree().live
    }

    pub fn session(&self) -> MemorySession {
        let mut tree = self.tree();
        tree.opened += 1;
        tree.live += 1;
        MemorySession {
            tree: Arc::clone(&self.tree),
            cwd: self.home.clone(),
            full_paths: self.full_paths,
            open: true,
        }
    }
}

impl Connector for MemoryFtp {
    type Session = MemorySession;

    fn address(&self) -> String {
        "memory:21".to_string()
    }

    fn open(&self, _timeout: Duration) -> io::Result<MemorySession> {
        {
            let mut tree = self.tree();
            if tree.refusals > 0 {
                tree.refusals -= 1;
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "connection refused",
                ));
            }
        }
        Ok(self.session())
    }
}

pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    cwd: String,
    full_paths: bool,
    open: bool,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("cwd", &self.cwd)
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl MemorySession {
    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }
        } else if self.cwd == "/" {
            format!("/{path}")
        } else {
            format!("{}/{path}", self.cwd)
        }
    }

    fn check_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "session closed"))
        }
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("550 {path}: no such file"))
}

impl FtpSession for MemorySession {
    fn pwd(&mut self) -> io::Result<String> {
        self.check_open()?;
        Ok(self.cwd.clone())
    }

    fn cwd(&mut self, path: &str) -> io::Result<()> {
        self.check_open()?;
        let path = self.resolve(path);
        if self.tree.lock().unwrap().dirs.contains_key(&path) {
            self.cwd = path;
            Ok(())
        } else {
            Err(not_found(&path))
        }
    }

    fn nlst(&mut self, path: &str) -> io::Result<Vec<String>> {
        self.check_open()?;
        let dir = self.resolve(path);
        let tree = self.tree.lock().unwrap();
        if tree.failing_listing.contains(&dir) {
            return Err(io::Error::other(format!("451 cannot list {dir}")));
        }
        let children = tree.dirs.get(&dir).ok_or_else(|| not_found(&dir))?;
        Ok(children
            .iter()
            .map(|name| {
                if !self.full_paths {
                    name.clone()
                } else if dir == "/" {
                    format!("/{name}")
                } else {
                    format!("{dir}/{name}")
                }
            })
            .collect())
    }

    fn retrieve(&mut self, path: &str, dst: &mut dyn Write) -> io::Result<u64> {
        self.check_open()?;
        let path = self.resolve(path);
        let mut tree = self.tree.lock().unwrap();
        tree.retrievals.push(path.clone());
        let contents = tree.files.get(&path).ok_or_else(|| not_found(&path))?;
        if tree.failing_retrieve.contains(&path) {
            dst.write_all(&contents[..contents.len() / 2])?;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "426 transfer aborted",
            ));
        }
        dst.write_all(contents)?;
        Ok(contents.len() as u64)
    }

    fn store(&mut self, path: &str, src: &mut dyn Read) -> io::Result<u64> {
        self.check_open()?;
        let path = self.resolve(path);
        let mut contents = Vec::new();
        src.read_to_end(&mut contents)?;
        let len = contents.len() as u64;
        let mut tree = self.tree.lock().unwrap();
        tree.files.insert(path.clone(), contents);
        tree.link(&path);
        Ok(len)
    }

    fn close(&mut self) -> io::Result<()> {
        if self.open {
            self.open = false;
            self.tree.lock().unwrap().live -= 1;
        }
        Ok(())
    }
}
