use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::{
    error::Error,
    ftp::{FtpSession, download_file, is_directory},
    utils::{base_name, create_dir, remote_join},
};

/// Filesystem and FTP artifacts, plus the marker file used to check FTP
/// readiness. None of them are copied back.
const SPECIAL_NAMES: [&str; 4] = [".", "..", "lost+found", ".ftp_ready"];

const DESCRIPTOR_SUFFIX: &str = ".torrent";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    /// Excluded by name
    Special,
    /// Torrent descriptor, excluded by suffix
    Descriptor,
}

/// One name returned by a remote listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path used for CWD/RETR
    pub path: String,
    /// Last path segment, used for the local name
    pub name: String,
}

impl RemoteEntry {
    /// Servers answer `NLST dir` with either bare names or full paths.
    pub fn from_listing(dir: &str, listed: &str) -> Self {
        let path = if listed.contains('/') {
            listed.to_string()
        } else {
            remote_join(dir, listed)
        };
        Self {
            name: base_name(listed).to_string(),
            path,
        }
    }

    /// The kind of an entry excluded by name alone, if it is excluded.
    pub fn excluded(&self) -> Option<EntryKind> {
        if self.name.is_empty() || SPECIAL_NAMES.contains(&self.name.as_str()) {
            Some(EntryKind::Special)
        } else if self.name.ends_with(DESCRIPTOR_SUFFIX) {
            Some(EntryKind::Descriptor)
        } else {
            None
        }
    }

    pub fn classify<S: FtpSession + ?Sized>(&self, session: &mut S) -> EntryKind {
        self.excluded().unwrap_or_else(|| {
            if is_directory(session, &self.path) {
                EntryKind::Directory
            } else {
                EntryKind::File
            }
        })
    }
}

/// A listed remote directory being copied into a local one.
#[derive(Debug)]
struct MirrorTask {
    remote: String,
    local: PathBuf,
    /// Listed names not handled yet, in listing order
    pending: std::vec::IntoIter<String>,
}

/// Result of a mirror run. Failures are contained here, never raised.
#[derive(Debug, Default)]
pub struct MirrorReport {
    pub files: usize,
    pub bytes: u64,
    /// Directories listed successfully, the root included
    pub directories: usize,
    pub skipped: usize,
    pub failures: Vec<Error>,
}

impl MirrorReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Copy the remote tree under `remote_root` into `local_root`.
///
/// The walk is depth-first in listing order: a subdirectory is mirrored
/// completely before the entries listed after it. A directory that cannot be
/// created locally or listed remotely is skipped along with its subtree, and a
/// file that fails to download is skipped on its own; both are recorded in the
/// report and the walk carries on.
pub fn mirror<S: FtpSession + ?Sized>(
    session: &mut S,
    remote_root: &str,
    local_root: &Path,
) -> MirrorReport {
    let mut report = MirrorReport::default();
    let mut stack = Vec::new();
    stack.extend(enter(
        session,
        remote_root.to_string(),
        local_root.to_path_buf(),
        &mut report,
    ));

    while let Some(task) = stack.last_mut() {
        let Some(listed) = task.pending.next() else {
            stack.pop();
            continue;
        };
        let entry = RemoteEntry::from_listing(&task.remote, &listed);
        let local = task.local.join(&entry.name);

        match entry.classify(session) {
            EntryKind::Special | EntryKind::Descriptor => {
                debug!("Skipping {}", entry.path);
                report.skipped += 1;
            }
            EntryKind::Directory => {
                stack.extend(enter(session, entry.path, local, &mut report));
            }
            EntryKind::File => {
                info!("Downloading: {}", entry.name);
                match download_file(session, &entry.path, &local) {
                    Ok(bytes) => {
                        info!("Downloaded: {} ({bytes} bytes)", entry.name);
                        report.files += 1;
                        report.bytes += bytes;
                    }
                    Err(e) => {
                        error!("{e}");
                        report.failures.push(e);
                    }
                }
            }
        }
    }

    report
}

/// Create `local` and list `remote`. Failures are recorded and yield no task.
fn enter<S: FtpSession + ?Sized>(
    session: &mut S,
    remote: String,
    local: PathBuf,
    report: &mut MirrorReport,
) -> Option<MirrorTask> {
    info!("Entering directory: {remote}");
    if let Err(source) = create_dir("download", &local) {
        let e = Error::LocalDirectory {
            path: local,
            source,
        };
        error!("{e}");
        report.failures.push(e);
        return None;
    }

    match session.nlst(&remote) {
        Ok(listing) => {
            report.directories += 1;
            Some(MirrorTask {
                remote,
                local,
                pending: listing.into_iter(),
            })
        }
        Err(source) => {
            let e = Error::ListingFailure {
                path: remote,
                source,
            };
            error!("{e}");
            report.failures.push(e);
            None
        }
    }
}
