use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::debug;
use walkdir::WalkDir;

pub const TORRENT_EXTENSION: &str = "torrent";

pub fn create_dir(purpose: &str, path: &Path) -> io::Result<()> {
    if !path.exists() {
        debug!("{purpose} dir {path:?} doesn't exist yet, creating");
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Torrent descriptors directly inside `dir`, sorted by file name.
pub fn find_torrents(dir: &Path) -> walkdir::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        let is_torrent = entry
            .path()
            .extension()
            .is_some_and(|ext| ext == TORRENT_EXTENSION);
        if entry.file_type().is_file() && is_torrent {
            found.push(entry.into_path());
        }
    }
    Ok(found)
}

/// Join a remote directory and an entry name with exactly one slash.
pub fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Last `/`-separated segment of a remote path.
pub fn base_name(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, name)| name)
}
