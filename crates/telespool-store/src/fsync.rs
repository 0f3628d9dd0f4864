// ABOUTME: Low-level fsync helpers for file contents and directory entries.
// ABOUTME: A freshly created log needs both to survive power loss.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Flush a file's contents and metadata to the medium.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Flush a directory so that newly created entries survive a crash.
///
/// Creating a file updates its parent directory; without this the new
/// entry can vanish after power loss even when the file data was synced.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
