//! Size snapshots and change detection for topology log files.
//!
//! FRR and syslog files under a topology directory are shared by every
//! trial running on that topology. A trial snapshots their sizes before
//! deploying, collects the ones whose size changed during the run, and
//! truncates them afterwards so the next trial starts from empty files.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Records the current size of every `.log` file under `root`.
pub fn record_log_sizes(root: &Path) -> io::Result<HashMap<PathBuf, u64>> {
    let mut sizes = HashMap::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().is_some_and(|ext| ext == "log")
        {
            let size = entry.metadata()?.len();
            sizes.insert(entry.into_path(), size);
        }
    }
    Ok(sizes)
}

/// Returns the snapshotted files whose size changed, skipping
/// `control.log`.
///
/// Files created after the snapshot are not reported; capture logs pulled
/// out of containers are collected through their own path.
pub fn find_changed(initial: &HashMap<PathBuf, u64>, root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut changed = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().to_string_lossy().contains("control.log") {
            continue;
        }
        if let Some(initial_size) = initial.get(entry.path()) {
            if entry.metadata()?.len() != *initial_size {
                changed.push(entry.into_path());
            }
        }
    }
    Ok(changed)
}

/// Truncates each file to zero length.
pub fn truncate_all(files: &[PathBuf]) -> io::Result<()> {
    for path in files {
        OpenOptions::new().write(true).truncate(true).open(path)?;
    }
    Ok(())
}
