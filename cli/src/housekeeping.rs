//! Working-directory layout and retention.
//!
//! A run leaves three artifacts behind: the durable invite store under
//! `db/`, a timestamped copy of the processed membership file under `prev/`,
//! and the run log under `log/`. The backup and log directories are pruned
//! to a fixed number of newest entries after each successful run.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

pub const KEEP_NEWEST: usize = 25;

const BACKUP_DIR: &str = "prev";
const LOG_DIR: &str = "log";

/// Create the working-directory skeleton if missing.
pub fn init(work_dir: &Path) -> Result<()> {
    for dir in [BACKUP_DIR, LOG_DIR] {
        let path = work_dir.join(dir);
        if !path.exists() {
            fs::create_dir_all(&path)
                .with_context(|| format!("creating {}", path.display()))?;
        }
    }
    Ok(())
}

fn timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Path for this run's log file under `log/`.
pub fn run_log_path(work_dir: &Path) -> PathBuf {
    work_dir
        .join(LOG_DIR)
        .join(format!("usersync-run-{}.log", timestamp()))
}

/// Copy the processed membership file into `prev/` with a timestamped name.
pub fn backup_membership_file(work_dir: &Path, source: &Path) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("membership");
    let target = work_dir
        .join(BACKUP_DIR)
        .join(format!("{stem}-{}.json", timestamp()));
    fs::copy(source, &target)
        .with_context(|| format!("backing up {} to {}", source.display(), target.display()))?;
    debug!(backup = %target.display(), "membership file backed up");
    Ok(target)
}

/// Prune `prev/` and `log/` down to the newest [`KEEP_NEWEST`] files each.
pub fn prune(work_dir: &Path) -> Result<()> {
    for dir in [BACKUP_DIR, LOG_DIR] {
        let removed = prune_dir(&work_dir.join(dir), KEEP_NEWEST)?;
        if removed > 0 {
            debug!(dir, removed, "pruned old files");
        }
    }
    Ok(())
}

fn prune_dir(dir: &Path, keep: usize) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            files.push((metadata.modified()?, entry.path()));
        }
    }
    if files.len() <= keep {
        return Ok(0);
    }
    // Age is judged by modification time, not filename; backups carry the
    // membership file's stem, so names need not sort chronologically.
    files.sort_by_key(|(modified, _)| *modified);
    let excess = files.len() - keep;
    for (_, path) in files.into_iter().take(excess) {
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
    }
    Ok(excess)
}
