//! Snapshot & rollback: restorable captures of the project tree taken
//! before each repair attempt.
//!
//! A capture is a full copy of the configured source tree under the
//! snapshot store, plus a metadata row. Capture failure is a warning,
//! not an error; the repair proceeds without rollback protection.
//! Restore failure is the severe case and is reported to the caller,
//! which escalates the component to Critical.

use std::path::{Path, PathBuf};

use crate::config::RepairConfig;
use crate::db::models::SnapshotRecord;
use crate::db::repos::{rollbacks, snapshots};
use crate::db::DbPool;
use crate::error::AppError;

/// Directories never captured: VCS state, build output, caches, and the
/// snapshot store itself when it lives inside the source tree.
const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", "__pycache__", ".venv", "snapshots"];

/// Result of a restore attempt.
#[derive(Debug, Clone)]
pub struct RollbackReport {
    pub success: bool,
    pub error_message: Option<String>,
}

pub struct SnapshotManager {
    pool: DbPool,
    source: PathBuf,
    store: PathBuf,
    max_snapshots: usize,
}

impl SnapshotManager {
    pub fn new(pool: DbPool, config: &RepairConfig) -> Self {
        Self {
            pool,
            source: config.snapshot_source.clone(),
            store: config.data_dir.join("snapshots"),
            max_snapshots: config.max_snapshots,
        }
    }

    /// Capture the source tree. Returns `None` (with a warning) when the
    /// capture fails; the orchestrator proceeds without protection.
    pub fn create_snapshot(&self, reason: &str) -> Option<SnapshotRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let dest = self.store.join(&id);

        let captured = (|| -> Result<u64, AppError> {
            std::fs::create_dir_all(&dest)?;
            copy_tree(&self.source, &dest)
        })();

        let files = match captured {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    source = %self.source.display(),
                    "Snapshot capture failed — repair proceeds without rollback protection",
                );
                let _ = std::fs::remove_dir_all(&dest);
                return None;
            }
        };

        let record = match snapshots::insert(&self.pool, &id, reason, &dest.to_string_lossy()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot metadata write failed — discarding capture");
                let _ = std::fs::remove_dir_all(&dest);
                return None;
            }
        };

        tracing::info!(snapshot_id = %id, files, "Snapshot captured");

        if let Err(e) = self.prune() {
            tracing::warn!(error = %e, "Snapshot retention pruning failed");
        }

        Some(record)
    }

    /// Restore a snapshot over the source tree and log the rollback
    /// event. A successful restore consumes the snapshot.
    pub fn rollback_to(&self, component: &str, snapshot_id: &str, reason: &str) -> RollbackReport {
        let restored = (|| -> Result<u64, AppError> {
            let record = snapshots::get_by_id(&self.pool, snapshot_id)?;
            let src = PathBuf::from(&record.path);
            if !src.is_dir() {
                return Err(AppError::NotFound(format!(
                    "snapshot directory {} is missing",
                    src.display()
                )));
            }
            copy_tree(&src, &self.source)
        })();

        match restored {
            Ok(files) => {
                tracing::warn!(component, snapshot_id, files, reason, "Rolled back to snapshot");
                if let Err(e) =
                    rollbacks::append(&self.pool, component, snapshot_id, reason, true, None)
                {
                    tracing::error!(error = %e, "Rollback succeeded but logging it failed");
                }
                // Consume: the restored tree is now live state
                self.remove_snapshot(snapshot_id);
                RollbackReport {
                    success: true,
                    error_message: None,
                }
            }
            Err(e) => {
                let msg = e.to_string();
                tracing::error!(component, snapshot_id, error = %msg, "Rollback failed");
                if let Err(log_err) =
                    rollbacks::append(&self.pool, component, snapshot_id, reason, false, Some(&msg))
                {
                    tracing::error!(error = %log_err, "Failed to log failed rollback");
                }
                RollbackReport {
                    success: false,
                    error_message: Some(msg),
                }
            }
        }
    }

    /// Prune oldest-first beyond `max_snapshots`, whether or not the
    /// snapshots were ever consumed.
    fn prune(&self) -> Result<(), AppError> {
        let all = snapshots::all_oldest_first(&self.pool)?;
        if all.len() <= self.max_snapshots {
            return Ok(());
        }
        let excess = all.len() - self.max_snapshots;
        for record in all.into_iter().take(excess) {
            tracing::debug!(snapshot_id = %record.id, "Pruning snapshot");
            self.remove_snapshot(&record.id);
        }
        Ok(())
    }

    fn remove_snapshot(&self, id: &str) {
        if let Ok(record) = snapshots::get_by_id(&self.pool, id) {
            let _ = std::fs::remove_dir_all(&record.path);
        }
        if let Err(e) = snapshots::delete(&self.pool, id) {
            tracing::warn!(snapshot_id = %id, error = %e, "Failed to delete snapshot row");
        }
    }
}

/// Recursively copy `src` into `dst`, skipping [`SKIP_DIRS`]. Returns
/// the number of files copied. Restore is copy-over: captured files
/// overwrite live ones, files created after the capture are left alone.
fn copy_tree(src: &Path, dst: &Path) -> Result<u64, AppError> {
    let mut copied = 0u64;
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let file_type = entry.file_type()?;
        let target = dst.join(&name);

        if file_type.is_dir() {
            if SKIP_DIRS.iter().any(|skip| name == *skip) {
                continue;
            }
            copied += copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
        // Symlinks are skipped: a captured link into the live tree would
        // alias state across the snapshot boundary.
    }

    Ok(copied)
}
