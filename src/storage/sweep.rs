use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::{stored_at, BlobStore};
use crate::{db, error::AppResult};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
    /// Files left alone: not storage names, or stored after the cutoff.
    pub skipped: usize,
}

/// Deletes every blob stored at or before `cutoff` that no `return_images`
/// row references. Deleting a return never touches its files; this is the
/// only place they go away.
///
/// A submission writes its blobs before its row commits, so `cutoff` must
/// trail the clock by more than a submission can take. Files whose names
/// were not generated by the store are never touched.
pub async fn sweep_orphans(
    pool: &SqlitePool,
    blobs: &BlobStore,
    cutoff: NaiveDateTime,
) -> AppResult<SweepReport> {
    let names = blobs.list().await?;
    let referenced = db::fetch_referenced_images(pool).await?;

    let mut report = SweepReport {
        scanned: names.len(),
        ..Default::default()
    };

    for name in names.into_iter().filter(|n| !referenced.contains(n)) {
        match stored_at(&name) {
            Some(at) if at <= cutoff => {}
            Some(_) => {
                debug!(name = %name, "Keeping recent unreferenced blob");
                report.skipped += 1;
                continue;
            }
            None => {
                debug!(name = %name, "Ignoring file that is not a stored blob");
                report.skipped += 1;
                continue;
            }
        }

        match blobs.remove(&name).await {
            Ok(()) => report.removed.push(name),
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to remove orphaned blob");
                report.failed.push(name);
            }
        }
    }

    info!(
        scanned = report.scanned,
        removed = report.removed.len(),
        failed = report.failed.len(),
        skipped = report.skipped,
        cutoff = %cutoff,
        "Blob sweep complete"
    );

    Ok(report)
}
