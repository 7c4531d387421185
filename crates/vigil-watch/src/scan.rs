//! Baseline scan: seed modification times for the watched paths.

use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::time::UNIX_EPOCH;
use tracing::debug;

/// Stat every path with bounded fan-out and collect raw modification times
/// in milliseconds.
///
/// A failed stat is the expected outcome for a watched file that does not
/// exist yet; the path is skipped, never retried, and the scan as a whole
/// cannot fail.
pub(crate) async fn baseline_scan(paths: &[PathBuf], concurrency: usize) -> Vec<(PathBuf, u64)> {
    debug!(paths = paths.len(), "starting baseline scan");
    let times: Vec<(PathBuf, u64)> = stream::iter(paths.to_vec())
        .map(|path| async move {
            match tokio::fs::metadata(&path).await {
                Ok(metadata) => mtime_millis(&metadata).map(|mtime_ms| (path, mtime_ms)),
                Err(err) => {
                    debug!(path = %path.display(), %err, "stat failed during baseline scan, skipping");
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|entry| async move { entry })
        .collect()
        .await;
    debug!(recorded = times.len(), "baseline scan finished");
    times
}

fn mtime_millis(metadata: &std::fs::Metadata) -> Option<u64> {
    let modified = metadata.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as u64)
}
