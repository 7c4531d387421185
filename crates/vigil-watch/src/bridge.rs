//! Host-integration bridge: partitioned watch reports for a build pipeline.
//!
//! A build host hands over the path sets it tracks (`files`, `dirs`,
//! `missing`) and a start time. The bridge supersedes any prior session,
//! watches until the next settled batch, purges the host's read-through
//! cache for exactly the union of touched paths, and reports those paths
//! partitioned back into the host's own buckets together with the full
//! known-time snapshot.

use crate::aggregator::ChangeAggregator;
use crate::error::{Error, Result};
use crate::events::WatcherEvent;
use crate::transport::Since;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// A host-owned read-through cache keyed by path.
pub trait ReadCache: Send + Sync {
    /// Drop cached entries for exactly these paths.
    fn purge(&self, paths: &[PathBuf]);
}

/// Touched paths partitioned by the host's own classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathBuckets {
    /// Touched paths the host listed as files.
    pub files: Vec<PathBuf>,
    /// Touched paths the host listed as directories.
    pub dirs: Vec<PathBuf>,
    /// Touched paths the host listed as expected-but-missing.
    pub missing: Vec<PathBuf>,
}

/// Partition `paths` by membership in the host's sets; each bucket comes
/// out sorted. A path in none of the sets lands in no bucket.
pub fn partition(
    paths: &[PathBuf],
    files: &HashSet<PathBuf>,
    dirs: &HashSet<PathBuf>,
    missing: &HashSet<PathBuf>,
) -> PathBuckets {
    let select = |set: &HashSet<PathBuf>| {
        let mut bucket: Vec<PathBuf> = paths
            .iter()
            .filter(|path| set.contains(*path))
            .cloned()
            .collect();
        bucket.sort();
        bucket
    };
    PathBuckets {
        files: select(files),
        dirs: select(dirs),
        missing: select(missing),
    }
}

/// What one settled watch round reports back to the host.
#[derive(Debug, Clone)]
pub struct WatchReport {
    /// Touched paths in the host's buckets.
    pub buckets: PathBuckets,
    /// Known modification times as of the settled batch.
    pub times: HashMap<PathBuf, u64>,
    /// Resume cursor carried by the settled batch.
    pub cursor: Option<String>,
}

/// Drives one aggregator on behalf of a build host.
pub struct WatchBridge {
    aggregator: ChangeAggregator,
    cache: Option<Arc<dyn ReadCache>>,
}

impl WatchBridge {
    /// Wrap an aggregator with no cache attached.
    pub fn new(aggregator: ChangeAggregator) -> Self {
        Self {
            aggregator,
            cache: None,
        }
    }

    /// Attach the host's read-through cache.
    pub fn with_cache(mut self, cache: Arc<dyn ReadCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Subscribe to the underlying event stream for undelayed feedback.
    pub fn events(&self) -> broadcast::Receiver<WatcherEvent> {
        self.aggregator.subscribe_events()
    }

    /// Watch `files` ∪ `missing` plus `dirs` for changes since
    /// `start_time_ms` and block until the first settled batch.
    ///
    /// Calling again supersedes the previous session entirely; the last
    /// watch wins. The union of touched paths is purged from the attached
    /// cache before the report is assembled.
    pub async fn watch(
        &self,
        files: Vec<PathBuf>,
        dirs: Vec<PathBuf>,
        missing: Vec<PathBuf>,
        start_time_ms: u64,
    ) -> Result<WatchReport> {
        // Supersede whatever session is still running.
        self.aggregator.close().await?;

        let file_set: HashSet<PathBuf> = files.iter().cloned().collect();
        let dir_set: HashSet<PathBuf> = dirs.iter().cloned().collect();
        let missing_set: HashSet<PathBuf> = missing.iter().cloned().collect();

        let mut events = self.aggregator.subscribe_events();

        let mut watched_files = files;
        watched_files.extend(missing);
        self.aggregator
            .watch(watched_files, dirs, Since::Timestamp(start_time_ms))
            .await?;

        let batch = loop {
            match events.recv().await {
                Ok(WatcherEvent::Aggregated(batch)) => break batch,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event stream lagged while waiting for a settled batch");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::Channel(
                        "event stream closed before the watch settled".to_string(),
                    ));
                }
            }
        };

        let union: Vec<PathBuf> = batch
            .changes
            .iter()
            .chain(batch.removals.iter())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Some(cache) = &self.cache {
            cache.purge(&union);
        }

        Ok(WatchReport {
            buckets: partition(&union, &file_set, &dir_set, &missing_set),
            times: self.aggregator.snapshot().await,
            cursor: batch.cursor,
        })
    }

    /// Stop reacting to events without tearing the session down.
    pub async fn pause(&self) {
        self.aggregator.pause().await;
    }

    /// Tear the session down and release the transport.
    pub async fn close(&self) -> Result<()> {
        self.aggregator.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn set(names: &[&str]) -> HashSet<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn partition_buckets_by_membership_sorted() {
        let touched = paths(&["/p/z.md", "/p/a.md", "/p/dir", "/p/not-yet"]);
        let buckets = partition(
            &touched,
            &set(&["/p/a.md", "/p/z.md"]),
            &set(&["/p/dir"]),
            &set(&["/p/not-yet"]),
        );
        assert_eq!(buckets.files, paths(&["/p/a.md", "/p/z.md"]));
        assert_eq!(buckets.dirs, paths(&["/p/dir"]));
        assert_eq!(buckets.missing, paths(&["/p/not-yet"]));
    }

    #[test]
    fn partition_drops_paths_in_no_set() {
        let touched = paths(&["/p/stray.md"]);
        let buckets = partition(&touched, &set(&[]), &set(&[]), &set(&[]));
        assert_eq!(buckets, PathBuckets::default());
    }
}
