//! Event types flowing through the aggregation engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Normalized event handed from the subscription adapter to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathEvent {
    /// The file exists and reports a modification time.
    Updated {
        /// Absolute path of the updated file.
        path: PathBuf,
        /// Modification time in milliseconds since the epoch.
        mtime_ms: u64,
    },
    /// The file no longer exists.
    Removed {
        /// Absolute path of the removed file.
        path: PathBuf,
    },
}

impl PathEvent {
    /// Absolute path this event refers to.
    pub fn path(&self) -> &Path {
        match self {
            Self::Updated { path, .. } | Self::Removed { path } => path,
        }
    }
}

/// Events published to consumers.
///
/// `Changed` and `Removed` fire once per live update without debounce
/// delay; `Aggregated` fires once per quiet debounce window with the
/// settled, deduplicated result. Any number of independent subscribers may
/// listen to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatcherEvent {
    /// A single live update, delivered undelayed.
    Changed {
        /// Absolute path of the changed file.
        path: PathBuf,
        /// Modification time reported by the transport, in milliseconds.
        mtime_ms: u64,
    },
    /// A single live deletion, delivered undelayed.
    Removed {
        /// Absolute path of the removed file.
        path: PathBuf,
    },
    /// One settled batch per quiet debounce window.
    Aggregated(AggregatedBatch),
}

/// The settled result of one debounce window.
///
/// An empty batch is valid: consumers treat the emission itself as the
/// "activity has quiesced" signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedBatch {
    /// Changed paths, sorted lexicographically.
    pub changes: Vec<PathBuf>,
    /// Removed paths, sorted lexicographically.
    pub removals: Vec<PathBuf>,
    /// Resume cursor as of the last processed notification batch.
    pub cursor: Option<String>,
}

impl AggregatedBatch {
    /// Whether the window settled without any accumulated paths.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.removals.is_empty()
    }
}
