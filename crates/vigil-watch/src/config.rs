//! Watch-session configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default quiet period before accumulated changes are flushed.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Default bound on concurrently in-flight baseline stat operations.
pub const DEFAULT_SCAN_CONCURRENCY: usize = 500;

/// Immutable configuration for one aggregator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfiguration {
    /// Project root all watched paths live under. Required, non-empty.
    pub root_path: PathBuf,

    /// Inactivity window after which the pending batch is emitted.
    pub debounce: Duration,

    /// Maximum number of baseline stat operations in flight at once.
    pub scan_concurrency: usize,
}

impl WatchConfiguration {
    /// Create a configuration with the default debounce and scan bounds.
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            debounce: DEFAULT_DEBOUNCE,
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
        }
    }

    /// Set the debounce interval.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the baseline scan fan-out bound.
    pub fn with_scan_concurrency(mut self, scan_concurrency: usize) -> Self {
        self.scan_concurrency = scan_concurrency;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.root_path.as_os_str().is_empty() {
            return Err(Error::Config("root path is missing".to_string()));
        }
        if self.scan_concurrency == 0 {
            return Err(Error::Config(
                "scan concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
