//! Timestamp-granularity estimation.

/// Granularity rungs in milliseconds, finest first.
const LADDER: [u64; 5] = [1, 10, 100, 1000, 2000];

/// Running estimate of the coarsest timestamp granularity the notification
/// source has exhibited.
///
/// The transport may round a file's modification time up by as much as one
/// unit of its resolution relative to a raw stat of the same, unmodified
/// file. Baseline times recorded through [`normalize`](Self::normalize) are
/// offset by the current granularity so that a re-reported baseline file
/// cannot appear strictly older than what the transport later delivers,
/// which would be inferred as a spurious change on first subscription.
///
/// The estimate starts at the finest rung and only ever coarsens. One
/// aggregator keeps one estimator for its whole lifetime; it is never reset
/// between scans.
#[derive(Debug, Clone)]
pub struct ResolutionEstimator {
    granularity_ms: u64,
}

impl Default for ResolutionEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionEstimator {
    /// Start at the finest granularity on the ladder.
    pub fn new() -> Self {
        Self {
            granularity_ms: LADDER[0],
        }
    }

    /// Fold one observed modification time into the estimate.
    ///
    /// The time's exhibited granularity is the first rung that does not
    /// divide it evenly; the estimate widens to that rung when it is
    /// coarser than the current one. A time divisible by every rung reveals
    /// nothing and leaves the estimate unchanged.
    pub fn observe(&mut self, mtime_ms: u64) {
        for rung in LADDER {
            if mtime_ms % rung != 0 {
                if rung > self.granularity_ms {
                    self.granularity_ms = rung;
                }
                return;
            }
        }
    }

    /// Current granularity estimate in milliseconds.
    pub fn granularity_ms(&self) -> u64 {
        self.granularity_ms
    }

    /// Offset a stat-derived time so it compares safely against
    /// transport-reported times for the same edit.
    pub fn normalize(&self, mtime_ms: u64) -> u64 {
        mtime_ms + self.granularity_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_the_finest_rung() {
        assert_eq!(ResolutionEstimator::new().granularity_ms(), 1);
    }

    #[test]
    fn infers_exhibited_granularity_per_rung() {
        let mut estimator = ResolutionEstimator::new();
        estimator.observe(1_234_567);
        assert_eq!(estimator.granularity_ms(), 10);

        let mut estimator = ResolutionEstimator::new();
        estimator.observe(1_234_560);
        assert_eq!(estimator.granularity_ms(), 100);

        let mut estimator = ResolutionEstimator::new();
        estimator.observe(1_234_500);
        assert_eq!(estimator.granularity_ms(), 1000);

        let mut estimator = ResolutionEstimator::new();
        estimator.observe(1_235_000);
        assert_eq!(estimator.granularity_ms(), 2000);
    }

    #[test]
    fn time_divisible_by_every_rung_changes_nothing() {
        let mut estimator = ResolutionEstimator::new();
        estimator.observe(4_000);
        assert_eq!(estimator.granularity_ms(), 1);
    }

    #[test]
    fn never_refines_back_to_a_finer_rung() {
        let mut estimator = ResolutionEstimator::new();
        estimator.observe(1_234_500);
        assert_eq!(estimator.granularity_ms(), 1000);
        estimator.observe(1_234_567);
        assert_eq!(estimator.granularity_ms(), 1000);
    }

    #[test]
    fn normalize_offsets_by_current_granularity() {
        let mut estimator = ResolutionEstimator::new();
        assert_eq!(estimator.normalize(500), 501);
        estimator.observe(1_234_560);
        assert_eq!(estimator.normalize(500), 600);
    }
}
