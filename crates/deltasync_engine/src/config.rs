//! Configuration for the operation repository.

use std::time::Duration;

/// Configuration for an [`OperationRepo`](crate::OperationRepo).
#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Interval between automatic flushes started by `start_polling`.
    pub poll_interval: Duration,
    /// Maximum number of deltas handed to an executor in one call.
    pub max_batch_size: usize,
    /// Replace a queued delta that has the same identifier, property and value.
    pub collapse_duplicates: bool,
    /// Journal record count above which a flush compacts the journal.
    pub compact_threshold: usize,
    /// Sync the journal after every write.
    pub sync_on_write: bool,
}

impl RepoConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_batch_size: 100,
            collapse_duplicates: false,
            compact_threshold: 256,
            sync_on_write: true,
        }
    }

    /// Sets the polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum batch size. Zero is treated as one.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Enables or disables duplicate collapsing.
    pub fn with_collapse_duplicates(mut self, collapse: bool) -> Self {
        self.collapse_duplicates = collapse;
        self
    }

    /// Sets the compaction threshold.
    pub fn with_compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }

    /// Enables or disables syncing after each journal write.
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self::new()
    }
}
