//! Engine configuration

use std::time::Duration;

/// Tuning knobs for the sync engine. Defaults are the protocol constants;
/// tests shrink the timing values.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay before a record-request batch is flushed
    pub batch_delay: Duration,
    /// Flush a batch immediately once it reaches this many uuids
    pub max_batch_size: usize,
    /// How long a built merkle tree may be served from cache
    pub merkle_cache_ttl: Duration,
    /// Floor for the debounced root recomputation delay
    pub min_merkle_delay: Duration,
    /// Ceiling for the debounced root recomputation delay
    pub max_merkle_delay: Duration,
    /// How many batch arrival timestamps feed the adaptive delay
    pub batch_timing_history: usize,
    /// Inactivity window after which a sync is force-cancelled
    pub sync_timeout: Duration,
    /// Delay before verifying a sync has quiesced
    pub completion_check_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_delay: Duration::from_millis(100),
            max_batch_size: 50,
            merkle_cache_ttl: Duration::from_secs(1),
            min_merkle_delay: Duration::from_millis(500),
            max_merkle_delay: Duration::from_secs(5),
            batch_timing_history: 5,
            sync_timeout: Duration::from_secs(120),
            completion_check_delay: Duration::from_secs(2),
        }
    }
}
