//! Per-peer sync state
//!
//! Owned exclusively by the engine; every timer handle lives here so that
//! clearing the state cancels all outstanding work for the peer.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use syncmap_core::RecordId;

use crate::config::SyncConfig;

/// Traffic counters for one peer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub records_sent: u64,
    pub records_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Outgoing record-request accumulator for one peer
#[derive(Debug, Default)]
pub(crate) struct PendingBatch {
    /// Needed uuids; BTreeSet so flushes are sorted and deduplicated
    pub uuids: BTreeSet<RecordId>,
    /// Armed iff `uuids` is non-empty and under the flush threshold
    pub timer: Option<JoinHandle<()>>,
}

/// All engine-side state for one connected peer
#[derive(Debug)]
pub(crate) struct PeerState {
    pub traffic: TrafficStats,
    pub last_activity: Instant,
    pub sync_in_progress: bool,
    pub processing_records: bool,
    pub sync_timeout: Option<JoinHandle<()>>,
    pub completion_check: Option<JoinHandle<()>>,
    pub pending_recompute: Option<JoinHandle<()>>,
    /// Arrival times of the most recent record batches
    pub batch_arrival_times: VecDeque<Instant>,
    pub batch: PendingBatch,
    /// Last root hash announced to this peer; guards reverse sync
    pub last_root_sent: Option<String>,
}

impl PeerState {
    pub fn new() -> Self {
        Self {
            traffic: TrafficStats::default(),
            last_activity: Instant::now(),
            sync_in_progress: false,
            processing_records: false,
            sync_timeout: None,
            completion_check: None,
            pending_recompute: None,
            batch_arrival_times: VecDeque::new(),
            batch: PendingBatch::default(),
            last_root_sent: None,
        }
    }

    /// Remember a batch arrival, keeping only the most recent `history`
    pub fn push_batch_arrival(&mut self, at: Instant, history: usize) {
        self.batch_arrival_times.push_back(at);
        while self.batch_arrival_times.len() > history {
            self.batch_arrival_times.pop_front();
        }
    }

    /// Abort every armed timer and clear sync flags and batches.
    /// Traffic counters survive.
    pub fn reset_sync(&mut self) {
        self.sync_in_progress = false;
        self.processing_records = false;
        self.batch_arrival_times.clear();
        self.batch.uuids.clear();
        for handle in [
            self.sync_timeout.take(),
            self.completion_check.take(),
            self.pending_recompute.take(),
            self.batch.timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

impl Drop for PeerState {
    fn drop(&mut self) {
        self.reset_sync();
    }
}

/// Debounce delay for root recomputation: twice the mean interval between
/// the remembered batch arrivals, clamped. Fewer than two samples fall back
/// to the floor.
pub(crate) fn adaptive_delay(times: &VecDeque<Instant>, config: &SyncConfig) -> Duration {
    if times.len() < 2 {
        return config.min_merkle_delay;
    }
    let total: Duration = times
        .iter()
        .zip(times.iter().skip(1))
        .map(|(earlier, later)| later.duration_since(*earlier))
        .sum();
    let avg = total / (times.len() - 1) as u32;
    (avg * 2).clamp(config.min_merkle_delay, config.max_merkle_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(intervals_ms: &[u64]) -> VecDeque<Instant> {
        let mut out = VecDeque::new();
        let mut t = Instant::now();
        out.push_back(t);
        for ms in intervals_ms {
            t += Duration::from_millis(*ms);
            out.push_back(t);
        }
        out
    }

    #[test]
    fn test_adaptive_delay_few_samples() {
        let config = SyncConfig::default();
        assert_eq!(adaptive_delay(&VecDeque::new(), &config), config.min_merkle_delay);
        assert_eq!(adaptive_delay(&times(&[]), &config), config.min_merkle_delay);
    }

    #[test]
    fn test_adaptive_delay_doubles_average() {
        let config = SyncConfig::default();
        // intervals 400ms and 600ms, avg 500ms, doubled 1s
        assert_eq!(
            adaptive_delay(&times(&[400, 600]), &config),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_adaptive_delay_clamps_low() {
        let config = SyncConfig::default();
        // 10ms intervals double to 20ms, clamped up to the floor
        assert_eq!(
            adaptive_delay(&times(&[10, 10, 10]), &config),
            config.min_merkle_delay
        );
    }

    #[test]
    fn test_adaptive_delay_clamps_high() {
        let config = SyncConfig::default();
        // 30s intervals double to 60s, clamped down to the ceiling
        assert_eq!(
            adaptive_delay(&times(&[30_000, 30_000]), &config),
            config.max_merkle_delay
        );
    }

    #[test]
    fn test_batch_arrival_history_truncated() {
        let mut state = PeerState::new();
        let t = Instant::now();
        for i in 0..8 {
            state.push_batch_arrival(t + Duration::from_millis(i), 5);
        }
        assert_eq!(state.batch_arrival_times.len(), 5);
        // oldest entries dropped
        assert_eq!(
            *state.batch_arrival_times.front().unwrap(),
            t + Duration::from_millis(3)
        );
    }

    #[test]
    fn test_reset_sync_clears_flags_keeps_traffic() {
        let mut state = PeerState::new();
        state.sync_in_progress = true;
        state.processing_records = true;
        state.traffic.messages_sent = 7;
        state.batch.uuids.insert("u1".into());
        state.push_batch_arrival(Instant::now(), 5);

        state.reset_sync();

        assert!(!state.sync_in_progress);
        assert!(!state.processing_records);
        assert!(state.batch.uuids.is_empty());
        assert!(state.batch_arrival_times.is_empty());
        assert_eq!(state.traffic.messages_sent, 7);
    }
}
