//! Checkpoint candidate policy: every `checkpointIntervalS`
//! seconds and every `checkpointIntervalMB` of redo consumed, record a
//! candidate; the writer promotes it to durable once confirmed.

use crate::scn::Scn;

#[derive(Debug, Clone, Copy)]
pub struct CheckpointCandidate {
    pub scn: Scn,
    pub time_s: u64,
    pub sequence: u32,
    pub offset: u64,
}

pub struct CheckpointPolicy {
    interval_s: u64,
    interval_mb: u64,
    last_time_s: u64,
    bytes_since_last: u64,
}

impl CheckpointPolicy {
    pub fn new(interval_s: u64, interval_mb: u64) -> Self {
        Self {
            interval_s,
            interval_mb,
            last_time_s: 0,
            bytes_since_last: 0,
        }
    }

    /// Call once per consumed redo chunk; returns a new candidate once
    /// either threshold trips, resetting both counters.
    pub fn maybe_candidate(&mut self, now_s: u64, bytes_consumed: u64, scn: Scn, sequence: u32, offset: u64) -> Option<CheckpointCandidate> {
        self.bytes_since_last += bytes_consumed;
        let time_due = self.interval_s > 0 && now_s.saturating_sub(self.last_time_s) >= self.interval_s;
        let bytes_due = self.interval_mb > 0 && self.bytes_since_last >= self.interval_mb * 1024 * 1024;
        if !time_due && !bytes_due {
            return None;
        }
        self.last_time_s = now_s;
        self.bytes_since_last = 0;
        Some(CheckpointCandidate { scn, time_s: now_s, sequence, offset })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_on_time_interval() {
        let mut policy = CheckpointPolicy::new(10, 0);
        assert!(policy.maybe_candidate(5, 0, Scn(1), 1, 0).is_none());
        assert!(policy.maybe_candidate(15, 0, Scn(2), 1, 0).is_some());
    }

    #[test]
    fn fires_on_byte_interval() {
        let mut policy = CheckpointPolicy::new(0, 1);
        assert!(policy.maybe_candidate(0, 500_000, Scn(1), 1, 0).is_none());
        assert!(policy.maybe_candidate(0, 600_000, Scn(2), 1, 0).is_some());
    }

    #[test]
    fn resets_after_firing() {
        let mut policy = CheckpointPolicy::new(0, 1);
        assert!(policy.maybe_candidate(0, 1024 * 1024, Scn(1), 1, 0).is_some());
        assert!(policy.maybe_candidate(0, 10, Scn(2), 1, 0).is_none());
    }
}
