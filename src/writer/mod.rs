//! Writer: shared contract across file/Kafka/ZeroMQ/network
//! sink variants — bootstrap from checkpoint, stream, queue, confirm,
//! checkpoint.
//!
//! Grounded on `transaction/wal.rs`'s confirm-then-truncate log discipline
//! and `replication/core`'s worker-loop shape.

pub mod checkpoint;
pub mod protocol;
pub mod sinks;

pub use checkpoint::CheckpointFile;
pub use sinks::Sink;

use crate::error::{CdcError, Result};
use crate::output::{Message, OutputBuffer};
use crate::scn::Scn;
use parking_lot::Mutex;
use std::collections::{BinaryHeap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// `(scn, id)` ascending so the smallest SCN (ties broken by the strictly
/// increasing message id) is always the heap's minimum.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct InFlightKey(std::cmp::Reverse<(u64, u64)>);

fn in_flight_key(scn: Scn, id: u64) -> InFlightKey {
    InFlightKey(std::cmp::Reverse((scn.0, id)))
}

pub struct Writer<S: Sink> {
    database: String,
    sink: S,
    output: Arc<OutputBuffer>,
    queue_size: usize,
    checkpoint_path: PathBuf,
    checkpoint_interval: Duration,
    last_sent_id: AtomicU64,
    in_flight: Mutex<BinaryHeap<InFlightKey>>,
    confirmed_ids: Mutex<HashSet<u64>>,
    confirmed_scn: AtomicU64,
    checkpoint_scn: AtomicU64,
    last_checkpoint_at: Mutex<Instant>,
    shutdown: std::sync::atomic::AtomicBool,
}

impl<S: Sink> Writer<S> {
    pub fn new(database: impl Into<String>, sink: S, output: Arc<OutputBuffer>, queue_size: usize, checkpoint_path: PathBuf, checkpoint_interval: Duration) -> Self {
        Self {
            database: database.into(),
            sink,
            output,
            queue_size,
            checkpoint_path,
            checkpoint_interval,
            last_sent_id: AtomicU64::new(0),
            in_flight: Mutex::new(BinaryHeap::new()),
            confirmed_ids: Mutex::new(HashSet::new()),
            confirmed_scn: AtomicU64::new(Scn::ZERO.0),
            checkpoint_scn: AtomicU64::new(Scn::ZERO.0),
            last_checkpoint_at: Mutex::new(Instant::now()),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Bootstrap: load the checkpoint file if present and
    /// overwrite the configured start position; otherwise use the configured
    /// start unchanged. `current_incarnation` is the analyzer's own
    /// `(resetlogs, activation)` as read from the currently open redo
    /// header — validating the checkpoint against it closes the open
    /// question from ("the source's readCheckpoint ... does not
    /// verify resetlogs/activation against the analyzer's; mismatch across
    /// a RESETLOGS event will silently continue. Flag this and fail fast in
    /// a rewrite").
    pub fn bootstrap(&self, configured_start: Scn, current_incarnation: (u32, u32)) -> Result<Scn> {
        let Some(file) = checkpoint::load(&self.checkpoint_path)? else {
            return Ok(configured_start);
        };
        if (file.resetlogs, file.activation) != current_incarnation {
            return Err(CdcError::Configuration(format!(
                "checkpoint incarnation ({}, {}) does not match current redo incarnation ({}, {}); refusing to start across an unacknowledged RESETLOGS",
                file.resetlogs, file.activation, current_incarnation.0, current_incarnation.1
            )));
        }
        self.checkpoint_scn.store(file.scn.0, Ordering::SeqCst);
        self.confirmed_scn.store(file.scn.0, Ordering::SeqCst);
        info!(scn = %file.scn, "resuming from checkpoint");
        Ok(file.scn)
    }

    /// One streaming iteration: pulls up to
    /// `queue_size - in_flight.len()` new messages and hands them to the
    /// sink.
    pub fn stream_tick(&self) -> Result<usize> {
        let capacity = {
            let in_flight = self.in_flight.lock();
            self.queue_size.saturating_sub(in_flight.len())
        };
        if capacity == 0 {
            return Ok(0);
        }
        let last_id = self.last_sent_id.load(Ordering::SeqCst);
        let pending = self.output.peek_after(last_id, capacity);
        let mut sent = 0;
        for msg in &pending {
            self.send_with_retry(msg)?;
            self.in_flight.lock().push(in_flight_key(msg.header.scn, msg.header.id));
            self.last_sent_id.store(msg.header.id, Ordering::SeqCst);
            sent += 1;
        }
        Ok(sent)
    }

    /// `sendMessage` may retry indefinitely on a transient sink error; a
    /// persistent error is surfaced to the caller, which escalates by
    /// shutting down the main thread.
    fn send_with_retry(&self, msg: &Message) -> Result<()> {
        loop {
            match self.sink.send_message(msg) {
                Ok(()) => return Ok(()),
                Err(CdcError::Network(reason)) => {
                    warn!(reason, "sink disconnected, returning to listening state");
                    return Err(CdcError::Network(reason));
                }
                Err(CdcError::Transient(reason)) => {
                    warn!(reason, "transient sink error, retrying");
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// Confirmation handling: clears a message's
    /// CONFIRMED bit, then pops the min-heap while its head is confirmed,
    /// advancing `confirmedScn`.
    pub fn confirm(&self, message_id: u64) {
        self.confirmed_ids.lock().insert(message_id);
        let mut in_flight = self.in_flight.lock();
        let mut confirmed = self.confirmed_ids.lock();
        let mut last_confirmed_scn = None;
        while let Some(InFlightKey(std::cmp::Reverse((scn, id)))) = in_flight.peek().map(|k| InFlightKey(k.0)) {
            if !confirmed.contains(&id) {
                break;
            }
            in_flight.pop();
            confirmed.remove(&id);
            last_confirmed_scn = Some(scn);
        }
        if let Some(scn) = last_confirmed_scn {
            self.confirmed_scn.store(scn, Ordering::SeqCst);
            self.output.drain_confirmed(self.last_drained_id());
        }
    }

    fn last_drained_id(&self) -> u64 {
        // The highest id known to be confirmed is exactly `last_sent_id`
        // once the in-flight heap has drained past it; using the current
        // high-water mark is safe because `drain_confirmed` is itself
        // bounded by message id, never by SCN.
        self.last_sent_id.load(Ordering::SeqCst)
    }

    pub fn confirmed_scn(&self) -> Scn {
        Scn(self.confirmed_scn.load(Ordering::SeqCst))
    }

    /// Highest message id handed to the sink so far, for a caller that
    /// self-acknowledges sends in place of a real network confirmation
    /// channel (see `FileSink`/`NetworkSink`/`KafkaSink`/`ZeroMqSink`, none
    /// of which loop a confirmation back on their own).
    pub fn last_sent_id(&self) -> u64 {
        self.last_sent_id.load(Ordering::SeqCst)
    }

    /// Checkpointing: write `<database>-chkpt.json`
    /// atomically when `confirmedScn` has moved and the interval elapsed.
    pub fn maybe_checkpoint(&self, resetlogs: u32, activation: u32) -> Result<bool> {
        let confirmed = self.confirmed_scn();
        let checkpointed = Scn(self.checkpoint_scn.load(Ordering::SeqCst));
        if confirmed == checkpointed {
            return Ok(false);
        }
        let mut last = self.last_checkpoint_at.lock();
        if last.elapsed() < self.checkpoint_interval {
            return Ok(false);
        }
        checkpoint::write(
            &self.checkpoint_path,
            &CheckpointFile {
                database: self.database.clone(),
                scn: confirmed,
                resetlogs,
                activation,
            },
        )?;
        self.checkpoint_scn.store(confirmed.0, Ordering::SeqCst);
        *last = Instant::now();
        Ok(true)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// On reconnect, re-send any in-flight (unconfirmed) message message is re-sent").
    pub fn resend_in_flight(&self) -> Result<()> {
        let ids: Vec<u64> = {
            let in_flight = self.in_flight.lock();
            in_flight.iter().map(|InFlightKey(std::cmp::Reverse((_, id)))| *id).collect()
        };
        for id in ids {
            if let Some(msg) = self.output.peek_after(id.saturating_sub(1), 1).into_iter().find(|m| m.header.id == id) {
                self.send_with_retry(&msg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ChunkPool;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        sent: StdMutex<Vec<u64>>,
    }

    impl Sink for RecordingSink {
        fn send_message(&self, msg: &Message) -> Result<()> {
            self.sent.lock().unwrap().push(msg.header.id);
            Ok(())
        }
    }

    fn output() -> Arc<OutputBuffer> {
        let pool = ChunkPool::new(4096, 0, 8, 0);
        OutputBuffer::new(pool, 1024)
    }

    #[test]
    fn stream_and_confirm_advances_scn() {
        let output = output();
        output.begin(1, Scn(100), 0);
        output.append(b"row-1");
        let header = output.commit(true, 0, 0).unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let writer = Writer::new(
            "DB",
            RecordingSink { sent: StdMutex::new(Vec::new()) },
            output,
            4,
            tmp.path().join("DB-chkpt.json"),
            Duration::from_secs(0),
        );
        assert_eq!(writer.stream_tick().unwrap(), 1);
        writer.confirm(header.id);
        assert_eq!(writer.confirmed_scn(), Scn(100));
    }

    #[test]
    fn bootstrap_without_checkpoint_keeps_configured_start() {
        let output = output();
        let tmp = tempfile::tempdir().unwrap();
        let writer = Writer::new(
            "DB",
            RecordingSink { sent: StdMutex::new(Vec::new()) },
            output,
            4,
            tmp.path().join("DB-chkpt.json"),
            Duration::from_secs(0),
        );
        let start = writer.bootstrap(Scn(500), (1, 1)).unwrap();
        assert_eq!(start, Scn(500));
    }

    #[test]
    fn bootstrap_rejects_incarnation_mismatch() {
        let output = output();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("DB-chkpt.json");
        checkpoint::write(
            &path,
            &CheckpointFile {
                database: "DB".into(),
                scn: Scn(900),
                resetlogs: 1,
                activation: 1,
            },
        )
        .unwrap();
        let writer = Writer::new("DB", RecordingSink { sent: StdMutex::new(Vec::new()) }, output, 4, path, Duration::from_secs(0));
        let err = writer.bootstrap(Scn(0), (1, 2)).unwrap_err();
        assert!(matches!(err, CdcError::Configuration(_)));
    }
}
