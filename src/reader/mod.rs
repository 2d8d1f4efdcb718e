//! Reader: one state machine per redo-log group, each producing
//! into its own lock-free single-producer/single-consumer disk buffer.
//!
//! Grounded on `replication/core`'s poll-loop/condvar pattern for the state
//! machine and `storage/checksum.rs` for the header CRC check.

mod buffer;
mod header;

pub use buffer::DiskBuffer;
pub use header::{BlockCheck, RedoHeader, MAGIC_LE, MAGIC_BE};

use crate::error::{CdcError, Result};
use crate::scn::Scn;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Sleeping,
    Check,
    Update,
    Read,
}

/// Which group a reader serves; group 0 is the synthetic archive group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupId(pub u32);

pub const ARCHIVE_GROUP: GroupId = GroupId(0);

struct Shared {
    state: Mutex<ReaderState>,
    cv: Condvar,
    shutdown: AtomicBool,
    consecutive_bad_crc: AtomicU32,
}

/// Per-redo-log-group reader. `open_group` encodes the `arch`-vs-`online`
/// `keepConnection` asymmetry the dictionary source leaves unresolved for
/// batch mode: an online group always keeps its file descriptor open across
/// successive reads (the log may still be written to), while an archive
/// group always closes and reopens because the file is immutable and
/// descriptors are cheaper to re-acquire than to hold across long idle
/// stretches between archived logs landing.
pub struct Reader {
    pub group: GroupId,
    pub is_online: bool,
    shared: Arc<Shared>,
    buffer: Arc<DiskBuffer>,
    bad_crc_max: u32,
    redo_verify_delay: Duration,
}

impl Reader {
    pub fn new(group: GroupId, is_online: bool, disk_buffer_size: usize, bad_crc_max: u32, redo_verify_delay: Duration) -> Self {
        Self {
            group,
            is_online,
            shared: Arc::new(Shared {
                state: Mutex::new(ReaderState::Sleeping),
                cv: Condvar::new(),
                shutdown: AtomicBool::new(false),
                consecutive_bad_crc: AtomicU32::new(0),
            }),
            buffer: DiskBuffer::new(disk_buffer_size),
            bad_crc_max,
            redo_verify_delay,
        }
    }

    pub fn state(&self) -> ReaderState {
        *self.shared.state.lock()
    }

    pub fn buffer(&self) -> &Arc<DiskBuffer> {
        &self.buffer
    }

    pub fn request_shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cv.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    fn set_state(&self, s: ReaderState) {
        *self.shared.state.lock() = s;
        self.shared.cv.notify_all();
    }

    /// Returns whether this group keeps its descriptor open between reads —
    /// the open-question resolved for `arch=online-keep` mode (see
    /// `open_group`'s doc comment).
    pub fn keeps_connection_open(&self) -> bool {
        self.is_online
    }

    /// Opens the mapped path for this group.
    /// `opener` performs the actual filesystem/ASM open and returns a file
    /// size in bytes, keeping this module free of I/O backend specifics.
    pub fn open_group<F: FnOnce() -> Result<u64>>(&self, opener: F) -> Result<u64> {
        self.set_state(ReaderState::Check);
        let size = opener()?;
        self.set_state(ReaderState::Update);
        Ok(size)
    }

    /// Validates a freshly-read header block and transitions to `READ` on
    /// success.
    pub fn validate_header(&self, block: &[u8]) -> Result<RedoHeader> {
        let header = header::parse(block)?;
        self.set_state(ReaderState::Read);
        Ok(header)
    }

    /// Classifies one block's check result and applies the failure-policy
    /// table.
    pub fn handle_block_check(&self, check: BlockCheck) -> Result<()> {
        match check {
            BlockCheck::Ok | BlockCheck::Empty if self.is_online => {
                if matches!(check, BlockCheck::Empty) {
                    self.shared.consecutive_bad_crc.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.shared.consecutive_bad_crc.store(0, Ordering::Relaxed);
                }
                Ok(())
            }
            BlockCheck::Ok => Ok(()),
            BlockCheck::Empty => Err(CdcError::RedoFormat("empty block in archived log".into())),
            BlockCheck::BadCrc => {
                if !self.is_online {
                    return Err(CdcError::RedoFormat("bad CRC in archived log".into()));
                }
                let count = self.shared.consecutive_bad_crc.fetch_add(1, Ordering::Relaxed) + 1;
                if count > self.bad_crc_max {
                    Err(CdcError::RedoFormat(format!(
                        "{count} consecutive CRC failures exceeds redo-bad-cdc-max-cnt"
                    )))
                } else {
                    Err(CdcError::Transient("bad CRC, not yet durable".into()))
                }
            }
            BlockCheck::Overwritten => Err(CdcError::RedoFormat(
                "log overwritten during switch, must restart from archived logs".into(),
            )),
            BlockCheck::Error => Err(CdcError::RedoFormat("bad magic or block number".into())),
            BlockCheck::Finished => {
                self.set_state(ReaderState::Sleeping);
                Ok(())
            }
        }
    }

    /// `readSize` doubling rule: doubles up to `DISK_BUFFER_SIZE / 8`.
    pub fn next_read_size(&self, last_read: usize) -> usize {
        let cap = self.buffer.capacity() / 8;
        (last_read.max(1) * 2).min(cap.max(1))
    }

    pub fn verify_delay(&self) -> Duration {
        self.redo_verify_delay
    }

    pub fn checkpoint_scn_hint(&self, header: &RedoHeader) -> Scn {
        header.first_scn
    }

    /// Classifies one data block against the file header and expected
    /// sequence — the raw-byte counterpart to `handle_block_check`, kept on
    /// `Reader` since `header::check_block` itself is private to this
    /// module.
    pub fn check_block(&self, block: &[u8], expected_seq: u32, block_offset: u64, file_size: u64, header: &RedoHeader) -> BlockCheck {
        header::check_block(block, expected_seq, block_offset, file_size, header.num_blocks, header.block_size)
    }
}
