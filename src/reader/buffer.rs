//! Disk buffer: one fixed-size byte ring per reader, written
//! by exactly one reader thread and read by exactly one analyzer thread.
//!
//! Grounded on `memory/buffer_pool/manager.rs`'s atomic cursor pair, adapted
//! from a page table lookup to a flat byte ring with the invariant
//! `start <= end <= scan <= file_size` and `end - start <= capacity`.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct DiskBuffer {
    data: Mutex<Vec<u8>>,
    capacity: usize,
    /// First byte not yet consumed by the analyzer.
    start: AtomicU64,
    /// First byte not yet written by the reader.
    end: AtomicU64,
    /// First byte not yet scanned for a complete redo record; always in
    /// `[start, end]`, tracked separately so the analyzer can resume a
    /// partial scan without re-walking bytes it already parsed.
    scan: AtomicU64,
    has_room: Condvar,
    has_data: Condvar,
}

impl DiskBuffer {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0u8; capacity]),
            capacity,
            start: AtomicU64::new(0),
            end: AtomicU64::new(0),
            scan: AtomicU64::new(0),
            has_room: Condvar::new(),
            has_data: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slot(&self, absolute: u64) -> usize {
        (absolute as usize) % self.capacity
    }

    /// Blocks until at least `len` bytes of room are free, then copies
    /// `bytes` in starting at `end` and advances it. `len` must not exceed
    /// `capacity`.
    pub fn write(&self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.capacity);
        let mut guard = self.data.lock();
        loop {
            let start = self.start.load(Ordering::Acquire);
            let end = self.end.load(Ordering::Acquire);
            let free = self.capacity - (end - start) as usize;
            if free >= bytes.len() {
                break;
            }
            self.has_room.wait(&mut guard);
        }
        let end = self.end.load(Ordering::Acquire);
        for (i, &b) in bytes.iter().enumerate() {
            let idx = self.slot(end + i as u64);
            guard[idx] = b;
        }
        self.end.store(end + bytes.len() as u64, Ordering::Release);
        self.has_data.notify_all();
    }

    /// Copies out the bytes currently available between `scan` and `end`
    /// without consuming them — the analyzer advances `scan` itself via
    /// `advance_scan` once it knows how much of the tail was a complete
    /// record.
    pub fn peek_unscanned(&self) -> Vec<u8> {
        let guard = self.data.lock();
        let scan = self.scan.load(Ordering::Acquire);
        let end = self.end.load(Ordering::Acquire);
        let mut out = Vec::with_capacity((end - scan) as usize);
        for i in scan..end {
            out.push(guard[self.slot(i)]);
        }
        out
    }

    pub fn advance_scan(&self, n: u64) {
        self.scan.fetch_add(n, Ordering::AcqRel);
    }

    /// Frees bytes up to (but not including) the current `scan` position,
    /// signaling any writer blocked on room.
    pub fn consume_scanned(&self) {
        let scan = self.scan.load(Ordering::Acquire);
        self.start.store(scan, Ordering::Release);
        self.has_room.notify_all();
    }

    pub fn unscanned_len(&self) -> u64 {
        self.end.load(Ordering::Acquire) - self.scan.load(Ordering::Acquire)
    }

    pub fn wait_for_data(&self, timeout: std::time::Duration) {
        let mut guard = self.data.lock();
        if self.unscanned_len() == 0 {
            self.has_data.wait_for(&mut guard, timeout);
        }
    }

    /// Resets all three cursors to zero (reader `CHECK` state re-opening a
    /// new log file into the same buffer).
    pub fn reset(&self) {
        self.start.store(0, Ordering::SeqCst);
        self.end.store(0, Ordering::SeqCst);
        self.scan.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_peek_returns_bytes() {
        let buf = DiskBuffer::new(16);
        buf.write(b"hello");
        assert_eq!(buf.peek_unscanned(), b"hello");
    }

    #[test]
    fn advance_and_consume_frees_room() {
        let buf = DiskBuffer::new(8);
        buf.write(b"abcdefgh");
        buf.advance_scan(8);
        buf.consume_scanned();
        buf.write(b"ijkl");
        assert_eq!(buf.peek_unscanned(), b"ijkl");
    }

    #[test]
    fn unscanned_len_tracks_scan_cursor() {
        let buf = DiskBuffer::new(16);
        buf.write(b"0123456789");
        assert_eq!(buf.unscanned_len(), 10);
        buf.advance_scan(4);
        assert_eq!(buf.unscanned_len(), 6);
    }

    #[test]
    fn reset_rewinds_all_cursors() {
        let buf = DiskBuffer::new(16);
        buf.write(b"abcd");
        buf.advance_scan(4);
        buf.consume_scanned();
        buf.reset();
        buf.write(b"z");
        assert_eq!(buf.peek_unscanned(), b"z");
    }
}
