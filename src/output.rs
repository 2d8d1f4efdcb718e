//! Output buffer: single analyzer-writer, single writer-thread-reader
//! ring of fixed-size pages drawn from the chunk pool.
//!
//! Grounded on `memory/buffer_pool/writer.rs`'s page-rotation/id-sequencing
//! style, adapted from an LRU writeback queue to a confirm-then-free ring.

use crate::memory::{Chunk, ChunkPool};
use crate::scn::Scn;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Header copied alongside a message's payload bytes.
#[derive(Debug, Clone, Copy)]
pub struct MessageHeader {
    pub id: u64,
    pub queue_id: u32,
    pub length: u32,
    pub scn: Scn,
    pub sequence: u32,
    pub obj: u32,
    pub pos: u32,
    pub allocated: bool,
}

/// A fully-formed message: header plus payload, the payload living either
/// inside the page (`allocated = false`) or in its own heap buffer when it
/// didn't fit the page at `begin()` time.
#[derive(Clone)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Vec<u8>,
}

struct Page {
    id: u64,
    mem: Chunk,
    messages: Vec<Message>,
    cursor: usize,
}

impl Page {
    fn new(id: u64, mem: Chunk) -> Self {
        Self {
            id,
            mem,
            messages: Vec::new(),
            cursor: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.mem.data.len().saturating_sub(self.cursor)
    }
}

struct Inner {
    pages: VecDeque<Page>,
    next_page_id: u64,
    in_progress: Option<(Vec<u8>, u32, Scn, u32)>, // (buf, obj, scn, pos)
}

/// Output buffer shared between the analyzer (writer of messages) and one
/// or more per-target writer threads (readers).
pub struct OutputBuffer {
    pool: Arc<ChunkPool>,
    inner: Mutex<Inner>,
    unconfirmed_length: AtomicUsize,
    next_message_id: AtomicU64,
    flush_buffer: usize,
    has_data: Condvar,
}

impl OutputBuffer {
    pub fn new(pool: Arc<ChunkPool>, flush_buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            pool,
            inner: Mutex::new(Inner {
                pages: VecDeque::new(),
                next_page_id: 0,
                in_progress: None,
            }),
            unconfirmed_length: AtomicUsize::new(0),
            next_message_id: AtomicU64::new(1),
            flush_buffer,
            has_data: Condvar::new(),
        })
    }

    /// Reserves a message header for `obj`; the payload is assembled via
    /// the `append` calls that follow.
    pub fn begin(&self, obj: u32, scn: Scn, pos: u32) {
        let mut inner = self.inner.lock();
        if inner.pages.is_empty() {
            self.rotate_locked(&mut inner);
        }
        inner.in_progress = Some((Vec::new(), obj, scn, pos));
    }

    pub fn append(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        if let Some((buf, ..)) = inner.in_progress.as_mut() {
            buf.extend_from_slice(bytes);
        }
    }

    /// Finalizes the in-progress message, copying it into the current page
    /// if it fits or heap-allocating it (`ALLOCATED`) otherwise, and bumps
    /// `unconfirmedLength`. Signals the writer condvar when `force` or the
    /// flush threshold is crossed.
    pub fn commit(&self, force: bool, queue_id: u32, sequence: u32) -> Option<MessageHeader> {
        let mut inner = self.inner.lock();
        let Some((payload, obj, scn, pos)) = inner.in_progress.take() else {
            return None;
        };
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let length = payload.len() as u32;

        if inner.pages.back().map(|p| p.remaining() >= payload.len()).unwrap_or(false) {
            let page = inner.pages.back_mut().unwrap();
            page.cursor += payload.len();
            let header = MessageHeader {
                id,
                queue_id,
                length,
                scn,
                sequence,
                obj,
                pos,
                allocated: false,
            };
            page.messages.push(Message { header, payload });
            self.unconfirmed_length.fetch_add(length as usize, Ordering::Relaxed);
            if force || self.unconfirmed_length.load(Ordering::Relaxed) > self.flush_buffer {
                self.has_data.notify_all();
            }
            return Some(header);
        }

        // Doesn't fit in the remaining page capacity — stage as its own
        // heap allocation and flag it.
        self.rotate_locked(&mut inner);
        let header = MessageHeader {
            id,
            queue_id,
            length,
            scn,
            sequence,
            obj,
            pos,
            allocated: true,
        };
        inner.pages.back_mut().unwrap().messages.push(Message { header, payload });
        self.unconfirmed_length.fetch_add(length as usize, Ordering::Relaxed);
        if force || self.unconfirmed_length.load(Ordering::Relaxed) > self.flush_buffer {
            self.has_data.notify_all();
        }
        Some(header)
    }

    fn rotate_locked(&self, inner: &mut Inner) {
        let id = inner.next_page_id;
        inner.next_page_id += 1;
        let mem = self.pool.acquire("output-buffer", false);
        inner.pages.push_back(Page::new(id, mem));
    }

    pub fn unconfirmed_length(&self) -> usize {
        self.unconfirmed_length.load(Ordering::Relaxed)
    }

    /// Drains every message with `header.id <= up_to_id`, decrementing
    /// `unconfirmedLength` and returning emptied pages to the chunk pool.
    pub fn drain_confirmed(&self, up_to_id: u64) -> Vec<Message> {
        let mut inner = self.inner.lock();
        let mut drained = Vec::new();
        loop {
            let Some(front) = inner.pages.front_mut() else { break };
            while let Some(msg) = front.messages.first() {
                if msg.header.id > up_to_id {
                    break;
                }
                let msg = front.messages.remove(0);
                self.unconfirmed_length.fetch_sub(msg.header.length as usize, Ordering::Relaxed);
                drained.push(msg);
            }
            if front.messages.is_empty() && inner.pages.len() > 1 {
                let page = inner.pages.pop_front().unwrap();
                self.pool.release(page.mem, false);
            } else {
                break;
            }
        }
        drained
    }

    /// Clones up to `limit` messages with `header.id > after_id`, without
    /// removing them from the buffer — the writer's streaming cursor reads
    /// ahead of confirmation, which is what actually prunes pages.
    pub fn peek_after(&self, after_id: u64, limit: usize) -> Vec<Message> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for page in inner.pages.iter() {
            for msg in &page.messages {
                if msg.header.id > after_id {
                    out.push(msg.clone());
                    if out.len() >= limit {
                        return out;
                    }
                }
            }
        }
        out
    }

    pub fn wait_for_data(&self, timeout_ms: u64) {
        let mut inner = self.inner.lock();
        if self.unconfirmed_length.load(Ordering::Relaxed) == 0 {
            self.has_data
                .wait_for(&mut inner, std::time::Duration::from_millis(timeout_ms));
        }
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf() -> Arc<OutputBuffer> {
        let pool = ChunkPool::new(256, 0, 8, 0);
        OutputBuffer::new(pool, 1024)
    }

    #[test]
    fn begin_append_commit_produces_header() {
        let buf = buf();
        buf.begin(1, Scn(100), 0);
        buf.append(b"hello");
        let header = buf.commit(false, 0, 0).expect("message");
        assert_eq!(header.length, 5);
        assert_eq!(buf.unconfirmed_length(), 5);
    }

    #[test]
    fn oversized_message_flags_allocated() {
        let buf = buf();
        buf.begin(1, Scn(1), 0);
        buf.append(&vec![0u8; 512]);
        let header = buf.commit(true, 0, 0).expect("message");
        assert!(header.allocated);
    }

    #[test]
    fn drain_confirmed_frees_pages() {
        let buf = buf();
        buf.begin(1, Scn(1), 0);
        buf.append(b"a");
        let h1 = buf.commit(false, 0, 0).unwrap();
        buf.begin(1, Scn(2), 1);
        buf.append(b"b");
        buf.commit(false, 0, 1).unwrap();
        let drained = buf.drain_confirmed(h1.id);
        assert_eq!(drained.len(), 1);
        assert_eq!(buf.unconfirmed_length(), 1);
    }
}
