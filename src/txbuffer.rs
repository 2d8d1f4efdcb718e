//! Transaction and Transaction Buffer.
//!
//! Pieces of a chained row are kept by chunk-relative index inside the
//! transaction's own chunk arena rather than raw prev/next pointers, per
//! "Cyclic and back-referenced records" design note. Grounded on
//! `transaction/wal.rs`'s chunked log-record layout.

use crate::memory::{Chunk, ChunkPool};
use crate::redo::{paired_undo_accepts, RedoLogRecord};
use crate::scn::{Scn, Seq, Xid};
use dashmap::DashMap;
use std::sync::Arc;

/// One appended (undo, redo) pair.
#[derive(Debug, Clone)]
pub struct TxEntry {
    pub rec1: RedoLogRecord,
    pub rec2: RedoLogRecord,
}

impl TxEntry {
    fn approx_size(&self) -> usize {
        // Header overhead (opcode pair + lengths + pointers) plus the two
        // records' raw payloads: header + copy of redoLogRecord1 + copy of
        // redoLogRecord2, the chunk entry shape original_source uses.
        64 + self.rec1.payload.len() + self.rec2.payload.len()
    }
}

struct TxChunk {
    _mem: Chunk,
    capacity: usize,
    used: usize,
    entries: Vec<TxEntry>,
}

impl TxChunk {
    fn new(mem: Chunk) -> Self {
        let capacity = mem.data.len();
        Self {
            _mem: mem,
            capacity,
            used: 0,
            entries: Vec::new(),
        }
    }

    fn try_push(&mut self, entry: TxEntry) -> Result<(), TxEntry> {
        let size = entry.approx_size();
        if self.used + size > self.capacity && !self.entries.is_empty() {
            return Err(entry);
        }
        self.used += size;
        self.entries.push(entry);
        Ok(())
    }
}

/// A single Oracle transaction as reconstructed from the redo stream.
pub struct Transaction {
    pub xid: Xid,
    pub first_seq: Seq,
    pub first_offset: u64,
    pub commit_scn: Option<Scn>,
    pub commit_seq: Option<Seq>,
    pub begin: bool,
    pub rollback: bool,
    pub system: bool,
    chunks: Vec<TxChunk>,
    op_count: u64,
}

impl Transaction {
    fn new(xid: Xid, first_seq: Seq, first_offset: u64) -> Self {
        Self {
            xid,
            first_seq,
            first_offset,
            commit_scn: None,
            commit_seq: None,
            begin: true,
            rollback: false,
            system: false,
            chunks: Vec::new(),
            op_count: 0,
        }
    }

    pub fn op_count(&self) -> u64 {
        self.op_count
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.entries.is_empty())
    }

    fn last_entry(&self) -> Option<&TxEntry> {
        self.chunks.iter().rev().find_map(|c| c.entries.last())
    }

    fn pop_last(&mut self) -> Option<TxEntry> {
        for chunk in self.chunks.iter_mut().rev() {
            if let Some(e) = chunk.entries.pop() {
                chunk.used = chunk.used.saturating_sub(e.approx_size());
                return Some(e);
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &TxEntry> {
        self.chunks.iter().flat_map(|c| c.entries.iter())
    }
}

/// Owns per-XID transaction state and is the only writer of each
/// transaction's chunk list.
pub struct TransactionBuffer {
    pool: Arc<ChunkPool>,
    transactions: DashMap<Xid, Transaction>,
}

impl TransactionBuffer {
    pub fn new(pool: Arc<ChunkPool>) -> Self {
        Self {
            pool,
            transactions: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// Ensures a transaction entry exists for `xid` even if no row pairs are
    /// ever appended to it — a transaction touching only dictionary tables
    /// still needs a target for `mark_system`/`mark_commit`.
    pub fn touch(&self, xid: Xid, first_seq: Seq, first_offset: u64) {
        self.transactions.entry(xid).or_insert_with(|| Transaction::new(xid, first_seq, first_offset));
    }

    /// Append a (rec1, rec2) pair, creating the transaction on first sight.
    pub fn append(&self, xid: Xid, first_seq: Seq, first_offset: u64, rec1: RedoLogRecord, rec2: RedoLogRecord) {
        let mut txn = self
            .transactions
            .entry(xid)
            .or_insert_with(|| Transaction::new(xid, first_seq, first_offset));
        txn.op_count += 1;
        let mut entry = TxEntry { rec1, rec2 };
        loop {
            if txn.chunks.is_empty() {
                txn.chunks.push(TxChunk::new(self.pool.acquire("txn-buffer", false)));
            }
            let tail = txn.chunks.last_mut().unwrap();
            match tail.try_push(entry) {
                Ok(()) => break,
                Err(e) => {
                    entry = e;
                    txn.chunks.push(TxChunk::new(self.pool.acquire("txn-buffer", false)));
                }
            }
        }
    }

    /// Undo the last appended pair if `rec1`'s opcode is a recognized
    /// rollback of the tail entry's redo opcode. Otherwise a tolerated no-op — redo vectors occasionally
    /// appear doubled.
    pub fn rollback_last(&self, xid: Xid, rec1: &RedoLogRecord) -> bool {
        if let Some(mut txn) = self.transactions.get_mut(&xid) {
            let matches = txn
                .last_entry()
                .map(|e| paired_undo_accepts(e.rec2.opcode, rec1.opcode))
                .unwrap_or(false);
            if matches {
                txn.pop_last();
                return true;
            }
        }
        false
    }

    pub fn mark_system(&self, xid: Xid) {
        if let Some(mut txn) = self.transactions.get_mut(&xid) {
            txn.system = true;
        }
    }

    pub fn mark_commit(&self, xid: Xid, scn: Scn, seq: Seq) {
        if let Some(mut txn) = self.transactions.get_mut(&xid) {
            txn.commit_scn = Some(scn);
            txn.commit_seq = Some(seq);
        }
    }

    pub fn mark_rollback(&self, xid: Xid) {
        if let Some(mut txn) = self.transactions.get_mut(&xid) {
            txn.rollback = true;
        }
    }

    pub fn contains(&self, xid: Xid) -> bool {
        self.transactions.contains_key(&xid)
    }

    /// Yield pairs in append order (used only at flush).
    pub fn iterate<F: FnMut(&TxEntry)>(&self, xid: Xid, mut f: F) {
        if let Some(txn) = self.transactions.get(&xid) {
            for e in txn.iter() {
                f(e);
            }
        }
    }

    pub fn is_system(&self, xid: Xid) -> bool {
        self.transactions.get(&xid).map(|t| t.system).unwrap_or(false)
    }

    /// Release all chunks for `xid` back to the pool and drop the
    /// transaction.
    pub fn drop_txn(&self, xid: Xid) {
        if let Some((_, txn)) = self.transactions.remove(&xid) {
            for chunk in txn.chunks {
                self.pool.release(chunk._mem, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redo::{opcode, FlowBits};

    fn rec(opcode: u16) -> RedoLogRecord {
        RedoLogRecord {
            opcode,
            scn: Scn(1),
            sub_scn: 0,
            xid: Xid::new(1, 1, 1),
            obj: 1,
            data_obj: 1,
            bdba: 1,
            slot: 0,
            column_count: 0,
            flow_bits: FlowBits::default(),
            fields: Vec::new(),
            payload: Vec::new(),
        }
    }

    #[test]
    fn append_and_iterate_in_order() {
        let pool = ChunkPool::new(4096, 0, 8, 0);
        let buf = TransactionBuffer::new(pool);
        let xid = Xid::new(1, 1, 1);
        buf.append(xid, Seq(1), 0, rec(opcode::ROW_INSERT), rec(opcode::ROW_INSERT));
        buf.append(xid, Seq(1), 0, rec(opcode::ROW_UPDATE), rec(opcode::ROW_UPDATE));
        let mut seen = Vec::new();
        buf.iterate(xid, |e| seen.push(e.rec2.opcode));
        assert_eq!(seen, vec![opcode::ROW_INSERT, opcode::ROW_UPDATE]);
    }

    #[test]
    fn rollback_last_pops_matching_pair() {
        let pool = ChunkPool::new(4096, 0, 8, 0);
        let buf = TransactionBuffer::new(pool);
        let xid = Xid::new(1, 1, 1);
        buf.append(xid, Seq(1), 0, rec(opcode::ROW_INSERT), rec(opcode::ROW_INSERT));
        assert!(buf.rollback_last(xid, &rec(opcode::ROW_DELETE)));
        let mut count = 0;
        buf.iterate(xid, |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn rollback_last_is_noop_on_mismatch() {
        let pool = ChunkPool::new(4096, 0, 8, 0);
        let buf = TransactionBuffer::new(pool);
        let xid = Xid::new(1, 1, 1);
        buf.append(xid, Seq(1), 0, rec(opcode::ROW_UPDATE), rec(opcode::ROW_UPDATE));
        assert!(!buf.rollback_last(xid, &rec(opcode::ROW_INSERT)));
        let mut count = 0;
        buf.iterate(xid, |_| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn drop_releases_chunks_to_pool() {
        let pool = ChunkPool::new(4096, 0, 8, 0);
        let buf = TransactionBuffer::new(pool.clone());
        let xid = Xid::new(1, 1, 1);
        buf.append(xid, Seq(1), 0, rec(opcode::ROW_INSERT), rec(opcode::ROW_INSERT));
        let allocated_before = pool.stats().allocated;
        assert!(allocated_before >= 1);
        buf.drop_txn(xid);
        assert!(!buf.contains(xid));
    }

    #[test]
    fn touch_creates_empty_transaction_once() {
        let pool = ChunkPool::new(4096, 0, 8, 0);
        let buf = TransactionBuffer::new(pool);
        let xid = Xid::new(3, 3, 3);
        assert!(!buf.contains(xid));
        buf.touch(xid, Seq(1), 0);
        assert!(buf.contains(xid));
        buf.mark_system(xid);
        assert!(buf.is_system(xid));
        buf.touch(xid, Seq(1), 0);
        assert!(buf.is_system(xid));
    }

    #[test]
    fn overflow_spans_multiple_chunks() {
        let pool = ChunkPool::new(256, 0, 64, 0);
        let buf = TransactionBuffer::new(pool);
        let xid = Xid::new(2, 2, 2);
        for _ in 0..20 {
            let mut r1 = rec(opcode::ROW_INSERT);
            r1.payload = vec![0u8; 64];
            let mut r2 = rec(opcode::ROW_INSERT);
            r2.payload = vec![0u8; 64];
            buf.append(xid, Seq(1), 0, r1, r2);
        }
        let mut count = 0;
        buf.iterate(xid, |_| count += 1);
        assert_eq!(count, 20);
    }
}
