//! Analyzer: parses redo records, drives the transaction
//! buffer, dispatches dictionary DML to the System-Transaction engine, and
//! emits logical rows to the output buffer.
//!
//! Grounded on `execution`'s dispatch-by-opcode style and
//! `replication/core`'s commit/rollback sequencing.

mod chain;
mod checkpoint;

pub use chain::{classify_op, PieceSet, RowOp};
pub use checkpoint::{CheckpointCandidate, CheckpointPolicy};

use crate::encoder::{self, DecodedRow};
use crate::error::Result;
use crate::output::OutputBuffer;
use crate::redo::{opcode, RedoLogRecord};
use crate::scn::{RowId, Scn, Seq, Xid};
use crate::schema::SchemaCache;
use crate::systxn::{self, SysTableKind, SystemTransactionEngine};
use crate::txbuffer::TransactionBuffer;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Splits an over-size commit's payload into multiple synthetic
/// commit/begin pairs rather than failing.
pub fn should_split(accumulated_bytes: usize, max_message_mb: usize) -> bool {
    max_message_mb > 0 && accumulated_bytes > max_message_mb * 1024 * 1024
}

/// Classifies a record's opcode into the analyzer's top-level dispatch
/// buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpcodeClass {
    UndoSingle,
    TxStart,
    TxCommit,
    Row,
    Truncate,
    Ignored,
}

pub fn classify_opcode(code: u16) -> OpcodeClass {
    match code {
        opcode::UNDO_SINGLE => OpcodeClass::UndoSingle,
        opcode::TX_START => OpcodeClass::TxStart,
        opcode::TX_COMMIT => OpcodeClass::TxCommit,
        opcode::TRUNCATE => OpcodeClass::Truncate,
        opcode::ROW_INSERT
        | opcode::ROW_DELETE
        | opcode::ROW_UPDATE
        | opcode::ROW_OVERWRITE
        | opcode::ROW_FORWARD
        | opcode::ROW_MULTI_INSERT
        | opcode::ROW_MULTI_DELETE
        | opcode::ROW_SUPPLEMENTAL
        | opcode::ROW_KDOCMP => OpcodeClass::Row,
        _ => OpcodeClass::Ignored,
    }
}

/// Owns the schema cache, transaction state, and output buffer — the only
/// writer of the output buffer.
pub struct Analyzer {
    schema: Arc<SchemaCache>,
    transactions: Arc<TransactionBuffer>,
    output: Arc<OutputBuffer>,
    max_message_mb: usize,
    checkpoint_policy: CheckpointPolicy,
}

impl Analyzer {
    pub fn new(schema: Arc<SchemaCache>, transactions: Arc<TransactionBuffer>, output: Arc<OutputBuffer>, max_message_mb: usize, checkpoint_policy: CheckpointPolicy) -> Self {
        Self {
            schema,
            transactions,
            output,
            max_message_mb,
            checkpoint_policy,
        }
    }

    /// Dispatches one decoded (undo, redo) pair by opcode: applies
    /// dictionary DML inline via the System-Transaction engine, recognizes
    /// commit/rollback boundaries, and otherwise appends the pair to its
    /// transaction's buffer for formatting at commit time. `seq`/`offset`
    /// mark the pair's position in the redo stream.
    pub fn process_pair(&self, rec1: RedoLogRecord, rec2: RedoLogRecord, seq: Seq, offset: u64) -> Result<()> {
        let xid = rec2.xid;
        match classify_opcode(rec2.opcode) {
            OpcodeClass::TxStart => {
                self.transactions.touch(xid, seq, offset);
            }
            OpcodeClass::UndoSingle => {
                self.rollback_last(xid, &rec1);
            }
            OpcodeClass::TxCommit => {
                self.commit(xid, rec2.scn, seq.0)?;
            }
            OpcodeClass::Row => {
                if let Some(kind) = systxn::sys_table_kind(rec2.obj) {
                    self.transactions.touch(xid, seq, offset);
                    self.transactions.mark_system(xid);
                    self.apply_dictionary_row(kind, &rec1, &rec2)?;
                } else {
                    self.transactions.append(xid, seq, offset, rec1, rec2);
                }
            }
            OpcodeClass::Truncate | OpcodeClass::Ignored => {}
        }
        Ok(())
    }

    /// Translates one dictionary row into the matching
    /// `SystemTransactionEngine` call. The before-image is only needed for
    /// deletes; inserts and updates carry a full after-image.
    fn apply_dictionary_row(&self, kind: SysTableKind, rec1: &RedoLogRecord, rec2: &RedoLogRecord) -> Result<()> {
        let engine = SystemTransactionEngine::new(&self.schema);
        let rowid = RowId::new(rec2.data_obj, rec2.bdba, rec2.slot);
        match chain::row_op_from_opcode(rec2.opcode) {
            Some(RowOp::Insert) => engine.insert(kind, rowid, &systxn::decode_dictionary_row(kind, rec2)?),
            Some(RowOp::Update) => engine.update(kind, rowid, &systxn::decode_dictionary_row(kind, rec2)?),
            Some(RowOp::Delete) => engine.delete(kind, rowid, &systxn::decode_dictionary_row(kind, rec1)?),
            None => Ok(()),
        }
    }

    /// Commit handling: drives the System-Transaction engine for
    /// dictionary-touching transactions, merges chained row pieces, resolves
    /// each row's table via the schema cache, and emits one JSON envelope
    /// (splitting into synthetic commit/begin pairs past `max_message_mb`).
    pub fn commit(&self, xid: Xid, scn: Scn, sequence: u32) -> Result<()> {
        self.transactions.mark_commit(xid, scn, Seq(sequence));

        if self.transactions.is_system(xid) {
            let engine = SystemTransactionEngine::new(&self.schema);
            // DML application against Sys tables happens inline as each pair
            // is appended in process_pair; by commit time only the final
            // rebuild + snapshot step remains.
            engine.finish_commit(scn)?;
        }

        let mut order: Vec<(u32, u16)> = Vec::new();
        let mut group_obj: HashMap<(u32, u16), u32> = HashMap::new();
        let mut group_set: HashMap<(u32, u16), PieceSet> = HashMap::new();
        self.transactions.iterate(xid, |entry| {
            let rec2 = &entry.rec2;
            if !rec2.is_row_opcode() {
                return;
            }
            let Some(op) = chain::row_op_from_opcode(rec2.opcode) else { return };
            let key = (rec2.bdba, rec2.slot);
            let slot = chain::piece_slot(rec2.flow_bits);
            let columns = if op == RowOp::Delete {
                chain::decode_columns(&entry.rec1)
            } else {
                chain::decode_columns(rec2)
            };
            group_obj.entry(key).or_insert(rec2.obj);
            let set = group_set.entry(key).or_insert_with(|| {
                order.push(key);
                PieceSet::new()
            });
            set.record(slot, op, columns);
        });

        self.output.begin(0, scn, 0);
        let tm = chrono::Utc::now();
        let mut items = vec![encoder::begin_item()];
        let mut accumulated = 0usize;
        let mut split_count = 0u32;

        for key in order {
            let obj = group_obj[&key];
            let Some(object) = self.schema.check_dict(obj, obj) else { continue };
            let set = &group_set[&key];
            let piece_ops = set.piece_ops();
            let Some(first) = piece_ops.first().copied() else { continue };
            let op = classify_op(first, piece_ops);

            let mut before = Vec::new();
            let mut after = Vec::new();
            for (seg_col_no, raw) in set.concat() {
                if let Some(pair) = encoder::encode_raw_column(&object, seg_col_no, &raw) {
                    match op {
                        RowOp::Delete => before.push(pair),
                        _ => after.push(pair),
                    }
                }
            }
            let row = DecodedRow {
                op,
                rowid: RowId::new(object.data_obj, key.0, key.1),
                before,
                after,
            };
            let item = encoder::encode_row(&object, &row);
            let item_len = serde_json::to_vec(&item).map(|v| v.len()).unwrap_or(0);
            accumulated += item_len;
            if should_split(accumulated, self.max_message_mb) {
                warn!(xid = %xid, split_count, "splitting oversized commit, emitting synthetic commit/begin");
                items.push(encoder::commit_item());
                self.append_envelope(scn, tm, xid, std::mem::replace(&mut items, vec![encoder::begin_item()]))?;
                self.output.commit(true, 0, sequence);
                self.output.begin(0, scn, 0);
                accumulated = item_len;
                split_count += 1;
            }
            items.push(item);
        }

        items.push(encoder::commit_item());
        self.append_envelope(scn, tm, xid, items)?;
        self.output.commit(true, 0, sequence);
        self.transactions.drop_txn(xid);
        Ok(())
    }

    fn append_envelope(&self, scn: Scn, tm: chrono::DateTime<chrono::Utc>, xid: Xid, payload: Vec<serde_json::Value>) -> Result<()> {
        let envelope = encoder::encode_envelope(scn, tm, xid, payload);
        let bytes = serde_json::to_vec(&envelope)?;
        self.output.append(&bytes);
        Ok(())
    }

    /// Rollback handling: drop without emitting.
    pub fn rollback(&self, xid: Xid) {
        self.transactions.mark_rollback(xid);
        self.transactions.drop_txn(xid);
    }

    /// Partial rollback: undo record whose FB bits mirror a previously
    /// appended pair.
    pub fn rollback_last(&self, xid: Xid, rec1: &RedoLogRecord) -> bool {
        self.transactions.rollback_last(xid, rec1)
    }

    pub fn checkpoint_tick(&mut self, now_s: u64, bytes_consumed: u64, scn: Scn, sequence: u32, offset: u64) -> Option<CheckpointCandidate> {
        self.checkpoint_policy.maybe_candidate(now_s, bytes_consumed, scn, sequence, offset)
    }

    pub fn schema(&self) -> &Arc<SchemaCache> {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_row_opcodes() {
        assert_eq!(classify_opcode(opcode::ROW_INSERT), OpcodeClass::Row);
        assert_eq!(classify_opcode(opcode::ROW_UPDATE), OpcodeClass::Row);
        assert_eq!(classify_opcode(opcode::TX_COMMIT), OpcodeClass::TxCommit);
        assert_eq!(classify_opcode(opcode::TRUNCATE), OpcodeClass::Truncate);
        assert_eq!(classify_opcode(0xFFFF), OpcodeClass::Ignored);
    }

    #[test]
    fn should_split_respects_configured_limit() {
        assert!(!should_split(1_000_000, 0));
        assert!(!should_split(1_000_000, 10));
        assert!(should_split(11 * 1024 * 1024, 10));
    }
}
