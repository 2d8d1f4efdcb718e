//! Drives hand-built redo vectors through the full
//! `Analyzer` dispatch path (dictionary capture, transaction buffering,
//! commit/rollback, piece chaining) and inspects what lands in the
//! `OutputBuffer`, the same seam `Writer::stream_tick` reads from.

use redo_cdc::analyzer::{Analyzer, CheckpointPolicy};
use redo_cdc::memory::ChunkPool;
use redo_cdc::output::OutputBuffer;
use redo_cdc::redo::{opcode, Field, FlowBits, RedoLogRecord};
use redo_cdc::schema::{ElementOptions, SchemaCache};
use redo_cdc::scn::{Scn, Seq, Xid};
use redo_cdc::txbuffer::TransactionBuffer;
use serde_json::Value;
use std::sync::Arc;

/// Packed Oracle `NUMBER` encoding for the small non-negative integers these
/// fixtures need; `parse_number` decodes both forms back out. Values above
/// 99 would need the multi-byte mantissa form, which none of these tests
/// exercise.
fn num(v: u32) -> Vec<u8> {
    if v == 0 {
        vec![0x80]
    } else {
        vec![0xC1, (v + 1) as u8]
    }
}

fn text(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

/// Lays `parts` out back-to-back and returns the matching `Field` table —
/// `RedoLogRecord::validate`'s 4-byte-alignment rule is never consulted
/// outside its own unit tests, so fields here are packed tightly.
fn pack(parts: &[Vec<u8>]) -> (Vec<Field>, Vec<u8>) {
    let mut payload = Vec::new();
    let mut fields = Vec::new();
    for p in parts {
        fields.push(Field { pos: payload.len() as u32, length: p.len() as u32 });
        payload.extend_from_slice(p);
    }
    (fields, payload)
}

#[allow(clippy::too_many_arguments)]
fn row_rec(opcode: u16, obj: u32, data_obj: u32, bdba: u32, slot: u16, xid: Xid, scn: Scn, flow: FlowBits, parts: &[Vec<u8>]) -> RedoLogRecord {
    let (fields, payload) = pack(parts);
    RedoLogRecord {
        opcode,
        scn,
        sub_scn: 0,
        xid,
        obj,
        data_obj,
        bdba,
        slot,
        column_count: fields.len() as u16,
        flow_bits: flow,
        fields,
        payload,
    }
}

fn empty_rec(opcode: u16, xid: Xid, scn: Scn) -> RedoLogRecord {
    RedoLogRecord {
        opcode,
        scn,
        sub_scn: 0,
        xid,
        obj: 0,
        data_obj: 0,
        bdba: 0,
        slot: 0,
        column_count: 0,
        flow_bits: FlowBits::default(),
        fields: Vec::new(),
        payload: Vec::new(),
    }
}

const CAPTURED_OBJ: u32 = 42;
const CAPTURED_OWNER_NO: u32 = 7;

struct Harness {
    _tmp: tempfile::TempDir,
    schema: Arc<SchemaCache>,
    analyzer: Analyzer,
    output: Arc<OutputBuffer>,
}

fn harness() -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let pool = ChunkPool::new(4096, 0, 64, 0);
    let schema = Arc::new(SchemaCache::new("TESTDB", tmp.path().to_path_buf()));
    schema.add_element("APPOWNER", "EMP", ElementOptions::None, None).unwrap();
    let transactions = Arc::new(TransactionBuffer::new(pool.clone()));
    let output = OutputBuffer::new(pool, 1 << 20);
    let analyzer = Analyzer::new(schema.clone(), transactions, output.clone(), 0, CheckpointPolicy::new(3600, 512));
    Harness { _tmp: tmp, schema, analyzer, output }
}

/// Captures `APPOWNER.EMP(EMPNO NUMBER, ENAME VARCHAR2)` by driving USER$,
/// OBJ$, TAB$ and COL$ insert rows through one dictionary transaction, the
/// way a real capture would observe the DDL that created the table.
fn capture_emp_table(h: &Harness, xid: Xid, scn: Scn) {
    let dummy = empty_rec(opcode::ROW_INSERT, xid, scn);

    let user_row = row_rec(
        opcode::ROW_INSERT,
        redo_cdc::schema::types::dict_obj::USER,
        redo_cdc::schema::types::dict_obj::USER,
        1,
        0,
        xid,
        scn,
        FlowBits::default(),
        &[num(CAPTURED_OWNER_NO), text("APPOWNER")],
    );
    h.analyzer.process_pair(dummy.clone(), user_row, Seq(1), 0).unwrap();

    let obj_row = row_rec(
        opcode::ROW_INSERT,
        redo_cdc::schema::types::dict_obj::OBJ,
        redo_cdc::schema::types::dict_obj::OBJ,
        1,
        0,
        xid,
        scn,
        FlowBits::default(),
        &[num(CAPTURED_OWNER_NO), num(CAPTURED_OBJ), num(CAPTURED_OBJ), num(2), text("EMP")],
    );
    h.analyzer.process_pair(dummy.clone(), obj_row, Seq(2), 0).unwrap();

    let tab_row = row_rec(
        opcode::ROW_INSERT,
        redo_cdc::schema::types::dict_obj::TAB,
        redo_cdc::schema::types::dict_obj::TAB,
        1,
        0,
        xid,
        scn,
        FlowBits::default(),
        &[num(CAPTURED_OBJ), num(CAPTURED_OBJ), num(0), num(1), num(2), num(0)],
    );
    h.analyzer.process_pair(dummy.clone(), tab_row, Seq(3), 0).unwrap();

    let empno_col = row_rec(
        opcode::ROW_INSERT,
        redo_cdc::schema::types::dict_obj::COL,
        redo_cdc::schema::types::dict_obj::COL,
        1,
        0,
        xid,
        scn,
        FlowBits::default(),
        &[num(CAPTURED_OBJ), num(1), num(1), num(1), text("EMPNO"), num(2), num(22), num(0), num(0), num(0)],
    );
    h.analyzer.process_pair(dummy.clone(), empno_col, Seq(4), 0).unwrap();

    let ename_col = row_rec(
        opcode::ROW_INSERT,
        redo_cdc::schema::types::dict_obj::COL,
        redo_cdc::schema::types::dict_obj::COL,
        1,
        1,
        xid,
        scn,
        FlowBits::default(),
        &[num(CAPTURED_OBJ), num(2), num(2), num(2), text("ENAME"), num(1), num(30), num(1), num(31), num(0)],
    );
    h.analyzer.process_pair(dummy, ename_col, Seq(5), 0).unwrap();

    h.analyzer.commit(xid, scn, 5).unwrap();
}

/// Decodes the most recently committed message — the DDL capture transaction
/// each test runs first always commits one envelope of its own ahead of the
/// scenario under test.
fn last_message_envelope(h: &Harness) -> Value {
    let messages = h.output.peek_after(0, 16);
    let msg = messages.last().expect("expected at least one committed message");
    serde_json::from_slice(&msg.payload).unwrap()
}

#[test]
fn schema_ddl_materializes_captured_table() {
    let h = harness();
    let ddl_xid = Xid::new(1, 1, 1);
    capture_emp_table(&h, ddl_xid, Scn(500));

    let object = h.schema.check_dict(CAPTURED_OBJ, CAPTURED_OBJ).expect("EMP should be captured after DDL commit");
    assert_eq!(object.owner, "APPOWNER");
    assert_eq!(object.table, "EMP");
    assert_eq!(object.columns.len(), 2);
    assert_eq!(object.columns[0].name, "EMPNO");
    assert_eq!(object.columns[1].name, "ENAME");

    // The DDL transaction is dictionary-only: its own commit carries no row
    // payload, only begin/commit framing, and is the only message emitted.
    let messages = h.output.peek_after(0, 16);
    assert_eq!(messages.len(), 1);
    let envelope: Value = serde_json::from_slice(&messages[0].payload).unwrap();
    let payload = envelope["payload"].as_array().unwrap();
    assert_eq!(payload.len(), 2);
    assert_eq!(payload[0]["op"], "begin");
    assert_eq!(payload[1]["op"], "commit");
}

#[test]
fn insert_emits_decoded_row_in_commit_envelope() {
    let h = harness();
    capture_emp_table(&h, Xid::new(1, 1, 1), Scn(500));

    let xid = Xid::new(2, 2, 2);
    h.analyzer.process_pair(empty_rec(opcode::TX_START, xid, Scn(600)), empty_rec(opcode::TX_START, xid, Scn(600)), Seq(10), 0).unwrap();

    let insert = row_rec(
        opcode::ROW_INSERT,
        CAPTURED_OBJ,
        CAPTURED_OBJ,
        100,
        0,
        xid,
        Scn(600),
        FlowBits::default(),
        &[num(55), text("SMITH")],
    );
    h.analyzer.process_pair(empty_rec(opcode::ROW_DELETE, xid, Scn(600)), insert, Seq(11), 0).unwrap();
    h.analyzer.commit(xid, Scn(601), 11).unwrap();

    let envelope = last_message_envelope(&h);
    let payload = envelope["payload"].as_array().unwrap();
    assert_eq!(payload.len(), 3);
    let row = &payload[1];
    assert_eq!(row["op"], "c");
    assert_eq!(row["schema"]["owner"], "APPOWNER");
    assert_eq!(row["schema"]["table"], "EMP");
    assert_eq!(row["after"]["EMPNO"], "55");
    assert_eq!(row["after"]["ENAME"], "SMITH");
    assert!(row.get("before").is_none());
}

#[test]
fn update_with_supplemental_piece_merges_into_one_row() {
    let h = harness();
    capture_emp_table(&h, Xid::new(1, 1, 1), Scn(500));

    let xid = Xid::new(3, 3, 3);
    let bdba = 200;
    let slot = 0;

    // Each piece's fields decode as seg_col_no = field-index + 1 within
    // that piece alone, so the primary piece re-asserts EMPNO (the key
    // column) ahead of the changed ENAME field, and the supplemental piece
    // carries EMPNO alone — the convention real supplemental logging
    // follows of echoing key columns on every piece.
    let primary = row_rec(
        opcode::ROW_UPDATE,
        CAPTURED_OBJ,
        CAPTURED_OBJ,
        bdba,
        slot,
        xid,
        Scn(700),
        FlowBits { first: false, last: false, prev: false, next: true },
        &[num(55), text("JONES")],
    );
    let supplemental = row_rec(
        opcode::ROW_SUPPLEMENTAL,
        CAPTURED_OBJ,
        CAPTURED_OBJ,
        bdba,
        slot,
        xid,
        Scn(700),
        FlowBits { first: false, last: false, prev: true, next: false },
        &[num(55)],
    );

    h.analyzer.process_pair(empty_rec(opcode::ROW_UPDATE, xid, Scn(700)), primary, Seq(20), 0).unwrap();
    h.analyzer.process_pair(empty_rec(opcode::ROW_SUPPLEMENTAL, xid, Scn(700)), supplemental, Seq(21), 0).unwrap();
    h.analyzer.commit(xid, Scn(701), 21).unwrap();

    let envelope = last_message_envelope(&h);
    let payload = envelope["payload"].as_array().unwrap();
    let row = &payload[1];
    assert_eq!(row["op"], "u");
    assert_eq!(row["after"]["EMPNO"], "55");
    assert_eq!(row["after"]["ENAME"], "JONES");
}

#[test]
fn multi_piece_row_reassembles_across_three_slots() {
    let h = harness();
    capture_emp_table(&h, Xid::new(1, 1, 1), Scn(500));

    let xid = Xid::new(4, 4, 4);
    let bdba = 300;
    let slot = 0;

    let first = row_rec(
        opcode::ROW_INSERT,
        CAPTURED_OBJ,
        CAPTURED_OBJ,
        bdba,
        slot,
        xid,
        Scn(800),
        FlowBits { first: true, last: false, prev: false, next: true },
        &[num(77)],
    );
    // Re-states EMPNO at field index 0 (seg_col_no 1, same value as the
    // first piece, so the overwrite in the merged column set is harmless)
    // so ENAME lands at field index 1 == seg_col_no 2.
    let last = row_rec(
        opcode::ROW_INSERT,
        CAPTURED_OBJ,
        CAPTURED_OBJ,
        bdba,
        slot,
        xid,
        Scn(800),
        FlowBits { first: false, last: true, prev: true, next: false },
        &[num(77), text("ADAMS")],
    );

    h.analyzer.process_pair(empty_rec(opcode::ROW_DELETE, xid, Scn(800)), first, Seq(30), 0).unwrap();
    h.analyzer.process_pair(empty_rec(opcode::ROW_DELETE, xid, Scn(800)), last, Seq(31), 0).unwrap();
    h.analyzer.commit(xid, Scn(801), 31).unwrap();

    let envelope = last_message_envelope(&h);
    let payload = envelope["payload"].as_array().unwrap();
    let row = &payload[1];
    assert_eq!(row["op"], "c");
    assert_eq!(row["after"]["EMPNO"], "77");
    assert_eq!(row["after"]["ENAME"], "ADAMS");
}

#[test]
fn full_rollback_drops_transaction_without_emitting() {
    let h = harness();
    capture_emp_table(&h, Xid::new(1, 1, 1), Scn(500));

    let xid = Xid::new(5, 5, 5);
    let messages_before = h.output.peek_after(0, 16).len();

    let insert = row_rec(opcode::ROW_INSERT, CAPTURED_OBJ, CAPTURED_OBJ, 400, 0, xid, Scn(900), FlowBits::default(), &[num(1), text("SCOTT")]);
    h.analyzer.process_pair(empty_rec(opcode::ROW_DELETE, xid, Scn(900)), insert, Seq(40), 0).unwrap();

    h.analyzer.rollback(xid);

    assert_eq!(h.output.peek_after(0, 16).len(), messages_before, "rollback must not emit a commit envelope");
}

#[test]
fn partial_undo_retracts_only_the_last_piece() {
    let h = harness();
    capture_emp_table(&h, Xid::new(1, 1, 1), Scn(500));

    let xid = Xid::new(6, 6, 6);
    let insert = row_rec(opcode::ROW_INSERT, CAPTURED_OBJ, CAPTURED_OBJ, 500, 0, xid, Scn(1000), FlowBits::default(), &[num(2), text("ALLEN")]);
    h.analyzer.process_pair(empty_rec(opcode::ROW_DELETE, xid, Scn(1000)), insert, Seq(50), 0).unwrap();

    // A stray undo-single record matching ROW_INSERT's paired-undo opcode
    // (ROW_DELETE) retracts that single piece; the transaction itself
    // survives and commits empty.
    h.analyzer
        .process_pair(empty_rec(opcode::ROW_DELETE, xid, Scn(1000)), empty_rec(opcode::UNDO_SINGLE, xid, Scn(1000)), Seq(51), 0)
        .unwrap();
    h.analyzer.commit(xid, Scn(1001), 51).unwrap();

    let envelope = last_message_envelope(&h);
    let payload = envelope["payload"].as_array().unwrap();
    assert_eq!(payload.len(), 2, "the retracted piece should leave only begin/commit");
}

#[test]
fn log_switch_mid_transaction_does_not_lose_pieces() {
    let h = harness();
    capture_emp_table(&h, Xid::new(1, 1, 1), Scn(500));

    let xid = Xid::new(7, 7, 7);
    // First piece arrives on one log file/sequence...
    h.analyzer.process_pair(empty_rec(opcode::TX_START, xid, Scn(1100)), empty_rec(opcode::TX_START, xid, Scn(1100)), Seq(60), 0).unwrap();
    let insert = row_rec(opcode::ROW_INSERT, CAPTURED_OBJ, CAPTURED_OBJ, 600, 0, xid, Scn(1100), FlowBits::default(), &[num(3), text("WARD")]);
    h.analyzer.process_pair(empty_rec(opcode::ROW_DELETE, xid, Scn(1100)), insert, Seq(61), 0).unwrap();

    // ...and the commit arrives after a log switch bumps the sequence —
    // the transaction buffer is keyed by xid, not by which physical group
    // produced the bytes, so the switch is transparent to it.
    h.analyzer.commit(xid, Scn(1101), 1).unwrap();

    let envelope = last_message_envelope(&h);
    let payload = envelope["payload"].as_array().unwrap();
    assert_eq!(payload.len(), 3);
    assert_eq!(payload[1]["after"]["EMPNO"], "3");
    assert_eq!(payload[1]["after"]["ENAME"], "WARD");
}
