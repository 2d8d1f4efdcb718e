//! Row-piece chaining and operation classification.

use crate::encoder::RowOp;
use crate::redo::{opcode, FlowBits, RedoLogRecord};

/// Maps a record's flow-bits to its slot in a three-piece chain:
/// `FB_N` alone ⇒ slot 0 (first piece), `FB_P|FB_N` ⇒ slot 1 (middle),
/// `FB_P` alone ⇒ slot 2 (last). A record with neither bit is a
/// single-piece row and has no slot.
pub fn piece_slot(fb: FlowBits) -> Option<usize> {
    match (fb.prev, fb.next) {
        (false, true) => Some(0),
        (true, true) => Some(1),
        (true, false) => Some(2),
        (false, false) => None,
    }
}

/// Maps a redo opcode to the row operation it represents, folding the
/// multi-row and supplemental/overwrite variants onto their base op.
/// `None` for non-row opcodes.
pub fn row_op_from_opcode(code: u16) -> Option<RowOp> {
    match code {
        opcode::ROW_INSERT | opcode::ROW_MULTI_INSERT => Some(RowOp::Insert),
        opcode::ROW_DELETE | opcode::ROW_MULTI_DELETE => Some(RowOp::Delete),
        opcode::ROW_UPDATE | opcode::ROW_OVERWRITE | opcode::ROW_FORWARD | opcode::ROW_SUPPLEMENTAL | opcode::ROW_KDOCMP => Some(RowOp::Update),
        _ => None,
    }
}

/// Raw field bytes for one column as captured from a redo record, keyed by
/// `seg_col_no` so multiple pieces can be concatenated without collision.
pub type RawColumn = (u32, Vec<u8>);

/// Pulls every field out of a record's payload as a raw column, under the
/// fixed positional convention this engine uses in place of a real
/// column-number-bearing redo vector: field index `i` is `seg_col_no` `i+1`.
pub fn decode_columns(rec: &RedoLogRecord) -> Vec<RawColumn> {
    (0..rec.fields.len()).filter_map(|i| rec.field_bytes(i).map(|b| (i as u32 + 1, b.to_vec()))).collect()
}

/// Accumulates a multi-piece row's column set across up to three slots,
/// then concatenates them in slot order on `FB_L`.
#[derive(Debug, Default, Clone)]
pub struct PieceSet {
    slots: [Vec<RawColumn>; 3],
    ops: Vec<RowOp>,
}

impl PieceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, slot: Option<usize>, op: RowOp, columns: Vec<RawColumn>) {
        self.ops.push(op);
        if let Some(idx) = slot {
            self.slots[idx] = columns;
        } else {
            self.slots[0] = columns;
        }
    }

    /// Columns from all set slots, in slot order.
    pub fn concat(&self) -> Vec<RawColumn> {
        self.slots.iter().flat_map(|s| s.iter().cloned()).collect()
    }

    pub fn piece_ops(&self) -> &[RowOp] {
        &self.ops
    }
}

/// Operation classification for a completed chain: starts at the first
/// piece's opcode; promoted INSERT→UPDATE if a delete piece follows an
/// insert (or vice versa); stays INSERT only if every piece is an insert.
pub fn classify_op(first: RowOp, piece_ops: &[RowOp]) -> RowOp {
    if piece_ops.iter().all(|o| *o == RowOp::Insert) {
        return RowOp::Insert;
    }
    let has_insert = piece_ops.iter().any(|o| *o == RowOp::Insert);
    let has_delete = piece_ops.iter().any(|o| *o == RowOp::Delete);
    match first {
        RowOp::Insert if has_delete => RowOp::Update,
        RowOp::Delete if has_insert => RowOp::Update,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fb(prev: bool, next: bool) -> FlowBits {
        FlowBits {
            first: false,
            last: false,
            prev,
            next,
        }
    }

    #[test]
    fn slot_assignment_follows_flow_bits() {
        assert_eq!(piece_slot(fb(false, true)), Some(0));
        assert_eq!(piece_slot(fb(true, true)), Some(1));
        assert_eq!(piece_slot(fb(true, false)), Some(2));
        assert_eq!(piece_slot(fb(false, false)), None);
    }

    #[test]
    fn concat_preserves_slot_order() {
        let mut set = PieceSet::new();
        set.record(Some(0), RowOp::Insert, vec![(1, vec![b'a'])]);
        set.record(Some(2), RowOp::Insert, vec![(3, vec![b'c'])]);
        set.record(Some(1), RowOp::Insert, vec![(2, vec![b'b'])]);
        let cols: Vec<u32> = set.concat().into_iter().map(|(n, _)| n).collect();
        assert_eq!(cols, vec![1, 2, 3]);
    }

    #[test]
    fn pure_insert_chain_stays_insert() {
        assert_eq!(classify_op(RowOp::Insert, &[RowOp::Insert, RowOp::Insert]), RowOp::Insert);
    }

    #[test]
    fn insert_then_delete_promotes_to_update() {
        assert_eq!(classify_op(RowOp::Insert, &[RowOp::Insert, RowOp::Delete]), RowOp::Update);
    }

    #[test]
    fn delete_then_insert_promotes_to_update() {
        assert_eq!(classify_op(RowOp::Delete, &[RowOp::Delete, RowOp::Insert]), RowOp::Update);
    }

    #[test]
    fn row_op_from_opcode_maps_known_opcodes() {
        assert_eq!(row_op_from_opcode(opcode::ROW_INSERT), Some(RowOp::Insert));
        assert_eq!(row_op_from_opcode(opcode::ROW_DELETE), Some(RowOp::Delete));
        assert_eq!(row_op_from_opcode(opcode::ROW_UPDATE), Some(RowOp::Update));
        assert_eq!(row_op_from_opcode(opcode::ROW_SUPPLEMENTAL), Some(RowOp::Update));
        assert_eq!(row_op_from_opcode(opcode::TX_COMMIT), None);
    }

    #[test]
    fn decode_columns_maps_field_index_to_seg_col_no() {
        use crate::scn::{Scn, Xid};
        let rec = RedoLogRecord {
            opcode: opcode::ROW_INSERT,
            scn: Scn(1),
            sub_scn: 0,
            xid: Xid::new(1, 1, 1),
            obj: 1,
            data_obj: 1,
            bdba: 1,
            slot: 0,
            column_count: 2,
            flow_bits: FlowBits::default(),
            fields: vec![crate::redo::Field { pos: 0, length: 2 }, crate::redo::Field { pos: 2, length: 3 }],
            payload: vec![1, 2, 3, 4, 5],
        };
        let cols = decode_columns(&rec);
        assert_eq!(cols, vec![(1, vec![1, 2]), (2, vec![3, 4, 5])]);
    }
}
