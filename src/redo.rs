//! Redo log record model.
//!
//! Grounded on `original_source/src/RedoLogRecord.cpp` for field layout and
//! the general "self-describing variable length record" style seen in
//! `transaction/wal.rs`'s `LogRecord` enum.

use crate::error::{CdcError, Result};
use crate::scn::{Scn, Xid};
use bytes::{Buf, BufMut, BytesMut};

/// Two-byte opcode (class.sub-class) — see GLOSSARY.
pub mod opcode {
    pub const UNDO_SINGLE: u16 = 0x0501;
    pub const TX_START: u16 = 0x0502;
    pub const TX_COMMIT: u16 = 0x0504;
    pub const ROW_INSERT: u16 = 0x0B02;
    pub const ROW_DELETE: u16 = 0x0B03;
    pub const ROW_UPDATE: u16 = 0x0B05;
    pub const ROW_OVERWRITE: u16 = 0x0B06;
    pub const ROW_FORWARD: u16 = 0x0B08;
    pub const ROW_MULTI_INSERT: u16 = 0x0B0B;
    pub const ROW_MULTI_DELETE: u16 = 0x0B0C;
    pub const ROW_SUPPLEMENTAL: u16 = 0x0B10;
    pub const ROW_KDOCMP: u16 = 0x0B16;
    pub const TRUNCATE: u16 = 0x1801;
}

/// Flow-bits marking piecewise-chained rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowBits {
    pub first: bool,  // FB_F
    pub last: bool,   // FB_L
    pub prev: bool,   // FB_P
    pub next: bool,   // FB_N
}

impl FlowBits {
    pub fn from_byte(b: u8) -> Self {
        Self {
            first: b & 0x04 != 0,
            last: b & 0x02 != 0,
            prev: b & 0x40 != 0,
            next: b & 0x20 != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.first {
            b |= 0x04;
        }
        if self.last {
            b |= 0x02;
        }
        if self.prev {
            b |= 0x40;
        }
        if self.next {
            b |= 0x20;
        }
        b
    }
}

/// One field within a redo record's payload, as located by the field-length
/// table.
#[derive(Debug, Clone)]
pub struct Field {
    pub pos: u32,
    pub length: u32,
}

/// A single redo vector. Two of these (undo + redo) form the (rec1, rec2)
/// pair that the analyzer appends to a transaction buffer.
#[derive(Debug, Clone)]
pub struct RedoLogRecord {
    pub opcode: u16,
    pub scn: Scn,
    pub sub_scn: u32,
    pub xid: Xid,
    pub obj: u32,
    pub data_obj: u32,
    pub bdba: u32,
    pub slot: u16,
    pub column_count: u16,
    pub flow_bits: FlowBits,
    pub fields: Vec<Field>,
    pub payload: Vec<u8>,
}

impl RedoLogRecord {
    /// Validates the structural invariants:
    /// sum of declared field lengths == total length (payload length);
    /// fields are 4-byte aligned; `pos + length <= payload.len()`.
    pub fn validate(&self) -> Result<()> {
        let mut sum: u64 = 0;
        for f in &self.fields {
            if f.pos % 4 != 0 {
                return Err(CdcError::RedoFormat(format!(
                    "field at pos {} is not 4-byte aligned",
                    f.pos
                )));
            }
            let end = f.pos as u64 + f.length as u64;
            if end > self.payload.len() as u64 {
                return Err(CdcError::RedoFormat(format!(
                    "field [{}, {}) exceeds payload length {}",
                    f.pos,
                    end,
                    self.payload.len()
                )));
            }
            sum += f.length as u64;
        }
        if sum > self.payload.len() as u64 {
            return Err(CdcError::RedoFormat(
                "sum of declared field lengths exceeds record length".into(),
            ));
        }
        Ok(())
    }

    pub fn field_bytes(&self, idx: usize) -> Option<&[u8]> {
        self.fields.get(idx).map(|f| {
            let start = f.pos as usize;
            let end = start + f.length as usize;
            &self.payload[start..end]
        })
    }

    pub fn is_row_opcode(&self) -> bool {
        matches!(
            self.opcode,
            opcode::ROW_INSERT
                | opcode::ROW_DELETE
                | opcode::ROW_UPDATE
                | opcode::ROW_OVERWRITE
                | opcode::ROW_FORWARD
                | opcode::ROW_MULTI_INSERT
                | opcode::ROW_MULTI_DELETE
                | opcode::ROW_SUPPLEMENTAL
                | opcode::ROW_KDOCMP
        )
    }
}

/// This engine's own fixed framing for one redo vector — a length-prefixed
/// record used to hand parsed vectors between `Reader` and `Analyzer` and to
/// build test fixtures. It is not Oracle's on-disk redo vector layout, same
/// as `reader::header::parse`'s block header.
pub fn encode(rec: &RedoLogRecord) -> Vec<u8> {
    let mut body = BytesMut::new();
    body.put_u16(rec.opcode);
    body.put_u64(rec.scn.0);
    body.put_u32(rec.sub_scn);
    body.put_u16(rec.xid.usn);
    body.put_u16(rec.xid.slot);
    body.put_u32(rec.xid.seq);
    body.put_u32(rec.obj);
    body.put_u32(rec.data_obj);
    body.put_u32(rec.bdba);
    body.put_u16(rec.slot);
    body.put_u16(rec.column_count);
    body.put_u8(rec.flow_bits.to_byte());
    body.put_u16(rec.fields.len() as u16);
    for f in &rec.fields {
        body.put_u32(f.pos);
        body.put_u32(f.length);
    }
    body.put_u32(rec.payload.len() as u32);
    body.put_slice(&rec.payload);

    let mut framed = BytesMut::with_capacity(4 + body.len());
    framed.put_u32(body.len() as u32);
    framed.put_slice(&body);
    framed.to_vec()
}

/// Decodes one framed record from the front of `bytes`, returning it
/// alongside the number of bytes consumed so the caller can advance past
/// it. `Err` on a short or malformed buffer; the caller retries once more
/// bytes are available rather than treating it as fatal.
pub fn decode(bytes: &[u8]) -> Result<(RedoLogRecord, usize)> {
    let short = || CdcError::RedoFormat("truncated redo vector frame".into());
    if bytes.len() < 4 {
        return Err(short());
    }
    let mut head = &bytes[..4];
    let body_len = head.get_u32() as usize;
    let total = 4 + body_len;
    if bytes.len() < total {
        return Err(short());
    }
    let mut buf = &bytes[4..total];

    if buf.remaining() < 2 + 8 + 4 + 2 + 2 + 4 + 4 + 4 + 4 + 2 + 2 + 1 + 2 {
        return Err(short());
    }
    let opcode = buf.get_u16();
    let scn = Scn(buf.get_u64());
    let sub_scn = buf.get_u32();
    let usn = buf.get_u16();
    let slot_id = buf.get_u16();
    let seq = buf.get_u32();
    let obj = buf.get_u32();
    let data_obj = buf.get_u32();
    let bdba = buf.get_u32();
    let slot = buf.get_u16();
    let column_count = buf.get_u16();
    let flow_bits = FlowBits::from_byte(buf.get_u8());
    let field_count = buf.get_u16() as usize;

    if buf.remaining() < field_count * 8 + 4 {
        return Err(short());
    }
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        let pos = buf.get_u32();
        let length = buf.get_u32();
        fields.push(Field { pos, length });
    }
    let payload_len = buf.get_u32() as usize;
    if buf.remaining() < payload_len {
        return Err(short());
    }
    let payload = buf[..payload_len].to_vec();

    let rec = RedoLogRecord {
        opcode,
        scn,
        sub_scn,
        xid: Xid::new(usn, slot_id, seq),
        obj,
        data_obj,
        bdba,
        slot,
        column_count,
        flow_bits,
        fields,
        payload,
    };
    Ok((rec, total))
}

/// Paired-undo recognition table for `Transaction::rollback_last`: given the
/// rec2 (redo) opcode, which rec1 (undo) opcodes are accepted as its
/// matching rollback entry.
pub fn paired_undo_accepts(redo_opcode: u16, undo_opcode: u16) -> bool {
    match redo_opcode {
        0x0B05 => undo_opcode == 0x0B05,
        0x0B03 => undo_opcode == 0x0B02,
        0x0B02 => undo_opcode == 0x0B03,
        0x0B06 => undo_opcode == 0x0B06,
        0x0B08 => undo_opcode == 0x0B08,
        0x0B0B => undo_opcode == 0x0B0C,
        0x0B10 => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(opcode: u16, fields: Vec<(u32, u32)>, payload_len: usize) -> RedoLogRecord {
        RedoLogRecord {
            opcode,
            scn: Scn(100),
            sub_scn: 0,
            xid: Xid::new(1, 1, 1),
            obj: 42,
            data_obj: 42,
            bdba: 1,
            slot: 0,
            column_count: fields.len() as u16,
            flow_bits: FlowBits::default(),
            fields: fields.into_iter().map(|(pos, length)| Field { pos, length }).collect(),
            payload: vec![0u8; payload_len],
        }
    }

    #[test]
    fn validate_accepts_aligned_fields() {
        let r = rec(opcode::ROW_INSERT, vec![(0, 4), (4, 8)], 12);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn validate_rejects_misaligned_field() {
        let r = rec(opcode::ROW_INSERT, vec![(2, 4)], 12);
        assert!(r.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_bounds_field() {
        let r = rec(opcode::ROW_INSERT, vec![(8, 8)], 12);
        assert!(r.validate().is_err());
    }

    #[test]
    fn paired_undo_recognizes_known_opcode_pairs() {
        assert!(paired_undo_accepts(0x0B05, 0x0B05));
        assert!(paired_undo_accepts(0x0B03, 0x0B02));
        assert!(paired_undo_accepts(0x0B02, 0x0B03));
        assert!(!paired_undo_accepts(0x0B03, 0x0B05));
        assert!(paired_undo_accepts(0x0B10, 0xFFFF));
    }

    #[test]
    fn flow_bits_byte_roundtrips() {
        let fb = FlowBits { first: true, last: false, prev: true, next: false };
        assert_eq!(FlowBits::from_byte(fb.to_byte()), fb);
    }

    #[test]
    fn encode_decode_roundtrips_a_row_record() {
        let r = rec(opcode::ROW_INSERT, vec![(0, 4), (4, 8)], 12);
        let framed = encode(&r);
        let (back, consumed) = decode(&framed).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(back.opcode, r.opcode);
        assert_eq!(back.scn, r.scn);
        assert_eq!(back.xid, r.xid);
        assert_eq!(back.fields.len(), r.fields.len());
        assert_eq!(back.payload, r.payload);
    }

    #[test]
    fn decode_two_consecutive_frames() {
        let a = encode(&rec(opcode::ROW_INSERT, vec![], 0));
        let b = encode(&rec(opcode::TX_COMMIT, vec![], 0));
        let mut combined = a.clone();
        combined.extend_from_slice(&b);
        let (first, n1) = decode(&combined).unwrap();
        assert_eq!(first.opcode, opcode::ROW_INSERT);
        let (second, _) = decode(&combined[n1..]).unwrap();
        assert_eq!(second.opcode, opcode::TX_COMMIT);
    }

    #[test]
    fn decode_rejects_truncated_frame() {
        let framed = encode(&rec(opcode::ROW_INSERT, vec![(0, 4)], 4));
        assert!(decode(&framed[..framed.len() - 2]).is_err());
    }
}
