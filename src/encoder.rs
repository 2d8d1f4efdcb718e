//! Oracle value decoding and the JSON payload envelope.
//!
//! `parse_number`/`parse_string` are a direct port of the packed-decimal and
//! charset-decode routines in `original_source/src/OutputBuffer.h`, kept in
//! a "decode into a reusable scratch buffer" shape via `String::push`
//! instead of a C-style `valueBufferAppend`.

use crate::error::{CdcError, Result};
use crate::scn::{RowId, Scn, Xid};
use crate::schema::OracleObject;
use serde::Serialize;
use serde_json::{json, Value};

/// Decodes Oracle's packed-decimal `NUMBER` wire format into its canonical
/// decimal text form. See `original_source/src/OutputBuffer.h::parseNumber`.
pub fn parse_number(data: &[u8]) -> Result<String> {
    if data.is_empty() {
        return Err(CdcError::RedoFormat("empty NUMBER field".into()));
    }
    let mut out = String::new();
    let digits_byte = data[0];

    if digits_byte == 0x80 {
        out.push('0');
        return Ok(out);
    }

    let j_max = data.len() as i64 - 1;
    if j_max < 1 {
        return Err(CdcError::RedoFormat("truncated NUMBER field".into()));
    }

    if digits_byte > 0x80 {
        let mut j: i64 = 1;
        let mut digits = digits_byte;
        let mut zeros = 0u32;
        if digits <= 0xC0 {
            out.push('0');
            zeros = (0xC0 - digits) as u32;
        } else {
            digits -= 0xC0;
            let value = data[j as usize].wrapping_sub(1);
            push_digit_pair(&mut out, value, true);
            j += 1;
            digits -= 1;
            while digits > 0 {
                let value = if j <= j_max {
                    let v = data[j as usize].wrapping_sub(1);
                    j += 1;
                    v
                } else {
                    0
                };
                push_digit_pair(&mut out, value, false);
                digits -= 1;
            }
        }
        if j <= j_max {
            out.push('.');
            for _ in 0..zeros {
                out.push_str("00");
            }
            while j <= j_max - 1 {
                let value = data[j as usize].wrapping_sub(1);
                push_digit_pair(&mut out, value, false);
                j += 1;
            }
            let value = data[j as usize].wrapping_sub(1);
            out.push((b'0' + value / 10) as char);
            if value % 10 != 0 {
                out.push((b'0' + value % 10) as char);
            }
        }
    } else {
        out.push('-');
        let mut j: i64 = 1;
        let mut j_max = j_max;
        if data[j_max as usize] == 0x66 {
            j_max -= 1;
        }
        let mut digits = digits_byte;
        let mut zeros = 0u32;
        if digits >= 0x3F {
            out.push('0');
            zeros = (digits - 0x3F) as u32;
        } else {
            digits = 0x3F - digits;
            let value = 101u16.wrapping_sub(data[j as usize] as u16) as u8;
            push_digit_pair(&mut out, value, true);
            j += 1;
            digits -= 1;
            while digits > 0 {
                let value = if j <= j_max {
                    let v = 101u16.wrapping_sub(data[j as usize] as u16) as u8;
                    j += 1;
                    v
                } else {
                    0
                };
                push_digit_pair(&mut out, value, false);
                digits -= 1;
            }
        }
        if j <= j_max {
            out.push('.');
            for _ in 0..zeros {
                out.push_str("00");
            }
            while j <= j_max - 1 {
                let value = 101u16.wrapping_sub(data[j as usize] as u16) as u8;
                push_digit_pair(&mut out, value, false);
                j += 1;
            }
            let value = 101u16.wrapping_sub(data[j as usize] as u16) as u8;
            out.push((b'0' + value / 10) as char);
            if value % 10 != 0 {
                out.push((b'0' + value % 10) as char);
            }
        }
    }
    Ok(out)
}

/// A single-digit value appends as one char if `< 10` and `first`, else as
/// a two-digit pair — matching the C++ `if (value < 10) ... else ...`
/// special case for the leading digit only.
fn push_digit_pair(out: &mut String, value: u8, first: bool) {
    if first && value < 10 {
        out.push((b'0' + value) as char);
    } else {
        out.push((b'0' + value / 10) as char);
        out.push((b'0' + value % 10) as char);
    }
}

/// Decodes a character column. Full per-charset tables are out of scope;
/// bytes in the common single-byte charsets decode as Latin-1-to-UTF-8,
/// which is lossless for the ASCII range that dominates schema/table
/// identifiers and test data.
pub fn parse_string(data: &[u8], _charset_id: u16) -> String {
    data.iter().map(|&b| b as char).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Insert,
    Update,
    Delete,
}

impl RowOp {
    fn code(self) -> &'static str {
        match self {
            RowOp::Insert => "c",
            RowOp::Update => "u",
            RowOp::Delete => "d",
        }
    }
}

pub struct DecodedRow {
    pub op: RowOp,
    pub rowid: RowId,
    pub before: Vec<(String, Value)>,
    pub after: Vec<(String, Value)>,
}

fn column_value(raw: &[u8], type_no: u16, charset_id: u16) -> Value {
    match type_no {
        2 => match parse_number(raw) {
            Ok(n) => json!(n),
            Err(_) => json!("?"),
        },
        1 | 96 => json!(parse_string(raw, charset_id)),
        _ => json!("?"),
    }
}

/// Builds one payload item for a row-level DML, in the
/// `{op, schema, rid, before, after}` shape.
pub fn encode_row(object: &OracleObject, row: &DecodedRow) -> Value {
    let mut item = json!({
        "op": row.op.code(),
        "schema": { "owner": object.owner, "table": object.table },
        "rid": row.rowid.to_base64(),
    });
    if !row.before.is_empty() {
        let before: serde_json::Map<String, Value> = row.before.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        item["before"] = Value::Object(before);
    }
    if !row.after.is_empty() {
        let after: serde_json::Map<String, Value> = row.after.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        item["after"] = Value::Object(after);
    }
    item
}

pub fn encode_raw_column(object: &OracleObject, seg_col_no: u32, raw: &[u8]) -> Option<(String, Value)> {
    let col = object.columns.iter().find(|c| c.seg_col_no == seg_col_no)?;
    Some((col.name.clone(), column_value(raw, col.type_no, col.charset_id)))
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub scn: String,
    pub tm: String,
    pub xid: String,
    pub payload: Vec<Value>,
}

pub fn encode_envelope(scn: Scn, tm: chrono::DateTime<chrono::Utc>, xid: Xid, payload: Vec<Value>) -> Envelope {
    Envelope {
        scn: format!("{scn}"),
        tm: tm.to_rfc3339(),
        xid: xid.to_string(),
        payload,
    }
}

pub fn begin_item() -> Value {
    json!({ "op": "begin" })
}

pub fn commit_item() -> Value {
    json!({ "op": "commit" })
}

pub fn chkpt_item(scn: Scn) -> Value {
    json!({ "op": "chkpt", "scn": format!("{scn}") })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_number_zero() {
        assert_eq!(parse_number(&[0x80]).unwrap(), "0");
    }

    #[test]
    fn parse_number_small_positive_integer() {
        // 5 encodes as digits=0xC1, mantissa digit data[1]=6 (value=5, +1 offset).
        let encoded = [0xC1u8, 0x06];
        assert_eq!(parse_number(&encoded).unwrap(), "5");
    }

    #[test]
    fn parse_number_rejects_empty() {
        assert!(parse_number(&[]).is_err());
    }

    #[test]
    fn parse_string_is_ascii_passthrough() {
        assert_eq!(parse_string(b"ABC", 0), "ABC");
    }

    #[test]
    fn encode_row_includes_rid_and_schema() {
        let object = OracleObject {
            owner: "U".into(),
            table: "T".into(),
            obj: 1,
            data_obj: 1,
            columns: Vec::new(),
            pk_column_count: 0,
            supplemental_log_column_count: 0,
        };
        let row = DecodedRow {
            op: RowOp::Insert,
            rowid: RowId::new(1, 1, 0),
            before: Vec::new(),
            after: vec![("A".into(), json!("1"))],
        };
        let item = encode_row(&object, &row);
        assert_eq!(item["op"], "c");
        assert_eq!(item["after"]["A"], "1");
    }
}
