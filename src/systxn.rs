//! System-Transaction engine: interprets DML against captured
//! SYS.xxx dictionary tables as schema mutations.
//!
//! Grounded on `catalog/mod.rs`'s pattern of translating a generic DML event
//! into a typed table mutation, and on `original_source/src/SystemTransaction.cpp`
//! for the insert/update/delete/rebuild sequencing.

use crate::encoder::{parse_number, parse_string};
use crate::error::{CdcError, Result};
use crate::scn::{RowId, Scn};
use crate::schema::cache::SysMutation;
use crate::schema::types::*;
use crate::schema::SchemaCache;
use std::collections::HashMap;

/// The SYS table a DML pair targets, keyed by its fixed dictionary obj#.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SysTableKind {
    User,
    Obj,
    Tab,
    Col,
    CCol,
    CDef,
    ECol,
}

/// Resolves a row's target dictionary table from the fixed obj# its redo
/// vector carries. `None` means the row belongs to a regular captured
/// table, not the dictionary itself.
pub fn sys_table_kind(obj: u32) -> Option<SysTableKind> {
    match obj {
        dict_obj::USER => Some(SysTableKind::User),
        dict_obj::OBJ => Some(SysTableKind::Obj),
        dict_obj::TAB => Some(SysTableKind::Tab),
        dict_obj::COL => Some(SysTableKind::Col),
        dict_obj::CCOL => Some(SysTableKind::CCol),
        dict_obj::CDEF => Some(SysTableKind::CDef),
        dict_obj::ECOL => Some(SysTableKind::ECol),
        _ => None,
    }
}

/// Fixed column order each dictionary table's redo vector is assumed to
/// carry its fields in, paired with the Oracle type number needed to decode
/// them. This stands in for the real per-table column catalog a live
/// dictionary bootstrap would supply (out of scope), the same kind of fixed
/// positional convention `reader::header::parse` documents for file headers.
fn field_layout(kind: SysTableKind) -> &'static [(&'static str, u16)] {
    match kind {
        SysTableKind::User => &[("USER#", 2), ("NAME", 1)],
        SysTableKind::Obj => &[("OWNER#", 2), ("OBJ#", 2), ("DATAOBJ#", 2), ("TYPE#", 2), ("NAME", 1)],
        SysTableKind::Tab => &[("OBJ#", 2), ("DATAOBJ#", 2), ("TS#", 2), ("FILE#", 2), ("BLOCK#", 2), ("CLUCOLS", 2)],
        SysTableKind::Col => &[
            ("OBJ#", 2),
            ("COL#", 2),
            ("SEGCOL#", 2),
            ("INTCOL#", 2),
            ("NAME", 1),
            ("TYPE#", 2),
            ("LENGTH", 2),
            ("CHARSETFORM", 2),
            ("CHARSETID", 2),
            ("NULL$", 2),
        ],
        SysTableKind::CCol => &[("CON#", 2), ("INTCOL#", 2), ("OBJ#", 2)],
        SysTableKind::CDef => &[("CON#", 2), ("OBJ#", 2), ("TYPE#", 2)],
        SysTableKind::ECol => &[("TABOBJ#", 2), ("COLNUM", 2), ("GUARD_ID", 2)],
    }
}

/// Decodes one dictionary row's fields by position, per [`field_layout`],
/// ignoring any trailing fields the layout doesn't name.
pub fn decode_dictionary_row(kind: SysTableKind, rec: &crate::redo::RedoLogRecord) -> Result<ColumnValues> {
    let layout = field_layout(kind);
    let raw: Vec<(&str, &[u8], u16)> = layout
        .iter()
        .enumerate()
        .filter_map(|(i, (name, type_no))| rec.field_bytes(i).map(|bytes| (*name, bytes, *type_no)))
        .collect();
    decode_columns(&raw)
}

/// Raw, already-decoded column values for one row image (before or after),
/// keyed by column name. Numeric/string decoding happens once up front via
/// [`parse_number`]/[`parse_string`], mirroring the JSON encoder's decoders.
pub type ColumnValues = HashMap<String, String>;

pub fn decode_columns(raw: &[(&str, &[u8], u16)]) -> Result<ColumnValues> {
    let mut out = ColumnValues::new();
    for (name, bytes, type_no) in raw {
        let value = match type_no {
            2 => parse_number(bytes)?,
            1 | 96 => parse_string(bytes, 0),
            other => return Err(CdcError::Runtime(format!("unexpected column type {other} in dictionary row"))),
        };
        out.insert((*name).to_string(), value);
    }
    Ok(out)
}

fn get<'a>(cols: &'a ColumnValues, name: &str) -> Result<&'a str> {
    cols.get(name)
        .map(|s| s.as_str())
        .ok_or_else(|| CdcError::Runtime(format!("missing dictionary column {name}")))
}

fn get_u32(cols: &ColumnValues, name: &str) -> Result<u32> {
    get(cols, name)?
        .parse()
        .map_err(|_| CdcError::Runtime(format!("dictionary column {name} is not a valid integer")))
}

fn get_u16(cols: &ColumnValues, name: &str) -> Result<u16> {
    Ok(get_u32(cols, name)? as u16)
}

pub struct SystemTransactionEngine<'a> {
    cache: &'a SchemaCache,
}

impl<'a> SystemTransactionEngine<'a> {
    pub fn new(cache: &'a SchemaCache) -> Self {
        Self { cache }
    }

    /// Translates one decoded DML row into the typed mutation the schema
    /// cache understands, and applies it.
    pub fn insert(&self, kind: SysTableKind, rowid: RowId, after: &ColumnValues) -> Result<()> {
        let mutation = match kind {
            SysTableKind::User => SysMutation::InsertUser(SysUser {
                rowid,
                user_no: get_u32(after, "USER#")?,
                name: get(after, "NAME")?.to_string(),
                spare1: Flags128::default(),
            }),
            SysTableKind::Obj => SysMutation::InsertObj(SysObj {
                rowid,
                owner_no: get_u32(after, "OWNER#")?,
                obj: get_u32(after, "OBJ#")?,
                data_obj: get_u32(after, "DATAOBJ#")?,
                type_no: get_u32(after, "TYPE#")?,
                name: get(after, "NAME")?.to_string(),
                flags: Flags128::default(),
                single: false,
            }),
            SysTableKind::Tab => SysMutation::InsertTab(SysTab {
                rowid,
                obj: get_u32(after, "OBJ#")?,
                data_obj: get_u32(after, "DATAOBJ#")?,
                ts_no: get_u32(after, "TS#")?,
                file_no: get_u32(after, "FILE#")?,
                block_no: get_u32(after, "BLOCK#")?,
                clu_cols: get_u32(after, "CLUCOLS")?,
                flags: Flags128::default(),
                property: Flags128::default(),
            }),
            SysTableKind::Col => SysMutation::InsertCol(SysCol {
                rowid,
                obj: get_u32(after, "OBJ#")?,
                col_no: get_u32(after, "COL#")?,
                seg_col_no: get_u32(after, "SEGCOL#")?,
                int_col_no: get_u32(after, "INTCOL#")?,
                name: get(after, "NAME")?.to_string(),
                type_no: get_u16(after, "TYPE#")?,
                length: get_u32(after, "LENGTH")?,
                precision: None,
                scale: None,
                charset_form: get_u16(after, "CHARSETFORM").unwrap_or(0) as u8,
                charset_id: get_u16(after, "CHARSETID").unwrap_or(0),
                nullable: get(after, "NULL$").map(|v| v == "0").unwrap_or(true),
                property: Flags128::default(),
            }),
            SysTableKind::CCol => SysMutation::InsertCCol(SysCCol {
                rowid,
                con: get_u32(after, "CON#")?,
                int_col_no: get_u32(after, "INTCOL#")?,
                obj: get_u32(after, "OBJ#")?,
                spare1: Flags128::default(),
            }),
            SysTableKind::CDef => SysMutation::InsertCDef(SysCDef {
                rowid,
                con: get_u32(after, "CON#")?,
                obj: get_u32(after, "OBJ#")?,
                type_no: get_u16(after, "TYPE#")?,
            }),
            SysTableKind::ECol => SysMutation::InsertECol(SysECol {
                rowid,
                tab_obj: get_u32(after, "TABOBJ#")?,
                col_num: get_u32(after, "COLNUM")?,
                guard_id: get_u32(after, "GUARD_ID").unwrap_or(0) as i32,
            }),
        };
        self.cache.apply_sys_mutation(rowid, mutation);
        Ok(())
    }

    /// Oracle's after-image always carries the full row, so an update builds the
    /// same typed row as an insert but dispatches through the `Update*`
    /// mutation, which re-homes the row in any secondary index whose key
    /// changed.
    pub fn update(&self, kind: SysTableKind, rowid: RowId, after: &ColumnValues) -> Result<()> {
        let mutation = match kind {
            SysTableKind::User => SysMutation::UpdateUser(SysUser {
                rowid,
                user_no: get_u32(after, "USER#")?,
                name: get(after, "NAME")?.to_string(),
                spare1: Flags128::default(),
            }),
            SysTableKind::Obj => SysMutation::UpdateObj(SysObj {
                rowid,
                owner_no: get_u32(after, "OWNER#")?,
                obj: get_u32(after, "OBJ#")?,
                data_obj: get_u32(after, "DATAOBJ#")?,
                type_no: get_u32(after, "TYPE#")?,
                name: get(after, "NAME")?.to_string(),
                flags: Flags128::default(),
                single: false,
            }),
            SysTableKind::Tab => SysMutation::UpdateTab(SysTab {
                rowid,
                obj: get_u32(after, "OBJ#")?,
                data_obj: get_u32(after, "DATAOBJ#")?,
                ts_no: get_u32(after, "TS#")?,
                file_no: get_u32(after, "FILE#")?,
                block_no: get_u32(after, "BLOCK#")?,
                clu_cols: get_u32(after, "CLUCOLS")?,
                flags: Flags128::default(),
                property: Flags128::default(),
            }),
            SysTableKind::Col => SysMutation::UpdateCol(SysCol {
                rowid,
                obj: get_u32(after, "OBJ#")?,
                col_no: get_u32(after, "COL#")?,
                seg_col_no: get_u32(after, "SEGCOL#")?,
                int_col_no: get_u32(after, "INTCOL#")?,
                name: get(after, "NAME")?.to_string(),
                type_no: get_u16(after, "TYPE#")?,
                length: get_u32(after, "LENGTH")?,
                precision: None,
                scale: None,
                charset_form: get_u16(after, "CHARSETFORM").unwrap_or(0) as u8,
                charset_id: get_u16(after, "CHARSETID").unwrap_or(0),
                nullable: get(after, "NULL$").map(|v| v == "0").unwrap_or(true),
                property: Flags128::default(),
            }),
            SysTableKind::CCol => SysMutation::UpdateCCol(SysCCol {
                rowid,
                con: get_u32(after, "CON#")?,
                int_col_no: get_u32(after, "INTCOL#")?,
                obj: get_u32(after, "OBJ#")?,
                spare1: Flags128::default(),
            }),
            SysTableKind::CDef => SysMutation::UpdateCDef(SysCDef {
                rowid,
                con: get_u32(after, "CON#")?,
                obj: get_u32(after, "OBJ#")?,
                type_no: get_u16(after, "TYPE#")?,
            }),
            SysTableKind::ECol => {
                // ECol has no Update variant (guard-column mapping is
                // immutable after insert); treat as delete+insert.
                self.delete(kind, rowid, after)?;
                return self.insert(kind, rowid, after);
            }
        };
        self.cache.apply_sys_mutation(rowid, mutation);
        Ok(())
    }

    pub fn delete(&self, kind: SysTableKind, rowid: RowId, before: &ColumnValues) -> Result<()> {
        let mutation = match kind {
            SysTableKind::User => SysMutation::DeleteUser(get_u32(before, "USER#")?),
            SysTableKind::Obj => SysMutation::DeleteObj(get_u32(before, "OBJ#")?),
            SysTableKind::Tab => SysMutation::DeleteTab(get_u32(before, "OBJ#")?),
            SysTableKind::Col => SysMutation::DeleteCol(get_u32(before, "OBJ#")?),
            SysTableKind::CCol => SysMutation::DeleteCCol(get_u32(before, "OBJ#")?),
            SysTableKind::CDef => SysMutation::DeleteCDef(get_u32(before, "OBJ#")?),
            SysTableKind::ECol => SysMutation::DeleteECol(get_u32(before, "TABOBJ#")?),
        };
        self.cache.apply_sys_mutation(rowid, mutation);
        Ok(())
    }

    /// Rebuilds affected objects and persists a snapshot tagged at the
    /// commit SCN.
    pub fn finish_commit(&self, scn: Scn) -> Result<()> {
        self.cache.rebuild_maps();
        self.cache.write_snapshot(scn, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cache() -> SchemaCache {
        SchemaCache::new("TESTDB", PathBuf::from("/tmp/does-not-need-to-exist-for-this-test"))
    }

    fn cols(pairs: &[(&str, &str)]) -> ColumnValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn insert_user_is_visible_by_materialization() {
        let cache = cache();
        let engine = SystemTransactionEngine::new(&cache);
        let rowid = RowId::new(1, 1, 0);
        engine
            .insert(SysTableKind::User, rowid, &cols(&[("USER#", "7"), ("NAME", "APPOWNER")]))
            .unwrap();
        // No direct read accessor is exposed on the engine itself; the
        // insert's visibility to materialize() is covered by
        // schema::cache::tests::materialize_and_check_dict, which seeds the
        // same SysUser shape directly into the cache's table.
    }

    #[test]
    fn delete_requires_key_column() {
        let cache = cache();
        let engine = SystemTransactionEngine::new(&cache);
        let rowid = RowId::new(1, 1, 0);
        let err = engine.delete(SysTableKind::Obj, rowid, &cols(&[])).unwrap_err();
        assert!(matches!(err, CdcError::Runtime(_)));
    }

    #[test]
    fn decode_columns_rejects_unknown_type() {
        let raw: Vec<(&str, &[u8], u16)> = vec![("X", b"abc".as_slice(), 99)];
        assert!(decode_columns(&raw).is_err());
    }

    #[test]
    fn sys_table_kind_recognizes_fixed_obj_numbers() {
        assert_eq!(sys_table_kind(dict_obj::USER), Some(SysTableKind::User));
        assert_eq!(sys_table_kind(dict_obj::COL), Some(SysTableKind::Col));
        assert_eq!(sys_table_kind(99_999), None);
    }

    #[test]
    fn decode_dictionary_row_maps_fixed_field_layout() {
        use crate::redo::{Field, FlowBits};
        use crate::scn::{Scn, Xid};
        // USER$ layout is [USER# (NUMBER), NAME (VARCHAR2)].
        let mut payload = Vec::new();
        payload.extend_from_slice(&[0xC1, 0x08]); // NUMBER encoding of 7
        payload.extend_from_slice(b"APPOWNER");
        let rec = crate::redo::RedoLogRecord {
            opcode: 0x0B02,
            scn: Scn(1),
            sub_scn: 0,
            xid: Xid::new(1, 1, 1),
            obj: dict_obj::USER,
            data_obj: dict_obj::USER,
            bdba: 1,
            slot: 0,
            column_count: 2,
            flow_bits: FlowBits::default(),
            fields: vec![Field { pos: 0, length: 2 }, Field { pos: 2, length: 8 }],
            payload,
        };
        let cols = decode_dictionary_row(SysTableKind::User, &rec).unwrap();
        assert_eq!(cols.get("USER#").map(String::as_str), Some("7"));
        assert_eq!(cols.get("NAME").map(String::as_str), Some("APPOWNER"));
    }
}
