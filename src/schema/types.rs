//! Dictionary row types mirrored from Oracle's SYS tables. Grounded on
//! `original_source/src/Sys*.cpp` for field shapes and on `catalog/mod.rs`
//! for the rowid-keyed table idiom.

use crate::scn::RowId;
use serde::{Deserialize, Serialize};

/// A 128-bit flag field, split into two `u64` halves with explicit
/// `is_set(bit)` and `set(hi, lo)` methods; serializes as a decimal
/// concatenation to preserve JSON compatibility with existing snapshot
/// files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Flags128 {
    pub hi: u64,
    pub lo: u64,
}

impl Flags128 {
    pub fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }

    pub fn set(&mut self, hi: u64, lo: u64) {
        self.hi = hi;
        self.lo = lo;
    }

    /// `bit` is a global bit index 0..127; bits 64..127 live in `hi`.
    pub fn is_set(&self, bit: u32) -> bool {
        if bit >= 128 {
            return false;
        }
        if bit < 64 {
            self.lo & (1u64 << bit) != 0
        } else {
            self.hi & (1u64 << (bit - 64)) != 0
        }
    }

    /// Decimal-concatenation form used by snapshot files: `"{hi}{lo}"`
    /// zero-padded so it round-trips unambiguously.
    pub fn to_decimal_string(&self) -> String {
        format!("{:020}{:020}", self.hi, self.lo)
    }
}

macro_rules! sys_row {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            pub rowid: RowId,
            $(pub $field: $ty,)*
        }
    };
}

sys_row!(SysUser {
    user_no: u32,
    name: String,
    spare1: Flags128,
});

sys_row!(SysObj {
    owner_no: u32,
    obj: u32,
    data_obj: u32,
    type_no: u32,
    name: String,
    flags: Flags128,
    single: bool,
});

sys_row!(SysTab {
    obj: u32,
    data_obj: u32,
    ts_no: u32,
    file_no: u32,
    block_no: u32,
    clu_cols: u32,
    flags: Flags128,
    property: Flags128,
});

sys_row!(SysCol {
    obj: u32,
    col_no: u32,
    seg_col_no: u32,
    int_col_no: u32,
    name: String,
    type_no: u16,
    length: u32,
    precision: Option<i32>,
    scale: Option<i32>,
    charset_form: u8,
    charset_id: u16,
    nullable: bool,
    property: Flags128,
});

sys_row!(SysCCol {
    con: u32,
    int_col_no: u32,
    obj: u32,
    spare1: Flags128,
});

sys_row!(SysCDef {
    con: u32,
    obj: u32,
    type_no: u16,
});

sys_row!(SysECol {
    tab_obj: u32,
    col_num: u32,
    guard_id: i32,
});

sys_row!(SysDeferredStg {
    obj: u32,
    flags_stg: Flags128,
});

sys_row!(SysTabPart {
    obj: u32,
    data_obj: u32,
    bo: u32,
});

sys_row!(SysTabSubPart {
    obj: u32,
    data_obj: u32,
    p_obj: u32,
});

sys_row!(SysTabComPart {
    obj: u32,
    data_obj: u32,
    bo: u32,
});

/// Object type numbers (SysTab.type#/SysObj.type#) relevant to
/// materialization rules.
pub mod obj_type {
    pub const TABLE: u32 = 2;
}

/// Constraint type numbers (SysCDef.type#) used by the materialization
/// rules: 2 = primary key; 12/14/17 = supplemental-log constraints.
pub mod constraint_type {
    pub const PRIMARY_KEY: u16 = 2;
    pub const SUPPLEMENTAL_LOG: [u16; 3] = [12, 14, 17];
}

/// Fixed dictionary obj# for the captured SYS tables, constant across every
/// stock Oracle database and used to recognize a row's target table without
/// a dictionary lookup of its own.
pub mod dict_obj {
    pub const USER: u32 = 11;
    pub const TAB: u32 = 2;
    pub const OBJ: u32 = 18;
    pub const COL: u32 = 20;
    pub const CDEF: u32 = 54;
    pub const CCOL: u32 = 55;
    pub const ECOL: u32 = 110;
}

/// A materialized, user-visible object built by joining the Sys tables at
/// refresh time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleObject {
    pub owner: String,
    pub table: String,
    pub obj: u32,
    pub data_obj: u32,
    pub columns: Vec<ColumnDef>,
    pub pk_column_count: usize,
    pub supplemental_log_column_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub seg_col_no: u32,
    pub type_no: u16,
    pub length: u32,
    pub charset_id: u16,
    pub nullable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags128_bit_halves() {
        let mut f = Flags128::default();
        f.set(0b10, 0b01);
        assert!(f.is_set(0));
        assert!(!f.is_set(1));
        assert!(f.is_set(65));
        assert!(!f.is_set(64));
    }

    #[test]
    fn flags128_decimal_roundtrip_shape() {
        let f = Flags128::new(1, 2);
        let s = f.to_decimal_string();
        assert_eq!(s.len(), 40);
    }
}
