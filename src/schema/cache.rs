//! In-memory replica of the Oracle dictionary subset.
//!
//! Mutated only on the analyzer thread during a transaction commit; the
//! `RwLock`s exist so `checkDict` reads and snapshot writes can share the
//! same type without the caller having to prove single-threaded access,
//! matching `catalog/mod.rs`'s `RwLock<HashMap<...>>` idiom.

use super::element::{ElementOptions, SchemaElement};
use super::snapshot::{load_newest_snapshot, SchemaSnapshotFile};
use super::types::*;
use crate::error::{CdcError, Result};
use crate::scn::{RowId, Scn};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

/// One DML-derived change to a dictionary table, as classified by the
/// System-Transaction engine. Delete variants carry only the
/// owning obj# (or `user_no`/`tab_obj` for tables not keyed by obj#) since
/// the row itself is no longer needed once removed.
pub enum SysMutation {
    InsertUser(SysUser),
    UpdateUser(SysUser),
    DeleteUser(u32),
    InsertObj(SysObj),
    UpdateObj(SysObj),
    DeleteObj(u32),
    InsertTab(SysTab),
    UpdateTab(SysTab),
    DeleteTab(u32),
    InsertCol(SysCol),
    UpdateCol(SysCol),
    DeleteCol(u32),
    InsertCCol(SysCCol),
    UpdateCCol(SysCCol),
    DeleteCCol(u32),
    InsertCDef(SysCDef),
    UpdateCDef(SysCDef),
    DeleteCDef(u32),
    InsertECol(SysECol),
    DeleteECol(u32),
}

/// A generic rowid-keyed dictionary table with one secondary index grouping
/// rows by a semantic key.
struct SysTable<T> {
    by_rowid: HashMap<RowId, T>,
    by_key: HashMap<u32, Vec<RowId>>,
    touched: HashSet<u32>,
}

impl<T> Default for SysTable<T> {
    fn default() -> Self {
        Self {
            by_rowid: HashMap::new(),
            by_key: HashMap::new(),
            touched: HashSet::new(),
        }
    }
}

impl<T: Clone> SysTable<T> {
    fn insert(&mut self, rowid: RowId, key: u32, row: T) {
        self.by_rowid.insert(rowid, row);
        self.by_key.entry(key).or_default().push(rowid);
    }

    fn remove(&mut self, rowid: RowId, key: u32) -> Option<T> {
        self.by_key.entry(key).or_default().retain(|r| *r != rowid);
        self.by_rowid.remove(&rowid)
    }

    fn rekey(&mut self, rowid: RowId, old_key: u32, new_key: u32) {
        self.by_key.entry(old_key).or_default().retain(|r| *r != rowid);
        self.by_key.entry(new_key).or_default().push(rowid);
    }

    fn by_key_rows(&self, key: u32) -> Vec<&T> {
        self.by_key
            .get(&key)
            .into_iter()
            .flatten()
            .filter_map(|r| self.by_rowid.get(r))
            .collect()
    }

    fn touch(&mut self, key: u32) {
        self.touched.insert(key);
    }

    fn len(&self) -> usize {
        self.by_rowid.len()
    }
}

pub struct SchemaCache {
    database: String,
    snapshot_dir: PathBuf,
    users: RwLock<SysTable<SysUser>>,
    objs: RwLock<SysTable<SysObj>>,
    tabs: RwLock<SysTable<SysTab>>,
    cols: RwLock<SysTable<SysCol>>,
    ccols: RwLock<SysTable<SysCCol>>,
    cdefs: RwLock<SysTable<SysCDef>>,
    ecols: RwLock<SysTable<SysECol>>,
    deferred_stg: RwLock<SysTable<SysDeferredStg>>,
    tab_parts: RwLock<SysTable<SysTabPart>>,
    tab_subparts: RwLock<SysTable<SysTabSubPart>>,
    tab_comparts: RwLock<SysTable<SysTabComPart>>,
    elements: RwLock<Vec<SchemaElement>>,
    object_map: RwLock<HashMap<u32, Arc<OracleObject>>>,
    partition_map: RwLock<HashMap<u32, Arc<OracleObject>>>,
}

impl SchemaCache {
    pub fn new(database: impl Into<String>, snapshot_dir: PathBuf) -> Self {
        Self {
            database: database.into(),
            snapshot_dir,
            users: RwLock::default(),
            objs: RwLock::default(),
            tabs: RwLock::default(),
            cols: RwLock::default(),
            ccols: RwLock::default(),
            cdefs: RwLock::default(),
            ecols: RwLock::default(),
            deferred_stg: RwLock::default(),
            tab_parts: RwLock::default(),
            tab_subparts: RwLock::default(),
            tab_comparts: RwLock::default(),
            elements: RwLock::new(Vec::new()),
            object_map: RwLock::new(HashMap::new()),
            partition_map: RwLock::new(HashMap::new()),
        }
    }

    // --- addElement / checkDict / addToDict / removeFromDict ------------

    pub fn add_element(&self, owner_pattern: &str, table_pattern: &str, options: ElementOptions, keys: Option<Vec<String>>) -> Result<()> {
        let owner_re = super::element::compile_pattern(owner_pattern)
            .map_err(|e| CdcError::Configuration(format!("bad owner pattern: {e}")))?;
        let table_re = super::element::compile_pattern(table_pattern)
            .map_err(|e| CdcError::Configuration(format!("bad table pattern: {e}")))?;
        self.elements.write().push(SchemaElement {
            owner_re,
            table_re,
            options,
            keys,
        });
        Ok(())
    }

    /// O(1) lookup used by the analyzer for every DML.
    pub fn check_dict(&self, obj: u32, _data_obj: u32) -> Option<Arc<OracleObject>> {
        if let Some(o) = self.object_map.read().get(&obj) {
            return Some(o.clone());
        }
        self.partition_map.read().get(&obj).cloned()
    }

    pub fn add_to_dict(&self, obj: u32) {
        let materialized = self.materialize(obj);
        if let Some(o) = materialized {
            self.object_map.write().insert(obj, o.clone());
            self.wire_partitions(obj, &o);
        }
    }

    pub fn remove_from_dict(&self, obj: u32) {
        self.object_map.write().remove(&obj);
        self.partition_map.write().retain(|_, v| v.obj != obj);
    }

    fn wire_partitions(&self, base_obj: u32, object: &Arc<OracleObject>) {
        let parts = self.tab_parts.read().by_key_rows(base_obj).iter().map(|p| p.obj).collect::<Vec<_>>();
        let subparts = self.tab_subparts.read().by_key_rows(base_obj).iter().map(|p| p.obj).collect::<Vec<_>>();
        let comparts = self.tab_comparts.read().by_key_rows(base_obj).iter().map(|p| p.obj).collect::<Vec<_>>();
        let mut pm = self.partition_map.write();
        for p in parts.into_iter().chain(subparts).chain(comparts) {
            pm.insert(p, object.clone());
        }
    }

    /// Drop stale `OracleObject`s for touched users/objects and re-materialize
    /// via the registered patterns.
    pub fn rebuild_maps(&self) {
        let touched_objs: Vec<u32> = {
            let objs = self.objs.read();
            objs.touched.iter().copied().collect()
        };
        for obj in &touched_objs {
            self.object_map.write().remove(obj);
            self.partition_map.write().retain(|_, v| v.obj != *obj);
        }
        self.objs.write().touched.clear();

        let candidates: Vec<(u32, u32, String, String)> = {
            let objs = self.objs.read();
            let users = self.users.read();
            objs.by_rowid
                .values()
                .filter(|o| o.type_no == obj_type::TABLE)
                .filter_map(|o| {
                    users
                        .by_rowid
                        .values()
                        .find(|u| u.user_no == o.owner_no)
                        .map(|u| (o.obj, o.data_obj, u.name.clone(), o.name.clone()))
                })
                .collect()
        };

        let to_capture: Vec<u32> = {
            let elements = self.elements.read();
            candidates
                .into_iter()
                .filter(|(_, _, owner, table)| elements.iter().any(|e| e.matches(owner, table)))
                .map(|(obj, ..)| obj)
                .collect()
        };
        for obj in to_capture {
            self.add_to_dict(obj);
        }
    }

    /// Build (or rebuild) the `OracleObject` for `obj` by joining the Sys
    /// tables and applying the materialization rules below.
    fn materialize(&self, obj: u32) -> Option<Arc<OracleObject>> {
        let tab = {
            let tabs = self.tabs.read();
            tabs.by_key_rows(obj).into_iter().next().cloned()
        }?;
        let sys_obj = {
            let objs = self.objs.read();
            objs.by_key_rows(obj).into_iter().next().cloned()
        }?;

        let is_binary = tab.property.is_set(0);
        let is_iot = tab.property.is_set(1);
        let is_nested = tab.property.is_set(2);
        let is_partitioned = tab.flags.is_set(0);
        let is_compressed_initial = tab.flags.is_set(1);
        let is_temporary = sys_obj.flags.is_set(0);

        if is_binary || is_iot || is_temporary || is_nested || (!is_partitioned && is_compressed_initial) {
            return None;
        }

        let owner = {
            let users = self.users.read();
            users.by_rowid.values().find(|u| u.user_no == sys_obj.owner_no).map(|u| u.name.clone())
        }?;

        let mut columns = Vec::new();
        {
            let cols = self.cols.read();
            let mut rows: Vec<&SysCol> = cols.by_key_rows(obj);
            rows.retain(|c| c.seg_col_no > 0);
            rows.sort_by_key(|c| c.seg_col_no);
            for c in rows {
                let charset_id = resolve_charset(c.charset_form, c.charset_id);
                if charset_id.is_none() && matches!(c.type_no, 1 | 96) {
                    return None;
                }
                columns.push(ColumnDef {
                    name: c.name.clone(),
                    seg_col_no: c.seg_col_no,
                    type_no: c.type_no,
                    length: c.length,
                    charset_id: charset_id.unwrap_or(c.charset_id),
                    nullable: c.nullable,
                });
            }
        }

        let element = {
            let elements = self.elements.read();
            elements.iter().find(|e| e.matches(&owner, &sys_obj.name)).map(|e| e.keys.clone())
        };

        let pk_column_count = match element.flatten() {
            Some(keys) => keys.len(),
            None => count_pk_columns(&*self.ccols.read(), &*self.cdefs.read(), obj),
        };
        let supplemental_log_column_count =
            count_supplemental_columns(&*self.ccols.read(), &*self.cdefs.read(), obj);

        Some(Arc::new(OracleObject {
            owner,
            table: sys_obj.name,
            obj,
            data_obj: tab.data_obj,
            columns,
            pk_column_count,
            supplemental_log_column_count,
        }))
    }

    pub fn snapshot_dir(&self) -> &PathBuf {
        &self.snapshot_dir
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn object_count(&self) -> usize {
        self.object_map.read().len()
    }

    /// Applies one DML-derived mutation to a dictionary table, marking the owning obj# touched so the next
    /// `rebuild_maps()` re-materializes it.
    pub fn apply_sys_mutation(&self, rowid: RowId, mutation: SysMutation) {
        match mutation {
            SysMutation::InsertUser(row) => {
                let key = row.user_no;
                self.users.write().insert(rowid, key, row);
            }
            SysMutation::UpdateUser(row) => {
                let key = row.user_no;
                self.rekey_and_replace(&self.users, rowid, key, row);
            }
            SysMutation::DeleteUser(user_no) => {
                let mut t = self.users.write();
                t.by_rowid.remove(&rowid);
                t.by_key.entry(user_no).or_default().retain(|r| *r != rowid);
            }
            SysMutation::InsertObj(row) => {
                let obj = row.obj;
                self.objs.write().insert(rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::UpdateObj(row) => {
                let obj = row.obj;
                self.rekey_and_replace(&self.objs, rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::DeleteObj(obj) => {
                self.objs.write().by_rowid.remove(&rowid);
                self.objs.write().touch(obj);
            }
            SysMutation::InsertTab(row) => {
                let obj = row.obj;
                self.tabs.write().insert(rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::UpdateTab(row) => {
                let obj = row.obj;
                self.rekey_and_replace(&self.tabs, rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::DeleteTab(obj) => {
                self.tabs.write().by_rowid.remove(&rowid);
                self.objs.write().touch(obj);
            }
            SysMutation::InsertCol(row) => {
                let obj = row.obj;
                self.cols.write().insert(rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::UpdateCol(row) => {
                let obj = row.obj;
                self.rekey_and_replace(&self.cols, rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::DeleteCol(obj) => {
                self.cols.write().by_rowid.remove(&rowid);
                self.objs.write().touch(obj);
            }
            SysMutation::InsertCCol(row) => {
                let obj = row.obj;
                self.ccols.write().insert(rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::UpdateCCol(row) => {
                let obj = row.obj;
                self.rekey_and_replace(&self.ccols, rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::DeleteCCol(obj) => {
                self.ccols.write().by_rowid.remove(&rowid);
                self.objs.write().touch(obj);
            }
            SysMutation::InsertCDef(row) => {
                let obj = row.obj;
                self.cdefs.write().insert(rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::UpdateCDef(row) => {
                let obj = row.obj;
                self.rekey_and_replace(&self.cdefs, rowid, obj, row);
                self.objs.write().touch(obj);
            }
            SysMutation::DeleteCDef(obj) => {
                self.cdefs.write().by_rowid.remove(&rowid);
                self.objs.write().touch(obj);
            }
            SysMutation::InsertECol(row) => {
                let tab_obj = row.tab_obj;
                self.ecols.write().insert(rowid, tab_obj, row);
                self.objs.write().touch(tab_obj);
            }
            SysMutation::DeleteECol(tab_obj) => {
                self.ecols.write().by_rowid.remove(&rowid);
                self.objs.write().touch(tab_obj);
            }
        }
    }

    /// Replaces the row at `rowid` and re-homes it to `new_key` in the
    /// secondary index, scanning all buckets for its previous entry since
    /// the caller only knows the row's new key.
    fn rekey_and_replace<T: Clone>(&self, table: &RwLock<SysTable<T>>, rowid: RowId, new_key: u32, row: T) {
        let mut t = table.write();
        for bucket in t.by_key.values_mut() {
            bucket.retain(|r| *r != rowid);
        }
        t.by_rowid.insert(rowid, row);
        t.by_key.entry(new_key).or_default().push(rowid);
    }

    pub fn load_snapshot(&self, scn: Scn) -> Result<bool> {
        let Some(file) = load_newest_snapshot(&self.snapshot_dir, &self.database, scn)? else {
            return Ok(false);
        };
        self.apply_snapshot(file);
        self.rebuild_maps();
        Ok(true)
    }

    fn apply_snapshot(&self, file: SchemaSnapshotFile) {
        *self.users.write() = from_rows(file.users, |u| u.user_no);
        *self.objs.write() = from_rows(file.objs, |o| o.obj);
        *self.tabs.write() = from_rows(file.tabs, |t| t.obj);
        *self.cols.write() = from_rows(file.cols, |c| c.obj);
        *self.ccols.write() = from_rows(file.ccols, |c| c.obj);
        *self.cdefs.write() = from_rows(file.cdefs, |c| c.obj);
        *self.ecols.write() = from_rows(file.ecols, |c| c.tab_obj);
        *self.deferred_stg.write() = from_rows(file.deferred_stg, |d| d.obj);
        *self.tab_parts.write() = from_rows(file.tab_parts, |p| p.bo);
        *self.tab_subparts.write() = from_rows(file.tab_subparts, |p| p.p_obj);
        *self.tab_comparts.write() = from_rows(file.tab_comparts, |p| p.bo);
    }

    pub fn write_snapshot(&self, scn: Scn, keep: bool) -> Result<()> {
        let file = SchemaSnapshotFile {
            database: self.database.clone(),
            scn,
            users: self.users.read().by_rowid.values().cloned().collect(),
            objs: self.objs.read().by_rowid.values().cloned().collect(),
            tabs: self.tabs.read().by_rowid.values().cloned().collect(),
            cols: self.cols.read().by_rowid.values().cloned().collect(),
            ccols: self.ccols.read().by_rowid.values().cloned().collect(),
            cdefs: self.cdefs.read().by_rowid.values().cloned().collect(),
            ecols: self.ecols.read().by_rowid.values().cloned().collect(),
            deferred_stg: self.deferred_stg.read().by_rowid.values().cloned().collect(),
            tab_parts: self.tab_parts.read().by_rowid.values().cloned().collect(),
            tab_subparts: self.tab_subparts.read().by_rowid.values().cloned().collect(),
            tab_comparts: self.tab_comparts.read().by_rowid.values().cloned().collect(),
        };
        super::snapshot::write_snapshot(&self.snapshot_dir, &file, keep)
    }
}

fn from_rows<T: Clone>(rows: Vec<T>, key: impl Fn(&T) -> u32) -> SysTable<T>
where
    T: HasRowId,
{
    let mut t = SysTable::default();
    for row in rows {
        let rowid = row.rowid();
        let k = key(&row);
        t.insert(rowid, k, row);
    }
    t
}

trait HasRowId {
    fn rowid(&self) -> RowId;
}

macro_rules! impl_has_rowid {
    ($($t:ty),* $(,)?) => {
        $(impl HasRowId for $t { fn rowid(&self) -> RowId { self.rowid } })*
    };
}

impl_has_rowid!(
    SysUser, SysObj, SysTab, SysCol, SysCCol, SysCDef, SysECol, SysDeferredStg, SysTabPart, SysTabSubPart, SysTabComPart
);

/// Charset-form resolution: 1 -> database default, 2 -> nchar
/// default, else the raw charset id. The two "default" forms resolve to a
/// fixed well-known id here since the dictionary-source bootstrap (out of
/// scope) is what would normally supply the live NLS settings; `None` only
/// for a charset id of zero, which is never valid.
fn resolve_charset(form: u8, charset_id: u16) -> Option<u16> {
    match form {
        1 => Some(if charset_id == 0 { 873 } else { charset_id }), // AL32UTF8-ish default
        2 => Some(if charset_id == 0 { 2000 } else { charset_id }), // AL16UTF16-ish nchar default
        _ => {
            if charset_id == 0 {
                None
            } else {
                Some(charset_id)
            }
        }
    }
}

fn count_pk_columns(ccols: &SysTable<SysCCol>, cdefs: &SysTable<SysCDef>, obj: u32) -> usize {
    let cdef_types: HashMap<u32, u16> = cdefs.by_key_rows(obj).iter().map(|d| (d.con, d.type_no)).collect();
    ccols
        .by_key_rows(obj)
        .iter()
        .filter(|c| cdef_types.get(&c.con) == Some(&constraint_type::PRIMARY_KEY))
        .count()
}

fn count_supplemental_columns(ccols: &SysTable<SysCCol>, cdefs: &SysTable<SysCDef>, obj: u32) -> usize {
    let cdef_types: HashMap<u32, u16> = cdefs.by_key_rows(obj).iter().map(|d| (d.con, d.type_no)).collect();
    ccols
        .by_key_rows(obj)
        .iter()
        .filter(|c| c.spare1 == Flags128::default())
        .filter(|c| {
            cdef_types
                .get(&c.con)
                .map(|t| constraint_type::SUPPLEMENTAL_LOG.contains(t))
                .unwrap_or(false)
        })
        .count()
}
