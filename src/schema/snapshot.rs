//! Schema snapshot file I/O.
//!
//! Snapshots are named `<database>-schema-<scn>.json` and loaded by
//! selecting the newest one whose `snapshotScn` does not exceed the
//! analyzer's starting SCN, following `replication/snapshots/manager.rs`'s
//! naming and atomic-rename discipline.

use super::types::*;
use crate::error::Result;
use crate::scn::Scn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaSnapshotFile {
    pub database: String,
    pub scn: Scn,
    pub users: Vec<SysUser>,
    pub objs: Vec<SysObj>,
    pub tabs: Vec<SysTab>,
    pub cols: Vec<SysCol>,
    pub ccols: Vec<SysCCol>,
    pub cdefs: Vec<SysCDef>,
    pub ecols: Vec<SysECol>,
    pub deferred_stg: Vec<SysDeferredStg>,
    pub tab_parts: Vec<SysTabPart>,
    pub tab_subparts: Vec<SysTabSubPart>,
    pub tab_comparts: Vec<SysTabComPart>,
}

fn file_name(database: &str, scn: Scn) -> String {
    format!("{database}-schema-{}.json", scn.0)
}

/// Parses `<database>-schema-<scn>.json`, returning `scn` if `database`
/// matches; used both to pick the newest snapshot and to prune old ones.
fn parse_name(name: &str, database: &str) -> Option<u64> {
    let prefix = format!("{database}-schema-");
    let rest = name.strip_prefix(&prefix)?;
    let digits = rest.strip_suffix(".json")?;
    digits.parse().ok()
}

/// Finds the newest snapshot with `snapshotScn <= scn` and loads it, or
/// returns `Ok(None)` if the directory holds no eligible file.
pub fn load_newest_snapshot(dir: &Path, database: &str, scn: Scn) -> Result<Option<SchemaSnapshotFile>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut best: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(candidate_scn) = parse_name(name, database) else {
            continue;
        };
        if candidate_scn > scn.0 {
            continue;
        }
        if best.as_ref().map(|(s, _)| candidate_scn > *s).unwrap_or(true) {
            best = Some((candidate_scn, entry.path()));
        }
    }
    let Some((_, path)) = best else {
        return Ok(None);
    };
    let raw = fs::read_to_string(path)?;
    let file: SchemaSnapshotFile = serde_json::from_str(&raw)?;
    Ok(Some(file))
}

/// Writes `file` via temp-then-rename, then prunes older snapshots for the same database unless
/// `keep` is set.
pub fn write_snapshot(dir: &Path, file: &SchemaSnapshotFile, keep: bool) -> Result<()> {
    fs::create_dir_all(dir)?;
    let final_name = file_name(&file.database, file.scn);
    let final_path = dir.join(&final_name);
    let tmp_path = dir.join(format!("{final_name}.tmp"));
    let raw = serde_json::to_string_pretty(file)?;
    fs::write(&tmp_path, raw)?;
    fs::rename(&tmp_path, &final_path)?;

    if !keep {
        prune_older(dir, &file.database, file.scn.0)?;
    }
    Ok(())
}

fn prune_older(dir: &Path, database: &str, keep_scn: u64) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(candidate_scn) = parse_name(name, database) else {
            continue;
        };
        if candidate_scn < keep_scn {
            let _ = fs::remove_file(entry.path());
        }
    }
    Ok(())
}
