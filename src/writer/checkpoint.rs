//! `<database>-chkpt.json` persistence, grounded on
//! `storage/disk.rs`'s atomic temp-then-rename write discipline.

use crate::error::Result;
use crate::scn::Scn;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointFile {
    pub database: String,
    pub scn: Scn,
    pub resetlogs: u32,
    pub activation: u32,
}

pub fn load(path: &Path) -> Result<Option<CheckpointFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}

pub fn write(path: &Path, file: &CheckpointFile) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut handle = std::fs::File::create(&tmp)?;
        handle.write_all(serde_json::to_string_pretty(file)?.as_bytes())?;
        handle.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
