//! JSON configuration. Deserialization only —
//! `Config::load` is the sole entry point; validation beyond `serde`'s own
//! type/field checking happens where each value is consumed.
//!
//! Grounded on `replication/snapshots/config.rs`'s per-field doc-comment
//! density and `Default` idiom, generalized from a single flat struct to the
//! sources/targets tree documented below.

use crate::error::{CdcError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub trace: Option<String>,
    #[serde(default)]
    pub trace2: Option<String>,
    #[serde(rename = "dump-redo-log", default)]
    pub dump_redo_log: Option<u8>,
    #[serde(rename = "dump-raw-data", default)]
    pub dump_raw_data: Option<u8>,
    pub sources: Vec<SourceConfig>,
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub alias: String,
    pub name: String,
    pub reader: ReaderConfig,
    #[serde(rename = "memory-min-mb", default = "default_memory_min_mb")]
    pub memory_min_mb: usize,
    #[serde(rename = "memory-max-mb", default = "default_memory_max_mb")]
    pub memory_max_mb: usize,
    #[serde(rename = "read-buffer-max-mb", default = "default_read_buffer_max_mb")]
    pub read_buffer_max_mb: usize,
    pub format: FormatConfig,
    #[serde(default)]
    pub tables: Vec<TableSelector>,
    #[serde(default)]
    pub flags: Option<u32>,
    #[serde(rename = "redo-verify-delay-us", default = "default_redo_verify_delay_us")]
    pub redo_verify_delay_us: u64,
    #[serde(rename = "arch-read-sleep-us", default = "default_arch_read_sleep_us")]
    pub arch_read_sleep_us: u64,
    #[serde(rename = "arch-read-retry", default = "default_arch_read_retry")]
    pub arch_read_retry: u32,
    #[serde(rename = "redo-read-sleep-us", default = "default_redo_read_sleep_us")]
    pub redo_read_sleep_us: u64,
    #[serde(rename = "event-table", default)]
    pub event_table: Option<String>,
    #[serde(rename = "event-owner", default)]
    pub event_owner: Option<String>,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

fn default_memory_min_mb() -> usize {
    16
}
fn default_memory_max_mb() -> usize {
    512
}
fn default_read_buffer_max_mb() -> usize {
    32
}
fn default_redo_verify_delay_us() -> u64 {
    500_000
}
fn default_arch_read_sleep_us() -> u64 {
    10_000_000
}
fn default_arch_read_retry() -> u32 {
    3
}
fn default_redo_read_sleep_us() -> u64 {
    50_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReaderType {
    Online,
    OnlineStandby,
    Offline,
    Asm,
    AsmStandby,
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    #[serde(rename = "type")]
    pub kind: ReaderType,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(rename = "user-asm", default)]
    pub user_asm: Option<String>,
    #[serde(rename = "password-asm", default)]
    pub password_asm: Option<String>,
    #[serde(rename = "server-asm", default)]
    pub server_asm: Option<String>,
    #[serde(rename = "path-mapping", default)]
    pub path_mapping: Vec<(String, String)>,
    #[serde(rename = "redo-logs", default)]
    pub redo_logs: Vec<String>,
    #[serde(rename = "disable-checks", default)]
    pub disable_checks: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    Json,
    Protobuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatConfig {
    #[serde(rename = "type")]
    pub kind: PayloadFormat,
    #[serde(default)]
    pub message: u8,
    #[serde(default)]
    pub xid: u8,
    #[serde(default)]
    pub timestamp: u8,
    #[serde(default)]
    pub char: u8,
    #[serde(default)]
    pub scn: u8,
    #[serde(default)]
    pub unknown: u8,
    #[serde(default)]
    pub schema: u8,
    #[serde(default)]
    pub column: u8,
    #[serde(rename = "unknown-type", default)]
    pub unknown_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSelector {
    pub owner: String,
    pub table: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CheckpointConfig {
    pub path: Option<String>,
    #[serde(rename = "interval-s")]
    pub interval_s: u64,
    #[serde(rename = "interval-mb")]
    pub interval_mb: u64,
    pub all: bool,
    #[serde(rename = "output-checkpoint")]
    pub output_checkpoint: bool,
    #[serde(rename = "output-log-switch")]
    pub output_log_switch: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: None,
            interval_s: 10,
            interval_mb: 100,
            all: false,
            output_checkpoint: true,
            output_log_switch: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub alias: String,
    pub source: String,
    pub writer: WriterConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterType {
    File,
    Kafka,
    Zeromq,
    Network,
}

/// `start-scn` / `start-seq` / `start-time` / `start-time-rel` are mutually
/// exclusive; enforced as a `oneof`-shaped enum rather than four
/// independent `Option` fields so an invalid config with two of them set is
/// a deserialization error, not a silent pick of the first one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartPosition {
    Scn { #[serde(rename = "start-scn")] scn: u64 },
    Seq { #[serde(rename = "start-seq")] seq: u32 },
    Time { #[serde(rename = "start-time")] time: String },
    TimeRel { #[serde(rename = "start-time-rel")] time_rel: String },
    Current {},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriterConfig {
    #[serde(rename = "type")]
    pub kind: WriterType,
    #[serde(rename = "poll-interval-us", default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    #[serde(flatten)]
    pub start: StartPosition,
    #[serde(rename = "checkpoint-interval-s", default = "default_checkpoint_interval_s")]
    pub checkpoint_interval_s: u64,
    #[serde(rename = "queue-size", default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub brokers: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
}

fn default_poll_interval_us() -> u64 {
    100_000
}
fn default_checkpoint_interval_s() -> u64 {
    10
}
fn default_queue_size() -> usize {
    65536
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)
            .map_err(|e| CdcError::Configuration(format!("{}: {e}", path.as_ref().display())))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "version": "1.0",
            "sources": [{
                "alias": "s1",
                "name": "ORCLCDB",
                "reader": {"type": "online", "user": "c##dbzuser", "password": "x", "server": "orcl"},
                "format": {"type": "json"},
                "tables": [{"owner": "APP", "table": "ORDERS"}]
            }],
            "targets": [{
                "alias": "t1",
                "source": "s1",
                "writer": {"type": "file", "name": "out.json"}
            }]
        }"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cfg.json");
        std::fs::write(&path, minimal_json()).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].memory_min_mb, 16);
        assert_eq!(config.sources[0].checkpoint.interval_s, 10);
        assert_eq!(config.targets[0].writer.queue_size, 65536);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let bad = minimal_json().replacen("\"version\"", "\"bogus-field\": 1, \"version\"", 1);
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cfg.json");
        std::fs::write(&path, bad).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn start_position_accepts_scn_variant() {
        let json = r#"{"type": "kafka", "brokers": "b", "topic": "t", "start-scn": 100}"#;
        let writer: WriterConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(writer.start, StartPosition::Scn { scn: 100 }));
    }
}
