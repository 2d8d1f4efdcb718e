//! Entry point: a single binary, no arguments, config path fixed relative
//! to the working directory and held open exclusively for the process
//! lifetime.
//!
//! Owns every worker thread directly: one reader thread per redo-log group,
//! one analyzer thread per target's pipeline, and one writer thread per
//! target. A target's pipeline reads its source's redo-log groups
//! independently of any other target on the same source, trading duplicate
//! file reads for the simplicity of giving each target's `Writer` sole
//! ownership of its own `OutputBuffer` — no cross-target confirmation
//! races on a shared ring.

use redo_cdc::analyzer::{Analyzer, CheckpointPolicy};
use redo_cdc::config::{Config, ReaderType, SourceConfig, StartPosition, TargetConfig, WriterType};
use redo_cdc::error::{CdcError, Result};
use redo_cdc::memory::ChunkPool;
use redo_cdc::output::OutputBuffer;
use redo_cdc::reader::{BlockCheck, GroupId, Reader, ARCHIVE_GROUP};
use redo_cdc::redo;
use redo_cdc::runtime::Runtime;
use redo_cdc::schema::SchemaCache;
use redo_cdc::scn::{Scn, Seq};
use redo_cdc::txbuffer::TransactionBuffer;
use redo_cdc::writer::sinks::{ControlProtocolSink, FileSink, NetworkSink, Sink};
#[cfg(feature = "kafka")]
use redo_cdc::writer::sinks::KafkaSink;
#[cfg(feature = "zeromq")]
use redo_cdc::writer::sinks::ZeroMqSink;
use redo_cdc::writer::Writer;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};

const CONFIG_FILE_NAME: &str = "redo-cdc.json";

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).with_thread_ids(true).init();

    let config_path = std::env::current_dir().unwrap_or_else(|_| ".".into()).join(CONFIG_FILE_NAME);

    let lock_file = match OpenOptions::new().read(true).write(true).create(true).open(&config_path) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "cannot open configuration file");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = lock_exclusive(&lock_file) {
        error!(path = %config_path.display(), error = %e, "another instance already holds the configuration lock");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::FAILURE;
        }
    };

    info!(sources = config.sources.len(), targets = config.targets.len(), "starting redo-cdc");

    let runtime = Runtime::new();
    runtime.install_signal_handlers();

    let mut handles = Vec::new();
    for target in &config.targets {
        let Some(source) = config.sources.iter().find(|s| s.alias == target.source) else {
            error!(target = %target.alias, source = %target.source, "target references unknown source alias");
            runtime.shutdown();
            continue;
        };
        match spawn_pipeline(Arc::clone(&runtime), source, target) {
            Ok(mut target_handles) => handles.append(&mut target_handles),
            Err(e) => {
                error!(target = %target.alias, error = %e, "failed to start pipeline");
                runtime.shutdown();
            }
        }
    }

    runtime.wait();
    info!("shutdown signaled, waiting for worker threads");
    for handle in handles {
        let _ = handle.join();
    }

    info!("shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(unix)]
fn lock_exclusive(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

fn now_s() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// One redo-log group's channel into the analyzer thread: the shared ring
/// its reader thread fills, whether it tails live (`is_online`), and
/// whether that reader has exited.
struct GroupChannel {
    buffer: Arc<redo_cdc::reader::DiskBuffer>,
    is_online: bool,
    reader_done: Arc<AtomicBool>,
}

/// Builds and starts one target's full pipeline: a reader thread per
/// configured redo-log path, one analyzer thread draining them in order,
/// and one writer thread streaming the analyzer's output to the target's
/// sink.
fn spawn_pipeline(runtime: Arc<Runtime>, source: &SourceConfig, target: &TargetConfig) -> Result<Vec<JoinHandle<()>>> {
    if source.reader.redo_logs.is_empty() {
        return Err(CdcError::Configuration(format!(
            "source '{}' has no reader.redo-logs paths configured; online/ASM connectivity is outside this engine's scope, only local paths are read",
            source.alias
        )));
    }

    let mut handles = Vec::new();

    let pool = ChunkPool::new(1024 * 1024, source.memory_min_mb, source.memory_max_mb.max(source.memory_min_mb).max(1), 0);
    let transactions = Arc::new(TransactionBuffer::new(Arc::clone(&pool)));
    let output = OutputBuffer::new(Arc::clone(&pool), source.read_buffer_max_mb.max(1) * 1024 * 1024);

    let state_dir = source
        .checkpoint
        .path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| ".".into()));
    std::fs::create_dir_all(&state_dir)?;
    let schema = Arc::new(SchemaCache::new(source.name.clone(), state_dir.join(format!("{}-schema", source.name))));
    for selector in &source.tables {
        schema.add_element(&selector.owner, &selector.table, redo_cdc::schema::ElementOptions::None, selector.key.as_ref().map(|k| vec![k.clone()]))?;
    }

    let disk_buffer_mb = source.read_buffer_max_mb.max(1);
    let is_tailing_source = matches!(source.reader.kind, ReaderType::Online | ReaderType::OnlineStandby);
    let retry_max = source.arch_read_retry.max(1);
    let redo_read_sleep = Duration::from_micros(source.redo_read_sleep_us.max(1));
    let arch_read_sleep = Duration::from_micros(source.arch_read_sleep_us.max(1));

    let mut groups = Vec::new();
    for (idx, path) in source.reader.redo_logs.iter().enumerate() {
        let is_last = idx + 1 == source.reader.redo_logs.len();
        let is_online = is_tailing_source && is_last;
        let group_id = if is_online { GroupId(idx as u32 + 1) } else { ARCHIVE_GROUP };
        let reader = Arc::new(Reader::new(
            group_id,
            is_online,
            disk_buffer_mb * 1024 * 1024,
            retry_max,
            Duration::from_micros(source.redo_verify_delay_us.max(1)),
        ));
        let reader_done = Arc::new(AtomicBool::new(false));
        let buffer = Arc::clone(reader.buffer());
        let path = PathBuf::from(path);
        handles.push(spawn_reader_thread(
            Arc::clone(&runtime),
            Arc::clone(&reader),
            path,
            Arc::clone(&reader_done),
            redo_read_sleep,
            arch_read_sleep,
            retry_max,
        ));
        groups.push(GroupChannel { buffer, is_online, reader_done });
    }

    let checkpoint_policy = CheckpointPolicy::new(source.checkpoint.interval_s, source.checkpoint.interval_mb);
    let analyzer = Analyzer::new(Arc::clone(&schema), Arc::clone(&transactions), Arc::clone(&output), 0, checkpoint_policy);
    handles.push(spawn_analyzer_thread(Arc::clone(&runtime), analyzer, groups));

    let checkpoint_path = state_dir.join(format!("{}-{}-chkpt.json", source.name, target.alias));
    handles.push(spawn_writer_thread(Arc::clone(&runtime), source, target, output, checkpoint_path)?);

    Ok(handles)
}

fn spawn_reader_thread(
    runtime: Arc<Runtime>,
    reader: Arc<Reader>,
    path: PathBuf,
    reader_done: Arc<AtomicBool>,
    redo_read_sleep: Duration,
    arch_read_sleep: Duration,
    retry_max: u32,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = read_group(&runtime, &reader, &path, redo_read_sleep, arch_read_sleep, retry_max) {
            error!(group = reader.group.0, path = %path.display(), error = %e, "redo reader thread exiting on error");
            runtime.shutdown();
        }
        reader_done.store(true, Ordering::Release);
    })
}

/// One redo-log group's read loop: `CHECK`/`UPDATE` (open, validate header)
/// then `READ` (batched block reads, doubling up to an eighth of the disk
/// buffer, each block checked and written into the group's ring).
fn read_group(runtime: &Runtime, reader: &Reader, path: &Path, redo_read_sleep: Duration, arch_read_sleep: Duration, retry_max: u32) -> Result<()> {
    reader.open_group(|| Ok(std::fs::metadata(path)?.len()))?;
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(0))?;

    let mut header_block = vec![0u8; 64];
    fill_with_retry(&mut file, &mut header_block, retry_max, redo_read_sleep)?;
    let header = reader.validate_header(&header_block)?;
    let block_size = (header.block_size as usize).max(64);

    let mut expected_seq: u32 = 1;
    let mut block_offset: u64 = 64;
    let mut last_read = block_size;
    let mut attempt = 0u32;

    loop {
        if runtime.is_shutdown() {
            return Ok(());
        }
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(block_offset);
        let want_bytes = reader.next_read_size(last_read).max(block_size);
        let block_count = (want_bytes / block_size).max(1);
        let mut batch = vec![0u8; block_count * block_size];
        let n = fill_best_effort(&mut file, &mut batch)?;
        let full_blocks = n / block_size;
        let leftover = n - full_blocks * block_size;
        if leftover > 0 {
            file.seek(SeekFrom::Current(-(leftover as i64)))?;
        }

        let mut finished = false;
        let mut consumed_blocks = 0usize;
        for i in 0..full_blocks {
            let block = &batch[i * block_size..(i + 1) * block_size];
            let check = reader.check_block(block, expected_seq, block_offset, file_size, &header);
            reader.handle_block_check(check)?;
            if matches!(check, BlockCheck::Finished) {
                finished = true;
                break;
            }
            reader.buffer().write(&block[8..]);
            expected_seq += 1;
            block_offset += block_size as u64;
            consumed_blocks += 1;
        }

        if finished {
            // Blocks past the finished one were read speculatively but never
            // applied; rewind the cursor so the next pass re-reads them once
            // the online log has actually filled them in.
            let unconsumed = (full_blocks - consumed_blocks) * block_size;
            if unconsumed > 0 {
                file.seek(SeekFrom::Current(-(unconsumed as i64)))?;
            }
            if reader.keeps_connection_open() {
                std::thread::sleep(redo_read_sleep);
                last_read = block_size;
                continue;
            }
            return Ok(());
        }

        if full_blocks == 0 {
            if block_offset >= file_size {
                if reader.keeps_connection_open() {
                    std::thread::sleep(redo_read_sleep);
                    last_read = block_size;
                    continue;
                }
                return Ok(());
            }
            attempt += 1;
            if attempt > retry_max {
                return Err(CdcError::RedoFormat("exceeded retry budget waiting for a torn block to complete".into()));
            }
            std::thread::sleep(if reader.keeps_connection_open() { redo_read_sleep } else { arch_read_sleep });
            continue;
        }
        attempt = 0;
        last_read = full_blocks * block_size;
    }
}

/// Fills `buf` fully, retrying `retry_max` times with `sleep` between
/// attempts — used only for the one-shot header read, where a partial
/// result must eventually become complete or the group is unreadable.
fn fill_with_retry(file: &mut File, buf: &mut [u8], retry_max: u32, sleep: Duration) -> Result<()> {
    for _ in 0..=retry_max {
        let n = fill_best_effort(file, buf)?;
        if n == buf.len() {
            return Ok(());
        }
        std::thread::sleep(sleep);
    }
    Err(CdcError::RedoFormat("timed out reading redo header block".into()))
}

/// Reads as much of `buf` as is currently available without blocking past
/// EOF; on a short read, rewinds the file cursor back to the start of this
/// attempt so the next call re-reads the same bytes once more have landed
/// on disk (tolerating a torn write on an online log).
fn fill_best_effort(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let n = file.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
    }
    if total < buf.len() && total > 0 {
        file.seek(SeekFrom::Current(-(total as i64)))?;
    }
    Ok(total)
}

fn spawn_analyzer_thread(runtime: Arc<Runtime>, analyzer: Analyzer, groups: Vec<GroupChannel>) -> JoinHandle<()> {
    std::thread::spawn(move || run_analyzer(&runtime, analyzer, groups))
}

/// Drains each redo-log group's ring in order — archived groups to
/// completion, then the online group tailed until shutdown — decoding
/// (rec1, rec2) pairs and dispatching them through the analyzer.
fn run_analyzer(runtime: &Runtime, mut analyzer: Analyzer, groups: Vec<GroupChannel>) {
    let mut seq_counter: u32 = 0;
    let mut offset: u64 = 0;
    for group in &groups {
        loop {
            if runtime.is_shutdown() {
                return;
            }
            match try_decode_pair(&group.buffer) {
                Some((rec1, rec2, consumed)) => {
                    seq_counter = seq_counter.wrapping_add(1);
                    offset += consumed as u64;
                    let scn = rec2.scn;
                    if let Err(e) = analyzer.process_pair(rec1, rec2, Seq(seq_counter), offset) {
                        error!(error = %e, "failed to process redo pair");
                        runtime.shutdown();
                        return;
                    }
                    group.buffer.advance_scan(consumed as u64);
                    group.buffer.consume_scanned();
                    if let Some(candidate) = analyzer.checkpoint_tick(now_s(), consumed as u64, scn, seq_counter, offset) {
                        info!(scn = %candidate.scn, sequence = candidate.sequence, "checkpoint candidate recorded");
                    }
                }
                None => {
                    if group.reader_done.load(Ordering::Acquire) && group.buffer.unscanned_len() == 0 && !group.is_online {
                        break;
                    }
                    group.buffer.wait_for_data(Duration::from_millis(200));
                }
            }
        }
    }
}

fn try_decode_pair(buffer: &redo_cdc::reader::DiskBuffer) -> Option<(redo_cdc::redo::RedoLogRecord, redo_cdc::redo::RedoLogRecord, usize)> {
    let bytes = buffer.peek_unscanned();
    if bytes.is_empty() {
        return None;
    }
    let (rec1, n1) = redo::decode(&bytes).ok()?;
    let (rec2, n2) = redo::decode(&bytes[n1..]).ok()?;
    Some((rec1, rec2, n1 + n2))
}

/// Resolves the target's `writer.start` into the SCN `Writer::bootstrap`
/// expects. Only the explicit-SCN form resolves without the (out-of-scope)
/// dictionary source; sequence/time-based starts fall back to "unset",
/// logged once at startup.
fn resolve_start(target: &TargetConfig) -> Scn {
    match &target.writer.start {
        StartPosition::Scn { scn } => Scn(*scn),
        StartPosition::Seq { .. } | StartPosition::Time { .. } | StartPosition::TimeRel { .. } | StartPosition::Current {} => {
            warn!(target = %target.alias, "sequence/time-based start positions need the dictionary source to resolve to an SCN; starting unset");
            Scn::ZERO
        }
    }
}

fn spawn_writer_thread(runtime: Arc<Runtime>, source: &SourceConfig, target: &TargetConfig, output: Arc<OutputBuffer>, checkpoint_path: PathBuf) -> Result<JoinHandle<()>> {
    let database = source.name.clone();
    let queue_size = target.writer.queue_size.max(1);
    let checkpoint_interval = Duration::from_secs(target.writer.checkpoint_interval_s);
    let poll_interval = Duration::from_micros(target.writer.poll_interval_us.max(1));
    let configured_start = resolve_start(target);

    match target.writer.kind {
        WriterType::File => {
            let path = target.writer.name.clone().ok_or_else(|| CdcError::Configuration("file writer requires 'name'".into()))?;
            let sink = FileSink::open(Path::new(&path))?;
            let writer = Writer::new(database, sink, output, queue_size, checkpoint_path, checkpoint_interval);
            Ok(std::thread::spawn(move || run_writer_loop(runtime, writer, poll_interval, configured_start)))
        }
        WriterType::Network => {
            let uri = target.writer.uri.clone().ok_or_else(|| CdcError::Configuration("network writer requires 'uri'".into()))?;
            let sink = NetworkSink::connect(&uri)?;
            let writer = Writer::new(database, sink, output, queue_size, checkpoint_path, checkpoint_interval);
            Ok(std::thread::spawn(move || run_writer_loop(runtime, writer, poll_interval, configured_start)))
        }
        WriterType::Kafka => spawn_kafka_writer(runtime, target, database, output, queue_size, checkpoint_path, checkpoint_interval, poll_interval, configured_start),
        WriterType::Zeromq => spawn_zeromq_writer(runtime, target, database, output, queue_size, checkpoint_path, checkpoint_interval, poll_interval, configured_start),
    }
}

#[cfg(feature = "kafka")]
#[allow(clippy::too_many_arguments)]
fn spawn_kafka_writer(
    runtime: Arc<Runtime>,
    target: &TargetConfig,
    database: String,
    output: Arc<OutputBuffer>,
    queue_size: usize,
    checkpoint_path: PathBuf,
    checkpoint_interval: Duration,
    poll_interval: Duration,
    configured_start: Scn,
) -> Result<JoinHandle<()>> {
    let brokers = target.writer.brokers.clone().ok_or_else(|| CdcError::Configuration("kafka writer requires 'brokers'".into()))?;
    let topic = target.writer.topic.clone().ok_or_else(|| CdcError::Configuration("kafka writer requires 'topic'".into()))?;
    let sink = KafkaSink::new(&brokers, topic)?;
    let writer = Writer::new(database, sink, output, queue_size, checkpoint_path, checkpoint_interval);
    Ok(std::thread::spawn(move || run_writer_loop(runtime, writer, poll_interval, configured_start)))
}

#[cfg(not(feature = "kafka"))]
#[allow(clippy::too_many_arguments)]
fn spawn_kafka_writer(
    _runtime: Arc<Runtime>,
    _target: &TargetConfig,
    _database: String,
    _output: Arc<OutputBuffer>,
    _queue_size: usize,
    _checkpoint_path: PathBuf,
    _checkpoint_interval: Duration,
    _poll_interval: Duration,
    _configured_start: Scn,
) -> Result<JoinHandle<()>> {
    Err(CdcError::Configuration("kafka sink support was not compiled into this binary".into()))
}

#[cfg(feature = "zeromq")]
#[allow(clippy::too_many_arguments)]
fn spawn_zeromq_writer(
    runtime: Arc<Runtime>,
    target: &TargetConfig,
    database: String,
    output: Arc<OutputBuffer>,
    queue_size: usize,
    checkpoint_path: PathBuf,
    checkpoint_interval: Duration,
    poll_interval: Duration,
    configured_start: Scn,
) -> Result<JoinHandle<()>> {
    let uri = target.writer.uri.clone().ok_or_else(|| CdcError::Configuration("zeromq writer requires 'uri'".into()))?;
    let sink = ZeroMqSink::bind(&uri)?;
    let writer = Writer::new(database, sink, output, queue_size, checkpoint_path, checkpoint_interval);
    Ok(std::thread::spawn(move || run_writer_loop(runtime, writer, poll_interval, configured_start)))
}

#[cfg(not(feature = "zeromq"))]
#[allow(clippy::too_many_arguments)]
fn spawn_zeromq_writer(
    _runtime: Arc<Runtime>,
    _target: &TargetConfig,
    _database: String,
    _output: Arc<OutputBuffer>,
    _queue_size: usize,
    _checkpoint_path: PathBuf,
    _checkpoint_interval: Duration,
    _poll_interval: Duration,
    _configured_start: Scn,
) -> Result<JoinHandle<()>> {
    Err(CdcError::Configuration("zeromq sink support was not compiled into this binary".into()))
}

/// Streams one target: bootstraps from its checkpoint, then loops
/// `stream_tick`/self-confirm/`maybe_checkpoint` until shutdown. Self-confirms
/// immediately after a successful send since none of `FileSink`/`NetworkSink`/
/// `KafkaSink`/`ZeroMqSink` carry a return acknowledgement channel — only
/// `ControlProtocolSink`'s remote client drives `confirm` directly, from the
/// listener loop that owns its socket, not from here.
fn run_writer_loop<S: Sink>(runtime: Arc<Runtime>, writer: Writer<S>, poll_interval: Duration, configured_start: Scn) {
    let incarnation = (0, 0);
    if let Err(e) = writer.bootstrap(configured_start, incarnation) {
        error!(error = %e, "writer failed to bootstrap from checkpoint");
        runtime.shutdown();
        return;
    }

    let mut last_seen_id = 0u64;
    loop {
        if runtime.is_shutdown() {
            writer.request_shutdown();
            break;
        }
        match writer.stream_tick() {
            Ok(0) => std::thread::sleep(poll_interval),
            Ok(_) => {
                let high_water = writer.last_sent_id();
                for id in (last_seen_id + 1)..=high_water {
                    writer.confirm(id);
                }
                last_seen_id = high_water;
            }
            Err(e) => {
                error!(error = %e, "writer stream tick failed");
                runtime.shutdown();
                break;
            }
        }
        if let Err(e) = writer.maybe_checkpoint(incarnation.0, incarnation.1) {
            error!(error = %e, "writer checkpoint failed");
            runtime.shutdown();
            break;
        }
    }
}

// Unused in this build (no control-protocol listener is wired up yet) but
// kept importable so the sink module's full surface stays exercised by the
// binary crate, matching the rest of writer::sinks.
#[allow(dead_code)]
fn _control_protocol_sink_is_linked(_: &ControlProtocolSink) {}
