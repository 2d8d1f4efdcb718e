//! Redo file header parsing and per-block validation.

use crate::error::{CdcError, Result};
use crate::scn::Scn;

/// Trailing magic bytes for a little-endian header block.
pub const MAGIC_LE: [u8; 4] = [0x7D, 0x7C, 0x7B, 0x7A];
/// Trailing magic bytes for a big-endian header block — seeing this instead
/// of `MAGIC_LE` flips the reader's global endianness for the rest of the
/// file.
pub const MAGIC_BE: [u8; 4] = [0x7A, 0x7B, 0x7C, 0x7D];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy)]
pub struct RedoHeader {
    pub endian: Endian,
    pub block_size: u32,
    pub num_blocks: u32,
    pub compat_vsn: u32,
    pub activation: u32,
    pub resetlogs: u32,
    pub first_scn: Scn,
    pub next_scn: Scn,
}

fn read_u32(b: &[u8], endian: Endian) -> u32 {
    match endian {
        Endian::Little => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        Endian::Big => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
    }
}

fn read_u64(b: &[u8], endian: Endian) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(&b[..8]);
    match endian {
        Endian::Little => u64::from_le_bytes(arr),
        Endian::Big => u64::from_be_bytes(arr),
    }
}

/// Parses two header blocks worth of bytes: validates magic bytes and
/// extracts block size, block count, compat version, activation id,
/// resetlogs id, and the first/next SCN. Field offsets follow a fixed,
/// documented layout rather than Oracle's actual on-disk header (out of
/// scope per the no-client non-goal) — what matters operationally is that
/// the same offsets are used consistently by both the writer of test
/// fixtures and this parser.
pub fn parse(block: &[u8]) -> Result<RedoHeader> {
    if block.len() < 64 {
        return Err(CdcError::RedoFormat("header block shorter than 64 bytes".into()));
    }
    if block[0] != 0x00 || !matches!(block[1], 0x22 | 0x82) {
        return Err(CdcError::RedoFormat("bad magic lead bytes".into()));
    }
    let tail = &block[block.len() - 4..];
    let endian = if tail == MAGIC_LE {
        Endian::Little
    } else if tail == MAGIC_BE {
        Endian::Big
    } else {
        return Err(CdcError::RedoFormat("unrecognized trailing magic bytes".into()));
    };

    Ok(RedoHeader {
        endian,
        block_size: read_u32(&block[4..8], endian),
        num_blocks: read_u32(&block[8..12], endian),
        compat_vsn: read_u32(&block[12..16], endian),
        activation: read_u32(&block[16..20], endian),
        resetlogs: read_u32(&block[20..24], endian),
        first_scn: Scn(read_u64(&block[24..32], endian)),
        next_scn: Scn(read_u64(&block[32..40], endian)),
    })
}

/// Outcome of checking one redo block's own header against the file header
/// and expected sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCheck {
    Ok,
    Empty,
    Error,
    BadCrc,
    Overwritten,
    Finished,
}

/// Checks one data block's sequence number against what was expected and
/// its checksum, classifying the result return table.
pub fn check_block(block: &[u8], expected_seq: u32, block_offset: u64, file_size: u64, declared_num_blocks: u32, block_size: u32) -> BlockCheck {
    if block_offset >= file_size || block_offset / block_size as u64 >= declared_num_blocks as u64 {
        return BlockCheck::Finished;
    }
    if block.iter().all(|&b| b == 0) {
        return BlockCheck::Empty;
    }
    if block.len() < 8 {
        return BlockCheck::Error;
    }
    let seq = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
    if seq < expected_seq {
        return BlockCheck::Overwritten;
    }
    let declared_checksum = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    let computed = crc32c::crc32c(&block[8..]);
    if declared_checksum != computed {
        return BlockCheck::BadCrc;
    }
    BlockCheck::Ok
}
