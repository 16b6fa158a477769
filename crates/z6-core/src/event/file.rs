//! On-disk event log format.
//!
//! ```text
//! Header (64 B) || Event (272 B) x N || Footer (64 B)
//! ```
//!
//! Header: magic u64, version u16, 6 B pad, prng_seed u64,
//! scenario_hash [u8; 32], 8 B pad.
//! Footer: event_count u64, log_checksum [u8; 32] (SHA-256 over all record
//! bytes), 24 B pad.
//!
//! All integers little-endian. Reads validate every record's CRC and the
//! whole-log checksum; any failure aborts with a typed [`LogFileError`] —
//! a damaged log never yields partial data.

use std::io::{Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{LogFileError, Z6Error};
use crate::event::log::EventLog;
use crate::event::record::{Event, EVENT_SIZE};

/// "Z6EVT " as a little-endian integer.
pub const LOG_MAGIC: u64 = 0x5A36_4556_5420;
pub const LOG_VERSION: u16 = 1;

const HEADER_LEN: usize = 64;
const FOOTER_LEN: usize = 64;

/// Metadata stored in the log file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u16,
    pub prng_seed: u64,
    pub scenario_hash: [u8; 32],
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serialise `log` to `w` with the given seed and scenario hash.
pub fn write_log<W: Write>(
    w: &mut W,
    log: &EventLog,
    prng_seed: u64,
    scenario_hash: [u8; 32],
) -> Result<(), Z6Error> {
    let mut header = [0u8; HEADER_LEN];
    header[0..8].copy_from_slice(&LOG_MAGIC.to_le_bytes());
    header[8..10].copy_from_slice(&LOG_VERSION.to_le_bytes());
    // bytes 10..16 pad
    header[16..24].copy_from_slice(&prng_seed.to_le_bytes());
    header[24..56].copy_from_slice(&scenario_hash);
    // bytes 56..64 pad
    w.write_all(&header)?;

    let mut hasher = Sha256::new();
    for event in log.iter() {
        let bytes = event.to_bytes();
        hasher.update(bytes);
        w.write_all(&bytes)?;
    }
    let digest: [u8; 32] = hasher.finalize().into();

    let mut footer = [0u8; FOOTER_LEN];
    footer[0..8].copy_from_slice(&(log.len() as u64).to_le_bytes());
    footer[8..40].copy_from_slice(&digest);
    // bytes 40..64 pad
    w.write_all(&footer)?;
    Ok(())
}

/// Write `log` to a file at `path`.
pub fn write_log_file(
    path: &Path,
    log: &EventLog,
    prng_seed: u64,
    scenario_hash: [u8; 32],
) -> Result<(), Z6Error> {
    let mut file = std::fs::File::create(path)?;
    write_log(&mut file, log, prng_seed, scenario_hash)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Read and fully validate a log from `r`.
pub fn read_log<R: Read>(r: &mut R) -> Result<(LogHeader, EventLog), Z6Error> {
    let mut bytes = Vec::new();
    r.read_to_end(&mut bytes)?;
    parse_log(&bytes)
}

/// Read and fully validate a log file at `path`.
pub fn read_log_file(path: &Path) -> Result<(LogHeader, EventLog), Z6Error> {
    let bytes = std::fs::read(path)?;
    parse_log(&bytes)
}

fn parse_log(bytes: &[u8]) -> Result<(LogHeader, EventLog), Z6Error> {
    if bytes.len() < HEADER_LEN + FOOTER_LEN {
        return Err(LogFileError::Truncated.into());
    }

    let magic = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
    if magic != LOG_MAGIC {
        return Err(LogFileError::BadMagic.into());
    }
    let version = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
    if version != LOG_VERSION {
        return Err(LogFileError::UnsupportedVersion.into());
    }
    let prng_seed = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
    let mut scenario_hash = [0u8; 32];
    scenario_hash.copy_from_slice(&bytes[24..56]);

    let record_bytes = &bytes[HEADER_LEN..bytes.len() - FOOTER_LEN];
    if record_bytes.len() % EVENT_SIZE != 0 {
        return Err(LogFileError::Truncated.into());
    }
    let count = record_bytes.len() / EVENT_SIZE;

    let mut hasher = Sha256::new();
    let mut log = EventLog::with_capacity(count.max(1));
    for (index, chunk) in record_bytes.chunks_exact(EVENT_SIZE).enumerate() {
        hasher.update(chunk);
        let record: &[u8; EVENT_SIZE] = chunk.try_into().unwrap();
        let event = Event::from_bytes(record).ok_or(LogFileError::RecordChecksum {
            index: index as u64,
        })?;
        log.append(event).map_err(Z6Error::from)?;
    }
    let digest: [u8; 32] = hasher.finalize().into();

    let footer = &bytes[bytes.len() - FOOTER_LEN..];
    let stored_count = u64::from_le_bytes(footer[0..8].try_into().unwrap());
    if stored_count != count as u64 {
        return Err(LogFileError::CountMismatch.into());
    }
    if footer[8..40] != digest {
        return Err(LogFileError::LogChecksumMismatch.into());
    }

    Ok((
        LogHeader {
            version,
            prng_seed,
            scenario_hash,
        },
        log,
    ))
}
