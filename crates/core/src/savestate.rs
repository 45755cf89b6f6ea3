//! Machine snapshots.
//!
//! Captures a core's registers and memory to a file using bincode
//! serialization with deflate compression.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "AVRS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Architecture     |  u8 (0 = AVR, 1 = ARM64)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```
//!
//! Restoring does not bring back a halted state: the restored machine is
//! ready to step again.

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cpu::Cpu;
use crate::opcodes::Variant;
use crate::Arch;

/// Magic bytes identifying a snapshot file.
const MAGIC: &[u8; 4] = b"AVRS";
/// Current snapshot format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 9;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file too small")]
    TooSmall,
    #[error("invalid snapshot file (bad magic)")]
    BadMagic,
    #[error("unsupported snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("architecture mismatch: snapshot={saved} current={current}")]
    ArchMismatch { saved: String, current: Arch },
    #[error("memory size mismatch: snapshot={saved} current={current}")]
    MemorySize { saved: usize, current: u32 },
    #[error("decompress error: {0}")]
    Decompress(String),
    #[error("serialization error: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvrState {
    pub cpu: Cpu,
    pub variant: Variant,
    pub memory: Vec<u8>,
    pub ports: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arm64State {
    pub x: Vec<u64>,
    pub pc: u32,
    pub memory: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Snapshot {
    Avr(AvrState),
    Arm64(Arm64State),
}

impl Snapshot {
    pub fn arch(&self) -> Arch {
        match self {
            Snapshot::Avr(_) => Arch::Avr,
            Snapshot::Arm64(_) => Arch::Arm64,
        }
    }
}

fn arch_byte(arch: Arch) -> u8 {
    match arch {
        Arch::Avr => 0,
        Arch::Arm64 => 1,
    }
}

fn arch_name(byte: u8) -> String {
    match byte {
        0 => Arch::Avr.to_string(),
        1 => Arch::Arm64.to_string(),
        b => format!("?({})", b),
    }
}

/// Serialize and compress a snapshot, header included.
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, SnapshotError> {
    let payload = bincode::serialize(snapshot)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(arch_byte(snapshot.arch()));
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Verify the header and decode a snapshot for `expected`.
pub fn decode(data: &[u8], expected: Arch) -> Result<Snapshot, SnapshotError> {
    if data.len() < HEADER_LEN {
        return Err(SnapshotError::TooSmall);
    }
    if &data[0..4] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SnapshotError::Version { found: version, expected: FORMAT_VERSION });
    }
    if data[8] != arch_byte(expected) {
        return Err(SnapshotError::ArchMismatch { saved: arch_name(data[8]), current: expected });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| SnapshotError::Decompress(format!("{:?}", e)))?;
    let snapshot: Snapshot = bincode::deserialize(&decompressed)?;
    if snapshot.arch() != expected {
        return Err(SnapshotError::ArchMismatch { saved: snapshot.arch().to_string(), current: expected });
    }
    Ok(snapshot)
}

pub fn save_to_file(snapshot: &Snapshot, path: &Path) -> Result<(), SnapshotError> {
    let out = encode(snapshot)?;
    std::fs::write(path, &out)?;
    info!("Saved {} snapshot to {} ({} bytes)", snapshot.arch(), path.display(), out.len());
    Ok(())
}

pub fn load_from_file(path: &Path, expected: Arch) -> Result<Snapshot, SnapshotError> {
    let data = std::fs::read(path)?;
    decode(&data, expected)
}

/// Derive a snapshot path from an image path.
/// `firmware.hex` → `firmware.state`
pub fn state_path(image_path: &Path) -> PathBuf {
    let stem = image_path.file_stem().and_then(|s| s.to_str()).unwrap_or("machine");
    let dir = image_path.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.state", stem))
}
