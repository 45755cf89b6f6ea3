//! Executable image loading.
//!
//! An [`Image`] is parsed from raw bytes by sniffing the first four bytes:
//!
//! | Magic          | Format              | Parser        |
//! |----------------|---------------------|---------------|
//! | `7f 45 4c 46`  | ELF32 (AVR)         | [`crate::elf`]   |
//! | `cf fa ed fe`  | Mach-O 64 (ARM64)   | [`crate::macho`] |
//! | `ca fe ba be`  | fat Mach-O          | [`crate::macho`] |
//! | `:`            | Intel HEX           | [`crate::hex`]   |
//!
//! Parsing validates the container completely and keeps the loadable
//! segments in the image. [`Image::load_into`] then checks every segment
//! against the destination before writing a single byte, so a failed load
//! never leaves memory half-initialized.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::memory::Memory;
use crate::{elf, hex, macho, Arch};

/// Errors raised while reading or placing an executable image.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("can't open '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file type not supported")]
    UnknownFormat,
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("{0}")]
    Malformed(String),
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),
    #[error("segment at 0x{addr:x} ({size} bytes) does not fit in {limit} bytes of memory")]
    SegmentOverflow { addr: u32, size: u32, limit: u32 },
    #[error("line {line}: {reason}")]
    Hex { line: usize, reason: String },
    #[error("parse error: {0}")]
    Parse(#[from] goblin::error::Error),
}

/// Container format of a parsed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Elf,
    MachO,
    Hex,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Elf => "ELF",
            Format::MachO => "Mach-O",
            Format::Hex => "Intel HEX",
        })
    }
}

/// A loadable region: `data` is copied to `addr`, then the rest of
/// `mem_size` is zero-filled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub addr: u32,
    pub data: Vec<u8>,
    pub mem_size: u32,
}

impl Segment {
    /// One past the last byte covered by the segment.
    pub fn end(&self) -> u64 {
        self.addr as u64 + self.mem_size.max(self.data.len() as u32) as u64
    }
}

/// A parsed executable image.
#[derive(Debug, Clone)]
pub struct Image {
    pub format: Format,
    pub arch: Arch,
    /// Entry point in instruction words (16-bit for AVR, 32-bit for ARM64).
    pub entry: u32,
    pub segments: Vec<Segment>,
}

impl Image {
    /// Parse an image, picking the format from its magic number.
    pub fn parse(bytes: &[u8]) -> Result<Image, LoadError> {
        match sniff(bytes) {
            Some(Format::Elf) => elf::parse(bytes),
            Some(Format::MachO) => macho::parse(bytes),
            Some(Format::Hex) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| LoadError::Malformed("Intel HEX file is not valid text".into()))?;
                hex::parse(text)
            }
            None => Err(LoadError::UnknownFormat),
        }
    }

    /// Check every segment against `mem`, then copy them in.
    pub fn load_into<M: Memory + ?Sized>(&self, mem: &mut M) -> Result<(), LoadError> {
        let limit = mem.size();
        for seg in &self.segments {
            if seg.end() > limit as u64 {
                return Err(LoadError::SegmentOverflow { addr: seg.addr, size: seg.mem_size, limit });
            }
        }
        for seg in &self.segments {
            mem.write_bytes(seg.addr, &seg.data);
            let tail = (seg.mem_size as usize).saturating_sub(seg.data.len());
            if tail > 0 {
                mem.write_bytes(seg.addr + seg.data.len() as u32, &vec![0u8; tail]);
            }
            debug!("segment 0x{:06x}..0x{:06x} ({} file bytes)", seg.addr, seg.end(), seg.data.len());
        }
        Ok(())
    }

    /// Entry point as a byte address.
    pub fn entry_byte(&self) -> u32 {
        match self.arch {
            Arch::Avr => self.entry.wrapping_mul(2),
            Arch::Arm64 => self.entry.wrapping_mul(4),
        }
    }

    /// Highest address covered by any segment.
    pub fn extent(&self) -> u64 {
        self.segments.iter().map(Segment::end).max().unwrap_or(0)
    }

    /// Render the image as a flat binary starting at address 0.
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.extent() as usize];
        for seg in &self.segments {
            let start = seg.addr as usize;
            out[start..start + seg.data.len()].copy_from_slice(&seg.data);
        }
        out
    }
}

/// Identify the container format from the leading bytes.
pub fn sniff(bytes: &[u8]) -> Option<Format> {
    match bytes {
        [0x7f, b'E', b'L', b'F', ..] => Some(Format::Elf),
        [0xcf, 0xfa, 0xed, 0xfe, ..] | [0xca, 0xfe, 0xba, 0xbe, ..] => Some(Format::MachO),
        [b':', ..] => Some(Format::Hex),
        _ => None,
    }
}

/// Read and parse an image from disk.
pub fn load_file(path: &Path) -> Result<Image, LoadError> {
    let bytes = std::fs::read(path).map_err(|source| LoadError::Io { path: path.to_path_buf(), source })?;
    let image = Image::parse(&bytes)?;
    info!(
        "Loaded {} ({}, {}): {} segment(s), entry 0x{:x}",
        path.display(),
        image.format,
        image.arch,
        image.segments.len(),
        image.entry
    );
    Ok(image)
}
