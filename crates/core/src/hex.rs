//! Intel HEX reader and writer.
//!
//! Parses `:LLAAAATT[DD...]CC` records into image segments and renders
//! segments back to HEX text. Record types 00 (data), 01 (EOF), 02 (extended
//! segment address) and 04 (extended linear address) place data; 03 and 05
//! carry the start address.

use crate::loader::{Format, Image, LoadError, Segment};
use crate::Arch;

fn err(line: usize, reason: impl Into<String>) -> LoadError {
    LoadError::Hex { line, reason: reason.into() }
}

/// Parse Intel HEX text into an AVR image.
///
/// Adjacent data records are merged into one segment. Nothing is placed
/// in memory until [`Image::load_into`].
pub fn parse(hex: &str) -> Result<Image, LoadError> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut base_addr: u32 = 0;
    let mut entry_byte: u32 = 0;
    let mut saw_eof = false;

    for (idx, line) in hex.lines().enumerate() {
        let lineno = idx + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(body) = line.strip_prefix(':') else {
            return Err(err(lineno, "record does not start with ':'"));
        };

        let bytes = hex_line_to_bytes(body).map_err(|e| err(lineno, e))?;
        if bytes.len() < 5 {
            return Err(err(lineno, "line too short"));
        }

        let byte_count = bytes[0] as usize;
        let addr = ((bytes[1] as u16) << 8) | bytes[2] as u16;
        let record_type = bytes[3];
        if bytes.len() != byte_count + 5 {
            return Err(err(lineno, format!("length mismatch: header says {} data bytes", byte_count)));
        }

        let sum: u8 = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            return Err(err(lineno, format!("checksum error: sum={}", sum)));
        }
        let payload = &bytes[4..4 + byte_count];

        match record_type {
            0x00 => {
                let full_addr = base_addr.wrapping_add(addr as u32);
                match segments.last_mut() {
                    Some(seg) if seg.addr as u64 + seg.data.len() as u64 == full_addr as u64 => {
                        seg.data.extend_from_slice(payload);
                        seg.mem_size = seg.data.len() as u32;
                    }
                    _ => segments.push(Segment {
                        addr: full_addr,
                        data: payload.to_vec(),
                        mem_size: byte_count as u32,
                    }),
                }
            }
            0x01 => {
                saw_eof = true;
                break;
            }
            0x02 | 0x04 if byte_count == 2 => {
                let v = ((payload[0] as u32) << 8) | payload[1] as u32;
                base_addr = if record_type == 0x02 { v << 4 } else { v << 16 };
            }
            0x03 if byte_count == 4 => {
                let cs = ((payload[0] as u32) << 8) | payload[1] as u32;
                let ip = ((payload[2] as u32) << 8) | payload[3] as u32;
                entry_byte = (cs << 4) + ip;
            }
            0x05 if byte_count == 4 => {
                entry_byte = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            }
            0x02..=0x05 => return Err(err(lineno, format!("bad length for record type {:02X}", record_type))),
            t => return Err(err(lineno, format!("unknown record type {:02X}", t))),
        }
    }

    if !saw_eof {
        return Err(LoadError::Truncated("Intel HEX (no EOF record)"));
    }
    Ok(Image { format: Format::Hex, arch: Arch::Avr, entry: entry_byte / 2, segments })
}

/// Render segments as Intel HEX with 16-byte data records.
///
/// An extended linear address record is emitted whenever the upper 16 bits
/// of the address change. `entry` (a byte address) is written as a start
/// linear address record when non-zero.
pub fn encode(segments: &[Segment], entry: u32) -> String {
    let mut out = String::new();
    let mut upper: u32 = 0;
    for seg in segments {
        let mut data = seg.data.clone();
        data.resize(seg.mem_size.max(seg.data.len() as u32) as usize, 0);
        let mut addr = seg.addr;
        let mut rest = &data[..];
        while !rest.is_empty() {
            if addr >> 16 != upper {
                upper = addr >> 16;
                out.push_str(&record(0x04, 0, &[(upper >> 8) as u8, upper as u8]));
            }
            // never let a record cross a 64 KiB boundary
            let room = 0x10000 - (addr & 0xffff) as usize;
            let n = rest.len().min(16).min(room);
            out.push_str(&record(0x00, addr as u16, &rest[..n]));
            addr += n as u32;
            rest = &rest[n..];
        }
    }
    if entry != 0 {
        out.push_str(&record(0x05, 0, &entry.to_be_bytes()));
    }
    out.push_str(&record(0x01, 0, &[]));
    out
}

fn record(kind: u8, addr: u16, data: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(data.len() + 5);
    bytes.push(data.len() as u8);
    bytes.push((addr >> 8) as u8);
    bytes.push(addr as u8);
    bytes.push(kind);
    bytes.extend_from_slice(data);
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    bytes.push(sum.wrapping_neg());

    let mut s = String::with_capacity(bytes.len() * 2 + 2);
    s.push(':');
    for b in bytes {
        s.push_str(&format!("{:02X}", b));
    }
    s.push('\n');
    s
}

/// Convert hex character pairs to bytes
fn hex_line_to_bytes(hex_str: &str) -> Result<Vec<u8>, String> {
    let chars: Vec<char> = hex_str.chars().collect();
    if chars.len() % 2 != 0 {
        return Err("odd number of hex characters".into());
    }

    let mut bytes = Vec::with_capacity(chars.len() / 2);
    for chunk in chars.chunks(2) {
        let hi = hex_char(chunk[0])?;
        let lo = hex_char(chunk[1])?;
        bytes.push((hi << 4) | lo);
    }
    Ok(bytes)
}

fn hex_char(c: char) -> Result<u8, String> {
    c.to_digit(16).map(|d| d as u8).ok_or_else(|| format!("invalid hex character: {}", c))
}
