//! ELF32 loader for AVR executables.
//!
//! Only little-endian 32-bit `ET_EXEC` files for `EM_AVR` (83), as produced by
//! avr-gcc, are accepted. The header and program header table are checked
//! against the raw bytes before goblin parses them, so a truncated file is
//! reported precisely. `PT_LOAD` segments are placed at their physical
//! address; the entry point is converted from bytes to words.

use goblin::elf::header::{EI_CLASS, EI_DATA, EI_VERSION, ELFCLASS32, ELFDATA2LSB, EM_AVR, ET_EXEC, EV_CURRENT};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;

use crate::loader::{Format, Image, LoadError, Segment};
use crate::Arch;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

fn u16le(d: &[u8], o: usize) -> u16 {
    (d[o] as u16) | ((d[o + 1] as u16) << 8)
}
fn u32le(d: &[u8], o: usize) -> u32 {
    (d[o] as u32) | ((d[o+1] as u32)<<8) | ((d[o+2] as u32)<<16) | ((d[o+3] as u32)<<24)
}

fn malformed(msg: impl Into<String>) -> LoadError {
    LoadError::Malformed(msg.into())
}

/// Validate the identification bytes and header fields.
fn check_header(data: &[u8]) -> Result<(), LoadError> {
    if data.len() < EHDR_SIZE {
        return Err(LoadError::Truncated("ELF header"));
    }
    if data[EI_CLASS] != ELFCLASS32 {
        return Err(malformed("only 32-bit ELF supported"));
    }
    if data[EI_DATA] != ELFDATA2LSB {
        return Err(malformed("only little-endian ELF supported"));
    }
    if data[EI_VERSION] != EV_CURRENT || u32le(data, 20) != EV_CURRENT as u32 {
        return Err(malformed("unsupported ELF version"));
    }
    let e_type = u16le(data, 16);
    if e_type != ET_EXEC {
        return Err(malformed(format!("not an executable (e_type={})", e_type)));
    }
    let e_machine = u16le(data, 18);
    if e_machine != EM_AVR {
        return Err(LoadError::UnsupportedArch(format!("ELF machine {}", e_machine)));
    }

    let e_phoff = u32le(data, 28) as u64;
    let e_phentsize = u16le(data, 42) as u64;
    let e_phnum = u16le(data, 44) as u64;
    if e_phnum > 0 && e_phentsize < PHDR_SIZE as u64 {
        return Err(malformed(format!("program header entry size {} too small", e_phentsize)));
    }
    if e_phoff + e_phentsize * e_phnum > data.len() as u64 {
        return Err(LoadError::Truncated("program header table"));
    }
    Ok(())
}

/// Parse an AVR ELF executable.
pub fn parse(data: &[u8]) -> Result<Image, LoadError> {
    check_header(data)?;
    let elf = Elf::parse(data)?;

    let mut segments = Vec::new();
    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        if ph.p_filesz > ph.p_memsz {
            return Err(malformed(format!(
                "segment at 0x{:x}: filesz ({}) larger than memsz ({})",
                ph.p_paddr, ph.p_filesz, ph.p_memsz
            )));
        }
        if ph.p_offset + ph.p_filesz > data.len() as u64 {
            return Err(LoadError::Truncated("segment data"));
        }
        if ph.p_paddr + ph.p_memsz > u32::MAX as u64 {
            return Err(malformed(format!("segment at 0x{:x} exceeds the address space", ph.p_paddr)));
        }
        let start = ph.p_offset as usize;
        segments.push(Segment {
            addr: ph.p_paddr as u32,
            data: data[start..start + ph.p_filesz as usize].to_vec(),
            mem_size: ph.p_memsz as u32,
        });
    }

    Ok(Image {
        format: Format::Elf,
        arch: Arch::Avr,
        entry: (elf.header.e_entry / 2) as u32,
        segments,
    })
}
