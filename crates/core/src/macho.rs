//! Mach-O loader for ARM64 executables.
//!
//! Accepts a thin 64-bit Mach-O or a fat container, from which the ARM64
//! slice is taken. Header and load command parsing is done by goblin; this
//! module checks the CPU and file type, keeps the segments that occupy
//! memory, and rebases them so the lowest loaded `vmaddr` lands at 0. The
//! entry point (`LC_MAIN` or `LC_UNIXTHREAD`) is reported in 32-bit
//! instruction words.

use goblin::mach::cputype::CPU_TYPE_ARM64;
use goblin::mach::header::MH_EXECUTE;
use goblin::mach::{Mach, MachO, MultiArch};

use crate::loader::{Format, Image, LoadError, Segment};
use crate::Arch;

const HEADER_SIZE: usize = 32;

fn malformed(msg: impl Into<String>) -> LoadError {
    LoadError::Malformed(msg.into())
}

/// Parse a thin or fat Mach-O file.
pub fn parse(data: &[u8]) -> Result<Image, LoadError> {
    match Mach::parse(data)? {
        Mach::Fat(fat) => {
            let slice = arm64_slice(&fat, data)?;
            if slice.len() < HEADER_SIZE {
                return Err(LoadError::Truncated("Mach-O header"));
            }
            match Mach::parse(slice)? {
                Mach::Binary(macho) => to_image(&macho),
                Mach::Fat(_) => Err(malformed("nested fat container")),
            }
        }
        Mach::Binary(macho) => to_image(&macho),
    }
}

/// Locate the ARM64 slice inside a fat container.
fn arm64_slice<'a>(fat: &MultiArch<'a>, data: &'a [u8]) -> Result<&'a [u8], LoadError> {
    let Some(arch) = fat.find_cputype(CPU_TYPE_ARM64)? else {
        let seen: Vec<String> = fat
            .iter_arches()
            .filter_map(|a| a.ok())
            .map(|a| format!("0x{:x}", a.cputype))
            .collect();
        return Err(LoadError::UnsupportedArch(format!("no arm64 slice (found {})", seen.join(", "))));
    };
    let start = arch.offset as usize;
    start
        .checked_add(arch.size as usize)
        .and_then(|end| data.get(start..end))
        .ok_or(LoadError::Truncated("fat slice"))
}

fn to_image(macho: &MachO) -> Result<Image, LoadError> {
    if macho.header.cputype != CPU_TYPE_ARM64 {
        return Err(LoadError::UnsupportedArch(format!("Mach-O cputype 0x{:x}", macho.header.cputype)));
    }
    if !macho.is_64 || !macho.little_endian {
        return Err(malformed("not a 64-bit little-endian Mach-O"));
    }
    if macho.header.filetype != MH_EXECUTE {
        return Err(malformed(format!("not an executable (filetype={})", macho.header.filetype)));
    }

    let loaded: Vec<_> = macho.segments.iter().filter(|s| s.vmsize > 0 && s.initprot != 0).collect();
    let base = loaded.iter().map(|s| s.vmaddr).min().unwrap_or(0);

    let mut segments = Vec::with_capacity(loaded.len());
    for s in &loaded {
        if s.filesize > s.vmsize {
            return Err(malformed(format!("segment at 0x{:x}: filesize larger than vmsize", s.vmaddr)));
        }
        if (s.data.len() as u64) < s.filesize {
            return Err(LoadError::Truncated("segment data"));
        }
        let addr = s.vmaddr - base;
        match addr.checked_add(s.vmsize) {
            Some(end) if end <= u32::MAX as u64 => {}
            _ => return Err(malformed(format!("segment at 0x{:x} too large", s.vmaddr))),
        }
        segments.push(Segment { addr: addr as u32, data: s.data.to_vec(), mem_size: s.vmsize as u32 });
    }

    let has_entry = macho.entry != 0 || macho.old_style_entry;
    let entry_addr = if has_entry {
        let addr = macho
            .entry
            .checked_sub(base)
            .ok_or_else(|| malformed(format!("entry 0x{:x} below image base", macho.entry)))?;
        if !segments.iter().any(|s| addr >= s.addr as u64 && addr < s.end()) {
            return Err(malformed(format!("entry 0x{:x} outside any segment", macho.entry)));
        }
        addr
    } else {
        0
    };

    Ok(Image {
        format: Format::MachO,
        arch: Arch::Arm64,
        entry: (entry_addr / 4) as u32,
        segments,
    })
}
