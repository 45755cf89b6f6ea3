//! Memory and port inspection helpers for the REPL and `--dump`.

use crate::memory::Memory;

/// Format a hex dump of memory with ASCII sidebar.
///
/// Lines are 16 bytes wide. The range is clipped to the memory size.
pub fn dump_ram<M: Memory + ?Sized>(mem: &M, start: u32, length: u32) -> String {
    let mut s = String::new();
    let end = start.saturating_add(length).min(mem.size());
    let mut addr = start;
    while addr < end {
        let line_end = (addr + 16).min(end);
        s.push_str(&format!("{:04X}: ", addr));
        for i in addr..addr + 16 {
            if i < line_end {
                s.push_str(&format!("{:02X} ", mem.read_u8(i)));
            } else {
                s.push_str("   ");
            }
            if i == addr + 7 {
                s.push(' ');
            }
        }
        s.push(' ');
        for i in addr..line_end {
            let c = mem.read_u8(i);
            if (0x20..0x7f).contains(&c) {
                s.push(c as char);
            } else {
                s.push('.');
            }
        }
        s.push('\n');
        addr += 16;
    }
    s
}

/// Format the non-zero entries of a port space, eight per line.
pub fn dump_ports(ports: &[u8]) -> String {
    let mut s = String::new();
    let mut col = 0;
    for (port, &v) in ports.iter().enumerate() {
        if v == 0 {
            continue;
        }
        s.push_str(&format!("  0x{:02X}={:02X}", port, v));
        col += 1;
        if col % 8 == 0 {
            s.push('\n');
        }
    }
    if col == 0 {
        s.push_str("  (all zero)");
    }
    if !s.ends_with('\n') {
        s.push('\n');
    }
    s
}
