//! AVR instruction disassembler.
//!
//! Converts decoded [`Instruction`] values back to assembly text. Used for the
//! trace log, the REPL and register dumps.

use crate::memory::Memory;
use crate::opcodes::{self, Instruction, Mode, Pointer, Variant};

fn pointer(ptr: Pointer, mode: Mode) -> String {
    let name = match ptr {
        Pointer::X => 'X',
        Pointer::Y => 'Y',
        Pointer::Z => 'Z',
    };
    match mode {
        Mode::Plain => name.to_string(),
        Mode::PostInc => format!("{}+", name),
        Mode::PreDec => format!("-{}", name),
    }
}

/// Format a decoded instruction as an assembly string.
///
/// `pc` (word address) resolves relative branch targets and `next` is the
/// word following the opcode, used by the two-word forms.
pub fn disassemble(inst: &Instruction, pc: u16, next: u16) -> String {
    let m = inst.mnemonic();
    let relative = |k: i16| {
        let target = pc.wrapping_add(1).wrapping_add(k as u16);
        format!("{} .{:+} ; 0x{:04X}", m, k as i32 * 2, target as u32 * 2)
    };
    match *inst {
        Instruction::Add { d, r } | Instruction::Adc { d, r } | Instruction::Sub { d, r }
        | Instruction::Sbc { d, r } | Instruction::And { d, r } | Instruction::Or { d, r }
        | Instruction::Eor { d, r } | Instruction::Mul { d, r } | Instruction::Muls { d, r }
        | Instruction::Mulsu { d, r } | Instruction::Fmul { d, r } | Instruction::Fmuls { d, r }
        | Instruction::Fmulsu { d, r } | Instruction::Cp { d, r } | Instruction::Cpc { d, r }
        | Instruction::Cpse { d, r } | Instruction::Mov { d, r } => format!("{} R{}, R{}", m, d, r),

        Instruction::Subi { d, k } | Instruction::Sbci { d, k } | Instruction::Andi { d, k }
        | Instruction::Ori { d, k } | Instruction::Cpi { d, k } | Instruction::Ldi { d, k } => {
            format!("{} R{}, 0x{:02X}", m, d, k)
        }

        Instruction::Com { d } | Instruction::Neg { d } | Instruction::Inc { d }
        | Instruction::Dec { d } | Instruction::Swap { d } | Instruction::Asr { d }
        | Instruction::Lsr { d } | Instruction::Ror { d } | Instruction::Pop { d } => {
            format!("{} R{}", m, d)
        }
        Instruction::Push { r } => format!("PUSH R{}", r),

        Instruction::Adiw { d, k } | Instruction::Sbiw { d, k } => {
            format!("{} R{}:R{}, {}", m, d + 1, d, k)
        }
        Instruction::Movw { d, r } => format!("MOVW R{}:R{}, R{}:R{}", d + 1, d, r + 1, r),

        Instruction::Lds { d } => format!("LDS R{}, 0x{:04X}", d, next),
        Instruction::Sts { r } => format!("STS 0x{:04X}, R{}", next, r),
        Instruction::LdsShort { d, k } => format!("LDS R{}, 0x{:02X}", d, k),
        Instruction::StsShort { k, r } => format!("STS 0x{:02X}, R{}", k, r),
        Instruction::Ld { d, ptr, mode } => format!("LD R{}, {}", d, pointer(ptr, mode)),
        Instruction::St { r, ptr, mode } => format!("ST {}, R{}", pointer(ptr, mode), r),
        Instruction::Ldd { d, ptr, q } => format!("LDD R{}, {}+{}", d, pointer(ptr, Mode::Plain), q),
        Instruction::Std { r, ptr, q } => format!("STD {}+{}, R{}", pointer(ptr, Mode::Plain), q, r),
        Instruction::Lpm { d, inc } | Instruction::Elpm { d, inc } => {
            format!("{} R{}, Z{}", m, d, if inc { "+" } else { "" })
        }

        Instruction::Bld { d, b } | Instruction::Bst { d, b } => format!("{} R{}, {}", m, d, b),
        Instruction::Sbrc { r, b } | Instruction::Sbrs { r, b } => format!("{} R{}, {}", m, r, b),
        Instruction::Cbi { a, b } | Instruction::Sbi { a, b } | Instruction::Sbic { a, b }
        | Instruction::Sbis { a, b } => format!("{} 0x{:02X}, {}", m, a, b),
        Instruction::In { d, a } => format!("IN R{}, 0x{:02X}", d, a),
        Instruction::Out { a, r } => format!("OUT 0x{:02X}, R{}", a, r),

        Instruction::Rjmp { k } | Instruction::Rcall { k } => relative(k),
        Instruction::Brbs { k, .. } | Instruction::Brbc { k, .. } => relative(k as i16),
        Instruction::Jmp { hi } | Instruction::Call { hi } => {
            let target = ((hi as u32) << 16) | next as u32;
            format!("{} 0x{:06X}", m, target * 2)
        }

        Instruction::Nop | Instruction::Spm | Instruction::Bset { .. } | Instruction::Bclr { .. }
        | Instruction::Ijmp | Instruction::Eijmp | Instruction::Icall | Instruction::Eicall
        | Instruction::Ret | Instruction::Reti | Instruction::Sleep | Instruction::Break
        | Instruction::Wdr => m.to_string(),
    }
}

/// Format the SREG byte as a flag string like "ithsvnzc" (lowercase=clear, UPPER=set).
pub fn format_sreg(sreg: u8) -> String {
    let flags = ['I', 'T', 'H', 'S', 'V', 'N', 'Z', 'C'];
    flags
        .iter()
        .enumerate()
        .map(|(i, &f)| if sreg & (1 << (7 - i)) != 0 { f } else { f.to_ascii_lowercase() })
        .collect()
}

/// Disassemble the byte range `start..end` of a memory.
///
/// Returns lines of `"0xAAAA: OPCODE  MNEMONIC"`. Words that do not decode
/// are printed as `.dw`.
pub fn disassemble_range<M: Memory + ?Sized>(
    mem: &M,
    start: u32,
    end: u32,
    variant: Variant,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut addr = start & !1;
    let end = end.min(mem.size());
    while addr < end {
        let word = mem.read_u16(addr);
        let next = mem.read_u16(addr + 2);
        let pc = (addr / 2) as u16;
        match opcodes::decode(word, variant) {
            Some(inst) if inst.words() == 2 => {
                lines.push(format!("0x{:04X}: {:04X} {:04X}  {}", addr, word, next,
                    disassemble(&inst, pc, next)));
                addr += 4;
            }
            Some(inst) => {
                lines.push(format!("0x{:04X}: {:04X}       {}", addr, word,
                    disassemble(&inst, pc, next)));
                addr += 2;
            }
            None => {
                lines.push(format!("0x{:04X}: {:04X}       .dw 0x{:04X}", addr, word, word));
                addr += 2;
            }
        }
    }
    lines
}
