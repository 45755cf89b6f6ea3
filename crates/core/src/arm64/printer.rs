//! AArch64 assembly text for classified opcodes.

use super::decode::{self, Decoded, DpImm, LogicOp};

/// General purpose register name. Register 31 is the stack pointer when
/// `sp` is set, the zero register otherwise.
fn reg(n: u8, sf: bool, sp: bool) -> String {
    match (n, sf, sp) {
        (31, true, true) => "sp".into(),
        (31, false, true) => "wsp".into(),
        (31, true, false) => "xzr".into(),
        (31, false, false) => "wzr".into(),
        (n, true, _) => format!("x{}", n),
        (n, false, _) => format!("w{}", n),
    }
}

fn signed_hex(v: i64) -> String {
    if v < 0 {
        format!("#-0x{:x}", v.unsigned_abs())
    } else {
        format!("#0x{:x}", v)
    }
}

fn dp_imm(d: &DpImm) -> String {
    let m = d.mnemonic();
    match *d {
        DpImm::Adr { rd, imm } | DpImm::Adrp { rd, imm } => {
            format!("{} {}, {}", m, reg(rd, true, false), signed_hex(imm))
        }
        DpImm::AddSub { sf, set_flags, rd, rn, imm12, lsl12, .. } => {
            let mut s = format!("{} {}, {}, #0x{:x}", m, reg(rd, sf, !set_flags), reg(rn, sf, true), imm12);
            if lsl12 {
                s.push_str(", lsl #12");
            }
            s
        }
        DpImm::Logical { sf, op, rd, rn, imm } => {
            format!("{} {}, {}, #0x{:x}", m, reg(rd, sf, op != LogicOp::Ands), reg(rn, sf, false), imm)
        }
        DpImm::MoveWide { sf, rd, imm16, shift, .. } => {
            let mut s = format!("{} {}, #0x{:x}", m, reg(rd, sf, false), imm16);
            if shift != 0 {
                s.push_str(&format!(", lsl #{}", shift));
            }
            s
        }
        DpImm::Bitfield { sf, rd, rn, immr, imms, .. } => {
            format!("{} {}, {}, #{}, #{}", m, reg(rd, sf, false), reg(rn, sf, false), immr, imms)
        }
        DpImm::Extr { sf, rd, rn, rm, lsb } => format!(
            "{} {}, {}, {}, #{}",
            m,
            reg(rd, sf, false),
            reg(rn, sf, false),
            reg(rm, sf, false),
            lsb
        ),
    }
}

/// Disassemble one 32-bit opcode.
///
/// Data-processing (immediate) forms are printed with operands, other
/// families as the family name and the raw word, and unallocated words as
/// `.inst`.
pub fn format(raw: u32) -> String {
    match decode::decode(raw) {
        Some(Decoded::DpImm(d)) => dp_imm(&d),
        Some(Decoded::Other(f)) => format!("{} 0x{:08x}", f.name(), raw),
        None => format!(".inst 0x{:08x}", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_dp_imm() {
        assert_eq!(format(0xd280_0540), "movz x0, #0x2a");
        assert_eq!(format(0x9140_43e1), "add x1, sp, #0x10, lsl #12");
        assert_eq!(format(0x9240_1c20), "and x0, x1, #0xff");
        assert_eq!(format(0xd344_fc20), "ubfm x0, x1, #4, #63");
        assert_eq!(format(0x93c2_2020), "extr x0, x1, x2, #8");
        assert_eq!(format(0x70ff_ffe2), "adr x2, #-0x1");
        // movk w3, #0xbeef, lsl #16
        assert_eq!(format(0x72b7_dde3), "movk w3, #0xbeef, lsl #16");
    }

    #[test]
    fn test_format_zero_register() {
        // subs xzr, x1, #1 (cmp x1, #1)
        assert_eq!(format(0xf100_043f), "subs xzr, x1, #0x1");
        // orr w0, wzr, #0x55555555
        assert_eq!(format(0x3200_f3e0), "orr w0, wzr, #0x55555555");
    }

    #[test]
    fn test_format_other() {
        assert_eq!(format(0xd65f_03c0), "branch-reg 0xd65f03c0");
        assert_eq!(format(0x0000_0000), ".inst 0x00000000");
    }
}
