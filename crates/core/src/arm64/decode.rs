//! AArch64 opcode classifier.
//!
//! Every 32-bit word is sorted into one of the five top-level encoding groups
//! and then into a family. Only the data-processing (immediate) group is
//! decoded down to operands; the rest are identified by family.

/// Extract bits `hi..=lo` of `raw`.
#[inline]
pub fn bits(raw: u32, hi: u32, lo: u32) -> u32 {
    (raw >> lo) & ((1u32 << (hi - lo + 1)) - 1)
}

#[inline]
pub fn bit(raw: u32, n: u32) -> bool {
    raw & (1 << n) != 0
}

/// Sign-extend the low `width` bits of `v`.
#[inline]
pub fn sign_extend(v: u32, width: u32) -> i64 {
    let shift = 64 - width;
    ((v as i64) << shift) >> shift
}

/// Top-level encoding group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    DataProcImm,
    BranchSys,
    LoadStore,
    DataProcReg,
    SimdFp,
}

pub fn classify(raw: u32) -> Option<Class> {
    if raw & 0x1c00_0000 == 0x1000_0000 {
        Some(Class::DataProcImm)
    } else if raw & 0x1c00_0000 == 0x1400_0000 {
        Some(Class::BranchSys)
    } else if raw & 0x0a00_0000 == 0x0800_0000 {
        Some(Class::LoadStore)
    } else if raw & 0x0e00_0000 == 0x0a00_0000 {
        Some(Class::DataProcReg)
    } else if raw & 0x0e00_0000 == 0x0e00_0000 {
        Some(Class::SimdFp)
    } else {
        None
    }
}

/// Families outside the data-processing (immediate) group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    BranchImm,
    CompareBranch,
    TestBranch,
    CondBranch,
    Exception,
    System,
    BranchReg,
    LoadStore,
    LogicalShifted,
    AddSubShifted,
    AddSubExtended,
    AddSubCarry,
    CondCompareReg,
    CondCompareImm,
    CondSelect,
    DataProc3,
    DataProc2,
    DataProc1,
    SimdFp,
}

impl Family {
    pub fn name(self) -> &'static str {
        match self {
            Family::BranchImm => "branch-imm",
            Family::CompareBranch => "compare-branch",
            Family::TestBranch => "test-branch",
            Family::CondBranch => "cond-branch",
            Family::Exception => "exception",
            Family::System => "system",
            Family::BranchReg => "branch-reg",
            Family::LoadStore => "load-store",
            Family::LogicalShifted => "logical-shifted",
            Family::AddSubShifted => "add-sub-shifted",
            Family::AddSubExtended => "add-sub-extended",
            Family::AddSubCarry => "add-sub-carry",
            Family::CondCompareReg => "cond-compare-reg",
            Family::CondCompareImm => "cond-compare-imm",
            Family::CondSelect => "cond-select",
            Family::DataProc3 => "dp-3src",
            Family::DataProc2 => "dp-2src",
            Family::DataProc1 => "dp-1src",
            Family::SimdFp => "simd-fp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Orr,
    Eor,
    Ands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOp {
    Movn,
    Movz,
    Movk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitfieldOp {
    Sbfm,
    Bfm,
    Ubfm,
}

/// Fully decoded data-processing (immediate) instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpImm {
    Adr { rd: u8, imm: i64 },
    /// `imm` is already scaled by 4 KiB.
    Adrp { rd: u8, imm: i64 },
    AddSub { sf: bool, sub: bool, set_flags: bool, rd: u8, rn: u8, imm12: u16, lsl12: bool },
    Logical { sf: bool, op: LogicOp, rd: u8, rn: u8, imm: u64 },
    MoveWide { sf: bool, op: MoveOp, rd: u8, imm16: u16, shift: u8 },
    Bitfield { sf: bool, op: BitfieldOp, rd: u8, rn: u8, immr: u8, imms: u8 },
    Extr { sf: bool, rd: u8, rn: u8, rm: u8, lsb: u8 },
}

impl DpImm {
    pub fn mnemonic(&self) -> &'static str {
        match *self {
            DpImm::Adr { .. } => "adr",
            DpImm::Adrp { .. } => "adrp",
            DpImm::AddSub { sub, set_flags, .. } => match (sub, set_flags) {
                (false, false) => "add",
                (false, true) => "adds",
                (true, false) => "sub",
                (true, true) => "subs",
            },
            DpImm::Logical { op, .. } => match op {
                LogicOp::And => "and",
                LogicOp::Orr => "orr",
                LogicOp::Eor => "eor",
                LogicOp::Ands => "ands",
            },
            DpImm::MoveWide { op, .. } => match op {
                MoveOp::Movn => "movn",
                MoveOp::Movz => "movz",
                MoveOp::Movk => "movk",
            },
            DpImm::Bitfield { op, .. } => match op {
                BitfieldOp::Sbfm => "sbfm",
                BitfieldOp::Bfm => "bfm",
                BitfieldOp::Ubfm => "ubfm",
            },
            DpImm::Extr { .. } => "extr",
        }
    }
}

/// A classified opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded {
    DpImm(DpImm),
    Other(Family),
}

impl Decoded {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Decoded::DpImm(d) => d.mnemonic(),
            Decoded::Other(f) => f.name(),
        }
    }
}

/// Classify `raw`. `None` means the encoding is unallocated.
pub fn decode(raw: u32) -> Option<Decoded> {
    match classify(raw)? {
        Class::DataProcImm => decode_dp_imm(raw).map(Decoded::DpImm),
        Class::BranchSys => branch_family(raw).map(Decoded::Other),
        Class::LoadStore => Some(Decoded::Other(Family::LoadStore)),
        Class::DataProcReg => dp_reg_family(raw).map(Decoded::Other),
        Class::SimdFp => Some(Decoded::Other(Family::SimdFp)),
    }
}

fn decode_dp_imm(raw: u32) -> Option<DpImm> {
    let sf = bit(raw, 31);
    let rd = bits(raw, 4, 0) as u8;
    let rn = bits(raw, 9, 5) as u8;

    if raw & 0x1f00_0000 == 0x1000_0000 {
        let imm = sign_extend((bits(raw, 23, 5) << 2) | bits(raw, 30, 29), 21);
        return Some(if sf { DpImm::Adrp { rd, imm: imm << 12 } } else { DpImm::Adr { rd, imm } });
    }
    if raw & 0x1f80_0000 == 0x1100_0000 {
        return Some(DpImm::AddSub {
            sf,
            sub: bit(raw, 30),
            set_flags: bit(raw, 29),
            rd,
            rn,
            imm12: bits(raw, 21, 10) as u16,
            lsl12: bit(raw, 22),
        });
    }
    if raw & 0x1f80_0000 == 0x1200_0000 {
        let n = bit(raw, 22);
        if !sf && n {
            return None;
        }
        let imm = decode_bit_masks(sf, n, bits(raw, 15, 10) as u8, bits(raw, 21, 16) as u8)?;
        let op = match bits(raw, 30, 29) {
            0 => LogicOp::And,
            1 => LogicOp::Orr,
            2 => LogicOp::Eor,
            _ => LogicOp::Ands,
        };
        return Some(DpImm::Logical { sf, op, rd, rn, imm });
    }
    if raw & 0x1f80_0000 == 0x1280_0000 {
        let hw = bits(raw, 22, 21) as u8;
        if !sf && hw >= 2 {
            return None;
        }
        let op = match bits(raw, 30, 29) {
            0 => MoveOp::Movn,
            2 => MoveOp::Movz,
            3 => MoveOp::Movk,
            _ => return None,
        };
        return Some(DpImm::MoveWide { sf, op, rd, imm16: bits(raw, 20, 5) as u16, shift: hw * 16 });
    }
    if raw & 0x1f80_0000 == 0x1300_0000 {
        let immr = bits(raw, 21, 16) as u8;
        let imms = bits(raw, 15, 10) as u8;
        if bit(raw, 22) != sf || (!sf && (immr | imms) & 0x20 != 0) {
            return None;
        }
        let op = match bits(raw, 30, 29) {
            0 => BitfieldOp::Sbfm,
            1 => BitfieldOp::Bfm,
            2 => BitfieldOp::Ubfm,
            _ => return None,
        };
        return Some(DpImm::Bitfield { sf, op, rd, rn, immr, imms });
    }
    if raw & 0x1f80_0000 == 0x1380_0000 {
        let lsb = bits(raw, 15, 10) as u8;
        if bits(raw, 30, 29) != 0 || bit(raw, 21) || bit(raw, 22) != sf || (!sf && lsb & 0x20 != 0) {
            return None;
        }
        return Some(DpImm::Extr { sf, rd, rn, rm: bits(raw, 20, 16) as u8, lsb });
    }
    None
}

fn branch_family(raw: u32) -> Option<Family> {
    Some(if raw & 0x7c00_0000 == 0x1400_0000 {
        Family::BranchImm
    } else if raw & 0x7e00_0000 == 0x3400_0000 {
        Family::CompareBranch
    } else if raw & 0x7e00_0000 == 0x3600_0000 {
        Family::TestBranch
    } else if raw & 0xfe00_0000 == 0x5400_0000 {
        Family::CondBranch
    } else if raw & 0xff00_0000 == 0xd400_0000 {
        Family::Exception
    } else if raw & 0xffc0_0000 == 0xd500_0000 {
        Family::System
    } else if raw & 0xfe00_0000 == 0xd600_0000 {
        Family::BranchReg
    } else {
        return None;
    })
}

fn dp_reg_family(raw: u32) -> Option<Family> {
    Some(if raw & 0x1f00_0000 == 0x0a00_0000 {
        Family::LogicalShifted
    } else if raw & 0x1f20_0000 == 0x0b00_0000 {
        Family::AddSubShifted
    } else if raw & 0x1f20_0000 == 0x0b20_0000 {
        Family::AddSubExtended
    } else if raw & 0x1fe0_0000 == 0x1a00_0000 {
        Family::AddSubCarry
    } else if raw & 0x1fe0_0800 == 0x1a40_0000 {
        Family::CondCompareReg
    } else if raw & 0x1fe0_0800 == 0x1a40_0800 {
        Family::CondCompareImm
    } else if raw & 0x1fe0_0000 == 0x1a80_0000 {
        Family::CondSelect
    } else if raw & 0x1f00_0000 == 0x1b00_0000 {
        Family::DataProc3
    } else if raw & 0x5fe0_0000 == 0x1ac0_0000 {
        Family::DataProc2
    } else if raw & 0x5fe0_0000 == 0x5ac0_0000 {
        Family::DataProc1
    } else {
        return None;
    })
}

/// The architectural DecodeBitMasks for logical immediates.
///
/// Returns `None` for reserved encodings (element of all ones, or a
/// 64-bit element requested by a 32-bit instruction).
pub fn decode_bit_masks(sf: bool, n: bool, imms: u8, immr: u8) -> Option<u64> {
    let combined = ((n as u32) << 6) | (!imms as u32 & 0x3f);
    if combined < 2 {
        return None;
    }
    let len = 31 - combined.leading_zeros();
    if !sf && len > 5 {
        return None;
    }
    let esize = 1u32 << len;
    let levels = (esize - 1) as u8;
    let s = imms & levels;
    let r = (immr & levels) as u32;
    if s == levels {
        return None;
    }

    let welem: u64 = (1u64 << (s + 1)) - 1;
    let emask = if esize == 64 { u64::MAX } else { (1u64 << esize) - 1 };
    let elem = if r == 0 { welem } else { ((welem >> r) | (welem << (esize - r))) & emask };

    let mut result = 0u64;
    let mut i = 0;
    while i < 64 {
        result |= elem << i;
        i += esize;
    }
    if !sf {
        result &= 0xffff_ffff;
    }
    Some(result)
}
