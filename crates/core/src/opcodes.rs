//! AVR instruction decoder.
//!
//! Classification runs over a fixed list of mask tiers, widest mask first.
//! Each tier ANDs the opcode with its mask and looks the result up in an
//! exact table; the first hit names the instruction ([`Op`]) and the operand
//! fields are then sliced out by [`crate::operands`]. An opcode that hits no
//! table in any tier is illegal.
//!
//! Only the first word is inspected. For the two-word forms (JMP, CALL,
//! LDS, STS) the execution handler fetches the second word itself.

use serde::{Deserialize, Serialize};

use crate::operands::*;

/// Instruction set flavour used while decoding.
///
/// The reduced core (ATtiny4/5/9/10 and friends) reuses the LDD/STD `q >= 32`
/// encodings for a one-word LDS/STS with a 7-bit address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Enhanced,
    Reduced,
}

/// Index register used by indirect loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    X,
    Y,
    Z,
}

/// Addressing mode of LD/ST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Plain,
    PostInc,
    PreDec,
}

/// Instruction identity, as found in the decode tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Nop,
    Movw, Muls, Mulsu, Fmul, Fmuls, Fmulsu,
    Cpc, Sbc, Add, Cpse, Cp, Sub, Adc, And, Eor, Or, Mov, Mul,
    Cpi, Sbci, Subi, Ori, Andi, Ldi,
    Rjmp, Rcall,
    In, Out,
    Lds, Sts, LdsShort, StsShort,
    Ld(Pointer, Mode), St(Pointer, Mode), Ldd(Pointer), Std(Pointer),
    Lpm0, Lpm, Elpm0, Elpm, Spm,
    Push, Pop,
    Com, Neg, Swap, Inc, Asr, Lsr, Ror, Dec,
    Bset, Bclr,
    Ijmp, Eijmp, Icall, Eicall, Ret, Reti, Jmp, Call,
    Sleep, Break, Wdr,
    Adiw, Sbiw,
    Cbi, Sbic, Sbi, Sbis,
    Bld, Bst, Sbrc, Sbrs,
    Brbs, Brbc,
}

/// Decoded AVR instruction with operands.
///
/// `d` and `r` are register indices (0–31), `k` an immediate, `a` an I/O
/// port number (0–63), `b` a bit index and `s` an SREG bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    // Arithmetic and logic
    Add { d: u8, r: u8 },
    Adc { d: u8, r: u8 },
    Sub { d: u8, r: u8 },
    Sbc { d: u8, r: u8 },
    And { d: u8, r: u8 },
    Or { d: u8, r: u8 },
    Eor { d: u8, r: u8 },
    Subi { d: u8, k: u8 },
    Sbci { d: u8, k: u8 },
    Andi { d: u8, k: u8 },
    Ori { d: u8, k: u8 },
    Com { d: u8 },
    Neg { d: u8 },
    Inc { d: u8 },
    Dec { d: u8 },
    Adiw { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    // Multiply
    Mul { d: u8, r: u8 },
    Muls { d: u8, r: u8 },
    Mulsu { d: u8, r: u8 },
    Fmul { d: u8, r: u8 },
    Fmuls { d: u8, r: u8 },
    Fmulsu { d: u8, r: u8 },
    // Compare
    Cp { d: u8, r: u8 },
    Cpc { d: u8, r: u8 },
    Cpi { d: u8, k: u8 },
    Cpse { d: u8, r: u8 },
    // Data transfer
    Mov { d: u8, r: u8 },
    Movw { d: u8, r: u8 },
    Ldi { d: u8, k: u8 },
    /// Second word holds the address.
    Lds { d: u8 },
    /// Second word holds the address.
    Sts { r: u8 },
    LdsShort { d: u8, k: u8 },
    StsShort { k: u8, r: u8 },
    Ld { d: u8, ptr: Pointer, mode: Mode },
    St { r: u8, ptr: Pointer, mode: Mode },
    Ldd { d: u8, ptr: Pointer, q: u8 },
    Std { r: u8, ptr: Pointer, q: u8 },
    Lpm { d: u8, inc: bool },
    Elpm { d: u8, inc: bool },
    Spm,
    Push { r: u8 },
    Pop { d: u8 },
    // Shift and bit
    Swap { d: u8 },
    Asr { d: u8 },
    Lsr { d: u8 },
    Ror { d: u8 },
    Bset { s: u8 },
    Bclr { s: u8 },
    Bld { d: u8, b: u8 },
    Bst { d: u8, b: u8 },
    // I/O
    In { d: u8, a: u8 },
    Out { a: u8, r: u8 },
    Cbi { a: u8, b: u8 },
    Sbi { a: u8, b: u8 },
    Sbic { a: u8, b: u8 },
    Sbis { a: u8, b: u8 },
    // Control flow
    Rjmp { k: i16 },
    Rcall { k: i16 },
    /// Bits 21..16 of the target; the low 16 bits follow in the second word.
    Jmp { hi: u8 },
    Call { hi: u8 },
    Ijmp,
    Eijmp,
    Icall,
    Eicall,
    Ret,
    Reti,
    Sbrc { r: u8, b: u8 },
    Sbrs { r: u8, b: u8 },
    Brbs { s: u8, k: i8 },
    Brbc { s: u8, k: i8 },
    // MCU control
    Sleep,
    Break,
    Wdr,
}

struct Tier {
    mask: u16,
    table: &'static [(u16, Op)],
}

use Mode::{Plain, PostInc, PreDec};
use Pointer::{X, Y, Z};

const TIERS: &[Tier] = &[
    Tier {
        mask: 0xffff,
        table: &[
            (0x0000, Op::Nop),
            (0x9409, Op::Ijmp),
            (0x9419, Op::Eijmp),
            (0x9408, Op::Bset), (0x9418, Op::Bset), (0x9428, Op::Bset), (0x9438, Op::Bset),
            (0x9448, Op::Bset), (0x9458, Op::Bset), (0x9468, Op::Bset), (0x9478, Op::Bset),
            (0x9488, Op::Bclr), (0x9498, Op::Bclr), (0x94a8, Op::Bclr), (0x94b8, Op::Bclr),
            (0x94c8, Op::Bclr), (0x94d8, Op::Bclr), (0x94e8, Op::Bclr), (0x94f8, Op::Bclr),
            (0x9509, Op::Icall),
            (0x9519, Op::Eicall),
            (0x9508, Op::Ret),
            (0x9518, Op::Reti),
            (0x9588, Op::Sleep),
            (0x9598, Op::Break),
            (0x95a8, Op::Wdr),
            (0x95c8, Op::Lpm0),
            (0x95d8, Op::Elpm0),
            (0x95e8, Op::Spm),
        ],
    },
    Tier {
        mask: 0xfe0f,
        table: &[
            (0x900f, Op::Pop),
            (0x920f, Op::Push),
            (0x9000, Op::Lds),
            (0x9200, Op::Sts),
            (0x9400, Op::Com),
            (0x9401, Op::Neg),
            (0x9402, Op::Swap),
            (0x9403, Op::Inc),
            (0x9405, Op::Asr),
            (0x9406, Op::Lsr),
            (0x9407, Op::Ror),
            (0x940a, Op::Dec),
            (0x900c, Op::Ld(X, Plain)),
            (0x900d, Op::Ld(X, PostInc)),
            (0x900e, Op::Ld(X, PreDec)),
            (0x8008, Op::Ld(Y, Plain)),
            (0x9009, Op::Ld(Y, PostInc)),
            (0x900a, Op::Ld(Y, PreDec)),
            (0x8000, Op::Ld(Z, Plain)),
            (0x9001, Op::Ld(Z, PostInc)),
            (0x9002, Op::Ld(Z, PreDec)),
            (0x920c, Op::St(X, Plain)),
            (0x920d, Op::St(X, PostInc)),
            (0x920e, Op::St(X, PreDec)),
            (0x8208, Op::St(Y, Plain)),
            (0x9209, Op::St(Y, PostInc)),
            (0x920a, Op::St(Y, PreDec)),
            (0x8200, Op::St(Z, Plain)),
            (0x9201, Op::St(Z, PostInc)),
            (0x9202, Op::St(Z, PreDec)),
        ],
    },
    Tier {
        mask: 0xff88,
        table: &[
            (0x0300, Op::Mulsu),
            (0x0308, Op::Fmul),
            (0x0380, Op::Fmuls),
            (0x0388, Op::Fmulsu),
        ],
    },
    Tier {
        mask: 0xfe0e,
        table: &[
            (0x9004, Op::Lpm),
            (0x9006, Op::Elpm),
            (0x940c, Op::Jmp),
            (0x940e, Op::Call),
        ],
    },
    Tier {
        mask: 0xfc07,
        table: &[
            (0xf000, Op::Brbs), (0xf001, Op::Brbs), (0xf002, Op::Brbs), (0xf003, Op::Brbs),
            (0xf004, Op::Brbs), (0xf005, Op::Brbs), (0xf006, Op::Brbs), (0xf007, Op::Brbs),
            (0xf400, Op::Brbc), (0xf401, Op::Brbc), (0xf402, Op::Brbc), (0xf403, Op::Brbc),
            (0xf404, Op::Brbc), (0xf405, Op::Brbc), (0xf406, Op::Brbc), (0xf407, Op::Brbc),
        ],
    },
    Tier {
        mask: 0xff00,
        table: &[
            (0x0100, Op::Movw),
            (0x0200, Op::Muls),
            (0x9600, Op::Adiw),
            (0x9700, Op::Sbiw),
            (0x9800, Op::Cbi),
            (0x9900, Op::Sbic),
            (0x9a00, Op::Sbi),
            (0x9b00, Op::Sbis),
        ],
    },
    Tier {
        mask: 0xfe08,
        table: &[
            (0xf800, Op::Bld),
            (0xfa00, Op::Bst),
            (0xfc00, Op::Sbrc),
            (0xfe00, Op::Sbrs),
        ],
    },
    Tier {
        mask: 0xfc00,
        table: &[
            (0x0400, Op::Cpc),
            (0x0800, Op::Sbc),
            (0x0c00, Op::Add),
            (0x1000, Op::Cpse),
            (0x1400, Op::Cp),
            (0x1800, Op::Sub),
            (0x1c00, Op::Adc),
            (0x2000, Op::And),
            (0x2400, Op::Eor),
            (0x2800, Op::Or),
            (0x2c00, Op::Mov),
            (0x9c00, Op::Mul),
        ],
    },
    Tier {
        mask: 0xf800,
        table: &[
            (0xb000, Op::In),
            (0xb800, Op::Out),
            (0xa000, Op::LdsShort),
            (0xa800, Op::StsShort),
        ],
    },
    Tier {
        mask: 0xd208,
        table: &[
            (0x8008, Op::Ldd(Y)),
            (0x8000, Op::Ldd(Z)),
            (0x8208, Op::Std(Y)),
            (0x8200, Op::Std(Z)),
        ],
    },
    Tier {
        mask: 0xf000,
        table: &[
            (0x3000, Op::Cpi),
            (0x4000, Op::Sbci),
            (0x5000, Op::Subi),
            (0x6000, Op::Ori),
            (0x7000, Op::Andi),
            (0xc000, Op::Rjmp),
            (0xd000, Op::Rcall),
            (0xe000, Op::Ldi),
        ],
    },
];

/// Identify the instruction encoded by `op`, or `None` if it is illegal.
pub fn classify(op: u16, variant: Variant) -> Option<Op> {
    TIERS.iter().find_map(|tier| {
        let masked = op & tier.mask;
        tier.table
            .iter()
            .find(|&&(value, id)| value == masked && id.available(variant))
            .map(|&(_, id)| id)
    })
}

/// Decode one opcode word into an [`Instruction`].
pub fn decode(op: u16, variant: Variant) -> Option<Instruction> {
    classify(op, variant).map(|id| id.operands(op))
}

/// True if `op` is the first word of a 32-bit instruction.
#[inline(always)]
pub fn is_two_word(op: u16) -> bool {
    (op & 0xfe0e == 0x940c) || (op & 0xfe0e == 0x940e)
        || (op & 0xfe0f == 0x9000) || (op & 0xfe0f == 0x9200)
}

impl Op {
    fn available(self, variant: Variant) -> bool {
        match self {
            Op::LdsShort | Op::StsShort => variant == Variant::Reduced,
            _ => true,
        }
    }

    /// Slice the operand fields for this instruction out of `op`.
    pub fn operands(self, op: u16) -> Instruction {
        match self {
            Op::Nop => Instruction::Nop,
            Op::Movw => Instruction::Movw { d: pair_d4(op), r: pair_r4(op) },
            Op::Muls => Instruction::Muls { d: reg_d4(op), r: reg_r4(op) },
            Op::Mulsu => Instruction::Mulsu { d: reg_d3(op), r: reg_r3(op) },
            Op::Fmul => Instruction::Fmul { d: reg_d3(op), r: reg_r3(op) },
            Op::Fmuls => Instruction::Fmuls { d: reg_d3(op), r: reg_r3(op) },
            Op::Fmulsu => Instruction::Fmulsu { d: reg_d3(op), r: reg_r3(op) },
            Op::Cpc => Instruction::Cpc { d: reg_d5(op), r: reg_r5(op) },
            Op::Sbc => Instruction::Sbc { d: reg_d5(op), r: reg_r5(op) },
            Op::Add => Instruction::Add { d: reg_d5(op), r: reg_r5(op) },
            Op::Cpse => Instruction::Cpse { d: reg_d5(op), r: reg_r5(op) },
            Op::Cp => Instruction::Cp { d: reg_d5(op), r: reg_r5(op) },
            Op::Sub => Instruction::Sub { d: reg_d5(op), r: reg_r5(op) },
            Op::Adc => Instruction::Adc { d: reg_d5(op), r: reg_r5(op) },
            Op::And => Instruction::And { d: reg_d5(op), r: reg_r5(op) },
            Op::Eor => Instruction::Eor { d: reg_d5(op), r: reg_r5(op) },
            Op::Or => Instruction::Or { d: reg_d5(op), r: reg_r5(op) },
            Op::Mov => Instruction::Mov { d: reg_d5(op), r: reg_r5(op) },
            Op::Mul => Instruction::Mul { d: reg_d5(op), r: reg_r5(op) },
            Op::Cpi => Instruction::Cpi { d: reg_d4(op), k: imm8(op) },
            Op::Sbci => Instruction::Sbci { d: reg_d4(op), k: imm8(op) },
            Op::Subi => Instruction::Subi { d: reg_d4(op), k: imm8(op) },
            Op::Ori => Instruction::Ori { d: reg_d4(op), k: imm8(op) },
            Op::Andi => Instruction::Andi { d: reg_d4(op), k: imm8(op) },
            Op::Ldi => Instruction::Ldi { d: reg_d4(op), k: imm8(op) },
            Op::Rjmp => Instruction::Rjmp { k: rel12(op) },
            Op::Rcall => Instruction::Rcall { k: rel12(op) },
            Op::In => Instruction::In { d: reg_d5(op), a: port6(op) },
            Op::Out => Instruction::Out { a: port6(op), r: reg_d5(op) },
            Op::Lds => Instruction::Lds { d: reg_d5(op) },
            Op::Sts => Instruction::Sts { r: reg_d5(op) },
            Op::LdsShort => Instruction::LdsShort { d: reg_d4(op), k: addr7(op) },
            Op::StsShort => Instruction::StsShort { k: addr7(op), r: reg_d4(op) },
            Op::Ld(ptr, mode) => Instruction::Ld { d: reg_d5(op), ptr, mode },
            Op::St(ptr, mode) => Instruction::St { r: reg_d5(op), ptr, mode },
            Op::Ldd(ptr) => Instruction::Ldd { d: reg_d5(op), ptr, q: disp6(op) },
            Op::Std(ptr) => Instruction::Std { r: reg_d5(op), ptr, q: disp6(op) },
            Op::Lpm0 => Instruction::Lpm { d: 0, inc: false },
            Op::Lpm => Instruction::Lpm { d: reg_d5(op), inc: post_inc(op) },
            Op::Elpm0 => Instruction::Elpm { d: 0, inc: false },
            Op::Elpm => Instruction::Elpm { d: reg_d5(op), inc: post_inc(op) },
            Op::Spm => Instruction::Spm,
            Op::Push => Instruction::Push { r: reg_d5(op) },
            Op::Pop => Instruction::Pop { d: reg_d5(op) },
            Op::Com => Instruction::Com { d: reg_d5(op) },
            Op::Neg => Instruction::Neg { d: reg_d5(op) },
            Op::Swap => Instruction::Swap { d: reg_d5(op) },
            Op::Inc => Instruction::Inc { d: reg_d5(op) },
            Op::Asr => Instruction::Asr { d: reg_d5(op) },
            Op::Lsr => Instruction::Lsr { d: reg_d5(op) },
            Op::Ror => Instruction::Ror { d: reg_d5(op) },
            Op::Dec => Instruction::Dec { d: reg_d5(op) },
            Op::Bset => Instruction::Bset { s: sreg_bit(op) },
            Op::Bclr => Instruction::Bclr { s: sreg_bit(op) },
            Op::Ijmp => Instruction::Ijmp,
            Op::Eijmp => Instruction::Eijmp,
            Op::Icall => Instruction::Icall,
            Op::Eicall => Instruction::Eicall,
            Op::Ret => Instruction::Ret,
            Op::Reti => Instruction::Reti,
            Op::Jmp => Instruction::Jmp { hi: call_hi(op) },
            Op::Call => Instruction::Call { hi: call_hi(op) },
            Op::Sleep => Instruction::Sleep,
            Op::Break => Instruction::Break,
            Op::Wdr => Instruction::Wdr,
            Op::Adiw => Instruction::Adiw { d: reg_d2(op), k: imm6(op) },
            Op::Sbiw => Instruction::Sbiw { d: reg_d2(op), k: imm6(op) },
            Op::Cbi => Instruction::Cbi { a: port5(op), b: bit3(op) },
            Op::Sbic => Instruction::Sbic { a: port5(op), b: bit3(op) },
            Op::Sbi => Instruction::Sbi { a: port5(op), b: bit3(op) },
            Op::Sbis => Instruction::Sbis { a: port5(op), b: bit3(op) },
            Op::Bld => Instruction::Bld { d: reg_d5(op), b: bit3(op) },
            Op::Bst => Instruction::Bst { d: reg_d5(op), b: bit3(op) },
            Op::Sbrc => Instruction::Sbrc { r: reg_d5(op), b: bit3(op) },
            Op::Sbrs => Instruction::Sbrs { r: reg_d5(op), b: bit3(op) },
            Op::Brbs => Instruction::Brbs { s: bit3(op), k: branch7(op) },
            Op::Brbc => Instruction::Brbc { s: bit3(op), k: branch7(op) },
        }
    }
}

impl Instruction {
    /// Upper-case mnemonic, as printed by the disassembler.
    pub fn mnemonic(&self) -> &'static str {
        use Instruction::*;
        match self {
            Nop => "NOP",
            Add { .. } => "ADD",
            Adc { .. } => "ADC",
            Sub { .. } => "SUB",
            Sbc { .. } => "SBC",
            And { .. } => "AND",
            Or { .. } => "OR",
            Eor { .. } => "EOR",
            Subi { .. } => "SUBI",
            Sbci { .. } => "SBCI",
            Andi { .. } => "ANDI",
            Ori { .. } => "ORI",
            Com { .. } => "COM",
            Neg { .. } => "NEG",
            Inc { .. } => "INC",
            Dec { .. } => "DEC",
            Adiw { .. } => "ADIW",
            Sbiw { .. } => "SBIW",
            Mul { .. } => "MUL",
            Muls { .. } => "MULS",
            Mulsu { .. } => "MULSU",
            Fmul { .. } => "FMUL",
            Fmuls { .. } => "FMULS",
            Fmulsu { .. } => "FMULSU",
            Cp { .. } => "CP",
            Cpc { .. } => "CPC",
            Cpi { .. } => "CPI",
            Cpse { .. } => "CPSE",
            Mov { .. } => "MOV",
            Movw { .. } => "MOVW",
            Ldi { .. } => "LDI",
            Lds { .. } | LdsShort { .. } => "LDS",
            Sts { .. } | StsShort { .. } => "STS",
            Ld { .. } => "LD",
            St { .. } => "ST",
            Ldd { .. } => "LDD",
            Std { .. } => "STD",
            Lpm { .. } => "LPM",
            Elpm { .. } => "ELPM",
            Spm => "SPM",
            Push { .. } => "PUSH",
            Pop { .. } => "POP",
            Swap { .. } => "SWAP",
            Asr { .. } => "ASR",
            Lsr { .. } => "LSR",
            Ror { .. } => "ROR",
            Bset { s } => ["SEC", "SEZ", "SEN", "SEV", "SES", "SEH", "SET", "SEI"][(*s & 7) as usize],
            Bclr { s } => ["CLC", "CLZ", "CLN", "CLV", "CLS", "CLH", "CLT", "CLI"][(*s & 7) as usize],
            Bld { .. } => "BLD",
            Bst { .. } => "BST",
            In { .. } => "IN",
            Out { .. } => "OUT",
            Cbi { .. } => "CBI",
            Sbi { .. } => "SBI",
            Sbic { .. } => "SBIC",
            Sbis { .. } => "SBIS",
            Rjmp { .. } => "RJMP",
            Rcall { .. } => "RCALL",
            Jmp { .. } => "JMP",
            Call { .. } => "CALL",
            Ijmp => "IJMP",
            Eijmp => "EIJMP",
            Icall => "ICALL",
            Eicall => "EICALL",
            Ret => "RET",
            Reti => "RETI",
            Sbrc { .. } => "SBRC",
            Sbrs { .. } => "SBRS",
            Brbs { s, .. } => ["BRCS", "BREQ", "BRMI", "BRVS", "BRLT", "BRHS", "BRTS", "BRIE"][(*s & 7) as usize],
            Brbc { s, .. } => ["BRCC", "BRNE", "BRPL", "BRVC", "BRGE", "BRHC", "BRTC", "BRID"][(*s & 7) as usize],
            Sleep => "SLEEP",
            Break => "BREAK",
            Wdr => "WDR",
        }
    }

    /// Size in 16-bit words.
    pub fn words(&self) -> u16 {
        match self {
            Instruction::Lds { .. } | Instruction::Sts { .. }
            | Instruction::Jmp { .. } | Instruction::Call { .. } => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(op: u16) -> Instruction {
        match decode(op, Variant::Enhanced) {
            Some(inst) => inst,
            None => panic!("0x{:04x} should decode", op),
        }
    }

    #[test]
    fn test_decode_nop() {
        assert_eq!(dec(0x0000), Instruction::Nop);
    }

    #[test]
    fn test_decode_ldi() {
        // LDI R16, 0xFF: 1110 1111 0000 1111
        assert_eq!(dec(0xef0f), Instruction::Ldi { d: 16, k: 0xff });
    }

    #[test]
    fn test_decode_rjmp() {
        // RJMP .-2: k = 0xFFF = -1
        assert_eq!(dec(0xcfff), Instruction::Rjmp { k: -1 });
    }

    #[test]
    fn test_decode_jmp_call() {
        assert_eq!(dec(0x940c), Instruction::Jmp { hi: 0 });
        assert_eq!(dec(0x940e), Instruction::Call { hi: 0 });
        assert_eq!(dec(0x940f), Instruction::Call { hi: 1 });
        assert!(is_two_word(0x940c));
        assert!(is_two_word(0x9000));
        assert!(is_two_word(0x93f0));
        assert!(!is_two_word(0x9001));
    }

    #[test]
    fn test_decode_add() {
        // ADD R1, R2: 0000 1100 0001 0010
        assert_eq!(dec(0x0c12), Instruction::Add { d: 1, r: 2 });
    }

    #[test]
    fn test_decode_single_register_group() {
        assert_eq!(dec(0x920f | (5 << 4)), Instruction::Push { r: 5 });
        assert_eq!(dec(0x900f | (10 << 4)), Instruction::Pop { d: 10 });
        assert_eq!(dec(0x9405), Instruction::Asr { d: 0 });
        assert_eq!(dec(0x9406), Instruction::Lsr { d: 0 });
        assert_eq!(dec(0x9407), Instruction::Ror { d: 0 });
        assert_eq!(dec(0x94fa), Instruction::Dec { d: 15 });
        assert_eq!(dec(0x9402), Instruction::Swap { d: 0 });
    }

    #[test]
    fn test_decode_sreg_aliases() {
        assert_eq!(dec(0x9408), Instruction::Bset { s: 0 });
        assert_eq!(dec(0x9478), Instruction::Bset { s: 7 });
        assert_eq!(dec(0x94f8), Instruction::Bclr { s: 7 });
        assert_eq!(dec(0x94f8).mnemonic(), "CLI");
    }

    #[test]
    fn test_decode_indirect_modes() {
        assert_eq!(dec(0x900d), Instruction::Ld { d: 0, ptr: Pointer::X, mode: Mode::PostInc });
        assert_eq!(dec(0x920e | (3 << 4)), Instruction::St { r: 3, ptr: Pointer::X, mode: Mode::PreDec });
        assert_eq!(dec(0x8008), Instruction::Ld { d: 0, ptr: Pointer::Y, mode: Mode::Plain });
        assert_eq!(dec(0x9002), Instruction::Ld { d: 0, ptr: Pointer::Z, mode: Mode::PreDec });
    }

    #[test]
    fn test_decode_ldd_std() {
        // STD Y+1, R24: 10q0 qq1r rrrr 1qqq
        assert_eq!(dec(0x8389), Instruction::Std { r: 24, ptr: Pointer::Y, q: 1 });
        // LDD R24, Z+63
        assert_eq!(dec(0xad87), Instruction::Ldd { d: 24, ptr: Pointer::Z, q: 63 });
    }

    #[test]
    fn test_reduced_variant_short_lds() {
        // 0xa100 is LDD r16, Z+32 on the enhanced core
        assert_eq!(dec(0xa100), Instruction::Ldd { d: 16, ptr: Pointer::Z, q: 32 });
        assert_eq!(
            decode(0xa100, Variant::Reduced),
            Some(Instruction::LdsShort { d: 16, k: 0x40 })
        );
        assert_eq!(
            decode(0xa900, Variant::Reduced),
            Some(Instruction::StsShort { k: 0x40, r: 16 })
        );
    }

    #[test]
    fn test_decode_word_ops() {
        // SBIW R28, 2: 1001 0111 00 10 0010
        assert_eq!(dec(0x9722), Instruction::Sbiw { d: 28, k: 2 });
        // ADIW R24, 1
        assert_eq!(dec(0x9601), Instruction::Adiw { d: 24, k: 1 });
        // MOVW R24, R30
        assert_eq!(dec(0x01cf), Instruction::Movw { d: 24, r: 30 });
    }

    #[test]
    fn test_decode_multiply() {
        assert_eq!(dec(0x9c01 | (2 << 4)), Instruction::Mul { d: 2, r: 1 });
        assert_eq!(dec(0x0201), Instruction::Muls { d: 16, r: 17 });
        assert_eq!(dec(0x0301), Instruction::Mulsu { d: 16, r: 17 });
        assert_eq!(dec(0x0309), Instruction::Fmul { d: 16, r: 17 });
        assert_eq!(dec(0x0381), Instruction::Fmuls { d: 16, r: 17 });
        assert_eq!(dec(0x0389), Instruction::Fmulsu { d: 16, r: 17 });
    }

    #[test]
    fn test_decode_branches() {
        // BREQ .-2
        assert_eq!(dec(0xf3f9), Instruction::Brbs { s: 1, k: -1 });
        // BRNE .+4
        assert_eq!(dec(0xf411), Instruction::Brbc { s: 1, k: 2 });
        assert_eq!(dec(0xf411).mnemonic(), "BRNE");
    }

    #[test]
    fn test_decode_io_bits() {
        assert_eq!(dec(0x9a28), Instruction::Sbi { a: 5, b: 0 });
        assert_eq!(dec(0x9b28), Instruction::Sbis { a: 5, b: 0 });
        // OUT 0x3e, R29
        assert_eq!(dec(0xbfde), Instruction::Out { a: 0x3e, r: 29 });
        // IN R28, 0x3d
        assert_eq!(dec(0xb7cd), Instruction::In { d: 28, a: 0x3d });
    }

    #[test]
    fn test_decode_lpm_forms() {
        assert_eq!(dec(0x95c8), Instruction::Lpm { d: 0, inc: false });
        assert_eq!(dec(0x9005), Instruction::Lpm { d: 0, inc: true });
        assert_eq!(dec(0x91e4), Instruction::Lpm { d: 30, inc: false });
        assert_eq!(dec(0x9007), Instruction::Elpm { d: 0, inc: true });
    }

    #[test]
    fn test_illegal_opcodes() {
        // reserved slots, XCH/LAS/LAC/LAT, DES and the unused 0x9404 form
        for op in [0x0001u16, 0x00ff, 0x9204, 0x9205, 0x9206, 0x9207, 0x940b, 0x9404, 0x95b8, 0xffff] {
            assert_eq!(decode(op, Variant::Enhanced), None, "0x{:04x}", op);
        }
    }

    #[test]
    fn test_every_opcode_classifies_consistently() {
        let mut legal = 0u32;
        for op in 0..=0xffffu16 {
            match classify(op, Variant::Enhanced) {
                Some(id) => {
                    legal += 1;
                    let inst = id.operands(op);
                    assert_eq!(inst.words() == 2, is_two_word(op), "0x{:04x}", op);
                }
                None => assert!(!is_two_word(op), "0x{:04x}", op),
            }
        }
        // 0x0001..=0x00ff and friends are reserved; most of the space is legal
        assert!(legal > 60000 && legal < 0x10000);
    }
}
