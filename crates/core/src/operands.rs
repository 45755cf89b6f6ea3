//! Operand field extraction for AVR opcode words.
//!
//! Every function here is a pure bit-slice of the first opcode word. None of
//! them validate anything: whether a field is meaningful for a given opcode is
//! decided by the classifier in [`crate::opcodes`]. Field names follow the
//! instruction set manual (`d`, `r`, `K`, `q`, `A`, `b`, `s`, `k`).

/// 5-bit destination register, bits 8..4 (R0–R31).
#[inline(always)]
pub fn reg_d5(op: u16) -> u8 {
    ((op >> 4) & 0x1f) as u8
}

/// 5-bit source register, bit 9 and bits 3..0 (R0–R31).
#[inline(always)]
pub fn reg_r5(op: u16) -> u8 {
    (((op >> 5) & 0x10) | (op & 0x0f)) as u8
}

/// 4-bit destination register offset into the upper half (R16–R31).
#[inline(always)]
pub fn reg_d4(op: u16) -> u8 {
    16 + ((op >> 4) & 0x0f) as u8
}

/// 4-bit source register offset into the upper half (R16–R31).
#[inline(always)]
pub fn reg_r4(op: u16) -> u8 {
    16 + (op & 0x0f) as u8
}

/// 3-bit destination register (R16–R23), used by MULSU/FMUL*.
#[inline(always)]
pub fn reg_d3(op: u16) -> u8 {
    16 + ((op >> 4) & 0x07) as u8
}

/// 3-bit source register (R16–R23).
#[inline(always)]
pub fn reg_r3(op: u16) -> u8 {
    16 + (op & 0x07) as u8
}

/// 2-bit register pair selector for ADIW/SBIW: R24, R26, R28 or R30.
#[inline(always)]
pub fn reg_d2(op: u16) -> u8 {
    24 + ((op >> 4) & 0x03) as u8 * 2
}

/// Even destination register for MOVW.
#[inline(always)]
pub fn pair_d4(op: u16) -> u8 {
    ((op >> 4) & 0x0f) as u8 * 2
}

/// Even source register for MOVW.
#[inline(always)]
pub fn pair_r4(op: u16) -> u8 {
    (op & 0x0f) as u8 * 2
}

/// 8-bit immediate split across bits 11..8 and 3..0.
#[inline(always)]
pub fn imm8(op: u16) -> u8 {
    (((op >> 4) & 0xf0) | (op & 0x0f)) as u8
}

/// 6-bit immediate for ADIW/SBIW: bits 7..6 and 3..0.
#[inline(always)]
pub fn imm6(op: u16) -> u8 {
    (((op >> 2) & 0x30) | (op & 0x0f)) as u8
}

/// 6-bit displacement for LDD/STD: bit 13, bits 11..10 and bits 2..0.
#[inline(always)]
pub fn disp6(op: u16) -> u8 {
    (((op >> 8) & 0x20) | ((op >> 7) & 0x18) | (op & 0x07)) as u8
}

/// 5-bit I/O address for CBI/SBI/SBIC/SBIS.
#[inline(always)]
pub fn port5(op: u16) -> u8 {
    ((op >> 3) & 0x1f) as u8
}

/// 6-bit I/O address for IN/OUT: bits 10..9 and 3..0.
#[inline(always)]
pub fn port6(op: u16) -> u8 {
    (((op >> 5) & 0x30) | (op & 0x0f)) as u8
}

/// 3-bit bit index in bits 2..0 (register bit, I/O bit or SREG bit for branches).
#[inline(always)]
pub fn bit3(op: u16) -> u8 {
    (op & 0x07) as u8
}

/// SREG bit index for BSET/BCLR, bits 6..4.
#[inline(always)]
pub fn sreg_bit(op: u16) -> u8 {
    ((op >> 4) & 0x07) as u8
}

/// 7-bit data address of the reduced-core LDS/STS.
///
/// ADDR = (!op[8], op[8], op[10], op[9], op[3..0]), mapping 0x40–0xbf.
#[inline(always)]
pub fn addr7(op: u16) -> u8 {
    let b8 = (op >> 8) & 1;
    (((b8 ^ 1) << 7) | (b8 << 6) | (((op >> 10) & 1) << 5) | (((op >> 9) & 1) << 4) | (op & 0x0f)) as u8
}

/// High six bits of a 22-bit JMP/CALL target: bits 8..4 and bit 0.
#[inline(always)]
pub fn call_hi(op: u16) -> u8 {
    (((op >> 3) & 0x3e) | (op & 1)) as u8
}

/// Post-increment flag of LPM/ELPM (bit 0).
#[inline(always)]
pub fn post_inc(op: u16) -> bool {
    op & 1 != 0
}

/// Signed 7-bit branch displacement in bits 9..3.
#[inline(always)]
pub fn branch7(op: u16) -> i8 {
    ((((op >> 3) & 0x7f) as u8) << 1) as i8 >> 1
}

/// Signed 12-bit displacement for RJMP/RCALL.
#[inline(always)]
pub fn rel12(op: u16) -> i16 {
    (((op & 0x0fff) << 4) as i16) >> 4
}
