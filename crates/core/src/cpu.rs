//! AVR CPU state and instruction execution.
//!
//! [`Cpu`] holds everything an instruction can change apart from memory and
//! I/O: the register file, SREG, PC, SP, the cycle counter and the watchdog
//! counter. The handlers live on [`Avr`] so they can reach the memory and
//! I/O buses it owns.
//!
//! Flag computation follows the instruction set manual bit for bit: half
//! carry comes from bit 3, carry/overflow/negative from bit 7, and S is
//! recomputed as N ^ V whenever either changes. SBC/SBCI/CPC only keep Z set
//! when it was already set, so multi-byte compares chain correctly.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::memory::{Io, Memory, RegisterFile};
use crate::opcodes::{is_two_word, Instruction, Mode, Pointer};
use crate::{Avr, StepError, SPH_PORT, SPL_PORT};
use crate::{SREG_C, SREG_H, SREG_I, SREG_N, SREG_S, SREG_T, SREG_V, SREG_Z};

/// Architectural state of the AVR core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub regs: RegisterFile,
    /// Program counter (word address, not byte address)
    pub pc: u16,
    /// Stack pointer (byte address in the flat space)
    pub sp: u16,
    /// SP value after reset; popping at or above it is a stack fault
    pub stack_top: u16,
    /// Status register: I T H S V N Z C (bits 7..0)
    pub sreg: u8,
    /// Monotonic cycle counter
    pub cycles: u64,
    /// Cleared by WDR, otherwise counts executed instructions
    pub watchdog: u32,
}

impl Cpu {
    pub fn new(stack_top: u16) -> Self {
        Cpu {
            regs: RegisterFile::new(),
            pc: 0,
            sp: stack_top,
            stack_top,
            sreg: 0,
            cycles: 0,
            watchdog: 0,
        }
    }

    /// Back to the power-on state, keeping the configured stack top.
    pub fn reset(&mut self) {
        *self = Cpu::new(self.stack_top);
    }

    #[inline(always)]
    pub fn flag(&self, bit: u8) -> bool {
        self.sreg & (1 << bit) != 0
    }

    #[inline(always)]
    pub fn set_flag(&mut self, bit: u8, v: bool) {
        if v { self.sreg |= 1 << bit; } else { self.sreg &= !(1 << bit); }
    }

    #[inline(always)]
    pub fn reg(&self, r: u8) -> u8 {
        self.regs.get(r)
    }

    #[inline(always)]
    pub fn set_reg(&mut self, r: u8, v: u8) {
        self.regs.set(r, v);
    }

    /// S = N ^ V
    #[inline(always)]
    fn update_sign(&mut self) {
        let s = self.flag(SREG_N) ^ self.flag(SREG_V);
        self.set_flag(SREG_S, s);
    }

    #[inline(always)]
    fn set_nz(&mut self, r: u8) {
        self.set_flag(SREG_N, r & 0x80 != 0);
        self.set_flag(SREG_Z, r == 0);
    }
}

// --- Flag helpers ---

#[inline(always)]
fn bit(v: u8, n: u8) -> bool {
    (v >> n) & 1 != 0
}

/// Carry out of bit `n` of `a + b = r`.
#[inline(always)]
pub fn carry(r: u8, a: u8, b: u8, n: u8) -> bool {
    let (a, b, r) = (bit(a, n), bit(b, n), bit(r, n));
    (a && b) || (b && !r) || (!r && a)
}

/// Borrow into bit `n` of `a - b = r`.
#[inline(always)]
pub fn borrow(r: u8, a: u8, b: u8, n: u8) -> bool {
    let (a, b, r) = (bit(a, n), bit(b, n), bit(r, n));
    (!a && b) || (b && r) || (r && !a)
}

/// Two's complement overflow at bit `n` of `a + b = r`.
#[inline(always)]
pub fn overflow_add(r: u8, a: u8, b: u8, n: u8) -> bool {
    let (a, b, r) = (bit(a, n), bit(b, n), bit(r, n));
    (a && b && !r) || (!a && !b && r)
}

/// Two's complement overflow at bit `n` of `a - b = r`.
#[inline(always)]
pub fn overflow_sub(r: u8, a: u8, b: u8, n: u8) -> bool {
    let (a, b, r) = (bit(a, n), bit(b, n), bit(r, n));
    (a && !b && !r) || (!a && b && r)
}

/// SREG update for ADD/ADC.
pub fn flags_add(cpu: &mut Cpu, rd: u8, rr: u8, r: u8) {
    cpu.set_flag(SREG_H, carry(r, rd, rr, 3));
    cpu.set_flag(SREG_C, carry(r, rd, rr, 7));
    cpu.set_flag(SREG_V, overflow_add(r, rd, rr, 7));
    cpu.set_nz(r);
    cpu.update_sign();
}

/// SREG update for SUB/SUBI/SBC/SBCI/CP/CPC/CPI/NEG.
///
/// With `chain_z` (SBC, SBCI, CPC) Z stays set only if it was already set.
pub fn flags_sub(cpu: &mut Cpu, rd: u8, rr: u8, r: u8, chain_z: bool) {
    let z = if chain_z { r == 0 && cpu.flag(SREG_Z) } else { r == 0 };
    cpu.set_flag(SREG_H, borrow(r, rd, rr, 3));
    cpu.set_flag(SREG_C, borrow(r, rd, rr, 7));
    cpu.set_flag(SREG_V, overflow_sub(r, rd, rr, 7));
    cpu.set_flag(SREG_N, r & 0x80 != 0);
    cpu.set_flag(SREG_Z, z);
    cpu.update_sign();
}

/// SREG update for AND/OR/EOR and their immediate forms. V is cleared.
pub fn flags_logic(cpu: &mut Cpu, r: u8) {
    cpu.set_flag(SREG_V, false);
    cpu.set_nz(r);
    cpu.update_sign();
}

/// SREG update for ASR/LSR/ROR: C is the bit shifted out, V = N ^ C.
fn flags_shift(cpu: &mut Cpu, r: u8, c: bool) {
    cpu.set_flag(SREG_C, c);
    cpu.set_nz(r);
    let v = cpu.flag(SREG_N) ^ c;
    cpu.set_flag(SREG_V, v);
    cpu.update_sign();
}

/// SREG update for the multiply family: C from bit 15, Z from the product.
fn flags_mul(cpu: &mut Cpu, c: bool, product: u16) {
    cpu.set_flag(SREG_C, c);
    cpu.set_flag(SREG_Z, product == 0);
}

// ---- Instruction execution ----

impl<M: Memory, I: Io> Avr<M, I> {
    /// Execute one decoded instruction fetched from word address `at`.
    ///
    /// PC has not been advanced yet. Returns the cycle cost; PC is left at
    /// the next instruction to execute.
    pub(crate) fn execute(&mut self, inst: Instruction, at: u16) -> Result<u8, StepError> {
        self.cpu.pc = at.wrapping_add(1);

        let cycles = match inst {
            Instruction::Nop => 1,

            // -- Arithmetic --
            Instruction::Add { d, r } => {
                let rd = self.cpu.reg(d); let rr = self.cpu.reg(r);
                let res = rd.wrapping_add(rr);
                self.cpu.set_reg(d, res);
                flags_add(&mut self.cpu, rd, rr, res); 1
            }
            Instruction::Adc { d, r } => {
                let rd = self.cpu.reg(d); let rr = self.cpu.reg(r);
                let c = self.cpu.flag(SREG_C) as u8;
                let res = rd.wrapping_add(rr).wrapping_add(c);
                self.cpu.set_reg(d, res);
                flags_add(&mut self.cpu, rd, rr, res); 1
            }
            Instruction::Sub { d, r } => {
                let rd = self.cpu.reg(d); let rr = self.cpu.reg(r);
                let res = rd.wrapping_sub(rr);
                self.cpu.set_reg(d, res);
                flags_sub(&mut self.cpu, rd, rr, res, false); 1
            }
            Instruction::Subi { d, k } => {
                let rd = self.cpu.reg(d);
                let res = rd.wrapping_sub(k);
                self.cpu.set_reg(d, res);
                flags_sub(&mut self.cpu, rd, k, res, false); 1
            }
            Instruction::Sbc { d, r } => {
                let rd = self.cpu.reg(d); let rr = self.cpu.reg(r);
                let c = self.cpu.flag(SREG_C) as u8;
                // Flags use Rr, not Rr + C; the result already carries it.
                let res = rd.wrapping_sub(rr).wrapping_sub(c);
                self.cpu.set_reg(d, res);
                flags_sub(&mut self.cpu, rd, rr, res, true); 1
            }
            Instruction::Sbci { d, k } => {
                let rd = self.cpu.reg(d);
                let c = self.cpu.flag(SREG_C) as u8;
                let res = rd.wrapping_sub(k).wrapping_sub(c);
                self.cpu.set_reg(d, res);
                flags_sub(&mut self.cpu, rd, k, res, true); 1
            }
            Instruction::And { d, r } => {
                let res = self.cpu.reg(d) & self.cpu.reg(r);
                self.cpu.set_reg(d, res);
                flags_logic(&mut self.cpu, res); 1
            }
            Instruction::Andi { d, k } => {
                let res = self.cpu.reg(d) & k;
                self.cpu.set_reg(d, res);
                flags_logic(&mut self.cpu, res); 1
            }
            Instruction::Or { d, r } => {
                let res = self.cpu.reg(d) | self.cpu.reg(r);
                self.cpu.set_reg(d, res);
                flags_logic(&mut self.cpu, res); 1
            }
            Instruction::Ori { d, k } => {
                let res = self.cpu.reg(d) | k;
                self.cpu.set_reg(d, res);
                flags_logic(&mut self.cpu, res); 1
            }
            Instruction::Eor { d, r } => {
                let res = self.cpu.reg(d) ^ self.cpu.reg(r);
                self.cpu.set_reg(d, res);
                flags_logic(&mut self.cpu, res); 1
            }
            Instruction::Com { d } => {
                let res = !self.cpu.reg(d);
                self.cpu.set_reg(d, res);
                flags_logic(&mut self.cpu, res);
                self.cpu.set_flag(SREG_C, true); 1
            }
            Instruction::Neg { d } => {
                let rd = self.cpu.reg(d);
                let res = 0u8.wrapping_sub(rd);
                self.cpu.set_reg(d, res);
                // 0 - Rd gives H = R3 | Rd3, V = (R == 0x80), C = (R != 0)
                flags_sub(&mut self.cpu, 0, rd, res, false); 1
            }
            Instruction::Inc { d } => {
                let rd = self.cpu.reg(d);
                let res = rd.wrapping_add(1);
                self.cpu.set_reg(d, res);
                self.cpu.set_flag(SREG_V, rd == 0x7f);
                self.cpu.set_nz(res);
                self.cpu.update_sign(); 1
            }
            Instruction::Dec { d } => {
                let rd = self.cpu.reg(d);
                let res = rd.wrapping_sub(1);
                self.cpu.set_reg(d, res);
                self.cpu.set_flag(SREG_V, rd == 0x80);
                self.cpu.set_nz(res);
                self.cpu.update_sign(); 1
            }
            Instruction::Adiw { d, k } => {
                let val = self.cpu.regs.pair(d);
                let res = val.wrapping_add(k as u16);
                self.cpu.regs.set_pair(d, res);
                let rdh7 = val & 0x8000 != 0; let r15 = res & 0x8000 != 0;
                self.cpu.set_flag(SREG_V, !rdh7 && r15);
                self.cpu.set_flag(SREG_C, !r15 && rdh7);
                self.cpu.set_flag(SREG_N, r15);
                self.cpu.set_flag(SREG_Z, res == 0);
                self.cpu.update_sign(); 2
            }
            Instruction::Sbiw { d, k } => {
                let val = self.cpu.regs.pair(d);
                let res = val.wrapping_sub(k as u16);
                self.cpu.regs.set_pair(d, res);
                let rdh7 = val & 0x8000 != 0; let r15 = res & 0x8000 != 0;
                self.cpu.set_flag(SREG_V, rdh7 && !r15);
                self.cpu.set_flag(SREG_C, r15 && !rdh7);
                self.cpu.set_flag(SREG_N, r15);
                self.cpu.set_flag(SREG_Z, res == 0);
                self.cpu.update_sign(); 2
            }

            // -- Multiply: product in R1:R0 --
            Instruction::Mul { d, r } => {
                let res = (self.cpu.reg(d) as u16) * (self.cpu.reg(r) as u16);
                self.cpu.regs.set_pair(0, res);
                flags_mul(&mut self.cpu, res & 0x8000 != 0, res); 2
            }
            Instruction::Muls { d, r } => {
                let res = ((self.cpu.reg(d) as i8 as i16) * (self.cpu.reg(r) as i8 as i16)) as u16;
                self.cpu.regs.set_pair(0, res);
                flags_mul(&mut self.cpu, res & 0x8000 != 0, res); 2
            }
            Instruction::Mulsu { d, r } => {
                let res = ((self.cpu.reg(d) as i8 as i16) * (self.cpu.reg(r) as i16)) as u16;
                self.cpu.regs.set_pair(0, res);
                flags_mul(&mut self.cpu, res & 0x8000 != 0, res); 2
            }
            Instruction::Fmul { d, r } => {
                let prod = (self.cpu.reg(d) as u16) * (self.cpu.reg(r) as u16);
                let res = prod << 1;
                self.cpu.regs.set_pair(0, res);
                flags_mul(&mut self.cpu, prod & 0x8000 != 0, res); 2
            }
            Instruction::Fmuls { d, r } => {
                let prod = ((self.cpu.reg(d) as i8 as i16) * (self.cpu.reg(r) as i8 as i16)) as u16;
                let res = prod << 1;
                self.cpu.regs.set_pair(0, res);
                flags_mul(&mut self.cpu, prod & 0x8000 != 0, res); 2
            }
            Instruction::Fmulsu { d, r } => {
                let prod = ((self.cpu.reg(d) as i8 as i16) * (self.cpu.reg(r) as i16)) as u16;
                let res = prod << 1;
                self.cpu.regs.set_pair(0, res);
                flags_mul(&mut self.cpu, prod & 0x8000 != 0, res); 2
            }

            // -- Compare --
            Instruction::Cp { d, r } => {
                let rd = self.cpu.reg(d); let rr = self.cpu.reg(r);
                flags_sub(&mut self.cpu, rd, rr, rd.wrapping_sub(rr), false); 1
            }
            Instruction::Cpc { d, r } => {
                let rd = self.cpu.reg(d); let rr = self.cpu.reg(r);
                let c = self.cpu.flag(SREG_C) as u8;
                let res = rd.wrapping_sub(rr).wrapping_sub(c);
                flags_sub(&mut self.cpu, rd, rr, res, true); 1
            }
            Instruction::Cpi { d, k } => {
                let rd = self.cpu.reg(d);
                flags_sub(&mut self.cpu, rd, k, rd.wrapping_sub(k), false); 1
            }
            Instruction::Cpse { d, r } => {
                if self.cpu.reg(d) == self.cpu.reg(r) { 1 + self.skip_next() } else { 1 }
            }

            // -- Data transfer --
            Instruction::Mov { d, r } => { let v = self.cpu.reg(r); self.cpu.set_reg(d, v); 1 }
            Instruction::Movw { d, r } => { let v = self.cpu.regs.pair(r); self.cpu.regs.set_pair(d, v); 1 }
            Instruction::Ldi { d, k } => { self.cpu.set_reg(d, k); 1 }
            Instruction::Lds { d } => {
                let k = self.fetch();
                let v = self.read_data(k);
                self.cpu.set_reg(d, v); 2
            }
            Instruction::Sts { r } => {
                let k = self.fetch();
                let v = self.cpu.reg(r);
                self.write_data(k, v); 2
            }
            Instruction::LdsShort { d, k } => { let v = self.read_data(k as u16); self.cpu.set_reg(d, v); 1 }
            Instruction::StsShort { k, r } => { let v = self.cpu.reg(r); self.write_data(k as u16, v); 1 }
            Instruction::Ld { d, ptr, mode } => {
                let (addr, extra) = self.indirect(ptr, mode);
                let v = self.read_data(addr);
                self.cpu.set_reg(d, v); 1 + extra
            }
            Instruction::St { r, ptr, mode } => {
                let (addr, extra) = self.indirect(ptr, mode);
                let v = self.cpu.reg(r);
                self.write_data(addr, v); 1 + extra
            }
            Instruction::Ldd { d, ptr, q } => {
                let addr = self.pointer(ptr).wrapping_add(q as u16);
                let v = self.read_data(addr);
                self.cpu.set_reg(d, v); 1
            }
            Instruction::Std { r, ptr, q } => {
                let addr = self.pointer(ptr).wrapping_add(q as u16);
                let v = self.cpu.reg(r);
                self.write_data(addr, v); 1
            }
            Instruction::Lpm { d, inc } => {
                let z = self.cpu.regs.z();
                let v = self.mem.read_u8(z as u32);
                self.cpu.set_reg(d, v);
                if inc { self.cpu.regs.set_z(z.wrapping_add(1)); }
                3
            }
            Instruction::Push { r } => { let v = self.cpu.reg(r); self.push_byte(v)?; 2 }
            Instruction::Pop { d } => { let v = self.pop_byte()?; self.cpu.set_reg(d, v); 2 }

            // -- Shift and bit --
            Instruction::Swap { d } => {
                let rd = self.cpu.reg(d);
                self.cpu.set_reg(d, (rd << 4) | (rd >> 4)); 1
            }
            Instruction::Asr { d } => {
                let rd = self.cpu.reg(d);
                let res = ((rd as i8) >> 1) as u8;
                self.cpu.set_reg(d, res);
                flags_shift(&mut self.cpu, res, rd & 1 != 0); 1
            }
            Instruction::Lsr { d } => {
                let rd = self.cpu.reg(d);
                let res = rd >> 1;
                self.cpu.set_reg(d, res);
                flags_shift(&mut self.cpu, res, rd & 1 != 0); 1
            }
            Instruction::Ror { d } => {
                let rd = self.cpu.reg(d);
                let res = (rd >> 1) | ((self.cpu.flag(SREG_C) as u8) << 7);
                self.cpu.set_reg(d, res);
                flags_shift(&mut self.cpu, res, rd & 1 != 0); 1
            }
            Instruction::Bset { s } => { self.cpu.set_flag(s, true); 1 }
            Instruction::Bclr { s } => { self.cpu.set_flag(s, false); 1 }
            Instruction::Bst { d, b } => {
                let v = (self.cpu.reg(d) >> b) & 1 != 0;
                self.cpu.set_flag(SREG_T, v); 1
            }
            Instruction::Bld { d, b } => {
                let mut rd = self.cpu.reg(d);
                if self.cpu.flag(SREG_T) { rd |= 1 << b; } else { rd &= !(1 << b); }
                self.cpu.set_reg(d, rd); 1
            }

            // -- I/O --
            Instruction::In { d, a } => { let v = self.io_get(a); self.cpu.set_reg(d, v); 1 }
            Instruction::Out { a, r } => { let v = self.cpu.reg(r); self.io_set(a, v); 1 }
            Instruction::Cbi { a, b } => { let v = self.io_get(a); self.io_set(a, v & !(1 << b)); 2 }
            Instruction::Sbi { a, b } => { let v = self.io_get(a); self.io_set(a, v | (1 << b)); 2 }
            Instruction::Sbic { a, b } => {
                if self.io_get(a) & (1 << b) == 0 { 1 + self.skip_next() } else { 1 }
            }
            Instruction::Sbis { a, b } => {
                if self.io_get(a) & (1 << b) != 0 { 1 + self.skip_next() } else { 1 }
            }

            // -- Control flow --
            Instruction::Rjmp { k } => {
                if k == -1 { debug!("infinite loop at 0x{:04x}", (at as u32) * 2); }
                self.cpu.pc = self.cpu.pc.wrapping_add(k as u16); 2
            }
            Instruction::Rcall { k } => {
                let ret = self.cpu.pc;
                self.push_word(ret)?;
                self.cpu.pc = ret.wrapping_add(k as u16); 3
            }
            Instruction::Jmp { hi } => {
                let lo = self.fetch();
                self.cpu.pc = (((hi as u32) << 16) | lo as u32) as u16; 3
            }
            Instruction::Call { hi } => {
                let lo = self.fetch();
                let ret = self.cpu.pc;
                self.push_word(ret)?;
                self.cpu.pc = (((hi as u32) << 16) | lo as u32) as u16; 4
            }
            Instruction::Ijmp => { self.cpu.pc = self.cpu.regs.z(); 2 }
            Instruction::Icall => {
                let ret = self.cpu.pc;
                self.push_word(ret)?;
                self.cpu.pc = self.cpu.regs.z(); 3
            }
            Instruction::Ret => { self.cpu.pc = self.pop_word()?; 4 }
            Instruction::Reti => {
                self.cpu.pc = self.pop_word()?;
                self.cpu.set_flag(SREG_I, true); 4
            }
            Instruction::Sbrc { r, b } => {
                if self.cpu.reg(r) & (1 << b) == 0 { 1 + self.skip_next() } else { 1 }
            }
            Instruction::Sbrs { r, b } => {
                if self.cpu.reg(r) & (1 << b) != 0 { 1 + self.skip_next() } else { 1 }
            }
            Instruction::Brbs { s, k } => {
                if self.cpu.flag(s) { self.branch(k, at); 2 } else { 1 }
            }
            Instruction::Brbc { s, k } => {
                if !self.cpu.flag(s) { self.branch(k, at); 2 } else { 1 }
            }

            // -- MCU control --
            Instruction::Wdr => { self.cpu.watchdog = 0; 1 }
            Instruction::Break => {
                info!("BREAK at 0x{:04x}\n{}", (at as u32) * 2, self.dump_regs());
                1
            }
            Instruction::Eijmp | Instruction::Eicall | Instruction::Elpm { .. }
            | Instruction::Sleep | Instruction::Spm => {
                return Err(StepError::Unimplemented { mnemonic: inst.mnemonic(), pc: at as u32 });
            }
        };

        Ok(cycles)
    }

    /// Read the word at PC and advance past it.
    fn fetch(&mut self) -> u16 {
        let w = self.mem.read_u16((self.cpu.pc as u32) * 2);
        self.cpu.pc = self.cpu.pc.wrapping_add(1);
        w
    }

    /// Skip the instruction at PC, returning the number of words skipped.
    fn skip_next(&mut self) -> u8 {
        let next = self.mem.read_u16((self.cpu.pc as u32) * 2);
        let words = if is_two_word(next) { 2 } else { 1 };
        self.cpu.pc = self.cpu.pc.wrapping_add(words);
        words as u8
    }

    fn branch(&mut self, k: i8, at: u16) {
        if k == -1 { debug!("infinite loop at 0x{:04x}", (at as u32) * 2); }
        self.cpu.pc = self.cpu.pc.wrapping_add(k as i16 as u16);
    }

    fn pointer(&self, ptr: Pointer) -> u16 {
        match ptr {
            Pointer::X => self.cpu.regs.x(),
            Pointer::Y => self.cpu.regs.y(),
            Pointer::Z => self.cpu.regs.z(),
        }
    }

    fn set_pointer(&mut self, ptr: Pointer, v: u16) {
        match ptr {
            Pointer::X => self.cpu.regs.set_x(v),
            Pointer::Y => self.cpu.regs.set_y(v),
            Pointer::Z => self.cpu.regs.set_z(v),
        }
    }

    /// Effective address of LD/ST, applying pre-decrement or post-increment.
    /// Returns the address and the extra cycle cost of the mode.
    fn indirect(&mut self, ptr: Pointer, mode: Mode) -> (u16, u8) {
        let p = self.pointer(ptr);
        match mode {
            Mode::Plain => (p, 0),
            Mode::PostInc => { self.set_pointer(ptr, p.wrapping_add(1)); (p, 1) }
            Mode::PreDec => { let a = p.wrapping_sub(1); self.set_pointer(ptr, a); (a, 1) }
        }
    }

    #[inline(always)]
    fn read_data(&self, addr: u16) -> u8 {
        self.mem.read_u8(addr as u32)
    }

    #[inline(always)]
    fn write_data(&mut self, addr: u16, v: u8) {
        self.mem.write_u8(addr as u32, v);
    }

    fn io_get(&mut self, port: u8) -> u8 {
        match port {
            SPL_PORT => self.cpu.sp as u8,
            SPH_PORT => (self.cpu.sp >> 8) as u8,
            _ => self.io.get(port),
        }
    }

    fn io_set(&mut self, port: u8, v: u8) {
        match port {
            SPL_PORT => self.cpu.sp = (self.cpu.sp & 0xff00) | v as u16,
            SPH_PORT => self.cpu.sp = (self.cpu.sp & 0x00ff) | (v as u16) << 8,
            _ => self.io.set(port, v),
        }
    }

    fn push_byte(&mut self, v: u8) -> Result<(), StepError> {
        if self.cpu.sp == 0 {
            return Err(StepError::StackOverflow { sp: self.cpu.sp });
        }
        self.cpu.sp -= 1;
        self.mem.write_u8(self.cpu.sp as u32, v);
        Ok(())
    }

    fn pop_byte(&mut self) -> Result<u8, StepError> {
        if self.cpu.sp >= self.cpu.stack_top {
            return Err(StepError::StackUnderflow { sp: self.cpu.sp });
        }
        let v = self.mem.read_u8(self.cpu.sp as u32);
        self.cpu.sp += 1;
        Ok(v)
    }

    /// Push a return address: low byte first, so the high byte ends up at
    /// the lower address.
    fn push_word(&mut self, v: u16) -> Result<(), StepError> {
        if self.cpu.sp < 2 {
            return Err(StepError::StackOverflow { sp: self.cpu.sp });
        }
        self.push_byte(v as u8)?;
        self.push_byte((v >> 8) as u8)
    }

    fn pop_word(&mut self) -> Result<u16, StepError> {
        if self.cpu.stack_top.saturating_sub(self.cpu.sp) < 2 {
            return Err(StepError::StackUnderflow { sp: self.cpu.sp });
        }
        let hi = self.pop_byte()?;
        let lo = self.pop_byte()?;
        Ok((hi as u16) << 8 | lo as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FlatMemory, PortSpace};
    use crate::{Config, State};

    fn avr() -> Avr<FlatMemory, PortSpace> {
        Avr::new(Config::default())
    }

    fn exec(a: &mut Avr<FlatMemory, PortSpace>, inst: Instruction) -> u8 {
        let pc = a.cpu.pc;
        match a.execute(inst, pc) {
            Ok(c) => c,
            Err(e) => panic!("{:?} failed: {}", inst, e),
        }
    }

    /// Place opcode words at word address `at`.
    fn program(a: &mut Avr<FlatMemory, PortSpace>, at: u16, words: &[u16]) {
        for (i, w) in words.iter().enumerate() {
            a.mem.write_bytes((at as u32 + i as u32) * 2, &w.to_le_bytes());
        }
    }

    #[test]
    fn test_add() {
        let mut a = avr();
        a.cpu.set_reg(0, 10); a.cpu.set_reg(1, 20);
        exec(&mut a, Instruction::Add { d: 0, r: 1 });
        assert_eq!(a.cpu.reg(0), 30);
        assert_eq!(a.cpu.pc, 1);
        assert_eq!(a.cpu.cycles, 0);
    }

    #[test]
    fn test_add_overflow() {
        let mut a = avr();
        a.cpu.set_reg(0, 200); a.cpu.set_reg(1, 100);
        exec(&mut a, Instruction::Add { d: 0, r: 1 });
        assert_eq!(a.cpu.reg(0), 44);
        assert!(a.cpu.flag(SREG_C));
        assert!(!a.cpu.flag(SREG_V));
    }

    #[test]
    fn test_add_then_sub_exhaustive() {
        let mut a = avr();
        for x in 0..=255u8 {
            for y in 0..=255u8 {
                a.cpu.set_reg(2, x); a.cpu.set_reg(3, y);
                exec(&mut a, Instruction::Add { d: 2, r: 3 });
                let sum = x as u16 + y as u16;
                let ssum = x as i8 as i16 + y as i8 as i16;
                assert_eq!(a.cpu.flag(SREG_C), sum > 0xff);
                assert_eq!(a.cpu.flag(SREG_Z), sum & 0xff == 0);
                assert_eq!(a.cpu.flag(SREG_N), sum & 0x80 != 0);
                assert_eq!(a.cpu.flag(SREG_V), !(-128..=127).contains(&ssum));
                assert_eq!(a.cpu.flag(SREG_H), (x & 0xf) + (y & 0xf) > 0xf);
                assert_eq!(a.cpu.flag(SREG_S), ssum < 0);

                let r = a.cpu.reg(2);
                exec(&mut a, Instruction::Sub { d: 2, r: 3 });
                assert_eq!(a.cpu.reg(2), x);
                let sdiff = r as i8 as i16 - y as i8 as i16;
                assert_eq!(a.cpu.flag(SREG_C), y > r);
                assert_eq!(a.cpu.flag(SREG_Z), x == 0);
                assert_eq!(a.cpu.flag(SREG_N), x & 0x80 != 0);
                assert_eq!(a.cpu.flag(SREG_V), !(-128..=127).contains(&sdiff));
                assert_eq!(a.cpu.flag(SREG_H), (y & 0xf) > (r & 0xf));
                assert_eq!(a.cpu.flag(SREG_S), sdiff < 0);
            }
        }
    }

    /// Check SREG after `x - y - cin` with chained Z against wide arithmetic.
    fn assert_sub_with_carry(a: &Avr<FlatMemory, PortSpace>, x: u8, y: u8, cin: bool, z_in: bool) {
        let c = cin as i16;
        let diff = (x as i16 - y as i16 - c) as u8;
        let sdiff = x as i8 as i16 - y as i8 as i16 - c;
        let v = !(-128..=127).contains(&sdiff);
        assert_eq!(a.cpu.flag(SREG_C), y as i16 + c > x as i16, "C {:02x}-{:02x}-{}", x, y, c);
        assert_eq!(a.cpu.flag(SREG_Z), diff == 0 && z_in, "Z {:02x}-{:02x}-{}", x, y, c);
        assert_eq!(a.cpu.flag(SREG_N), diff & 0x80 != 0);
        assert_eq!(a.cpu.flag(SREG_V), v, "V {:02x}-{:02x}-{}", x, y, c);
        assert_eq!(a.cpu.flag(SREG_H), (y & 0xf) as i16 + c > (x & 0xf) as i16, "H {:02x}-{:02x}-{}", x, y, c);
        assert_eq!(a.cpu.flag(SREG_S), sdiff < 0);
    }

    #[test]
    fn test_adc_sbc_with_carry_exhaustive() {
        let mut a = avr();
        for cin in [false, true] {
            let c = cin as u16;
            for x in 0..=255u8 {
                for y in 0..=255u8 {
                    a.cpu.set_reg(2, x); a.cpu.set_reg(3, y);
                    a.cpu.set_flag(SREG_C, cin);
                    exec(&mut a, Instruction::Adc { d: 2, r: 3 });
                    let sum = x as u16 + y as u16 + c;
                    let ssum = x as i8 as i16 + y as i8 as i16 + c as i16;
                    assert_eq!(a.cpu.reg(2), sum as u8);
                    assert_eq!(a.cpu.flag(SREG_C), sum > 0xff);
                    assert_eq!(a.cpu.flag(SREG_Z), sum & 0xff == 0);
                    assert_eq!(a.cpu.flag(SREG_N), sum & 0x80 != 0);
                    assert_eq!(a.cpu.flag(SREG_V), !(-128..=127).contains(&ssum));
                    assert_eq!(a.cpu.flag(SREG_H), (x & 0xf) as u16 + (y & 0xf) as u16 + c > 0xf);
                    assert_eq!(a.cpu.flag(SREG_S), ssum < 0);

                    for z_in in [false, true] {
                        a.cpu.set_reg(4, x); a.cpu.set_reg(5, y);
                        a.cpu.set_flag(SREG_C, cin); a.cpu.set_flag(SREG_Z, z_in);
                        exec(&mut a, Instruction::Sbc { d: 4, r: 5 });
                        assert_eq!(a.cpu.reg(4), x.wrapping_sub(y).wrapping_sub(cin as u8));
                        assert_sub_with_carry(&a, x, y, cin, z_in);

                        a.cpu.set_reg(20, x);
                        a.cpu.set_flag(SREG_C, cin); a.cpu.set_flag(SREG_Z, z_in);
                        exec(&mut a, Instruction::Sbci { d: 20, k: y });
                        assert_eq!(a.cpu.reg(20), x.wrapping_sub(y).wrapping_sub(cin as u8));
                        assert_sub_with_carry(&a, x, y, cin, z_in);

                        a.cpu.set_reg(4, x);
                        a.cpu.set_flag(SREG_C, cin); a.cpu.set_flag(SREG_Z, z_in);
                        exec(&mut a, Instruction::Cpc { d: 4, r: 5 });
                        assert_eq!((a.cpu.reg(4), a.cpu.reg(5)), (x, y));
                        assert_sub_with_carry(&a, x, y, cin, z_in);
                    }
                }
            }
        }
    }

    #[test]
    fn test_compare_leaves_registers() {
        let mut a = avr();
        for x in 0..=255u8 {
            for y in 0..=255u8 {
                a.cpu.set_reg(4, x); a.cpu.set_reg(5, y);
                a.cpu.set_flag(SREG_C, x & 1 != 0);
                exec(&mut a, Instruction::Cp { d: 4, r: 5 });
                assert_eq!((a.cpu.reg(4), a.cpu.reg(5)), (x, y));
                assert_eq!(a.cpu.flag(SREG_C), y > x);
                assert_eq!(a.cpu.flag(SREG_Z), x == y);
                exec(&mut a, Instruction::Cpc { d: 4, r: 5 });
                assert_eq!((a.cpu.reg(4), a.cpu.reg(5)), (x, y));
                a.cpu.set_reg(20, x);
                exec(&mut a, Instruction::Cpi { d: 20, k: y });
                assert_eq!(a.cpu.reg(20), x);
                assert_eq!(a.cpu.flag(SREG_N), x.wrapping_sub(y) & 0x80 != 0);
            }
        }
    }

    #[test]
    fn test_cpc_16bit_compare() {
        let mut a = avr();
        // 0x0100 vs 0x0100: CP low, CPC high
        a.cpu.set_reg(24, 0x00); a.cpu.set_reg(25, 0x01);
        a.cpu.set_reg(18, 0x00); a.cpu.set_reg(19, 0x01);
        exec(&mut a, Instruction::Cp { d: 24, r: 18 });
        exec(&mut a, Instruction::Cpc { d: 25, r: 19 });
        assert!(a.cpu.flag(SREG_Z));
        // 0x0001 vs 0x0101: low bytes equal, high differ
        a.cpu.set_reg(24, 0x01); a.cpu.set_reg(25, 0x00);
        a.cpu.set_reg(18, 0x01); a.cpu.set_reg(19, 0x01);
        exec(&mut a, Instruction::Cp { d: 24, r: 18 });
        exec(&mut a, Instruction::Cpc { d: 25, r: 19 });
        assert!(!a.cpu.flag(SREG_Z));
        assert!(a.cpu.flag(SREG_C));
        // 0x0100 vs 0x0001: high byte result is zero but Z stays clear from the low byte
        a.cpu.set_reg(24, 0x00); a.cpu.set_reg(25, 0x01);
        a.cpu.set_reg(18, 0x01); a.cpu.set_reg(19, 0x00);
        exec(&mut a, Instruction::Cp { d: 24, r: 18 });
        exec(&mut a, Instruction::Cpc { d: 25, r: 19 });
        assert!(!a.cpu.flag(SREG_Z));
        assert!(!a.cpu.flag(SREG_C));
    }

    #[test]
    fn test_sbci_carry_propagation() {
        let mut a = avr();
        // 0x0100 - 1 = 0x00FF with SUBI/SBCI
        a.cpu.set_reg(24, 0x00); a.cpu.set_reg(25, 0x01);
        exec(&mut a, Instruction::Subi { d: 24, k: 1 });
        assert!(a.cpu.flag(SREG_C));
        exec(&mut a, Instruction::Sbci { d: 25, k: 0 });
        assert_eq!((a.cpu.reg(25), a.cpu.reg(24)), (0x00, 0xff));
        assert!(!a.cpu.flag(SREG_C));
        assert!(!a.cpu.flag(SREG_Z));
    }

    #[test]
    fn test_logic_and_com() {
        let mut a = avr();
        a.cpu.set_reg(1, 0xf0); a.cpu.set_reg(2, 0xff);
        exec(&mut a, Instruction::Eor { d: 1, r: 2 });
        assert_eq!(a.cpu.reg(1), 0x0f);
        a.cpu.set_flag(SREG_V, true);
        exec(&mut a, Instruction::And { d: 1, r: 1 });
        assert!(!a.cpu.flag(SREG_V));
        exec(&mut a, Instruction::Com { d: 1 });
        assert_eq!(a.cpu.reg(1), 0xf0);
        assert!(a.cpu.flag(SREG_C));
        assert!(a.cpu.flag(SREG_N));
        assert!(a.cpu.flag(SREG_S));
        a.cpu.set_reg(16, 0x80);
        exec(&mut a, Instruction::Ori { d: 16, k: 0x01 });
        assert_eq!(a.cpu.reg(16), 0x81);
    }

    #[test]
    fn test_neg_inc_dec_edges() {
        let mut a = avr();
        a.cpu.set_reg(3, 0x80);
        exec(&mut a, Instruction::Neg { d: 3 });
        assert_eq!(a.cpu.reg(3), 0x80);
        assert!(a.cpu.flag(SREG_V));
        assert!(a.cpu.flag(SREG_C));
        a.cpu.set_reg(3, 0);
        exec(&mut a, Instruction::Neg { d: 3 });
        assert!(!a.cpu.flag(SREG_C));
        assert!(a.cpu.flag(SREG_Z));

        a.cpu.set_reg(4, 0x7f);
        exec(&mut a, Instruction::Inc { d: 4 });
        assert!(a.cpu.flag(SREG_V));
        assert!(a.cpu.flag(SREG_N));
        assert!(!a.cpu.flag(SREG_S));

        a.cpu.set_reg(5, 0x01);
        a.cpu.set_flag(SREG_C, true);
        exec(&mut a, Instruction::Dec { d: 5 });
        assert!(a.cpu.flag(SREG_Z));
        assert!(a.cpu.flag(SREG_C), "DEC leaves C alone");
        a.cpu.set_reg(5, 0x80);
        exec(&mut a, Instruction::Dec { d: 5 });
        assert_eq!(a.cpu.reg(5), 0x7f);
        assert!(a.cpu.flag(SREG_V));
    }

    #[test]
    fn test_shifts() {
        let mut a = avr();
        a.cpu.set_reg(6, 0x81);
        exec(&mut a, Instruction::Asr { d: 6 });
        assert_eq!(a.cpu.reg(6), 0xc0);
        assert!(a.cpu.flag(SREG_C));
        assert!(!a.cpu.flag(SREG_V)); // N=1, C=1
        exec(&mut a, Instruction::Ror { d: 6 });
        assert_eq!(a.cpu.reg(6), 0xe0);
        assert!(!a.cpu.flag(SREG_C));
        exec(&mut a, Instruction::Lsr { d: 6 });
        assert_eq!(a.cpu.reg(6), 0x70);
        assert!(!a.cpu.flag(SREG_N));
    }

    #[test]
    fn test_swap_exchanges_nibbles() {
        let mut a = avr();
        a.cpu.set_reg(7, 0x3c);
        exec(&mut a, Instruction::Swap { d: 7 });
        assert_eq!(a.cpu.reg(7), 0xc3);
    }

    #[test]
    fn test_multiply_family() {
        let mut a = avr();
        a.cpu.set_reg(16, 0xff); a.cpu.set_reg(17, 0xff);
        exec(&mut a, Instruction::Mul { d: 16, r: 17 });
        assert_eq!(a.cpu.regs.pair(0), 0xfe01);
        assert!(a.cpu.flag(SREG_C));

        // -1 * -1 = 1
        exec(&mut a, Instruction::Muls { d: 16, r: 17 });
        assert_eq!((a.cpu.reg(1), a.cpu.reg(0)), (0x00, 0x01));
        assert!(!a.cpu.flag(SREG_C));

        // -1 * 255 = -255
        exec(&mut a, Instruction::Mulsu { d: 16, r: 17 });
        assert_eq!(a.cpu.regs.pair(0), (-255i16) as u16);
        assert!(a.cpu.flag(SREG_C));

        // 0.5 * 0.5 = 0.25 in 1.7 format
        a.cpu.set_reg(16, 0x40); a.cpu.set_reg(17, 0x40);
        exec(&mut a, Instruction::Fmul { d: 16, r: 17 });
        assert_eq!(a.cpu.regs.pair(0), 0x2000);
        // 1.0 * 1.0 in FMUL: product 0x4000 << 1
        a.cpu.set_reg(16, 0x80); a.cpu.set_reg(17, 0x80);
        exec(&mut a, Instruction::Fmul { d: 16, r: 17 });
        assert_eq!(a.cpu.regs.pair(0), 0x8000);
        assert!(!a.cpu.flag(SREG_C));
        // -1.0 * -1.0 overflows to 0x8000 with FMULS
        exec(&mut a, Instruction::Fmuls { d: 16, r: 17 });
        assert_eq!(a.cpu.regs.pair(0), 0x8000);

        a.cpu.set_reg(16, 0);
        exec(&mut a, Instruction::Fmulsu { d: 16, r: 17 });
        assert!(a.cpu.flag(SREG_Z));
    }

    #[test]
    fn test_adiw_sbiw() {
        let mut a = avr();
        a.cpu.regs.set_pair(24, 0xffff);
        let c = exec(&mut a, Instruction::Adiw { d: 24, k: 1 });
        assert_eq!(c, 2);
        assert_eq!(a.cpu.regs.pair(24), 0);
        assert!(a.cpu.flag(SREG_Z));
        assert!(a.cpu.flag(SREG_C));

        a.cpu.regs.set_y(0x8000);
        exec(&mut a, Instruction::Sbiw { d: 28, k: 1 });
        assert_eq!(a.cpu.regs.y(), 0x7fff);
        assert!(a.cpu.flag(SREG_V));
        assert!(!a.cpu.flag(SREG_C));
    }

    #[test]
    fn test_push_pop() {
        let mut a = avr();
        let sp0 = a.cpu.sp;
        a.cpu.set_reg(5, 0x42);
        exec(&mut a, Instruction::Push { r: 5 });
        assert_eq!(a.cpu.sp, sp0 - 1);
        assert_eq!(a.mem.read_u8((sp0 - 1) as u32), 0x42);
        exec(&mut a, Instruction::Pop { d: 5 });
        assert_eq!(a.cpu.sp, sp0);
        assert_eq!(a.cpu.reg(5), 0x42);
    }

    #[test]
    fn test_push_pop_every_register() {
        let mut a = avr();
        for r in 0..32u8 {
            let sp0 = a.cpu.sp;
            a.cpu.set_reg(r, r.wrapping_mul(37));
            exec(&mut a, Instruction::Push { r });
            a.cpu.set_reg(r, 0);
            exec(&mut a, Instruction::Pop { d: r });
            assert_eq!(a.cpu.reg(r), r.wrapping_mul(37));
            assert_eq!(a.cpu.sp, sp0);
        }
    }

    #[test]
    fn test_pop_on_empty_stack_faults() {
        let mut a = avr();
        let err = a.execute(Instruction::Pop { d: 0 }, 0);
        assert!(matches!(err, Err(StepError::StackUnderflow { .. })));
        let err = a.execute(Instruction::Ret, 0);
        assert!(matches!(err, Err(StepError::StackUnderflow { .. })));
    }

    #[test]
    fn test_push_below_zero_faults() {
        let mut a = avr();
        a.cpu.sp = 0;
        assert!(matches!(a.execute(Instruction::Push { r: 0 }, 0), Err(StepError::StackOverflow { sp: 0 })));
        a.cpu.sp = 1;
        assert!(matches!(a.execute(Instruction::Rcall { k: 0 }, 0), Err(StepError::StackOverflow { sp: 1 })));
        assert_eq!(a.cpu.sp, 1, "failed call must not push half an address");
    }

    #[test]
    fn test_rcall_ret() {
        let mut a = avr();
        a.cpu.pc = 0x100;
        let sp0 = a.cpu.sp;
        assert_eq!(exec(&mut a, Instruction::Rcall { k: 5 }), 3);
        assert_eq!(a.cpu.pc, 0x106); // 0x100+1+5
        assert_eq!(a.cpu.sp, sp0 - 2);
        assert_eq!(exec(&mut a, Instruction::Ret), 4);
        assert_eq!(a.cpu.pc, 0x101);
        assert_eq!(a.cpu.sp, sp0);
    }

    #[test]
    fn test_call_ret_two_word() {
        let mut a = avr();
        // CALL 0x0234 at word 0x10
        program(&mut a, 0x10, &[0x940e, 0x0234]);
        a.cpu.pc = 0x10;
        let sp0 = a.cpu.sp;
        assert_eq!(exec(&mut a, Instruction::Call { hi: 0 }), 4);
        assert_eq!(a.cpu.pc, 0x0234);
        // high byte of the return address sits at the lower address
        assert_eq!(a.mem.read_u8(a.cpu.sp as u32), 0x00);
        assert_eq!(a.mem.read_u8(a.cpu.sp as u32 + 1), 0x12);
        exec(&mut a, Instruction::Ret);
        assert_eq!(a.cpu.pc, 0x12);
        assert_eq!(a.cpu.sp, sp0);
    }

    #[test]
    fn test_icall_reti() {
        let mut a = avr();
        a.cpu.regs.set_z(0x0400);
        a.cpu.pc = 7;
        exec(&mut a, Instruction::Icall);
        assert_eq!(a.cpu.pc, 0x0400);
        exec(&mut a, Instruction::Reti);
        assert_eq!(a.cpu.pc, 8);
        assert!(a.cpu.flag(SREG_I));
        exec(&mut a, Instruction::Ijmp);
        assert_eq!(a.cpu.pc, 0x0400);
    }

    #[test]
    fn test_jmp_and_lds_sts() {
        let mut a = avr();
        program(&mut a, 0, &[0x940c, 0x0100, 0x9100, 0x0200, 0x9300, 0x0201]);
        assert_eq!(exec(&mut a, Instruction::Jmp { hi: 0 }), 3);
        assert_eq!(a.cpu.pc, 0x0100);

        a.mem.write_u8(0x0200, 0x5a);
        a.cpu.pc = 2;
        assert_eq!(exec(&mut a, Instruction::Lds { d: 16 }), 2);
        assert_eq!(a.cpu.reg(16), 0x5a);
        assert_eq!(a.cpu.pc, 4);
        exec(&mut a, Instruction::Sts { r: 16 });
        assert_eq!(a.mem.read_u8(0x0201), 0x5a);
        assert_eq!(a.cpu.pc, 6);
    }

    #[test]
    fn test_skip_over_one_and_two_word() {
        let mut a = avr();
        // CPSE r0, r0 ; NOP
        program(&mut a, 0, &[0x1000, 0x0000]);
        assert_eq!(exec(&mut a, Instruction::Cpse { d: 0, r: 0 }), 2);
        assert_eq!(a.cpu.pc, 2);

        // CPSE r0, r0 ; JMP xxxx
        program(&mut a, 0, &[0x1000, 0x940c, 0x1234]);
        a.cpu.pc = 0;
        assert_eq!(exec(&mut a, Instruction::Cpse { d: 0, r: 0 }), 3);
        assert_eq!(a.cpu.pc, 3);

        // condition false: no skip
        a.cpu.set_reg(1, 1);
        a.cpu.pc = 0;
        assert_eq!(exec(&mut a, Instruction::Cpse { d: 0, r: 1 }), 1);
        assert_eq!(a.cpu.pc, 1);
    }

    #[test]
    fn test_bit_skips() {
        let mut a = avr();
        program(&mut a, 0, &[0xfe00, 0x9200, 0x0100]); // SBRS r0,0 ; STS
        a.cpu.set_reg(0, 0x01);
        exec(&mut a, Instruction::Sbrs { r: 0, b: 0 });
        assert_eq!(a.cpu.pc, 3);
        a.cpu.pc = 0;
        exec(&mut a, Instruction::Sbrc { r: 0, b: 0 });
        assert_eq!(a.cpu.pc, 1);

        a.io.set(0x05, 0x80);
        a.cpu.pc = 0;
        exec(&mut a, Instruction::Sbis { a: 0x05, b: 7 });
        assert_eq!(a.cpu.pc, 3);
        a.cpu.pc = 0;
        exec(&mut a, Instruction::Sbic { a: 0x05, b: 6 });
        assert_eq!(a.cpu.pc, 3);
    }

    #[test]
    fn test_branch_taken() {
        let mut a = avr();
        a.cpu.pc = 0x50;
        a.cpu.set_flag(SREG_Z, true);
        let c = exec(&mut a, Instruction::Brbs { s: SREG_Z, k: 3 });
        assert_eq!(c, 2);
        assert_eq!(a.cpu.pc, 0x54);
        let c = exec(&mut a, Instruction::Brbc { s: SREG_Z, k: 3 });
        assert_eq!(c, 1);
        assert_eq!(a.cpu.pc, 0x55);
    }

    #[test]
    fn test_branch_to_self() {
        let mut a = avr();
        a.cpu.pc = 0x20;
        a.cpu.set_flag(SREG_C, true);
        exec(&mut a, Instruction::Brbs { s: SREG_C, k: -1 });
        assert_eq!(a.cpu.pc, 0x20);
        exec(&mut a, Instruction::Rjmp { k: -1 });
        assert_eq!(a.cpu.pc, 0x20);
    }

    #[test]
    fn test_rjmp_wraps() {
        let mut a = avr();
        a.cpu.pc = 0;
        exec(&mut a, Instruction::Rjmp { k: -2 });
        assert_eq!(a.cpu.pc, 0xffff);
    }

    #[test]
    fn test_indirect_modes() {
        let mut a = avr();
        a.mem.write_bytes(0x100, &[0x11, 0x22, 0x33]);
        a.cpu.regs.set_x(0x100);
        assert_eq!(exec(&mut a, Instruction::Ld { d: 0, ptr: Pointer::X, mode: Mode::PostInc }), 2);
        assert_eq!(a.cpu.reg(0), 0x11);
        assert_eq!(a.cpu.regs.x(), 0x101);
        assert_eq!(exec(&mut a, Instruction::Ld { d: 1, ptr: Pointer::X, mode: Mode::Plain }), 1);
        assert_eq!(a.cpu.reg(1), 0x22);

        a.cpu.regs.set_y(0x103);
        exec(&mut a, Instruction::Ld { d: 2, ptr: Pointer::Y, mode: Mode::PreDec });
        assert_eq!(a.cpu.reg(2), 0x33);
        assert_eq!(a.cpu.regs.y(), 0x102);

        a.cpu.regs.set_z(0x200);
        a.cpu.set_reg(3, 0xab);
        exec(&mut a, Instruction::St { r: 3, ptr: Pointer::Z, mode: Mode::PostInc });
        exec(&mut a, Instruction::St { r: 3, ptr: Pointer::Z, mode: Mode::PostInc });
        assert_eq!(a.cpu.regs.z(), 0x202);
        assert_eq!(a.mem.read_u16(0x200), 0xabab);

        exec(&mut a, Instruction::Std { r: 3, ptr: Pointer::Y, q: 63 });
        assert_eq!(a.mem.read_u8(0x102 + 63), 0xab);
        exec(&mut a, Instruction::Ldd { d: 4, ptr: Pointer::Y, q: 63 });
        assert_eq!(a.cpu.reg(4), 0xab);
    }

    #[test]
    fn test_lpm() {
        let mut a = avr();
        a.mem.write_bytes(0x40, &[0xde, 0xad]);
        a.cpu.regs.set_z(0x40);
        assert_eq!(exec(&mut a, Instruction::Lpm { d: 0, inc: false }), 3);
        assert_eq!(a.cpu.reg(0), 0xde);
        exec(&mut a, Instruction::Lpm { d: 5, inc: true });
        exec(&mut a, Instruction::Lpm { d: 6, inc: true });
        assert_eq!((a.cpu.reg(5), a.cpu.reg(6)), (0xde, 0xad));
        assert_eq!(a.cpu.regs.z(), 0x42);
    }

    #[test]
    fn test_stack_pointer_ports() {
        let mut a = avr();
        a.cpu.set_reg(28, 0x34); a.cpu.set_reg(29, 0x12);
        exec(&mut a, Instruction::Out { a: SPL_PORT, r: 28 });
        exec(&mut a, Instruction::Out { a: SPH_PORT, r: 29 });
        assert_eq!(a.cpu.sp, 0x1234);
        exec(&mut a, Instruction::In { d: 0, a: SPH_PORT });
        assert_eq!(a.cpu.reg(0), 0x12);
        // other ports go to the I/O bus
        exec(&mut a, Instruction::Out { a: 0x05, r: 28 });
        assert_eq!(a.io.get(0x05), 0x34);
        assert_eq!(a.cpu.sp, 0x1234);
    }

    #[test]
    fn test_cbi_sbi() {
        let mut a = avr();
        a.io.set(0x0b, 0xf0);
        exec(&mut a, Instruction::Sbi { a: 0x0b, b: 0 });
        exec(&mut a, Instruction::Cbi { a: 0x0b, b: 7 });
        assert_eq!(a.io.get(0x0b), 0x71);
    }

    #[test]
    fn test_bst_bld_and_sreg_bits() {
        let mut a = avr();
        a.cpu.set_reg(8, 0x04);
        exec(&mut a, Instruction::Bst { d: 8, b: 2 });
        assert!(a.cpu.flag(SREG_T));
        exec(&mut a, Instruction::Bld { d: 9, b: 7 });
        assert_eq!(a.cpu.reg(9), 0x80);
        exec(&mut a, Instruction::Bset { s: SREG_I });
        assert!(a.cpu.flag(SREG_I));
        exec(&mut a, Instruction::Bclr { s: SREG_T });
        assert!(!a.cpu.flag(SREG_T));
    }

    #[test]
    fn test_wdr_clears_watchdog() {
        let mut a = avr();
        a.cpu.watchdog = 99;
        exec(&mut a, Instruction::Wdr);
        assert_eq!(a.cpu.watchdog, 0);
    }

    #[test]
    fn test_unimplemented_are_distinct() {
        let mut a = avr();
        for inst in [Instruction::Sleep, Instruction::Spm, Instruction::Eijmp, Instruction::Eicall,
                     Instruction::Elpm { d: 0, inc: false }] {
            match a.execute(inst, 0x10) {
                Err(StepError::Unimplemented { mnemonic, pc }) => {
                    assert_eq!(mnemonic, inst.mnemonic());
                    assert_eq!(pc, 0x10);
                }
                other => panic!("{:?} gave {:?}", inst, other),
            }
        }
        assert_eq!(a.state(), &State::Reset);
    }
}
