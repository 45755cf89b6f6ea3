//! # avrsim-core
//!
//! Instruction-set simulator for the 8-bit AVR architecture, used to run and
//! debug firmware images without hardware.
//!
//! ## Architecture
//!
//! - [`Avr`]: the simulator: CPU state plus the memory and I/O buses it runs against
//! - [`Cpu`]: registers, SREG, PC, SP, cycle and watchdog counters
//! - [`memory`]: the [`Memory`]/[`Io`] bus traits and plain RAM/port implementations
//! - [`opcodes`]: mask-tier classifier and the decoded [`Instruction`] enum
//! - [`operands`]: operand field extraction
//! - [`disasm`]: instruction disassembler for traces and the REPL
//! - [`loader`]: ELF, Mach-O and Intel HEX image loading ([`elf`], [`macho`], [`hex`])
//! - [`arm64`]: a second [`Core`] that classifies and disassembles AArch64 opcodes
//! - [`savestate`]: compressed machine snapshots
//! - [`debugger`]: memory hex dumps
//!
//! ## Stepping
//!
//! A fresh [`Avr`] starts in [`State::Reset`]. Each [`Avr::step`] fetches one
//! word, classifies it, extracts operands and executes. Illegal opcodes,
//! unimplemented instructions and stack faults move the machine to
//! [`State::Halted`]; it stays there, returning the same error, until
//! [`Avr::reset`].

pub mod arm64;
pub mod cpu;
pub mod debugger;
pub mod disasm;
pub mod elf;
pub mod hex;
pub mod loader;
pub mod macho;
pub mod memory;
pub mod opcodes;
pub mod operands;
pub mod savestate;

use std::fmt;
use std::str::FromStr;

use log::{trace, warn};

pub use arm64::Arm64;
pub use cpu::Cpu;
pub use loader::{Image, LoadError};
pub use memory::{FlatMemory, Io, Memory, PortSpace, RegisterFile};
pub use opcodes::{Instruction, Variant};
pub use savestate::{Snapshot, SnapshotError};

use savestate::AvrState;

/// Default size of the flat address space (64 KiB)
pub const DEFAULT_MEMORY_SIZE: u32 = 0x10000;

/// I/O port aliased to the low byte of SP
pub const SPL_PORT: u8 = 0x3d;
/// I/O port aliased to the high byte of SP
pub const SPH_PORT: u8 = 0x3e;

// SREG bit positions
pub const SREG_C: u8 = 0;
pub const SREG_Z: u8 = 1;
pub const SREG_N: u8 = 2;
pub const SREG_V: u8 = 3;
pub const SREG_S: u8 = 4;
pub const SREG_H: u8 = 5;
pub const SREG_T: u8 = 6;
pub const SREG_I: u8 = 7;

/// Why a core stopped executing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepError {
    #[error("illegal opcode 0x{opcode:04x} at word 0x{pc:04x}")]
    Illegal { opcode: u32, pc: u32 },
    #[error("unimplemented instruction {mnemonic} at word 0x{pc:04x}")]
    Unimplemented { mnemonic: &'static str, pc: u32 },
    #[error("stack underflow: pop with SP=0x{sp:04x} at or above the stack top")]
    StackUnderflow { sp: u16 },
    #[error("stack overflow: push with SP=0x{sp:04x} would go below zero")]
    StackOverflow { sp: u16 },
}

/// Lifecycle of a core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Freshly constructed or reset; nothing executed yet.
    Reset,
    Running,
    /// Terminal until the next reset.
    Halted(StepError),
}

/// Result of [`Avr::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Halted(StepError),
    /// An instruction jumped to itself.
    SelfLoop { pc: u16 },
    /// The step budget ran out.
    Budget,
}

/// Supported instruction set architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    Avr,
    Arm64,
}

impl Arch {
    pub fn name(self) -> &'static str {
        match self {
            Arch::Avr => "avr",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avr" => Ok(Arch::Avr),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            other => Err(format!("unknown architecture '{}'", other)),
        }
    }
}

/// Simulator construction options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Size in bytes of the flat memory created by [`Avr::new`].
    pub memory_size: u32,
    /// Initial SP. Defaults to the last byte of memory within the 16-bit space.
    pub stack_top: Option<u16>,
    pub variant: Variant,
}

impl Default for Config {
    fn default() -> Self {
        Config { memory_size: DEFAULT_MEMORY_SIZE, stack_top: None, variant: Variant::Enhanced }
    }
}

/// Capabilities shared by every simulated architecture.
pub trait Core {
    /// Architecture name, as accepted by [`Arch::from_str`].
    fn name(&self) -> &'static str;
    fn reset(&mut self);
    fn step(&mut self) -> Result<(), StepError>;
    fn state(&self) -> &State;
    /// Program counter in instruction words.
    fn pc(&self) -> u32;
    fn set_pc(&mut self, word: u32);
    /// Human readable register and state dump.
    fn debug_dump(&self) -> String;
    /// Disassemble the instruction at word address `word`; returns the text
    /// and the instruction size in words.
    fn disassemble(&self, word: u32) -> (String, u32);
    fn memory(&self) -> &dyn Memory;
    fn memory_mut(&mut self) -> &mut dyn Memory;
    /// Capture registers, memory and ports.
    fn snapshot(&mut self) -> Snapshot;
    /// Replace the machine state with `snapshot`. The memory size must match.
    fn restore(&mut self, snapshot: Snapshot) -> Result<(), SnapshotError>;
}

/// AVR simulator.
///
/// Owns its memory and I/O buses; pass `&mut` references as `M`/`I` to keep
/// them on the caller's side.
pub struct Avr<M: Memory = FlatMemory, I: Io = PortSpace> {
    pub cpu: Cpu,
    pub mem: M,
    pub io: I,
    pub variant: Variant,
    state: State,
}

impl Avr<FlatMemory, PortSpace> {
    /// Simulator with zeroed RAM of `config.memory_size` bytes and latching ports.
    pub fn new(config: Config) -> Self {
        let mem = FlatMemory::new(config.memory_size);
        Avr::with_bus(config, mem, PortSpace::new())
    }
}

impl<M: Memory, I: Io> Avr<M, I> {
    pub fn with_bus(config: Config, mem: M, io: I) -> Self {
        let top = config.stack_top.unwrap_or_else(|| {
            (mem.size().min(0x10000)).saturating_sub(1) as u16
        });
        Avr { cpu: Cpu::new(top), mem, io, variant: config.variant, state: State::Reset }
    }

    /// PC=0, SP=stack top, registers, flags and counters cleared.
    /// Memory and I/O are left alone.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.state = State::Reset;
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.state, State::Halted(_))
    }

    /// Execute one instruction.
    pub fn step(&mut self) -> Result<(), StepError> {
        if let State::Halted(err) = &self.state {
            return Err(err.clone());
        }
        self.state = State::Running;

        let at = self.cpu.pc;
        let op = self.mem.read_u16((at as u32) * 2);
        self.cpu.watchdog = self.cpu.watchdog.wrapping_add(1);

        let result = match opcodes::decode(op, self.variant) {
            Some(inst) => {
                if log::log_enabled!(log::Level::Trace) {
                    let next = self.mem.read_u16((at as u32 + 1) * 2);
                    trace!("0x{:04x}: {}", (at as u32) * 2, disasm::disassemble(&inst, at, next));
                }
                self.execute(inst, at)
            }
            None => Err(StepError::Illegal { opcode: op as u32, pc: at as u32 }),
        };

        match result {
            Ok(cycles) => {
                self.cpu.cycles += cycles as u64;
                Ok(())
            }
            Err(err) => {
                // leave PC on the offending instruction
                self.cpu.pc = at;
                warn!("halted: {}", err);
                self.state = State::Halted(err.clone());
                Err(err)
            }
        }
    }

    /// Step until the machine halts, jumps to itself, or `max_steps` run out.
    pub fn run(&mut self, max_steps: u64) -> RunOutcome {
        for _ in 0..max_steps {
            let pc = self.cpu.pc;
            if let Err(err) = self.step() {
                return RunOutcome::Halted(err);
            }
            if self.cpu.pc == pc {
                return RunOutcome::SelfLoop { pc };
            }
        }
        RunOutcome::Budget
    }

    /// Disassemble the instruction at word address `pc`.
    pub fn disasm_at(&self, pc: u16) -> (String, u16) {
        let word = self.mem.read_u16((pc as u32) * 2);
        let next = self.mem.read_u16((pc as u32 + 1) * 2);
        match opcodes::decode(word, self.variant) {
            Some(inst) => (disasm::disassemble(&inst, pc, next), inst.words()),
            None => (format!(".dw 0x{:04X}", word), 1),
        }
    }

    pub fn dump_regs(&self) -> String {
        let mut s = String::new();
        for i in 0..32u8 {
            if i % 8 == 0 && i > 0 { s.push('\n'); }
            s.push_str(&format!("R{:2}={:02X} ", i, self.cpu.reg(i)));
        }
        s.push_str(&format!("\nPC={:04X} SP={:04X} SREG={} (0x{:02X})",
            (self.cpu.pc as u32) * 2, self.cpu.sp,
            disasm::format_sreg(self.cpu.sreg), self.cpu.sreg));
        s.push_str(&format!("\nX={:04X} Y={:04X} Z={:04X}",
            self.cpu.regs.x(), self.cpu.regs.y(), self.cpu.regs.z()));
        s.push_str(&format!("\nCYCLES={} WDT={}", self.cpu.cycles, self.cpu.watchdog));
        s
    }
}

impl<M: Memory, I: Io> Core for Avr<M, I> {
    fn name(&self) -> &'static str {
        Arch::Avr.name()
    }

    fn reset(&mut self) {
        Avr::reset(self)
    }

    fn step(&mut self) -> Result<(), StepError> {
        Avr::step(self)
    }

    fn state(&self) -> &State {
        &self.state
    }

    fn pc(&self) -> u32 {
        self.cpu.pc as u32
    }

    fn set_pc(&mut self, word: u32) {
        self.cpu.pc = word as u16;
    }

    fn debug_dump(&self) -> String {
        let mut s = self.dump_regs();
        if let State::Halted(err) = &self.state {
            s.push_str(&format!("\nHALTED: {}", err));
        }
        s
    }

    fn disassemble(&self, word: u32) -> (String, u32) {
        let (text, words) = self.disasm_at(word as u16);
        (text, words as u32)
    }

    fn memory(&self) -> &dyn Memory {
        &self.mem
    }

    fn memory_mut(&mut self) -> &mut dyn Memory {
        &mut self.mem
    }

    fn snapshot(&mut self) -> Snapshot {
        let mut bytes = vec![0u8; self.mem.size() as usize];
        self.mem.read_bytes(0, &mut bytes);
        let ports = (0..memory::PORT_COUNT as u8).map(|p| self.io.get(p)).collect();
        Snapshot::Avr(AvrState { cpu: self.cpu.clone(), variant: self.variant, memory: bytes, ports })
    }

    fn restore(&mut self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        let state = match snapshot {
            Snapshot::Avr(state) => state,
            other => {
                return Err(SnapshotError::ArchMismatch { saved: other.arch().to_string(), current: Arch::Avr })
            }
        };
        if state.memory.len() != self.mem.size() as usize {
            return Err(SnapshotError::MemorySize { saved: state.memory.len(), current: self.mem.size() });
        }
        self.mem.write_bytes(0, &state.memory);
        for (port, &v) in state.ports.iter().enumerate() {
            self.io.set(port as u8, v);
        }
        self.cpu = state.cpu;
        self.variant = state.variant;
        self.state = State::Running;
        Ok(())
    }
}
