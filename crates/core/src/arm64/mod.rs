//! AArch64 core.
//!
//! A classifier, not a simulator: [`Arm64::step`] fetches and classifies one
//! opcode, then halts with [`StepError::Illegal`] for unallocated encodings or
//! [`StepError::Unimplemented`] for everything else. Disassembly of the
//! data-processing (immediate) group is complete.

pub mod decode;
pub mod printer;

use log::{trace, warn};

use crate::memory::{FlatMemory, Memory};
use crate::savestate::{Arm64State, Snapshot, SnapshotError};
use crate::{Arch, Core, State, StepError};

/// Number of general purpose registers (x0..x30).
pub const GPR_COUNT: usize = 31;

pub struct Arm64 {
    pub x: [u64; GPR_COUNT],
    /// Program counter in 32-bit words.
    pub pc: u32,
    pub mem: FlatMemory,
    state: State,
}

impl Arm64 {
    pub fn new(memory_size: u32) -> Self {
        Arm64 { x: [0; GPR_COUNT], pc: 0, mem: FlatMemory::new(memory_size), state: State::Reset }
    }

    pub fn fetch(&self, word: u32) -> u32 {
        self.mem.read_u32(word.wrapping_mul(4))
    }
}

impl Core for Arm64 {
    fn name(&self) -> &'static str {
        Arch::Arm64.name()
    }

    fn reset(&mut self) {
        self.x = [0; GPR_COUNT];
        self.pc = 0;
        self.state = State::Reset;
    }

    fn step(&mut self) -> Result<(), StepError> {
        if let State::Halted(err) = &self.state {
            return Err(err.clone());
        }
        self.state = State::Running;
        let raw = self.fetch(self.pc);
        trace!("0x{:08x}: {}", self.pc.wrapping_mul(4), printer::format(raw));

        let err = match decode::decode(raw) {
            Some(d) => StepError::Unimplemented { mnemonic: d.mnemonic(), pc: self.pc },
            None => StepError::Illegal { opcode: raw, pc: self.pc },
        };
        warn!("halted: {}", err);
        self.state = State::Halted(err.clone());
        Err(err)
    }

    fn state(&self) -> &State {
        &self.state
    }

    fn pc(&self) -> u32 {
        self.pc
    }

    fn set_pc(&mut self, word: u32) {
        self.pc = word;
    }

    fn debug_dump(&self) -> String {
        let mut s = String::new();
        for (i, v) in self.x.iter().enumerate() {
            if i % 4 == 0 && i > 0 {
                s.push('\n');
            }
            s.push_str(&format!("x{:<2}={:016x} ", i, v));
        }
        s.push_str(&format!("\npc={:08x}", self.pc.wrapping_mul(4)));
        if let State::Halted(err) = &self.state {
            s.push_str(&format!("\nHALTED: {}", err));
        }
        s
    }

    fn disassemble(&self, word: u32) -> (String, u32) {
        (printer::format(self.fetch(word)), 1)
    }

    fn memory(&self) -> &dyn Memory {
        &self.mem
    }

    fn memory_mut(&mut self) -> &mut dyn Memory {
        &mut self.mem
    }

    fn snapshot(&mut self) -> Snapshot {
        Snapshot::Arm64(Arm64State { x: self.x.to_vec(), pc: self.pc, memory: self.mem.data.clone() })
    }

    fn restore(&mut self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        let state = match snapshot {
            Snapshot::Arm64(state) => state,
            other => {
                return Err(SnapshotError::ArchMismatch { saved: other.arch().to_string(), current: Arch::Arm64 })
            }
        };
        if state.memory.len() != self.mem.data.len() {
            return Err(SnapshotError::MemorySize { saved: state.memory.len(), current: self.mem.size() });
        }
        for (dst, src) in self.x.iter_mut().zip(&state.x) {
            *dst = *src;
        }
        self.pc = state.pc;
        self.mem.data = state.memory;
        self.state = State::Running;
        Ok(())
    }
}
