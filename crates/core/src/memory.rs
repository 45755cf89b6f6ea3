//! Memory, I/O and register storage.
//!
//! The simulator sees two address spaces:
//!
//! | Space    | Width   | Used by                                        |
//! |----------|---------|------------------------------------------------|
//! | [`Memory`] | flat bytes | fetch, LD/ST/LDS/STS/LPM, PUSH/POP, CALL/RET |
//! | [`Io`]     | 64 ports   | IN/OUT, CBI/SBI/SBIC/SBIS                    |
//!
//! Both are traits so that an embedding can supply its own bus. The simulator
//! owns whatever it is given; pass `&mut T` to keep ownership on the caller's
//! side, both traits are implemented for mutable references.
//!
//! Registers R0–R31 are not mapped into either space.

use serde::{Deserialize, Serialize};

/// Flat byte-addressed memory.
///
/// Reads outside [`size`](Memory::size) return 0 and writes are dropped.
pub trait Memory {
    /// Number of addressable bytes.
    fn size(&self) -> u32;
    fn read_u8(&self, addr: u32) -> u8;
    fn write_u8(&mut self, addr: u32, value: u8);

    /// Little-endian 16-bit read.
    fn read_u16(&self, addr: u32) -> u16 {
        self.read_u8(addr) as u16 | (self.read_u8(addr.wrapping_add(1)) as u16) << 8
    }

    /// Little-endian 32-bit read.
    fn read_u32(&self, addr: u32) -> u32 {
        self.read_u16(addr) as u32 | (self.read_u16(addr.wrapping_add(2)) as u32) << 16
    }

    fn read_bytes(&self, addr: u32, buf: &mut [u8]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.read_u8(addr.wrapping_add(i as u32));
        }
    }

    fn write_bytes(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.write_u8(addr.wrapping_add(i as u32), b);
        }
    }
}

/// Port-style I/O space (IN/OUT).
///
/// Ports 0x3d and 0x3e never reach this trait: the simulator maps them onto
/// SPL and SPH.
pub trait Io {
    fn get(&mut self, port: u8) -> u8;
    fn set(&mut self, port: u8, value: u8);
}

impl<T: Memory + ?Sized> Memory for &mut T {
    fn size(&self) -> u32 {
        (**self).size()
    }
    fn read_u8(&self, addr: u32) -> u8 {
        (**self).read_u8(addr)
    }
    fn write_u8(&mut self, addr: u32, value: u8) {
        (**self).write_u8(addr, value)
    }
}

impl<T: Io + ?Sized> Io for &mut T {
    fn get(&mut self, port: u8) -> u8 {
        (**self).get(port)
    }
    fn set(&mut self, port: u8, value: u8) {
        (**self).set(port, value)
    }
}

/// Plain RAM-backed [`Memory`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatMemory {
    pub data: Vec<u8>,
}

impl FlatMemory {
    pub fn new(size: u32) -> Self {
        FlatMemory { data: vec![0u8; size as usize] }
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl Memory for FlatMemory {
    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    #[inline(always)]
    fn read_u8(&self, addr: u32) -> u8 {
        self.data.get(addr as usize).copied().unwrap_or(0)
    }

    #[inline(always)]
    fn write_u8(&mut self, addr: u32, value: u8) {
        if let Some(b) = self.data.get_mut(addr as usize) {
            *b = value;
        }
    }
}

/// Number of ports addressable by IN/OUT.
pub const PORT_COUNT: usize = 64;

/// Latching [`Io`] space: every port remembers the last value written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpace {
    pub ports: Vec<u8>,
}

impl PortSpace {
    pub fn new() -> Self {
        PortSpace { ports: vec![0u8; PORT_COUNT] }
    }
}

impl Default for PortSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl Io for PortSpace {
    fn get(&mut self, port: u8) -> u8 {
        self.ports.get(port as usize).copied().unwrap_or(0)
    }

    fn set(&mut self, port: u8, value: u8) {
        if let Some(p) = self.ports.get_mut(port as usize) {
            *p = value;
        }
    }
}

/// General purpose registers R0–R31.
///
/// X, Y and Z are views over R26:R27, R28:R29 and R30:R31 (low byte first);
/// there is no separate 16-bit storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterFile {
    regs: [u8; 32],
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile { regs: [0u8; 32] }
    }

    #[inline(always)]
    pub fn get(&self, r: u8) -> u8 {
        self.regs[(r & 0x1f) as usize]
    }

    #[inline(always)]
    pub fn set(&mut self, r: u8, v: u8) {
        self.regs[(r & 0x1f) as usize] = v;
    }

    /// Read the 16-bit pair starting at register `r` (`r` low, `r + 1` high).
    #[inline(always)]
    pub fn pair(&self, r: u8) -> u16 {
        self.get(r) as u16 | (self.get(r.wrapping_add(1)) as u16) << 8
    }

    #[inline(always)]
    pub fn set_pair(&mut self, r: u8, v: u16) {
        self.set(r, v as u8);
        self.set(r.wrapping_add(1), (v >> 8) as u8);
    }

    /// X register (R26:R27)
    #[inline(always)]
    pub fn x(&self) -> u16 {
        self.pair(26)
    }

    /// Y register (R28:R29)
    #[inline(always)]
    pub fn y(&self) -> u16 {
        self.pair(28)
    }

    /// Z register (R30:R31)
    #[inline(always)]
    pub fn z(&self) -> u16 {
        self.pair(30)
    }

    #[inline(always)]
    pub fn set_x(&mut self, v: u16) {
        self.set_pair(26, v);
    }

    #[inline(always)]
    pub fn set_y(&mut self, v: u16) {
        self.set_pair(28, v);
    }

    #[inline(always)]
    pub fn set_z(&mut self, v: u16) {
        self.set_pair(30, v);
    }

    pub fn as_slice(&self) -> &[u8; 32] {
        &self.regs
    }

    pub fn clear(&mut self) {
        self.regs = [0u8; 32];
    }
}
