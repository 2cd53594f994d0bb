//! Raw I/O register block.
//!
//! The bus intercepts the registers the core owns (DMA, WAITCNT, the
//! interrupt block) and lets the video/audio/timer/serial collaborators keep
//! their semantics; their registers live here as plain halfword storage so
//! that reads return what was written and the whole block can be frozen into
//! a snapshot in one piece.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::bitwise::Bits;

/// Register halfwords in the 1 KiB block at `0x0400_0000`.
pub const IO_REGISTERS: usize = 0x200;

/// Byte length of the mapped block.
pub const IO_SIZE: u32 = 0x400;

pub const DISPSTAT: u32 = 0x004;
pub const VCOUNT: u32 = 0x006;

/// First DMA register; each channel occupies 12 bytes.
pub const DMA_BASE: u32 = 0x0B0;
pub const DMA_CHANNEL_SPAN: u32 = 0x00C;
pub const DMA_END: u32 = 0x0E0;

pub const WAITCNT: u32 = 0x204;
pub const IE: u32 = 0x200;
pub const IF: u32 = 0x202;
pub const IME: u32 = 0x208;
pub const POSTFLG: u32 = 0x300;
pub const HALTCNT: u32 = 0x301;

#[serde_as]
#[derive(Serialize, Deserialize)]
pub struct IoRegisters {
    #[serde_as(as = "Box<[_; 512]>")]
    registers: Box<[u16; IO_REGISTERS]>,
}

impl Default for IoRegisters {
    fn default() -> Self {
        Self {
            registers: Box::new([0; IO_REGISTERS]),
        }
    }
}

impl IoRegisters {
    #[must_use]
    pub fn read16(&self, offset: u32) -> u16 {
        self.registers[((offset & (IO_SIZE - 1)) >> 1) as usize]
    }

    pub fn write16(&mut self, offset: u32, value: u16) {
        self.registers[((offset & (IO_SIZE - 1)) >> 1) as usize] = value;
    }

    #[must_use]
    pub fn read8(&self, offset: u32) -> u8 {
        self.read16(offset).get_byte((offset & 1) as u8)
    }

    pub fn write8(&mut self, offset: u32, value: u8) {
        let mut halfword = self.read16(offset);
        halfword.set_byte((offset & 1) as u8, value);
        self.write16(offset, halfword);
    }

    /// The block as little-endian bytes, for snapshots.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.registers
            .iter()
            .flat_map(|halfword| halfword.to_le_bytes())
            .collect()
    }

    /// Restores the block from its snapshot form.
    pub fn load_bytes(&mut self, bytes: &[u8]) {
        for (register, chunk) in self.registers.iter_mut().zip(bytes.chunks_exact(2)) {
            *register = u16::from_le_bytes([chunk[0], chunk[1]]);
        }
    }
}
