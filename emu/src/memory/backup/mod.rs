//! Cartridge backup memory: the battery-backed store that survives power-off.
//!
//! Three incompatible parts shipped in real carts and games probe for the one
//! they were linked against, so all three share one access surface behind
//! [`Backup`]:
//!
//! * [`sram::Sram`] - 32 KiB of battery SRAM, byte granular.
//! * [`flash::Flash`] - 64 or 128 KiB of flash behind the commodity
//!   `0x5555`/`0x2AAA` command protocol.
//! * [`eeprom::Eeprom`] - 512 B or 8 KiB serial EEPROM clocked one bit per
//!   access through DMA channel 3.
//!
//! Every mutation raises `write_pending`; the frame-boundary flush logic in
//! [`crate::savegame`] watches that flag to decide when the host store needs
//! a fresh copy.

pub mod eeprom;
pub mod flash;
pub mod sram;

use serde::{Deserialize, Serialize};

pub use eeprom::Eeprom;
pub use flash::Flash;
pub use sram::Sram;

/// Which backup part a cartridge carries, inferred from the library token
/// compiled into the ROM image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveType {
    Sram,
    Flash512,
    Flash1M,
    Eeprom,
}

#[derive(Serialize, Deserialize)]
pub enum Backup {
    Sram(Sram),
    Flash(Flash),
    Eeprom(Eeprom),
}

impl Backup {
    #[must_use]
    pub fn for_save_type(save_type: SaveType) -> Self {
        match save_type {
            SaveType::Sram => Self::Sram(Sram::new()),
            SaveType::Flash512 => Self::Flash(Flash::new(flash::SIZE_64K)),
            SaveType::Flash1M => Self::Flash(Flash::new(flash::SIZE_128K)),
            SaveType::Eeprom => Self::Eeprom(Eeprom::new()),
        }
    }

    #[must_use]
    pub fn load8(&mut self, offset: u32) -> i8 {
        self.load_u8(offset) as i8
    }

    pub fn load_u8(&mut self, offset: u32) -> u8 {
        match self {
            Self::Sram(sram) => sram.load_u8(offset),
            Self::Flash(flash) => flash.load_u8(offset),
            Self::Eeprom(eeprom) => (eeprom.read_bit() & 1) as u8,
        }
    }

    #[must_use]
    pub fn load16(&mut self, offset: u32) -> i16 {
        self.load_u16(offset) as i16
    }

    /// The SRAM/Flash bus is eight bits wide; wider reads see the byte
    /// repeated on every lane. EEPROM reads clock out one bit regardless of
    /// width.
    pub fn load_u16(&mut self, offset: u32) -> u16 {
        match self {
            Self::Eeprom(eeprom) => eeprom.read_bit(),
            _ => u16::from_le_bytes([self.load_u8(offset); 2]),
        }
    }

    pub fn load32(&mut self, offset: u32) -> u32 {
        match self {
            Self::Eeprom(eeprom) => u32::from(eeprom.read_bit()),
            _ => {
                let byte = u32::from(self.load_u8(offset));
                byte | byte << 8 | byte << 16 | byte << 24
            }
        }
    }

    pub fn store8(&mut self, offset: u32, value: u8) {
        match self {
            Self::Sram(sram) => sram.store8(offset, value),
            Self::Flash(flash) => flash.store8(offset, value),
            Self::Eeprom(eeprom) => eeprom.write_bit(u16::from(value)),
        }
    }

    /// Wide stores on the 8-bit bus put the lane selected by the address on
    /// the data lines.
    pub fn store16(&mut self, offset: u32, value: u16) {
        match self {
            Self::Eeprom(eeprom) => eeprom.write_bit(value),
            _ => self.store8(offset, (value >> ((offset & 1) * 8)) as u8),
        }
    }

    pub fn store32(&mut self, offset: u32, value: u32) {
        match self {
            Self::Eeprom(eeprom) => eeprom.write_bit(value as u16),
            _ => self.store8(offset, (value >> ((offset & 3) * 8)) as u8),
        }
    }

    #[must_use]
    pub const fn write_pending(&self) -> bool {
        match self {
            Self::Sram(sram) => sram.write_pending,
            Self::Flash(flash) => flash.write_pending,
            Self::Eeprom(eeprom) => eeprom.write_pending,
        }
    }

    pub const fn clear_write_pending(&mut self) {
        match self {
            Self::Sram(sram) => sram.write_pending = false,
            Self::Flash(flash) => flash.write_pending = false,
            Self::Eeprom(eeprom) => eeprom.write_pending = false,
        }
    }

    /// Raw dump of the whole part, used for the save-file wire form.
    #[must_use]
    pub fn view(&self) -> &[u8] {
        match self {
            Self::Sram(sram) => sram.view(),
            Self::Flash(flash) => flash.view(),
            Self::Eeprom(eeprom) => eeprom.view(),
        }
    }

    /// Overwrites the part contents from a loaded save file. Oversized input
    /// is truncated to the part size.
    pub fn replace_data(&mut self, data: &[u8]) {
        match self {
            Self::Sram(sram) => sram.replace_data(data),
            Self::Flash(flash) => flash.replace_data(data),
            Self::Eeprom(eeprom) => eeprom.replace_data(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wide_reads_repeat_the_byte() {
        let mut backup = Backup::for_save_type(SaveType::Sram);
        backup.store8(0x10, 0x5C);

        assert_eq!(backup.load_u16(0x10), 0x5C5C);
        assert_eq!(backup.load32(0x10), 0x5C5C_5C5C);
    }

    #[test]
    fn wide_stores_pick_the_addressed_lane() {
        let mut backup = Backup::for_save_type(SaveType::Sram);
        backup.store16(0x21, 0xAB_12);
        assert_eq!(backup.load_u8(0x21), 0xAB);

        backup.store32(0x32, 0x99_88_77_66);
        assert_eq!(backup.load_u8(0x32), 0x88);
    }

    #[test]
    fn any_store_raises_write_pending() {
        let mut backup = Backup::for_save_type(SaveType::Sram);
        assert!(!backup.write_pending());

        backup.store8(0, 1);
        assert!(backup.write_pending());

        backup.clear_write_pending();
        assert!(!backup.write_pending());
    }
}
