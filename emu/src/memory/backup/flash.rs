use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SIZE_64K: usize = 0x1_0000;
pub const SIZE_128K: usize = 0x2_0000;

const CMD_ADDR1: u32 = 0x5555;
const CMD_ADDR2: u32 = 0x2AAA;

/// Command-machine state. Every command opens with `AA @ 0x5555`,
/// `55 @ 0x2AAA`, then a command byte at `0x5555`; erases nest a second
/// unlock sequence after the `0x80` prefix.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum FlashMode {
    #[default]
    Ready,
    Unlock1,
    Unlock2,
    IdMode,
    Erase,
    EraseUnlock1,
    EraseUnlock2,
    Write,
    BankSelect,
}

/// Flash backup, 512 Kbit or 1 Mbit. The 1 Mbit part is split into two
/// 64 KiB banks selected through the `0xB0` command; programming can only
/// clear bits, erasing sets a 4 KiB sector (or the whole chip) back to `0xFF`.
#[derive(Serialize, Deserialize)]
pub struct Flash {
    data: Vec<u8>,
    mode: FlashMode,
    bank: u8,
    pub write_pending: bool,
}

impl Flash {
    #[must_use]
    pub fn new(size: usize) -> Self {
        debug_assert!(size == SIZE_64K || size == SIZE_128K);
        Self {
            data: vec![0xFF; size],
            mode: FlashMode::Ready,
            bank: 0,
            write_pending: false,
        }
    }

    /// Manufacturer and device IDs games use to probe the part: Panasonic
    /// MN63F805MNP for the 512 Kbit chip, Sanyo LE26FV10N1TS for 1 Mbit.
    const fn id(&self) -> [u8; 2] {
        if self.data.len() == SIZE_64K {
            [0x32, 0x1B]
        } else {
            [0x62, 0x13]
        }
    }

    fn bank_offset(&self, offset: u32) -> usize {
        usize::from(self.bank) * SIZE_64K + ((offset as usize) & (SIZE_64K - 1))
    }

    #[must_use]
    pub fn load_u8(&self, offset: u32) -> u8 {
        let offset = offset & 0xFFFF;
        if self.mode == FlashMode::IdMode && offset < 2 {
            return self.id()[offset as usize];
        }
        self.data[self.bank_offset(offset)]
    }

    pub fn store8(&mut self, offset: u32, value: u8) {
        let offset = offset & 0xFFFF;
        self.mode = match self.mode {
            FlashMode::Ready if offset == CMD_ADDR1 && value == 0xAA => FlashMode::Unlock1,
            FlashMode::Ready => FlashMode::Ready,
            FlashMode::Unlock1 if offset == CMD_ADDR2 && value == 0x55 => FlashMode::Unlock2,
            FlashMode::Unlock1 => FlashMode::Ready,
            FlashMode::Unlock2 if offset == CMD_ADDR1 => match value {
                0x90 => FlashMode::IdMode,
                0xF0 => FlashMode::Ready,
                0x80 => FlashMode::Erase,
                0xA0 => FlashMode::Write,
                0xB0 if self.data.len() == SIZE_128K => FlashMode::BankSelect,
                _ => {
                    debug!("unknown flash command 0x{value:02X}");
                    FlashMode::Ready
                }
            },
            FlashMode::Unlock2 => FlashMode::Ready,
            FlashMode::IdMode if value == 0xF0 => FlashMode::Ready,
            FlashMode::IdMode if offset == CMD_ADDR1 && value == 0xAA => FlashMode::Unlock1,
            FlashMode::IdMode => FlashMode::IdMode,
            FlashMode::Erase if offset == CMD_ADDR1 && value == 0xAA => FlashMode::EraseUnlock1,
            FlashMode::Erase => FlashMode::Ready,
            FlashMode::EraseUnlock1 if offset == CMD_ADDR2 && value == 0x55 => {
                FlashMode::EraseUnlock2
            }
            FlashMode::EraseUnlock1 => FlashMode::Ready,
            FlashMode::EraseUnlock2 => {
                if value == 0x10 && offset == CMD_ADDR1 {
                    self.data.fill(0xFF);
                    self.write_pending = true;
                } else if value == 0x30 {
                    let sector = usize::from(self.bank) * SIZE_64K + ((offset as usize) & 0xF000);
                    self.data[sector..sector + 0x1000].fill(0xFF);
                    self.write_pending = true;
                }
                FlashMode::Ready
            }
            FlashMode::Write => {
                let index = self.bank_offset(offset);
                // Programming can only clear bits.
                self.data[index] &= value;
                self.write_pending = true;
                FlashMode::Ready
            }
            FlashMode::BankSelect => {
                if offset == 0 {
                    self.bank = value & 1;
                }
                FlashMode::Ready
            }
        };
    }

    #[must_use]
    pub fn view(&self) -> &[u8] {
        &self.data
    }

    pub fn replace_data(&mut self, data: &[u8]) {
        let len = data.len().min(self.data.len());
        self.data[..len].copy_from_slice(&data[..len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn unlock(flash: &mut Flash) {
        flash.store8(CMD_ADDR1, 0xAA);
        flash.store8(CMD_ADDR2, 0x55);
    }

    fn program(flash: &mut Flash, offset: u32, value: u8) {
        unlock(flash);
        flash.store8(CMD_ADDR1, 0xA0);
        flash.store8(offset, value);
    }

    #[test]
    fn fresh_chip_reads_erased() {
        let flash = Flash::new(SIZE_64K);
        assert_eq!(flash.load_u8(0x1234), 0xFF);
    }

    #[test]
    fn byte_program() {
        let mut flash = Flash::new(SIZE_64K);
        program(&mut flash, 0x1234, 0x5A);

        assert_eq!(flash.load_u8(0x1234), 0x5A);
        assert!(flash.write_pending);

        // A second program can only clear bits.
        program(&mut flash, 0x1234, 0xF0);
        assert_eq!(flash.load_u8(0x1234), 0x50);
    }

    #[test]
    fn stray_writes_do_not_program() {
        let mut flash = Flash::new(SIZE_64K);
        flash.store8(0x1234, 0x00);
        assert_eq!(flash.load_u8(0x1234), 0xFF);
        assert!(!flash.write_pending);
    }

    #[test]
    fn id_mode_reports_the_part() {
        let mut flash = Flash::new(SIZE_64K);
        unlock(&mut flash);
        flash.store8(CMD_ADDR1, 0x90);
        assert_eq!(flash.load_u8(0), 0x32);
        assert_eq!(flash.load_u8(1), 0x1B);

        // 0xF0 leaves ID mode.
        flash.store8(CMD_ADDR1, 0xF0);
        assert_eq!(flash.load_u8(0), 0xFF);

        let mut big = Flash::new(SIZE_128K);
        unlock(&mut big);
        big.store8(CMD_ADDR1, 0x90);
        assert_eq!(big.load_u8(0), 0x62);
        assert_eq!(big.load_u8(1), 0x13);
    }

    #[test]
    fn sector_erase() {
        let mut flash = Flash::new(SIZE_64K);
        program(&mut flash, 0x3008, 0x00);
        program(&mut flash, 0x4008, 0x00);

        unlock(&mut flash);
        flash.store8(CMD_ADDR1, 0x80);
        unlock(&mut flash);
        flash.store8(0x3000, 0x30);

        assert_eq!(flash.load_u8(0x3008), 0xFF);
        assert_eq!(flash.load_u8(0x4008), 0x00);
    }

    #[test]
    fn chip_erase() {
        let mut flash = Flash::new(SIZE_64K);
        program(&mut flash, 0x0008, 0x00);

        unlock(&mut flash);
        flash.store8(CMD_ADDR1, 0x80);
        unlock(&mut flash);
        flash.store8(CMD_ADDR1, 0x10);

        assert_eq!(flash.load_u8(0x0008), 0xFF);
    }

    #[test]
    fn bank_select_on_the_1mbit_part() {
        let mut flash = Flash::new(SIZE_128K);
        program(&mut flash, 0x0040, 0x11);

        unlock(&mut flash);
        flash.store8(CMD_ADDR1, 0xB0);
        flash.store8(0, 1);

        // Same window offset, other bank.
        assert_eq!(flash.load_u8(0x0040), 0xFF);
        program(&mut flash, 0x0040, 0x22);
        assert_eq!(flash.view()[SIZE_64K + 0x40], 0x22);

        unlock(&mut flash);
        flash.store8(CMD_ADDR1, 0xB0);
        flash.store8(0, 0);
        assert_eq!(flash.load_u8(0x0040), 0x11);
    }

    #[test]
    fn bank_select_rejected_on_the_small_part() {
        let mut flash = Flash::new(SIZE_64K);
        unlock(&mut flash);
        flash.store8(CMD_ADDR1, 0xB0);
        flash.store8(0, 1);
        assert_eq!(flash.bank, 0);
    }
}
