use serde::{Deserialize, Serialize};
use tracing::debug;

/// Largest part: 8 KiB, addressed as 1024 blocks of 64 bits.
const DATA_SIZE: usize = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum State {
    /// Waiting for the two command bits.
    Idle,
    Command { first: u16 },
    Address { write: bool, remaining: u8 },
    WriteData { remaining: u8 },
    /// Trailing zero bit closing a write request.
    WriteEnd,
    /// Trailing zero bit closing a read request.
    ReadSetupEnd,
    ReadDummy { remaining: u8 },
    ReadData { remaining: u8 },
}

/// Serial EEPROM clocked one bit per bus access through DMA channel 3.
///
/// The part comes in 512 B (6 address bits) and 8 KiB (14 address bits)
/// flavours and nothing in the cartridge says which: the width is inferred
/// from the length of the first request DMA after reset. A read request is
/// `2 + n + 1` bits and a write request `2 + n + 64 + 1`, so a short first
/// transfer pins the narrow part.
///
/// Read data comes back as 4 dummy bits followed by the 64 data bits
/// MSB-first; reads outside a transfer return 1, the ready flag games poll
/// after programming.
#[derive(Serialize, Deserialize)]
pub struct Eeprom {
    data: Vec<u8>,
    state: State,
    addr_bits: Option<u8>,
    address: u32,
    buffer: u64,
    /// Bit length of the DMA transaction currently clocking the part.
    dma_count: u32,
    pub write_pending: bool,
}

impl Default for Eeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl Eeprom {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![0xFF; DATA_SIZE],
            state: State::Idle,
            addr_bits: None,
            address: 0,
            buffer: 0,
            dma_count: 0,
            write_pending: false,
        }
    }

    /// Called by the DMA engine before piping a transfer at this part.
    pub const fn begin_dma(&mut self, count: u32) {
        self.dma_count = count;
    }

    fn infer_addr_bits(&mut self, write: bool) -> u8 {
        if let Some(bits) = self.addr_bits {
            return bits;
        }
        let threshold = if write { 2 + 6 + 64 + 1 } else { 2 + 6 + 1 };
        let bits = if self.dma_count <= threshold { 6 } else { 14 };
        debug!("EEPROM sized from first transfer: {bits}-bit addressing");
        self.addr_bits = Some(bits);
        bits
    }

    const fn block_mask(&self) -> u32 {
        // 14 address bits are clocked in on the large part but only the low
        // ten select a block.
        match self.addr_bits {
            Some(6) => 0x3F,
            _ => 0x3FF,
        }
    }

    fn block_range(&self) -> std::ops::Range<usize> {
        let base = ((self.address & self.block_mask()) as usize) * 8;
        base..base + 8
    }

    /// Clocks one bit into the part. The bit travels on the data line's lsb;
    /// the rest of the halfword is ignored.
    pub fn write_bit(&mut self, value: u16) {
        let bit = value & 1;
        self.state = match self.state {
            State::Idle | State::ReadDummy { .. } | State::ReadData { .. } => {
                State::Command { first: bit }
            }
            State::Command { first } => match first << 1 | bit {
                0b11 => {
                    let remaining = self.infer_addr_bits(false);
                    self.address = 0;
                    State::Address {
                        write: false,
                        remaining,
                    }
                }
                0b10 => {
                    let remaining = self.infer_addr_bits(true);
                    self.address = 0;
                    State::Address {
                        write: true,
                        remaining,
                    }
                }
                _ => State::Idle,
            },
            State::Address { write, remaining } => {
                self.address = self.address << 1 | u32::from(bit);
                if remaining == 1 {
                    if write {
                        self.buffer = 0;
                        State::WriteData { remaining: 64 }
                    } else {
                        State::ReadSetupEnd
                    }
                } else {
                    State::Address {
                        write,
                        remaining: remaining - 1,
                    }
                }
            }
            State::WriteData { remaining } => {
                self.buffer = self.buffer << 1 | u64::from(bit);
                if remaining == 1 {
                    let range = self.block_range();
                    self.data[range].copy_from_slice(&self.buffer.to_be_bytes());
                    self.write_pending = true;
                    State::WriteEnd
                } else {
                    State::WriteData {
                        remaining: remaining - 1,
                    }
                }
            }
            State::WriteEnd => State::Idle,
            State::ReadSetupEnd => State::ReadDummy { remaining: 4 },
        };
    }

    /// Clocks one bit out of the part.
    pub fn read_bit(&mut self) -> u16 {
        match self.state {
            State::ReadDummy { remaining } => {
                if remaining == 1 {
                    let range = self.block_range();
                    self.buffer = u64::from_be_bytes(self.data[range].try_into().unwrap());
                    self.state = State::ReadData { remaining: 64 };
                } else {
                    self.state = State::ReadDummy {
                        remaining: remaining - 1,
                    };
                }
                0
            }
            State::ReadData { remaining } => {
                let bit = ((self.buffer >> (remaining - 1)) & 1) as u16;
                self.state = if remaining == 1 {
                    State::Idle
                } else {
                    State::ReadData {
                        remaining: remaining - 1,
                    }
                };
                bit
            }
            // Outside a read the part reports ready.
            _ => 1,
        }
    }

    #[must_use]
    pub fn view(&self) -> &[u8] {
        let size = match self.addr_bits {
            Some(6) => 0x200,
            _ => DATA_SIZE,
        };
        &self.data[..size]
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

    fn clock_in(eeprom: &mut Eeprom, bits: &[u16]) {
        for bit in bits {
            eeprom.write_bit(*bit);
        }
    }

    fn address_bits(address: u32, width: u8) -> Vec<u16> {
        (0..width)
            .rev()
            .map(|i| ((address >> i) & 1) as u16)
            .collect()
    }

    fn write_block(eeprom: &mut Eeprom, address: u32, width: u8, value: u64) {
        eeprom.begin_dma(2 + u32::from(width) + 64 + 1);
        clock_in(eeprom, &[1, 0]);
        clock_in(eeprom, &address_bits(address, width));
        let data: Vec<u16> = (0..64).rev().map(|i| ((value >> i) & 1) as u16).collect();
        clock_in(eeprom, &data);
        eeprom.write_bit(0);
    }

    fn read_block(eeprom: &mut Eeprom, address: u32, width: u8) -> u64 {
        eeprom.begin_dma(2 + u32::from(width) + 1);
        clock_in(eeprom, &[1, 1]);
        clock_in(eeprom, &address_bits(address, width));
        eeprom.write_bit(0);

        eeprom.begin_dma(68);
        for _ in 0..4 {
            assert_eq!(eeprom.read_bit(), 0);
        }
        let mut value = 0_u64;
        for _ in 0..64 {
            value = value << 1 | u64::from(eeprom.read_bit());
        }
        value
    }

    #[test]
    fn write_then_read_roundtrip() {
        let mut eeprom = Eeprom::new();
        write_block(&mut eeprom, 0x21, 6, 0x0123_4567_89AB_CDEF);

        assert!(eeprom.write_pending);
        assert_eq!(read_block(&mut eeprom, 0x21, 6), 0x0123_4567_89AB_CDEF);
    }

    #[test]
    fn short_first_transfer_pins_the_narrow_part() {
        let mut eeprom = Eeprom::new();
        eeprom.begin_dma(9);
        clock_in(&mut eeprom, &[1, 1]);
        assert_eq!(eeprom.addr_bits, Some(6));
        assert_eq!(eeprom.view().len(), 0x200);
    }

    #[test]
    fn long_first_transfer_pins_the_wide_part() {
        let mut eeprom = Eeprom::new();
        write_block(&mut eeprom, 0x155, 14, 0xDEAD_BEEF_0BAD_F00D);

        assert_eq!(eeprom.addr_bits, Some(14));
        assert_eq!(eeprom.view().len(), 0x2000);
        assert_eq!(read_block(&mut eeprom, 0x155, 14), 0xDEAD_BEEF_0BAD_F00D);
    }

    #[test]
    fn only_ten_address_bits_select_a_block() {
        let mut eeprom = Eeprom::new();
        write_block(&mut eeprom, 0x155, 14, 0x1111_2222_3333_4444);
        assert_eq!(
            read_block(&mut eeprom, 0x155 | 0x400, 14),
            0x1111_2222_3333_4444
        );
    }

    #[test]
    fn idle_reads_report_ready() {
        let mut eeprom = Eeprom::new();
        assert_eq!(eeprom.read_bit(), 1);
    }

    #[test]
    fn fresh_part_reads_erased() {
        let mut eeprom = Eeprom::new();
        assert_eq!(read_block(&mut eeprom, 0, 14), u64::MAX);
    }
}
