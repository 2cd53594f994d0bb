use tracing::debug;

use crate::bitwise::Bits;
use crate::memory::icache::{CachePage, InstrCache};
use crate::memory::{ROM_MASK, ROM_PAGE_BITS, read_u16_le, rotate_misaligned};

/// Window of cartridge ROM offsets wired to the GPIO port.
pub const GPIO_BASE: u32 = 0xC4;
pub const GPIO_END: u32 = 0xCA;

/// General-purpose I/O lines behind the cartridge ROM window, used by carts
/// with a real-time clock or sensors. Allocated on demand: plain carts never
/// pay for it and reads fall through to the ROM bytes.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct Gpio {
    /// Pin state, 4 bits.
    pub data: u16,
    /// Pin direction, 1 = output.
    pub direction: u16,
    /// Bit 0 makes the port readable through ROM reads.
    pub control: u16,
}

impl Gpio {
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.control & 1 != 0
    }

    #[must_use]
    pub fn read16(&self, offset: u32) -> u16 {
        match offset {
            0xC4 => self.data,
            0xC6 => self.direction,
            0xC8 => self.control,
            _ => 0,
        }
    }

    pub fn write16(&mut self, offset: u32, value: u16) {
        match offset {
            0xC4 => self.data = value & 0xF,
            0xC6 => self.direction = value & 0xF,
            0xC8 => self.control = value & 1,
            _ => {}
        }
    }
}

/// The cartridge ROM view shared by all three wait-state windows. Data
/// accesses are read-only; halfword and word stores inside the GPIO window
/// are forwarded to the port, everything else is dropped.
pub struct RomRegion {
    data: Vec<u8>,
    gpio: Option<Gpio>,
    icache: InstrCache,
}

impl RomRegion {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            icache: InstrCache::new(ROM_PAGE_BITS, (ROM_MASK as usize) + 1),
            gpio: None,
            data,
        }
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub const fn gpio(&self) -> Option<&Gpio> {
        self.gpio.as_ref()
    }

    /// Out-of-bounds cartridge reads see the address bus itself: the ROM is
    /// halfword addressed and nothing drives the data lines, so the value
    /// left there is `(offset / 2) & 0xFFFF`.
    fn unused_halfword(offset: u32) -> u16 {
        ((offset >> 1) & 0xFFFF) as u16
    }

    #[must_use]
    pub fn load8(&self, offset: u32) -> i8 {
        self.load_u8(offset) as i8
    }

    #[must_use]
    pub fn load_u8(&self, offset: u32) -> u8 {
        let offset = offset & ROM_MASK;
        if let Some(halfword) = self.gpio_read(offset) {
            return halfword.get_byte((offset & 1) as u8);
        }
        self.data
            .get(offset as usize)
            .copied()
            .unwrap_or_else(|| Self::unused_halfword(offset).get_byte((offset & 1) as u8))
    }

    #[must_use]
    pub fn load16(&self, offset: u32) -> i16 {
        self.load_u16(offset) as i16
    }

    #[must_use]
    pub fn load_u16(&self, offset: u32) -> u16 {
        let offset = offset & ROM_MASK;
        if let Some(halfword) = self.gpio_read(offset) {
            return halfword;
        }
        if (offset as usize) + 1 < self.data.len() {
            read_u16_le(&self.data, offset as usize)
        } else {
            Self::unused_halfword(offset)
        }
    }

    #[must_use]
    pub fn load32(&self, offset: u32) -> u32 {
        let aligned = offset & ROM_MASK & !3;
        let lo = u32::from(self.load_u16(aligned));
        let hi = u32::from(self.load_u16(aligned + 2));
        rotate_misaligned(hi << 16 | lo, offset)
    }

    fn gpio_read(&self, offset: u32) -> Option<u16> {
        let gpio = self.gpio.as_ref()?;
        if (GPIO_BASE..GPIO_END).contains(&(offset & !1)) && gpio.is_readable() {
            Some(gpio.read16(offset & !1))
        } else {
            None
        }
    }

    /// Byte stores never reach the cartridge bus.
    pub fn store8(&self, offset: u32, value: u8) {
        debug!("discarding byte write to ROM at 0x{offset:08X} (0x{value:02X})");
    }

    pub fn store16(&mut self, offset: u32, value: u16) {
        let offset = offset & ROM_MASK & !1;
        if (GPIO_BASE..GPIO_END).contains(&offset) {
            self.gpio.get_or_insert_with(Gpio::default).write16(offset, value);
        } else {
            debug!("discarding halfword write to ROM at 0x{offset:08X}");
        }
    }

    pub fn store32(&mut self, offset: u32, value: u32) {
        let offset = offset & ROM_MASK & !3;
        self.store16(offset, (value & 0xFFFF) as u16);
        self.store16(offset + 2, (value >> 16) as u16);
    }

    pub fn access_page(&mut self, offset: u32) -> &mut CachePage {
        self.icache.access_page(offset & ROM_MASK)
    }
}
