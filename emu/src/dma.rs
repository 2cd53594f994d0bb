//! DMA channel state and register decode.
//!
//! Four channels, each programmed through a source/destination/count/control
//! register quartet in the I/O block. The visible registers never change once
//! written; the working state lives in the `next_*` shadows, snapshotted on
//! the leading edge of the enable bit and advanced as transfers are serviced.
//! The transfer loop itself sits on the bus, which owns both endpoints
//! (see [`Bus`](crate::bus::Bus)).

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;

pub const DMA_CHANNELS: usize = 4;

/// Programmed addresses keep 28 significant bits.
pub const ADDRESS_MASK: u32 = 0x0FFF_FFFF;

/// Per-access address step, in transfer widths, indexed by address control.
pub const DMA_OFFSET: [i32; 4] = [1, -1, 0, 1];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressControl {
    #[default]
    Increment,
    Decrement,
    Fixed,
    /// Increments while transferring, reloads on repeat. Valid for the
    /// destination only.
    IncrementReload,
}

impl AddressControl {
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Increment,
            1 => Self::Decrement,
            2 => Self::Fixed,
            _ => Self::IncrementReload,
        }
    }

    /// Signed step in units of the transfer width.
    #[must_use]
    pub const fn step(self) -> i32 {
        DMA_OFFSET[self as usize]
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timing {
    #[default]
    Immediate,
    VBlank,
    HBlank,
    /// Channel specific: audio FIFO on 1/2, video capture on 3.
    Custom,
}

impl Timing {
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        match bits & 3 {
            0 => Self::Immediate,
            1 => Self::VBlank,
            2 => Self::HBlank,
            _ => Self::Custom,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub source: u32,
    pub dest: u32,
    pub count: u32,
    pub src_control: AddressControl,
    pub dst_control: AddressControl,
    pub repeat: bool,
    /// Transfer unit in bytes: 2 or 4.
    pub width: u32,
    pub timing: Timing,
    pub do_irq: bool,
    pub enable: bool,

    pub next_source: u32,
    pub next_dest: u32,
    pub next_count: u32,
    /// Cycle stamp at which the completion IRQ fires.
    pub next_irq: Option<u64>,
}

impl Channel {
    /// Decodes a control halfword. Returns `true` on the leading edge of the
    /// enable bit, after latching the shadow registers; the caller schedules
    /// the transfer.
    pub fn write_control(&mut self, half: u16) -> bool {
        let was_enabled = self.enable;

        self.dst_control = AddressControl::from_bits(half.get_bits(5..=6));
        self.src_control = AddressControl::from_bits(half.get_bits(7..=8));
        self.repeat = half.get_bit(9);
        self.width = if half.get_bit(10) { 4 } else { 2 };
        self.timing = Timing::from_bits(half.get_bits(12..=13));
        self.do_irq = half.get_bit(14);
        self.enable = half.get_bit(15);

        if self.enable && !was_enabled {
            self.next_source = self.source;
            self.next_dest = self.dest;
            self.next_count = self.count;
            true
        } else {
            false
        }
    }
}

#[derive(Default, Serialize, Deserialize)]
pub struct Dma {
    pub channels: [Channel; DMA_CHANNELS],
    /// FIFO transfers queued for the audio collaborator to run.
    pub fifo_requests: Vec<usize>,
}

impl Dma {
    pub fn set_source(&mut self, channel: usize, word: u32) {
        self.channels[channel].source = word & ADDRESS_MASK;
    }

    pub fn set_dest(&mut self, channel: usize, word: u32) {
        self.channels[channel].dest = word & ADDRESS_MASK;
    }

    /// A written count of zero means the channel maximum.
    pub fn set_word_count(&mut self, channel: usize, half: u16) {
        self.channels[channel].count = match (half, channel) {
            (0, 3) => 0x1_0000,
            (0, _) => 0x4000,
            (count, _) => u32::from(count),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_decode() {
        let mut channel = Channel::default();
        // dst decrement, src fixed, repeat, 32-bit, hblank, irq, enable.
        let edge = channel.write_control(0b1110_0101_0010_0000);

        assert!(edge);
        assert_eq!(channel.dst_control, AddressControl::Decrement);
        assert_eq!(channel.src_control, AddressControl::Fixed);
        assert!(channel.repeat);
        assert_eq!(channel.width, 4);
        assert_eq!(channel.timing, Timing::HBlank);
        assert!(channel.do_irq);
        assert!(channel.enable);
    }

    #[test]
    fn enable_edge_latches_the_shadows() {
        let mut channel = Channel {
            source: 0x0200_0000,
            dest: 0x0300_0000,
            count: 0x10,
            ..Default::default()
        };

        assert!(channel.write_control(0x8000));
        assert_eq!(channel.next_source, 0x0200_0000);
        assert_eq!(channel.next_dest, 0x0300_0000);
        assert_eq!(channel.next_count, 0x10);

        // Rewriting control while enabled is not a new edge.
        channel.next_count = 0;
        assert!(!channel.write_control(0x8000));
        assert_eq!(channel.next_count, 0);
    }

    #[test]
    fn zero_count_means_channel_maximum() {
        let mut dma = Dma::default();
        dma.set_word_count(0, 0);
        dma.set_word_count(3, 0);
        assert_eq!(dma.channels[0].count, 0x4000);
        assert_eq!(dma.channels[3].count, 0x1_0000);
    }

    #[test]
    fn addresses_keep_28_bits() {
        let mut dma = Dma::default();
        dma.set_source(1, 0xF300_1234);
        assert_eq!(dma.channels[1].source, 0x0300_1234);
    }
}
