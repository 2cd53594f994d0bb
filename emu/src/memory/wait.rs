use serde_with::serde_as;

use crate::bitwise::Bits;
use crate::memory::{
    REGION_CART0, REGION_CART1, REGION_CART2, REGION_SRAM, REGION_WORKING_RAM,
};

/// Cartridge non-sequential wait states, indexed by the 2-bit WAITCNT field.
pub const ROM_WS: [u32; 4] = [4, 3, 2, 8];

/// Cartridge sequential wait states, indexed by window and the 1-bit select.
pub const ROM_WS_SEQ: [[u32; 2]; 3] = [[2, 1], [4, 1], [8, 1]];

const LUT_SIZE: usize = 0x100;

/// Per-region access penalty tables. The CPU charges `1 + table[region]`
/// cycles for every bus access; the six variants cover width, sequentiality
/// and the cartridge prefetch buffer. All six are recomputed in full whenever
/// the game reprograms WAITCNT.
#[serde_as]
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct WaitStates {
    #[serde_as(as = "Box<[_; 256]>")]
    nonseq16: Box<[u32; LUT_SIZE]>,
    #[serde_as(as = "Box<[_; 256]>")]
    nonseq32: Box<[u32; LUT_SIZE]>,
    #[serde_as(as = "Box<[_; 256]>")]
    seq16: Box<[u32; LUT_SIZE]>,
    #[serde_as(as = "Box<[_; 256]>")]
    seq32: Box<[u32; LUT_SIZE]>,
    #[serde_as(as = "Box<[_; 256]>")]
    prefetch16: Box<[u32; LUT_SIZE]>,
    #[serde_as(as = "Box<[_; 256]>")]
    prefetch32: Box<[u32; LUT_SIZE]>,
    waitcnt: u16,
}

impl Default for WaitStates {
    fn default() -> Self {
        let mut waits = Self {
            nonseq16: Box::new([0; LUT_SIZE]),
            nonseq32: Box::new([0; LUT_SIZE]),
            seq16: Box::new([0; LUT_SIZE]),
            seq32: Box::new([0; LUT_SIZE]),
            prefetch16: Box::new([0; LUT_SIZE]),
            prefetch32: Box::new([0; LUT_SIZE]),
            waitcnt: 0,
        };

        // Work RAM sits behind a 16-bit bus with two wait states; a word
        // access is two halfword accesses back to back.
        waits.nonseq16[REGION_WORKING_RAM] = 2;
        waits.nonseq32[REGION_WORKING_RAM] = 5;
        waits.seq16[REGION_WORKING_RAM] = 2;
        waits.seq32[REGION_WORKING_RAM] = 5;

        // Palette RAM and VRAM are 16-bit as well but waitless; only word
        // accesses pay the second fetch.
        for region in [0x5, 0x6] {
            waits.nonseq32[region] = 1;
            waits.seq32[region] = 1;
        }

        waits.adjust_timings(0);
        waits
    }
}

impl WaitStates {
    /// Decodes a WAITCNT value and rebuilds every vector.
    ///
    /// | bits  | field                        |
    /// |-------|------------------------------|
    /// | 0-1   | SRAM wait control            |
    /// | 2-3,4 | window 0 nonseq / seq select |
    /// | 5-6,7 | window 1 nonseq / seq select |
    /// | 8-9,10| window 2 nonseq / seq select |
    /// | 14    | prefetch buffer enable       |
    pub fn adjust_timings(&mut self, word: u16) {
        self.waitcnt = word;

        let sram = ROM_WS[(word & 3) as usize];
        self.nonseq16[REGION_SRAM] = sram;
        self.nonseq32[REGION_SRAM] = sram;
        self.seq16[REGION_SRAM] = sram;
        self.seq32[REGION_SRAM] = sram;
        self.prefetch16[REGION_SRAM] = sram;
        self.prefetch32[REGION_SRAM] = sram;

        let prefetch = word.get_bit(14);
        let windows = [
            (REGION_CART0, word.get_bits(2..=3), word.get_bit(4)),
            (REGION_CART1, word.get_bits(5..=6), word.get_bit(7)),
            (REGION_CART2, word.get_bits(8..=9), word.get_bit(10)),
        ];

        for (window, (base, nonseq_select, seq_select)) in windows.into_iter().enumerate() {
            let nonseq = ROM_WS[nonseq_select as usize];
            let seq = ROM_WS_SEQ[window][usize::from(seq_select)];

            // Each wait-state window spans two adjacent region slots.
            for region in [base, base + 1] {
                self.nonseq16[region] = nonseq;
                self.seq16[region] = seq;
                // A word is one non-sequential halfword followed by one
                // sequential halfword on the 16-bit cartridge bus.
                self.nonseq32[region] = nonseq + 1 + seq;
                self.seq32[region] = 2 * seq + 1;
                self.prefetch16[region] = if prefetch { 0 } else { seq };
                self.prefetch32[region] = if prefetch { 0 } else { 2 * seq + 1 };
            }
        }
    }

    #[must_use]
    pub const fn waitcnt(&self) -> u16 {
        self.waitcnt
    }

    #[must_use]
    pub fn nonseq16(&self, region: usize) -> u32 {
        self.nonseq16[region & 0xFF]
    }

    #[must_use]
    pub fn nonseq32(&self, region: usize) -> u32 {
        self.nonseq32[region & 0xFF]
    }

    #[must_use]
    pub fn seq16(&self, region: usize) -> u32 {
        self.seq16[region & 0xFF]
    }

    #[must_use]
    pub fn seq32(&self, region: usize) -> u32 {
        self.seq32[region & 0xFF]
    }

    #[must_use]
    pub fn prefetch16(&self, region: usize) -> u32 {
        self.prefetch16[region & 0xFF]
    }

    #[must_use]
    pub fn prefetch32(&self, region: usize) -> u32 {
        self.prefetch32[region & 0xFF]
    }
}

/// Multiply timing: 1 to 4 internal cycles depending on how many significant
/// bytes the multiplier has, counting a sign-extension byte as insignificant.
#[must_use]
pub const fn mul_cycles(rs: u32) -> u64 {
    if rs & 0xFFFF_FF00 == 0 || rs & 0xFFFF_FF00 == 0xFFFF_FF00 {
        1
    } else if rs & 0xFFFF_0000 == 0 || rs & 0xFFFF_0000 == 0xFFFF_0000 {
        2
    } else if rs & 0xFF00_0000 == 0 || rs & 0xFF00_0000 == 0xFF00_0000 {
        3
    } else {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reset_timings_are_the_slowest_rom_setting() {
        let waits = WaitStates::default();

        assert_eq!(waits.nonseq16(0x8), 4);
        assert_eq!(waits.seq16(0x8), 2);
        assert_eq!(waits.seq16(0xA), 4);
        assert_eq!(waits.seq16(0xC), 8);
        assert_eq!(waits.nonseq16(0xE), 4);
        // Prefetch disabled: the prefetch vectors match the sequential ones.
        assert_eq!(waits.prefetch16(0x8), waits.seq16(0x8));
        assert_eq!(waits.prefetch32(0xC), waits.seq32(0xC));
    }

    #[test]
    fn work_ram_timings() {
        let waits = WaitStates::default();
        assert_eq!(waits.nonseq16(0x2), 2);
        assert_eq!(waits.nonseq32(0x2), 5);
        assert_eq!(waits.nonseq32(0x5), 1);
        assert_eq!(waits.nonseq16(0x7), 0);
    }

    #[test]
    fn waitcnt_recompute() {
        let mut waits = WaitStates::default();
        // prefetch=1, ws0 nonseq=1 -> 3 waits, ws0 seq=1 -> 1 wait.
        waits.adjust_timings(0x4014);

        assert_eq!(waits.nonseq16(0x8), 3);
        assert_eq!(waits.nonseq16(0x9), 3);
        assert_eq!(waits.seq16(0x8), 1);
        assert_eq!(waits.nonseq32(0x8), 3 + 1 + 1);
        assert_eq!(waits.seq32(0x8), 2 + 1);
        assert_eq!(waits.prefetch16(0x8), 0);
        assert_eq!(waits.prefetch32(0x8), 0);
    }

    #[test]
    fn prefetch_disable_restores_sequential_penalties() {
        let mut waits = WaitStates::default();
        waits.adjust_timings(0x4014);
        waits.adjust_timings(0x0014);

        for region in [0x8, 0x9, 0xA, 0xB, 0xC, 0xD] {
            assert_eq!(waits.prefetch16(region), waits.seq16(region));
            assert_eq!(waits.prefetch32(region), waits.seq32(region));
        }
    }

    #[test]
    fn sram_wait_control() {
        let mut waits = WaitStates::default();
        waits.adjust_timings(0b11);
        assert_eq!(waits.nonseq16(0xE), 8);
        assert_eq!(waits.seq32(0xE), 8);
    }

    #[test]
    fn multiply_cycle_counts() {
        assert_eq!(mul_cycles(0), 1);
        assert_eq!(mul_cycles(0x7F), 1);
        assert_eq!(mul_cycles(0xFFFF_FFFF), 1);
        assert_eq!(mul_cycles(0x1234), 2);
        assert_eq!(mul_cycles(0xFFFF_8000), 2);
        assert_eq!(mul_cycles(0x12_3456), 3);
        assert_eq!(mul_cycles(0xFF45_6789), 3);
        assert_eq!(mul_cycles(0x1234_5678), 4);
    }
}
