//! Memory bus connecting the CPU to every backing store.
//!
//! The [`Bus`] is the fabric everything funnels through: CPU fetches, MMIO
//! accesses, DMA transfers, prefetch stalls and cartridge backup traffic. It
//! decodes every access by the high byte of the 32-bit address into one of
//! sixteen region slots, masks the offset per access width and forwards to
//! the owning store.
//!
//! # Memory Map
//!
//! | Address Range         | Slot  | Region                          |
//! |-----------------------|-------|---------------------------------|
//! | `0x0000_0000-3FFF`    | `0x0` | BIOS (with read protection)     |
//! | `0x0200_0000-3FFFF`   | `0x2` | Work RAM (256 KiB, mirrored)    |
//! | `0x0300_0000-7FFF`    | `0x3` | On-chip RAM (32 KiB, mirrored)  |
//! | `0x0400_0000-3FF`     | `0x4` | I/O registers                   |
//! | `0x0500_0000-3FF`     | `0x5` | Palette RAM (mirrored)          |
//! | `0x0600_0000-17FFF`   | `0x6` | VRAM (96 KiB, folded mirror)    |
//! | `0x0700_0000-3FF`     | `0x7` | OAM (mirrored)                  |
//! | `0x0800_0000+`        | `0x8`-`0xD` | Cartridge ROM windows 0-2 |
//! | `0x0D00_0000+`        | `0xD` | EEPROM when the cart carries one|
//! | `0x0E00_0000+`        | `0xE` | SRAM / Flash backup             |
//!
//! Anything else is open bus: reads synthesize the value the CPU last
//! prefetched, writes vanish.
//!
//! # Ordering
//!
//! The model is single threaded and cooperative. A store completes in full -
//! region write, page invalidation, any DMA it triggered - before control
//! returns to the CPU, and subsequent loads observe it immediately.

use tracing::{debug, warn};

use crate::CoreError;
use crate::bitwise::Bits;
use crate::cartridge::Cartridge;
use crate::dma::{ADDRESS_MASK, AddressControl, DMA_CHANNELS, Dma, Timing};
use crate::interrupts::{InterruptControl, Irq};
use crate::io::{self, IoRegisters};
use crate::memory::backup::{Backup, SaveType};
use crate::memory::bios::BiosRegion;
use crate::memory::icache::CachePage;
use crate::memory::ram::RamRegion;
use crate::memory::rom::RomRegion;
use crate::memory::wait::{WaitStates, mul_cycles};
use crate::memory::{
    OAM_SIZE, PALETTE_RAM_SIZE, ROM_MASK, VRAM_SIZE, WORKING_IRAM_PAGE_BITS, WORKING_IRAM_SIZE,
    WORKING_RAM_PAGE_BITS, WORKING_RAM_SIZE, rotate_misaligned,
};
use crate::savegame::{self, SaveStore};
use crate::snapshot::Node;

/// Offset masks applied before a region sees the address.
const LOAD_MASK: u32 = 0x00FF_FFFF;
const STORE16_MASK: u32 = 0x00FF_FFFE;
const STORE32_MASK: u32 = 0x00FF_FFFC;

/// Execution state of the CPU collaborator, mirrored into the bus for
/// open-bus synthesis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CpuState {
    #[default]
    Arm,
    Thumb,
}

impl CpuState {
    #[must_use]
    pub const fn instruction_width(self) -> u32 {
        match self {
            Self::Arm => 4,
            Self::Thumb => 2,
        }
    }
}

/// What a region slot routes to. The backing stores are fields of the bus;
/// installing a cartridge repoints the slots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    #[default]
    Open,
    Bios,
    Ewram,
    Iwram,
    Io,
    Palette,
    Vram,
    Oam,
    Rom,
    Backup,
    Eeprom,
}

pub struct Bus {
    bios: BiosRegion,
    ewram: RamRegion,
    iwram: RamRegion,
    palette: RamRegion,
    vram: RamRegion,
    oam: RamRegion,
    rom: Option<RomRegion>,
    backup: Option<Backup>,
    cartridge: Option<Cartridge>,
    io: IoRegisters,
    pub interrupts: InterruptControl,
    pub dma: Dma,
    wait: WaitStates,
    slots: [Slot; 16],
    cycles: u64,

    /// CPU probe: program counter and state, updated by the CPU collaborator
    /// before it touches the bus. Open-bus reads and BIOS protection need
    /// them.
    current_pc: u32,
    cpu_state: CpuState,
    /// Last opcode fetched while executing inside the BIOS.
    last_bios_opcode: u32,

    /// Save flush staging: `write_pending` has been seen once at a frame
    /// boundary.
    save_armed: bool,
}

impl Default for Bus {
    fn default() -> Self {
        let mut slots = [Slot::Open; 16];
        slots[0x0] = Slot::Bios;
        slots[0x2] = Slot::Ewram;
        slots[0x3] = Slot::Iwram;
        slots[0x4] = Slot::Io;
        slots[0x5] = Slot::Palette;
        slots[0x6] = Slot::Vram;
        slots[0x7] = Slot::Oam;

        Self {
            bios: BiosRegion::default(),
            ewram: RamRegion::with_icache(WORKING_RAM_SIZE, WORKING_RAM_PAGE_BITS),
            iwram: RamRegion::with_icache(WORKING_IRAM_SIZE, WORKING_IRAM_PAGE_BITS),
            palette: RamRegion::new(PALETTE_RAM_SIZE),
            vram: RamRegion::vram(VRAM_SIZE, 0x1_FFFF),
            oam: RamRegion::new(OAM_SIZE),
            rom: None,
            backup: None,
            cartridge: None,
            io: IoRegisters::default(),
            interrupts: InterruptControl::default(),
            dma: Dma::default(),
            wait: WaitStates::default(),
            slots,
            cycles: 0,
            current_pc: 0,
            cpu_state: CpuState::Arm,
            last_bios_opcode: 0,
            save_armed: false,
        }
    }
}

impl Bus {
    #[must_use]
    pub fn new(bios: Vec<u8>) -> Self {
        let mut bus = Self::default();
        bus.bios.replace_data(bios);
        bus
    }

    /// Installs a cartridge image.
    ///
    /// The three ROM windows point at the shared image; the backup named by
    /// the save token lands in the SRAM slot, except EEPROM which answers in
    /// the high half of cartridge window 2.
    ///
    /// # Errors
    ///
    /// An image with a bad header is rejected before any slot changes.
    pub fn load_rom(&mut self, data: Vec<u8>) -> Result<(), CoreError> {
        let cartridge = Cartridge::parse(&data)?;

        for slot in 0x8..=0xD {
            self.slots[slot] = Slot::Rom;
        }
        if cartridge.save_type == SaveType::Eeprom {
            self.slots[0xD] = Slot::Eeprom;
        } else {
            self.slots[0xE] = Slot::Backup;
        }

        self.backup = Some(Backup::for_save_type(cartridge.save_type));
        self.rom = Some(RomRegion::new(data));
        self.cartridge = Some(cartridge);
        Ok(())
    }

    pub fn load_bios(&mut self, data: Vec<u8>) {
        self.bios.replace_data(data);
    }

    #[must_use]
    pub const fn cartridge(&self) -> Option<&Cartridge> {
        self.cartridge.as_ref()
    }

    #[must_use]
    pub const fn rom(&self) -> Option<&RomRegion> {
        self.rom.as_ref()
    }

    #[must_use]
    pub const fn backup(&self) -> Option<&Backup> {
        self.backup.as_ref()
    }

    #[must_use]
    pub const fn waitstates(&self) -> &WaitStates {
        &self.wait
    }

    #[must_use]
    pub fn slot(&self, address: u32) -> Slot {
        self.slots
            .get((address >> 24) as usize)
            .copied()
            .unwrap_or(Slot::Open)
    }

    // --- CPU probe -------------------------------------------------------

    pub const fn set_cpu_probe(&mut self, pc: u32, state: CpuState) {
        self.current_pc = pc;
        self.cpu_state = state;
    }

    pub const fn set_last_bios_opcode(&mut self, opcode: u32) {
        self.last_bios_opcode = opcode;
    }

    const fn bios_protected(&self) -> bool {
        self.current_pc >= 0x0000_4000
    }

    // --- Loads -----------------------------------------------------------

    pub fn load8(&mut self, address: u32) -> i8 {
        self.load_u8(address) as i8
    }

    pub fn load_u8(&mut self, address: u32) -> u8 {
        let offset = address & LOAD_MASK;
        match self.slot(address) {
            Slot::Bios if self.bios_protected() => {
                self.last_bios_opcode.get_byte((address & 3) as u8)
            }
            Slot::Bios => self.bios.load_u8(offset),
            Slot::Ewram => self.ewram.load_u8(offset),
            Slot::Iwram => self.iwram.load_u8(offset),
            Slot::Palette => self.palette.load_u8(offset),
            Slot::Vram => self.vram.load_u8(offset),
            Slot::Oam => self.oam.load_u8(offset),
            Slot::Io => self.io_load16(offset & !1).get_byte((offset & 1) as u8),
            Slot::Rom => match &self.rom {
                Some(rom) => rom.load_u8(address & ROM_MASK),
                None => (self.open_bus_word(address) >> ((address & 3) * 8)) as u8,
            },
            Slot::Backup | Slot::Eeprom => match &mut self.backup {
                Some(backup) => backup.load_u8(offset),
                None => (self.open_bus_word(address) >> ((address & 3) * 8)) as u8,
            },
            Slot::Open => (self.open_bus_word(address) >> ((address & 3) * 8)) as u8,
        }
    }

    pub fn load16(&mut self, address: u32) -> i16 {
        self.load_u16(address) as i16
    }

    pub fn load_u16(&mut self, address: u32) -> u16 {
        let offset = address & LOAD_MASK;
        match self.slot(address) {
            Slot::Bios if self.bios_protected() => {
                (self.last_bios_opcode >> ((address & 2) * 8)) as u16
            }
            Slot::Bios => self.bios.load_u16(offset),
            Slot::Ewram => self.ewram.load_u16(offset),
            Slot::Iwram => self.iwram.load_u16(offset),
            Slot::Palette => self.palette.load_u16(offset),
            Slot::Vram => self.vram.load_u16(offset),
            Slot::Oam => self.oam.load_u16(offset),
            Slot::Io => self.io_load16(offset),
            Slot::Rom => match &self.rom {
                Some(rom) => rom.load_u16(address & ROM_MASK),
                None => (self.open_bus_word(address) >> ((address & 2) * 8)) as u16,
            },
            Slot::Backup | Slot::Eeprom => match &mut self.backup {
                Some(backup) => backup.load_u16(offset),
                None => (self.open_bus_word(address) >> ((address & 2) * 8)) as u16,
            },
            Slot::Open => (self.open_bus_word(address) >> ((address & 2) * 8)) as u16,
        }
    }

    pub fn load32(&mut self, address: u32) -> u32 {
        let offset = address & LOAD_MASK;
        match self.slot(address) {
            Slot::Bios if self.bios_protected() => {
                rotate_misaligned(self.last_bios_opcode, address)
            }
            Slot::Bios => self.bios.load32(offset),
            Slot::Ewram => self.ewram.load32(offset),
            Slot::Iwram => self.iwram.load32(offset),
            Slot::Palette => self.palette.load32(offset),
            Slot::Vram => self.vram.load32(offset),
            Slot::Oam => self.oam.load32(offset),
            Slot::Io => {
                let aligned = offset & !3;
                let word = u32::from(self.io_load16(aligned))
                    | u32::from(self.io_load16(aligned + 2)) << 16;
                rotate_misaligned(word, address)
            }
            Slot::Rom => match &self.rom {
                Some(rom) => rom.load32(address & ROM_MASK),
                None => rotate_misaligned(self.open_bus_word(address), address),
            },
            Slot::Backup | Slot::Eeprom => match &mut self.backup {
                Some(backup) => backup.load32(offset),
                None => rotate_misaligned(self.open_bus_word(address), address),
            },
            Slot::Open => rotate_misaligned(self.open_bus_word(address), address),
        }
    }

    /// What an unmapped read sees: the instruction word the CPU prefetched
    /// last, which for this pipeline is the one right before the current
    /// program counter. Thumb halfwords are mirrored into both halves.
    fn open_bus_word(&mut self, address: u32) -> u32 {
        debug!("open-bus read at 0x{address:08X}");
        let fetch = self
            .current_pc
            .wrapping_sub(self.cpu_state.instruction_width());
        // A PC in unmapped or MMIO space would recurse right back here.
        if matches!(self.slot(fetch), Slot::Open | Slot::Io) {
            return 0;
        }
        match self.cpu_state {
            CpuState::Arm => self.load32(fetch),
            CpuState::Thumb => {
                let half = u32::from(self.load_u16(fetch));
                half << 16 | half
            }
        }
    }

    // --- Stores ----------------------------------------------------------

    pub fn store8(&mut self, address: u32, value: u8) {
        let offset = address & LOAD_MASK;
        match self.slot(address) {
            Slot::Bios => debug!("discarding byte write to BIOS at 0x{address:08X}"),
            Slot::Ewram => {
                self.ewram.store8(offset, value);
                self.ewram.invalidate_page(offset);
            }
            Slot::Iwram => {
                self.iwram.store8(offset, value);
                self.iwram.invalidate_page(offset);
            }
            // Byte writes to the 16-bit video memories land as the byte
            // duplicated into the covering halfword; OAM drops them.
            Slot::Palette => {
                self.palette
                    .store16(offset & !1, u16::from_le_bytes([value, value]));
            }
            Slot::Vram => {
                self.vram
                    .store16(offset & !1, u16::from_le_bytes([value, value]));
            }
            Slot::Oam => debug!("OAM byte write ignored"),
            Slot::Io => self.io_store8(offset, value),
            Slot::Rom => {
                if let Some(rom) = &self.rom {
                    rom.store8(address & ROM_MASK, value);
                }
            }
            Slot::Backup | Slot::Eeprom => {
                if let Some(backup) = &mut self.backup {
                    backup.store8(offset, value);
                }
            }
            Slot::Open => debug!("discarding write to unmapped 0x{address:08X}"),
        }
    }

    pub fn store16(&mut self, address: u32, value: u16) {
        let offset = address & STORE16_MASK;
        match self.slot(address) {
            Slot::Bios => debug!("discarding halfword write to BIOS at 0x{address:08X}"),
            Slot::Ewram => {
                self.ewram.store16(offset, value);
                self.ewram.invalidate_page(offset);
            }
            Slot::Iwram => {
                self.iwram.store16(offset, value);
                self.iwram.invalidate_page(offset);
            }
            Slot::Palette => self.palette.store16(offset, value),
            Slot::Vram => self.vram.store16(offset, value),
            Slot::Oam => self.oam.store16(offset, value),
            Slot::Io => self.io_store16(offset, value),
            Slot::Rom => {
                if let Some(rom) = &mut self.rom {
                    rom.store16(address & ROM_MASK, value);
                }
            }
            Slot::Backup | Slot::Eeprom => {
                if let Some(backup) = &mut self.backup {
                    backup.store16(offset, value);
                }
            }
            Slot::Open => debug!("discarding write to unmapped 0x{address:08X}"),
        }
    }

    pub fn store32(&mut self, address: u32, value: u32) {
        let offset = address & STORE32_MASK;
        match self.slot(address) {
            Slot::Bios => debug!("discarding word write to BIOS at 0x{address:08X}"),
            Slot::Ewram => {
                self.ewram.store32(offset, value);
                self.ewram.invalidate_page(offset);
                self.ewram.invalidate_page(offset + 2);
            }
            Slot::Iwram => {
                self.iwram.store32(offset, value);
                self.iwram.invalidate_page(offset);
                self.iwram.invalidate_page(offset + 2);
            }
            Slot::Palette => self.palette.store32(offset, value),
            Slot::Vram => self.vram.store32(offset, value),
            Slot::Oam => self.oam.store32(offset, value),
            Slot::Io => {
                self.io_store16(offset, (value & 0xFFFF) as u16);
                self.io_store16(offset + 2, (value >> 16) as u16);
            }
            Slot::Rom => {
                if let Some(rom) = &mut self.rom {
                    rom.store32(address & ROM_MASK, value);
                }
            }
            Slot::Backup | Slot::Eeprom => {
                if let Some(backup) = &mut self.backup {
                    backup.store32(offset, value);
                }
            }
            Slot::Open => debug!("discarding write to unmapped 0x{address:08X}"),
        }
    }

    // --- I/O register block ----------------------------------------------

    fn io_load16(&mut self, offset: u32) -> u16 {
        if offset >= io::IO_SIZE {
            warn!("read of unknown MMIO register 0x{offset:06X}");
            let address = 0x0400_0000 | offset;
            return (self.open_bus_word(address) >> ((address & 2) * 8)) as u16;
        }
        match offset & !1 {
            io::IE => self.interrupts.enabled,
            io::IF => self.interrupts.requested,
            io::IME => self.interrupts.master_enable,
            io::WAITCNT => self.wait.waitcnt(),
            io::POSTFLG => u16::from(self.interrupts.post_boot_flag),
            _ => self.io.read16(offset),
        }
    }

    fn io_store8(&mut self, offset: u32, value: u8) {
        match offset {
            io::POSTFLG => self.interrupts.post_boot_flag = value,
            io::HALTCNT => {
                debug!("halt requested (0x{value:02X})");
                self.interrupts.halted = true;
            }
            _ => {
                // Promote to a halfword write so register side effects fire.
                let mut halfword = self.io.read16(offset & !1);
                halfword.set_byte((offset & 1) as u8, value);
                self.io_store16(offset & !1, halfword);
            }
        }
    }

    fn io_store16(&mut self, offset: u32, value: u16) {
        if offset >= io::IO_SIZE {
            warn!("discarding write to unknown MMIO register 0x{offset:06X}");
            return;
        }
        self.io.write16(offset, value);

        match offset & !1 {
            io::DMA_BASE..io::DMA_END => self.dma_register_write(offset & !1, value),
            io::WAITCNT => self.wait.adjust_timings(value),
            io::IE => self.interrupts.enabled = value & 0x3FFF,
            io::IF => self.interrupts.acknowledge(value),
            io::IME => self.interrupts.master_enable = value & 1,
            io::POSTFLG => {
                self.interrupts.post_boot_flag = (value & 0xFF) as u8;
                self.interrupts.halted = true;
            }
            _ => {
                // Collaborator registers (video, sound, timers, serial,
                // keypad) keep their written value; semantics live outside
                // the core.
                debug!("stored collaborator register 0x{offset:03X} = 0x{value:04X}");
            }
        }
    }

    // --- DMA -------------------------------------------------------------

    fn dma_register_write(&mut self, offset: u32, value: u16) {
        let channel = ((offset - io::DMA_BASE) / io::DMA_CHANNEL_SPAN) as usize;
        let base = io::DMA_BASE + channel as u32 * io::DMA_CHANNEL_SPAN;
        match offset - base {
            0 | 2 => {
                let word =
                    u32::from(self.io.read16(base)) | u32::from(self.io.read16(base + 2)) << 16;
                self.dma.set_source(channel, word);
            }
            4 | 6 => {
                let word = u32::from(self.io.read16(base + 4))
                    | u32::from(self.io.read16(base + 6)) << 16;
                self.dma.set_dest(channel, word);
            }
            8 => self.dma.set_word_count(channel, value),
            _ => {
                if self.dma.channels[channel].write_control(value) {
                    self.schedule_dma(channel);
                }
            }
        }
    }

    fn schedule_dma(&mut self, channel: usize) {
        match self.dma.channels[channel].timing {
            Timing::Immediate => self.service_dma(channel),
            // Picked up by the video collaborator's blank callbacks.
            Timing::VBlank | Timing::HBlank => {}
            Timing::Custom => match channel {
                1 | 2 => {
                    debug!("DMA{channel} handed to the audio FIFO");
                    self.dma.fifo_requests.push(channel);
                }
                3 => warn!("video capture DMA is not implemented"),
                _ => warn!("custom timing is invalid on DMA channel 0"),
            },
        }
    }

    /// Runs every enabled vblank-timed channel; called by the video
    /// collaborator before the CPU resumes after the blank.
    pub fn run_vblank_dmas(&mut self) {
        self.run_timed_dmas(Timing::VBlank);
    }

    /// Runs every enabled hblank-timed channel.
    pub fn run_hblank_dmas(&mut self) {
        self.run_timed_dmas(Timing::HBlank);
    }

    fn run_timed_dmas(&mut self, timing: Timing) {
        for channel in 0..DMA_CHANNELS {
            if self.dma.channels[channel].enable && self.dma.channels[channel].timing == timing {
                self.service_dma(channel);
            }
        }
    }

    /// Audio FIFO transfers queued by custom-timing writes on channels 1/2;
    /// the audio collaborator drains this.
    pub fn take_fifo_requests(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.dma.fifo_requests)
    }

    fn service_dma(&mut self, channel: usize) {
        let chan = self.dma.channels[channel].clone();
        if !chan.enable {
            return;
        }

        let width = chan.width;
        let count = chan.next_count;
        let src_step = chan.src_control.step() * width as i32;
        let dst_step = chan.dst_control.step() * width as i32;
        let source = chan.next_source & ADDRESS_MASK & !(width - 1);
        let dest = chan.next_dest & ADDRESS_MASK & !(width - 1);

        let src_slot = self.slot(source);
        let dst_slot = self.slot(dest);

        if src_slot == Slot::Open || dst_slot == Slot::Open {
            warn!(
                "DMA{channel} touches unmapped memory (0x{source:08X} -> 0x{dest:08X}), \
                 transfer skipped"
            );
        } else {
            if channel == 3
                && (src_slot == Slot::Eeprom || dst_slot == Slot::Eeprom)
                && let Some(Backup::Eeprom(eeprom)) = &mut self.backup
            {
                eeprom.begin_dma(count);
            }
            self.invalidate_dma_destination(dst_slot, dest, count, width, dst_step);
            self.dma_copy(source, dest, count, width, src_step, dst_step, src_slot, dst_slot);
        }

        let chan_state = &mut self.dma.channels[channel];
        chan_state.next_source = source.wrapping_add_signed(src_step.wrapping_mul(count as i32));
        chan_state.next_dest = dest.wrapping_add_signed(dst_step.wrapping_mul(count as i32));
        chan_state.next_count = 0;

        if chan.do_irq {
            let (src_region, dst_region) = ((source >> 24) as usize, (dest >> 24) as usize);
            let (nonseq, seq) = if width == 4 {
                (
                    self.wait.nonseq32(src_region) + self.wait.nonseq32(dst_region),
                    self.wait.seq32(src_region) + self.wait.seq32(dst_region),
                )
            } else {
                (
                    self.wait.nonseq16(src_region) + self.wait.nonseq16(dst_region),
                    self.wait.seq16(src_region) + self.wait.seq16(dst_region),
                )
            };
            let transfer_cycles = 2 + nonseq + count.saturating_sub(1) * seq;
            self.dma.channels[channel].next_irq = Some(self.cycles + u64::from(transfer_cycles));
        }

        if chan.repeat {
            let chan_state = &mut self.dma.channels[channel];
            chan_state.next_count = chan.count;
            if chan.dst_control == AddressControl::IncrementReload {
                chan_state.next_dest = chan.dest;
            }
            if chan.timing == Timing::Immediate {
                // Nothing retriggers an immediate repeat; leave it armed but
                // do not spin on it.
                debug!("DMA{channel} immediate repeat left armed");
            }
        } else {
            self.dma.channels[channel].enable = false;
            let control = io::DMA_BASE + channel as u32 * io::DMA_CHANNEL_SPAN + 10;
            let raw = self.io.read16(control);
            self.io.write16(control, raw & 0x7FFF);
        }
    }

    /// Drops every instruction-cache page the transfer is about to overwrite.
    fn invalidate_dma_destination(
        &mut self,
        dst_slot: Slot,
        dest: u32,
        count: u32,
        width: u32,
        dst_step: i32,
    ) {
        let region = match dst_slot {
            Slot::Ewram => &mut self.ewram,
            Slot::Iwram => &mut self.iwram,
            _ => return,
        };
        if count == 0 {
            return;
        }
        let bytes = count * width;
        let start = if dst_step < 0 {
            dest.wrapping_sub(bytes - width)
        } else {
            dest
        };
        let span = if dst_step == 0 { width } else { bytes };

        let page = 1 << WORKING_IRAM_PAGE_BITS;
        let mut address = start;
        while address < start + span {
            region.invalidate_page(address & LOAD_MASK);
            address += page;
        }
        region.invalidate_page((start + span - 1) & LOAD_MASK);
    }

    #[allow(clippy::too_many_arguments)]
    fn dma_copy(
        &mut self,
        source: u32,
        dest: u32,
        count: u32,
        width: u32,
        src_step: i32,
        dst_step: i32,
        src_slot: Slot,
        dst_slot: Slot,
    ) {
        let both_forward = src_step == width as i32 && dst_step == width as i32;
        let bytes = count * width;

        if both_forward && Self::is_plain_ram(src_slot) && Self::is_plain_ram(dst_slot) {
            // Both endpoints are plain RAM: move bytes buffer to buffer and
            // skip per-element dispatch entirely.
            let scratch: Vec<u8> = {
                let (data, mask) = self.ram_view(src_slot);
                (0..bytes)
                    .map(|i| data[(source.wrapping_add(i) & mask) as usize])
                    .collect()
            };
            let (data, mask) = self.ram_view_mut(dst_slot);
            for (i, byte) in scratch.iter().enumerate() {
                data[(dest.wrapping_add(i as u32) & mask) as usize] = *byte;
            }
        } else if both_forward && Self::is_plain_ram(src_slot) {
            // Source side reads straight from the buffer, destination goes
            // through the region API so MMIO and backup semantics hold.
            for i in (0..bytes).step_by(width as usize) {
                let (data, mask) = self.ram_view(src_slot);
                let at = |n: u32| data[(source.wrapping_add(i + n) & mask) as usize];
                if width == 4 {
                    let value =
                        u32::from_le_bytes([at(0), at(1), at(2), at(3)]);
                    self.store32(dest.wrapping_add(i), value);
                } else {
                    let value = u16::from_le_bytes([at(0), at(1)]);
                    self.store16(dest.wrapping_add(i), value);
                }
            }
        } else {
            let mut src = source;
            let mut dst = dest;
            for _ in 0..count {
                if width == 4 {
                    let value = self.load32(src);
                    self.store32(dst, value);
                } else {
                    let value = self.load_u16(src);
                    self.store16(dst, value);
                }
                src = src.wrapping_add_signed(src_step);
                dst = dst.wrapping_add_signed(dst_step);
            }
        }
    }

    const fn is_plain_ram(slot: Slot) -> bool {
        matches!(slot, Slot::Ewram | Slot::Iwram)
    }

    fn ram_view(&self, slot: Slot) -> (&[u8], u32) {
        match slot {
            Slot::Ewram => (self.ewram.data(), self.ewram.mask()),
            Slot::Iwram => (self.iwram.data(), self.iwram.mask()),
            _ => unreachable!("ram_view called for a non-RAM slot"),
        }
    }

    fn ram_view_mut(&mut self, slot: Slot) -> (&mut [u8], u32) {
        match slot {
            Slot::Ewram => {
                let mask = self.ewram.mask();
                (self.ewram.data_mut(), mask)
            }
            Slot::Iwram => {
                let mask = self.iwram.mask();
                (self.iwram.data_mut(), mask)
            }
            _ => unreachable!("ram_view_mut called for a non-RAM slot"),
        }
    }

    /// Latches DMA completion interrupts whose cycle stamp has passed. The
    /// interrupt collaborator calls this every step.
    pub fn poll_dma_irqs(&mut self) {
        for channel in 0..DMA_CHANNELS {
            if let Some(stamp) = self.dma.channels[channel].next_irq
                && self.cycles >= stamp
            {
                self.dma.channels[channel].next_irq = None;
                self.interrupts.request(Irq::Dma(channel));
            }
        }
    }

    // --- Instruction cache -----------------------------------------------

    /// Returns the decoded-instruction page covering `address`.
    ///
    /// # Errors
    ///
    /// Only RAM, ROM and BIOS cache instructions; asking for a page in any
    /// other region is a caller bug surfaced as
    /// [`CoreError::IcacheUnavailable`].
    pub fn access_page(&mut self, address: u32) -> Result<&mut CachePage, CoreError> {
        let unavailable = CoreError::IcacheUnavailable {
            region: (address >> 24) as usize,
        };
        let offset = address & LOAD_MASK;
        match self.slot(address) {
            Slot::Ewram => self.ewram.access_page(offset).ok_or(unavailable),
            Slot::Iwram => self.iwram.access_page(offset).ok_or(unavailable),
            Slot::Bios => Ok(self.bios.access_page(offset)),
            Slot::Rom => match &mut self.rom {
                Some(rom) => Ok(rom.access_page(address & ROM_MASK)),
                None => Err(unavailable),
            },
            _ => Err(unavailable),
        }
    }

    // --- Access timing ---------------------------------------------------

    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn wait(&mut self, address: u32) {
        self.cycles += u64::from(1 + self.wait.nonseq16((address >> 24) as usize));
    }

    pub fn wait_seq(&mut self, address: u32) {
        self.cycles += u64::from(1 + self.wait.seq16((address >> 24) as usize));
    }

    pub fn wait32(&mut self, address: u32) {
        self.cycles += u64::from(1 + self.wait.nonseq32((address >> 24) as usize));
    }

    pub fn wait_seq32(&mut self, address: u32) {
        self.cycles += u64::from(1 + self.wait.seq32((address >> 24) as usize));
    }

    pub fn wait_prefetch(&mut self, address: u32) {
        self.cycles += u64::from(1 + self.wait.prefetch16((address >> 24) as usize));
    }

    pub fn wait_prefetch32(&mut self, address: u32) {
        self.cycles += u64::from(1 + self.wait.prefetch32((address >> 24) as usize));
    }

    /// Multiply timing, 1-4 internal cycles by multiplier magnitude.
    pub fn wait_mul(&mut self, rs: u32) {
        self.cycles += mul_cycles(rs);
    }

    /// A block transfer: one non-sequential access then `count - 1`
    /// sequential ones.
    pub fn wait_multi32(&mut self, address: u32, count: u32) {
        let region = (address >> 24) as usize;
        self.cycles += u64::from(1 + self.wait.nonseq32(region));
        self.cycles += u64::from((1 + self.wait.seq32(region)) * count.saturating_sub(1));
    }

    // --- Snapshots -------------------------------------------------------

    /// Freezes the core-owned state: both RAM buffers and the raw I/O block.
    #[must_use]
    pub fn freeze(&self) -> Node {
        Node::Struct(vec![
            ("ram".into(), Node::Blob(self.ewram.data().to_vec())),
            ("iram".into(), Node::Blob(self.iwram.data().to_vec())),
            ("io".into(), Node::Blob(self.io.to_bytes())),
        ])
    }

    /// Restores a [`freeze`](Self::freeze) snapshot.
    ///
    /// # Panics
    ///
    /// A snapshot of the wrong shape is a host programming error. Shape is
    /// validated before any state changes, so a panic leaves the pre-restore
    /// state intact.
    pub fn defrost(&mut self, snapshot: &Node) {
        let ram = Self::expect_blob(snapshot, "ram", WORKING_RAM_SIZE);
        let iram = Self::expect_blob(snapshot, "iram", WORKING_IRAM_SIZE);
        let io_block = Self::expect_blob(snapshot, "io", io::IO_SIZE as usize);

        self.ewram.replace_data(ram, 0);
        self.iwram.replace_data(iram, 0);
        self.io.load_bytes(io_block);

        // Re-derive the state the bus keeps decoded from its registers.
        self.wait.adjust_timings(self.io.read16(io::WAITCNT));
        self.interrupts.enabled = self.io.read16(io::IE) & 0x3FFF;
        self.interrupts.master_enable = self.io.read16(io::IME) & 1;
    }

    fn expect_blob<'a>(snapshot: &'a Node, key: &str, len: usize) -> &'a [u8] {
        match snapshot.get(key) {
            Some(Node::Blob(bytes)) if bytes.len() == len => bytes,
            Some(Node::Blob(bytes)) => panic!(
                "snapshot blob '{key}' has {} bytes, expected {len}",
                bytes.len()
            ),
            _ => panic!("snapshot is missing blob '{key}'"),
        }
    }

    /// Snapshot wire form.
    #[must_use]
    pub fn snapshot_bytes(&self) -> Vec<u8> {
        self.freeze().to_bytes()
    }

    /// Restores a snapshot from its wire form.
    ///
    /// # Errors
    ///
    /// A malformed stream aborts the restore with the pre-restore state
    /// intact.
    pub fn restore_snapshot(&mut self, bytes: &[u8]) -> Result<(), CoreError> {
        let snapshot = Node::from_bytes(bytes)?;
        self.defrost(&snapshot);
        Ok(())
    }

    // --- Save data -------------------------------------------------------

    /// Frame-boundary save flush: a backup whose `write_pending` flag stays
    /// set across one full frame is pushed to the host store as base64.
    pub fn frame_boundary(&mut self, store: &mut dyn SaveStore) {
        let pending = self.backup.as_ref().is_some_and(Backup::write_pending);
        if !pending {
            self.save_armed = false;
            return;
        }
        if !self.save_armed {
            self.save_armed = true;
            return;
        }

        self.save_armed = false;
        let game_code = self
            .cartridge
            .as_ref()
            .map(|cartridge| cartridge.game_code.clone())
            .unwrap_or_default();
        if let Some(backup) = &mut self.backup {
            store.save(&game_code, &savegame::encode(backup.view()));
            backup.clear_write_pending();
        }
    }

    /// Pulls the save for the loaded cartridge from the host store into the
    /// backup.
    pub fn load_save(&mut self, store: &mut dyn SaveStore) {
        let Some(cartridge) = &self.cartridge else {
            return;
        };
        let Some(payload) = store.load(&cartridge.game_code) else {
            return;
        };
        match savegame::decode(&payload) {
            Some(bytes) => {
                if let Some(backup) = &mut self.backup {
                    backup.replace_data(&bytes);
                }
            }
            None => warn!("discarding corrupt save payload for {}", cartridge.game_code),
        }
    }
}
