use serde::{Deserialize, Serialize};

pub const SRAM_SIZE: usize = 0x8000;

/// Battery-backed SRAM, the default backup when a cartridge declares nothing
/// else. Byte granular, no command protocol.
#[derive(Serialize, Deserialize)]
pub struct Sram {
    data: Vec<u8>,
    pub write_pending: bool,
}

impl Default for Sram {
    fn default() -> Self {
        Self::new()
    }
}

impl Sram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: vec![0; SRAM_SIZE],
            write_pending: false,
        }
    }

    #[must_use]
    pub fn load_u8(&self, offset: u32) -> u8 {
        self.data[(offset as usize) & (SRAM_SIZE - 1)]
    }

    pub fn store8(&mut self, offset: u32, value: u8) {
        self.data[(offset as usize) & (SRAM_SIZE - 1)] = value;
        self.write_pending = true;
    }

    #[must_use]
    pub fn view(&self) -> &[u8] {
        &self.data
    }

    pub fn replace_data(&mut self, data: &[u8]) {
        let len = data.len().min(SRAM_SIZE);
        self.data[..len].copy_from_slice(&data[..len]);
    }
}
