use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::CoreError;
use crate::memory::backup::SaveType;

/// Offset of the 12-byte uppercase game title.
const TITLE_OFFSET: usize = 0xA0;
/// Offset of the 4-byte game code.
const GAME_CODE_OFFSET: usize = 0xAC;
/// Offset of the 2-byte maker code.
const MAKER_CODE_OFFSET: usize = 0xB0;
/// The byte here must read 0x96 in every valid image.
const FIXED_VALUE_OFFSET: usize = 0xB2;
/// Save-library tokens never appear before the end of the header area.
const SAVE_SCAN_OFFSET: usize = 0xE4;

/// Cartridge metadata pulled out of the ROM header at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cartridge {
    pub title: String,
    pub game_code: String,
    pub maker_code: String,
    pub save_type: SaveType,
}

impl Cartridge {
    /// Parses the header of a raw cartridge image.
    ///
    /// # Errors
    ///
    /// Rejects images too short to carry a header or whose fixed byte at
    /// `0xB2` is not `0x96`.
    pub fn parse(data: &[u8]) -> Result<Self, CoreError> {
        if data.len() <= FIXED_VALUE_OFFSET || data[FIXED_VALUE_OFFSET] != 0x96 {
            return Err(CoreError::InvalidHeader);
        }

        let save_type = detect_save_type(data);
        debug!("cartridge save type: {save_type:?}");

        Ok(Self {
            title: extract_ascii(data, TITLE_OFFSET, 12),
            game_code: extract_ascii(data, GAME_CODE_OFFSET, 4),
            maker_code: extract_ascii(data, MAKER_CODE_OFFSET, 2),
            save_type,
        })
    }
}

/// Header strings are fixed-width uppercase ascii, zero padded.
fn extract_ascii(data: &[u8], offset: usize, len: usize) -> String {
    data[offset..offset + len]
        .iter()
        .take_while(|byte| **byte != 0)
        .map(|byte| char::from(*byte))
        .collect()
}

/// Nothing in the header names the backup part; the save library linked into
/// the game leaves a version token in the image instead, so we scan for one.
fn detect_save_type(data: &[u8]) -> SaveType {
    const TOKENS: [(&str, SaveType); 5] = [
        ("EEPROM_V", SaveType::Eeprom),
        ("SRAM_V", SaveType::Sram),
        ("FLASH1M_V", SaveType::Flash1M),
        ("FLASH512_V", SaveType::Flash512),
        ("FLASH_V", SaveType::Flash512),
    ];

    let haystack = data.get(SAVE_SCAN_OFFSET..).unwrap_or_default();
    for (token, save_type) in TOKENS {
        let token = token.as_bytes();
        if haystack.windows(token.len()).any(|window| window == token) {
            return save_type;
        }
    }

    SaveType::Sram
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn image_with_header() -> Vec<u8> {
        let mut data = vec![0; 0x4000];
        data[TITLE_OFFSET..TITLE_OFFSET + 10].copy_from_slice(b"HELLOWORLD");
        data[GAME_CODE_OFFSET..GAME_CODE_OFFSET + 4].copy_from_slice(b"AXVE");
        data[MAKER_CODE_OFFSET..MAKER_CODE_OFFSET + 2].copy_from_slice(b"01");
        data[FIXED_VALUE_OFFSET] = 0x96;
        data
    }

    #[test]
    fn accepts_a_valid_header() {
        let cart = Cartridge::parse(&image_with_header()).unwrap();
        assert_eq!(cart.title, "HELLOWORLD");
        assert_eq!(cart.game_code, "AXVE");
        assert_eq!(cart.maker_code, "01");
        assert_eq!(cart.save_type, SaveType::Sram);
    }

    #[test]
    fn rejects_a_bad_fixed_value() {
        let mut data = image_with_header();
        data[FIXED_VALUE_OFFSET] = 0x00;
        assert!(Cartridge::parse(&data).is_err());
    }

    #[test]
    fn rejects_a_truncated_image() {
        assert!(Cartridge::parse(&[0; 0x40]).is_err());
    }

    #[test]
    fn save_tokens_select_the_backup() {
        for (token, expected) in [
            (&b"EEPROM_V123"[..], SaveType::Eeprom),
            (b"SRAM_V110", SaveType::Sram),
            (b"FLASH_V121", SaveType::Flash512),
            (b"FLASH512_V131", SaveType::Flash512),
            (b"FLASH1M_V103", SaveType::Flash1M),
        ] {
            let mut data = image_with_header();
            data[0x1000..0x1000 + token.len()].copy_from_slice(token);
            let cart = Cartridge::parse(&data).unwrap();
            assert_eq!(cart.save_type, expected, "token {token:?}");
        }
    }

    #[test]
    fn tokens_before_the_scan_window_are_ignored() {
        let mut data = image_with_header();
        // The maker-code area is inside the header, before 0xE4.
        data[0xB5..0xB5 + 8].copy_from_slice(b"EEPROM_V");
        // 0x96 at 0xB2 untouched; token sits below the scan offset.
        let cart = Cartridge::parse(&data).unwrap();
        assert_eq!(cart.save_type, SaveType::Sram);
    }
}
