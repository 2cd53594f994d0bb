//! Save-data persistence at the host boundary.
//!
//! The core never touches the filesystem: the host supplies a tiny key/value
//! [`SaveStore`] keyed by game code, and the backup contents travel as
//! base64. The bus flushes once the backup's `write_pending` flag has been
//! observed stable across one full frame, so a game hammering its save chip
//! does not trigger a store per write.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

/// Host-side persistence surface.
pub trait SaveStore {
    /// Persists the base64 save payload under the game code.
    fn save(&mut self, game_code: &str, data: &str);

    /// Returns the base64 payload previously stored for the game code.
    fn load(&mut self, game_code: &str) -> Option<String>;
}

/// Wire form of a save blob.
#[must_use]
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes a save blob; `None` when the payload is not valid base64.
#[must_use]
pub fn decode(data: &str) -> Option<Vec<u8>> {
    STANDARD.decode(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::Rng;

    #[test]
    fn roundtrip_is_identity_on_any_length() {
        let mut rng = rand::rng();
        for len in [0, 1, 2, 3, 57, 0x8000] {
            let bytes: Vec<u8> = (0..len).map(|_| rng.random()).collect();
            assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
        }
    }

    #[test]
    fn garbage_payloads_decode_to_none() {
        assert!(decode("not base64 !!!").is_none());
    }
}
