#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
mod bitwise;

#[allow(clippy::missing_panics_doc)]
#[allow(clippy::cast_lossless)]
#[allow(clippy::unreadable_literal)]
pub mod bus;

pub mod cartridge;
pub mod dma;
pub mod interrupts;
pub mod io;
pub mod memory;
pub mod savegame;
pub mod snapshot;

use thiserror::Error;

/// Host-visible failures. Guest misbehavior never lands here: bad stores and
/// unmapped reads degrade to logged open-bus semantics instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The image is too short for a header or its fixed byte is wrong.
    #[error("cartridge header is invalid")]
    InvalidHeader,

    /// An instruction page was requested from a region that cannot hold
    /// code.
    #[error("region 0x{region:X} has no instruction cache")]
    IcacheUnavailable { region: usize },

    #[error(transparent)]
    Snapshot(#[from] snapshot::SnapshotError),
}
