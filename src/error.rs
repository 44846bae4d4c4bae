use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
    #[error("no image files given")]
    NoImages,

    #[error("failed to load image {path:?}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("executed reserved opcode {opcode:#06x} at address {address:#06x}")]
    ReservedOpcode { opcode: u16, address: u16 },

    #[error("unknown trap vector {vector:#04x} at address {address:#06x}")]
    UnknownTrap { vector: u8, address: u16 },

    #[error("terminal I/O error: {0}")]
    Terminal(#[source] std::io::Error),
}
