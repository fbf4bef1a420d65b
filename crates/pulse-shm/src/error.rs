//! Shared-memory setup errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShmError {
    #[error("shared region I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shared region has wrong magic (not a pulse region)")]
    BadMagic,

    #[error("shared region version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("shared region file too small: {len} bytes, need {need}")]
    TooSmall { len: usize, need: usize },

    #[error("shared region header carries an invalid {field}: {value}")]
    BadHeaderField { field: &'static str, value: u32 },
}

pub type ShmResult<T> = Result<T, ShmError>;
