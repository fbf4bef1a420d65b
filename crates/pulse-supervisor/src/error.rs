//! Supervisor error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("audio error: {0}")]
    Audio(#[from] pulse_audio::AudioError),

    #[error("shared memory error: {0}")]
    Shm(#[from] pulse_shm::ShmError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("supervisor is already running")]
    AlreadyRunning,

    #[error("supervisor is not running")]
    NotRunning,
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;
