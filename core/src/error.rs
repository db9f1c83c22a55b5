use std::io;
use thiserror::Error;

use crate::locker::BatchReport;

#[derive(Debug, Error)]
pub enum LockerError {
    /// Blob is too short or carries the wrong format tag. Raised before any
    /// key derivation happens.
    #[error("Invalid file format: {0}")]
    Format(&'static str),

    /// AEAD tag mismatch or rejected one-time code. Deliberately carries no
    /// detail so a wrong password, tampered data and a bad code look alike.
    #[error("Authentication failed: wrong password, wrong code or corrupted data")]
    Authentication,

    #[error("Folder locker is not configured. Run setup first.")]
    NotConfigured,

    /// Batch stopped between files. Files handled before the signal stay as
    /// they are; `report` holds their outcomes.
    #[error("Operation cancelled after {} file(s)", .report.total())]
    Cancelled { report: BatchReport },

    #[error("Invalid one-time code secret")]
    InvalidSecret,

    #[error("AEAD encryption failed")]
    Encrypt,

    #[error("Cannot determine the application data directory")]
    NoDataDir,

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, LockerError>;
