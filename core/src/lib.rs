//! Locker Core Library
//!
//! Per-file folder locking: every file of a folder is compressed and sealed
//! with AES-256-GCM into a `<folder>_ORI` mirror, and unlocking is gated
//! behind a TOTP code. The locker's own secrets live in a separately keyed
//! configuration store.

use std::sync::atomic::{AtomicBool, Ordering};

use log::info;

pub mod codec;
pub mod config;
pub mod error;
pub mod locker;
pub mod otp;
pub mod paths;

// Re-export public types and functions
pub use codec::{decrypt, encrypt, inspect, ContainerHeader, KdfPolicy};
pub use config::{ConfigStore, LockerConfiguration};
pub use error::{LockerError, Result};
pub use locker::{
    count_files, mirror_path, BatchReport, CancelToken, FileCounts, FileLockTask, FileStatus,
    Locker, Progress, ProgressSink,
};

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs `env_logger` (default level `info`, `RUST_LOG` overrides).
/// Later calls are no-ops.
pub fn init_logger() {
    if LOGGER_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }
    // Another logger may already be installed by the host application.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .is_test(cfg!(test))
        .try_init();
    info!("Logger initialized");
}
