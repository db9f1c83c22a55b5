use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use zeroize::Zeroizing;

use crate::codec::{self, KdfPolicy};
use crate::error::Result;
use crate::paths;

// Appended to the OS account name to form the store's password input.
const STORE_PEPPER: &str = "FolderLocker";

/// Secrets the locker needs plus window geometry remembered by the shell.
///
/// Serialised as compact JSON with PascalCase keys; missing keys fall back to
/// the defaults below.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LockerConfiguration {
    /// Passphrase for per-file key derivation.
    pub password: String,
    /// Base32 TOTP secret.
    pub totp_secret: String,
    pub window_x: i32,
    pub window_y: i32,
    pub window_width: i32,
    pub window_height: i32,
}

impl Default for LockerConfiguration {
    fn default() -> Self {
        Self {
            password: String::new(),
            totp_secret: String::new(),
            window_x: -1,
            window_y: -1,
            window_width: 540,
            window_height: 460,
        }
    }
}

impl LockerConfiguration {
    pub fn new(password: impl Into<String>, totp_secret: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            totp_secret: totp_secret.into(),
            ..Self::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.password.is_empty() && !self.totp_secret.is_empty()
    }
}

impl fmt::Debug for LockerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &str) -> &'static str {
            if value.is_empty() { "<empty>" } else { "<redacted>" }
        }
        f.debug_struct("LockerConfiguration")
            .field("password", &redact(&self.password))
            .field("totp_secret", &redact(&self.totp_secret))
            .field("window_x", &self.window_x)
            .field("window_y", &self.window_y)
            .field("window_width", &self.window_width)
            .field("window_height", &self.window_height)
            .finish()
    }
}

/// Encrypted on-disk home of a [`LockerConfiguration`].
///
/// The file is a regular codec container sealed under
/// [`KdfPolicy::CONFIG_STORE`], keyed by the OS account name. Copying it to
/// another machine or account makes it unreadable, which `load` reports the
/// same way as a missing file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    account: String,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            account: whoami::username(),
        }
    }

    /// Store at the platform default location (see [`paths::config_path`]).
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(paths::config_path()?))
    }

    /// Replaces the account name that keys the store.
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = account.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Never fails: a missing file and an unreadable one both yield the
    /// default, unconfigured value.
    pub fn load(&self) -> LockerConfiguration {
        match self.try_load() {
            Ok(Some(config)) => {
                debug!("Loaded configuration from {}", self.path.display());
                config
            }
            Ok(None) => {
                debug!("No configuration at {}", self.path.display());
                LockerConfiguration::default()
            }
            Err(e) => {
                warn!(
                    "Configuration at {} is unreadable, treating as not configured: {}",
                    self.path.display(),
                    e
                );
                LockerConfiguration::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<LockerConfiguration>> {
        let blob = match fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let json = Zeroizing::new(codec::decrypt_with(
            &blob,
            &self.store_password(),
            &KdfPolicy::CONFIG_STORE,
        )?);
        Ok(Some(serde_json::from_slice(&json)?))
    }

    /// Serialises, encrypts and atomically replaces the configuration file.
    pub fn save(&self, config: &LockerConfiguration) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let json = Zeroizing::new(serde_json::to_vec(config)?);
        let blob = codec::encrypt_with(&json, &self.store_password(), &KdfPolicy::CONFIG_STORE)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&blob)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        info!("Saved configuration to {}", self.path.display());
        Ok(())
    }

    /// Deletes the configuration file. Missing files are not an error.
    pub fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed configuration at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn store_password(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}{}", self.account, STORE_PEPPER))
    }
}
