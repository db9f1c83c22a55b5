use directories::ProjectDirs;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::{LockerError, Result};

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "locker";
pub const APP_NAME: &str = "FolderLocker";

pub const CONFIG_FILE_NAME: &str = "config.enc";
pub const CONFIG_PATH_ENV: &str = "LOCKER_CONFIG";

/// Per-user application data directory for this platform.
pub fn data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or(LockerError::NoDataDir)?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Location of the encrypted configuration file. A non-empty
/// `LOCKER_CONFIG` overrides it.
pub fn config_path() -> Result<PathBuf> {
    resolve_config_path(std::env::var_os(CONFIG_PATH_ENV))
}

fn resolve_config_path(override_path: Option<OsString>) -> Result<PathBuf> {
    match override_path {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(data_dir()?.join(CONFIG_FILE_NAME)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_is_used_verbatim() {
        let path = resolve_config_path(Some(OsString::from("/tmp/locker/config.enc"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/locker/config.enc"));
    }

    #[test]
    fn test_empty_override_falls_back_to_data_dir() {
        let Ok(default_dir) = data_dir() else {
            return; // no home directory in this environment
        };
        let expected = default_dir.join(CONFIG_FILE_NAME);
        assert_eq!(resolve_config_path(Some(OsString::new())).unwrap(), expected);
        assert_eq!(resolve_config_path(None).unwrap(), expected);
    }
}
