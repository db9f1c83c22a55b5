use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use crossbeam::channel::Sender;
use log::{debug, info, warn};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::codec;
use crate::config::{ConfigStore, LockerConfiguration};
use crate::error::{LockerError, Result};
use crate::otp;

pub const LOCKED_EXTENSION: &str = "dma";
pub const MIRROR_SUFFIX: &str = "_ORI";

/// One entry of the progress feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

/// Receives progress inline from the batch loop. Implementations that feed
/// a UI should hand the event off (e.g. through a channel) rather than do
/// work on the batch thread.
pub trait ProgressSink {
    fn report(&self, progress: Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(Progress),
{
    fn report(&self, progress: Progress) {
        self(progress)
    }
}

impl ProgressSink for Sender<Progress> {
    fn report(&self, progress: Progress) {
        if self.send(progress).is_err() {
            debug!("Progress receiver dropped, continuing without it");
        }
    }
}

/// Cooperative cancellation, checked once per file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Succeeded,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLockTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub status: FileStatus,
    /// Batch progress after this file.
    pub percent: u8,
}

impl FileLockTask {
    /// Cause of a failed file, `None` when it succeeded.
    pub fn failure(&self) -> Option<&str> {
        match &self.status {
            FileStatus::Failed { message } => Some(message),
            FileStatus::Succeeded => None,
        }
    }
}

/// Per-file outcome of a lock or unlock run. A returned report may still
/// contain failures; check [`BatchReport::is_clean`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub tasks: Vec<FileLockTask>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.tasks.len()
    }

    pub fn succeeded(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.status == FileStatus::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileLockTask> {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, FileStatus::Failed { .. }))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileCounts {
    pub plain: usize,
    pub locked: usize,
}

struct Step {
    source: PathBuf,
    destination: PathBuf,
}

/// Locks folders into a `_ORI` mirror of `.dma` containers and unlocks them
/// again behind a one-time code.
///
/// The configuration is read once when the locker is built and again only on
/// [`Locker::reload`]. One batch runs at a time per instance; nothing guards
/// against two processes working on the same mirror.
pub struct Locker {
    store: Option<ConfigStore>,
    config: LockerConfiguration,
}

impl Locker {
    pub fn new(store: ConfigStore) -> Self {
        let config = store.load();
        Self {
            store: Some(store),
            config,
        }
    }

    /// Locker around an explicit configuration; `reload` keeps it as is.
    pub fn with_config(config: LockerConfiguration) -> Self {
        Self {
            store: None,
            config,
        }
    }

    pub fn reload(&mut self) {
        if let Some(store) = &self.store {
            self.config = store.load();
        }
    }

    pub fn config(&self) -> &LockerConfiguration {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Encrypts every file under `folder` into `<folder>_ORI`
    ///
    /// The mirror keeps the directory layout of `folder` and every file gets
    /// a `.dma` suffix. The source tree is only read. Files are handled one
    /// at a time in name order:
    /// 1. Skip anything already ending in `.dma`
    /// 2. Read the file and seal it with the configured password
    /// 3. Write the container into the mirror
    /// 4. Report `LOCK [ORI]: <name>` or `FAIL: <name> - <cause>`
    ///
    /// # Arguments
    /// * `folder` - The folder to lock. Example: /home/me/Photos
    /// * `progress` - Receives one event per file. Example: a closure or a crossbeam `Sender<Progress>`
    /// * `cancel` - Checked before each file. Example: CancelToken::new()
    ///
    /// # Returns
    /// * `Ok(BatchReport)` with one task per file; it may contain failures
    /// * `Err(LockerError::NotConfigured)` before any I/O when no password or secret is set
    /// * `Err(LockerError::Cancelled)` carrying the files done so far
    /// * `Err(LockerError::Io)` if `folder` is not a directory or the mirror cannot be created
    ///
    /// # Example
    /// ```no_run
    /// use std::path::Path;
    /// use locker_core::{CancelToken, ConfigStore, Locker, Progress};
    ///
    /// # fn main() -> locker_core::Result<()> {
    /// let locker = Locker::new(ConfigStore::open_default()?);
    /// let report = locker.lock_folder(
    ///     Path::new("/home/me/Photos"),
    ///     &|p: Progress| println!("[{:>3}%] {}", p.percent, p.message),
    ///     &CancelToken::new(),
    /// )?;
    /// println!("{} of {} file(s) locked", report.succeeded(), report.total());
    /// # Ok(())
    /// # }
    /// ```
    pub fn lock_folder(
        &self,
        folder: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        if !self.config.is_configured() {
            return Err(LockerError::NotConfigured);
        }
        ensure_dir(folder)?;

        let target = mirror_path(folder);
        fs::create_dir_all(&target)?;
        info!("Locking {} into {}", folder.display(), target.display());

        let steps: Vec<Step> = collect_files(folder)
            .into_iter()
            .filter(|source| !is_locked(source))
            .map(|source| {
                let destination = locked_path(&target.join(relative_to(folder, &source)));
                Step { source, destination }
            })
            .collect();

        if steps.is_empty() {
            progress.report(Progress {
                percent: 100,
                message: "No files to lock.".to_string(),
            });
            return Ok(BatchReport::default());
        }

        let report = run_batch(steps, progress, cancel, |step| {
            if let Some(parent) = step.destination.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            }
            let data = fs::read(&step.source).context("Failed to read source file")?;
            let sealed =
                codec::encrypt(&data, &self.config.password).context("Failed to encrypt")?;
            fs::write(&step.destination, sealed).context("Failed to write locked file")?;
            Ok(format!("LOCK [ORI]: {}", display_name(&step.source)))
        })?;

        info!(
            "Lock finished for {}: {} succeeded, {} failed",
            folder.display(),
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    /// Decrypts every `.dma` file under `folder` in place
    ///
    /// The configuration and `code` are checked before any file is touched.
    /// Each container is then:
    /// 1. Decrypted with the configured password
    /// 2. Written next to itself without the `.dma` suffix and synced to disk
    /// 3. Removed, only after step 2 succeeded
    ///
    /// A file that fails keeps its container and shows up as `FAIL` in the
    /// progress feed and the report.
    ///
    /// # Arguments
    /// * `folder` - The folder holding `.dma` files. Example: /home/me/Photos_ORI
    /// * `code` - The current one-time code. Example: "287082"
    /// * `progress` - Receives one event per file
    /// * `cancel` - Checked before each file
    ///
    /// # Returns
    /// * `Ok(BatchReport)` with one task per container; it may contain failures
    /// * `Err(LockerError::NotConfigured)` when no password or secret is set
    /// * `Err(LockerError::Authentication)` when `code` is rejected
    /// * `Err(LockerError::Cancelled)` carrying the files done so far
    ///
    /// # Example
    /// ```no_run
    /// use std::path::Path;
    /// use locker_core::{CancelToken, ConfigStore, Locker, LockerError, Progress};
    ///
    /// let locker = Locker::new(ConfigStore::open_default().unwrap());
    /// match locker.unlock_folder(
    ///     Path::new("/home/me/Photos_ORI"),
    ///     "287082",
    ///     &|_: Progress| {},
    ///     &CancelToken::new(),
    /// ) {
    ///     Ok(report) if report.is_clean() => println!("Unlocked {} file(s)", report.total()),
    ///     Ok(report) => eprintln!("{} file(s) failed", report.failed()),
    ///     Err(LockerError::Authentication) => eprintln!("Wrong code"),
    ///     Err(e) => eprintln!("Failed to unlock: {}", e),
    /// }
    /// ```
    pub fn unlock_folder(
        &self,
        folder: &Path,
        code: &str,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<BatchReport> {
        if !self.config.is_configured() {
            return Err(LockerError::NotConfigured);
        }
        if !otp::verify(code, &self.config.totp_secret) {
            warn!("Rejected one-time code for {}", folder.display());
            return Err(LockerError::Authentication);
        }
        ensure_dir(folder)?;
        info!("Unlocking {}", folder.display());

        let steps: Vec<Step> = collect_files(folder)
            .into_iter()
            .filter(|source| is_locked(source))
            .map(|source| Step {
                destination: source.with_extension(""),
                source,
            })
            .collect();

        if steps.is_empty() {
            progress.report(Progress {
                percent: 100,
                message: "No .dma files to unlock.".to_string(),
            });
            return Ok(BatchReport::default());
        }

        let report = run_batch(steps, progress, cancel, |step| {
            let blob = fs::read(&step.source).context("Failed to read locked file")?;
            let plaintext =
                codec::decrypt(&blob, &self.config.password).context("Failed to decrypt")?;
            write_durably(&step.destination, &plaintext)
                .context("Failed to write unlocked file")?;
            // Only now is it safe to drop the container.
            fs::remove_file(&step.source).context("Failed to remove locked file")?;
            Ok(format!("UNLOCK: {}", display_name(&step.destination)))
        })?;

        info!(
            "Unlock finished for {}: {} succeeded, {} failed",
            folder.display(),
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    /// Counts plain and `.dma` files under `folder`. See [`count_files`].
    pub fn count_files(&self, folder: &Path) -> Result<FileCounts> {
        count_files(folder)
    }
}

/// Counts plain vs. locked files under `folder`
///
/// Reads directory entries only; no file is opened. Links to regular files
/// count like regular files.
///
/// # Arguments
/// * `folder` - The folder to scan. Example: /home/me/Photos_ORI
///
/// # Returns
/// * `Ok(FileCounts)` with `plain` and `locked` totals
/// * `Err(LockerError::Io)` if `folder` is not a directory
///
/// # Example
/// ```no_run
/// use std::path::Path;
/// use locker_core::count_files;
///
/// let counts = count_files(Path::new("/home/me/Photos_ORI")).unwrap();
/// println!("{} plain, {} locked", counts.plain, counts.locked);
/// ```
pub fn count_files(folder: &Path) -> Result<FileCounts> {
    ensure_dir(folder)?;
    let mut counts = FileCounts::default();
    for path in collect_files(folder) {
        if is_locked(&path) {
            counts.locked += 1;
        } else {
            counts.plain += 1;
        }
    }
    Ok(counts)
}

/// `<folder>_ORI`, ignoring a trailing separator on `folder`.
pub fn mirror_path(folder: &Path) -> PathBuf {
    let mut name = folder.components().as_path().as_os_str().to_os_string();
    name.push(MIRROR_SUFFIX);
    PathBuf::from(name)
}

/// True for `*.dma`, compared ASCII case-insensitively.
pub fn is_locked(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case(LOCKED_EXTENSION))
}

fn run_batch<F>(
    steps: Vec<Step>,
    progress: &dyn ProgressSink,
    cancel: &CancelToken,
    work: F,
) -> Result<BatchReport>
where
    F: Fn(&Step) -> anyhow::Result<String>,
{
    let total = steps.len();
    let mut report = BatchReport::default();

    for (index, step) in steps.into_iter().enumerate() {
        if cancel.is_cancelled() {
            info!("Cancelled after {} of {} file(s)", index, total);
            return Err(LockerError::Cancelled { report });
        }

        debug!("Processing {}", step.source.display());
        let percent = ((index + 1) * 100 / total) as u8;
        let (status, message) = match work(&step) {
            Ok(message) => (FileStatus::Succeeded, message),
            Err(e) => {
                let cause = format!("{:#}", e);
                warn!("Failed to process {}: {}", step.source.display(), cause);
                let message = format!("FAIL: {} - {}", display_name(&step.source), cause);
                (FileStatus::Failed { message: cause }, message)
            }
        };

        progress.report(Progress { percent, message });
        report.tasks.push(FileLockTask {
            source: step.source,
            destination: step.destination,
            status,
            percent,
        });
    }

    Ok(report)
}

/// Regular files under `folder`, depth first, sorted by name.
fn collect_files(folder: &Path) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        // Links are not followed while walking, but a link to a regular
        // file is locked like one.
        .filter(|entry| {
            entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file())
        })
        .map(|entry| entry.into_path())
        .collect()
}

fn ensure_dir(folder: &Path) -> Result<()> {
    if folder.is_dir() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Not a directory: {}", folder.display()),
        )
        .into())
    }
}

fn relative_to(folder: &Path, source: &Path) -> PathBuf {
    match source.strip_prefix(folder) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => PathBuf::from(source.file_name().unwrap_or_default()),
    }
}

fn locked_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(LOCKED_EXTENSION);
    PathBuf::from(name)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(OsStr::to_string_lossy)
        .map(|name| name.into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Temp file in the target directory, fsync, then rename over `path`.
fn write_durably(path: &Path, data: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    // Make the rename itself durable before the caller removes anything.
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}
