use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam::channel;
use locker_core::{
    count_files, init_logger, inspect, mirror_path, otp, CancelToken, ConfigStore, Locker,
    LockerConfiguration, Progress,
};
use log::{error, info};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the locker password and generate a new one-time code secret
    ///
    /// Example:
    ///   locker setup --account me@laptop
    Setup {
        /// Account label shown in the authenticator app
        #[arg(long, default_value = otp::DEFAULT_ACCOUNT)]
        account: String,

        /// Issuer label shown in the authenticator app
        #[arg(long, default_value = otp::DEFAULT_ISSUER)]
        issuer: String,
    },

    /// Show whether the locker is configured
    Status,

    /// Encrypt every file of a folder into <folder>_ORI
    ///
    /// Example:
    ///   locker lock ~/Photos
    Lock {
        /// Folder to lock
        #[arg(value_parser)]
        path: PathBuf,
    },

    /// Decrypt every .dma file of a folder in place
    ///
    /// Example:
    ///   locker unlock ~/Photos_ORI --code 123456
    Unlock {
        /// Folder containing .dma files
        #[arg(value_parser)]
        path: PathBuf,

        /// One-time code from the authenticator app (prompted if omitted)
        #[arg(short, long)]
        code: Option<String>,
    },

    /// Count plain and locked files in a folder
    Count {
        #[arg(value_parser)]
        path: PathBuf,
    },

    /// Print the current one-time code (diagnostic)
    Code,

    /// Print container header facts of a .dma file
    Inspect {
        #[arg(value_parser)]
        path: PathBuf,
    },

    /// Delete the stored configuration
    Reset,
}

fn to_absolute_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        match fs::canonicalize(path) {
            Ok(canonical) => Ok(canonical),
            Err(_) => Ok(env::current_dir()?.join(path)),
        }
    }
}

fn read_stdin_line(what: &str) -> io::Result<String> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    lines
        .next()
        .transpose()?
        .map(|line| line.trim_end_matches('\r').to_string())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("No {} provided via stdin", what)))
}

fn prompt_for_password() -> io::Result<String> {
    let password = rpassword::prompt_password("Enter password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;

    if password != confirm {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "Passwords do not match"));
    }
    Ok(password)
}

fn get_password() -> io::Result<String> {
    if atty::is(atty::Stream::Stdin) {
        prompt_for_password()
    } else {
        read_stdin_line("password")
    }
}

fn get_code() -> io::Result<String> {
    if atty::is(atty::Stream::Stdin) {
        print!("Enter one-time code: ");
        io::stdout().flush()?;
    }
    read_stdin_line("one-time code")
}

/// Runs a batch on one worker thread and prints progress on this one.
/// Ctrl+C cancels between files.
fn run_with_progress<F>(job: F) -> Result<locker_core::BatchReport>
where
    F: FnOnce(&channel::Sender<Progress>, &CancelToken) -> locker_core::Result<locker_core::BatchReport>
        + Send
        + 'static,
{
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Cancelling after the current file...");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl+C handler")?;

    let (sender, receiver) = channel::bounded::<Progress>(64);
    let worker = thread::spawn(move || job(&sender, &cancel));

    for progress in receiver.iter() {
        println!("[{:>3}%] {}", progress.percent, progress.message);
    }

    let report = worker
        .join()
        .map_err(|_| anyhow!("Worker thread panicked"))??;
    Ok(report)
}

fn finish(report: &locker_core::BatchReport) -> Result<()> {
    println!(
        "{} file(s): {} succeeded, {} failed",
        report.total(),
        report.succeeded(),
        report.failed()
    );
    if !report.is_clean() {
        for task in report.failures() {
            error!(
                "{}: {}",
                task.source.display(),
                task.failure().unwrap_or("unknown error")
            );
        }
        bail!("{} file(s) failed", report.failed());
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logger();

    let cli = Cli::parse();
    let store = ConfigStore::open_default()?;

    match cli.command {
        Commands::Setup { account, issuer } => {
            let password = get_password()?;
            if password.is_empty() {
                bail!("Password must not be empty");
            }
            let secret = otp::generate_secret();
            let existing = store.load();
            let config = LockerConfiguration {
                password,
                totp_secret: secret.clone(),
                ..existing
            };
            store.save(&config)?;

            println!("Configuration saved to {}", store.path().display());
            println!("Secret: {}", secret);
            println!("Provisioning URI: {}", otp::provisioning_uri(&secret, &account, &issuer));
            Ok(())
        }

        Commands::Status => {
            let locker = Locker::new(store.clone());
            println!("Config file: {}", store.path().display());
            println!(
                "Configured: {}",
                if locker.is_configured() { "yes" } else { "no" }
            );
            Ok(())
        }

        Commands::Lock { path } => {
            let path = to_absolute_path(&path)?;
            let locker = Locker::new(store);
            info!("Mirror will be {}", mirror_path(&path).display());
            let report = run_with_progress(move |sender, cancel| {
                locker.lock_folder(&path, sender, cancel)
            })?;
            finish(&report)
        }

        Commands::Unlock { path, code } => {
            let path = to_absolute_path(&path)?;
            let locker = Locker::new(store);
            if !locker.is_configured() {
                return Err(locker_core::LockerError::NotConfigured.into());
            }
            let code = match code {
                Some(code) => code,
                None => get_code()?,
            };
            let report = run_with_progress(move |sender, cancel| {
                locker.unlock_folder(&path, &code, sender, cancel)
            })?;
            finish(&report)
        }

        Commands::Count { path } => {
            let counts = count_files(&to_absolute_path(&path)?)?;
            println!("Plain files:  {}", counts.plain);
            println!("Locked files: {}", counts.locked);
            Ok(())
        }

        Commands::Code => {
            let config = store.load();
            if !config.is_configured() {
                return Err(locker_core::LockerError::NotConfigured.into());
            }
            let code = otp::current_code(&config.totp_secret)?;
            println!("{} (valid for {}s)", code, otp::seconds_remaining());
            Ok(())
        }

        Commands::Inspect { path } => {
            let blob = fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let header = inspect(&blob)?;
            println!("Format:     DMA2");
            println!("Size:       {} bytes", blob.len());
            println!("Salt:       {}", hex::encode(header.salt));
            println!("Nonce:      {}", hex::encode(header.nonce));
            println!("Ciphertext: {} bytes", header.ciphertext_len);
            Ok(())
        }

        Commands::Reset => {
            store.reset()?;
            println!("Configuration removed from {}", store.path().display());
            Ok(())
        }
    }
}
