//! authportal - terminal client for the authentication API.
//!
//! Sign in, sign up, and (for admins) manage users from the command line.
//! Tokens are kept between runs in the storage backend picked by
//! `AUTHPORTAL_STORAGE`.

mod commands;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authportal_core::{FileStorage, KeyringStorage, MemoryStorage, SessionManager, Storage};

// ============================================================================
// Constants
// ============================================================================

/// Environment variable selecting the storage backend
const STORAGE_ENV: &str = "AUTHPORTAL_STORAGE";

const LOG_FILE_NAME: &str = "authportal.log";

const USAGE: &str = "\
Usage: authportal <command> [args]

Commands:
  status                         Check the stored session
  login [email]                  Sign in with email and password
  signup                         Create an account
  logout                         Sign out and forget stored tokens
  users                          List users (admin)
  set-role <id> <user|admin>     Change a user's role (admin)
  delete-user <id>               Delete a user (admin)
  google                         Print the Google sign-in URL
  callback <url>                 Finish Google sign-in from the redirect URL
  watch                          Follow session changes and periodic user lists
  config show                    Print the configuration
  config set-api-url <url>       Point the client at another API
  config toggle-theme            Switch between light and dark
  config reset                   Restore the default configuration
  config detect [url...]         Adopt the first API URL whose /health answers

Environment:
  AUTHPORTAL_STORAGE             file (default), keyring, or memory
  API_URL                        Default API base URL
  RUST_LOG                       Log filter (default: warn)";

fn log_dir() -> Option<PathBuf> {
    let dir = dirs::cache_dir()?.join("authportal");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}

/// Initialize the tracing subscriber: stderr plus a daily log file when the
/// cache directory is writable. The returned guard flushes the file on drop.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn open_storage() -> Result<Arc<dyn Storage>> {
    let backend = std::env::var(STORAGE_ENV).unwrap_or_else(|_| "file".to_string());
    debug!(backend = %backend, "Opening storage");

    match backend.trim().to_lowercase().as_str() {
        "file" | "" => {
            let storage = FileStorage::default_location().context("Failed to open file storage")?;
            Ok(Arc::new(storage))
        }
        "keyring" => Ok(Arc::new(KeyringStorage::new())),
        "memory" => Ok(Arc::new(MemoryStorage::new())),
        other => bail!(
            "Unknown storage backend '{}' (expected file, keyring or memory)",
            other
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };
    if command == "-h" || command == "--help" || command == "help" {
        println!("{}", USAGE);
        return Ok(());
    }

    let storage = open_storage()?;
    let manager = SessionManager::new(storage).map_err(commands::user_error)?;
    info!(command = %command, "authportal starting");

    let rest = &args[1..];
    let result = match command.as_str() {
        "status" => commands::status(&manager).await,
        "login" => commands::login(&manager, rest.first().map(String::as_str)).await,
        "signup" => commands::signup(&manager).await,
        "logout" => commands::logout(&manager).await,
        "users" => commands::users(&manager).await,
        "set-role" => match rest {
            [id, role] => commands::set_role(&manager, id, role).await,
            _ => Err(anyhow::anyhow!("Usage: authportal set-role <id> <user|admin>")),
        },
        "delete-user" => match rest {
            [id] => commands::delete_user(&manager, id).await,
            _ => Err(anyhow::anyhow!("Usage: authportal delete-user <id>")),
        },
        "google" => commands::google(&manager),
        "callback" => match rest {
            [url] => commands::callback(&manager, url).await,
            _ => Err(anyhow::anyhow!("Usage: authportal callback <url>")),
        },
        "watch" => commands::watch(&manager).await,
        "config" => commands::config(&manager, rest).await,
        other => {
            eprintln!("{}", USAGE);
            Err(anyhow::anyhow!("Unknown command: {}", other))
        }
    };

    // Background refresh must not outlive the command
    manager.stop_auto_refresh();
    result
}
