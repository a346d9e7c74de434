//! The append-only activity log shared by the binary and its log viewer.
//!
//! The binary's tracing subscriber writes through [`open_log_file`]; the
//! `logs` command and the interactive `:logs` view read the same file back
//! with [`read_log`] and never write to it.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Default log file name, relative to the working directory.
pub const DEFAULT_LOG_FILE: &str = "app.log";

/// Environment variable overriding [`DEFAULT_LOG_FILE`].
pub const LOG_FILE_ENV: &str = "PDF_INSIGHT_LOG_FILE";

/// The log file location: `PDF_INSIGHT_LOG_FILE` or `app.log`.
pub fn log_path() -> PathBuf {
    std::env::var_os(LOG_FILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

/// Open `path` for appending, creating it (and its parent directory) if needed.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Read the log, optionally keeping only the last `tail` lines.
///
/// A log that does not exist yet reads as empty.
pub async fn read_log(path: &Path, tail: Option<usize>) -> io::Result<String> {
    let content = match tokio::fs::read(path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };
    Ok(match tail {
        None => content,
        Some(n) => {
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(n);
            let mut out = lines[start..].join("\n");
            if !out.is_empty() {
                out.push('\n');
            }
            out
        }
    })
}
