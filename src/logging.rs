use once_cell::sync::Lazy;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::SessionConfig;
use crate::error::StorageError;

static LOG_FILE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

/// Log output goes to stderr (dev mode) and is appended to the log file.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Get the log file path (set by [`init_logging`], else the default location)
pub fn log_file_path() -> PathBuf {
    if let Ok(path) = LOG_FILE.lock() {
        if let Some(path) = path.as_ref() {
            return path.clone();
        }
    }
    SessionConfig::default().log_file()
}

/// Point the log helpers at `path` without installing a logger
pub fn set_log_file(path: PathBuf) {
    if let Ok(mut slot) = LOG_FILE.lock() {
        *slot = Some(path);
    }
}

/// Initialize logging - creates log directory if needed.
/// `RUST_LOG` wins over the configured level. Calling it twice keeps the first logger.
pub fn init_logging(config: &SessionConfig) {
    let log_path = config.log_file();

    if let Some(parent) = log_path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    set_log_file(log_path.clone());

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| eprintln!("[WARN] Cannot open log file {:?}: {}", log_path, e))
        .ok();

    let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
    let result = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
            writeln!(
                buf,
                "[{}] [{}] [{}] {}",
                timestamp,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
        .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
        return;
    }

    log::info!("Application started");
}

fn read_log(path: &Path) -> Result<String, StorageError> {
    if !path.exists() {
        return Ok("No log file yet.".to_string());
    }
    fs::read_to_string(path).map_err(|e| StorageError::read_file(path, e))
}

fn clear_log(path: &Path) -> Result<(), StorageError> {
    if path.exists() {
        fs::write(path, "").map_err(|e| StorageError::write_file(path, e))?;
    }
    Ok(())
}

fn log_size(path: &Path) -> Result<u64, StorageError> {
    if !path.exists() {
        return Ok(0);
    }
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| StorageError::read_file(path, e))
}

/// Get the log file contents
pub fn read_log_file() -> Result<String, StorageError> {
    read_log(&log_file_path())
}

/// Clear the log file
pub fn clear_log_file() -> Result<(), StorageError> {
    clear_log(&log_file_path())?;
    log::info!("Log file cleared");
    Ok(())
}

/// Get log file size in bytes
pub fn log_file_size() -> Result<u64, StorageError> {
    log_size(&log_file_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_log_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.log");
        assert_eq!(read_log(&path).unwrap(), "No log file yet.");
        assert_eq!(log_size(&path).unwrap(), 0);
        clear_log(&path).unwrap();
    }

    #[test]
    fn test_tee_writer_appends_and_clear_truncates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        let file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        let mut tee = TeeWriter { file: Some(file) };
        writeln!(tee, "[INFO] hello").unwrap();
        tee.flush().unwrap();

        assert!(read_log(&path).unwrap().contains("hello"));
        assert_eq!(log_size(&path).unwrap(), 13);

        clear_log(&path).unwrap();
        assert_eq!(log_size(&path).unwrap(), 0);
    }
}
