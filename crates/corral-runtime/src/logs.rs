//! Container log files.
//!
//! A container's stdout and stderr are appended to
//! `<sandbox log_directory>/<container log_path>` when both are set.

use std::fs::File;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Resolves the host path of a container's log file.
///
/// Returns `None` when the sandbox has no log directory or the container no
/// log path.
#[must_use]
pub fn container_log_path(log_directory: Option<&Path>, log_path: &str) -> Option<PathBuf> {
    let dir = log_directory?;
    if log_path.is_empty() {
        return None;
    }
    Some(dir.join(log_path.trim_start_matches('/')))
}

/// Opens a log file for appending, creating it and its parent directories.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created.
pub fn open_for_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CorralError::io(parent, e))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| CorralError::io(path, e))
}

/// Reads a container log.
///
/// Returns an empty string if the log file does not exist yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_log(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CorralError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn log_path_joins_directory_and_relative_path() {
        let p = container_log_path(Some(Path::new("/var/log/pods/web")), "app/0.log");
        assert_eq!(p, Some(PathBuf::from("/var/log/pods/web/app/0.log")));
    }

    #[test]
    fn log_path_requires_both_parts() {
        assert_eq!(container_log_path(None, "app.log"), None);
        assert_eq!(container_log_path(Some(Path::new("/var/log")), ""), None);
    }

    #[test]
    fn log_path_stays_under_directory() {
        let p = container_log_path(Some(Path::new("/logs")), "/app.log");
        assert_eq!(p, Some(PathBuf::from("/logs/app.log")));
    }

    #[test]
    fn read_missing_log_returns_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = read_log(&dir.path().join("nonexistent.log")).expect("should succeed");
        assert!(content.is_empty());
    }

    #[test]
    fn append_creates_directories_and_keeps_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app").join("0.log");

        let mut file = open_for_append(&path).expect("open 1");
        writeln!(file, "line one").expect("write 1");
        drop(file);
        let mut file = open_for_append(&path).expect("open 2");
        writeln!(file, "line two").expect("write 2");
        drop(file);

        let content = read_log(&path).expect("read");
        assert_eq!(content, "line one\nline two\n");
    }
}
