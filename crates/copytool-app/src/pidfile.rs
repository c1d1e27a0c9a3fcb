//! PID file handling.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::unistd::getpid;
use tracing::debug;

use crate::error::{AppError, AppResult};

const PID_FILE_MODE: u32 = 0o640;

/// Write the decimal pid of this process into `path`, creating it if missing.
///
/// # Errors
///
/// Returns [`AppError::Io`] when the file cannot be created or written.
pub fn write_pid_file(path: &Path) -> AppResult<()> {
    debug!(path = %path.display(), "writing pid file");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PID_FILE_MODE)
        .open(path)
        .map_err(|source| AppError::io("pid_file.open", Some(path.to_path_buf()), source))?;
    write!(file, "{}", getpid())
        .map_err(|source| AppError::io("pid_file.write", Some(path.to_path_buf()), source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn writes_the_current_pid_with_restricted_mode() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("copytool.pid");
        std::fs::write(&path, "99999999999")?;
        write_pid_file(&path)?;

        assert_eq!(std::fs::read_to_string(&path)?, std::process::id().to_string());
        let fresh = dir.path().join("fresh.pid");
        write_pid_file(&fresh)?;
        let mode = std::fs::metadata(&fresh)?.permissions().mode() & 0o777;
        assert_eq!(mode & !PID_FILE_MODE, 0);
        Ok(())
    }

    #[test]
    fn unwritable_locations_are_reported() {
        let err = write_pid_file(Path::new("/nonexistent-dir/copytool.pid"));
        assert!(matches!(
            err,
            Err(AppError::Io {
                operation: "pid_file.open",
                ..
            })
        ));
    }
}
