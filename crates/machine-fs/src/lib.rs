use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

pub use crate::path::*;

mod path;

#[derive(Debug, thiserror::Error)]
pub enum RemoveError {
    #[error("refusing to recursively delete `{}`", _0.simplified_display())]
    Refused(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Recursively remove `path` and everything below it, like [`fs_err::remove_dir_all`], but refuse
/// to act on catastrophic paths (see [`is_catastrophic`]).
///
/// Empty and root paths are refused before the filesystem is touched. Any other path is resolved
/// first, and refused if it resolves to a root, e.g., `link/..` where `link` points at `/`. A
/// missing `path` is not an error.
pub fn guarded_remove_dir_all(path: impl AsRef<Path>) -> Result<(), RemoveError> {
    let path = path.as_ref();
    if is_catastrophic(path) {
        return Err(RemoveError::Refused(path.to_path_buf()));
    }

    let resolved = match fs_err::canonicalize(path) {
        Ok(resolved) => resolved,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            trace!("Directory already absent: {}", path.simplified_display());
            return Ok(());
        }
        Err(err) => return Err(RemoveError::Io(err)),
    };
    if is_catastrophic(resolved.simplified()) {
        return Err(RemoveError::Refused(path.to_path_buf()));
    }

    debug!("Removing directory: {}", path.simplified_display());
    match fs_err::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            trace!("Directory already absent: {}", path.simplified_display());
            Ok(())
        }
        Err(err) => Err(RemoveError::Io(err)),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PrivateDirError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("`{}` is accessible to other users (mode {mode:o})", path.simplified_display())]
    Permissive { path: PathBuf, mode: u32 },
}

/// Create `path` (and any missing parents) and restrict it to its owner.
///
/// On Unix the directory ends up with mode `0o700`; any group or world bit that survives is an
/// error.
pub fn create_private_dir(path: impl AsRef<Path>) -> Result<(), PrivateDirError> {
    let path = path.as_ref();
    fs_err::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs_err::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
        let mode = fs_err::metadata(path)?.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(PrivateDirError::Permissive {
                path: path.to_path_buf(),
                mode,
            });
        }
    }

    Ok(())
}
