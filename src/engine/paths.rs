//! Install-directory resolution.
//!
//! The server scripts and sentinel files live under `<install>/bin`. When no
//! explicit directory is given, the install directory is derived from the
//! running executable: its parent's parent on Linux, the bundle's
//! `Contents/Resources` on macOS.

use super::LaunchError;
use std::path::{Path, PathBuf};

/// Canonical install directory, either `override_dir` or the one holding this executable.
pub fn resolve_base_path(override_dir: Option<&Path>) -> Result<PathBuf, LaunchError> {
    let candidate = match override_dir {
        Some(p) => p.to_path_buf(),
        None => default_install_dir()?,
    };

    let resolved = std::fs::canonicalize(&candidate).map_err(|source| LaunchError::BasePath {
        path: candidate.clone(),
        source,
    })?;

    if !resolved.is_dir() {
        return Err(LaunchError::BasePath {
            path: resolved,
            source: std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
        });
    }

    Ok(resolved)
}

fn default_install_dir() -> Result<PathBuf, LaunchError> {
    let exe = std::env::current_exe().map_err(|source| LaunchError::BasePath {
        path: PathBuf::from("<current executable>"),
        source,
    })?;
    let exe_dir = exe.parent().ok_or_else(|| LaunchError::BasePath {
        path: exe.clone(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "executable has no parent"),
    })?;
    Ok(install_dir_for(exe_dir))
}

#[cfg(target_os = "macos")]
fn install_dir_for(exe_dir: &Path) -> PathBuf {
    // <App>.app/Contents/MacOS/<exe> -> <App>.app/Contents/Resources
    exe_dir.join("..").join("Resources")
}

#[cfg(not(target_os = "macos"))]
fn install_dir_for(exe_dir: &Path) -> PathBuf {
    // <install>/bin/<exe> -> <install>
    exe_dir.join("..")
}
