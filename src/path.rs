// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for external files that need to be
//! interacted with, or managed in some way.

use std::path::{Path, PathBuf};

/// Name of the launcher script written into the target directory.
pub const LAUNCHER_NAME: &str = "reprovision";

/// Name of the directory holding install markers inside the target directory.
pub const MARKER_DIR_NAME: &str = ".provision";

/// Determine default absolute path to the configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/rs-install/config.toml` as
/// the default. Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("rs-install").join("config.toml"))
        .ok_or(NoWayHome)
}

/// Path to the launcher script for a target directory.
pub fn launcher_path(target_dir: impl AsRef<Path>) -> PathBuf {
    target_dir.as_ref().join(LAUNCHER_NAME)
}

/// Path to the install marker of a package revision inside a target directory.
pub fn install_marker_path(
    target_dir: impl AsRef<Path>,
    package: impl AsRef<str>,
    revision: impl AsRef<str>,
) -> PathBuf {
    target_dir
        .as_ref()
        .join(MARKER_DIR_NAME)
        .join(format!("{}@{}.installed", package.as_ref(), revision.as_ref()))
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;
