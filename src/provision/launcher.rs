// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Re-entrant launcher script.
//!
//! Once the target directory exists, a small POSIX shell script is written
//! into it. The script captures the resolved environment name and absolute
//! target directory, so provisioning can be rerun from that directory
//! without re-supplying any arguments:
//!
//! ```text
//! $ ./reprovision
//! ```

use crate::{
    path::launcher_path,
    provision::{Policy, Result, Session, Step, StepError},
};

use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};
use tracing::info;

/// Launcher script exists, is current, and is executable.
#[derive(Debug, Clone)]
pub struct LauncherStep {
    program: PathBuf,
}

impl LauncherStep {
    /// Construct new launcher step re-invoking `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Step for LauncherStep {
    fn name(&self) -> String {
        "launcher".into()
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        let path = launcher_path(session.context.current_dir());
        let expect = script(
            &self.program,
            session.context.environment().name(),
            session.context.current_dir(),
        );

        Ok(read_to_string(&path).is_ok_and(|content| content == expect) && is_executable(&path))
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let path = launcher_path(session.context.current_dir());
        let content = script(
            &self.program,
            session.context.environment().name(),
            session.context.current_dir(),
        );

        info!("write launcher {:?}", path.display());
        let io_error = |source| StepError::Io {
            source,
            path: path.clone(),
        };
        write(&path, content).map_err(io_error)?;
        make_executable(&path).map_err(io_error)?;

        Ok(())
    }
}

/// Render launcher script contents.
pub fn script(program: &Path, environment: &str, target_dir: &Path) -> String {
    format!(
        "#!/bin/sh\n\
         # Rerun provisioning of the {environment:?} environment in this directory.\n\
         exec {} {} {} \"$@\"\n",
        quote(program.to_string_lossy().as_ref()),
        quote(environment),
        quote(target_dir.to_string_lossy().as_ref()),
    )
}

// INVARIANT: Single quotes protect everything except single quotes themselves.
fn quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r#"'\''"#))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
