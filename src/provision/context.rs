// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Explicit working context threaded through every step.
//!
//! Steps never change the process working directory or `PATH`. Whatever an
//! earlier step discovers (where a freshly installed tool lives, where the
//! conda environment ended up) is recorded here, and later steps read it back.

use crate::exec::Cmd;

use std::{
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

/// Environment descriptor.
///
/// Built once from command-line arguments and configuration. Immutable after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    name: String,
    target_dir: PathBuf,
    python_version: String,
}

impl Environment {
    /// Construct new environment descriptor.
    pub fn new(
        name: impl Into<String>,
        target_dir: impl Into<PathBuf>,
        python_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target_dir: target_dir.into(),
            python_version: python_version.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn python_version(&self) -> &str {
        &self.python_version
    }
}

/// Working context of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingContext {
    environment: Environment,
    current_dir: PathBuf,
    search_path: Vec<PathBuf>,
    env_path: Option<PathBuf>,
}

impl WorkingContext {
    /// Construct new working context.
    ///
    /// The target directory is made absolute against the process working
    /// directory. It does not have to exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`io::Error`] if the process working directory is unknown.
    pub fn new(environment: Environment) -> io::Result<Self> {
        let current_dir = std::path::absolute(environment.target_dir())?;

        Ok(Self {
            environment,
            current_dir,
            search_path: Vec::new(),
            env_path: None,
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Absolute target directory every command runs from.
    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    /// Extra directories discovered so far, searched before `PATH`.
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Record directory holding a discovered tool.
    pub fn add_search_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.search_path.contains(&dir) {
            self.search_path.push(dir);
        }
    }

    /// Resolved location of the conda environment.
    pub fn env_path(&self) -> Option<&Path> {
        self.env_path.as_deref()
    }

    pub fn set_env_path(&mut self, path: impl Into<PathBuf>) {
        self.env_path = Some(path.into());
    }

    /// Checkout directory of a package.
    pub fn package_dir(&self, package: impl AsRef<str>) -> PathBuf {
        self.current_dir.join(package.as_ref())
    }

    /// `pip` of the resolved conda environment.
    pub fn pip(&self) -> Option<PathBuf> {
        self.env_path().map(|path| path.join("bin").join("pip"))
    }

    /// Command running from the target directory with discovered tools visible.
    pub fn command(&self, program: impl Into<OsString>) -> Cmd {
        Cmd::new(program)
            .current_dir(&self.current_dir)
            .search_path(self.search_path.iter().cloned())
    }
}
