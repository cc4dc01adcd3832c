// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Toolchain steps.
//!
//! Everything the package steps rely on: the target directory, command-line
//! utilities, conda itself, the conda environment and its contents, and
//! access to the source hosting service.

use crate::{
    config::{CondaSettings, ToolSettings},
    manifest::parse_conda_list,
    provision::{Policy, Result, Session, Step, StepError},
};

use std::{cell::Cell, path::PathBuf};
use tracing::{debug, info, warn};

/// Target directory exists.
#[derive(Debug, Default, Clone)]
pub struct DirectoryStep;

impl Step for DirectoryStep {
    fn name(&self) -> String {
        "directory".into()
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        Ok(session.context.current_dir().is_dir())
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let dir = session.context.current_dir().to_path_buf();
        info!("create target directory {:?}", dir.display());
        mkdirp::mkdirp(&dir).map_err(|err| StepError::Io {
            source: err,
            path: dir.clone(),
        })?;

        Ok(())
    }
}

/// Command-line utility is available.
#[derive(Debug, Clone)]
pub struct ToolStep {
    tool: ToolSettings,
}

impl ToolStep {
    /// Construct new tool step.
    pub fn new(tool: ToolSettings) -> Self {
        Self { tool }
    }
}

impl Step for ToolStep {
    fn name(&self) -> String {
        format!("tool:{}", self.tool.binary)
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        Ok(session
            .locate(&self.tool.binary, &self.tool.search)
            .is_some())
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        info!("install {}", self.tool.binary);
        let cmds = self
            .tool
            .install
            .iter()
            .filter_map(|argv| argv.split_first())
            .map(|(program, args)| {
                session
                    .context
                    .command(program)
                    .args(args)
                    .search_path(self.tool.search.iter().cloned())
            })
            .collect::<Vec<_>>();
        session.run_all(cmds)?;

        Ok(())
    }
}

/// Conda is installed.
///
/// A fresh Miniconda install in batch mode lands in a known prefix, so it is
/// normally found again right away. If the user installed somewhere else, the
/// only way forward is a new terminal that picks up the shell hooks written by
/// `conda init`. If `conda init` itself fails, the step stays unsatisfied so
/// the user learns that the hooks may be missing.
#[derive(Debug, Clone)]
pub struct CondaStep {
    conda: CondaSettings,
    init_failed: Cell<bool>,
}

impl CondaStep {
    /// Construct new conda step.
    pub fn new(conda: CondaSettings) -> Self {
        Self {
            conda,
            init_failed: Cell::new(false),
        }
    }
}

impl Step for CondaStep {
    fn name(&self) -> String {
        "conda".into()
    }

    fn policy(&self) -> Policy {
        if self.init_failed.get() {
            return Policy::Resume(
                "`conda init` failed, so the shell hooks may be missing; run `conda init` \
                 yourself, restart the terminal, come back to this directory, and rerun"
                    .into(),
            );
        }

        Policy::Resume(
            "restart the terminal so conda is on PATH, come back to this directory, and rerun"
                .into(),
        )
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        if self.init_failed.get() {
            return Ok(false);
        }

        Ok(session.locate("conda", &self.conda.search()).is_some())
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let installer = session.context.current_dir().join(&self.conda.installer);
        if !installer.exists() {
            let download = session
                .context
                .command("wget")
                .arg(self.conda.installer_url())
                .arg("-O")
                .arg(&installer);
            if !session.run(download)? {
                return Ok(());
            }
        }

        let install = session
            .context
            .command("bash")
            .arg(&installer)
            .args(["-b", "-u", "-p"])
            .arg(&self.conda.prefix);
        if !session.run(install)? {
            return Ok(());
        }

        match session.locate("conda", &self.conda.search()) {
            Some(conda) => {
                let init = session.context.command(conda).arg("init");
                if !session.run(init)? {
                    self.init_failed.set(true);
                }
            }
            None => warn!("conda installed, but not found in {:?}", self.conda.prefix.display()),
        }

        Ok(())
    }
}

/// Parse `conda env list` output into environment names and locations.
///
/// Unnamed environments (prefix only) are skipped.
pub fn parse_env_list(output: &str) -> Vec<(String, PathBuf)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let tokens = line.split_whitespace().collect::<Vec<_>>();
            match tokens.as_slice() {
                [name, .., path] => Some((name.to_string(), PathBuf::from(path))),
                _ => None,
            }
        })
        .collect()
}

/// Conda environment exists.
///
/// Records the environment location in the working context once found.
#[derive(Debug, Default, Clone)]
pub struct CondaEnvStep;

impl Step for CondaEnvStep {
    fn name(&self) -> String {
        "environment".into()
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        let result = session.capture(session.context.command("conda").args(["env", "list"]))?;
        if !result.success() {
            return Ok(false);
        }

        let name = session.context.environment().name().to_string();
        let found = parse_env_list(result.stdout.as_deref().unwrap_or_default())
            .into_iter()
            .find(|(candidate, _)| *candidate == name);

        match found {
            Some((_, path)) => {
                info!("location of {name:?} environment: {:?}", path.display());
                session.context.set_env_path(path);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let environment = session.context.environment().clone();
        let create = session
            .context
            .command("conda")
            .args(["create", "-n", environment.name(), "-y"])
            .arg(format!("python={}", environment.python_version()));
        session.run(create)?;

        Ok(())
    }
}

/// GitHub CLI is authenticated and wired up as git credential helper.
#[derive(Debug, Default, Clone)]
pub struct GithubAuthStep;

impl Step for GithubAuthStep {
    fn name(&self) -> String {
        "github-auth".into()
    }

    fn policy(&self) -> Policy {
        Policy::Resume("log in with `gh auth login`, then rerun".into())
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        let status = session.capture(session.context.command("gh").args(["auth", "status"]))?;
        Ok(status.success())
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let login = session.context.command("gh").args(["auth", "login"]);
        let setup = session.context.command("gh").args(["auth", "setup-git"]);
        session.run_all([login, setup])?;

        Ok(())
    }
}

/// Conda environment holds every tool of the environment manifest.
#[derive(Debug, Clone)]
pub struct EnvUpdateStep {
    installer: String,
    manifest: PathBuf,
}

impl EnvUpdateStep {
    /// Construct new environment update step.
    ///
    /// The manifest path is relative to the installer checkout.
    pub fn new(installer: impl Into<String>, manifest: impl Into<PathBuf>) -> Self {
        Self {
            installer: installer.into(),
            manifest: manifest.into(),
        }
    }

    fn manifest_path(&self, session: &Session<'_>) -> PathBuf {
        session
            .context
            .package_dir(&self.installer)
            .join(&self.manifest)
    }
}

impl Step for EnvUpdateStep {
    fn name(&self) -> String {
        "environment-update".into()
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        let spec = session
            .manifests
            .load_environment_spec(&self.manifest_path(session))?;
        if spec.is_empty() {
            return Ok(true);
        }

        let name = session.context.environment().name().to_string();
        let listing = session.capture(
            session
                .context
                .command("conda")
                .args(["list", "-n", name.as_str()]),
        )?;
        if !listing.success() {
            return Ok(false);
        }

        let missing = spec.missing_from(&parse_conda_list(
            listing.stdout.as_deref().unwrap_or_default(),
        ));
        if !missing.is_empty() {
            debug!("environment {name:?} lacks {}", missing.join(", "));
        }

        Ok(missing.is_empty())
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let name = session.context.environment().name().to_string();
        let update = session
            .context
            .command("mamba")
            .args(["env", "update", "-n", name.as_str(), "-f"])
            .arg(self.manifest_path(session));
        session.run(update)?;

        Ok(())
    }
}
