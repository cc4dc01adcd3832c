// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package steps.
//!
//! Every package goes through three steps: clone its repository, bring the
//! checkout up to date, and install it into the conda environment. The
//! installer repository itself only goes through the first two.
//!
//! Installs are tracked with marker files under `.provision/` in the target
//! directory, one per package named after the commit that was installed,
//! e.g., `.provision/foamdb@9fceb02….installed`. A marker is written only
//! after every install command of a package succeeds. Once the checkout moves
//! to another commit the marker no longer matches and the package gets
//! installed again. Remove a marker to force a reinstall.

use crate::{
    config::SourceSettings,
    manifest::PackageSpec,
    path::install_marker_path,
    provision::{Policy, Result, Session, Step, StepError},
};

use std::{
    fs::{read_dir, remove_file, write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Repository checkout exists.
#[derive(Debug, Clone)]
pub struct CloneStep {
    package: String,
    url: String,
}

impl CloneStep {
    /// Construct new clone step.
    pub fn new(package: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            url: url.into(),
        }
    }
}

impl Step for CloneStep {
    fn name(&self) -> String {
        format!("clone:{}", self.package)
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        Ok(session
            .repos
            .is_cloned(&session.context.package_dir(&self.package)))
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let dir = session.context.package_dir(&self.package);
        session.repos.clone_repo(&self.url, &dir)?;

        Ok(())
    }
}

/// Repository checkout matches its upstream.
#[derive(Debug, Clone)]
pub struct UpdateStep {
    package: String,
}

impl UpdateStep {
    /// Construct new update step.
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
        }
    }
}

impl Step for UpdateStep {
    fn name(&self) -> String {
        format!("update:{}", self.package)
    }

    fn policy(&self) -> Policy {
        Policy::Advisory(format!(
            "{} is not up to date, continuing with the current checkout",
            self.package
        ))
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        let dir = session.context.package_dir(&self.package);
        Ok(session.repos.is_current(&dir)?)
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let dir = session.context.package_dir(&self.package);
        session.repos.fast_forward(&dir)?;

        Ok(())
    }
}

/// Package manifest exists in the installer checkout.
///
/// Expands into clone, update, and install steps for every listed package,
/// in manifest order.
#[derive(Debug, Clone)]
pub struct PackagesStep {
    source: SourceSettings,
}

impl PackagesStep {
    /// Construct new packages step.
    pub fn new(source: SourceSettings) -> Self {
        Self { source }
    }

    fn manifest_path(&self, session: &Session<'_>) -> PathBuf {
        session
            .context
            .package_dir(&self.source.installer)
            .join(&self.source.package_manifest)
    }
}

impl Step for PackagesStep {
    fn name(&self) -> String {
        "packages".into()
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        Ok(self.manifest_path(session).is_file())
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        debug!(
            "package manifest {:?} is owned by {}, nothing to do",
            self.manifest_path(session).display(),
            self.source.installer
        );

        Ok(())
    }

    fn followups(&self, session: &mut Session<'_>) -> Result<Vec<Box<dyn Step>>> {
        let packages = session
            .manifests
            .load_package_list(&self.manifest_path(session))?;
        info!(
            "packages to provision: {}",
            packages
                .iter()
                .map(|package| package.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut steps: Vec<Box<dyn Step>> = Vec::new();
        for package in packages {
            steps.push(Box::new(CloneStep::new(
                &package.name,
                self.source.clone_url(&package.repo_ref),
            )));
            steps.push(Box::new(UpdateStep::new(&package.name)));
            steps.push(Box::new(InstallStep::new(package)));
        }

        Ok(steps)
    }
}

/// Package is installed into the conda environment.
#[derive(Debug, Clone)]
pub struct InstallStep {
    package: PackageSpec,
}

impl InstallStep {
    /// Construct new install step.
    pub fn new(package: PackageSpec) -> Self {
        Self { package }
    }

    /// Marker of the currently checked out revision, if there is a checkout.
    fn marker(&self, session: &Session<'_>) -> Result<Option<PathBuf>> {
        let dir = session.context.package_dir(&self.package.name);
        if !session.repos.is_cloned(&dir) {
            return Ok(None);
        }

        let revision = session.repos.head(&dir)?;
        Ok(Some(install_marker_path(
            session.context.current_dir(),
            &self.package.name,
            revision,
        )))
    }
}

impl Step for InstallStep {
    fn name(&self) -> String {
        format!("install:{}", self.package.name)
    }

    fn policy(&self) -> Policy {
        Policy::Fatal
    }

    fn is_satisfied(&self, session: &mut Session<'_>) -> Result<bool> {
        Ok(self.marker(session)?.is_some_and(|marker| marker.is_file()))
    }

    fn remediate(&self, session: &mut Session<'_>) -> Result<()> {
        let pip = session
            .context
            .pip()
            .ok_or_else(|| StepError::EnvironmentUnresolved {
                name: session.context.environment().name().to_string(),
            })?;
        let Some(marker) = self.marker(session)? else {
            warn!("{} has no checkout to install from", self.package.name);
            return Ok(());
        };
        let dir = session.context.package_dir(&self.package.name);

        let cmds = self
            .package
            .pip_invocations()
            .into_iter()
            .map(|args| session.context.command(&pip).args(args).current_dir(&dir))
            .collect::<Vec<_>>();
        if !session.run_all(cmds)? {
            return Ok(());
        }

        let io_error = |source| StepError::Io {
            source,
            path: marker.clone(),
        };
        if let Some(parent) = marker.parent() {
            mkdirp::mkdirp(parent).map_err(io_error)?;
        }
        write(&marker, format!("{}\n", self.package.repo_ref)).map_err(io_error)?;
        clear_stale_markers(&marker, &self.package.name)?;

        Ok(())
    }
}

// INVARIANT: At most one marker per package, the one of the latest install.
fn clear_stale_markers(marker: &Path, package: &str) -> Result<()> {
    let Some(dir) = marker.parent() else {
        return Ok(());
    };

    let io_error = |source| StepError::Io {
        source,
        path: dir.to_path_buf(),
    };
    let prefix = format!("{package}@");
    for entry in read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let stale = path
            .file_name()
            .map(|name| name.to_string_lossy().starts_with(&prefix))
            .unwrap_or(false);
        if stale && path != marker {
            debug!("remove stale install marker {:?}", path.display());
            remove_file(&path).map_err(|source| StepError::Io { source, path })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        exec::{Cmd, CommandRunner, RunResult},
        manifest::{EnvironmentSpec, ManifestLoader},
        provision::{Environment, Mode, Provisioner, StepStatus, WorkingContext},
        repo::RepoSync,
    };
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[derive(Default)]
    struct PipRunner {
        fail: bool,
        log: Vec<String>,
    }

    impl CommandRunner for PipRunner {
        fn execute(&mut self, cmd: &Cmd) -> crate::exec::Result<RunResult> {
            self.log.push(cmd.to_string());
            Ok(RunResult::with_code(if self.fail { 1 } else { 0 }))
        }

        fn locate(&self, _binary: &str, _search: &[PathBuf]) -> Option<PathBuf> {
            None
        }
    }

    struct LocalRepos {
        head: String,
    }

    impl LocalRepos {
        fn at(head: &str) -> Self {
            Self { head: head.into() }
        }
    }

    impl RepoSync for LocalRepos {
        fn is_cloned(&self, path: &Path) -> bool {
            path.is_dir()
        }

        fn clone_repo(&mut self, _url: &str, path: &Path) -> crate::repo::Result<()> {
            std::fs::create_dir_all(path)
                .map_err(|err| git2::Error::from_str(&err.to_string()).into())
        }

        fn is_current(&mut self, _path: &Path) -> crate::repo::Result<bool> {
            Ok(true)
        }

        fn fast_forward(&mut self, _path: &Path) -> crate::repo::Result<()> {
            Ok(())
        }

        fn head(&self, _path: &Path) -> crate::repo::Result<String> {
            Ok(self.head.clone())
        }
    }

    struct ListedManifests(Vec<PackageSpec>);

    impl ManifestLoader for ListedManifests {
        fn load_package_list(&self, _source: &Path) -> crate::manifest::Result<Vec<PackageSpec>> {
            Ok(self.0.clone())
        }

        fn load_environment_spec(&self, _source: &Path) -> crate::manifest::Result<EnvironmentSpec> {
            Ok(EnvironmentSpec::new())
        }
    }

    fn context() -> anyhow::Result<WorkingContext> {
        let mut context = WorkingContext::new(Environment::new("rs", "work", "3.8"))?;
        context.set_env_path("/conda/envs/rs");
        Ok(context)
    }

    #[sealed_test]
    fn install_writes_marker_after_success() -> anyhow::Result<()> {
        mkdirp::mkdirp("work/toolA")?;
        let mut runner = PipRunner::default();
        let mut repos = LocalRepos::at("9fceb02");
        let manifests = ListedManifests(Vec::new());
        let mut session = Session::new(context()?, &mut runner, &mut repos, &manifests);

        let step = InstallStep::new(PackageSpec::new("toolA", "RedesignScience/toolA"));
        assert!(!step.is_satisfied(&mut session)?);
        step.remediate(&mut session)?;
        assert!(step.is_satisfied(&mut session)?);

        let marker = install_marker_path(session.context.current_dir(), "toolA", "9fceb02");
        assert_eq!(std::fs::read_to_string(marker)?, "RedesignScience/toolA\n");
        assert_eq!(runner.log, vec!["/conda/envs/rs/bin/pip install -e ."]);

        Ok(())
    }

    #[sealed_test]
    fn moved_checkout_is_installed_again() -> anyhow::Result<()> {
        mkdirp::mkdirp("work/foamdb")?;
        let step = InstallStep::new(PackageSpec::new("foamdb", "RedesignScience/foamdb"));
        let manifests = ListedManifests(Vec::new());
        let mut runner = PipRunner::default();

        let mut repos = LocalRepos::at("9fceb02");
        let mut session = Session::new(context()?, &mut runner, &mut repos, &manifests);
        step.remediate(&mut session)?;
        assert!(step.is_satisfied(&mut session)?);
        let old_marker = install_marker_path(session.context.current_dir(), "foamdb", "9fceb02");

        let mut repos = LocalRepos::at("b4d1e5a");
        let mut session = Session::new(context()?, &mut runner, &mut repos, &manifests);
        assert!(!step.is_satisfied(&mut session)?);
        step.remediate(&mut session)?;
        assert!(step.is_satisfied(&mut session)?);

        assert!(!old_marker.exists());
        assert_eq!(runner.log.len(), 2);

        Ok(())
    }

    #[sealed_test]
    fn missing_checkout_is_not_installed() -> anyhow::Result<()> {
        let mut runner = PipRunner::default();
        let mut repos = LocalRepos::at("9fceb02");
        let manifests = ListedManifests(Vec::new());
        let mut session = Session::new(context()?, &mut runner, &mut repos, &manifests);

        let step = InstallStep::new(PackageSpec::new("toolA", "RedesignScience/toolA"));
        assert!(!step.is_satisfied(&mut session)?);
        step.remediate(&mut session)?;
        assert!(!step.is_satisfied(&mut session)?);
        assert!(runner.log.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn failed_install_leaves_no_marker() -> anyhow::Result<()> {
        mkdirp::mkdirp("work/foamdb")?;
        let mut runner = PipRunner {
            fail: true,
            ..Default::default()
        };
        let mut repos = LocalRepos::at("9fceb02");
        let manifests = ListedManifests(Vec::new());
        let mut session = Session::new(context()?, &mut runner, &mut repos, &manifests);

        let package = PackageSpec {
            extra_dependencies: vec!["sqlalchemy".into()],
            editable: false,
            ..PackageSpec::new("foamdb", "RedesignScience/foamdb")
        };
        let step = InstallStep::new(package);
        step.remediate(&mut session)?;
        assert!(!step.is_satisfied(&mut session)?);

        // INVARIANT: Stop at the first failing pip invocation.
        assert_eq!(runner.log, vec!["/conda/envs/rs/bin/pip install sqlalchemy"]);

        Ok(())
    }

    #[test]
    fn install_needs_resolved_environment() -> anyhow::Result<()> {
        let mut runner = PipRunner::default();
        let mut repos = LocalRepos::at("9fceb02");
        let manifests = ListedManifests(Vec::new());
        let context = WorkingContext::new(Environment::new("rs", "/work/rs", "3.8"))?;
        let mut session = Session::new(context, &mut runner, &mut repos, &manifests);

        let step = InstallStep::new(PackageSpec::new("toolA", "RedesignScience/toolA"));
        assert!(matches!(
            step.remediate(&mut session),
            Err(StepError::EnvironmentUnresolved { ref name }) if name == "rs"
        ));
        assert!(runner.log.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn manifest_expands_into_package_steps_in_order() -> anyhow::Result<()> {
        let source = SourceSettings::default();
        let manifest = Path::new("work")
            .join(&source.installer)
            .join(&source.package_manifest);
        mkdirp::mkdirp(manifest.parent().unwrap_or(Path::new("work")))?;
        std::fs::write(&manifest, "- pkgB\n- pkgA\n")?;

        let mut runner = PipRunner::default();
        let mut repos = LocalRepos::at("9fceb02");
        let manifests = ListedManifests(vec![
            PackageSpec::new("pkgB", "RedesignScience/pkgB"),
            PackageSpec::new("pkgA", "RedesignScience/pkgA"),
        ]);
        let mut session = Session::new(context()?, &mut runner, &mut repos, &manifests);

        let outcome = Provisioner::with_mode(Mode::Apply)
            .run(&mut session, vec![Box::new(PackagesStep::new(source))]);
        let names = outcome
            .report
            .records()
            .iter()
            .map(|record| record.name.as_str())
            .collect::<Vec<_>>();

        assert_eq!(
            names,
            vec![
                "packages",
                "clone:pkgB",
                "update:pkgB",
                "install:pkgB",
                "clone:pkgA",
                "update:pkgA",
                "install:pkgA",
            ]
        );
        assert_eq!(outcome.report.status("packages"), Some(&StepStatus::AlreadySatisfied));
        assert_eq!(outcome.report.remediated(), 4);
        assert!(outcome.is_success());

        Ok(())
    }
}
