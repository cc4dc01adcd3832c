// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    installer_repos, installer_repos_with_environment, local_settings, provision, FakeMachine,
    FAKE_ENVS,
};

use rs_install::provision::{Halt, Mode, StepStatus, EXIT_FAILURE, EXIT_RESUME, EXIT_SUCCESS};

use anyhow::Result;
use indoc::{formatdoc, indoc};
use pretty_assertions::assert_eq;
use sealed_test::prelude::*;
use std::fs::{create_dir_all, read_to_string, write};

fn pip() -> String {
    format!("{FAKE_ENVS}/rs/bin/pip")
}

fn write_aws_files() -> Result<()> {
    create_dir_all("aws")?;
    write("aws/credentials", "[default]\naws_access_key_id = AKIA\n")?;
    write("aws/config", "[default]\nregion = us-east-1\n")?;
    Ok(())
}

#[sealed_test]
fn fresh_machine_installs_generic_and_special_packages() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new();
    let mut repos = installer_repos(&settings, &["toolA", "foamdb"]);
    write_aws_files()?;

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert!(outcome.halt.is_none());
    assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
    assert_eq!(outcome.report.unsatisfied(), Vec::<&str>::new());
    assert_eq!(
        machine.pip_calls(),
        vec![
            ("toolA".to_string(), format!("{} install -e .", pip())),
            (
                "foamdb".to_string(),
                format!("{} install sqlalchemy alembic psycopg2-binary", pip())
            ),
            ("foamdb".to_string(), format!("{} install .", pip())),
        ]
    );
    assert_eq!(repos.cloned, vec!["rs_install", "toolA", "foamdb"]);

    Ok(())
}

#[sealed_test]
fn fresh_machine_bootstraps_toolchain_in_order() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new();
    let mut repos = installer_repos(&settings, &[]);

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;
    let streamed = machine.streamed();
    let position = |needle: &str| {
        streamed
            .iter()
            .position(|line| line.contains(needle))
            .expect(needle)
    };

    assert!(outcome.is_success());
    assert!(position("brew-install.sh") < position("brew install wget"));
    assert!(position("brew install git") < position("Miniconda3-latest-MacOSX-x86_64.sh"));
    assert!(position("conda create -n rs -y python=3.8") < position("gh auth login"));
    assert!(position("gh auth setup-git") < position("conda install -y mamba"));
    assert!(position("conda install -y mamba") < position("mamba env update -n rs -f"));
    assert!(machine.environment_updated);

    Ok(())
}

#[sealed_test]
fn packages_install_in_manifest_order() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::tooled();
    let mut repos = installer_repos(&settings, &["pkgA", "pkgB", "pkgC"]);

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;
    let order = machine
        .pip_calls()
        .into_iter()
        .map(|(dir, _)| dir)
        .collect::<Vec<_>>();

    assert!(outcome.is_success());
    assert_eq!(order, vec!["pkgA", "pkgB", "pkgC"]);

    Ok(())
}

#[sealed_test]
fn rerun_converges_without_remediation() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new();
    let mut repos = installer_repos(&settings, &["toolA", "foamdb"]);

    let first = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;
    assert!(first.is_success());
    assert!(first.report.remediated() > 0);

    let streamed = machine.streamed().len();
    let second = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert!(second.is_success());
    assert_eq!(second.report.remediated(), 0);
    assert_eq!(machine.streamed().len(), streamed);
    assert_eq!(repos.cloned, vec!["rs_install", "toolA", "foamdb"]);

    Ok(())
}

#[sealed_test]
fn upstream_commit_reinstalls_package() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new();
    let mut repos = installer_repos(&settings, &["toolA", "foamdb"]);

    assert!(provision(&settings, Mode::Apply, &mut machine, &mut repos)?.is_success());
    let installed = machine.pip_calls().len();

    repos.advance("foamdb");
    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert!(outcome.is_success());
    assert_eq!(outcome.report.status("update:foamdb"), Some(&StepStatus::Remediated));
    assert_eq!(outcome.report.status("install:foamdb"), Some(&StepStatus::Remediated));
    assert_eq!(
        outcome.report.status("install:toolA"),
        Some(&StepStatus::AlreadySatisfied)
    );
    assert_eq!(
        machine.pip_calls()[installed..].to_vec(),
        vec![
            (
                "foamdb".to_string(),
                format!("{} install sqlalchemy alembic psycopg2-binary", pip())
            ),
            ("foamdb".to_string(), format!("{} install .", pip())),
        ]
    );

    Ok(())
}

#[sealed_test]
fn common_environment_forms_converge() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new().provides(&[
        ("numpy", "1.21.5"),
        ("openmm", "7.7.0"),
        ("pyyaml", "6.0.1"),
    ]);
    let mut repos = installer_repos_with_environment(
        &settings,
        &["toolA"],
        indoc! {r#"
            name: rs
            channels:
              - conda-forge
            dependencies:
              - python 3.8
              - numpy=1.21.5=py38h6c91a56_3
              - conda-forge::openmm
              - pip:
                - PyYAML
        "#},
    );

    let first = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;
    assert!(first.is_success());
    assert_eq!(
        first.report.status("environment-update"),
        Some(&StepStatus::Remediated)
    );

    let second = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;
    assert!(second.is_success());
    assert_eq!(
        second.report.status("environment-update"),
        Some(&StepStatus::AlreadySatisfied)
    );
    assert_eq!(second.report.remediated(), 0);

    Ok(())
}

#[sealed_test]
fn environment_lacking_after_update_halts() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new();
    let mut repos = installer_repos_with_environment(
        &settings,
        &["toolA"],
        "name: rs\ndependencies:\n  - python=3.8\n  - numpy\n  - scipy\n",
    );

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert!(machine.environment_updated);
    assert!(matches!(
        outcome.halt,
        Some(Halt::Unremediated { ref step }) if step == "environment-update"
    ));
    assert_eq!(outcome.exit_code(), EXIT_FAILURE);
    assert_eq!(outcome.report.status("credential:aws/credentials"), None);
    assert_eq!(repos.cloned, vec!["rs_install"]);
    assert!(machine.pip_calls().is_empty());

    Ok(())
}

#[sealed_test]
fn launcher_reinvokes_with_resolved_arguments() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::tooled();
    let mut repos = installer_repos(&settings, &[]);

    provision(&settings, Mode::Apply, &mut machine, &mut repos)?;
    let target = std::env::current_dir()?.join("work/rs");
    let script = read_to_string(target.join("reprovision"))?;

    assert_eq!(
        script,
        formatdoc! {r#"
            #!/bin/sh
            # Rerun provisioning of the "rs" environment in this directory.
            exec '/usr/local/bin/provision' 'rs' '{}' "$@"
        "#, target.display()}
    );

    Ok(())
}

#[sealed_test]
fn fatal_tool_failure_halts_before_conda() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new().refuse("gh");
    let mut repos = installer_repos(&settings, &["toolA"]);

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert!(matches!(
        outcome.halt,
        Some(Halt::Unremediated { ref step }) if step == "tool:gh"
    ));
    assert_eq!(outcome.exit_code(), EXIT_FAILURE);
    assert_eq!(outcome.report.status("tool:git"), None);
    assert_eq!(outcome.report.status("conda"), None);
    assert!(repos.cloned.is_empty());

    Ok(())
}

#[sealed_test]
fn failed_login_asks_to_resume() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::tooled().login_fails();
    machine.github_authed = false;
    let mut repos = installer_repos(&settings, &["toolA"]);

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert!(matches!(
        outcome.halt,
        Some(Halt::Resume { ref step, .. }) if step == "github-auth"
    ));
    assert_eq!(outcome.exit_code(), EXIT_RESUME);
    assert!(repos.cloned.is_empty());

    Ok(())
}

#[sealed_test]
fn failed_conda_init_mentions_shell_hooks() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new().init_fails();
    let mut repos = installer_repos(&settings, &["toolA"]);

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert!(matches!(
        outcome.halt,
        Some(Halt::Resume { ref step, ref action })
            if step == "conda" && action.contains("shell hooks may be missing")
    ));
    assert_eq!(outcome.exit_code(), EXIT_RESUME);
    assert_eq!(outcome.report.status("environment"), None);

    let mut machine = FakeMachine { init_fails: false, ..machine };
    let rerun = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;
    assert_eq!(rerun.report.status("conda"), Some(&StepStatus::AlreadySatisfied));
    assert!(rerun.is_success());

    Ok(())
}

#[sealed_test]
fn missing_credentials_only_advise() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::tooled();
    let mut repos = installer_repos(&settings, &["toolA"]);
    create_dir_all("aws")?;
    write("aws/config", "[default]\nregion = eu-west-1\n")?;

    let outcome = provision(&settings, Mode::Apply, &mut machine, &mut repos)?;

    assert_eq!(
        outcome.report.unsatisfied(),
        vec!["credential:aws/credentials", "credential:aws/config"]
    );
    assert_eq!(
        outcome.report.status("install:toolA"),
        Some(&StepStatus::Remediated)
    );
    assert_eq!(outcome.exit_code(), EXIT_SUCCESS);

    Ok(())
}

#[sealed_test]
fn check_mode_changes_nothing() -> Result<()> {
    let settings = local_settings();
    let mut machine = FakeMachine::new();
    let mut repos = installer_repos(&settings, &["toolA"]);

    let outcome = provision(&settings, Mode::Check, &mut machine, &mut repos)?;

    assert!(machine.streamed().is_empty());
    assert!(repos.cloned.is_empty());
    assert!(!std::path::Path::new("work/rs").exists());
    assert_eq!(outcome.report.status("directory"), Some(&StepStatus::Unsatisfied));
    assert_eq!(outcome.exit_code(), EXIT_FAILURE);

    Ok(())
}
