// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Standard provisioning plan.

use crate::{
    config::{Settings, ToolSettings},
    provision::{
        credential::CredentialStep,
        launcher::LauncherStep,
        packages::{CloneStep, PackagesStep, UpdateStep},
        toolchain::{CondaEnvStep, CondaStep, DirectoryStep, EnvUpdateStep, GithubAuthStep, ToolStep},
        Step,
    },
};

use std::path::PathBuf;

/// Build the ordered steps of a full provisioning run.
///
/// Later steps rely on what earlier steps establish. The installer repository
/// must be cloned before its manifests can be read, and the conda environment
/// must be resolved before anything is installed into it.
pub fn standard_plan(settings: &Settings, launcher_program: impl Into<PathBuf>) -> Vec<Box<dyn Step>> {
    let source = &settings.source;
    let mut steps: Vec<Box<dyn Step>> = vec![
        Box::new(DirectoryStep),
        Box::new(LauncherStep::new(launcher_program)),
    ];

    steps.extend(
        settings
            .tools
            .iter()
            .cloned()
            .map(|tool| Box::new(ToolStep::new(tool)) as Box<dyn Step>),
    );

    steps.push(Box::new(CondaStep::new(settings.conda.clone())));
    steps.push(Box::new(CondaEnvStep));
    steps.push(Box::new(GithubAuthStep));
    steps.push(Box::new(CloneStep::new(
        &source.installer,
        source.clone_url(source.repo_ref(&source.installer)),
    )));
    steps.push(Box::new(UpdateStep::new(&source.installer)));
    steps.push(Box::new(ToolStep::new(mamba(settings))));
    steps.push(Box::new(EnvUpdateStep::new(
        &source.installer,
        &source.environment_manifest,
    )));

    steps.extend(
        settings
            .credentials
            .iter()
            .cloned()
            .map(|credential| Box::new(CredentialStep::new(credential)) as Box<dyn Step>),
    );

    steps.push(Box::new(PackagesStep::new(source.clone())));
    steps
}

// INVARIANT: mamba lives in the conda base environment.
fn mamba(settings: &Settings) -> ToolSettings {
    ToolSettings {
        binary: "mamba".into(),
        install: vec![vec![
            "conda".into(),
            "install".into(),
            "-y".into(),
            "mamba".into(),
        ]],
        search: settings.conda.search(),
    }
}
