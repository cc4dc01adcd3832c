// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use rs_install::{
    exec::ProcessRunner,
    manifest::FileManifestLoader,
    path::{default_config_path, launcher_path},
    provision::{plan::standard_plan, Environment, Halt, Mode, Outcome, WorkingContext},
    repo::Git2Sync,
    Provisioner, Session, Settings,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::{env::current_exe, fs::read_to_string, path::PathBuf, process::exit};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "provision [options] [environment_name] [target_directory]",
    version
)]
struct Cli {
    /// Name of conda environment to provision.
    #[arg(value_name = "environment_name")]
    pub environment: Option<String>,

    /// Directory packages are cloned into, named after the environment by default.
    #[arg(value_name = "target_directory")]
    pub target_dir: Option<PathBuf>,

    /// Use configuration file instead of the default one.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Only report what is missing, change nothing.
    #[arg(long, conflicts_with = "print_config")]
    pub check: bool,

    /// Print effective configuration and exit.
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Environment to provision, falling back to configured defaults.
    ///
    /// The target directory defaults to a directory named after the
    /// environment, relative to the current directory.
    fn environment(&self, settings: &Settings) -> Environment {
        let name = self
            .environment
            .clone()
            .unwrap_or_else(|| settings.environment.name.clone());
        let target_dir = self
            .target_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&name));

        Environment::new(&name, target_dir, &settings.environment.python)
    }

    fn run(self) -> Result<i32> {
        let settings = load_settings(self.config.as_ref())?;
        if self.print_config {
            print!("{settings}");
            return Ok(0);
        }

        let environment = self.environment(&settings);
        let name = environment.name().to_string();
        let context = WorkingContext::new(environment)
            .context("cannot resolve absolute target directory")?;
        info!(
            "provision {name:?} environment in {:?}",
            context.current_dir().display()
        );

        let mode = if self.check { Mode::Check } else { Mode::Apply };
        let steps = standard_plan(&settings, current_exe()?);
        let mut runner = ProcessRunner::new();
        let mut repos = Git2Sync::new();
        let manifests = FileManifestLoader::new(settings.source.clone(), settings.packages.clone());
        let mut session = Session::new(context, &mut runner, &mut repos, &manifests);

        let outcome = Provisioner::with_mode(mode).run(&mut session, steps);
        summarize(&outcome, &session);

        Ok(outcome.exit_code())
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match Cli::parse().run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:?}");
            exit(1);
        }
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.clone(),
        None => match default_config_path() {
            Ok(path) if path.is_file() => path,
            _ => return Ok(Settings::try_default()?),
        },
    };

    let data = read_to_string(&path)
        .with_context(|| format!("cannot read configuration {:?}", path.display()))?;
    let settings = data
        .parse::<Settings>()
        .with_context(|| format!("invalid configuration {:?}", path.display()))?;

    Ok(settings)
}

fn summarize(outcome: &Outcome, session: &Session<'_>) {
    match &outcome.halt {
        Some(Halt::Resume { step, action }) => {
            warn!("{step}: {action}");
            warn!(
                "provisioning paused, rerun {:?} when done",
                launcher_path(session.context.current_dir()).display()
            );
        }
        Some(halt @ Halt::Unremediated { .. }) => error!("{halt}"),
        Some(halt @ Halt::Error { source, .. }) => error!("{halt}: {source}"),
        None if outcome.mode == Mode::Check => {
            let unsatisfied = outcome.report.unsatisfied();
            if unsatisfied.is_empty() {
                info!("everything is provisioned");
            } else {
                warn!("unsatisfied steps: {}", unsatisfied.join(", "));
            }
        }
        None => {
            info!(
                "packages are installed in {:?}",
                session.context.current_dir().display()
            );
            info!(
                "activate the environment with `conda activate {}`",
                session.context.environment().name()
            );
        }
    }
}
