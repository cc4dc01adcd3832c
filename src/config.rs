// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the provisioning configuration file to simplify the
//! process of serialization and deserialization. File I/O is left to the
//! caller to figure out.
//!
//! Every section is optional. Missing sections fall back to the defaults of
//! the historical R_S installer, so an empty file and no file at all describe
//! the same machine.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Provisioning settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Conda environment to provision.
    pub environment: EnvironmentSettings,

    /// Where internally developed packages are cloned from.
    pub source: SourceSettings,

    /// Miniconda bootstrap.
    pub conda: CondaSettings,

    /// Command-line utilities that must be available before anything else.
    #[serde(rename = "tool")]
    pub tools: Vec<ToolSettings>,

    /// Per-package install overrides keyed by package name.
    #[serde(rename = "package")]
    pub packages: BTreeMap<String, PackageOverride>,

    /// Advisory credential checks.
    #[serde(rename = "credential")]
    pub credentials: Vec<CredentialSettings>,
}

impl Settings {
    /// Default settings with path expansion applied.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if a path references an
    ///   unset environment variable.
    pub fn try_default() -> Result<Self> {
        Self::default().expand_paths()
    }

    // INVARIANT: Every path-like field goes through shell expansion exactly once.
    fn expand_paths(mut self) -> Result<Self> {
        self.conda.prefix = expand(&self.conda.prefix)?;
        for tool in &mut self.tools {
            tool.search = tool
                .search
                .iter()
                .map(expand)
                .collect::<Result<Vec<_>>>()?;
        }
        for credential in &mut self.credentials {
            credential.path = expand(&credential.path)?;
        }

        Ok(self)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: EnvironmentSettings::default(),
            source: SourceSettings::default(),
            conda: CondaSettings::default(),
            tools: vec![
                ToolSettings {
                    binary: "brew".into(),
                    install: vec![
                        vec![
                            "curl".into(),
                            "-fsSL".into(),
                            "-o".into(),
                            "brew-install.sh".into(),
                            "https://raw.githubusercontent.com/Homebrew/install/HEAD/install.sh"
                                .into(),
                        ],
                        vec!["/bin/bash".into(), "brew-install.sh".into()],
                    ],
                    search: vec!["/opt/homebrew/bin".into(), "/usr/local/bin".into()],
                },
                ToolSettings::brew("wget"),
                ToolSettings::brew("gh"),
                ToolSettings::brew("git"),
            ],
            packages: BTreeMap::from([(
                "foamdb".into(),
                PackageOverride {
                    extra_dependencies: vec![
                        "sqlalchemy".into(),
                        "alembic".into(),
                        "psycopg2-binary".into(),
                    ],
                    editable: false,
                },
            )]),
            credentials: vec![
                CredentialSettings {
                    path: "~/.aws/credentials".into(),
                    guidance: "run `aws configure` to store your access keys".into(),
                    expect: None,
                },
                CredentialSettings {
                    path: "~/.aws/config".into(),
                    guidance: "set `region = us-east-1` under [default] in ~/.aws/config".into(),
                    expect: Some(ExpectedKey {
                        section: "default".into(),
                        key: "region".into(),
                        value: "us-east-1".into(),
                    }),
                },
            ],
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let settings: Settings = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;
        settings.expand_paths()
    }
}

impl Display for Settings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Conda environment settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Default environment name when none is given on the command line.
    pub name: String,

    /// Python version used when the environment is created.
    pub python: String,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            name: "rs".into(),
            python: "3.8".into(),
        }
    }
}

/// Source control settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Base URL of the hosting service.
    pub host: String,

    /// Organization owning every repository.
    pub organization: String,

    /// Repository holding the manifests.
    pub installer: String,

    /// Package manifest, relative to the installer checkout.
    pub package_manifest: PathBuf,

    /// Conda environment manifest, relative to the installer checkout.
    pub environment_manifest: PathBuf,
}

impl SourceSettings {
    /// Repository reference of the form `organization/name`.
    pub fn repo_ref(&self, name: impl AsRef<str>) -> String {
        format!("{}/{}", self.organization, name.as_ref())
    }

    /// Clone URL for a repository reference.
    pub fn clone_url(&self, repo_ref: impl AsRef<str>) -> String {
        format!("{}/{}.git", self.host.trim_end_matches('/'), repo_ref.as_ref())
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            host: "https://github.com".into(),
            organization: "RedesignScience".into(),
            installer: "rs_install".into(),
            package_manifest: "packages.yaml".into(),
            environment_manifest: "rs_mac_conda_env.yaml".into(),
        }
    }
}

/// Miniconda bootstrap settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CondaSettings {
    /// Installer script name.
    pub installer: String,

    /// Base URL the installer script is downloaded from.
    pub url: String,

    /// Installation prefix for batch mode installs.
    pub prefix: PathBuf,
}

impl CondaSettings {
    /// Full download URL of the installer script.
    pub fn installer_url(&self) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), self.installer)
    }

    /// Directories where a fresh install exposes `conda`.
    pub fn search(&self) -> Vec<PathBuf> {
        vec![self.prefix.join("bin"), self.prefix.join("condabin")]
    }
}

impl Default for CondaSettings {
    fn default() -> Self {
        // Must use x86 and rely on Rosetta.
        Self {
            installer: "Miniconda3-latest-MacOSX-x86_64.sh".into(),
            url: "https://repo.anaconda.com/miniconda".into(),
            prefix: "~/miniconda3".into(),
        }
    }
}

/// Command-line utility to make available.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ToolSettings {
    /// Binary name looked up on the search path.
    pub binary: String,

    /// Commands run in order to install the binary.
    pub install: Vec<Vec<String>>,

    /// Extra directories where the binary may land after install.
    #[serde(default)]
    pub search: Vec<PathBuf>,
}

impl ToolSettings {
    /// Tool installed through Homebrew.
    pub fn brew(binary: impl Into<String>) -> Self {
        let binary = binary.into();
        Self {
            install: vec![vec!["brew".into(), "install".into(), binary.clone()]],
            binary,
            search: Vec::new(),
        }
    }
}

/// Install override for a single package.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct PackageOverride {
    /// Dependencies installed before the package itself.
    #[serde(default)]
    pub extra_dependencies: Vec<String>,

    /// Install in editable (development) mode.
    #[serde(default = "editable_by_default")]
    pub editable: bool,
}

fn editable_by_default() -> bool {
    true
}

/// Advisory credential check.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct CredentialSettings {
    /// Well-known location of the credential or config file.
    pub path: PathBuf,

    /// What the user should do when the check fails.
    pub guidance: String,

    /// Key that must hold an exact value.
    pub expect: Option<ExpectedKey>,
}

/// Key that must equal an expected literal.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ExpectedKey {
    /// Section holding the key, empty for keys before any section header.
    #[serde(default)]
    pub section: String,

    /// Key name.
    pub key: String,

    /// Expected value.
    pub value: String,
}

fn expand(path: impl AsRef<Path>) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.as_ref().to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    #[sealed_test(env = [("HOME", "/home/blah"), ("AWS_DIR", "/srv/aws")])]
    fn deserialize_partial_settings() -> anyhow::Result<()> {
        let result: Settings = indoc! {r#"
            [environment]
            name = "science"

            [conda]
            prefix = "~/conda"

            [[tool]]
            binary = "jq"
            install = [["brew", "install", "jq"]]

            [package.rshow]
            extra_dependencies = ["pyqt5"]

            [[credential]]
            path = "$AWS_DIR/credentials"
            guidance = "ask for keys"
        "#}
        .parse()?;

        assert_eq!(result.environment.name, "science");
        assert_eq!(result.environment.python, "3.8");
        assert_eq!(result.conda.prefix, PathBuf::from("/home/blah/conda"));
        assert_eq!(result.conda.installer, CondaSettings::default().installer);
        assert_eq!(result.tools, vec![ToolSettings::brew("jq")]);
        assert_eq!(
            result.packages.get("rshow"),
            Some(&PackageOverride {
                extra_dependencies: vec!["pyqt5".into()],
                editable: true,
            })
        );
        assert_eq!(
            result.credentials,
            vec![CredentialSettings {
                path: "/srv/aws/credentials".into(),
                guidance: "ask for keys".into(),
                expect: None,
            }]
        );

        Ok(())
    }

    #[sealed_test(env = [("HOME", "/home/blah")])]
    fn default_settings_expand_home() -> anyhow::Result<()> {
        let settings = Settings::try_default()?;

        assert_eq!(settings.conda.prefix, PathBuf::from("/home/blah/miniconda3"));
        assert_eq!(
            settings.conda.search(),
            vec![
                PathBuf::from("/home/blah/miniconda3/bin"),
                PathBuf::from("/home/blah/miniconda3/condabin"),
            ]
        );
        assert_eq!(
            settings.credentials[0].path,
            PathBuf::from("/home/blah/.aws/credentials")
        );

        Ok(())
    }

    #[test]
    fn unset_variable_is_an_error() {
        let result = indoc! {r#"
            [[credential]]
            path = "$RS_INSTALL_SURELY_UNSET_VARIABLE/credentials"
            guidance = "nothing"
        "#}
        .parse::<Settings>();

        assert!(matches!(result, Err(ConfigError::ShellExpansion(_))));
    }

    #[test]
    fn source_urls() {
        let source = SourceSettings::default();

        assert_eq!(source.repo_ref("foamdb"), "RedesignScience/foamdb");
        assert_eq!(
            source.clone_url(source.repo_ref("foamdb")),
            "https://github.com/RedesignScience/foamdb.git"
        );
        assert_eq!(
            CondaSettings::default().installer_url(),
            "https://repo.anaconda.com/miniconda/Miniconda3-latest-MacOSX-x86_64.sh"
        );
    }

    #[test]
    fn serialize_environment_section() {
        let settings = Settings {
            tools: Vec::new(),
            packages: BTreeMap::new(),
            credentials: Vec::new(),
            ..Settings::default()
        };
        let result = settings.to_string();

        assert!(result.contains(indoc! {r#"
            [environment]
            name = "rs"
            python = "3.8"
        "#}));
    }
}
