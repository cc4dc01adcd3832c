// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package and environment manifests.
//!
//! Both manifests are owned by the installer repository, not by us. They look
//! like YAML, but we never need more than a handful of list items out of them,
//! so they are read with lenient line grammars instead of a YAML parser.
//!
//! # Package Manifest
//!
//! Any line whose first whitespace separated token is a lone `-` names a
//! package through its second token:
//!
//! ```text
//! packages:
//!   - rseed
//!   - foamdb   # keeps working with trailing comments
//! ```
//!
//! Everything else is ignored. Order is preserved because packages may depend
//! on packages listed before them. Repeated names keep their first position.
//!
//! # Environment Manifest
//!
//! A conda environment file. Items of the top-level `dependencies:` block are
//! read as `name`, `name=version`, `name==version`, or `name version`. A
//! channel qualifier (`conda-forge::openmm`) is dropped, and so is a build
//! string after the version (`numpy=1.21.5=py38h6c91a56_3`). Items of nested
//! blocks (like `pip:`) and items using any other comparison operator are
//! recorded without a version, which means "must be present". Items that do
//! not name a package at all, like pip URLs, are skipped.
//!
//! Names are compared the way conda and pip list them: case-insensitive, with
//! `_` and `-` treated as equal.

use crate::config::{PackageOverride, SourceSettings};

use std::{
    collections::{BTreeMap, HashSet},
    fs::read_to_string,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument, warn};

/// Package to clone and install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Package name, also the checkout directory name.
    pub name: String,

    /// Repository reference of the form `organization/name`.
    pub repo_ref: String,

    /// Dependencies installed before the package itself.
    pub extra_dependencies: Vec<String>,

    /// Install in editable (development) mode.
    pub editable: bool,
}

impl PackageSpec {
    /// Construct package spec with the generic editable install.
    pub fn new(name: impl Into<String>, repo_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo_ref: repo_ref.into(),
            extra_dependencies: Vec::new(),
            editable: true,
        }
    }

    /// Apply install override.
    pub fn with_override(mut self, install: &PackageOverride) -> Self {
        self.extra_dependencies = install.extra_dependencies.clone();
        self.editable = install.editable;
        self
    }

    /// Argument lists passed to `pip`, in order.
    pub fn pip_invocations(&self) -> Vec<Vec<String>> {
        let mut invocations = Vec::new();
        if !self.extra_dependencies.is_empty() {
            let mut args = vec!["install".to_string()];
            args.extend(self.extra_dependencies.iter().cloned());
            invocations.push(args);
        }

        if self.editable {
            invocations.push(vec!["install".into(), "-e".into(), ".".into()]);
        } else {
            invocations.push(vec!["install".into(), ".".into()]);
        }

        invocations
    }
}

/// Environment tool versions keyed by tool name.
///
/// A `None` version means any installed version satisfies the manifest.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    tools: BTreeMap<String, Option<String>>,
}

impl EnvironmentSpec {
    /// Construct empty environment spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record tool with optional version constraint.
    pub fn insert(&mut self, name: impl AsRef<str>, version: Option<String>) {
        self.tools.insert(normalize_name(name.as_ref()), version);
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<Option<&str>> {
        self.tools
            .get(&normalize_name(name.as_ref()))
            .map(Option::as_deref)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.tools
            .iter()
            .map(|(name, version)| (name.as_str(), version.as_deref()))
    }

    /// List tools that `installed` does not satisfy.
    ///
    /// `installed` maps package names to versions, as reported by
    /// `conda list`. A constraint `=1.2` matches any version with that
    /// prefix at a component boundary, `==1.2` only matches exactly.
    pub fn missing_from(&self, installed: &BTreeMap<String, String>) -> Vec<String> {
        let installed = installed
            .iter()
            .map(|(name, version)| (normalize_name(name), version.as_str()))
            .collect::<BTreeMap<_, _>>();

        self.tools
            .iter()
            .filter(|(name, version)| match (installed.get(name.as_str()), version) {
                (None, _) => true,
                (Some(_), None) => false,
                (Some(found), Some(wanted)) => !version_matches(found, wanted),
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Canonical form of a package name, e.g., `PyYAML` becomes `pyyaml`.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', "-")
}

fn version_matches(found: &str, wanted: &str) -> bool {
    if let Some(exact) = wanted.strip_prefix('=') {
        return found == exact;
    }

    let wanted = wanted.trim_end_matches(".*").trim_end_matches('*');
    found == wanted
        || found
            .strip_prefix(wanted)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Parse package manifest contents.
pub fn parse_package_list(content: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some("-") {
            continue;
        }

        let Some(name) = tokens.next() else {
            continue;
        };

        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        } else {
            warn!("package {name} listed more than once, keeping first entry");
        }
    }

    names
}

/// Parse conda environment file contents.
pub fn parse_environment_spec(content: &str) -> EnvironmentSpec {
    let mut spec = EnvironmentSpec::new();
    let mut in_dependencies = false;
    let mut item_indent: Option<usize> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let indent = line.len() - line.trim_start().len();
        if indent == 0 && !trimmed.starts_with('-') {
            in_dependencies = trimmed == "dependencies:";
            item_indent = None;
            continue;
        }

        if !in_dependencies {
            continue;
        }

        let Some(item) = trimmed.strip_prefix('-').map(str::trim) else {
            continue;
        };

        // INVARIANT: First item fixes the indentation of top-level items.
        let top_level = *item_indent.get_or_insert(indent) == indent;
        let item = item.split('#').next().unwrap_or_default().trim();
        if item.is_empty() || item.ends_with(':') {
            continue;
        }

        let Some((name, version)) = split_requirement(item) else {
            debug!("cannot read package out of {item:?}, skipping it");
            continue;
        };

        spec.insert(name, version.filter(|_| top_level));
    }

    spec
}

fn split_requirement(item: &str) -> Option<(String, Option<String>)> {
    let item = item.rsplit("::").next().unwrap_or(item).trim();
    let end = item
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(item.len());
    let (name, rest) = item.split_at(end);
    if name.is_empty() || name.starts_with('-') {
        return None;
    }

    // Pip extras, e.g., `dask[complete]`.
    let rest = match rest.strip_prefix('[') {
        Some(extras) => extras.split_once(']')?.1,
        None => rest,
    };

    let rest = rest.trim_start();
    let (exact, version) = if rest.is_empty() || rest.starts_with(['<', '>', '!', '~']) {
        return Some((name.to_string(), None));
    } else if let Some(version) = rest.strip_prefix("==") {
        (true, version)
    } else if let Some(version) = rest.strip_prefix('=') {
        (false, version)
    } else if rest.starts_with(|c: char| c.is_ascii_digit()) {
        (false, rest)
    } else {
        return None;
    };

    // INVARIANT: Version ends where a build string starts.
    let version = version
        .split(|c: char| c == '=' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    if version.is_empty() || version.contains(['<', '>', '!', '~', ',', '|']) {
        return Some((name.to_string(), None));
    }

    let version = if exact {
        format!("={version}")
    } else {
        version.to_string()
    };

    Some((name.to_string(), Some(version)))
}

/// Parse `conda list` output into package name and version pairs.
pub fn parse_conda_list(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            Some((normalize_name(tokens.next()?), tokens.next()?.to_string()))
        })
        .collect()
}

/// Load manifests owned by the installer repository.
pub trait ManifestLoader {
    /// Load ordered package listing.
    fn load_package_list(&self, source: &Path) -> Result<Vec<PackageSpec>>;

    /// Load environment tool versions.
    fn load_environment_spec(&self, source: &Path) -> Result<EnvironmentSpec>;
}

/// Manifest loader reading files from disk.
///
/// Package names are turned into full specs using the organization from the
/// source settings and any configured install overrides.
#[derive(Debug, Clone)]
pub struct FileManifestLoader {
    source: SourceSettings,
    overrides: BTreeMap<String, PackageOverride>,
}

impl FileManifestLoader {
    /// Construct new file manifest loader.
    pub fn new(source: SourceSettings, overrides: BTreeMap<String, PackageOverride>) -> Self {
        Self { source, overrides }
    }

    fn read(&self, source: &Path) -> Result<String> {
        read_to_string(source).map_err(|err| ManifestError::Read {
            source: err,
            path: source.to_path_buf(),
        })
    }
}

impl ManifestLoader for FileManifestLoader {
    #[instrument(skip(self), level = "debug")]
    fn load_package_list(&self, source: &Path) -> Result<Vec<PackageSpec>> {
        let packages = parse_package_list(&self.read(source)?)
            .into_iter()
            .map(|name| {
                let spec = PackageSpec::new(&name, self.source.repo_ref(&name));
                match self.overrides.get(&name) {
                    Some(install) => spec.with_override(install),
                    None => spec,
                }
            })
            .collect::<Vec<_>>();
        debug!("loaded {} packages from {:?}", packages.len(), source.display());

        Ok(packages)
    }

    #[instrument(skip(self), level = "debug")]
    fn load_environment_spec(&self, source: &Path) -> Result<EnvironmentSpec> {
        Ok(parse_environment_spec(&self.read(source)?))
    }
}

/// Manifest error types.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest file cannot be read.
    #[error("failed to read manifest at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ManifestError> = std::result::Result<T, E>;
