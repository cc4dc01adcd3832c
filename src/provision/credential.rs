// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Credential and config presence checks.
//!
//! These checks are advisory. Credentials are acquired by the user through
//! tools we do not control, so a failed check only prints guidance. Nothing
//! here ever writes to a credential file.

use crate::{
    config::{CredentialSettings, ExpectedKey},
    kv::KvDocument,
    provision::{Policy, Result, Session, Step, StepError},
};

use std::{fs::read_to_string, path::Path};
use tracing::debug;

/// Check if a credential or config file exists.
pub fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// Parse a credential or config file with the lenient key/value grammar.
///
/// # Errors
///
/// - Return [`StepError::Io`] if the file cannot be read.
pub fn parse(path: impl AsRef<Path>) -> Result<KvDocument> {
    read_to_string(path.as_ref())
        .map(KvDocument::from)
        .map_err(|err| StepError::Io {
            source: err,
            path: path.as_ref().to_path_buf(),
        })
}

/// Credential file is present and holds the expected key.
#[derive(Debug, Clone)]
pub struct CredentialStep {
    credential: CredentialSettings,
}

impl CredentialStep {
    /// Construct new credential step.
    pub fn new(credential: CredentialSettings) -> Self {
        Self { credential }
    }

    fn key_matches(&self, expect: &ExpectedKey) -> Result<bool> {
        let document = parse(&self.credential.path)?;
        let found = document.get(&expect.section, &expect.key);
        debug!(
            "{}: [{}] {} = {found:?}",
            self.credential.path.display(),
            expect.section,
            expect.key
        );

        Ok(found == Some(expect.value.as_str()))
    }
}

impl Step for CredentialStep {
    fn name(&self) -> String {
        format!("credential:{}", self.credential.path.display())
    }

    fn policy(&self) -> Policy {
        Policy::Advisory(self.credential.guidance.clone())
    }

    fn is_satisfied(&self, _session: &mut Session<'_>) -> Result<bool> {
        if !exists(&self.credential.path) {
            return Ok(false);
        }

        match &self.credential.expect {
            Some(expect) => self.key_matches(expect),
            None => Ok(true),
        }
    }

    fn remediate(&self, _session: &mut Session<'_>) -> Result<()> {
        debug!(
            "credentials are never written, leaving {:?} alone",
            self.credential.path.display()
        );
        Ok(())
    }
}
