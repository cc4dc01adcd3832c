// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Package repository synchronization.
//!
//! Internally developed packages live in source control. Each one is cloned
//! once into the target directory, and fast-forwarded to its upstream on
//! every later run. Synchronization goes through the [`RepoSync`] trait so
//! tests can swap libgit2 out for an in-memory fake.

use auth_git2::{GitAuthenticator, Prompter};
use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    AnnotatedCommit, Config, FetchOptions, RemoteCallbacks, Repository,
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, Text};
use std::{path::Path, time};
use tracing::{debug, info, instrument};

/// Layer of indirection for repository access.
pub trait RepoSync {
    /// Check if `path` holds a repository checkout.
    fn is_cloned(&self, path: &Path) -> bool;

    /// Clone repository at `url` into `path`.
    fn clone_repo(&mut self, url: &str, path: &Path) -> Result<()>;

    /// Fetch upstream and check if the checkout already matches it.
    fn is_current(&mut self, path: &Path) -> Result<bool>;

    /// Fast-forward checkout to its upstream.
    fn fast_forward(&mut self, path: &Path) -> Result<()>;

    /// Commit id the checkout at `path` has checked out.
    fn head(&self, path: &Path) -> Result<String>;
}

/// Repository access through libgit2.
///
/// Credentials are resolved through git credential helpers and the ssh
/// agent first. The user is only prompted when all of those come up empty.
#[derive(Debug, Default)]
pub struct Git2Sync;

impl Git2Sync {
    /// Construct new libgit2 synchronizer.
    pub fn new() -> Self {
        Self
    }

    fn fetch_upstream<'r>(
        &self,
        repository: &'r Repository,
        bar: ProgressBar,
    ) -> Result<(String, AnnotatedCommit<'r>)> {
        let head = repository.head()?;
        let branch = head
            .shorthand()
            .filter(|_| head.is_branch())
            .ok_or_else(|| RepoError::DetachedHead {
                path: repository.path().display().to_string(),
            })?
            .to_string();

        let prompter = IndicatifPrompter::new(bar);
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let mut remote = repository.find_remote("origin")?;
        remote.fetch(&[branch.as_str()], Some(&mut fo), None)?;

        let fetch_head = repository.find_reference("FETCH_HEAD")?;
        let commit = repository.reference_to_annotated_commit(&fetch_head)?;

        Ok((branch, commit))
    }
}

impl RepoSync for Git2Sync {
    fn is_cloned(&self, path: &Path) -> bool {
        Repository::open(path).is_ok()
    }

    /// Clone repository from remote.
    ///
    /// The progress of the clone is displayed through a progress bar. If any
    /// credentials are required for the clone to continue, then the user will
    /// be prompted for that information accordingly. The progress bar will be
    /// blocked for user input.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Git2`] if libgit2 operations fail.
    /// - Return [`RepoError::IndicatifStyleTemplate`] if progress bar cannot
    ///   be styled.
    #[instrument(skip(self, path), level = "debug")]
    fn clone_repo(&mut self, url: &str, path: &Path) -> Result<()> {
        info!("clone {url} into {:?}", path.display());
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<50}  [{wide_bar:.yellow/blue}]",
        )?
        .progress_chars("-Cco.");
        bar.set_style(style);
        bar.set_message(url.to_string());
        bar.enable_steady_tick(time::Duration::from_millis(100));

        let prompter = IndicatifPrompter::new(bar.clone());
        let authenticator = GitAuthenticator::default().set_prompter(prompter);
        let config = Config::open_default()?;

        let mut throttle = time::Instant::now();
        let mut rc = RemoteCallbacks::new();
        rc.credentials(authenticator.credentials(&config));
        rc.transfer_progress(|progress| {
            let stats = progress.to_owned();
            if throttle.elapsed() > time::Duration::from_millis(10) {
                throttle = time::Instant::now();
                bar.set_length(stats.total_objects() as u64);
                bar.set_position(stats.received_objects() as u64);
            }
            true
        });

        let mut fo = FetchOptions::new();
        fo.remote_callbacks(rc);
        let result = RepoBuilder::new().fetch_options(fo).clone(url, path);
        bar.finish_and_clear();
        result?;

        Ok(())
    }

    #[instrument(skip(self, path), level = "debug")]
    fn is_current(&mut self, path: &Path) -> Result<bool> {
        let repository = Repository::open(path)?;
        let (_, upstream) = self.fetch_upstream(&repository, ProgressBar::hidden())?;
        let (analysis, _) = repository.merge_analysis(&[&upstream])?;
        debug!("merge analysis of {:?}: {analysis:?}", path.display());

        Ok(analysis.is_up_to_date())
    }

    /// Fast-forward checkout to its upstream.
    ///
    /// Local work is never merged or overwritten. A checkout whose history
    /// diverged from upstream is left alone and reported as an error.
    ///
    /// # Errors
    ///
    /// - Return [`RepoError::Diverged`] if fast-forward is impossible.
    /// - Return [`RepoError::DetachedHead`] if HEAD is not a branch.
    /// - Return [`RepoError::Git2`] if libgit2 operations fail.
    #[instrument(skip(self, path), level = "debug")]
    fn fast_forward(&mut self, path: &Path) -> Result<()> {
        let repository = Repository::open(path)?;
        let (branch, upstream) = self.fetch_upstream(&repository, ProgressBar::hidden())?;
        let (analysis, _) = repository.merge_analysis(&[&upstream])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }

        if !analysis.is_fast_forward() {
            return Err(RepoError::Diverged {
                path: path.display().to_string(),
            });
        }

        info!("fast-forward {branch} of {:?}", path.display());
        let refname = format!("refs/heads/{branch}");
        let mut reference = repository.find_reference(&refname)?;
        reference.set_target(upstream.id(), "rs-install: fast-forward")?;
        repository.set_head(&refname)?;
        repository.checkout_head(Some(CheckoutBuilder::new().safe()))?;

        Ok(())
    }

    fn head(&self, path: &Path) -> Result<String> {
        let repository = Repository::open(path)?;
        let commit = repository.head()?.peel_to_commit()?;

        Ok(commit.id().to_string())
    }
}

/// Git2 authentication prompter for progress bar.
#[derive(Debug, Clone)]
pub struct IndicatifPrompter {
    pub(crate) bar: ProgressBar,
}

impl IndicatifPrompter {
    /// Construct new progress bar authenticator.
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl Prompter for IndicatifPrompter {
    #[instrument(skip(self, url, _config), level = "debug")]
    fn prompt_username_password(
        &mut self,
        url: &str,
        _config: &git2::Config,
    ) -> Option<(String, String)> {
        info!("authentication required at {url}");
        self.bar.suspend(|| -> Option<(String, String)> {
            let username = Text::new("username").prompt().ok()?;
            let password = Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()?;
            Some((username, password))
        })
    }

    #[instrument(skip(self, username, url, _config), level = "debug")]
    fn prompt_password(
        &mut self,
        username: &str,
        url: &str,
        _config: &git2::Config,
    ) -> Option<String> {
        info!("authentication required at {url} for user {username}");
        self.bar.suspend(|| -> Option<String> {
            Password::new("password")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }

    #[instrument(skip(self, ssh_key_path, _config), level = "debug")]
    fn prompt_ssh_key_passphrase(
        &mut self,
        ssh_key_path: &Path,
        _config: &git2::Config,
    ) -> Option<String> {
        info!(
            "authentication required with ssh key at {}",
            ssh_key_path.display()
        );
        self.bar.suspend(|| -> Option<String> {
            Password::new("passphrase")
                .without_confirmation()
                .prompt()
                .ok()
        })
    }
}

/// Repository synchronization error types.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Checkout history diverged from upstream.
    #[error("checkout at {path:?} diverged from upstream, cannot fast-forward")]
    Diverged { path: String },

    /// HEAD does not point at a branch.
    #[error("checkout at {path:?} is not on a branch")]
    DetachedHead { path: String },

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),

    /// Operations from libgit2 fail.
    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// Friendly result alias :3
pub type Result<T, E = RepoError> = std::result::Result<T, E>;
