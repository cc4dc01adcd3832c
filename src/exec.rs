// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Every package manager, installer, and login flow is reached through the
//! [`CommandRunner`] trait. Commands are structured as a program plus an
//! argument list, never as interpolated shell strings, so runners can be
//! swapped out for fakes in tests.
//!
//! Two flavours of execution exist. __Streamed__ commands inherit the
//! terminal, so the user can watch long installs or answer prompts.
//! __Captured__ commands have their output collected into the returned
//! [`RunResult`] for predicates to inspect.

use std::{
    env,
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};
use tracing::{debug, instrument};

/// Structured external command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    search_path: Vec<PathBuf>,
    capture: bool,
}

impl Cmd {
    /// Construct new command for `program`.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command from `dir`.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Prepend extra directories to the program lookup and child `PATH`.
    pub fn search_path(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.search_path.extend(dirs.into_iter().map(Into::into));
        self
    }

    /// Collect output instead of streaming it to the terminal.
    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    pub fn get_current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }

    pub fn get_search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    pub fn is_captured(&self) -> bool {
        self.capture
    }

    /// Check if program name and leading arguments match `words`.
    ///
    /// Handy for fakes that react to a command family, e.g.
    /// `["conda", "env", "list"]`.
    pub fn starts_with(&self, words: &[&str]) -> bool {
        let Some((program, rest)) = words.split_first() else {
            return true;
        };

        let name = Path::new(&self.program)
            .file_name()
            .unwrap_or(self.program.as_os_str());
        name == OsStr::new(program)
            && rest.len() <= self.args.len()
            && rest
                .iter()
                .zip(&self.args)
                .all(|(word, arg)| OsStr::new(word) == arg.as_os_str())
    }
}

impl Display for Cmd {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.program.to_string_lossy().as_ref())?;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(fmt, " {arg:?}")?;
            } else {
                write!(fmt, " {arg}")?;
            }
        }

        Ok(())
    }
}

/// Result of running an external command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Exit code, `-1` when the process was terminated by a signal.
    pub exit_code: i32,

    /// Captured standard output, if the command was captured.
    pub stdout: Option<String>,

    /// Captured standard error, if the command was captured.
    pub stderr: Option<String>,
}

impl RunResult {
    /// Successful result without captured output.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Result with exit code and no captured output.
    pub fn with_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            ..Default::default()
        }
    }

    /// Successful result with captured standard output.
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: Some(stdout.into()),
            stderr: Some(String::new()),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execute external commands.
pub trait CommandRunner {
    /// Run command to completion.
    ///
    /// A non-zero exit code is _not_ an error. It is surfaced through
    /// [`RunResult::exit_code`] for the caller to judge.
    ///
    /// # Errors
    ///
    /// - Return [`ExecError`] if the command cannot be started at all.
    fn execute(&mut self, cmd: &Cmd) -> Result<RunResult>;

    /// Locate executable `binary` in `search` followed by `PATH`.
    fn locate(&self, binary: &str, search: &[PathBuf]) -> Option<PathBuf>;
}

/// Command runner backed by real processes.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    /// Construct new process runner.
    pub fn new() -> Self {
        Self
    }

    fn child_path(search: &[PathBuf]) -> Result<OsString> {
        let inherited = env::var_os("PATH").unwrap_or_default();
        let dirs = search
            .iter()
            .cloned()
            .chain(env::split_paths(&inherited))
            .collect::<Vec<_>>();
        Ok(env::join_paths(dirs)?)
    }
}

impl CommandRunner for ProcessRunner {
    #[instrument(skip(self, cmd), level = "debug")]
    fn execute(&mut self, cmd: &Cmd) -> Result<RunResult> {
        let program = if Path::new(cmd.get_program()).components().count() > 1 {
            PathBuf::from(cmd.get_program())
        } else {
            let name = cmd.get_program().to_string_lossy();
            self.locate(name.as_ref(), cmd.get_search_path())
                .ok_or_else(|| ExecError::NotFound {
                    program: name.into_owned(),
                })?
        };

        let mut command = Command::new(&program);
        command.args(cmd.get_args());
        if let Some(dir) = cmd.get_current_dir() {
            command.current_dir(dir);
        }
        if !cmd.get_search_path().is_empty() {
            command.env("PATH", Self::child_path(cmd.get_search_path())?);
        }

        let spawn_error = |source| ExecError::Spawn {
            source,
            program: program.clone(),
        };

        let result = if cmd.is_captured() {
            let output = command
                .stdin(Stdio::null())
                .output()
                .map_err(spawn_error)?;
            captured(output)
        } else {
            let status = command.status().map_err(spawn_error)?;
            RunResult::with_code(status.code().unwrap_or(-1))
        };

        debug!("{:?} exited with {}", program.display(), result.exit_code);
        Ok(result)
    }

    fn locate(&self, binary: &str, search: &[PathBuf]) -> Option<PathBuf> {
        let inherited = env::var_os("PATH").unwrap_or_default();
        search
            .iter()
            .cloned()
            .chain(env::split_paths(&inherited))
            .map(|dir| dir.join(binary))
            .find(|candidate| is_executable(candidate))
    }
}

fn captured(output: Output) -> RunResult {
    RunResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: Some(chomp(String::from_utf8_lossy(&output.stdout).into_owned())),
        stderr: Some(chomp(String::from_utf8_lossy(&output.stderr).into_owned())),
    }
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Program could not be found on the search path.
    #[error("cannot find {program:?} on search path")]
    NotFound { program: String },

    /// Process could not be started.
    #[error("failed to start {:?}", program.display())]
    Spawn {
        #[source]
        source: std::io::Error,
        program: PathBuf,
    },

    /// Search path contains a directory that cannot go into `PATH`.
    #[error(transparent)]
    JoinPaths(#[from] env::JoinPathsError),
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;
