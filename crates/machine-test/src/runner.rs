use std::borrow::Cow;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use assert_cmd::assert::{Assert, OutputAssertExt};
use tracing::debug;

use machine_fs::Simplified;

use crate::overlay::EnvOverlay;

/// The CLI could not be started at all.
///
/// A CLI that starts and exits with a non-zero status is not an error: that is reported through
/// [`Session`].
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn `{}`: {err}", program.simplified_display())]
    Spawn { program: PathBuf, err: io::Error },
}

/// Builds invocations of the CLI under test against one sandbox.
#[derive(Debug, Clone)]
pub struct TestBuilder {
    binary: PathBuf,
    overlay: EnvOverlay,
}

impl TestBuilder {
    pub fn new(binary: impl Into<PathBuf>, overlay: EnvOverlay) -> Self {
        Self {
            binary: binary.into(),
            overlay,
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn overlay(&self) -> &EnvOverlay {
        &self.overlay
    }

    /// Prepare `<binary> <args...>` with the sandbox overlay applied.
    pub fn set_cmd<I, S>(&self, args: I) -> MachineCommand
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.binary);
        command.args(args).stdin(Stdio::null());
        self.overlay.apply_to(&mut command);
        MachineCommand { command }
    }
}

/// A single, not yet started, invocation of the CLI.
#[derive(Debug)]
pub struct MachineCommand {
    command: Command,
}

impl MachineCommand {
    /// Run the CLI to completion, capturing its output.
    ///
    /// There is no timeout: a CLI that hangs hangs the test.
    pub fn run(mut self) -> Result<Session, RunError> {
        let program = PathBuf::from(self.command.get_program());
        debug!(
            "Running: {} {}",
            program.simplified_display(),
            self.command
                .get_args()
                .map(OsStr::to_string_lossy)
                .collect::<Vec<_>>()
                .join(" ")
        );
        let output = self
            .command
            .output()
            .map_err(|err| RunError::Spawn { program, err })?;
        debug!("Exited with: {}", output.status);
        Ok(Session { output })
    }

    /// The underlying command, e.g., for snapshotting with [`crate::machine_snapshot!`].
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// The result of one completed invocation.
#[derive(Debug, Clone)]
pub struct Session {
    output: Output,
}

impl Session {
    /// The exit code, or `None` if the process was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.output.status.code()
    }

    pub fn success(&self) -> bool {
        self.output.status.success()
    }

    pub fn stdout(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output.stdout)
    }

    pub fn stderr(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output.stderr)
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    /// Start an [`assert_cmd`] assertion chain on this result.
    pub fn assert(&self) -> Assert {
        self.output.clone().assert()
    }
}
