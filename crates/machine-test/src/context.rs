use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, error};

use machine_fs::{RemoveError, Simplified};

use crate::overlay::{self, EnvOverlay, OverlayGuard};
use crate::runner::{RunError, Session, TestBuilder};
use crate::sandbox::{Sandbox, SetupError};
use crate::settings::Settings;

/// The disk size, in GiB, of machines created with [`TestContext::init`].
pub const DEFAULT_DISK_SIZE: u32 = 11;

/// Stops and removes every machine the CLI manages, without prompting.
pub const RESET_ARGS: [&str; 3] = ["machine", "reset", "-f"];

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    SandboxReady,
    TestRunning,
    CleanupInFlight,
    Restored,
}

/// Why `machine reset -f` did not clean up.
#[derive(Debug, thiserror::Error)]
pub enum ResetFailure {
    #[error(transparent)]
    Run(RunError),
    #[error("`machine reset -f` exited with {}: {stderr}", describe_exit(.code))]
    Exit { code: Option<i32>, stderr: String },
}

#[allow(clippy::ref_option)]
fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Every cleanup step that failed, collected after all steps were attempted.
#[derive(Debug)]
pub struct CleanupError {
    pub sandbox: PathBuf,
    pub reset: Option<ResetFailure>,
    pub erase: Option<RemoveError>,
}

impl fmt::Display for CleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cleaning up after test in `{}` failed",
            self.sandbox.simplified_display()
        )?;
        if let Some(reset) = &self.reset {
            write!(f, "\n  reset: {reset}")?;
        }
        if let Some(erase) = &self.erase {
            write!(f, "\n  failed to remove test dir: {erase}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CleanupError {}

/// Run the three cleanup steps strictly in order, attempting each regardless of the others.
///
/// The environment is restored last, since resetting and erasing both still need the sandboxed
/// `HOME`. Results are only evaluated once `restore` has run.
pub(crate) fn sequence_cleanup(
    sandbox: &Path,
    reset: impl FnOnce() -> Result<Session, RunError>,
    erase: impl FnOnce() -> Result<(), RemoveError>,
    restore: impl FnOnce(),
) -> Result<(), CleanupError> {
    let reset = reset();
    let erase = erase();
    restore();

    let reset = match reset {
        Ok(session) if session.success() => None,
        Ok(session) => Some(ResetFailure::Exit {
            code: session.exit_code(),
            stderr: session.stderr().trim().to_string(),
        }),
        Err(err) => Some(ResetFailure::Run(err)),
    };
    let erase = erase.err();

    if reset.is_none() && erase.is_none() {
        Ok(())
    } else {
        Err(CleanupError {
            sandbox: sandbox.to_path_buf(),
            reset,
            erase,
        })
    }
}

/// A sandboxed environment for one test against the machine CLI.
///
/// * Creates a fresh home directory with an SSH configuration in the configured temp directory.
/// * Points `HOME`, `XDG_RUNTIME_DIR` and the connection registry into it, and hides the host's
///   SSH agent, for both the process and every command built from this context.
/// * On drop, even while unwinding, runs `machine reset -f`, removes the sandbox and then restores
///   the original home directory.
///
/// Only one context is active per process; creating a second one blocks until the first is gone.
/// Creating a second one on the same thread panics instead, since it could never proceed.
pub struct TestContext {
    pub sandbox: Sandbox,
    settings: Settings,
    builder: TestBuilder,
    overlay: Option<OverlayGuard>,
    state: LifecycleState,
    filters: Vec<(String, String)>,
}

impl TestContext {
    /// Create a context from the [global settings](Settings::global).
    ///
    /// Panics if the settings cannot be resolved or the sandbox cannot be built.
    pub fn new() -> Self {
        let settings = Settings::global().unwrap_or_else(|err| panic!("{err}"));
        Self::with_settings(settings.clone())
    }

    /// Create a context from explicit settings, panicking on failure.
    pub fn with_settings(settings: Settings) -> Self {
        Self::try_with_settings(settings)
            .unwrap_or_else(|err| panic!("{:#}", anyhow::Error::from(err)))
    }

    pub fn try_with_settings(settings: Settings) -> Result<Self, SetupError> {
        let mut state = LifecycleState::Uninitialized;
        debug!("Test lifecycle: {state:?}");

        overlay::assert_no_active_overlay();
        let sandbox = Sandbox::create(&settings.tmp_dir)?;
        let overlay = EnvOverlay::for_sandbox(sandbox.root());
        let guard = overlay.activate();
        let builder = TestBuilder::new(&settings.binary, overlay);
        state = LifecycleState::SandboxReady;
        debug!("Test lifecycle: {state:?}");

        let filters = Self::path_patterns(sandbox.root())
            .into_iter()
            .map(|pattern| (pattern, "[SANDBOX]".to_string()))
            .chain(
                Self::path_patterns(&settings.binary)
                    .into_iter()
                    .map(|pattern| (pattern, "[MACHINE]".to_string())),
            )
            .collect();

        Ok(Self {
            sandbox,
            settings,
            builder,
            overlay: Some(guard),
            state: LifecycleState::TestRunning,
            filters,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn builder(&self) -> &TestBuilder {
        &self.builder
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Create a `machine <subcommand>` command.
    pub fn machine(&self, subcommand: &str) -> Command {
        self.builder.set_cmd(["machine", subcommand]).into_command()
    }

    /// Create a `machine init` command using the configured image.
    pub fn init(&self) -> Command {
        let mut command = self.machine("init");
        command
            .arg("--image")
            .arg(&self.settings.image_path)
            .arg("--disk-size")
            .arg(DEFAULT_DISK_SIZE.to_string());
        command
    }

    pub fn start(&self) -> Command {
        self.machine("start")
    }

    pub fn stop(&self) -> Command {
        self.machine("stop")
    }

    pub fn inspect(&self) -> Command {
        self.machine("inspect")
    }

    pub fn list(&self) -> Command {
        self.machine("list")
    }

    pub fn rm(&self) -> Command {
        let mut command = self.machine("rm");
        command.arg("-f");
        command
    }

    pub fn reset(&self) -> Command {
        self.builder.set_cmd(RESET_ARGS).into_command()
    }

    /// Filters that redact the sandbox and binary paths, followed by the standard filters.
    pub fn filters(&self) -> Vec<(&str, &str)> {
        self.filters
            .iter()
            .map(|(pattern, replacement)| (pattern.as_str(), replacement.as_str()))
            .chain(crate::INSTA_FILTERS.iter().copied())
            .collect()
    }

    /// Regex patterns matching `path` as it may appear in output.
    pub fn path_patterns(path: impl AsRef<Path>) -> Vec<String> {
        let path = path.as_ref();
        let mut patterns = Vec::new();
        if let Ok(canonical) = canonicalize_simplified(path) {
            if canonical != path {
                patterns.push(regex::escape(&canonical.simplified_display().to_string()));
            }
        }
        patterns.push(regex::escape(&path.simplified_display().to_string()));
        patterns
    }

    /// Tear the test down now, returning what went wrong instead of panicking.
    pub fn cleanup(mut self) -> Result<(), CleanupError> {
        self.run_cleanup()
    }

    fn run_cleanup(&mut self) -> Result<(), CleanupError> {
        if self.state == LifecycleState::Restored {
            return Ok(());
        }
        self.state = LifecycleState::CleanupInFlight;
        debug!("Test lifecycle: {:?}", self.state);

        let builder = &self.builder;
        let sandbox = &self.sandbox;
        let overlay = &mut self.overlay;
        let result = sequence_cleanup(
            sandbox.root(),
            || builder.set_cmd(RESET_ARGS).run(),
            || sandbox.erase(),
            || {
                if let Some(guard) = overlay.take() {
                    guard.restore();
                }
            },
        );

        self.state = LifecycleState::Restored;
        debug!("Test lifecycle: {:?}", self.state);
        result
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Err(err) = self.run_cleanup() {
            if std::thread::panicking() {
                error!("{err}");
            } else {
                panic!("{err}");
            }
        }
    }
}

fn canonicalize_simplified(path: &Path) -> std::io::Result<PathBuf> {
    fs_err::canonicalize(path).map(|path| path.simplified().to_path_buf())
}
