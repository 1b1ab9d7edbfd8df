use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use tracing::info;

use machine_fs::Simplified;
use machine_static::EnvVars;

/// The CLI searched for on the `PATH` when [`EnvVars::MACHINE_TEST_BINARY`] is unset.
pub const DEFAULT_BINARY: &str = "podman";

static SETTINGS: LazyLock<Result<Settings, SettingsError>> = LazyLock::new(|| {
    let settings = Settings::from_env()?;
    info!("Using machine binary: {}", settings.binary.simplified_display());
    Ok(settings)
});

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("unable to find image path: `{}` is not set", EnvVars::MACHINE_IMAGE_PATH)]
    MissingImagePath,
    #[error("failed to find machine binary `{DEFAULT_BINARY}` on the `PATH`")]
    BinaryNotFound(#[source] which::Error),
}

/// Process-wide configuration of the test suite.
#[derive(Debug, Clone)]
pub struct Settings {
    /// The directory sandboxes are created in.
    pub tmp_dir: PathBuf,
    /// The disk image passed to `machine init`.
    pub image_path: PathBuf,
    /// The CLI under test.
    pub binary: PathBuf,
}

impl Settings {
    pub fn new(
        tmp_dir: impl Into<PathBuf>,
        image_path: impl Into<PathBuf>,
        binary: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tmp_dir: tmp_dir.into(),
            image_path: image_path.into(),
            binary: binary.into(),
        }
    }

    /// The settings of this process, resolved from the environment on first use.
    pub fn global() -> Result<&'static Self, &'static SettingsError> {
        SETTINGS.as_ref()
    }

    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var_os(name))
    }

    /// Resolve the settings from an arbitrary variable lookup.
    ///
    /// The image path is checked before the binary is searched for, so a missing image is always
    /// reported as such.
    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<OsString>,
    ) -> Result<Self, SettingsError> {
        let tmp_dir = resolve_tmp_dir(lookup(EnvVars::TMPDIR));

        let image_path = lookup(EnvVars::MACHINE_IMAGE_PATH)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .ok_or(SettingsError::MissingImagePath)?;

        let binary = match lookup(EnvVars::MACHINE_TEST_BINARY).filter(|value| !value.is_empty()) {
            Some(binary) => PathBuf::from(binary),
            None => which::which_in(DEFAULT_BINARY, lookup(EnvVars::PATH), Path::new("."))
                .map_err(SettingsError::BinaryNotFound)?,
        };

        Ok(Self {
            tmp_dir,
            image_path,
            binary,
        })
    }
}

/// Pick the base directory for sandboxes.
///
/// A non-empty override wins; otherwise the platform temporary directory is used.
pub fn resolve_tmp_dir(value: Option<OsString>) -> PathBuf {
    value
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(env::temp_dir)
}
