use std::cell::Cell;
use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use machine_static::EnvVars;

/// Serializes every mutation of the process environment.
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// The home directory of the process before any overlay was applied.
static ORIGINAL_HOME: LazyLock<HomeBinding> = LazyLock::new(HomeBinding::capture);

thread_local! {
    /// Whether this thread holds `ENV_LOCK` through an [`OverlayGuard`].
    static OVERLAY_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Panic if this thread already holds an overlay, since taking `ENV_LOCK` again would never return.
pub(crate) fn assert_no_active_overlay() {
    assert!(
        !OVERLAY_ACTIVE.get(),
        "an environment overlay is already active on this thread: drop the current `TestContext` \
         before creating another one or reading the home binding"
    );
}

/// The home directory variables, as bound in the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeBinding {
    pub home: Option<OsString>,
    pub user_profile: Option<OsString>,
}

impl HomeBinding {
    fn capture() -> Self {
        Self {
            home: env::var_os(EnvVars::HOME),
            user_profile: env::var_os(EnvVars::USERPROFILE),
        }
    }

    /// The binding right now, read while no overlay is active.
    ///
    /// Blocks while another thread's overlay is active, and panics if this thread's is.
    pub fn current() -> Self {
        assert_no_active_overlay();
        let _lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        Self::capture()
    }

    /// The binding captured before the first overlay of this process was applied.
    ///
    /// This is the only value ever restored, so a test can never inherit another test's home.
    pub fn original() -> &'static Self {
        &ORIGINAL_HOME
    }

    fn restore(&self) {
        set_env(EnvVars::HOME, self.home.as_deref());
        if cfg!(windows) {
            set_env(EnvVars::USERPROFILE, self.user_profile.as_deref());
        }
    }
}

/// The environment variable bindings that point the CLI at a sandbox.
#[derive(Debug, Clone)]
pub struct EnvOverlay {
    home: PathBuf,
    connections_conf: PathBuf,
}

impl EnvOverlay {
    pub fn for_sandbox(root: &Path) -> Self {
        Self {
            home: root.to_path_buf(),
            connections_conf: root.join("connections.json"),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Each overlaid variable with its value, where `None` means the variable is removed.
    pub fn bindings(&self) -> Vec<(&'static str, Option<&OsStr>)> {
        let mut bindings = vec![(EnvVars::HOME, Some(self.home.as_os_str()))];
        if cfg!(windows) {
            bindings.push((EnvVars::USERPROFILE, Some(self.home.as_os_str())));
        }
        bindings.extend([
            (EnvVars::XDG_RUNTIME_DIR, Some(self.home.as_os_str())),
            (EnvVars::SSH_AUTH_SOCK, None),
            (
                EnvVars::PODMAN_CONNECTIONS_CONF,
                Some(self.connections_conf.as_os_str()),
            ),
        ]);
        bindings
    }

    /// Apply the overlay to a single command, independently of the process environment.
    pub fn apply_to(&self, command: &mut Command) {
        for (key, value) in self.bindings() {
            match value {
                Some(value) => command.env(key, value),
                None => command.env_remove(key),
            };
        }
    }

    /// Apply the overlay to the process environment until the returned guard is restored or
    /// dropped.
    ///
    /// Blocks while another thread's overlay is active, and panics if this thread's is.
    pub fn activate(&self) -> OverlayGuard {
        assert_no_active_overlay();
        let lock = ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        OVERLAY_ACTIVE.set(true);
        LazyLock::force(&ORIGINAL_HOME);

        let mut saved = Vec::new();
        for (key, value) in self.bindings() {
            if key != EnvVars::HOME && key != EnvVars::USERPROFILE {
                saved.push((key, env::var_os(key)));
            }
            trace!("Overlaying `{key}`: {value:?}");
            set_env(key, value);
        }

        OverlayGuard {
            saved,
            lock: Some(lock),
        }
    }
}

/// Keeps an [`EnvOverlay`] applied to the process environment.
#[derive(Debug)]
pub struct OverlayGuard {
    saved: Vec<(&'static str, Option<OsString>)>,
    lock: Option<MutexGuard<'static, ()>>,
}

impl OverlayGuard {
    /// Revert the overlay, restoring the original home directory last.
    pub fn restore(mut self) {
        self.revert();
    }

    fn revert(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        for (key, value) in self.saved.drain(..) {
            set_env(key, value.as_deref());
        }
        HomeBinding::original().restore();
        OVERLAY_ACTIVE.set(false);
        drop(lock);
    }
}

impl Drop for OverlayGuard {
    fn drop(&mut self) {
        self.revert();
    }
}

#[allow(unsafe_code)]
fn set_env(key: &str, value: Option<&OsStr>) {
    // SAFETY: callers hold `ENV_LOCK`, so no two overlays mutate the environment at once.
    match value {
        Some(value) => unsafe { env::set_var(key, value) },
        None => unsafe { env::remove_var(key) },
    }
}
