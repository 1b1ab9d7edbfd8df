use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use assert_fs::fixture::{ChildPath, PathChild};
use tracing::debug;

use machine_fs::{PrivateDirError, RemoveError, Simplified};

/// Forces the SSH client to use only the identities configured for a machine, never keys offered
/// by an agent.
pub const SSH_CONFIG_CONTENTS: &str = "IdentitiesOnly=yes";

/// A failed step of building a [`Sandbox`].
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to create home directory in `{}`", base.simplified_display())]
    CreateHome {
        base: PathBuf,
        #[source]
        err: io::Error,
    },
    #[error("failed to create ssh dir")]
    CreateSshDir(#[source] PrivateDirError),
    #[error("failed to create ssh config")]
    CreateSshConfig(#[source] io::Error),
    #[error("failed to write ssh config")]
    WriteSshConfig(#[source] io::Error),
    #[error("unable to close ssh config file descriptor")]
    CloseSshConfig(#[source] io::Error),
}

/// A disposable home directory for one test.
///
/// The directory is not removed on drop: removal is sequenced by [`crate::TestContext`], after the
/// CLI has had a chance to release everything it put inside.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Create a uniquely-named sandbox under `base`, including its SSH configuration.
    ///
    /// If a later step fails, the partially-built directory is removed again.
    pub fn create(base: &Path) -> Result<Self, SetupError> {
        let root = tempfile::Builder::new()
            .prefix("machine_test")
            .tempdir_in(base)
            .map_err(|err| SetupError::CreateHome {
                base: base.to_path_buf(),
                err,
            })?
            .keep();

        let sandbox = Self { root };
        debug!("Created sandbox: {}", sandbox.root().simplified_display());

        if let Err(err) = sandbox.write_ssh_config() {
            if let Err(remove) = sandbox.erase() {
                debug!("Failed to remove partial sandbox: {remove}");
            }
            return Err(err);
        }

        Ok(sandbox)
    }

    fn write_ssh_config(&self) -> Result<(), SetupError> {
        machine_fs::create_private_dir(self.ssh_dir()).map_err(SetupError::CreateSshDir)?;

        let mut file =
            fs_err::File::create(self.ssh_config().path()).map_err(SetupError::CreateSshConfig)?;
        file.write_all(SSH_CONFIG_CONTENTS.as_bytes())
            .map_err(SetupError::WriteSshConfig)?;
        // Dropping a file swallows errors, so flush to disk while they can still be reported.
        file.sync_all().map_err(SetupError::CloseSshConfig)?;
        drop(file);

        Ok(())
    }

    /// The sandbox itself, used as `HOME` and `XDG_RUNTIME_DIR`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ssh_dir(&self) -> ChildPath {
        ChildPath::new(self.root.join(".ssh"))
    }

    pub fn ssh_config(&self) -> ChildPath {
        self.ssh_dir().child("config")
    }

    /// The connection registry of the CLI. Created by the CLI itself, if at all.
    pub fn connections_conf(&self) -> ChildPath {
        ChildPath::new(self.root.join("connections.json"))
    }

    /// Remove the sandbox and everything below it.
    pub fn erase(&self) -> Result<(), RemoveError> {
        machine_fs::guarded_remove_dir_all(self.root())
    }
}
