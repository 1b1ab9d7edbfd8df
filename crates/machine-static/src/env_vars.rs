/// Declares all environment variables used throughout the machine test harness.
pub struct EnvVars;

impl EnvVars {
    /// The base directory under which per-test sandboxes are created.
    ///
    /// When set to a non-empty value, it takes precedence over the platform temporary directory.
    pub const TMPDIR: &'static str = "TMPDIR";

    /// Path to a prebuilt disk image used by `machine init`.
    ///
    /// Required: the test suite refuses to start without it.
    pub const MACHINE_IMAGE_PATH: &'static str = "MACHINE_IMAGE_PATH";

    /// Path to the machine CLI under test.
    ///
    /// If unset, `podman` is searched for on the `PATH`.
    pub const MACHINE_TEST_BINARY: &'static str = "MACHINE_TEST_BINARY";

    /// Standard user home directory, replaced with the sandbox for the duration of a test.
    pub const HOME: &'static str = "HOME";

    /// The Windows equivalent of `HOME`, replaced alongside it.
    pub const USERPROFILE: &'static str = "USERPROFILE";

    /// Where the CLI keeps runtime state (sockets, pid files) for its machines.
    pub const XDG_RUNTIME_DIR: &'static str = "XDG_RUNTIME_DIR";

    /// Socket of the host's SSH agent. Always removed inside a sandbox.
    pub const SSH_AUTH_SOCK: &'static str = "SSH_AUTH_SOCK";

    /// Path of the CLI's connection registry file.
    pub const PODMAN_CONNECTIONS_CONF: &'static str = "PODMAN_CONNECTIONS_CONF";

    /// Used to locate the machine CLI when `MACHINE_TEST_BINARY` is unset.
    pub const PATH: &'static str = "PATH";

    /// Used for filtering tracing output in tests.
    pub const RUST_LOG: &'static str = "RUST_LOG";
}
