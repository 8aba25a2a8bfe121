//! Isolated environment for running the `flotilla` binary.

use camino::Utf8PathBuf;
use tempfile::TempDir;

/// Temporary home and state directory shared by a sequence of invocations.
pub struct CliEnv {
    _root: TempDir,
    home: Utf8PathBuf,
}

impl CliEnv {
    pub fn new() -> Self {
        let root = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let home = Utf8PathBuf::from_path_buf(root.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
        Self { _root: root, home }
    }

    /// Applies the isolated environment to `cmd` and appends `args`.
    pub fn prepare(&self, mut cmd: assert_cmd::Command, args: &[&str]) -> assert_cmd::Command {
        cmd.env_remove("FLOTILLA_CONFIG_PATH")
            .env_remove("FLOTILLA_PROFILE")
            .env_remove("FLOTILLA_LOG")
            .env_remove("FLOTILLA_SIMULATED_FAULTS")
            .env("HOME", self.home.as_str())
            .env("XDG_CONFIG_HOME", self.home.join(".config").as_str())
            .env("FLOTILLA_STATE_DIR", self.home.join("state").as_str())
            .env("FLOTILLA_DRIVER", "simulated")
            .current_dir(self.home.as_std_path())
            .args(args);
        cmd
    }
}
