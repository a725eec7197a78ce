#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use tempfile::TempDir;
use tordl::MachineConfig;

const SCRIPT: &str = "provision.sh";
const CALLS: &str = "calls.log";

/// Runs the `ssh -c CMD` command locally.
pub const LOCAL_SSH: &str = r#"exec sh -c "$3""#;

/// Stand-in for the provisioner CLI: a shell script that logs every call to
/// `calls.log` and fails a subcommand whenever a `fail-<subcommand>` file
/// exists next to it.
pub struct FakeProvisioner {
    dir: TempDir,
}

impl FakeProvisioner {
    /// `ssh_body` handles `ssh -c CMD`, with CMD in `$3`.
    pub fn new(ssh_body: &str) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let script = format!(
            r#"here="$(dirname "$0")"
echo "$*" >> "$here/{CALLS}"
if [ -f "$here/fail-$1" ]; then
  echo "$1 failed" >&2
  exit 1
fi
case "$1" in
  up)
    echo "==> default: Machine booted and ready!"
    ;;
  destroy)
    echo "==> default: Destroying VM and associated drives..."
    ;;
  ssh)
{ssh_body}
    ;;
esac
"#
        );
        fs::write(dir.path().join(SCRIPT), script)?;
        Ok(Self { dir })
    }

    pub fn local() -> Result<Self> {
        Self::new(LOCAL_SSH)
    }

    pub fn config(&self) -> MachineConfig {
        MachineConfig {
            provisioner: vec![
                "sh".to_string(),
                self.script().to_string_lossy().into_owned(),
            ],
            dir: self.dir.path().to_path_buf(),
            destroy_on_exit: false,
        }
    }

    /// The VM directory, where every provisioner call runs.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn script(&self) -> PathBuf {
        self.dir.path().join(SCRIPT)
    }

    /// Make every later call of `subcommand` fail.
    pub fn fail(&self, subcommand: &str) -> Result<()> {
        fs::write(self.dir.path().join(format!("fail-{subcommand}")), b"")?;
        Ok(())
    }

    /// Arguments of every call so far, one string per call.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join(CALLS))
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
