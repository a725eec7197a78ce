//! Command-line and environment configuration.
//!
//! Every setting can be given as a flag or through the environment variable
//! named next to it; a `.env` file in the working directory is loaded first and
//! never overrides variables that are already set.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::{ftp::FtpServer, ftp::RetryPolicy, machine::MachineConfig};

pub const DEFAULT_ENV_FILE: &str = ".env";

#[derive(Debug, Parser)]
#[command(name = "tordl")]
#[command(about = "Download torrents in a throwaway VM, scan them and fetch the clean files")]
#[command(version)]
pub struct Cli {
    /// Ask before downloading and before destroying the VM
    #[arg(short, long)]
    pub interactive: bool,

    /// Directory holding the VM definition (Vagrantfile)
    #[arg(long, env = "VAGRANT_DIR")]
    pub vagrant_dir: PathBuf,

    /// Provisioner command, split on whitespace
    #[arg(long, env = "PROVISIONER", default_value = "vagrant")]
    pub provisioner: String,

    /// Directory containing the .torrent files to download
    #[arg(long, env = "TORRENT_FILES_DIR")]
    pub torrent_files_dir: PathBuf,

    /// Where scanned downloads are stored on the host
    #[arg(long, env = "LOCAL_DOWNLOADS_DIR")]
    pub local_downloads_dir: PathBuf,

    /// Data directory inside the VM, as seen by the torrent client and scanner
    #[arg(long, env = "REMOTE_DATA_PATH")]
    pub remote_data_path: String,

    /// The same data directory, as seen by the FTP user
    #[arg(long, env = "FTP_USER_REMOTE_DATA_PATH")]
    pub ftp_user_remote_data_path: String,

    #[arg(long, env = "FTP_HOST")]
    pub ftp_host: String,

    #[arg(long, env = "FTP_PORT", default_value_t = 21)]
    pub ftp_port: u16,

    /// FTP user; also runs the torrent client inside the VM
    #[arg(long, env = "FTP_USER")]
    pub ftp_user: String,

    #[arg(long, env = "FTP_PASS", hide_env_values = true)]
    pub ftp_pass: String,

    /// Seconds
    #[arg(long, env = "FTP_TIMEOUT", default_value_t = 30)]
    pub ftp_timeout: u64,

    #[arg(long, env = "FTP_CONN_RETRIES", default_value_t = 5)]
    pub ftp_conn_retries: u32,

    /// Seconds between FTP connection attempts
    #[arg(long, env = "RETRY_DELAY", default_value_t = 10)]
    pub retry_delay: u64,

    /// Give up on a single torrent after this many seconds
    #[arg(long, env = "DOWNLOAD_TIMEOUT")]
    pub download_timeout: Option<u64>,

    /// Forwarded peer port for the torrent client (asked for in interactive mode)
    #[arg(long, env = "PEER_PORT")]
    pub peer_port: Option<u16>,

    /// Destroy the VM on exit without being asked
    #[arg(long, env = "DESTROY_VM")]
    pub destroy_vm: bool,
}

/// Validated configuration of one workflow run.
#[derive(Clone, Debug)]
pub struct Settings {
    pub interactive: bool,
    pub machine: MachineConfig,
    pub torrent_files_dir: PathBuf,
    pub local_downloads_dir: PathBuf,
    pub remote_data_path: String,
    pub ftp_user_remote_data_path: String,
    pub ftp: FtpServer,
    pub retry: RetryPolicy,
    pub download_timeout: Option<Duration>,
    pub peer_port: Option<u16>,
}

impl Settings {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let provisioner: Vec<String> = cli
            .provisioner
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if provisioner.is_empty() {
            bail!("provisioner command is empty");
        }
        if !cli.vagrant_dir.is_dir() {
            bail!("VM directory {:?} does not exist", cli.vagrant_dir);
        }
        if !cli.torrent_files_dir.is_dir() {
            bail!(
                "torrent files directory {:?} does not exist",
                cli.torrent_files_dir
            );
        }

        Ok(Self {
            interactive: cli.interactive,
            machine: MachineConfig {
                provisioner,
                dir: cli.vagrant_dir,
                destroy_on_exit: cli.destroy_vm,
            },
            torrent_files_dir: cli.torrent_files_dir,
            local_downloads_dir: cli.local_downloads_dir,
            remote_data_path: cli.remote_data_path,
            ftp_user_remote_data_path: cli.ftp_user_remote_data_path,
            ftp: FtpServer {
                host: cli.ftp_host,
                port: cli.ftp_port,
                user: cli.ftp_user,
                password: cli.ftp_pass,
            },
            retry: RetryPolicy {
                max_attempts: cli.ftp_conn_retries,
                timeout: Duration::from_secs(cli.ftp_timeout),
                retry_delay: Duration::from_secs(cli.retry_delay),
            },
            download_timeout: cli
                .download_timeout
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            peer_port: cli.peer_port,
        })
    }
}

/// Load `path` into the process environment without overriding variables
/// that are already set. Returns whether the file existed.
pub fn load_env_file(path: &Path) -> Result<bool> {
    match dotenvy::from_path(path) {
        Ok(()) => Ok(true),
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("failed to load {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::Connector;
    use clap::CommandFactory;

    fn args<'a>(vagrant_dir: &'a str, torrents: &'a str) -> Vec<&'a str> {
        vec![
            "tordl",
            "--vagrant-dir",
            vagrant_dir,
            "--torrent-files-dir",
            torrents,
            "--local-downloads-dir",
            "/tmp/tordl-downloads",
            "--remote-data-path",
            "/srv/ftp/data",
            "--ftp-user-remote-data-path",
            "/data",
            "--ftp-host",
            "192.168.56.10",
            "--ftp-user",
            "ftpuser",
            "--ftp-pass",
            "secret",
        ]
    }

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_settings_from_flags() -> Result<()> {
        let vm = tempfile::tempdir()?;
        let torrents = tempfile::tempdir()?;
        let mut argv = args(
            vm.path().to_str().unwrap(),
            torrents.path().to_str().unwrap(),
        );
        argv.extend(["-i", "--ftp-conn-retries", "3", "--retry-delay", "2"]);
        argv.extend(["--download-timeout", "600", "--provisioner", "sh fake.sh"]);

        let settings = Settings::from_cli(Cli::try_parse_from(argv)?)?;

        assert!(settings.interactive);
        assert_eq!(settings.machine.provisioner, ["sh", "fake.sh"]);
        assert!(!settings.machine.destroy_on_exit);
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.retry_delay, Duration::from_secs(2));
        assert_eq!(settings.download_timeout, Some(Duration::from_secs(600)));
        assert_eq!(settings.ftp.address(), "192.168.56.10:21");
        assert_eq!(settings.ftp.password, "secret");
        Ok(())
    }

    #[test]
    fn test_destroy_vm_is_opt_in() -> Result<()> {
        let vm = tempfile::tempdir()?;
        let torrents = tempfile::tempdir()?;
        let mut argv = args(
            vm.path().to_str().unwrap(),
            torrents.path().to_str().unwrap(),
        );
        argv.push("--destroy-vm");

        let settings = Settings::from_cli(Cli::try_parse_from(argv)?)?;

        assert!(settings.machine.destroy_on_exit);
        assert!(!settings.interactive);
        Ok(())
    }

    #[test]
    fn test_missing_vm_dir_is_rejected() -> Result<()> {
        let torrents = tempfile::tempdir()?;
        let argv = args(
            "/nonexistent/tordl-vm",
            torrents.path().to_str().unwrap(),
        );
        let err = Settings::from_cli(Cli::try_parse_from(argv)?).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
        Ok(())
    }

    #[test]
    fn test_missing_env_file_is_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(!load_env_file(&dir.path().join(".env"))?);
        Ok(())
    }
}
