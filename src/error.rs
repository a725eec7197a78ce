use std::{io, path::PathBuf, time::Duration};

/// Everything that can go wrong while driving the VM or talking to its FTP server.
///
/// Whether an error ends the workflow is decided by the caller: command errors
/// follow the [`ErrorPolicy`](crate::ErrorPolicy) of the call, mirror errors are
/// always collected into a [`MirrorReport`](crate::MirrorReport).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("command `{command}` timed out after {}s", timeout.as_secs_f64())]
    Timeout { command: String, timeout: Duration },

    #[error("command `{command}` failed ({})", describe_exit(*code))]
    CommandFailed { command: String, code: Option<i32> },

    #[error("failed to connect to FTP server {host} after {attempts} attempts: {source}")]
    ConnectionFailure {
        host: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("could not list {path}: {source}")]
    ListingFailure {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to transfer {path}: {source}")]
    TransferFailure {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to create local directory {}: {source}", path.display())]
    LocalDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Exit code of a failed command, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
