//! Download torrents inside a disposable VM, virus-scan the results and copy
//! the clean files back to the host over FTP.

pub mod config;
mod error;
pub mod ftp;
mod machine;
pub mod mirror;
pub mod prompt;
pub mod runner;
mod utils;
pub mod workflow;

// Re-export public types and functions
pub use error::{Error, Result};
pub use machine::{Decision, ExitStatus, Machine, MachineConfig, Teardown};
pub use mirror::{MirrorReport, mirror};
pub use runner::{CommandSpec, ErrorPolicy, LineKind, LineSink, RunOutcome};
pub use utils::{create_dir, find_torrents};
