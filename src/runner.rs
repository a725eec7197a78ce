use std::{
    fmt, io,
    os::fd::OwnedFd,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use console::{Term, strip_ansi_codes, style};
use futures::StreamExt;
use tokio::{
    net::unix::pipe,
    process::Child,
    time::{Instant, timeout_at},
};
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Printed by transmission-cli once a torrent is complete. The client keeps
/// seeding forever after this, so the line is treated as success.
pub const SEEDING_SENTINEL: &str = "Seeding, uploading";

/// Prefix of the periodic progress line printed by transmission-cli.
pub const PROGRESS_PREFIX: &str = "Progress:";

/// An external command: argument vector, working directory and optional time limit.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Build a command from an argument vector. The first element is the program.
    pub fn new<I, S>(argv: I, working_dir: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv.next().unwrap_or_default();
        Self {
            program,
            args: argv.collect(),
            working_dir: working_dir.as_ref().to_path_buf(),
            timeout: None,
        }
    }

    /// Set the wall-clock limit. A zero duration means no limit.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            // Make sure that arguments containing spaces are properly quoted.
            if arg.contains(' ') {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// What the caller wants to happen when a command fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Run the exit routine: optional VM teardown, then exit with code 1.
    #[default]
    Exit,
    /// Hand the error back to the caller.
    Return,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    Progress,
    Output,
}

/// Receives every displayed output line of a running command, in arrival order.
pub trait LineSink: Send {
    fn line(&mut self, kind: LineKind, line: &str);
}

impl LineSink for Vec<(LineKind, String)> {
    fn line(&mut self, kind: LineKind, line: &str) {
        self.push((kind, line.to_string()));
    }
}

/// Writes command output to the terminal, progress lines in green and
/// everything else dimmed.
pub struct ConsoleSink {
    term: Term,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LineSink for ConsoleSink {
    fn line(&mut self, kind: LineKind, line: &str) {
        let styled = match kind {
            LineKind::Progress => style(line).green(),
            LineKind::Output => style(line).dim(),
        };
        let _ = self.term.write_line(&format!("  {styled}"));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// The process exited on its own with status 0.
    Exited,
    /// The seeding sentinel was seen and the process was killed.
    Seeding,
}

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub completion: Completion,
    /// Number of output lines observed, sentinel included.
    pub lines: usize,
    pub elapsed: Duration,
}

#[derive(Debug, PartialEq, Eq)]
enum Classified {
    Seeding,
    Line(LineKind),
}

fn classify(line: &str, highlight_progress: bool) -> Classified {
    if line.starts_with(SEEDING_SENTINEL) {
        Classified::Seeding
    } else if highlight_progress && line.starts_with(PROGRESS_PREFIX) {
        Classified::Line(LineKind::Progress)
    } else {
        Classified::Line(LineKind::Output)
    }
}

/// Run a command to completion, streaming its output to `sink`.
///
/// stdout and stderr share one pipe, so lines arrive in the order the process
/// wrote them.
///
/// The run succeeds when the process exits with status 0, or as soon as a line
/// starting with [`SEEDING_SENTINEL`] shows up (the process is then killed and
/// its exit status ignored). With a timeout set, the process is killed and
/// [`Error::Timeout`] returned once the deadline passes without the sentinel.
/// Progress lines are only told apart from other output when no timeout is set.
pub async fn run(spec: &CommandSpec, sink: &mut dyn LineSink) -> Result<RunOutcome> {
    let command = spec.to_string();
    info!("Running `{command}`");
    debug!("Working directory: {:?}", spec.working_dir);

    let spawn_error = |source| Error::Spawn {
        command: command.clone(),
        source,
    };
    let (reader, writer) = io::pipe().map_err(spawn_error)?;
    let stderr_writer = writer.try_clone().map_err(spawn_error)?;

    // The parent's copies of the write end are dropped with the builder, so
    // the read end sees EOF once the process and its children are done.
    let mut child = tokio::process::Command::new(&spec.program)
        .args(&spec.args)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(stderr_writer))
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error)?;

    let output = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    // transmission-cli redraws its progress line with a bare carriage return,
    // so CR ends a line just like LF does.
    let codec = AnyDelimiterCodec::new(b"\r\n".to_vec(), b"\n".to_vec());
    let mut frames = FramedRead::new(output, codec);

    let started = Instant::now();
    let deadline = spec.timeout.map(|limit| (started + limit, limit));
    let mut lines = 0;

    let seeded = loop {
        let next = match deadline {
            Some((at, limit)) => match timeout_at(at, frames.next()).await {
                Ok(next) => next,
                Err(_) => return Err(timed_out(&mut child, command, limit).await),
            },
            None => frames.next().await,
        };
        let chunk = match next {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                warn!("Failed to read command output: {e}");
                break false;
            }
            None => break false,
        };
        lines += 1;

        let line = strip_ansi_codes(&String::from_utf8_lossy(&chunk)).into_owned();
        match classify(&line, deadline.is_none()) {
            Classified::Seeding => {
                info!("Seeding reached, stopping `{command}`");
                stop(&mut child).await;
                break true;
            }
            Classified::Line(kind) => {
                if let Some((at, limit)) = deadline {
                    if Instant::now() > at {
                        return Err(timed_out(&mut child, command, limit).await);
                    }
                }
                sink.line(kind, &line);
            }
        }
    };

    if seeded {
        return Ok(RunOutcome {
            completion: Completion::Seeding,
            lines,
            elapsed: started.elapsed(),
        });
    }

    // Output is closed; the process may still be running.
    let status = match deadline {
        Some((at, limit)) => match timeout_at(at, child.wait()).await {
            Ok(status) => status?,
            Err(_) => return Err(timed_out(&mut child, command, limit).await),
        },
        None => child.wait().await?,
    };

    if status.success() {
        info!("Command completed successfully");
        Ok(RunOutcome {
            completion: Completion::Exited,
            lines,
            elapsed: started.elapsed(),
        })
    } else {
        Err(Error::CommandFailed {
            command,
            code: status.code(),
        })
    }
}

async fn timed_out(child: &mut Child, command: String, timeout: Duration) -> Error {
    stop(child).await;
    Error::Timeout { command, timeout }
}

/// Kill the child and reap it.
async fn stop(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("Failed to kill child process: {e}");
    }
}
