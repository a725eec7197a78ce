use std::{convert::Infallible, path::PathBuf, time::Duration};

use tracing::{error, info, warn};

use crate::{
    error::Result,
    prompt::Operator,
    runner::{CommandSpec, ConsoleSink, ErrorPolicy, LineSink, RunOutcome, run},
};

#[derive(Clone, Debug)]
pub struct MachineConfig {
    /// Provisioner command prefix, `vagrant` by default
    pub provisioner: Vec<String>,
    /// Directory holding the VM definition; every provisioner command runs here
    pub dir: PathBuf,
    /// Destroy the VM on exit when no explicit decision was made and nobody can
    /// be asked. Off by default: an unattended run leaves the VM up.
    pub destroy_on_exit: bool,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            provisioner: vec!["vagrant".to_string()],
            dir: PathBuf::from("."),
            destroy_on_exit: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
        }
    }
}

/// How the exit routine decides whether to destroy a running VM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Ask the operator when interactive, otherwise use `destroy_on_exit`.
    Ask,
    Destroy,
    Keep,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Teardown {
    Destroyed,
    NotRunning,
}

/// A single provisioner-managed VM.
pub struct Machine {
    config: MachineConfig,
    operator: Operator,
    sink: Box<dyn LineSink>,
    /// Set by a successful `up`, cleared by a successful `destroy`.
    running: bool,
}

impl Machine {
    pub fn new(config: MachineConfig, operator: Operator) -> Self {
        Self {
            config,
            operator,
            sink: Box::new(ConsoleSink::new()),
            running: false,
        }
    }

    /// Replace the sink receiving command output.
    pub fn with_sink(mut self, sink: Box<dyn LineSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn operator(&mut self) -> &mut Operator {
        &mut self.operator
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv = self
            .config
            .provisioner
            .iter()
            .cloned()
            .chain(args.into_iter().map(Into::into));
        CommandSpec::new(argv, &self.config.dir)
    }

    /// Run a command, applying `policy` when it fails.
    ///
    /// With [`ErrorPolicy::Exit`] a failure never returns: the exit routine runs
    /// and the process exits with code 1.
    pub async fn run(&mut self, spec: CommandSpec, policy: ErrorPolicy) -> Result<RunOutcome> {
        match run(&spec, self.sink.as_mut()).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("{e}");
                match policy {
                    ErrorPolicy::Return => Err(e),
                    ErrorPolicy::Exit => match self.exit(ExitStatus::Failure, Decision::Ask).await {},
                }
            }
        }
    }

    /// Bring the VM up. Failing to do so ends the program.
    pub async fn up(&mut self) -> Result<RunOutcome> {
        info!("🚀 Starting VM in {:?}", self.config.dir);
        let spec = self.command(["up"]);
        let outcome = self.run(spec, ErrorPolicy::Exit).await?;
        self.running = true;
        info!("VM started and configured successfully");
        Ok(outcome)
    }

    /// Execute a shell command inside the VM.
    pub async fn exec(
        &mut self,
        remote_command: &str,
        timeout: Option<Duration>,
        policy: ErrorPolicy,
    ) -> Result<RunOutcome> {
        info!("🧬 Executing `{remote_command}` on the VM");
        let spec = self
            .command(["ssh", "-c", remote_command])
            .with_timeout(timeout);
        self.run(spec, policy).await
    }

    /// Destroy the VM if it is running. Destroying a stopped VM is a no-op.
    pub async fn destroy(&mut self) -> Result<Teardown> {
        if !self.running {
            info!("VM was not running");
            return Ok(Teardown::NotRunning);
        }

        info!("Destroying VM...");
        let spec = self.command(["destroy", "-f"]);
        // A failed destroy must never re-enter the exit routine.
        run(&spec, self.sink.as_mut()).await?;
        self.running = false;
        info!("VM destroyed");
        Ok(Teardown::Destroyed)
    }

    /// Everything the exit routine does before exiting: settle the fate of the
    /// VM and compute the exit code.
    pub async fn shutdown(&mut self, status: ExitStatus, decision: Decision) -> i32 {
        info!("Exiting...");
        let mut code = status.code();

        if self.running {
            if self.should_destroy(decision) {
                if let Err(e) = self.destroy().await {
                    error!("Failed to destroy VM: {e}");
                    code = ExitStatus::Failure.code();
                }
            } else {
                warn!("VM will not be destroyed");
            }
        } else {
            warn!("VM is not running to be destroyed");
            if self.operator.is_interactive() {
                let _ = self.operator.prompt().ask("Press Enter to close...");
            }
        }

        info!("👋 Done");
        code
    }

    /// The exit routine: optional VM teardown, then exit the whole program.
    pub async fn exit(&mut self, status: ExitStatus, decision: Decision) -> Infallible {
        let code = self.shutdown(status, decision).await;
        std::process::exit(code)
    }

    fn should_destroy(&mut self, decision: Decision) -> bool {
        match decision {
            Decision::Destroy => true,
            Decision::Keep => false,
            Decision::Ask if self.operator.is_interactive() => {
                match self.operator.confirm("Destroy VM? (y/n):") {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("No answer to teardown question ({e})");
                        self.config.destroy_on_exit
                    }
                }
            }
            Decision::Ask => self.config.destroy_on_exit,
        }
    }
}
