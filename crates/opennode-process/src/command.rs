//! Command templates and bounded one-shot tool invocation

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use opennode_core::{NodeError, NodeResult};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Default time budget for one-shot tools
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(100);

/// Program plus argument vector
///
/// Arguments are kept as separate items so no shell quoting is involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn command(&self, verbose: bool) -> Command {
        let output = || {
            if verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output());
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> NodeError {
        NodeError::Spawn {
            program: self.program.clone(),
            reason: e.to_string(),
        }
    }

    /// Spawn the command with stdin detached
    ///
    /// Output goes to the gateway's own stdout/stderr when `verbose`,
    /// otherwise it is discarded. The child is killed if its handle is
    /// dropped.
    pub fn spawn(&self, verbose: bool) -> NodeResult<Child> {
        self.command(verbose)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))
    }

    /// Spawn a child that keeps running after its handle is dropped
    pub fn spawn_detached(&self, verbose: bool) -> NodeResult<Child> {
        self.command(verbose)
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| self.spawn_error(e))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Runs one-shot external tools with an enforced timeout
///
/// A timeout kills the child and is reported as [`NodeError::ToolTimeout`],
/// the same way a non-zero exit becomes [`NodeError::ToolFailed`].
#[derive(Debug, Clone, Copy)]
pub struct ToolRunner {
    timeout: Duration,
    verbose: bool,
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL_TIMEOUT)
    }
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            verbose: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Forward tool output instead of discarding it
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `spec` to completion
    pub async fn run(&self, spec: &CommandSpec) -> NodeResult<()> {
        debug!(cmd = %spec, timeout = ?self.timeout, "Running tool");
        let mut child = spec.spawn(self.verbose)?;

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => check_status(spec, status),
            Ok(Err(e)) => {
                warn!(cmd = %spec, error = %e, "Failed waiting for tool");
                Err(NodeError::ToolFailed {
                    tool: spec.program.clone(),
                    code: None,
                })
            }
            Err(_) => {
                warn!(cmd = %spec, timeout = ?self.timeout, "Tool timed out, killing it");
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Kill after timeout failed");
                }
                Err(NodeError::ToolTimeout {
                    tool: spec.program.clone(),
                    timeout: self.timeout,
                })
            }
        }
    }
}

fn check_status(spec: &CommandSpec, status: ExitStatus) -> NodeResult<()> {
    debug!(cmd = %spec, %status, "Tool finished");
    if status.success() {
        Ok(())
    } else {
        Err(NodeError::ToolFailed {
            tool: spec.program.clone(),
            code: status.code(),
        })
    }
}
