//! OpenOCD debugger collaborator
//!
//! Flash and reset are bounded one-shot runs. A debug session is a GDB
//! server that must outlive the gateway invocation which started it, so it
//! is spawned detached and its pid is kept in a pidfile; `debug_stop` from
//! any later invocation signals that pid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use opennode_core::{Debugger, NodeError, StepReport};
use opennode_process::{CommandSpec, ToolRunner};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BoardConfig;

const GDB_PORT: u16 = 3333;
const TELNET_PORT: u16 = 4444;
const TCL_PORT: u16 = 6666;

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(20);

/// OpenOCD driving one board through its JTAG probe
pub struct OpenOcd {
    program: CommandSpec,
    script: String,
    runner: ToolRunner,
    verbose: bool,
    pidfile: PathBuf,
    stop_grace: Duration,
    /// GDB server started by this instance, reaped on stop
    session: Mutex<Option<Child>>,
}

impl OpenOcd {
    pub fn new(path: &Path, script: &str, timeout: Duration) -> Self {
        Self {
            program: CommandSpec::new(path.to_string_lossy()),
            script: script.to_string(),
            runner: ToolRunner::new(timeout),
            verbose: false,
            pidfile: std::env::temp_dir().join("opennode-debug.pid"),
            stop_grace: DEFAULT_STOP_GRACE,
            session: Mutex::new(None),
        }
    }

    pub fn from_board(config: &BoardConfig, timeout: Duration) -> Self {
        Self::new(&config.openocd_path, &config.openocd_script, timeout)
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self.runner = self.runner.verbose(verbose);
        self
    }

    /// Invoke OpenOCD through another command; its arguments are appended
    pub fn with_program(mut self, program: CommandSpec) -> Self {
        self.program = program;
        self
    }

    pub fn with_pidfile(mut self, pidfile: &Path) -> Self {
        self.pidfile = pidfile.to_path_buf();
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    fn command<I>(&self, commands: I) -> CommandSpec
    where
        I: IntoIterator<Item = String>,
    {
        let mut spec = self
            .program
            .clone()
            .arg("--debug=0")
            .arg("-f")
            .arg(&self.script);
        for command in commands {
            spec = spec.arg("-c").arg(command);
        }
        spec
    }

    pub fn flash_command(&self, firmware: &Path) -> CommandSpec {
        let image = firmware.display();
        self.command([
            "init".to_string(),
            "targets".to_string(),
            "reset halt".to_string(),
            "reset init".to_string(),
            format!("flash write_image erase {}", image),
            format!("verify_image {}", image),
            "reset run".to_string(),
            "shutdown".to_string(),
        ])
    }

    pub fn reset_command(&self) -> CommandSpec {
        self.command(
            ["init", "targets", "reset run", "shutdown"]
                .into_iter()
                .map(String::from),
        )
    }

    pub fn debug_command(&self) -> CommandSpec {
        self.command([
            format!("tcl_port {}", TCL_PORT),
            format!("telnet_port {}", TELNET_PORT),
            format!("gdb_port {}", GDB_PORT),
            "debug_level 0".to_string(),
            "init".to_string(),
            "targets".to_string(),
            "reset halt".to_string(),
        ])
    }

    /// Whether a debug session, from this or an earlier invocation, is alive
    pub async fn is_debugging(&self) -> bool {
        let mut session = self.session.lock().await;
        self.running_pid(&mut session).is_some()
    }

    fn read_pidfile(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pidfile)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    fn remove_pidfile(&self) {
        if let Err(e) = std::fs::remove_file(&self.pidfile) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(pidfile = %self.pidfile.display(), error = %e, "Cannot remove pidfile");
            }
        }
    }

    fn running_pid(&self, session: &mut Option<Child>) -> Option<u32> {
        if let Some(child) = session.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return child.id();
            }
            *session = None;
        }
        self.read_pidfile().filter(|pid| pid_alive(*pid))
    }
}

/// Whether `pid` is a live process; an unreaped zombie counts as gone
fn pid_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // state is the first field after the parenthesized command name
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .map(|rest| !rest.trim_start().starts_with('Z'))
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn signal(pid: u32, sig: libc::c_int) {
    // SAFETY: plain signal delivery, no memory is shared with the callee
    unsafe {
        libc::kill(pid as libc::pid_t, sig);
    }
}

#[async_trait]
impl Debugger for OpenOcd {
    async fn flash(&self, firmware: &Path) -> StepReport {
        if !firmware.exists() {
            warn!(firmware = %firmware.display(), "Firmware file not found");
            return StepReport::fail(NodeError::Io(format!(
                "firmware {} not found",
                firmware.display()
            )));
        }
        self.runner.run(&self.flash_command(firmware)).await.into()
    }

    async fn reset(&self) -> StepReport {
        self.runner.run(&self.reset_command()).await.into()
    }

    async fn debug_start(&self) -> StepReport {
        let mut session = self.session.lock().await;
        if let Some(pid) = self.running_pid(&mut session) {
            debug!(pid, "Debugger already started");
            return StepReport::ok();
        }

        let child = match self.debug_command().spawn_detached(self.verbose) {
            Ok(child) => child,
            Err(e) => return StepReport::fail(e),
        };
        let pid = child.id();
        *session = Some(child);
        info!(pid = ?pid, gdb_port = GDB_PORT, "Debugger started");

        let Some(pid) = pid else {
            return StepReport::ok();
        };
        match std::fs::write(&self.pidfile, format!("{}\n", pid)) {
            Ok(()) => StepReport::ok(),
            Err(e) => StepReport::fail(NodeError::Io(format!(
                "write {}: {}",
                self.pidfile.display(),
                e
            ))),
        }
    }

    async fn debug_stop(&self) -> StepReport {
        let mut session = self.session.lock().await;
        let pid = self.running_pid(&mut session);
        let child = session.take();
        self.remove_pidfile();

        let Some(pid) = pid else {
            return StepReport::ok();
        };
        signal(pid, libc::SIGTERM);

        match child {
            Some(mut child) => {
                if tokio::time::timeout(self.stop_grace, child.wait()).await.is_err() {
                    warn!(pid, "Debugger ignored SIGTERM, killing");
                    if let Err(e) = child.kill().await {
                        debug!(error = %e, "Debugger already exited");
                    }
                }
            }
            None => {
                let deadline = tokio::time::Instant::now() + self.stop_grace;
                while pid_alive(pid) && tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(STOP_POLL).await;
                }
                if pid_alive(pid) {
                    warn!(pid, "Debugger ignored SIGTERM, killing");
                    signal(pid, libc::SIGKILL);
                }
            }
        }

        info!(pid, "Debugger stopped");
        StepReport::ok()
    }
}
