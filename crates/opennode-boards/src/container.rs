//! Container node
//!
//! The "node" is a container started on the gateway itself. There is
//! nothing to flash or reset; setup launches the container and bridges a
//! shell inside it to the console port.

use std::path::Path;

use async_trait::async_trait;
use opennode_core::{NodePhase, OpenNode, StepReport};
use opennode_process::{container_shell, CommandSpec, SupervisedProcess, ToolRunner};
use parking_lot::RwLock;
use tracing::{info, instrument};

use crate::config::{ContainerConfig, Timeouts, ToolsSection};

const DOCKER: &str = "docker";

pub struct ContainerNode {
    container: ContainerConfig,
    docker: CommandSpec,
    runner: ToolRunner,
    bridge: SupervisedProcess,
    phase: RwLock<NodePhase>,
}

impl ContainerNode {
    pub fn new(container: ContainerConfig, timeouts: &Timeouts, tools: &ToolsSection) -> Self {
        let bridge = container_shell(&container.name)
            .with_stop_grace(timeouts.stop_grace())
            .with_verbose(tools.verbose);
        Self {
            container,
            docker: CommandSpec::new(DOCKER),
            runner: ToolRunner::new(timeouts.tool()).verbose(tools.verbose),
            bridge,
            phase: RwLock::new(NodePhase::Unconfigured),
        }
    }

    /// Use another docker-compatible client; subcommands are appended to it
    pub fn with_docker(mut self, docker: CommandSpec) -> Self {
        self.docker = docker;
        self
    }

    pub fn with_bridge(mut self, bridge: SupervisedProcess) -> Self {
        self.bridge = bridge;
        self
    }

    pub fn bridge(&self) -> &SupervisedProcess {
        &self.bridge
    }

    pub fn run_command(&self) -> CommandSpec {
        self.docker.clone().args([
            "run",
            "-ti",
            "--rm",
            "-d",
            "--name",
            self.container.name.as_str(),
            "-h",
            self.container.hostname.as_str(),
            self.container.image.as_str(),
            "bash",
        ])
    }

    pub fn kill_command(&self) -> CommandSpec {
        self.docker
            .clone()
            .args(["kill", self.container.name.as_str()])
    }
}

#[async_trait]
impl OpenNode for ContainerNode {
    fn board_type(&self) -> &str {
        "docker"
    }

    fn phase(&self) -> NodePhase {
        *self.phase.read()
    }

    #[instrument(skip(self), fields(container = %self.container.name))]
    async fn setup(&self, _firmware: Option<&Path>) -> StepReport {
        let mut report = StepReport::from(self.runner.run(&self.run_command()).await);
        let bridge = StepReport::from(self.bridge.start().await);

        *self.phase.write() = if bridge.is_ok() {
            NodePhase::Running
        } else {
            NodePhase::Ready
        };
        report += bridge;

        info!(errors = report.count(), "Container started");
        report
    }

    #[instrument(skip(self), fields(container = %self.container.name))]
    async fn teardown(&self) -> StepReport {
        let mut report = StepReport::from(self.bridge.stop().await);
        report += StepReport::from(self.runner.run(&self.kill_command()).await);
        *self.phase.write() = NodePhase::Unconfigured;

        info!(errors = report.count(), "Container stopped");
        report
    }
}
