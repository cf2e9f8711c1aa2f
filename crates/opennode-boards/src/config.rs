//! Board and gateway configuration
//!
//! A [`BoardConfig`] holds everything that differs between board variants;
//! the lifecycle itself is shared. Presets cover the boards the gateway
//! knows about and a TOML [`GatewayConfig`] selects one and overrides
//! individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use opennode_core::{NodeError, NodeResult};
use opennode_firmware::ElfTarget;
use serde::{Deserialize, Serialize};

// =============================================================================
// Board Configuration
// =============================================================================

/// Per-board constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Board class identifier (e.g. "cc2650")
    pub board_type: String,
    /// Serial console device
    pub tty: PathBuf,
    /// Serial console baud rate
    pub baudrate: u32,
    /// OpenOCD binary
    pub openocd_path: PathBuf,
    /// OpenOCD board script passed with `-f`
    pub openocd_script: String,
    /// Image flashed when no experiment runs
    pub fw_idle: PathBuf,
    /// Console may carry garbage after a flash and needs clearing
    #[serde(default)]
    pub dirty_serial: bool,
    /// Power supply the board is wired to
    pub alim: String,
    /// Autotest commands the board firmware implements
    #[serde(default)]
    pub autotest_available: Vec<String>,
    /// ELF class/machine accepted by the board
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elf_target: Option<ElfTarget>,
    /// Check the CCFG page of images before flashing (CC26x0 only)
    #[serde(default)]
    pub check_ccfg: bool,
    /// Console bridge kind
    pub bridge: BridgeKind,
}

/// Which helper process bridges the node's console
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeKind {
    /// `socat` between the TCP port and the serial device
    Serial,
    /// `socat` between the TCP port and a shell in a container
    Container(ContainerConfig),
}

/// Container launched by the container-shell variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_container_name")]
    pub name: String,
    #[serde(default = "default_container_image")]
    pub image: String,
    /// Hostname given to the container (the gateway's own by default)
    pub hostname: String,
}

fn default_container_name() -> String {
    "node-docker".to_string()
}

fn default_container_image() -> String {
    "fitiotlab/iot-lab/iot-lab-jupyterlab".to_string()
}

const SIMPLELINK_TTY: &str = "/dev/iotlab/ttyON_SIMPLELINK";
const SIMPLELINK_BAUDRATE: u32 = 115200;
const TI_OPENOCD_PATH: &str = "/opt/ti-openocd-0.10.0/bin/openocd";
const STATIC_DIR: &str = "/var/lib/opennode/static";

/// Names accepted by [`BoardConfig::preset`]
pub const PRESETS: &[&str] = &["cc2650", "cc1352p1", "cc1352r1", "cc2652r1", "docker"];

impl BoardConfig {
    /// Built-in configuration for a known board type
    pub fn preset(board_type: &str) -> Option<Self> {
        let config = match board_type {
            "cc2650" => {
                let mut config = Self::simplelink("cc2650", "board/ti_cc26x0_launchpad.cfg");
                config.check_ccfg = true;
                config
            }
            "cc1352p1" | "cc1352r1" => Self::simplelink(board_type, "board/ti_cc13x2_launchpad.cfg"),
            "cc2652r1" => Self::simplelink(board_type, "board/ti_cc26x2_launchpad.cfg"),
            "docker" => Self::docker(&local_hostname()),
            _ => return None,
        };
        Some(config)
    }

    /// TI SimpleLink launchpad family
    pub fn simplelink(board_type: &str, openocd_script: &str) -> Self {
        Self {
            board_type: board_type.to_string(),
            tty: PathBuf::from(SIMPLELINK_TTY),
            baudrate: SIMPLELINK_BAUDRATE,
            openocd_path: PathBuf::from(TI_OPENOCD_PATH),
            openocd_script: openocd_script.to_string(),
            fw_idle: Path::new(STATIC_DIR).join(format!("{}_idle.elf", board_type)),
            dirty_serial: true,
            alim: "5V".to_string(),
            autotest_available: ["echo", "get_time", "leds_on", "leds_off"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            elf_target: Some(ElfTarget::ARM32),
            check_ccfg: false,
            bridge: BridgeKind::Serial,
        }
    }

    /// Container node reached through a shell bridge
    pub fn docker(hostname: &str) -> Self {
        Self {
            board_type: "docker".to_string(),
            tty: PathBuf::new(),
            baudrate: 0,
            openocd_path: PathBuf::new(),
            openocd_script: String::new(),
            fw_idle: PathBuf::new(),
            dirty_serial: false,
            alim: String::new(),
            autotest_available: Vec::new(),
            elf_target: None,
            check_ccfg: false,
            bridge: BridgeKind::Container(ContainerConfig {
                name: default_container_name(),
                image: default_container_image(),
                hostname: hostname.to_string(),
            }),
        }
    }

    pub fn supports_autotest(&self, command: &str) -> bool {
        self.autotest_available.iter().any(|c| c == command)
    }
}

/// The gateway's host name, given to the node container
pub fn local_hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    match std::str::from_utf8(&buf[..end]) {
        Ok(name) if !name.is_empty() => name.to_string(),
        _ => "localhost".to_string(),
    }
}

// =============================================================================
// Timing Configuration
// =============================================================================

/// Wait bounds and tool budgets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// How long the device may take to vanish during a power transition
    #[serde(default = "default_tty_vanish_ms")]
    pub tty_vanish_ms: u64,
    /// How long the device may take to (re)appear
    #[serde(default = "default_tty_appear_ms")]
    pub tty_appear_ms: u64,
    /// Device presence polling period
    #[serde(default = "default_tty_poll_ms")]
    pub tty_poll_ms: u64,
    /// Budget for one-shot tools (flash, reset, container control)
    #[serde(default = "default_tool_secs")]
    pub tool_secs: u64,
    /// Grace period between SIGTERM and SIGKILL when stopping a bridge
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Budget for firmware conversion during verification
    #[serde(default = "default_verify_secs")]
    pub verify_secs: u64,
}

fn default_tty_vanish_ms() -> u64 {
    1000
}

fn default_tty_appear_ms() -> u64 {
    5000
}

fn default_tty_poll_ms() -> u64 {
    100
}

fn default_tool_secs() -> u64 {
    100
}

fn default_stop_grace_ms() -> u64 {
    2000
}

fn default_verify_secs() -> u64 {
    100
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            tty_vanish_ms: default_tty_vanish_ms(),
            tty_appear_ms: default_tty_appear_ms(),
            tty_poll_ms: default_tty_poll_ms(),
            tool_secs: default_tool_secs(),
            stop_grace_ms: default_stop_grace_ms(),
            verify_secs: default_verify_secs(),
        }
    }
}

impl Timeouts {
    pub fn tty_vanish(&self) -> Duration {
        Duration::from_millis(self.tty_vanish_ms)
    }

    pub fn tty_appear(&self) -> Duration {
        Duration::from_millis(self.tty_appear_ms)
    }

    pub fn tty_poll(&self) -> Duration {
        Duration::from_millis(self.tty_poll_ms.max(1))
    }

    pub fn tool(&self) -> Duration {
        Duration::from_secs(self.tool_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn verify(&self) -> Duration {
        Duration::from_secs(self.verify_secs)
    }
}

// =============================================================================
// Gateway Configuration File
// =============================================================================

/// Gateway configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// `[node]` section: preset plus field overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Preset name (see [`PRESETS`])
    #[serde(default = "default_board")]
    pub board: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tty: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openocd_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fw_idle: Option<PathBuf>,
}

fn default_board() -> String {
    "cc2650".to_string()
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            board: default_board(),
            hostname: None,
            tty: None,
            baudrate: None,
            openocd_path: None,
            fw_idle: None,
        }
    }
}

/// `[tools]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsSection {
    /// objcopy used by the CCFG verifier
    #[serde(default = "default_objcopy")]
    pub objcopy: String,
    /// Forward tool and bridge output to the gateway's stdout/stderr
    #[serde(default)]
    pub verbose: bool,
    /// Records the debug server pid so a later invocation can stop it
    #[serde(default = "default_debug_pidfile")]
    pub debug_pidfile: PathBuf,
}

fn default_objcopy() -> String {
    "objcopy".to_string()
}

fn default_debug_pidfile() -> PathBuf {
    std::env::temp_dir().join("opennode-debug.pid")
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            objcopy: default_objcopy(),
            verbose: false,
            debug_pidfile: default_debug_pidfile(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> NodeResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("read {}: {}", path.display(), e)))?;
        Self::parse(&content)
            .map_err(|e| NodeError::Config(format!("parse {}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve the board preset and apply the overrides
    pub fn board(&self) -> NodeResult<BoardConfig> {
        let mut board = BoardConfig::preset(&self.node.board).ok_or_else(|| {
            NodeError::Config(format!(
                "unknown board '{}' (known: {})",
                self.node.board,
                PRESETS.join(", ")
            ))
        })?;

        let node = &self.node;
        if let Some(tty) = &node.tty {
            board.tty = tty.clone();
        }
        if let Some(baudrate) = node.baudrate {
            board.baudrate = baudrate;
        }
        if let Some(openocd_path) = &node.openocd_path {
            board.openocd_path = openocd_path.clone();
        }
        if let Some(fw_idle) = &node.fw_idle {
            board.fw_idle = fw_idle.clone();
        }
        if let (Some(hostname), BridgeKind::Container(container)) =
            (&node.hostname, &mut board.bridge)
        {
            container.hostname = hostname.clone();
        }
        Ok(board)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplelink_presets() {
        let cc2650 = BoardConfig::preset("cc2650").unwrap();
        assert_eq!(cc2650.tty, PathBuf::from("/dev/iotlab/ttyON_SIMPLELINK"));
        assert_eq!(cc2650.baudrate, 115200);
        assert_eq!(
            cc2650.openocd_path,
            PathBuf::from("/opt/ti-openocd-0.10.0/bin/openocd")
        );
        assert!(cc2650.dirty_serial);
        assert!(cc2650.check_ccfg);
        assert_eq!(cc2650.alim, "5V");
        assert_eq!(cc2650.elf_target, Some(ElfTarget::ARM32));
        assert!(cc2650.supports_autotest("leds_on"));
        assert!(!cc2650.supports_autotest("radio_ping_pong"));

        let cc1352 = BoardConfig::preset("cc1352p1").unwrap();
        assert!(!cc1352.check_ccfg);
        assert_eq!(cc1352.bridge, BridgeKind::Serial);
        assert!(BoardConfig::preset("m3").is_none());
    }

    #[test]
    fn test_docker_preset() {
        let docker = BoardConfig::docker("node-a8-1");
        match docker.bridge {
            BridgeKind::Container(c) => {
                assert_eq!(c.name, "node-docker");
                assert_eq!(c.image, "fitiotlab/iot-lab/iot-lab-jupyterlab");
                assert_eq!(c.hostname, "node-a8-1");
            }
            other => panic!("Expected container bridge, got {:?}", other),
        }
    }

    #[test]
    fn test_local_hostname_is_kernel_hostname() {
        let kernel = std::fs::read_to_string("/proc/sys/kernel/hostname").unwrap();
        assert_eq!(local_hostname(), kernel.trim());

        match BoardConfig::preset("docker").unwrap().bridge {
            BridgeKind::Container(c) => assert_eq!(c.hostname, kernel.trim()),
            other => panic!("Expected container bridge, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = GatewayConfig::parse("").unwrap();
        assert_eq!(config.node.board, "cc2650");
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.timeouts.tool(), Duration::from_secs(100));
        assert_eq!(config.tools.objcopy, "objcopy");
        assert!(config.tools.debug_pidfile.ends_with("opennode-debug.pid"));
    }

    #[test]
    fn test_overrides_applied() {
        let toml = r#"
[node]
board = "cc2652r1"
tty = "/dev/ttyACM0"
baudrate = 500000
fw_idle = "/tmp/idle.elf"

[timeouts]
tty_appear_ms = 250
"#;
        let config = GatewayConfig::parse(toml).unwrap();
        let board = config.board().unwrap();
        assert_eq!(board.board_type, "cc2652r1");
        assert_eq!(board.tty, PathBuf::from("/dev/ttyACM0"));
        assert_eq!(board.baudrate, 500000);
        assert_eq!(board.fw_idle, PathBuf::from("/tmp/idle.elf"));
        assert_eq!(config.timeouts.tty_appear(), Duration::from_millis(250));
        assert_eq!(config.timeouts.tty_poll_ms, 100);
    }

    #[test]
    fn test_docker_hostname_override() {
        let toml = r#"
[node]
board = "docker"
hostname = "gw-42"
"#;
        let board = GatewayConfig::parse(toml).unwrap().board().unwrap();
        match board.bridge {
            BridgeKind::Container(c) => assert_eq!(c.hostname, "gw-42"),
            other => panic!("Expected container bridge, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_board() {
        let toml = "[node]\nboard = \"wsn430\"\n";
        let err = GatewayConfig::parse(toml).unwrap().board().unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
