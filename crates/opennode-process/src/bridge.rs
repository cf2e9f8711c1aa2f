//! Console bridges exposed on the gateway's TCP port
//!
//! Both bridges are `socat` relays listening on [`BRIDGE_PORT`]: one to the
//! node's serial device, one to a shell inside the node container.

use std::path::Path;

use crate::command::CommandSpec;
use crate::supervised::SupervisedProcess;

/// TCP port the console bridge listens on
pub const BRIDGE_PORT: u16 = 20000;

const SOCAT: &str = "socat";

/// Relay between the TCP port and the node's serial device
pub fn serial_redirection(tty: &Path, baudrate: u32) -> SupervisedProcess {
    let spec = CommandSpec::new(SOCAT).args([
        "-d".to_string(),
        format!("TCP4-LISTEN:{},reuseaddr", BRIDGE_PORT),
        format!("open:{},b{},echo=0,raw", tty.display(), baudrate),
    ]);
    SupervisedProcess::new("serial_redirection", spec)
}

/// Relay between the TCP port and a shell in `container`
pub fn container_shell(container: &str) -> SupervisedProcess {
    let spec = CommandSpec::new(SOCAT).args([
        "-d".to_string(),
        format!("TCP4-LISTEN:{},reuseaddr,echo=0,raw", BRIDGE_PORT),
        format!("exec:docker exec -ti {} bash,pty", container),
    ]);
    SupervisedProcess::new("docker", spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_redirection_command() {
        let bridge = serial_redirection(Path::new("/dev/iotlab/ttyON_SIMPLELINK"), 115200);
        assert_eq!(bridge.name(), "serial_redirection");
        assert_eq!(
            bridge.spec().to_string(),
            "socat -d TCP4-LISTEN:20000,reuseaddr open:/dev/iotlab/ttyON_SIMPLELINK,b115200,echo=0,raw"
        );
    }

    #[test]
    fn test_container_shell_command() {
        let bridge = container_shell("node-docker");
        assert_eq!(bridge.name(), "docker");
        // one argv entry, no shell quoting around the exec command
        assert_eq!(
            bridge.spec().get_args()[2],
            "exec:docker exec -ti node-docker bash,pty"
        );
        assert_eq!(bridge.spec().get_args().len(), 3);
    }
}
