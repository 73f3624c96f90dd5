//! Connection settings.
//!
//! [`LinkConfig`] gathers everything the transport needs to find, start and
//! talk to a station. All fields have working defaults for a station running
//! on the local machine.
use std::{ops::RangeInclusive, path::PathBuf, time::Duration};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT_START: u16 = 20500;
pub const DEFAULT_PORT_END: u16 = 20502;

/// Per-port connect and handshake timeout.
pub const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(1);
/// Read/write timeout once connected.
pub const STEADY_TIMEOUT: Duration = Duration::from_secs(10);
/// Ceiling for operations known to run long (blocking moves, prompts).
pub const LONG_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub ports: RangeInclusive<u16>,
    /// Bypasses port scanning when set.
    pub forced_port: Option<u16>,
    pub bootstrap_timeout: Duration,
    pub timeout: Duration,
    pub long_timeout: Duration,
    pub safe_mode: bool,
    pub auto_update: bool,
    pub launch: Option<LaunchOptions>,
}

/// How to start a local station when none answers.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: PathBuf,
    pub hidden: bool,
    pub extra_args: Vec<String>,
    pub startup_wait: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            ports: DEFAULT_PORT_START..=DEFAULT_PORT_END,
            forced_port: None,
            bootstrap_timeout: BOOTSTRAP_TIMEOUT,
            timeout: STEADY_TIMEOUT,
            long_timeout: LONG_TIMEOUT,
            safe_mode: true,
            auto_update: false,
            launch: None,
        }
    }
}

impl LinkConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_ports(mut self, ports: RangeInclusive<u16>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_forced_port(mut self, port: u16) -> Self {
        self.forced_port = Some(port);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.bootstrap_timeout = timeout;
        self
    }

    pub fn with_long_timeout(mut self, timeout: Duration) -> Self {
        self.long_timeout = timeout;
        self
    }

    pub fn with_flags(mut self, safe_mode: bool, auto_update: bool) -> Self {
        self.safe_mode = safe_mode;
        self.auto_update = auto_update;
        self
    }

    pub fn with_launch(mut self, launch: LaunchOptions) -> Self {
        self.launch = Some(launch);
        self
    }

    /// Ports to try, in order.
    pub fn candidate_ports(&self) -> Vec<u16> {
        match self.forced_port {
            Some(port) => vec![port],
            None => self.ports.clone().collect(),
        }
    }

    /// Port a launched station is told to listen on.
    pub fn launch_port(&self) -> u16 {
        self.forced_port.unwrap_or(*self.ports.start())
    }

    /// Loopback addresses and `localhost` count as local.
    pub fn is_local(&self) -> bool {
        let host = self.host.trim();
        host.eq_ignore_ascii_case("localhost")
            || host
                .parse::<std::net::IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }

    /// Second handshake line: `<safe_mode> <auto_update>`.
    pub fn handshake_flags(&self) -> String {
        format!("{} {}", u8::from(self.safe_mode), u8::from(self.auto_update))
    }
}

impl LaunchOptions {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            hidden: false,
            extra_args: Vec::new(),
            startup_wait: Duration::from_secs(10),
        }
    }

    /// Command line handed to the station executable.
    pub fn arguments(&self, port: u16) -> Vec<String> {
        let mut args = Vec::new();
        if self.hidden {
            args.extend(["/NOSPLASH", "/NOSHOW", "/HIDDEN"].map(String::from));
        }
        args.push(format!("/PORT={port}"));
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LinkConfig::default();

        assert_eq!(config.candidate_ports(), vec![20500, 20501, 20502]);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.long_timeout, Duration::from_secs(3600));
        assert_eq!(config.handshake_flags(), "1 0");
        assert!(config.is_local());
    }

    #[test]
    fn forced_port_bypasses_range() {
        let config = LinkConfig::default().with_forced_port(30000);

        assert_eq!(config.candidate_ports(), vec![30000]);
        assert_eq!(config.launch_port(), 30000);
    }

    #[test]
    fn locality() {
        assert!(LinkConfig::default().with_host("localhost").is_local());
        assert!(LinkConfig::default().with_host("::1").is_local());
        assert!(!LinkConfig::default().with_host("192.168.1.20").is_local());
        assert!(!LinkConfig::default().with_host("station.lan").is_local());
    }

    #[test]
    fn launch_arguments() {
        let mut launch = LaunchOptions::new("/opt/station/bin/station");
        launch.hidden = true;
        launch.extra_args = vec!["-EXIT_LAST_COM".into()];

        assert_eq!(
            launch.arguments(20501),
            vec!["/NOSPLASH", "/NOSHOW", "/HIDDEN", "/PORT=20501", "-EXIT_LAST_COM"]
        );

        let launch = LaunchOptions::new("station");
        assert_eq!(launch.arguments(20500), vec!["/PORT=20500"]);
    }
}
