use std::{
    net::{SocketAddr, TcpStream},
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info};

use crate::{
    config::LaunchOptions,
    error::{LinkError, Result},
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Starts a local station process.
pub trait ServerLauncher {
    fn launch(&self, options: &LaunchOptions, port: u16) -> Result<()>;
}

/// Spawns the configured executable and leaves it running detached.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl ServerLauncher for ProcessLauncher {
    fn launch(&self, options: &LaunchOptions, port: u16) -> Result<()> {
        let args = options.arguments(port);
        info!("launching {} {}", options.executable.display(), args.join(" "));

        Command::new(&options.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                LinkError::Connection(format!(
                    "failed to start {}: {e}",
                    options.executable.display()
                ))
            })?;
        Ok(())
    }
}

/// Polls until something accepts TCP connections at `addr` or `wait` elapses.
pub fn wait_responsive(addr: SocketAddr, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    loop {
        if TcpStream::connect_timeout(&addr, POLL_INTERVAL).is_ok() {
            debug!("station answering at {addr}");
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
