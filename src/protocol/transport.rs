use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    ops::{Deref, DerefMut},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    config::LinkConfig,
    error::{LinkError, Result},
};

use super::{
    codec::{read_line, write_line},
    launcher::{ProcessLauncher, ServerLauncher, wait_responsive},
};

const CONNECT_ATTEMPTS: usize = 2;
const HANDSHAKE_START: &str = "CMD_START";
const HANDSHAKE_READY: &str = "READY";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Seen through a [`Link`](crate::Link) while a call holds the connection.
    Busy,
}

/// A strictly sequential request/response channel to one station.
///
/// No command may start before the previous command's full response has been
/// read, and nothing here locks. Sharing a connection between threads would
/// let one thread consume bytes of another thread's reply, so controllers
/// running in parallel each open their own connection.
pub struct Connection {
    config: LinkConfig,
    stream: Option<TcpStream>,
    state: ConnectionState,
    port: Option<u16>,
    launcher: Box<dyn ServerLauncher + Send>,
}

impl Connection {
    /// Creates a disconnected connection; no I/O happens until [`connect`](Self::connect).
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            stream: None,
            state: ConnectionState::Disconnected,
            port: None,
            launcher: Box::new(ProcessLauncher),
        }
    }

    pub fn with_launcher(mut self, launcher: impl ServerLauncher + Send + 'static) -> Self {
        self.launcher = Box::new(launcher);
        self
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Port of the current session, if any.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Scans for a station, launching a local one if nothing answers.
    pub fn connect(&mut self) -> Result<()> {
        self.disconnect();
        self.state = ConnectionState::Connecting;

        let widened = self.establish().and_then(|(stream, port)| {
            stream.set_read_timeout(Some(self.config.timeout))?;
            stream.set_write_timeout(Some(self.config.timeout))?;
            Ok((stream, port))
        });

        match widened {
            Ok((stream, port)) => {
                info!("connected to station at {}:{port}", self.config.host);
                self.stream = Some(stream);
                self.port = Some(port);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<(TcpStream, u16)> {
        for attempt in 0..CONNECT_ATTEMPTS {
            if let Some(found) = self.scan() {
                return Ok(found);
            }
            if attempt + 1 == CONNECT_ATTEMPTS || !self.launch()? {
                break;
            }
        }

        Err(LinkError::Connection(format!(
            "no station answered at {} on ports {:?}",
            self.config.host,
            self.config.candidate_ports()
        )))
    }

    fn scan(&self) -> Option<(TcpStream, u16)> {
        let flags = self.config.handshake_flags();

        for port in self.config.candidate_ports() {
            for addr in self.resolve(port) {
                match self.try_port(addr, &flags) {
                    Ok(stream) => return Some((stream, port)),
                    Err(e) => debug!("no station at {addr}: {e}"),
                }
            }
        }
        None
    }

    fn resolve(&self, port: u16) -> Vec<SocketAddr> {
        match (self.config.host.as_str(), port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!("failed to resolve {}: {e}", self.config.host);
                Vec::new()
            }
        }
    }

    fn try_port(&self, addr: SocketAddr, flags: &str) -> Result<TcpStream> {
        let timeout = self.config.bootstrap_timeout;
        let mut stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        handshake(&mut stream, flags)?;
        Ok(stream)
    }

    /// Starts a local station. Returns whether a launch happened.
    fn launch(&self) -> Result<bool> {
        let Some(options) = &self.config.launch else {
            return Ok(false);
        };
        if !self.config.is_local() {
            debug!("not launching a station for remote host {}", self.config.host);
            return Ok(false);
        }

        let port = self.config.launch_port();
        self.launcher.launch(options, port)?;

        let ready = self
            .resolve(port)
            .into_iter()
            .any(|addr| wait_responsive(addr, options.startup_wait));
        if !ready {
            warn!("launched station is not answering on port {port} yet");
        }
        Ok(true)
    }

    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            info!("disconnected from station");
        }
        self.port = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Drops a socket whose framing can no longer be trusted.
    pub(crate) fn discard(&mut self, cause: &LinkError) {
        warn!("dropping connection after fatal error: {cause}");
        self.disconnect();
    }

    /// Advisory liveness probe.
    ///
    /// The socket counts as dead when a non-blocking peek sees end of stream.
    /// The peer may still close right after this returns `true`; a failing
    /// call is the authoritative signal.
    pub fn is_connected(&self) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        if self.state != ConnectionState::Connected || stream.set_nonblocking(true).is_err() {
            return false;
        }

        let mut probe = [0_u8; 1];
        let alive = match stream.peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        };

        stream.set_nonblocking(false).is_ok() && alive
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.stream
            .as_ref()
            .and_then(|s| s.read_timeout().ok().flatten())
    }

    /// Runs `f` with the receive timeout raised to `timeout`, restoring the
    /// previous value afterwards whatever `f` returns.
    pub fn with_timeout<T>(
        &mut self,
        timeout: Duration,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut guard = TimeoutGuard::acquire(self, timeout)?;
        f(&mut *guard)
    }

    pub(crate) fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| LinkError::Connection("not connected".into()))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Sends `CMD_START` and the flag line, then requires the literal `READY`.
pub(crate) fn handshake<S: Read + Write>(stream: &mut S, flags: &str) -> Result<()> {
    let mut hello = Vec::new();
    write_line(&mut hello, HANDSHAKE_START)?;
    write_line(&mut hello, flags)?;
    stream.write_all(&hello)?;
    stream.flush()?;

    let reply = read_line(stream)?;
    if reply != HANDSHAKE_READY {
        return Err(LinkError::Connection(format!(
            "unexpected handshake reply {reply:?}"
        )));
    }
    Ok(())
}

/// Scoped receive-timeout override; the prior value comes back on drop.
pub struct TimeoutGuard<'a> {
    conn: &'a mut Connection,
    prior: Duration,
}

impl<'a> TimeoutGuard<'a> {
    pub fn acquire(conn: &'a mut Connection, timeout: Duration) -> Result<Self> {
        let prior = conn.read_timeout().unwrap_or(conn.config.timeout);
        if let Some(stream) = &conn.stream {
            stream.set_read_timeout(Some(timeout))?;
        }
        debug!("receive timeout raised to {timeout:?}");
        Ok(Self { conn, prior })
    }
}

impl Deref for TimeoutGuard<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
    }
}

impl DerefMut for TimeoutGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
    }
}

impl Drop for TimeoutGuard<'_> {
    fn drop(&mut self) {
        if let Some(stream) = &self.conn.stream {
            if let Err(e) = stream.set_read_timeout(Some(self.prior)) {
                warn!("failed to restore receive timeout: {e}");
            }
        }
        debug!("receive timeout restored to {:?}", self.prior);
    }
}
