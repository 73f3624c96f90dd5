//! Scripted station used by tests.
use std::{
    net::{TcpListener, TcpStream},
    thread::{self, JoinHandle},
};

use log::info;

use crate::config::LinkConfig;

use super::codec::{read_line, write_line};

pub(crate) struct StubServer<T> {
    port: u16,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> StubServer<T> {
    /// Accepts one client, answers the handshake with `READY`, then hands
    /// the stream to `script`. The listener closes when the script returns.
    pub fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(&mut TcpStream) -> T + Send + 'static,
    {
        Self::start(None, script)
    }

    /// Two sessions on one port, for tests that reconnect: `first` runs on
    /// the first accepted client, `second` on the next one.
    pub fn spawn_pair<F, G>(first: F, second: G) -> Self
    where
        F: FnOnce(&mut TcpStream) + Send + 'static,
        G: FnOnce(&mut TcpStream) -> T + Send + 'static,
    {
        Self::start(Some(Box::new(first)), second)
    }

    #[allow(clippy::type_complexity)]
    fn start<G>(first: Option<Box<dyn FnOnce(&mut TcpStream) + Send>>, last: G) -> Self
    where
        G: FnOnce(&mut TcpStream) -> T + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind stub listener");
        let port = listener.local_addr().expect("no local address").port();

        let handle = thread::spawn(move || {
            if let Some(first) = first {
                let mut stream = accept_session(&listener);
                first(&mut stream);
            }
            let mut stream = accept_session(&listener);
            last(&mut stream)
        });

        Self { port, handle }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> LinkConfig {
        LinkConfig::default().with_forced_port(self.port)
    }

    /// Waits for the script; panics raised inside it fail the calling test.
    pub fn join(self) -> T {
        match self.handle.join() {
            Ok(out) => out,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

fn accept_session(listener: &TcpListener) -> TcpStream {
    let (mut stream, peer) = listener.accept().expect("stub accept failed");
    info!("stub station accepted {peer}");

    assert_eq!(read_line(&mut stream).unwrap(), "CMD_START");
    assert_eq!(read_line(&mut stream).unwrap(), "1 0");
    write_line(&mut stream, "READY").unwrap();
    stream
}

/// A loopback port with nothing listening on it.
pub(crate) fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    listener.local_addr().expect("no local address").port()
}
