use std::io::{Read, Write};

use log::{debug, warn};

use crate::error::{LinkError, Result};

use super::{
    codec,
    status::Status,
    transport::Connection,
    types::{ItemRef, Kind, Matrix2D, Pose, Ptr, Value},
};

/// One command exchange in flight.
///
/// Arguments are staged in memory and reach the socket in a single write,
/// either right before the first result is read or when the status is
/// collected. A local encoding failure therefore never leaves half a frame
/// on the wire.
pub struct Frame<'a, S: Read + Write> {
    stream: &'a mut S,
    pending: Vec<u8>,
    sent: bool,
    complete: bool,
}

impl<'a, S: Read + Write> Frame<'a, S> {
    pub(crate) fn new(stream: &'a mut S, name: &str) -> Result<Self> {
        let mut pending = Vec::new();
        codec::write_line(&mut pending, name)?;
        Ok(Self {
            stream,
            pending,
            sent: false,
            complete: false,
        })
    }

    fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.sent = true;
            self.stream.write_all(&self.pending)?;
            self.stream.flush()?;
            self.pending.clear();
        }
        Ok(())
    }

    pub fn send(&mut self, value: &Value) -> Result<()> {
        codec::write_value(&mut self.pending, value)
    }

    pub fn send_int(&mut self, value: i32) -> Result<()> {
        codec::write_int(&mut self.pending, value)
    }

    pub fn send_line(&mut self, line: &str) -> Result<()> {
        codec::write_line(&mut self.pending, line)
    }

    pub fn send_array(&mut self, values: &[f64]) -> Result<()> {
        codec::write_array(&mut self.pending, values)
    }

    pub fn send_matrix(&mut self, matrix: &Matrix2D) -> Result<()> {
        codec::write_matrix(&mut self.pending, matrix)
    }

    pub fn send_pose(&mut self, pose: &Pose) -> Result<()> {
        codec::write_pose(&mut self.pending, pose)
    }

    pub fn send_item(&mut self, item: &ItemRef) -> Result<()> {
        codec::write_item(&mut self.pending, item)
    }

    pub fn send_ptr(&mut self, ptr: Ptr) -> Result<()> {
        codec::write_ptr(&mut self.pending, ptr)
    }

    pub fn send_xyz(&mut self, xyz: &[f64; 3]) -> Result<()> {
        codec::write_xyz(&mut self.pending, xyz)
    }

    pub fn recv(&mut self, kind: Kind) -> Result<Value> {
        self.flush()?;
        codec::read_value(self.stream, kind)
    }

    pub fn recv_int(&mut self) -> Result<i32> {
        self.flush()?;
        codec::read_int(self.stream)
    }

    pub fn recv_line(&mut self) -> Result<String> {
        self.flush()?;
        codec::read_line(self.stream)
    }

    pub fn recv_array(&mut self) -> Result<Vec<f64>> {
        self.flush()?;
        codec::read_array(self.stream)
    }

    pub fn recv_matrix(&mut self) -> Result<Matrix2D> {
        self.flush()?;
        codec::read_matrix(self.stream)
    }

    pub fn recv_pose(&mut self) -> Result<Pose> {
        self.flush()?;
        codec::read_pose(self.stream)
    }

    pub fn recv_item(&mut self) -> Result<ItemRef> {
        self.flush()?;
        codec::read_item(self.stream)
    }

    pub fn recv_ptr(&mut self) -> Result<Ptr> {
        self.flush()?;
        codec::read_ptr(self.stream)
    }

    pub fn recv_xyz(&mut self) -> Result<[f64; 3]> {
        self.flush()?;
        codec::read_xyz(self.stream)
    }

    /// Sends anything still staged and consumes the trailing status.
    pub(crate) fn finish(&mut self) -> Result<()> {
        self.flush()?;
        let status = Status::read(self.stream)?;
        self.complete = true;
        status.into_result()
    }

    /// Bytes went out but the status was never read: the peer and the
    /// stream disagree on where the next frame starts.
    pub(crate) fn desynced(&self) -> bool {
        self.sent && !self.complete
    }
}

/// Runs one exchange: stage `name` and the arguments, read results, check status.
pub(crate) fn exchange<S, T>(
    stream: &mut S,
    name: &str,
    f: impl FnOnce(&mut Frame<'_, S>) -> Result<T>,
) -> (Result<T>, bool)
where
    S: Read + Write,
{
    let mut frame = match Frame::new(stream, name) {
        Ok(frame) => frame,
        Err(e) => return (Err(e), false),
    };
    let result = f(&mut frame).and_then(|out| frame.finish().map(|_| out));
    (result, frame.desynced())
}

impl Connection {
    /// Issues one command, reconnecting first if the link dropped since the
    /// previous call.
    ///
    /// A fatal error, or any failure that leaves a frame half exchanged,
    /// discards the socket; the next call reconnects.
    pub fn transact<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Frame<'_, std::net::TcpStream>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_connected()?;
        debug!("command {name}");

        let (result, desynced) = exchange(self.stream_mut()?, name, f);
        if let Err(e) = &result {
            if e.is_fatal() || desynced {
                self.discard(e);
            }
        }
        result
    }

    /// Generic typed contract: write `args` in order, then read one value
    /// per entry of `results`, then the status.
    pub fn execute(&mut self, name: &str, args: &[Value], results: &[Kind]) -> Result<Vec<Value>> {
        self.transact(name, |frame| {
            for arg in args {
                frame.send(arg)?;
            }
            results.iter().map(|kind| frame.recv(*kind)).collect()
        })
    }

    /// [`transact`](Self::transact) under the long-operation timeout.
    ///
    /// Reconnects first, so a fresh socket gets the override too.
    pub fn transact_long<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Frame<'_, std::net::TcpStream>) -> Result<T>,
    ) -> Result<T> {
        self.ensure_connected()?;
        let long = self.config().long_timeout;
        self.with_timeout(long, |conn| conn.transact(name, f))
    }

    fn ensure_connected(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        warn!("station link is down, reconnecting");
        self.connect().map_err(|e| match e {
            LinkError::Connection(_) => e,
            other => LinkError::Connection(format!("reconnect failed: {other}")),
        })
    }
}
