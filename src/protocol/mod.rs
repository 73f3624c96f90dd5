//! Station wire protocol.
//!
//! This module implements the client side of the station's command protocol:
//! a persistent TCP connection carrying strictly sequential request/response
//! exchanges made of fixed-layout binary values.
//!
//! # Overview
//!
//! A session starts with a line handshake (`CMD_START`, then the safe-mode
//! and auto-update flags) that the station answers with `READY`. Every
//! command after that has the same shape:
//!
//! ```text
//! <CommandName>\n  <typed arguments>  <typed results>  <Int32 status> [<Line message>]
//! ```
//!
//! The argument and result layouts are fixed per command; the status is
//! always present and, for warnings (2) and errors (3), followed by one
//! message line.
//!
//! # Key Components
//!
//! - [`codec`]: binary layout of every wire type, big-endian throughout.
//! - [`Status`]: interpretation of the trailing status code.
//! - [`Connection`]: socket ownership, port scan, handshake, station launch,
//!   liveness probe and scoped timeouts.
//! - [`Frame`]: one command exchange, built through
//!   [`Connection::transact`] or [`Connection::execute`].
//!
//! # Failure Model
//!
//! There is no resynchronization token on the wire. A short read, an
//! unknown status, or a timeout in the middle of a frame drops the socket;
//! the next call reconnects. A call that fails is never retried.
//!
//! # See Also
//!
//! - [`Link`](crate::Link): caller-facing operations built on these primitives.
pub mod codec;
mod dispatch;
mod launcher;
mod status;
mod transport;
mod types;

#[cfg(test)]
pub(crate) mod stub;

pub use dispatch::Frame;
pub use launcher::{ProcessLauncher, ServerLauncher};
pub use status::Status;
pub use transport::{Connection, ConnectionState, TimeoutGuard};
pub use types::{ItemRef, Kind, Matrix2D, Pose, Ptr, Value};
