pub mod cli;
pub mod config;
pub mod error;
pub mod item;
pub mod link;
pub mod motion;
pub mod protocol;

pub use config::LinkConfig;
pub use error::{LinkError, ProtocolError, Result};
pub use item::{Item, ItemType};
pub use link::{Link, RunMode};
pub use motion::{MotionState, MoveKind, MoveTarget};
pub use protocol::{Connection, ConnectionState, ItemRef, Matrix2D, Pose, Ptr};
