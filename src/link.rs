//! Caller-facing session with one station.
//!
//! [`Link`] owns a [`Connection`] and is the only way to reach it: items
//! borrow the link, and every operation, whether station-level or on an
//! item, goes through [`Link::with`] for exactly one sequential exchange.
//!
//! A link is `Send` but not `Sync`. To drive independent mechanisms in
//! parallel, open one link per thread; each is its own session on the
//! station and stays strictly sequential.
use std::{cell::RefCell, fmt, time::Duration};

use log::debug;

use crate::{
    config::LinkConfig,
    error::{LinkError, Result},
    item::{Item, ItemType},
    motion::{MotionState, MotionTracker},
    protocol::{Connection, ConnectionState, ItemRef, Pose, Ptr},
};

/// Simulation or real-robot execution of station programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Simulate,
    QuickValidate,
    MakeProgram,
    RunRobot,
    Other(i32),
}

impl From<i32> for RunMode {
    fn from(value: i32) -> Self {
        match value {
            1 => RunMode::Simulate,
            2 => RunMode::QuickValidate,
            3 => RunMode::MakeProgram,
            6 => RunMode::RunRobot,
            other => RunMode::Other(other),
        }
    }
}

impl From<RunMode> for i32 {
    fn from(value: RunMode) -> Self {
        match value {
            RunMode::Simulate => 1,
            RunMode::QuickValidate => 2,
            RunMode::MakeProgram => 3,
            RunMode::RunRobot => 6,
            RunMode::Other(other) => other,
        }
    }
}

pub struct Link {
    conn: RefCell<Connection>,
    pub(crate) motion: MotionTracker,
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.conn.try_borrow() {
            Ok(conn) => f
                .debug_struct("Link")
                .field("state", &conn.state())
                .field("port", &conn.port())
                .finish(),
            Err(_) => f.debug_struct("Link").field("state", &"busy").finish(),
        }
    }
}

impl Link {
    /// Connects using `config`.
    pub fn connect(config: LinkConfig) -> Result<Self> {
        let mut conn = Connection::new(config);
        conn.connect()?;
        Ok(Self::from_connection(conn))
    }

    /// Wraps a connection as-is; a disconnected one connects on first use.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: RefCell::new(conn),
            motion: MotionTracker::default(),
        }
    }

    /// Runs `f` with exclusive access to the connection.
    ///
    /// Calling back into the same link from inside `f` fails with a
    /// connection error instead of interleaving two frames.
    pub fn with<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .try_borrow_mut()
            .map_err(|_| LinkError::Connection("link is busy with another call".into()))?;
        f(&mut conn)
    }

    /// [`ConnectionState::Busy`] while a call is in flight on this link.
    pub fn state(&self) -> ConnectionState {
        self.conn
            .try_borrow()
            .map_or(ConnectionState::Busy, |conn| conn.state())
    }

    /// Advisory; see [`Connection::is_connected`]. A busy link reports
    /// `true`, since a call holds it open.
    pub fn is_connected(&self) -> bool {
        self.conn.try_borrow().map_or(true, |conn| conn.is_connected())
    }

    /// `None` while a call is in flight on this link.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.conn.try_borrow().ok()?.read_timeout()
    }

    pub fn reconnect(&self) -> Result<()> {
        self.with(|conn| conn.connect())
    }

    /// Fails with the busy error when called from inside another call.
    pub fn disconnect(&self) -> Result<()> {
        self.with(|conn| {
            conn.disconnect();
            Ok(())
        })
    }

    /// Binds a raw reference received elsewhere to this link.
    pub fn bind(&self, raw: ItemRef) -> Item<'_> {
        Item::new(raw, self)
    }

    pub fn motion_state(&self, robot: &Item<'_>) -> MotionState {
        self.motion.get(robot.id())
    }

    pub fn version(&self) -> Result<String> {
        self.with(|conn| conn.transact("Version", |f| f.recv_line()))
    }

    /// Looks an item up by name, optionally restricted to one type.
    pub fn item(&self, name: &str, filter: Option<ItemType>) -> Result<Option<Item<'_>>> {
        let filter = filter.map_or(-1, i32::from);
        let raw = self.with(|conn| {
            conn.transact("G_Item2", |f| {
                f.send_line(name)?;
                f.send_int(filter)?;
                f.recv_item()
            })
        })?;

        debug!("item {name:?} resolved to {}", raw.id);
        Ok(raw.valid().then(|| self.bind(raw)))
    }

    pub fn item_list(&self, filter: Option<ItemType>) -> Result<Vec<Item<'_>>> {
        let filter = filter.map_or(-1, i32::from);
        let raws = self.with(|conn| {
            conn.transact("G_List_Items_ptr", |f| {
                f.send_int(filter)?;
                let count = f.recv_int()?;
                (0..count.max(0)).map(|_| f.recv_item()).collect::<Result<Vec<_>>>()
            })
        })?;

        Ok(raws.into_iter().map(|raw| self.bind(raw)).collect())
    }

    /// Adds a reference frame under `parent` (the station root when `None`).
    pub fn add_frame(&self, name: &str, parent: Option<&Item<'_>>) -> Result<Item<'_>> {
        let parent = match parent {
            Some(p) if !p.valid() => return Err(LinkError::InvalidItem),
            Some(p) => p.raw(),
            None => ItemRef::INVALID,
        };

        let raw = self.with(|conn| {
            conn.transact("Add_FRAME", |f| {
                f.send_pose(&Pose::identity())?;
                f.send_item(&parent)?;
                f.recv_item()
            })
        })?;

        let frame = self.bind(raw);
        frame.set_name(name)?;
        Ok(frame)
    }

    /// Turns scene rendering on or off.
    pub fn render(&self, on: bool) -> Result<()> {
        self.with(|conn| conn.transact("Render", |f| f.send_int(i32::from(on))))
    }

    pub fn set_run_mode(&self, mode: RunMode) -> Result<()> {
        self.with(|conn| conn.transact("S_RunMode", |f| f.send_int(mode.into())))
    }

    pub fn run_mode(&self) -> Result<RunMode> {
        self.with(|conn| conn.transact("G_RunMode", |f| f.recv_int()))
            .map(RunMode::from)
    }

    /// Sends a free-form station command and returns its textual reply.
    pub fn command(&self, name: &str, value: &str) -> Result<String> {
        self.with(|conn| {
            conn.transact("SCMD", |f| {
                f.send_line(name)?;
                f.send_line(value)?;
                f.recv_line()
            })
        })
    }

    /// A popup blocks until the user dismisses it, so it runs under the
    /// long timeout; otherwise the text goes to the status bar.
    pub fn show_message(&self, message: &str, popup: bool) -> Result<()> {
        self.with(|conn| {
            if popup {
                conn.transact_long("ShowMessage", |f| f.send_line(message))
            } else {
                conn.transact("ShowMessageStatus", |f| f.send_line(message))
            }
        })
    }

    /// Number of item pairs currently in collision.
    pub fn collisions(&self) -> Result<i32> {
        self.with(|conn| conn.transact("Collisions", |f| f.recv_int()))
    }

    pub fn add_camera(&self, attach_to: &Item<'_>, params: &str) -> Result<Ptr> {
        if !attach_to.valid() {
            return Err(LinkError::InvalidItem);
        }
        let raw = attach_to.raw();
        self.with(|conn| {
            conn.transact("Cam2D_Add", |f| {
                f.send_item(&raw)?;
                f.send_line(params)?;
                f.recv_ptr()
            })
        })
    }

    pub fn close_camera(&self, camera: Ptr) -> Result<bool> {
        self.with(|conn| {
            conn.transact("Cam2D_Close", |f| {
                f.send_ptr(camera)?;
                f.recv_int()
            })
        })
        .map(|closed| closed > 0)
    }
}
