//! Motion commands and the blocking-move discipline.
//!
//! The station runs at most one path per mechanism at a time, so every move
//! is preceded by a `WaitMove` on the same robot. A blocking move then waits
//! again after the move was accepted. Both waits run under the long
//! receive timeout, which is restored when the wait returns, failed or not.
//!
//! Per robot the sequence is tracked as
//! `Idle -> MoveRequested -> WaitingCompletion -> Idle`. A non-blocking move
//! stays in `WaitingCompletion` until the next successful wait.
//!
//! # Frame layout
//!
//! ```text
//! MoveX\n  Int kind  Int discriminant  DoubleArray  Item target  Item robot  status
//! MoveC\n  Int 3  <target slots>  <target slots>  Item robot  status
//! ```
//!
//! The array and item slots are always both present. Only the slot that
//! matches the discriminant carries data; the other is an empty array or the
//! invalid item.
use std::{cell::RefCell, collections::HashMap, net::TcpStream};

use log::debug;

use crate::{
    error::{LinkError, Result},
    item::Item,
    protocol::{Connection, Frame, ItemRef, Pose},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionState {
    #[default]
    Idle,
    MoveRequested,
    WaitingCompletion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Joint,
    Linear,
    Circular,
}

impl From<MoveKind> for i32 {
    fn from(value: MoveKind) -> Self {
        match value {
            MoveKind::Joint => 1,
            MoveKind::Linear => 2,
            MoveKind::Circular => 3,
        }
    }
}

/// Where a move should end up.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveTarget {
    Joints(Vec<f64>),
    Pose(Pose),
    Item(ItemRef),
}

impl MoveTarget {
    pub fn discriminant(&self) -> i32 {
        match self {
            MoveTarget::Joints(_) => 1,
            MoveTarget::Pose(_) => 2,
            MoveTarget::Item(_) => 3,
        }
    }

    /// Local checks, done before any byte of the move is staged.
    fn validate(&self) -> Result<()> {
        match self {
            MoveTarget::Joints(joints) if joints.is_empty() => {
                Err(LinkError::Argument("joint target is empty".into()))
            }
            MoveTarget::Pose(pose) if !pose.is_homogeneous() => {
                Err(LinkError::Argument("pose target is not homogeneous".into()))
            }
            MoveTarget::Item(item) if !item.valid() => Err(LinkError::InvalidItem),
            _ => Ok(()),
        }
    }

    fn write(&self, frame: &mut Frame<'_, TcpStream>) -> Result<()> {
        frame.send_int(self.discriminant())?;
        match self {
            MoveTarget::Joints(joints) => {
                frame.send_array(joints)?;
                frame.send_item(&ItemRef::INVALID)
            }
            MoveTarget::Pose(pose) => {
                frame.send_array(&pose.column_major())?;
                frame.send_item(&ItemRef::INVALID)
            }
            MoveTarget::Item(item) => {
                frame.send_array(&[])?;
                frame.send_item(item)
            }
        }
    }
}

impl From<Vec<f64>> for MoveTarget {
    fn from(value: Vec<f64>) -> Self {
        MoveTarget::Joints(value)
    }
}

impl From<&[f64]> for MoveTarget {
    fn from(value: &[f64]) -> Self {
        MoveTarget::Joints(value.to_vec())
    }
}

impl From<Pose> for MoveTarget {
    fn from(value: Pose) -> Self {
        MoveTarget::Pose(value)
    }
}

impl From<&Item<'_>> for MoveTarget {
    fn from(value: &Item<'_>) -> Self {
        MoveTarget::Item(value.raw())
    }
}

/// Per-robot motion state of one link.
#[derive(Debug, Default)]
pub struct MotionTracker {
    states: RefCell<HashMap<u64, MotionState>>,
}

impl MotionTracker {
    pub fn get(&self, robot: u64) -> MotionState {
        self.states
            .borrow()
            .get(&robot)
            .copied()
            .unwrap_or_default()
    }

    fn set(&self, robot: u64, state: MotionState) {
        debug!("robot {robot} motion {state:?}");
        if state == MotionState::Idle {
            self.states.borrow_mut().remove(&robot);
        } else {
            self.states.borrow_mut().insert(robot, state);
        }
    }
}

fn wait_move(conn: &mut Connection, robot: &ItemRef) -> Result<()> {
    conn.transact_long("WaitMove", |f| f.send_item(robot))
}

impl Item<'_> {
    /// Blocks until the robot has finished its current path.
    pub fn wait_move(&self) -> Result<()> {
        if !self.valid() {
            return Err(LinkError::InvalidItem);
        }
        let robot = self.raw();
        self.link().with(|conn| wait_move(conn, &robot))?;
        self.link().motion.set(robot.id, MotionState::Idle);
        Ok(())
    }

    /// Joint-space move.
    pub fn move_j(&self, target: impl Into<MoveTarget>, blocking: bool) -> Result<()> {
        let target = target.into();
        self.run_move(MoveKind::Joint, blocking, |f| target.write(f), &[&target])
    }

    /// Straight-line move.
    pub fn move_l(&self, target: impl Into<MoveTarget>, blocking: bool) -> Result<()> {
        let target = target.into();
        self.run_move(MoveKind::Linear, blocking, |f| target.write(f), &[&target])
    }

    /// Circular move through `via` ending at `to`.
    pub fn move_c(
        &self,
        via: impl Into<MoveTarget>,
        to: impl Into<MoveTarget>,
        blocking: bool,
    ) -> Result<()> {
        let (via, to) = (via.into(), to.into());
        self.run_move(
            MoveKind::Circular,
            blocking,
            |f| {
                via.write(f)?;
                to.write(f)
            },
            &[&via, &to],
        )
    }

    fn run_move(
        &self,
        kind: MoveKind,
        blocking: bool,
        targets: impl FnOnce(&mut Frame<'_, TcpStream>) -> Result<()>,
        checks: &[&MoveTarget],
    ) -> Result<()> {
        if !self.valid() {
            return Err(LinkError::InvalidItem);
        }
        for target in checks {
            target.validate()?;
        }

        let robot = self.raw();
        let tracker = &self.link().motion;
        let command = match kind {
            MoveKind::Circular => "MoveC",
            _ => "MoveX",
        };

        self.link().with(|conn| {
            wait_move(conn, &robot)?;
            tracker.set(robot.id, MotionState::MoveRequested);
            let accepted = conn.transact(command, |f| {
                f.send_int(kind.into())?;
                targets(f)?;
                f.send_item(&robot)
            });
            if let Err(e) = accepted {
                tracker.set(robot.id, MotionState::Idle);
                return Err(e);
            }

            tracker.set(robot.id, MotionState::WaitingCompletion);
            if blocking {
                wait_move(conn, &robot)?;
                tracker.set(robot.id, MotionState::Idle);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        Link,
        protocol::{codec::*, stub::StubServer},
    };

    /// Reads one client frame of the motion commands and returns its name.
    fn serve_motion(s: &mut TcpStream, robot: u64) -> String {
        let name = read_line(s).unwrap();
        match name.as_str() {
            "WaitMove" => {
                assert_eq!(read_item(s).unwrap().id, robot);
            }
            "MoveX" => {
                read_int(s).unwrap();
                read_target(s);
                assert_eq!(read_item(s).unwrap().id, robot);
            }
            "MoveC" => {
                assert_eq!(read_int(s).unwrap(), 3);
                read_target(s);
                read_target(s);
                assert_eq!(read_item(s).unwrap().id, robot);
            }
            other => panic!("unexpected command {other}"),
        }
        name
    }

    fn read_target(s: &mut TcpStream) -> (i32, Vec<f64>, ItemRef) {
        let disc = read_int(s).unwrap();
        let array = read_array(s).unwrap();
        let item = read_item(s).unwrap();
        (disc, array, item)
    }

    #[test]
    fn discriminants() {
        assert_eq!(MoveTarget::Joints(vec![0.0]).discriminant(), 1);
        assert_eq!(MoveTarget::Pose(Pose::identity()).discriminant(), 2);
        assert_eq!(MoveTarget::Item(ItemRef::new(1, 6)).discriminant(), 3);
    }

    #[test]
    fn blocking_move_brackets_with_waits() {
        let stub = StubServer::spawn(|s| {
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(serve_motion(s, 500));
                write_int(s, 0).unwrap();
            }
            seen
        });
        let link = Link::connect(stub.config()).unwrap();
        let steady = link.read_timeout();
        let robot = link.bind(ItemRef::new(500, 2));

        let joints: Vec<f64> = vec![0.0, -90.0, 90.0, 0.0, 90.0, 0.0];
        robot.move_j(joints, true).unwrap();

        assert_eq!(stub.join(), vec!["WaitMove", "MoveX", "WaitMove"]);
        assert_eq!(link.read_timeout(), steady);
        assert_eq!(link.motion_state(&robot), MotionState::Idle);
    }

    #[test]
    fn non_blocking_move_waits_only_before() {
        let stub = StubServer::spawn(|s| {
            let mut seen = Vec::new();
            for _ in 0..2 {
                seen.push(serve_motion(s, 500));
                write_int(s, 0).unwrap();
            }
            seen
        });
        let link = Link::connect(stub.config()).unwrap();
        let robot = link.bind(ItemRef::new(500, 2));

        robot.move_l(Pose::translation(400.0, 0.0, 300.0), false).unwrap();

        assert_eq!(stub.join(), vec!["WaitMove", "MoveX"]);
        assert_eq!(link.motion_state(&robot), MotionState::WaitingCompletion);
    }

    #[test]
    fn target_slots_have_fixed_shape() {
        let stub = StubServer::spawn(|s| {
            let mut frames = Vec::new();
            for _ in 0..3 {
                assert_eq!(serve_wait(s), "WaitMove");
                assert_eq!(read_line(s).unwrap(), "MoveX");
                let kind = read_int(s).unwrap();
                let target = read_target(s);
                read_item(s).unwrap();
                write_int(s, 0).unwrap();
                frames.push((kind, target));
            }
            frames
        });
        let link = Link::connect(stub.config()).unwrap();
        let robot = link.bind(ItemRef::new(500, 2));
        let home = link.bind(ItemRef::new(600, 6));
        let pose = Pose::translation(1.0, 2.0, 3.0);

        robot.move_j(MoveTarget::Joints(vec![10.0, 20.0]), false).unwrap();
        robot.move_l(pose, false).unwrap();
        robot.move_j(&home, false).unwrap();

        let frames = stub.join();
        let (kind, (disc, array, item)) = &frames[0];
        assert_eq!((*kind, *disc), (1, 1));
        assert_eq!(array, &vec![10.0, 20.0]);
        assert!(!item.valid());

        let (kind, (disc, array, item)) = &frames[1];
        assert_eq!((*kind, *disc), (2, 2));
        assert_eq!(array.as_slice(), &pose.column_major()[..]);
        assert!(!item.valid());

        let (kind, (disc, array, item)) = &frames[2];
        assert_eq!((*kind, *disc), (1, 3));
        assert!(array.is_empty());
        assert_eq!(item.id, 600);
    }

    fn serve_wait(s: &mut TcpStream) -> String {
        let name = read_line(s).unwrap();
        read_item(s).unwrap();
        write_int(s, 0).unwrap();
        name
    }

    #[test]
    fn circular_move_sends_two_tagged_targets() {
        let stub = StubServer::spawn(|s| {
            assert_eq!(serve_wait(s), "WaitMove");
            assert_eq!(read_line(s).unwrap(), "MoveC");
            assert_eq!(read_int(s).unwrap(), 3);
            let via = read_target(s);
            let to = read_target(s);
            assert_eq!(read_item(s).unwrap().id, 500);
            write_int(s, 0).unwrap();
            assert_eq!(serve_wait(s), "WaitMove");
            (via, to)
        });
        let link = Link::connect(stub.config()).unwrap();
        let robot = link.bind(ItemRef::new(500, 2));
        let target = link.bind(ItemRef::new(601, 6));

        robot
            .move_c(Pose::translation(0.0, 100.0, 0.0), &target, true)
            .unwrap();

        let ((d1, a1, i1), (d2, a2, i2)) = stub.join();
        assert_eq!((d1, a1.len(), i1.valid()), (2, 16, false));
        assert_eq!((d2, a2.len(), i2.id), (3, 0, 601));
    }

    #[test]
    fn failed_move_skips_final_wait() {
        let stub = StubServer::spawn(|s| {
            let mut seen = Vec::new();
            seen.push(serve_motion(s, 500));
            write_int(s, 0).unwrap();
            seen.push(serve_motion(s, 500));
            write_int(s, 3).unwrap();
            write_line(s, "Target not reachable").unwrap();

            // The link is still in sync; the next command is a fresh frame.
            seen.push(read_line(s).unwrap());
            write_line(s, "5.9").unwrap();
            write_int(s, 0).unwrap();
            seen
        });
        let link = Link::connect(stub.config()).unwrap();
        let steady = link.read_timeout();
        let robot = link.bind(ItemRef::new(500, 2));

        let err = robot
            .move_l(MoveTarget::Joints(vec![1.0, 2.0, 3.0]), true)
            .unwrap_err();
        assert!(matches!(err, LinkError::Remote(m) if m == "Target not reachable"));
        assert_eq!(link.read_timeout(), steady);
        assert_eq!(link.motion_state(&robot), MotionState::Idle);

        link.version().unwrap();
        assert_eq!(stub.join(), vec!["WaitMove", "MoveX", "Version"]);
    }

    #[test]
    fn failed_wait_restores_timeout() {
        let stub = StubServer::spawn(|s| {
            serve_motion(s, 500);
            write_int(s, 0).unwrap();
            serve_motion(s, 500);
            write_int(s, 0).unwrap();
            serve_motion(s, 500);
            write_int(s, 3).unwrap();
            write_line(s, "Collision detected").unwrap();
        });
        let link = Link::connect(stub.config()).unwrap();
        let steady = link.read_timeout();
        let robot = link.bind(ItemRef::new(500, 2));

        let err = robot.move_j(MoveTarget::Joints(vec![0.0; 6]), true).unwrap_err();
        assert!(matches!(err, LinkError::Remote(_)));
        assert_eq!(link.read_timeout(), steady);
        assert_eq!(link.motion_state(&robot), MotionState::WaitingCompletion);
        stub.join();
    }

    #[test]
    fn local_target_errors_send_nothing() {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&commands);
        let stub = StubServer::spawn(move |s| {
            seen.lock().unwrap().push(read_line(s).unwrap());
            write_line(s, "5.9").unwrap();
            write_int(s, 0).unwrap();
        });
        let link = Link::connect(stub.config()).unwrap();
        let robot = link.bind(ItemRef::new(500, 2));

        let mut skewed = *Pose::identity().rows();
        skewed[0][1] = 0.5;
        assert!(matches!(
            robot.move_l(Pose::from_rows(skewed), true),
            Err(LinkError::Argument(_))
        ));
        assert!(matches!(
            robot.move_j(Vec::<f64>::new(), true),
            Err(LinkError::Argument(_))
        ));
        assert!(matches!(
            robot.move_j(MoveTarget::Item(ItemRef::INVALID), true),
            Err(LinkError::InvalidItem)
        ));

        link.version().unwrap();
        stub.join();
        assert_eq!(*commands.lock().unwrap(), vec!["Version"]);
    }
}
