//! Handles to station-side objects.
//!
//! An [`Item`] pairs the station's opaque reference with the [`Link`] it
//! came from. Handles are cheap values; the link keeps no record of them.
//! Deleting an item zeroes the id of the handle used to delete it, and a
//! zeroed handle fails every operation with [`LinkError::InvalidItem`]
//! before anything reaches the wire. Clones taken before the deletion keep
//! the stale id and will be rejected by the station instead.
use std::fmt;

use crate::{
    error::{LinkError, Result},
    link::Link,
    protocol::{Frame, ItemRef, Pose},
};

/// Station object types as reported by `G_Item_Type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Station,
    Robot,
    Frame,
    Tool,
    Object,
    Target,
    Program,
    Camera,
    Other(i32),
}

impl From<i32> for ItemType {
    fn from(value: i32) -> Self {
        match value {
            1 => ItemType::Station,
            2 => ItemType::Robot,
            3 => ItemType::Frame,
            4 => ItemType::Tool,
            5 => ItemType::Object,
            6 => ItemType::Target,
            8 => ItemType::Program,
            19 => ItemType::Camera,
            other => ItemType::Other(other),
        }
    }
}

impl From<ItemType> for i32 {
    fn from(value: ItemType) -> Self {
        match value {
            ItemType::Station => 1,
            ItemType::Robot => 2,
            ItemType::Frame => 3,
            ItemType::Tool => 4,
            ItemType::Object => 5,
            ItemType::Target => 6,
            ItemType::Program => 8,
            ItemType::Camera => 19,
            ItemType::Other(other) => other,
        }
    }
}

const RECOLOR_DEFAULT_TOLERANCE: f64 = 2.0;

#[derive(Clone)]
pub struct Item<'a> {
    raw: ItemRef,
    link: &'a Link,
}

impl fmt::Debug for Item<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.raw.id)
            .field("kind", &self.raw.kind)
            .finish()
    }
}

impl PartialEq for Item<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Item<'_> {}

impl<'a> Item<'a> {
    pub(crate) fn new(raw: ItemRef, link: &'a Link) -> Self {
        Self { raw, link }
    }

    pub fn id(&self) -> u64 {
        self.raw.id
    }

    pub fn raw(&self) -> ItemRef {
        self.raw
    }

    pub fn link(&self) -> &'a Link {
        self.link
    }

    pub fn valid(&self) -> bool {
        self.raw.valid()
    }

    /// The same remote object addressed through another session.
    pub fn rebind<'b>(&self, link: &'b Link) -> Item<'b> {
        Item::new(self.raw, link)
    }

    /// Sends `name` with this item as the first argument, then whatever `f` adds.
    pub(crate) fn call<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Frame<'_, std::net::TcpStream>) -> Result<T>,
    ) -> Result<T> {
        if !self.valid() {
            return Err(LinkError::InvalidItem);
        }
        let raw = self.raw;
        self.link.with(|conn| {
            conn.transact(name, |frame| {
                frame.send_item(&raw)?;
                f(frame)
            })
        })
    }

    fn bind(&self, raw: ItemRef) -> Item<'a> {
        Item::new(raw, self.link)
    }

    /// Queries the type from the station and refreshes the cached tag.
    pub fn kind(&mut self) -> Result<ItemType> {
        let kind = self.call("G_Item_Type", |f| f.recv_int())?;
        self.raw.kind = kind;
        Ok(ItemType::from(kind))
    }

    /// Type tag received with the handle, without a round trip.
    pub fn cached_kind(&self) -> ItemType {
        ItemType::from(self.raw.kind)
    }

    pub fn name(&self) -> Result<String> {
        self.call("G_Name", |f| f.recv_line())
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        self.call("S_Name", |f| f.send_line(name))
    }

    pub fn parent(&self) -> Result<Item<'a>> {
        let raw = self.call("G_Parent", |f| f.recv_item())?;
        Ok(self.bind(raw))
    }

    pub fn children(&self) -> Result<Vec<Item<'a>>> {
        let raws = self.call("G_Childs", |f| {
            let count = f.recv_int()?;
            (0..count.max(0)).map(|_| f.recv_item()).collect::<Result<Vec<_>>>()
        })?;
        Ok(raws.into_iter().map(|raw| self.bind(raw)).collect())
    }

    /// Pose relative to the parent.
    pub fn pose(&self) -> Result<Pose> {
        self.call("G_Hlocal", |f| f.recv_pose())
    }

    pub fn set_pose(&self, pose: &Pose) -> Result<()> {
        self.call("S_Hlocal", |f| f.send_pose(pose))
    }

    /// Pose relative to the station root.
    pub fn pose_abs(&self) -> Result<Pose> {
        self.call("G_Hlocal_Abs", |f| f.recv_pose())
    }

    pub fn set_pose_abs(&self, pose: &Pose) -> Result<()> {
        self.call("S_Hlocal_Abs", |f| f.send_pose(pose))
    }

    /// Pose of the geometry relative to the item's own frame.
    pub fn geometry_pose(&self) -> Result<Pose> {
        self.call("G_Hgeom", |f| f.recv_pose())
    }

    pub fn set_geometry_pose(&self, pose: &Pose) -> Result<()> {
        self.call("S_Hgeom", |f| f.send_pose(pose))
    }

    /// Active tool (TCP) of a robot.
    pub fn pose_tool(&self) -> Result<Pose> {
        self.call("G_Tool", |f| f.recv_pose())
    }

    pub fn set_pose_tool(&self, pose: &Pose) -> Result<()> {
        self.call("S_Tool", |f| f.send_pose(pose))
    }

    /// Active reference frame of a robot.
    pub fn pose_frame(&self) -> Result<Pose> {
        self.call("G_Frame", |f| f.recv_pose())
    }

    pub fn set_pose_frame(&self, pose: &Pose) -> Result<()> {
        self.call("S_Frame", |f| f.send_pose(pose))
    }

    pub fn visible(&self) -> Result<bool> {
        self.call("G_Visible", |f| f.recv_int()).map(|v| v != 0)
    }

    /// `frame_visible` defaults to `visible`.
    pub fn set_visible(&self, visible: bool, frame_visible: Option<bool>) -> Result<()> {
        let frame_visible = frame_visible.unwrap_or(visible);
        self.call("S_Visible", |f| {
            f.send_int(i32::from(visible))?;
            f.send_int(i32::from(frame_visible))
        })
    }

    pub fn flags(&self) -> Result<i32> {
        self.call("G_Item_Rights", |f| f.recv_int())
    }

    pub fn set_flags(&self, flags: i32) -> Result<()> {
        self.call("S_Item_Rights", |f| f.send_int(flags))
    }

    pub fn joints(&self) -> Result<Vec<f64>> {
        self.call("G_Thetas", |f| f.recv_array())
    }

    pub fn set_joints(&self, joints: &[f64]) -> Result<()> {
        self.call("S_Thetas", |f| f.send_array(joints))
    }

    /// Replaces `from` (within `tolerance`) with `to`.
    ///
    /// Without a full RGBA `from` color every color is replaced and the
    /// tolerance becomes 2.
    pub fn recolor(&self, to: &[f64], from: Option<&[f64]>, tolerance: f64) -> Result<()> {
        let to = rgba(to)?;
        let (from, tolerance) = match from {
            Some(c) if c.len() >= 4 => ([c[0], c[1], c[2], c[3]], tolerance),
            _ => ([0.0; 4], RECOLOR_DEFAULT_TOLERANCE),
        };

        let mut values = Vec::with_capacity(9);
        values.push(tolerance);
        values.extend_from_slice(&from);
        values.extend_from_slice(&to);
        self.call("Recolor", |f| f.send_array(&values))
    }

    /// Scales the geometry per axis; needs exactly three factors.
    pub fn scale(&self, factors: &[f64]) -> Result<()> {
        if factors.len() != 3 {
            return Err(LinkError::Argument(format!(
                "scale needs 3 factors, got {}",
                factors.len()
            )));
        }
        self.call("Scale", |f| f.send_array(factors))
    }

    /// Removes the item from the station and invalidates this handle.
    ///
    /// The handle is also invalidated when the station reports the item as
    /// already gone.
    pub fn delete(&mut self) -> Result<()> {
        match self.call("Remove", |_| Ok(())) {
            Ok(()) => {
                self.raw.id = 0;
                Ok(())
            }
            Err(LinkError::InvalidItem) => {
                self.raw.id = 0;
                Err(LinkError::InvalidItem)
            }
            Err(e) => Err(e),
        }
    }
}

/// RGB gets an opaque alpha; anything shorter is rejected.
fn rgba(color: &[f64]) -> Result<[f64; 4]> {
    match color {
        [r, g, b, a, ..] => Ok([*r, *g, *b, *a]),
        [r, g, b] => Ok([*r, *g, *b, 1.0]),
        _ => Err(LinkError::Argument(format!(
            "color needs 3 or 4 components, got {}",
            color.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::LinkConfig,
        protocol::{Connection, codec::*, stub::StubServer},
    };

    fn offline_link() -> Link {
        Link::from_connection(Connection::new(
            LinkConfig::default().with_forced_port(crate::protocol::stub::unused_port()),
        ))
    }

    #[test]
    fn item_type_codes() {
        assert_eq!(ItemType::from(2), ItemType::Robot);
        assert_eq!(i32::from(ItemType::Camera), 19);
        assert_eq!(ItemType::from(42), ItemType::Other(42));
        assert_eq!(i32::from(ItemType::Other(42)), 42);
    }

    #[test]
    fn validity_follows_id() {
        let link = offline_link();

        assert!(link.bind(ItemRef::new(3, 5)).valid());
        assert!(!link.bind(ItemRef::new(0, 5)).valid());
        assert_eq!(link.bind(ItemRef::new(3, 1)), link.bind(ItemRef::new(3, 5)));
    }

    #[test]
    fn zeroed_handle_fails_before_connecting() {
        let link = offline_link();
        let item = link.bind(ItemRef::INVALID);

        assert!(matches!(item.name(), Err(LinkError::InvalidItem)));
        assert!(matches!(item.pose(), Err(LinkError::InvalidItem)));
        assert!(matches!(
            item.set_visible(true, None),
            Err(LinkError::InvalidItem)
        ));
    }

    #[test]
    fn scale_length_checked_before_sending() {
        let link = offline_link();
        let item = link.bind(ItemRef::new(4, 5));

        for factors in [&[1.0, 2.0][..], &[1.0, 1.0, 1.0, 1.0], &[]] {
            assert!(matches!(item.scale(factors), Err(LinkError::Argument(_))));
        }
    }

    #[test]
    fn colors() {
        assert_eq!(rgba(&[0.1, 0.2, 0.3]).unwrap(), [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(rgba(&[0.1, 0.2, 0.3, 0.4, 9.0]).unwrap(), [0.1, 0.2, 0.3, 0.4]);
        assert!(matches!(rgba(&[0.1, 0.2]), Err(LinkError::Argument(_))));
    }

    #[test]
    fn recolor_short_from_color_forces_defaults() {
        let stub = StubServer::spawn(|s| {
            assert_eq!(read_line(s).unwrap(), "Recolor");
            assert_eq!(read_item(s).unwrap().id, 21);
            let values = read_array(s).unwrap();
            write_int(s, 0).unwrap();
            values
        });
        let link = Link::connect(stub.config()).unwrap();
        let item = link.bind(ItemRef::new(21, 5));

        item.recolor(&[1.0, 0.0, 0.0], Some(&[0.5, 0.5][..]), 0.1)
            .unwrap();

        assert_eq!(
            stub.join(),
            vec![2.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn scale_sends_three_factors() {
        let stub = StubServer::spawn(|s| {
            assert_eq!(read_line(s).unwrap(), "Scale");
            assert_eq!(read_item(s).unwrap().id, 21);
            assert_eq!(read_array(s).unwrap(), vec![1.0, 2.0, 0.5]);
            write_int(s, 0).unwrap();
        });
        let link = Link::connect(stub.config()).unwrap();

        link.bind(ItemRef::new(21, 5)).scale(&[1.0, 2.0, 0.5]).unwrap();
        stub.join();
    }

    #[test]
    fn delete_invalidates_handle() {
        let stub = StubServer::spawn(|s| {
            assert_eq!(read_line(s).unwrap(), "Remove");
            assert_eq!(read_item(s).unwrap().id, 30);
            write_int(s, 0).unwrap();
        });
        let link = Link::connect(stub.config()).unwrap();
        let mut item = link.bind(ItemRef::new(30, 5));

        item.delete().unwrap();
        assert!(!item.valid());
        assert!(matches!(item.name(), Err(LinkError::InvalidItem)));
        assert!(matches!(item.delete(), Err(LinkError::InvalidItem)));
        assert!(!item.valid());
        stub.join();
    }

    #[test]
    fn invalid_item_status_from_station() {
        let stub = StubServer::spawn(|s| {
            assert_eq!(read_line(s).unwrap(), "G_Name");
            read_item(s).unwrap();
            write_line(s, "").unwrap();
            write_int(s, 1).unwrap();

            assert_eq!(read_line(s).unwrap(), "G_Name");
            read_item(s).unwrap();
            write_line(s, "Table").unwrap();
            write_int(s, 0).unwrap();
        });
        let link = Link::connect(stub.config()).unwrap();

        let stale = link.bind(ItemRef::new(99, 5));
        assert!(matches!(stale.name(), Err(LinkError::InvalidItem)));
        // The status was fully consumed, so the link stays usable.
        assert_eq!(link.bind(ItemRef::new(5, 5)).name().unwrap(), "Table");
        stub.join();
    }

    #[test]
    fn children_and_kind() {
        let stub = StubServer::spawn(|s| {
            assert_eq!(read_line(s).unwrap(), "G_Childs");
            read_item(s).unwrap();
            write_int(s, 2).unwrap();
            write_item(s, &ItemRef::new(71, 6)).unwrap();
            write_item(s, &ItemRef::new(72, 6)).unwrap();
            write_int(s, 0).unwrap();

            assert_eq!(read_line(s).unwrap(), "G_Item_Type");
            read_item(s).unwrap();
            write_int(s, 2).unwrap();
            write_int(s, 0).unwrap();
        });
        let link = Link::connect(stub.config()).unwrap();
        let mut robot = link.bind(ItemRef::new(70, -1));

        let targets = robot.children().unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].cached_kind(), ItemType::Target);
        assert_eq!(robot.kind().unwrap(), ItemType::Robot);
        assert_eq!(robot.cached_kind(), ItemType::Robot);
        stub.join();
    }

    #[test]
    fn rebind_targets_another_session() {
        let first = StubServer::spawn(|_| {});
        let second = StubServer::spawn(|s| {
            assert_eq!(read_line(s).unwrap(), "G_Thetas");
            assert_eq!(read_item(s).unwrap().id, 40);
            write_array(s, &[0.0, -90.0, 90.0]).unwrap();
            write_int(s, 0).unwrap();
        });
        let link_a = Link::connect(first.config()).unwrap();
        let link_b = Link::connect(second.config()).unwrap();

        let robot = link_a.bind(ItemRef::new(40, 2));
        let moved = robot.rebind(&link_b);

        assert_eq!(moved, robot);
        assert_eq!(moved.joints().unwrap(), vec![0.0, -90.0, 90.0]);
        first.join();
        second.join();
    }
}
