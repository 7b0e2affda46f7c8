//! The minimal, intentionally inert domain object model that stands in for
//! the full domain object library `spec.md` §1 calls "out of scope". These
//! are the types `spec.md` §3 calls "OSMObject (external)": plain data with
//! accessors, fed into [`crate::pbf::writer`]'s handler dispatch and
//! produced by [`crate::opl`]'s parser and (via an owning copy) by the
//! pipeline-facing decode path.
//!
//! Downstream users of a full `osmcodec`-shaped library are expected to
//! bring their own richer object types; the codec itself only needs the
//! accessors used below.

/// A single `(key, value)` tag pair, stored as byte strings since OSM tags
/// are not guaranteed to be valid UTF-8 on the wire (`spec.md` §3).
pub type Tag = (Vec<u8>, Vec<u8>);

/// Fields shared by every OSM object kind (`spec.md` §3).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Meta {
    pub id: i64,
    pub version: u32,
    /// Seconds since the epoch; `0` means absent.
    pub timestamp: u32,
    pub changeset: i64,
    pub uid: i32,
    pub user: Vec<u8>,
    pub visible: bool,
    pub tags: Vec<Tag>,
}

impl Meta {
    pub fn new(id: i64) -> Self {
        Meta {
            id,
            visible: true,
            ..Default::default()
        }
    }
}

/// A node: the common [`Meta`] plus a location.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeData {
    pub meta: Meta,
    /// Longitude/latitude in degrees.
    pub lon: f64,
    pub lat: f64,
}

/// One node reference inside a way, optionally carrying the referenced
/// node's location (populated only when `locations_on_ways` is enabled, see
/// `spec.md` §6).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WayRef {
    pub node_id: i64,
    pub location: Option<(f64, f64)>,
}

/// A way: the common [`Meta`] plus an ordered sequence of node references.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WayData {
    pub meta: Meta,
    pub refs: Vec<WayRef>,
}

/// The kind of entity a relation member refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

/// One member of a relation.
#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub member_type: MemberType,
    pub id: i64,
    pub role: Vec<u8>,
}

/// A relation: the common [`Meta`] plus an ordered sequence of members.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RelationData {
    pub meta: Meta,
    pub members: Vec<Member>,
}

/// The tagged union an encoder handler dispatches on (`spec.md` §9 "Dynamic
/// dispatch over object types").
#[derive(Clone, Debug, PartialEq)]
pub enum OsmObject {
    Node(NodeData),
    Way(WayData),
    Relation(RelationData),
}

impl OsmObject {
    pub fn meta(&self) -> &Meta {
        match self {
            OsmObject::Node(n) => &n.meta,
            OsmObject::Way(w) => &w.meta,
            OsmObject::Relation(r) => &r.meta,
        }
    }

    pub fn id(&self) -> i64 {
        self.meta().id
    }
}

/// An append-only arena of [`OsmObject`]s, handed off whole between threads
/// (`spec.md` §3 "Buffer"). Once moved into the output queue, a `Buffer` is
/// treated as immutable by convention; the type itself does not enforce
/// that beyond offering no public mutator other than [`Buffer::push`].
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    objects: Vec<OsmObject>,
    /// Running estimate of serialized size, used by producers deciding
    /// when to ship the buffer to the output queue (`spec.md` §4.9).
    committed_bytes: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: OsmObject, approx_size: usize) {
        self.objects.push(object);
        self.committed_bytes += approx_size;
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn committed_bytes(&self) -> usize {
        self.committed_bytes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OsmObject> {
        self.objects.iter()
    }

    pub fn into_objects(self) -> Vec<OsmObject> {
        self.objects
    }
}

impl IntoIterator for Buffer {
    type Item = OsmObject;
    type IntoIter = std::vec::IntoIter<OsmObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.into_iter()
    }
}

impl<'a> IntoIterator for &'a Buffer {
    type Item = &'a OsmObject;
    type IntoIter = std::slice::Iter<'a, OsmObject>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.iter()
    }
}

impl FromIterator<OsmObject> for Buffer {
    fn from_iter<I: IntoIterator<Item = OsmObject>>(iter: I) -> Self {
        let objects: Vec<OsmObject> = iter.into_iter().collect();
        // Size is unknown for externally constructed buffers (e.g. test
        // fixtures); capacity checks that rely on `committed_bytes` should
        // use buffers built incrementally through `push` instead.
        Buffer {
            objects,
            committed_bytes: 0,
        }
    }
}

/// Soft threshold at which the OPL parser ships a buffer to the output
/// queue and installs a fresh one (`spec.md` §4.9).
pub const BUFFER_SOFT_THRESHOLD: usize = 800 * 1024;
/// Capacity a fresh buffer is sized against; only used as documentation for
/// the relationship to [`BUFFER_SOFT_THRESHOLD`], not as an allocation hint.
pub const BUFFER_CAPACITY: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_tracks_committed_bytes() {
        let mut buf = Buffer::new();
        assert!(buf.is_empty());
        buf.push(OsmObject::Node(NodeData::default()), 42);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.committed_bytes(), 42);
    }
}
