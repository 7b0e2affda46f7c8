//! `DenseNodes`: columnar, delta-encoded node storage shared by one
//! `PrimitiveGroup`. This module holds both directions: [`DenseNodeIter`]
//! walks a decoded `DenseNodes` submessage with zero-copy views, and
//! [`DenseNodesEncoder`] accumulates nodes column-by-column while a
//! [`crate::pbf::writer`] block is being built.

use std::iter::Copied;
use std::slice::Iter as SliceIter;

use crate::block::{get_stringtable_key_value, str_from_stringtable};
use crate::delta::{DeltaDecodeExt, DeltaDecodeIter, DeltaEncoder};
use crate::error::Result;
use crate::proto::osmformat;
use crate::string_table::StringTable;

pub(crate) type DeltaIter<'a, T> = DeltaDecodeIter<Copied<SliceIter<'a, T>>>;

/// An OpenStreetMap node element from a compressed array of dense nodes (See [OSM wiki](http://wiki.openstreetmap.org/wiki/Node)).
#[derive(Clone, Debug)]
pub struct DenseNode<'a> {
    block: &'a osmformat::PrimitiveBlock,

    /// The node id. It should be unique between nodes and might be negative to indicate
    /// that the element has not yet been uploaded to a server.
    pub id: i64,
    lat: i64,
    lon: i64,
    keys_vals_indices: &'a [i32],
    info: Option<DenseNodeInfo<'a>>,
}

impl<'a> DenseNode<'a> {
    /// Returns the node id. It should be unique between nodes and might be negative to indicate
    /// that the element has not yet been uploaded to a server.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns optional metadata about the node.
    pub fn info(&'a self) -> Option<&'a DenseNodeInfo<'a>> {
        self.info.as_ref()
    }

    /// Returns the latitude coordinate in degrees.
    pub fn lat(&self) -> f64 {
        1e-9 * self.nano_lat() as f64
    }

    /// Returns the latitude coordinate in nanodegrees (10⁻⁹).
    pub fn nano_lat(&self) -> i64 {
        self.block.lat_offset() + i64::from(self.block.granularity()) * self.lat
    }

    /// Returns the latitude coordinate in decimicrodegrees (10⁻⁷).
    pub fn decimicro_lat(&self) -> i32 {
        (self.nano_lat() / 100) as i32
    }

    /// Returns the longitude coordinate in degrees.
    pub fn lon(&self) -> f64 {
        1e-9 * self.nano_lon() as f64
    }

    /// Returns the longitude in nanodegrees (10⁻⁹).
    pub fn nano_lon(&self) -> i64 {
        self.block.lon_offset() + i64::from(self.block.granularity()) * self.lon
    }

    /// Returns the longitude coordinate in decimicrodegrees (10⁻⁷).
    pub fn decimicro_lon(&self) -> i32 {
        (self.nano_lon() / 100) as i32
    }

    /// Returns an iterator over the tags of this node (See [OSM wiki](http://wiki.openstreetmap.org/wiki/Tags)).
    pub fn tags(&self) -> DenseTagIter<'a> {
        DenseTagIter {
            block: self.block,
            keys_vals_indices: self.keys_vals_indices.iter(),
        }
    }

    /// Returns an iterator over the tags of this node as raw stringtable
    /// indices (key and value).
    pub fn raw_tags(&self) -> DenseRawTagIter<'a> {
        DenseRawTagIter {
            keys_vals_indices: self.keys_vals_indices.iter(),
        }
    }
}

/// An iterator over dense nodes. It decodes the delta encoded values.
#[derive(Clone, Debug)]
pub struct DenseNodeIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    ids: DeltaIter<'a, i64>,
    lats: DeltaIter<'a, i64>,
    lons: DeltaIter<'a, i64>,
    keys_vals_slice: &'a [i32],
    keys_vals_index: usize,
    info_iter: Option<DenseNodeInfoIter<'a>>,
}

impl<'a> DenseNodeIter<'a> {
    pub(crate) fn new(
        block: &'a osmformat::PrimitiveBlock,
        osmdense: &'a osmformat::DenseNodes,
    ) -> DenseNodeIter<'a> {
        let info_iter = Some(DenseNodeInfoIter::new(
            block,
            osmdense.denseinfo.get_or_default(),
        ));
        DenseNodeIter {
            block,
            ids: osmdense.id.iter().copied().delta_decode(),
            lats: osmdense.lat.iter().copied().delta_decode(),
            lons: osmdense.lon.iter().copied().delta_decode(),
            keys_vals_slice: osmdense.keys_vals.as_slice(),
            keys_vals_index: 0,
            info_iter,
        }
    }

    pub(crate) fn empty(block: &'a osmformat::PrimitiveBlock) -> DenseNodeIter<'a> {
        DenseNodeIter {
            block,
            ids: [].iter().copied().delta_decode(),
            lats: [].iter().copied().delta_decode(),
            lons: [].iter().copied().delta_decode(),
            keys_vals_slice: &[],
            keys_vals_index: 0,
            info_iter: None,
        }
    }
}

impl<'a> Iterator for DenseNodeIter<'a> {
    type Item = DenseNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match (
            self.ids.next(),
            self.lats.next(),
            self.lons.next(),
            self.info_iter.as_mut().and_then(|iter| iter.next()),
        ) {
            (Some(id), Some(lat), Some(lon), info) => {
                let start_index = self.keys_vals_index;
                let mut end_index = start_index;
                for chunk in self.keys_vals_slice[self.keys_vals_index..].chunks(2) {
                    if chunk[0] != 0 && chunk.len() == 2 {
                        end_index += 2;
                        self.keys_vals_index += 2;
                    } else {
                        self.keys_vals_index += 1;
                        break;
                    }
                }

                Some(DenseNode {
                    block: self.block,
                    id,
                    lat,
                    lon,
                    keys_vals_indices: &self.keys_vals_slice[start_index..end_index],
                    info,
                })
            }
            _ => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

impl<'a> ExactSizeIterator for DenseNodeIter<'a> {}

/// Optional metadata with non-geographic information about a dense node.
#[derive(Clone, Debug)]
pub struct DenseNodeInfo<'a> {
    block: &'a osmformat::PrimitiveBlock,
    version: i32,
    timestamp: i64,
    changeset: i64,
    uid: i32,
    user_sid: i32,
    visible: bool,
}

impl<'a> DenseNodeInfo<'a> {
    /// Returns the version of this element.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the changeset id.
    pub fn changeset(&self) -> i64 {
        self.changeset
    }

    /// Returns the user id.
    pub fn uid(&self) -> i32 {
        self.uid
    }

    /// Returns the user name.
    pub fn user(&self) -> Result<&'a str> {
        str_from_stringtable(self.block, self.user_sid as usize)
    }

    /// Returns the time stamp in milliseconds since the epoch.
    pub fn milli_timestamp(&self) -> i64 {
        self.timestamp * i64::from(self.block.date_granularity())
    }

    /// Returns the visibility status of an element. This is only relevant if the PBF file contains
    /// historical information.
    pub fn visible(&self) -> bool {
        self.visible
    }

    /// Returns true if the element was deleted. The inverse of [`DenseNodeInfo::visible`].
    pub fn deleted(&self) -> bool {
        !self.visible
    }
}

/// An iterator over dense nodes info. It decodes the delta encoded values.
#[derive(Clone, Debug)]
pub struct DenseNodeInfoIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    versions: SliceIter<'a, i32>,
    timestamps: DeltaIter<'a, i64>,
    changesets: DeltaIter<'a, i64>,
    uids: DeltaIter<'a, i32>,
    user_sids: DeltaIter<'a, i32>,
    visible: SliceIter<'a, bool>,
}

impl<'a> DenseNodeInfoIter<'a> {
    fn new(block: &'a osmformat::PrimitiveBlock, info: &'a osmformat::DenseInfo) -> DenseNodeInfoIter<'a> {
        DenseNodeInfoIter {
            block,
            versions: info.version.iter(),
            timestamps: info.timestamp.iter().copied().delta_decode(),
            changesets: info.changeset.iter().copied().delta_decode(),
            uids: info.uid.iter().copied().delta_decode(),
            user_sids: info.user_sid.iter().copied().delta_decode(),
            visible: info.visible.iter(),
        }
    }
}

impl<'a> Iterator for DenseNodeInfoIter<'a> {
    type Item = DenseNodeInfo<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match (
            self.versions.next(),
            self.timestamps.next(),
            self.changesets.next(),
            self.uids.next(),
            self.user_sids.next(),
            self.visible.next(),
        ) {
            (Some(&version), Some(timestamp), Some(changeset), Some(uid), Some(user_sid), visible_opt) => {
                Some(DenseNodeInfo {
                    block: self.block,
                    version,
                    timestamp,
                    changeset,
                    uid,
                    user_sid,
                    visible: *visible_opt.unwrap_or(&true),
                })
            }
            _ => None,
        }
    }
}

/// An iterator over the tags in a dense node.
#[derive(Clone, Debug)]
pub struct DenseTagIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    keys_vals_indices: SliceIter<'a, i32>,
}

impl<'a> Iterator for DenseTagIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        get_stringtable_key_value(
            self.block,
            self.keys_vals_indices.next().map(|v| *v as usize),
            self.keys_vals_indices.next().map(|v| *v as usize),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.keys_vals_indices.len() / 2;
        (len, Some(len))
    }
}

impl<'a> ExactSizeIterator for DenseTagIter<'a> {}

/// An iterator over the tags of a dense node as raw stringtable indices.
#[derive(Clone, Debug)]
pub struct DenseRawTagIter<'a> {
    keys_vals_indices: SliceIter<'a, i32>,
}

impl<'a> Iterator for DenseRawTagIter<'a> {
    type Item = (i32, i32);

    fn next(&mut self) -> Option<Self::Item> {
        match (self.keys_vals_indices.next(), self.keys_vals_indices.next()) {
            (Some(&key_index), Some(&val_index)) => Some((key_index, val_index)),
            _ => None,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.keys_vals_indices.len() / 2;
        (len, Some(len))
    }
}

impl<'a> ExactSizeIterator for DenseRawTagIter<'a> {}

/// Which `Info` fields to serialize, selected by `add_metadata` (see
/// [`crate::config`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetadataFlags {
    pub version: bool,
    pub timestamp: bool,
    pub changeset: bool,
    pub uid: bool,
    pub user: bool,
    /// Forced on whenever the data set carries more than one version per
    /// object (`HistoricalInformation`).
    pub visible: bool,
}

impl MetadataFlags {
    pub fn any(&self) -> bool {
        self.version || self.timestamp || self.changeset || self.uid || self.user || self.visible
    }
}

/// Accumulates nodes into parallel columnar arrays with delta encoding, per
/// `spec.md` §4.5. One instance lives inside a
/// [`crate::pbf::writer::PrimitiveBlockBuilder`] and is reset on flush.
#[derive(Default)]
pub struct DenseNodesEncoder {
    ids: Vec<i64>,
    lats: Vec<i64>,
    lons: Vec<i64>,
    keys_vals: Vec<i32>,

    versions: Vec<i32>,
    timestamps: Vec<i64>,
    changesets: Vec<i64>,
    uids: Vec<i32>,
    user_sids: Vec<i32>,
    visibles: Vec<bool>,

    id_enc: DeltaEncoder,
    lat_enc: DeltaEncoder,
    lon_enc: DeltaEncoder,
    timestamp_enc: DeltaEncoder,
    changeset_enc: DeltaEncoder,
    uid_enc: DeltaEncoder,
    user_sid_enc: DeltaEncoder,

    count: usize,
}

/// The input a caller feeds to [`DenseNodesEncoder::add`]: everything needed
/// for one dense-node row, with stringtable ids already resolved by the
/// caller (see `spec.md` §4.5's "append delta-encoded (timestamp, ...)").
pub struct DenseNodeInput<'a> {
    pub id: i64,
    /// Latitude as the raw granularity-scaled column value (nanodegrees /
    /// granularity, offset already subtracted), not degrees.
    pub scaled_lat: i64,
    /// Longitude as the raw granularity-scaled column value.
    pub scaled_lon: i64,
    pub version: i32,
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: i32,
    pub user_sid: i32,
    pub visible: bool,
    pub tags: &'a [(&'a [u8], &'a [u8])],
}

impl DenseNodesEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one node's columns, delta-encoding the id and the coordinate
    /// and (where requested) metadata columns, granularity-scaled by the
    /// caller beforehand. `meta` selects which `Info` columns get written;
    /// columns outside the selection still advance their delta encoders so
    /// a later `add_metadata` toggle mid-block would not be safe -- callers
    /// pass a single, block-wide `meta`.
    pub fn add(&mut self, strings: &mut StringTable, node: &DenseNodeInput, meta: MetadataFlags) {
        self.ids.push(self.id_enc.update(node.id));
        self.lats.push(self.lat_enc.update(node.scaled_lat));
        self.lons.push(self.lon_enc.update(node.scaled_lon));

        if meta.any() {
            self.versions.push(if meta.version { node.version } else { -1 });
            self.timestamps.push(if meta.timestamp {
                self.timestamp_enc.update(node.timestamp)
            } else {
                self.timestamp_enc.update(0)
            });
            self.changesets.push(if meta.changeset {
                self.changeset_enc.update(node.changeset)
            } else {
                self.changeset_enc.update(0)
            });
            self.uids.push(if meta.uid {
                self.uid_enc.update(node.uid as i64) as i32
            } else {
                self.uid_enc.update(0) as i32
            });
            let user_sid = if meta.user { node.user_sid as i64 } else { 0 };
            self.user_sids.push(self.user_sid_enc.update(user_sid) as i32);
            self.visibles.push(if meta.visible { node.visible } else { true });
        }

        for &(key, value) in node.tags {
            self.keys_vals.push(strings.add(key) as i32);
            self.keys_vals.push(strings.add(value) as i32);
        }
        self.keys_vals.push(0);

        self.count += 1;
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Approximate in-memory footprint, used for block-capacity checks.
    pub fn size(&self) -> usize {
        (self.ids.len() + self.lats.len() + self.lons.len()) * 9
            + self.keys_vals.len() * 3
            + (self.versions.len() + self.uids.len() + self.user_sids.len()) * 3
            + (self.timestamps.len() + self.changesets.len()) * 5
            + self.visibles.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.lats.clear();
        self.lons.clear();
        self.keys_vals.clear();
        self.versions.clear();
        self.timestamps.clear();
        self.changesets.clear();
        self.uids.clear();
        self.user_sids.clear();
        self.visibles.clear();
        self.id_enc.clear();
        self.lat_enc.clear();
        self.lon_enc.clear();
        self.timestamp_enc.clear();
        self.changeset_enc.clear();
        self.uid_enc.clear();
        self.user_sid_enc.clear();
        self.count = 0;
    }

    /// Builds the `DenseNodes` submessage: id, `DenseInfo` (if any metadata
    /// was requested), lat, lon, keys_vals -- in that field order.
    pub fn build(&self) -> osmformat::DenseNodes {
        let mut dense = osmformat::DenseNodes::new();
        dense.id = self.ids.clone();
        if !self.versions.is_empty() {
            let mut info = osmformat::DenseInfo::new();
            info.version = self.versions.clone();
            info.timestamp = self.timestamps.clone();
            info.changeset = self.changesets.clone();
            info.uid = self.uids.clone();
            info.user_sid = self.user_sids.clone();
            info.visible = self.visibles.clone();
            dense.denseinfo = protobuf::MessageField::some(info);
        }
        dense.lat = self.lats.clone();
        dense.lon = self.lons.clone();
        dense.keys_vals = self.keys_vals.clone();
        dense
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_two_nodes_with_delta_ids_and_one_tag() {
        let mut strings = StringTable::new();
        let mut enc = DenseNodesEncoder::new();
        let meta = MetadataFlags::default();

        enc.add(
            &mut strings,
            &DenseNodeInput {
                id: 1,
                scaled_lat: 520_000_000,
                scaled_lon: 130_000_000,
                version: 0,
                timestamp: 0,
                changeset: 0,
                uid: 0,
                user_sid: 0,
                visible: true,
                tags: &[(b"amenity", b"bar")],
            },
            meta,
        );
        enc.add(
            &mut strings,
            &DenseNodeInput {
                id: 5,
                scaled_lat: 520_000_000,
                scaled_lon: 130_000_000,
                version: 0,
                timestamp: 0,
                changeset: 0,
                uid: 0,
                user_sid: 0,
                visible: true,
                tags: &[],
            },
            meta,
        );

        assert_eq!(enc.ids, vec![1, 4]);
        assert_eq!(enc.keys_vals, vec![1, 2, 0, 0]);
        assert_eq!(enc.len(), 2);
    }
}
