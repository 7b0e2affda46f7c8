//! Decode-side wrappers around the generated `HeaderBlock` / `PrimitiveBlock`
//! messages, plus the stringtable lookup helpers shared by [`crate::elements`]
//! and [`crate::dense`].

use std::slice;

use crate::dense::DenseNodeIter;
use crate::elements::{Node, Relation, Way};
use crate::error::{new_format_error, FormatError, Result};
use crate::proto::osmformat;
use crate::string_table::str_at;

/// `required_features` strings this decoder understands (`spec.md` §4.7).
/// `LocationsOnWays` is optional, not required, so it is not listed here.
const SUPPORTED_REQUIRED_FEATURES: [&str; 3] =
    ["OsmSchema-V0.6", "DenseNodes", "HistoricalInformation"];

/// A decoded `HeaderBlock`, the first blob of a PBF stream.
#[derive(Clone, Debug)]
pub struct HeaderBlock {
    pub(crate) header: osmformat::HeaderBlock,
}

impl HeaderBlock {
    pub(crate) fn new(header: osmformat::HeaderBlock) -> HeaderBlock {
        HeaderBlock { header }
    }

    pub fn required_features(&self) -> &[String] {
        &self.header.required_features
    }

    pub fn optional_features(&self) -> &[String] {
        &self.header.optional_features
    }

    /// Fails with `FormatError::UnsupportedRequiredFeature` if this header
    /// declares a `required_features` entry this decoder does not
    /// implement (`spec.md` §7).
    pub fn check_required_features(&self) -> Result<()> {
        for feature in self.required_features() {
            if !SUPPORTED_REQUIRED_FEATURES.contains(&feature.as_str()) {
                return Err(new_format_error(FormatError::UnsupportedRequiredFeature(
                    feature.clone(),
                )));
            }
        }
        Ok(())
    }

    pub fn writing_program(&self) -> Option<&str> {
        self.header.writingprogram.as_deref()
    }

    /// Bounding box, as `(left, right, top, bottom)` nanodegrees.
    pub fn bbox(&self) -> Option<(i64, i64, i64, i64)> {
        let bbox = self.header.bbox.as_ref()?;
        Some((bbox.left(), bbox.right(), bbox.top(), bbox.bottom()))
    }

    pub fn osmosis_replication_timestamp(&self) -> Option<i64> {
        self.header.osmosis_replication_timestamp
    }

    pub fn osmosis_replication_sequence_number(&self) -> Option<i64> {
        self.header.osmosis_replication_sequence_number
    }

    pub fn osmosis_replication_base_url(&self) -> Option<&str> {
        self.header.osmosis_replication_base_url.as_deref()
    }
}

/// A decoded `PrimitiveBlock`: one stringtable shared by one or more groups
/// of entities of a single kind. This is the "buffer" the PBF decode
/// direction hands to the output queue -- entities are read out of it with
/// zero-copy views ([`crate::elements::Element`]) rather than being copied
/// into owned structs.
#[derive(Clone, Debug)]
pub struct PrimitiveBlock {
    pub(crate) block: osmformat::PrimitiveBlock,
}

impl PrimitiveBlock {
    pub fn new(block: osmformat::PrimitiveBlock) -> PrimitiveBlock {
        PrimitiveBlock { block }
    }

    pub fn groups(&self) -> GroupIter {
        GroupIter::new(&self.block)
    }

    pub fn granularity(&self) -> i32 {
        self.block.granularity()
    }

    pub fn lat_offset(&self) -> i64 {
        self.block.lat_offset()
    }

    pub fn lon_offset(&self) -> i64 {
        self.block.lon_offset()
    }

    pub fn date_granularity(&self) -> i32 {
        self.block.date_granularity()
    }
}

pub struct PrimitiveGroup<'a> {
    block: &'a osmformat::PrimitiveBlock,
    group: &'a osmformat::PrimitiveGroup,
}

impl<'a> PrimitiveGroup<'a> {
    fn new(
        block: &'a osmformat::PrimitiveBlock,
        group: &'a osmformat::PrimitiveGroup,
    ) -> PrimitiveGroup<'a> {
        PrimitiveGroup { block, group }
    }

    pub fn nodes(&self) -> GroupNodeIter<'a> {
        GroupNodeIter {
            block: self.block,
            nodes: self.group.nodes.iter(),
        }
    }

    pub fn dense_nodes(&self) -> DenseNodeIter<'a> {
        match self.group.dense.as_ref() {
            Some(dense) => DenseNodeIter::new(self.block, dense),
            None => DenseNodeIter::empty(self.block),
        }
    }

    pub fn ways(&self) -> GroupWayIter<'a> {
        GroupWayIter {
            block: self.block,
            ways: self.group.ways.iter(),
        }
    }

    pub fn relations(&self) -> GroupRelationIter<'a> {
        GroupRelationIter {
            block: self.block,
            rels: self.group.relations.iter(),
        }
    }
}

pub struct GroupIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    groups: slice::Iter<'a, osmformat::PrimitiveGroup>,
}

impl<'a> GroupIter<'a> {
    fn new(block: &'a osmformat::PrimitiveBlock) -> GroupIter<'a> {
        GroupIter {
            block,
            groups: block.primitivegroup.iter(),
        }
    }
}

impl<'a> Iterator for GroupIter<'a> {
    type Item = PrimitiveGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.groups.next().map(|g| PrimitiveGroup::new(self.block, g))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.groups.size_hint()
    }
}

impl<'a> ExactSizeIterator for GroupIter<'a> {}

pub struct GroupNodeIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    nodes: slice::Iter<'a, osmformat::Node>,
}

impl<'a> Iterator for GroupNodeIter<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.nodes.next().map(|n| Node::new(self.block, n))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.nodes.size_hint()
    }
}

impl<'a> ExactSizeIterator for GroupNodeIter<'a> {}

pub struct GroupWayIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    ways: slice::Iter<'a, osmformat::Way>,
}

impl<'a> Iterator for GroupWayIter<'a> {
    type Item = Way<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.ways.next().map(|w| Way::new(self.block, w))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ways.size_hint()
    }
}

impl<'a> ExactSizeIterator for GroupWayIter<'a> {}

pub struct GroupRelationIter<'a> {
    block: &'a osmformat::PrimitiveBlock,
    rels: slice::Iter<'a, osmformat::Relation>,
}

impl<'a> Iterator for GroupRelationIter<'a> {
    type Item = Relation<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rels.next().map(|r| Relation::new(self.block, r))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rels.size_hint()
    }
}

impl<'a> ExactSizeIterator for GroupRelationIter<'a> {}

/// Looks up `index` in `block`'s stringtable, surfacing the crate's own
/// error kinds on a bad index or invalid UTF-8.
pub(crate) fn str_from_stringtable(
    block: &osmformat::PrimitiveBlock,
    index: usize,
) -> Result<&str> {
    str_at(&block.stringtable.s, index)
}

/// Looks up a `(key, value)` pair of stringtable indices, returning `None`
/// if either side of the pair is absent. Both sides failing to resolve
/// (bad index, bad UTF-8) also yields `None` -- tag iterators treat a
/// malformed entry as "no more tags" rather than panicking.
pub(crate) fn get_stringtable_key_value<'a>(
    block: &'a osmformat::PrimitiveBlock,
    key_index: Option<usize>,
    val_index: Option<usize>,
) -> Option<(&'a str, &'a str)> {
    match (key_index, val_index) {
        (Some(k), Some(v)) => {
            let key = str_from_stringtable(block, k).ok()?;
            let val = str_from_stringtable(block, v).ok()?;
            Some((key, val))
        }
        _ => None,
    }
}
