//! The PBF encoder: `spec.md` §4.5 "PrimitiveBlock builder" and §4.6/§4.7
//! "PBF writer". Generalizes the teacher's original `BlockBuilder`/
//! `NodeBuilder` pair (single-entity-kind, no capacity tracking) into a
//! builder that accepts any [`OsmObject`], flushes on the size/count
//! budgets from `spec.md` §3, and submits one [`crate::blob::serialize_block`]
//! task per block to the worker pool.

use std::io::Write;
use std::thread;
use std::thread::JoinHandle;

use protobuf::{EnumOrUnknown, MessageField};

use crate::blob::{serialize_block, BlobEncoding, BlobType, MAX_ENTITIES_PER_BLOCK, MAX_UNCOMPRESSED_BLOB_SIZE};
use crate::config::{Compression, PbfWriterOptions};
use crate::delta::DeltaEncoder;
use crate::dense::{DenseNodeInput, DenseNodesEncoder, MetadataFlags};
use crate::error::Result;
use crate::model::{Buffer, Meta, MemberType as ModelMemberType, NodeData, OsmObject, RelationData, WayData};
use crate::pipeline::{ordered_queue, ByteSink, FormatEncoder, QueueProducer, RayonPool, Submit};
use crate::proto::osmformat;
use crate::string_table::StringTable;

/// Granularity this writer always encodes at: nanodegrees per unit of the
/// lat/lon columns. Matches `PrimitiveBlock.granularity`'s documented
/// default, so a decoder never needs to special-case writer output.
const GRANULARITY: i32 = 100;
/// Granularity of the `Info.timestamp`/`DenseInfo.timestamp` columns, in
/// milliseconds. Matches `PrimitiveBlock.date_granularity`'s default.
const DATE_GRANULARITY: i32 = 1000;

fn scale_coord(degrees: f64) -> i64 {
    (degrees * 1e9 / f64::from(GRANULARITY)).round() as i64
}

/// Optional `HeaderBlock` fields a caller may want to set (`spec.md` §4.7).
/// `required_features`/`optional_features` are not here: those are derived
/// entirely from [`PbfWriterOptions`] so they can never drift out of sync
/// with what the block builder actually emits.
#[derive(Clone, Debug, Default)]
pub struct PbfHeaderInfo {
    pub writing_program: Option<String>,
    /// `(left, right, top, bottom)` in nanodegrees.
    pub bbox: Option<(i64, i64, i64, i64)>,
    pub osmosis_replication_timestamp: Option<i64>,
    pub osmosis_replication_sequence_number: Option<i64>,
    pub osmosis_replication_base_url: Option<String>,
}

/// The one entity kind a [`PrimitiveBlock`] may hold at a time (`spec.md`
/// §3 I1: "all entities in one block share one group type"). Mirrors
/// `OSMFormat::PrimitiveGroup` in `pbf_output_format.hpp`'s `PrimitiveBlock`,
/// which tracks the same thing as `m_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GroupType {
    DenseNodes,
    Nodes,
    Ways,
    Relations,
}

fn group_type_of(object: &OsmObject, dense_nodes: bool) -> GroupType {
    match object {
        OsmObject::Node(_) if dense_nodes => GroupType::DenseNodes,
        OsmObject::Node(_) => GroupType::Nodes,
        OsmObject::Way(_) => GroupType::Ways,
        OsmObject::Relation(_) => GroupType::Relations,
    }
}

/// Accumulates one block's worth of entities column-by-column. Reset by
/// [`PrimitiveBlockBuilder::take_block`], which both builds and clears it,
/// mirroring how [`crate::dense::DenseNodesEncoder`] is reset on flush.
///
/// Holds at most one [`GroupType`] at a time: [`Self::can_add`] rejects an
/// entity of a different kind than `current_type`, so a mixed-kind input
/// stream forces a block switch instead of silently regrouping entities
/// (`spec.md` §3 I1, §8 order preservation).
#[derive(Default)]
pub struct PrimitiveBlockBuilder {
    strings: StringTable,
    dense: DenseNodesEncoder,
    nodes: Vec<osmformat::Node>,
    ways: Vec<osmformat::Way>,
    relations: Vec<osmformat::Relation>,
    entity_count: usize,
    current_type: Option<GroupType>,
}

impl PrimitiveBlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count == 0
    }

    pub fn len(&self) -> usize {
        self.entity_count
    }

    /// Approximate serialized footprint, used for block-capacity checks
    /// (`spec.md` §3 I3: "SHOULD NOT exceed ~16 MiB uncompressed").
    pub fn size(&self) -> usize {
        self.strings.size()
            + self.dense.size()
            + self.nodes.len() * 48
            + self.ways.len() * 32
            + self.relations.len() * 32
    }

    /// Whether one more entity of `group_type`, roughly `approx_entity_size`
    /// bytes, still fits in this block: it must match the block's current
    /// group type (a block holds exactly one, `spec.md` §3 I1) and stay
    /// under the count and size budgets. The size budget is capped at 95%
    /// of `MAX_UNCOMPRESSED_BLOB_SIZE`, leaving headroom for the string
    /// table to grow on the entity actually being added (`spec.md` §3 I3;
    /// `pbf_output_format.hpp`'s `max_used_blob_size`).
    pub fn can_add(&self, group_type: GroupType, approx_entity_size: usize) -> bool {
        if let Some(current) = self.current_type {
            if current != group_type {
                return false;
            }
        }
        self.entity_count < MAX_ENTITIES_PER_BLOCK
            && self.size() + approx_entity_size <= MAX_UNCOMPRESSED_BLOB_SIZE * 95 / 100
    }

    fn build_info(&mut self, meta: &Meta, flags: MetadataFlags) -> osmformat::Info {
        let mut info = osmformat::Info::new();
        if flags.version {
            info.set_version(meta.version as i32);
        }
        if flags.timestamp {
            info.set_timestamp(i64::from(meta.timestamp));
        }
        if flags.changeset {
            info.set_changeset(meta.changeset);
        }
        if flags.uid {
            info.set_uid(meta.uid);
        }
        if flags.user {
            info.set_user_sid(self.strings.add(&meta.user));
        }
        if flags.visible {
            info.set_visible(meta.visible);
        }
        info
    }

    pub fn add_dense_node(&mut self, node: &NodeData, meta: MetadataFlags) {
        let user_sid = if meta.user { self.strings.add(&node.meta.user) as i32 } else { 0 };
        let tags: Vec<(&[u8], &[u8])> = node
            .meta
            .tags
            .iter()
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
            .collect();

        self.dense.add(
            &mut self.strings,
            &DenseNodeInput {
                id: node.meta.id,
                scaled_lat: scale_coord(node.lat),
                scaled_lon: scale_coord(node.lon),
                version: node.meta.version as i32,
                // `DATE_GRANULARITY` is 1000ms, and `Meta::timestamp` is
                // already in whole seconds, so the two conversions cancel.
                timestamp: i64::from(node.meta.timestamp),
                changeset: node.meta.changeset,
                uid: node.meta.uid,
                user_sid,
                visible: node.meta.visible,
                tags: &tags,
            },
            meta,
        );
        self.entity_count += 1;
        self.current_type = Some(GroupType::DenseNodes);
    }

    pub fn add_node(&mut self, node: &NodeData, meta: MetadataFlags) {
        let mut n = osmformat::Node::new();
        n.set_id(node.meta.id);
        for (k, v) in &node.meta.tags {
            n.keys.push(self.strings.add(k));
            n.vals.push(self.strings.add(v));
        }
        if meta.any() {
            n.info = MessageField::some(self.build_info(&node.meta, meta));
        }
        n.set_lat(scale_coord(node.lat));
        n.set_lon(scale_coord(node.lon));
        self.nodes.push(n);
        self.entity_count += 1;
        self.current_type = Some(GroupType::Nodes);
    }

    pub fn add_way(&mut self, way: &WayData, meta: MetadataFlags, locations_on_ways: bool) {
        let mut w = osmformat::Way::new();
        w.set_id(way.meta.id);
        for (k, v) in &way.meta.tags {
            w.keys.push(self.strings.add(k));
            w.vals.push(self.strings.add(v));
        }
        if meta.any() {
            w.info = MessageField::some(self.build_info(&way.meta, meta));
        }

        let mut ref_enc = DeltaEncoder::new();
        let mut lat_enc = DeltaEncoder::new();
        let mut lon_enc = DeltaEncoder::new();
        let mut has_locations = locations_on_ways && !way.refs.is_empty();

        for r in &way.refs {
            w.refs.push(ref_enc.update(r.node_id));
            if locations_on_ways {
                match r.location {
                    Some((lat, lon)) => {
                        w.lat.push(lat_enc.update(scale_coord(lat)));
                        w.lon.push(lon_enc.update(scale_coord(lon)));
                    }
                    None => has_locations = false,
                }
            }
        }
        if !has_locations {
            w.lat.clear();
            w.lon.clear();
        }

        self.ways.push(w);
        self.entity_count += 1;
        self.current_type = Some(GroupType::Ways);
    }

    pub fn add_relation(&mut self, relation: &RelationData, meta: MetadataFlags) {
        let mut r = osmformat::Relation::new();
        r.set_id(relation.meta.id);
        for (k, v) in &relation.meta.tags {
            r.keys.push(self.strings.add(k));
            r.vals.push(self.strings.add(v));
        }
        if meta.any() {
            r.info = MessageField::some(self.build_info(&relation.meta, meta));
        }

        let mut memid_enc = DeltaEncoder::new();
        for m in &relation.members {
            r.roles_sid.push(self.strings.add(&m.role) as i32);
            r.memids.push(memid_enc.update(m.id));
            let member_type = match m.member_type {
                ModelMemberType::Node => osmformat::relation::MemberType::NODE,
                ModelMemberType::Way => osmformat::relation::MemberType::WAY,
                ModelMemberType::Relation => osmformat::relation::MemberType::RELATION,
            };
            r.types.push(EnumOrUnknown::new(member_type));
        }

        self.relations.push(r);
        self.entity_count += 1;
        self.current_type = Some(GroupType::Relations);
    }

    /// Builds the `PrimitiveBlock` and resets the builder for the next one.
    /// `current_type` guarantees only one of `dense`/`nodes`/`ways`/
    /// `relations` is non-empty, so exactly one `PrimitiveGroup` is emitted.
    pub fn take_block(&mut self) -> osmformat::PrimitiveBlock {
        let mut block = osmformat::PrimitiveBlock::new();
        let mut stringtable = osmformat::StringTable::new();
        stringtable.s = self.strings.iter().map(|s| s.to_vec()).collect();
        block.stringtable = MessageField::some(stringtable);
        block.set_granularity(GRANULARITY);
        block.set_date_granularity(DATE_GRANULARITY);

        if !self.dense.is_empty() {
            let mut group = osmformat::PrimitiveGroup::new();
            group.dense = MessageField::some(self.dense.build());
            block.primitivegroup.push(group);
        }
        if !self.nodes.is_empty() {
            let mut group = osmformat::PrimitiveGroup::new();
            group.nodes = std::mem::take(&mut self.nodes);
            block.primitivegroup.push(group);
        }
        if !self.ways.is_empty() {
            let mut group = osmformat::PrimitiveGroup::new();
            group.ways = std::mem::take(&mut self.ways);
            block.primitivegroup.push(group);
        }
        if !self.relations.is_empty() {
            let mut group = osmformat::PrimitiveGroup::new();
            group.relations = std::mem::take(&mut self.relations);
            block.primitivegroup.push(group);
        }

        self.strings.clear();
        self.dense.clear();
        self.entity_count = 0;
        self.current_type = None;
        block
    }
}

fn approx_object_size(object: &OsmObject) -> usize {
    fn tags_size(tags: &[(Vec<u8>, Vec<u8>)]) -> usize {
        tags.iter().map(|(k, v)| k.len() + v.len() + 4).sum()
    }
    match object {
        OsmObject::Node(n) => 24 + tags_size(&n.meta.tags),
        OsmObject::Way(w) => 16 + w.refs.len() * 9 + tags_size(&w.meta.tags),
        OsmObject::Relation(r) => 16 + r.members.len() * 12 + tags_size(&r.meta.tags),
    }
}

fn drain_into<W: Write>(mut sink: W, consumer: crate::pipeline::QueueConsumer<Result<Vec<u8>>>) -> Result<W> {
    for frame in consumer {
        let bytes = frame?;
        sink.write_all(&bytes)?;
    }
    Ok(sink)
}

/// Encodes a stream of [`OsmObject`]s into PBF frames, dispatching block
/// serialization to `rayon`'s pool and writing frames to `W` on a dedicated
/// thread in submission order (`spec.md` §5).
///
/// If a `PbfWriter` is dropped without calling [`PbfWriter::finish`], the
/// output queue is closed and the drain thread exits once it drains what
/// was already submitted, but any write error it hit is discarded -- always
/// call `finish` to observe errors and get `W` back.
pub struct PbfWriter<W: Write + Send + 'static> {
    producer: Option<QueueProducer<Result<Vec<u8>>>>,
    drain: Option<JoinHandle<Result<W>>>,
    block: PrimitiveBlockBuilder,
    options: PbfWriterOptions,
    pool: RayonPool,
    header_written: bool,
}

impl<W: Write + Send + 'static> PbfWriter<W> {
    pub fn new(sink: W, options: PbfWriterOptions) -> Self {
        let (producer, consumer) = ordered_queue::<Result<Vec<u8>>>(4);
        let drain = thread::spawn(move || drain_into(sink, consumer));
        PbfWriter {
            producer: Some(producer),
            drain: Some(drain),
            block: PrimitiveBlockBuilder::new(),
            options,
            pool: RayonPool,
            header_written: false,
        }
    }

    fn encoding(&self) -> BlobEncoding {
        match self.options.compression {
            Compression::Zlib { level } => BlobEncoding::Zlib { level },
            Compression::None => BlobEncoding::Raw,
        }
    }

    fn submit<M>(&mut self, message: M, blob_type: BlobType<'static>) -> Result<()>
    where
        M: protobuf::Message + Send + 'static,
    {
        let encoding = self.encoding();
        let task = self.pool.submit(move || serialize_block(&message, blob_type, encoding));
        self.producer
            .as_ref()
            .expect("PbfWriter already finished")
            .push(task)
    }

    fn build_header_block(&self, info: &PbfHeaderInfo) -> osmformat::HeaderBlock {
        let mut header = osmformat::HeaderBlock::new();
        header.required_features.push("OsmSchema-V0.6".to_string());
        if self.options.dense_nodes {
            header.required_features.push("DenseNodes".to_string());
        }
        if self.options.metadata.visible {
            header.required_features.push("HistoricalInformation".to_string());
        }
        if self.options.locations_on_ways {
            header.optional_features.push("LocationsOnWays".to_string());
        }
        if let Some(program) = &info.writing_program {
            header.set_writingprogram(program.clone());
        }
        if let Some((left, right, top, bottom)) = info.bbox {
            let mut bbox = osmformat::HeaderBBox::new();
            bbox.set_left(left);
            bbox.set_right(right);
            bbox.set_top(top);
            bbox.set_bottom(bottom);
            header.bbox = MessageField::some(bbox);
        }
        if let Some(ts) = info.osmosis_replication_timestamp {
            header.osmosis_replication_timestamp = Some(ts);
        }
        if let Some(seq) = info.osmosis_replication_sequence_number {
            header.osmosis_replication_sequence_number = Some(seq);
        }
        if let Some(url) = &info.osmosis_replication_base_url {
            header.set_osmosis_replication_base_url(url.clone());
        }
        header
    }

    /// Writes the leading `OSMHeader` blob. Calling this more than once is a
    /// no-op; [`Self::write_object`] calls it with defaults if a caller
    /// skips straight to writing entities.
    pub fn write_header(&mut self, info: &PbfHeaderInfo) -> Result<()> {
        if self.header_written {
            return Ok(());
        }
        let header = self.build_header_block(info);
        self.submit(header, BlobType::OsmHeader)?;
        self.header_written = true;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let primitive_block = self.block.take_block();
        self.submit(primitive_block, BlobType::OsmData)
    }

    /// Appends one object, flushing the current block first if it would not
    /// fit (`spec.md` §3 I2/I3).
    pub fn write_object(&mut self, object: &OsmObject) -> Result<()> {
        if !self.header_written {
            self.write_header(&PbfHeaderInfo::default())?;
        }

        let group_type = group_type_of(object, self.options.dense_nodes);
        if !self.block.can_add(group_type, approx_object_size(object)) {
            log::debug!(
                "flushing block of {} entities, {} bytes: next object changes group type or would overshoot the budget",
                self.block.len(),
                self.block.size()
            );
            self.flush_block()?;
        }

        match object {
            OsmObject::Node(n) => {
                if self.options.dense_nodes {
                    self.block.add_dense_node(n, self.options.metadata);
                } else {
                    self.block.add_node(n, self.options.metadata);
                }
            }
            OsmObject::Way(w) => self
                .block
                .add_way(w, self.options.metadata, self.options.locations_on_ways),
            OsmObject::Relation(r) => self.block.add_relation(r, self.options.metadata),
        }

        if self.block.len() >= MAX_ENTITIES_PER_BLOCK {
            log::debug!("flushing block: reached MAX_ENTITIES_PER_BLOCK ({MAX_ENTITIES_PER_BLOCK})");
            self.flush_block()?;
        }
        Ok(())
    }

    /// Flushes any partial block, closes the output queue, and waits for
    /// the drain thread to finish writing, returning `W` (or the first
    /// error either side raised).
    pub fn finish(mut self) -> Result<W> {
        self.flush_block()?;
        self.producer.take();
        let drain = self.drain.take().expect("finish called more than once");
        drain.join().expect("PBF writer drain thread panicked")
    }
}

/// The [`FormatEncoder`] registered under the `pbf` tag (`spec.md` §4.10).
/// Builds a whole [`Buffer`] into an in-memory PBF file with default
/// options; callers who need custom [`PbfWriterOptions`] or an
/// `OSMHeader`/bbox should use [`PbfWriter`] directly instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct PbfCodec;

impl FormatEncoder for PbfCodec {
    fn encode_all(&self, buffer: &Buffer, sink: &mut dyn ByteSink) -> Result<()> {
        let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
        writer.write_header(&PbfHeaderInfo::default())?;
        for object in buffer {
            writer.write_object(object)?;
        }
        let bytes = writer.finish()?;
        sink.write_all(&bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WayRef;

    #[test]
    fn dense_node_block_round_trips_through_take_block() {
        let mut builder = PrimitiveBlockBuilder::new();
        let meta = MetadataFlags::default();

        let mut a = NodeData::default();
        a.meta = Meta::new(1);
        a.lat = 52.0;
        a.lon = 13.0;
        builder.add_dense_node(&a, meta);

        let mut b = NodeData::default();
        b.meta = Meta::new(5);
        b.lat = 52.0;
        b.lon = 13.0;
        builder.add_dense_node(&b, meta);

        assert_eq!(builder.len(), 2);
        let block = builder.take_block();
        assert!(builder.is_empty());
        assert_eq!(block.primitivegroup.len(), 1);
        let dense = block.primitivegroup[0].dense.as_ref().unwrap();
        assert_eq!(dense.id, vec![1, 4]);
    }

    #[test]
    fn way_with_locations_on_ways_emits_delta_coded_columns() {
        let mut builder = PrimitiveBlockBuilder::new();
        let mut way = WayData::default();
        way.meta = Meta::new(10);
        way.refs = vec![
            WayRef { node_id: 100, location: Some((52.0, 13.0)) },
            WayRef { node_id: 101, location: Some((52.001, 13.001)) },
        ];
        builder.add_way(&way, MetadataFlags::default(), true);
        let block = builder.take_block();
        let w = &block.primitivegroup[0].ways[0];
        assert_eq!(w.refs, vec![100, 1]);
        assert_eq!(w.lat.len(), 2);
        assert_eq!(w.lon.len(), 2);
    }

    #[test]
    fn writer_emits_header_then_data_frame() {
        let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
        let mut node = NodeData::default();
        node.meta = Meta::new(42);
        node.lat = 1.0;
        node.lon = 2.0;
        writer.write_object(&OsmObject::Node(node)).unwrap();
        let bytes = writer.finish().unwrap();

        let mut reader = crate::blob::BlobReader::new(&bytes[..]);
        let header_blob = reader.next().unwrap().unwrap();
        assert_eq!(header_blob.get_type(), BlobType::OsmHeader);
        let data_blob = reader.next().unwrap().unwrap();
        assert_eq!(data_blob.get_type(), BlobType::OsmData);
        assert!(reader.next().is_none());
    }
}
