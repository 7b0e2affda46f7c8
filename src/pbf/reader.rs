//! The PBF decoder: `spec.md` §4.8. [`ElementReader`] mirrors the teacher's
//! own zero-copy reader (`examples/b-r-u-osmpbf`'s `reader.rs`): it walks
//! blob frames and hands out borrowing [`Element`] views with no owned
//! copies, matching Design Note 9's "Buffer as an arena".
//!
//! [`PbfCodec`] is the [`crate::pipeline::FormatDecoder`] registered under
//! the `pbf` tag -- a thinner, format-agnostic entry point that copies
//! elements into the owned [`crate::model`] representation the registry's
//! callers expect. Prefer [`ElementReader`] directly when the zero-copy view
//! is enough; it avoids that copy entirely.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use rayon::prelude::*;

use crate::blob::{Blob, BlobDecode, BlobReader};
use crate::dense::DenseNode;
use crate::elements::{Element, Info, RelMemberType, Way};
use crate::error::Result;
use crate::model::{
    Buffer, Member, MemberType as ModelMemberType, Meta, NodeData, OsmObject, RelationData, WayData, WayRef,
};
use crate::pipeline::{ByteSource, FormatDecoder};

/// Streams elements out of a PBF byte source, mirroring `osmpbf`'s
/// `ElementReader` (teacher's `reader.rs`).
pub struct ElementReader<R: Read> {
    blobs: BlobReader<R>,
}

impl ElementReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(ElementReader::new_inner(BlobReader::from_path(path)?))
    }
}

impl<R: Read> ElementReader<R> {
    pub fn new(reader: R) -> Self {
        ElementReader::new_inner(BlobReader::new(reader))
    }

    fn new_inner(blobs: BlobReader<R>) -> Self {
        ElementReader { blobs }
    }

    /// Visits every element in blob order, on the calling thread.
    pub fn for_each<F>(self, mut f: F) -> Result<()>
    where
        F: FnMut(Element),
    {
        for blob in self.blobs {
            visit_blob(blob?, &mut f)?;
        }
        Ok(())
    }

    /// Decodes and maps each blob's elements on `rayon`'s pool, then folds
    /// the per-blob results together sequentially in blob order (`spec.md`
    /// §5's "parallel compute, ordered consumption" shape, at blob
    /// granularity rather than the byte-frame granularity
    /// [`crate::pbf::writer::PbfWriter`] uses).
    ///
    /// This is a convenience layer above the core per `spec.md` §9's note
    /// that higher-level iteration APIs sit outside it; it buffers the
    /// whole blob list before mapping; very large files should prefer
    /// [`Self::for_each`].
    pub fn par_map_reduce<Map, Reduce, Ident, Out>(self, map_op: Map, ident: Ident, reduce_op: Reduce) -> Result<Out>
    where
        Map: Fn(Element) -> Out + Send + Sync,
        Reduce: Fn(Out, Out) -> Out + Send + Sync,
        Ident: Fn() -> Out + Send + Sync,
        Out: Send,
    {
        let blobs: Vec<Blob> = self.blobs.collect::<Result<Vec<_>>>()?;
        let per_blob: Result<Vec<Out>> = blobs
            .into_par_iter()
            .map(|blob| {
                let mut acc = ident();
                visit_blob(blob, &mut |element| {
                    let current = std::mem::replace(&mut acc, ident());
                    acc = reduce_op(current, map_op(element));
                })?;
                Ok(acc)
            })
            .collect();
        Ok(per_blob?.into_iter().fold(ident(), &reduce_op))
    }
}

fn visit_blob<F: FnMut(Element)>(blob: Blob, f: &mut F) -> Result<()> {
    match blob.decode()? {
        BlobDecode::OsmHeader(header) => header.check_required_features()?,
        BlobDecode::OsmData(block) => return visit_data_block(&block, f),
        BlobDecode::Unknown(_) => {}
    }
    Ok(())
}

fn visit_data_block<F: FnMut(Element)>(block: &crate::block::PrimitiveBlock, f: &mut F) -> Result<()> {
    for group in block.groups() {
        for node in group.nodes() {
            f(Element::Node(node));
        }
        for node in group.dense_nodes() {
            f(Element::DenseNode(node));
        }
        for way in group.ways() {
            f(Element::Way(way));
        }
        for relation in group.relations() {
            f(Element::Relation(relation));
        }
    }
    Ok(())
}

fn tags_to_owned<'a, I: Iterator<Item = (&'a str, &'a str)>>(tags: I) -> Vec<(Vec<u8>, Vec<u8>)> {
    tags.map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec())).collect()
}

fn meta_from_info(id: i64, info: Info, tags: Vec<(Vec<u8>, Vec<u8>)>) -> Meta {
    Meta {
        id,
        version: info.version().unwrap_or(0).max(0) as u32,
        timestamp: info
            .milli_timestamp()
            .map(|ms| (ms / 1000).max(0) as u32)
            .unwrap_or(0),
        changeset: info.changeset().unwrap_or(0),
        uid: info.uid().unwrap_or(0),
        user: info
            .user()
            .and_then(|r| r.ok())
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default(),
        visible: info.visible(),
        tags,
    }
}

fn meta_from_dense(node: &DenseNode, tags: Vec<(Vec<u8>, Vec<u8>)>) -> Meta {
    match node.info() {
        Some(info) => Meta {
            id: node.id(),
            version: info.version().max(0) as u32,
            timestamp: (info.milli_timestamp() / 1000).max(0) as u32,
            changeset: info.changeset(),
            uid: info.uid(),
            user: info.user().ok().map(|s| s.as_bytes().to_vec()).unwrap_or_default(),
            visible: info.visible(),
            tags,
        },
        None => Meta {
            id: node.id(),
            visible: true,
            tags,
            ..Default::default()
        },
    }
}

fn way_refs(way: &Way) -> Vec<WayRef> {
    let mut locations = way.node_locations();
    way.refs()
        .map(|node_id| WayRef {
            node_id,
            location: locations.next().map(|loc| (loc.lat(), loc.lon())),
        })
        .collect()
}

/// Copies one zero-copy [`Element`] view into an owned [`OsmObject`].
pub fn element_to_object(element: Element) -> OsmObject {
    match element {
        Element::Node(node) => OsmObject::Node(NodeData {
            meta: meta_from_info(node.id(), node.info(), tags_to_owned(node.tags())),
            lon: node.lon(),
            lat: node.lat(),
        }),
        Element::DenseNode(node) => {
            let tags = tags_to_owned(node.tags());
            let lat = node.lat();
            let lon = node.lon();
            OsmObject::Node(NodeData { meta: meta_from_dense(&node, tags), lat, lon })
        }
        Element::Way(way) => OsmObject::Way(WayData {
            meta: meta_from_info(way.id(), way.info(), tags_to_owned(way.tags())),
            refs: way_refs(&way),
        }),
        Element::Relation(relation) => OsmObject::Relation(RelationData {
            meta: meta_from_info(relation.id(), relation.info(), tags_to_owned(relation.tags())),
            members: relation
                .members()
                .map(|m| Member {
                    member_type: match m.member_type {
                        RelMemberType::Node => ModelMemberType::Node,
                        RelMemberType::Way => ModelMemberType::Way,
                        RelMemberType::Relation => ModelMemberType::Relation,
                    },
                    id: m.member_id,
                    role: m.role().unwrap_or("").as_bytes().to_vec(),
                })
                .collect(),
        }),
    }
}

/// The [`FormatDecoder`] registered under the `pbf` tag. Reads the whole
/// source to a byte buffer (PBF framing requires random-ish access to
/// `BlobHeader.datasize` boundaries rather than arbitrary chunking) and
/// decodes every element into an owned [`Buffer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PbfCodec;

impl FormatDecoder for PbfCodec {
    fn decode_all(&self, source: &mut dyn ByteSource) -> Result<Buffer> {
        let mut bytes = Vec::new();
        loop {
            let chunk = source.get_chunk()?;
            let done = chunk.is_empty();
            bytes.extend_from_slice(&chunk);
            if done || source.input_done() {
                break;
            }
        }

        let reader = ElementReader::new(&bytes[..]);
        let mut buffer = Buffer::new();
        reader.for_each(|element| {
            buffer.push(element_to_object(element), 0);
        })?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PbfWriterOptions;
    use crate::model::{Meta as ModelMeta};
    use crate::pbf::writer::{PbfHeaderInfo, PbfWriter};

    fn sample_bytes() -> Vec<u8> {
        let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
        writer.write_header(&PbfHeaderInfo::default()).unwrap();
        let mut node = NodeData::default();
        node.meta = ModelMeta::new(7);
        node.meta.tags.push((b"amenity".to_vec(), b"cafe".to_vec()));
        node.lat = 52.5;
        node.lon = 13.4;
        writer.write_object(&OsmObject::Node(node)).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn unsupported_required_feature_is_rejected() {
        let mut header = crate::proto::osmformat::HeaderBlock::new();
        header.required_features.push("FutureExtension".to_string());
        let frame = crate::blob::serialize_block(
            &header,
            crate::blob::BlobType::OsmHeader,
            crate::blob::BlobEncoding::Raw,
        )
        .unwrap();

        let reader = ElementReader::new(&frame[..]);
        let err = reader.for_each(|_| {}).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::Format(crate::error::FormatError::UnsupportedRequiredFeature(f))
                if f == "FutureExtension"
        ));
    }

    #[test]
    fn element_reader_for_each_recovers_the_node() {
        let bytes = sample_bytes();
        let reader = ElementReader::new(&bytes[..]);
        let mut seen = Vec::new();
        reader
            .for_each(|element| {
                if let Element::DenseNode(node) = element {
                    seen.push(node.id());
                }
            })
            .unwrap();
        assert_eq!(seen, vec![7]);
    }

    #[test]
    fn pbf_codec_decode_all_round_trips_through_model() {
        let bytes = sample_bytes();
        let mut source = crate::pipeline::ReadSource::new(&bytes[..], 4096);
        let buffer = PbfCodec.decode_all(&mut source).unwrap();
        assert_eq!(buffer.len(), 1);
        match buffer.iter().next().unwrap() {
            OsmObject::Node(n) => {
                assert_eq!(n.meta.id, 7);
                assert_eq!(n.meta.tags, vec![(b"amenity".to_vec(), b"cafe".to_vec())]);
                assert!((n.lat - 52.5).abs() < 1e-6);
                assert!((n.lon - 13.4).abs() < 1e-6);
            }
            _ => panic!("expected a node"),
        }
    }
}
