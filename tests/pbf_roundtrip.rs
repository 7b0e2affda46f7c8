//! End-to-end PBF encode/decode round trips, built entirely in-memory (no
//! checked-in `.osm.pbf` fixture, see `SPEC_FULL.md` §8).

use assert_approx_eq::assert_approx_eq;
use osmcodec::blob::{BlobType, MAX_ENTITIES_PER_BLOCK};
use osmcodec::config::PbfWriterOptions;
use osmcodec::model::{Member, MemberType, Meta, NodeData, OsmObject, RelationData, WayData, WayRef};
use osmcodec::pbf::reader::element_to_object;
use osmcodec::pbf::writer::PbfWriter;
use osmcodec::{BlobReader, ElementReader};

fn node(id: i64, lat: f64, lon: f64, tags: &[(&str, &str)]) -> OsmObject {
    let mut meta = Meta::new(id);
    meta.tags = tags.iter().map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec())).collect();
    OsmObject::Node(NodeData { meta, lat, lon })
}

fn decode_all(bytes: &[u8]) -> Vec<OsmObject> {
    let reader = ElementReader::new(bytes);
    let mut objects = Vec::new();
    reader.for_each(|element| objects.push(element_to_object(element))).unwrap();
    objects
}

#[test]
fn single_node_round_trips_with_exact_coordinates_and_tags() {
    let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
    writer.write_object(&node(1, 52.0, 13.0, &[("amenity", "bar")])).unwrap();
    let bytes = writer.finish().unwrap();

    let objects = decode_all(&bytes);
    assert_eq!(objects.len(), 1);
    match &objects[0] {
        OsmObject::Node(n) => {
            assert_eq!(n.meta.id, 1);
            assert_approx_eq!(n.lat, 52.0, 1e-7);
            assert_approx_eq!(n.lon, 13.0, 1e-7);
            assert_eq!(n.meta.tags, vec![(b"amenity".to_vec(), b"bar".to_vec())]);
        }
        _ => panic!("expected a node"),
    }
}

#[test]
fn way_and_relation_round_trip_through_dense_block() {
    let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
    writer.write_object(&node(1, 1.0, 1.0, &[])).unwrap();
    writer
        .write_object(&OsmObject::Way(WayData {
            meta: Meta::new(10),
            refs: vec![
                WayRef { node_id: 10, location: None },
                WayRef { node_id: 12, location: None },
                WayRef { node_id: 9, location: None },
            ],
        }))
        .unwrap();
    writer
        .write_object(&OsmObject::Relation(RelationData {
            meta: Meta::new(20),
            members: vec![
                Member { member_type: MemberType::Node, id: 1, role: b"outer".to_vec() },
                Member { member_type: MemberType::Way, id: 7, role: b"inner".to_vec() },
                Member { member_type: MemberType::Relation, id: 7, role: Vec::new() },
            ],
        }))
        .unwrap();
    let bytes = writer.finish().unwrap();

    let objects = decode_all(&bytes);
    assert_eq!(objects.len(), 3);

    match &objects[1] {
        OsmObject::Way(w) => {
            assert_eq!(w.meta.id, 10);
            assert_eq!(w.refs.iter().map(|r| r.node_id).collect::<Vec<_>>(), vec![10, 12, 9]);
        }
        _ => panic!("expected a way"),
    }

    match &objects[2] {
        OsmObject::Relation(r) => {
            assert_eq!(r.meta.id, 20);
            assert_eq!(r.members[0].role, b"outer".to_vec());
            assert_eq!(r.members[1].id, 7);
            assert_eq!(r.members[1].member_type, MemberType::Way);
            assert_eq!(r.members[2].role, Vec::<u8>::new());
        }
        _ => panic!("expected a relation"),
    }
}

#[test]
fn locations_on_ways_embeds_node_coordinates() {
    let mut opts = PbfWriterOptions::default();
    opts.locations_on_ways = true;
    let mut writer = PbfWriter::new(Vec::new(), opts);
    writer
        .write_object(&OsmObject::Way(WayData {
            meta: Meta::new(5),
            refs: vec![
                WayRef { node_id: 100, location: Some((52.0, 13.0)) },
                WayRef { node_id: 101, location: Some((52.001, 13.001)) },
            ],
        }))
        .unwrap();
    let bytes = writer.finish().unwrap();

    let reader = ElementReader::new(&bytes[..]);
    let mut found = false;
    reader
        .for_each(|element| {
            if let osmcodec::Element::Way(way) = element {
                let locs: Vec<_> = way.node_locations().collect();
                assert_eq!(locs.len(), 2);
                assert!((locs[0].lat() - 52.0).abs() < 1e-6);
                assert!((locs[1].lon() - 13.001).abs() < 1e-6);
                found = true;
            }
        })
        .unwrap();
    assert!(found);

    let header_blob = BlobReader::new(&bytes[..]).next().unwrap().unwrap();
    assert_eq!(header_blob.get_type(), BlobType::OsmHeader);
    match header_blob.decode().unwrap() {
        osmcodec::BlobDecode::OsmHeader(h) => {
            assert!(h.optional_features().iter().any(|f| f == "LocationsOnWays"));
        }
        _ => panic!("expected header"),
    }
}

#[test]
fn order_is_preserved_across_many_blocks_under_parallel_serialization() {
    // Forces multiple block flushes (MAX_ENTITIES_PER_BLOCK = 8000), so the
    // worker pool must serialize several blocks in parallel while the
    // output queue still reproduces submission order byte-for-byte
    // (`spec.md` §5, §8).
    let total = MAX_ENTITIES_PER_BLOCK * 2 + 500;
    let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
    for i in 0..total {
        writer.write_object(&node(i as i64, 1.0, 1.0, &[])).unwrap();
    }
    let bytes = writer.finish().unwrap();

    let objects = decode_all(&bytes);
    let ids: Vec<i64> = objects.iter().map(|o| o.id()).collect();
    assert_eq!(ids, (0..total as i64).collect::<Vec<_>>());
}

#[test]
fn first_frame_is_header_and_no_later_frame_is() {
    let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
    writer.write_object(&node(1, 1.0, 1.0, &[])).unwrap();
    writer.write_object(&node(2, 1.0, 1.0, &[])).unwrap();
    let bytes = writer.finish().unwrap();

    let mut frames = BlobReader::new(&bytes[..]);
    let first = frames.next().unwrap().unwrap();
    assert_eq!(first.get_type(), BlobType::OsmHeader);
    for frame in frames {
        assert_ne!(frame.unwrap().get_type(), BlobType::OsmHeader);
    }
}

#[test]
fn block_flush_logging_works_under_env_logger() {
    // Exercises the `log::debug!` call sites in `PbfWriter::write_object`
    // (forced flush on capacity) with a real subscriber installed, so the
    // log call sites are actually executed rather than only compiled.
    let _ = env_logger::builder().is_test(true).try_init();

    let mut writer = PbfWriter::new(Vec::new(), PbfWriterOptions::default());
    for i in 0..(MAX_ENTITIES_PER_BLOCK + 10) {
        writer.write_object(&node(i as i64, 1.0, 1.0, &[])).unwrap();
    }
    let bytes = writer.finish().unwrap();
    assert_eq!(decode_all(&bytes).len(), MAX_ENTITIES_PER_BLOCK + 10);
}

#[test]
fn uncompressed_writer_round_trips_too() {
    let mut opts = PbfWriterOptions::default();
    opts.compression = osmcodec::config::Compression::None;
    let mut writer = PbfWriter::new(Vec::new(), opts);
    writer.write_object(&node(42, 10.0, 20.0, &[("k", "v")])).unwrap();
    let bytes = writer.finish().unwrap();

    let objects = decode_all(&bytes);
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].id(), 42);
}
