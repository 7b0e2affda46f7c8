//! Generated protobuf bindings, produced at build time by `build.rs` from
//! `fileformat.proto` and `osmformat.proto` (the standard OSM PBF schema).

include!(concat!(env!("OUT_DIR"), "/proto/mod.rs"));
