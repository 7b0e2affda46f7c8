/*!
A codec engine for the OpenStreetMap PBF and OPL file formats.

`osmcodec` decodes and encodes the two on-disk representations OSM data
ships in: the binary, protobuf-framed, delta/varint-packed `.osm.pbf`
format, and the line-oriented textual `.opl` format. Both directions go
through a worker pool so large files are decompressed, parsed, or
serialized across every core while still producing output in the
original element order.

## Usage

Add this to your `Cargo.toml`:

```toml
[dependencies]
osmcodec = "0.1"
```

## Example: count ways

```rust,no_run
use osmcodec::ElementReader;
use osmcodec::elements::Element;

fn main() {
    let reader = ElementReader::from_path("example.osm.pbf").unwrap();
    let mut ways = 0_u64;

    reader.for_each(|element| {
        if let Element::Way(_) = element {
            ways += 1;
        }
    }).unwrap();

    println!("Number of ways: {ways}");
}
```

## Example: count ways in parallel

```rust,no_run
use osmcodec::ElementReader;
use osmcodec::elements::Element;

fn main() {
    let reader = ElementReader::from_path("example.osm.pbf").unwrap();

    let ways = reader.par_map_reduce(
        |element| match element {
            Element::Way(_) => 1,
            _ => 0,
        },
        || 0_u64,
        |a, b| a + b,
    ).unwrap();

    println!("Number of ways: {ways}");
}
```

## Example: encode a block and write it as PBF

```rust,no_run
use osmcodec::config::PbfWriterOptions;
use osmcodec::model::{Meta, NodeData, OsmObject};
use osmcodec::pbf::writer::{PbfHeaderInfo, PbfWriter};
use std::fs::File;

fn main() {
    let file = File::create("out.osm.pbf").unwrap();
    let mut writer = PbfWriter::new(file, PbfWriterOptions::default());
    writer.write_header(&PbfHeaderInfo::default()).unwrap();
    writer.write_object(&OsmObject::Node(NodeData {
        meta: Meta::new(1),
        lon: 13.0,
        lat: 52.0,
    })).unwrap();
    writer.finish().unwrap();
}
```

## Layout

- [`blob`] -- blob framing and (de)compression, the binary wrapper every
  PBF message travels in.
- [`block`] / [`dense`] / [`elements`] -- the zero-copy decode-side views
  over a `PrimitiveBlock`.
- [`string_table`] / [`delta`] -- the two encodings (string
  interning, delta+zigzag) almost everything else in PBF is built from.
- [`pbf`] -- the reader (blob walking, owned-object conversion) and
  writer (block building, worker-pool framing) for the binary format.
- [`opl`] -- the chunked line reader/writer for the textual format.
- [`pipeline`] -- the format-agnostic worker pool, ordered output queue,
  and codec [`pipeline::Registry`] both formats register into.
- [`model`] -- the minimal owned object representation ([`model::OsmObject`]
  and friends) the registry-facing decode/encode path uses.
- [`config`] -- writer options and their string-keyed parser.
- [`error`] -- the crate's [`Error`]/[`ErrorKind`].
*/

#![recursion_limit = "1024"]

mod proto;

pub mod blob;
pub mod block;
pub mod config;
pub mod delta;
pub mod dense;
pub mod elements;
pub mod error;
pub mod model;
pub mod opl;
pub mod pbf;
pub mod pipeline;
pub mod string_table;
mod zlib;

pub use blob::{Blob, BlobDecode, BlobEncoding, BlobReader, BlobType};
pub use block::{HeaderBlock, PrimitiveBlock, PrimitiveGroup};
pub use elements::Element;
pub use error::{Error, ErrorKind, Result};
pub use pbf::{ElementReader, PbfWriter};
pub use pipeline::{default_registry, Registry};
