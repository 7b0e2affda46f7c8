//! PBF: the binary, protobuf-framed, delta/varint-packed, optionally
//! zlib-compressed wire format (`spec.md` §4).
//!
//! [`writer`] builds blocks and submits them to the worker pool for framing;
//! [`reader`] walks blob frames back into elements. Both sit on
//! [`crate::blob`] for framing and [`crate::pipeline`] for the ordered
//! output queue.

pub mod reader;
pub mod writer;

pub use reader::ElementReader;
pub use writer::PbfWriter;
