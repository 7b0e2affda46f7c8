//! Blob framing: `spec.md` §3 "Blob framing" and §4.4 "BlobSerializer".
//!
//! A frame on the wire is `u32_be length || BlobHeader || Blob`. This module
//! owns the constants, the `BlobType` tag, the decode-side `Blob`/`BlobReader`
//! pair, and the encode-side `serialize_block` helper used by
//! [`crate::pbf::writer`] to build one pool task's output bytes.

use std::fs::File;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use protobuf::Message;

use crate::block::{HeaderBlock, PrimitiveBlock};
use crate::error::{new_blob_error, new_capacity_error, new_protobuf_error, BlobError, Result};
use crate::proto::fileformat;
use crate::zlib;

/// Hard ceiling on a `BlobHeader`'s own serialized size (`spec.md` §6).
pub const MAX_BLOB_HEADER_SIZE: u64 = 64 * 1024;
/// Hard ceiling on an (optionally compressed) `Blob` message (`spec.md` §6: "32 MiB hard").
pub const MAX_BLOB_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;
/// Soft target for an *uncompressed* block before compression (`spec.md` §3 I3).
pub const MAX_UNCOMPRESSED_BLOB_SIZE: usize = 16 * 1024 * 1024;
/// Maximum number of entities in one `PrimitiveBlock` (`spec.md` §3 I2).
pub const MAX_ENTITIES_PER_BLOCK: usize = 8_000;

/// The content type of a blob, read from `BlobHeader.type`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlobType<'a> {
    /// Blob contains a `HeaderBlock`.
    OsmHeader,
    /// Blob contains a `PrimitiveBlock`.
    OsmData,
    /// An unknown blob type with the given string identifier. Decoders
    /// should skip unknown blobs rather than fail.
    Unknown(&'a str),
}

impl<'a> BlobType<'a> {
    pub(crate) fn as_str(&self) -> &'a str {
        match *self {
            BlobType::OsmHeader => "OSMHeader",
            BlobType::OsmData => "OSMData",
            BlobType::Unknown(s) => s,
        }
    }
}

/// The decoded content of a blob.
pub enum BlobDecode<'a> {
    OsmHeader(HeaderBlock),
    OsmData(PrimitiveBlock),
    Unknown(&'a str),
}

/// One length-prefixed frame: a `BlobHeader` plus its `Blob` body.
pub struct Blob {
    pub(crate) header: fileformat::BlobHeader,
    pub(crate) blob: fileformat::Blob,
}

impl Blob {
    fn new(header: fileformat::BlobHeader, blob: fileformat::Blob) -> Blob {
        Blob { header, blob }
    }

    /// Decodes the blob's content without an expensive decompression step
    /// unless the content is actually `OSMHeader`/`OSMData`.
    pub fn decode(&self) -> Result<BlobDecode> {
        match self.get_type() {
            BlobType::OsmHeader => self.to_header_block().map(BlobDecode::OsmHeader),
            BlobType::OsmData => self.to_primitive_block().map(BlobDecode::OsmData),
            BlobType::Unknown(x) => Ok(BlobDecode::Unknown(x)),
        }
    }

    pub fn get_type(&self) -> BlobType {
        match self.header.type_() {
            "OSMHeader" => BlobType::OsmHeader,
            "OSMData" => BlobType::OsmData,
            x => BlobType::Unknown(x),
        }
    }

    pub fn to_header_block(&self) -> Result<HeaderBlock> {
        decode_blob(&self.blob).map(HeaderBlock::new)
    }

    pub fn to_primitive_block(&self) -> Result<PrimitiveBlock> {
        decode_blob(&self.blob).map(PrimitiveBlock::new)
    }
}

/// Parses the message carried by `blob`, decompressing first if it carries
/// `zlib_data`. `lzma_data`/`lz4_data`/`zstd_data` are tolerated as "present
/// but unsupported" per `spec.md` §6, rather than treated as a missing blob.
pub(crate) fn decode_blob<T: protobuf::Message>(blob: &fileformat::Blob) -> Result<T> {
    if blob.has_raw() {
        T::parse_from_bytes(blob.raw()).map_err(|e| new_protobuf_error(e, "parsing raw blob"))
    } else if blob.has_zlib_data() {
        let raw = zlib::decompress(blob.zlib_data(), blob.raw_size())?;
        T::parse_from_bytes(&raw).map_err(|e| new_protobuf_error(e, "parsing zlib blob"))
    } else if blob.has_lzma_data() {
        Err(new_blob_error(BlobError::UnsupportedCompression("lzma")))
    } else if blob.has_lz4_data() {
        Err(new_blob_error(BlobError::UnsupportedCompression("lz4")))
    } else if blob.has_zstd_data() {
        Err(new_blob_error(BlobError::UnsupportedCompression("zstd")))
    } else {
        Err(new_blob_error(BlobError::Empty))
    }
}

/// A reader for PBF files that iterates over raw [`Blob`]s, decoding the
/// length-prefix framing but not the blob content itself.
pub struct BlobReader<R: Read> {
    reader: R,
    last_blob_ok: bool,
}

impl<R: Read> BlobReader<R> {
    pub fn new(reader: R) -> BlobReader<R> {
        BlobReader {
            reader,
            last_blob_ok: true,
        }
    }
}

impl BlobReader<BufReader<File>> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = File::open(path)?;
        Ok(BlobReader::new(BufReader::new(f)))
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<Blob>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.last_blob_ok {
            return None;
        }

        let size = match self.reader.read_u32::<BigEndian>() {
            Ok(n) => u64::from(n),
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => return None,
            Err(e) => {
                self.last_blob_ok = false;
                return Some(Err(e.into()));
            }
        };

        if size > MAX_BLOB_HEADER_SIZE {
            self.last_blob_ok = false;
            return Some(Err(new_blob_error(BlobError::HeaderTooBig { size })));
        }

        let header: fileformat::BlobHeader =
            match protobuf::Message::parse_from_reader(&mut self.reader.by_ref().take(size)) {
                Ok(header) => header,
                Err(e) => {
                    self.last_blob_ok = false;
                    return Some(Err(new_protobuf_error(e, "reading BlobHeader")));
                }
            };

        let datasize = header.datasize() as u64;
        if datasize > MAX_BLOB_MESSAGE_SIZE {
            self.last_blob_ok = false;
            return Some(Err(new_blob_error(BlobError::MessageTooBig { size: datasize })));
        }

        let blob: fileformat::Blob =
            match protobuf::Message::parse_from_reader(&mut self.reader.by_ref().take(datasize)) {
                Ok(blob) => blob,
                Err(e) => {
                    self.last_blob_ok = false;
                    return Some(Err(new_protobuf_error(e, "reading Blob")));
                }
            };

        Some(Ok(Blob::new(header, blob)))
    }
}

/// The compression applied to a serialized block before framing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlobEncoding {
    /// Stored uncompressed.
    Raw,
    /// Zlib-compressed at the given level (0-9).
    Zlib { level: u32 },
}

/// Frames `message`, implementing `spec.md` §4.4 `BlobSerializer`: this is
/// the pool task body the encoder submits per block. Returns the complete
/// frame (length prefix + `BlobHeader` + `Blob`) ready to be written as-is.
pub fn serialize_block<M: protobuf::Message>(
    message: &M,
    blob_type: BlobType,
    encoding: BlobEncoding,
) -> Result<Vec<u8>> {
    let block_data = message
        .write_to_bytes()
        .map_err(|e| new_protobuf_error(e, "serializing block"))?;

    if block_data.len() > crate::blob::MAX_UNCOMPRESSED_BLOB_SIZE {
        log::warn!(
            "block of {} bytes exceeds MAX_UNCOMPRESSED_BLOB_SIZE ({} bytes) even alone",
            block_data.len(),
            MAX_UNCOMPRESSED_BLOB_SIZE
        );
        return Err(new_capacity_error(crate::error::CapacityError::EntityTooLarge {
            encoded_size: block_data.len(),
        }));
    }

    let mut blob = fileformat::Blob::new();
    match encoding {
        BlobEncoding::Raw => blob.set_raw(block_data),
        BlobEncoding::Zlib { level } => {
            blob.set_raw_size(block_data.len() as i32);
            blob.set_zlib_data(zlib::compress(&block_data, level)?);
        }
    }

    let blob_bytes_len = blob.compute_size();
    if blob_bytes_len as u64 > MAX_BLOB_MESSAGE_SIZE {
        log::warn!("serialized blob of {blob_bytes_len} bytes exceeds MAX_BLOB_MESSAGE_SIZE");
        return Err(new_blob_error(BlobError::MessageTooBig { size: blob_bytes_len as u64 }));
    }

    let mut header = fileformat::BlobHeader::new();
    header.set_type(blob_type.as_str().to_string());
    header.set_datasize(blob_bytes_len as i32);
    let header_len = header.compute_size();

    if header_len > MAX_BLOB_HEADER_SIZE {
        return Err(new_blob_error(BlobError::HeaderTooBig { size: header_len }));
    }

    let mut out = Vec::with_capacity(4 + header_len as usize + blob_bytes_len as usize);
    out.write_u32::<BigEndian>(header_len as u32)?;
    header
        .write_to_vec(&mut out)
        .map_err(|e| new_protobuf_error(e, "writing BlobHeader"))?;
    blob.write_to_vec(&mut out)
        .map_err(|e| new_protobuf_error(e, "writing Blob"))?;

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::osmformat;

    #[test]
    fn round_trips_a_header_blob() {
        let mut header = osmformat::HeaderBlock::new();
        header.required_features.push("OsmSchema-V0.6".to_string());
        let frame = serialize_block(&header, BlobType::OsmHeader, BlobEncoding::Zlib { level: 6 }).unwrap();

        let mut reader = BlobReader::new(&frame[..]);
        let blob = reader.next().unwrap().unwrap();
        assert_eq!(blob.get_type(), BlobType::OsmHeader);
        match blob.decode().unwrap() {
            BlobDecode::OsmHeader(h) => {
                assert_eq!(h.required_features(), &["OsmSchema-V0.6".to_string()]);
            }
            _ => panic!("expected header block"),
        }
        assert!(reader.next().is_none());
    }

    #[test]
    fn raw_encoding_round_trips_a_primitive_block() {
        let mut block = osmformat::PrimitiveBlock::new();
        block.stringtable = protobuf::MessageField::some(osmformat::StringTable::new());
        let frame = serialize_block(&block, BlobType::OsmData, BlobEncoding::Raw).unwrap();

        let mut reader = BlobReader::new(&frame[..]);
        let blob = reader.next().unwrap().unwrap();
        assert_eq!(blob.get_type(), BlobType::OsmData);
        assert!(matches!(blob.decode().unwrap(), BlobDecode::OsmData(_)));
    }
}
