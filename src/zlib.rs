//! Zlib compress/decompress helpers used by the blob framing layer.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{new_blob_error, BlobError, Result};

/// Compresses `data` at the given zlib level (0-9). Input is expected to
/// already be within `MAX_UNCOMPRESSED_BLOB_SIZE`; this function does not
/// itself enforce that limit, see [`crate::blob::encode_block_data`].
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompresses `data`, failing with [`BlobError::SizeMismatch`] if the
/// decompressed length does not exactly equal `expected_raw_size`.
pub fn decompress(data: &[u8], expected_raw_size: i32) -> Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected_raw_size.max(0) as usize);
    decoder.read_to_end(&mut out)?;

    if out.len() != expected_raw_size as usize {
        return Err(new_blob_error(BlobError::SizeMismatch {
            expected: expected_raw_size,
            actual: out.len(),
        }));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(100);
        let compressed = compress(&data, 6).unwrap();
        assert!(compressed.len() < data.len());
        let restored = decompress(&compressed, data.len() as i32).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let data = b"hello world".to_vec();
        let compressed = compress(&data, 6).unwrap();
        let err = decompress(&compressed, (data.len() - 1) as i32).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::Blob(BlobError::SizeMismatch { .. })
        ));
    }
}
