//! Crate-wide error types.
//!
//! Error data structures are modeled just like in the `csv` crate by
//! BurntSushi: a thin `Error` wrapping a boxed `ErrorKind`, so that
//! `Result<T>` stays a single word on the stack.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::result;
use std::str::Utf8Error;

use protobuf::Error as ProtobufError;

pub(crate) fn new_error(kind: ErrorKind) -> Error {
    Error(Box::new(kind))
}

pub(crate) fn new_blob_error(kind: BlobError) -> Error {
    Error(Box::new(ErrorKind::Blob(kind)))
}

pub(crate) fn new_protobuf_error(err: ProtobufError, location: &'static str) -> Error {
    Error(Box::new(ErrorKind::Protobuf { err, location }))
}

pub(crate) fn new_format_error(kind: FormatError) -> Error {
    Error(Box::new(ErrorKind::Format(kind)))
}

pub(crate) fn new_config_error(kind: ConfigError) -> Error {
    Error(Box::new(ErrorKind::Config(kind)))
}

pub(crate) fn new_capacity_error(kind: CapacityError) -> Error {
    Error(Box::new(ErrorKind::Capacity(kind)))
}

/// A type alias for `Result<T, osmcodec::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// An error that can occur while encoding or decoding OSM data.
#[derive(Debug)]
pub struct Error(Box<ErrorKind>);

impl Error {
    /// Return the specific type of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Unwrap this error into its underlying type.
    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }
}

/// The specific type of an error.
///
/// The five kinds `Io`, `Format`, `Config`, `Capacity` and `Cancelled` are
/// the ones callers are expected to match on; the rest refine `Format`-like
/// failures that happen to have a more specific origin (a malformed
/// stringtable reference, a protobuf decode failure at a known location).
#[non_exhaustive]
#[derive(Debug)]
pub enum ErrorKind {
    /// Propagated unchanged from the byte-stream source or sink.
    Io(io::Error),
    /// An error that occurs when decoding a protobuf message.
    Protobuf {
        err: ProtobufError,
        location: &'static str,
    },
    /// The stringtable contains an entry at `index` that could not be
    /// decoded to a valid UTF-8 string.
    StringtableUtf8 { err: Utf8Error, index: usize },
    /// An element contains an out-of-bounds index to the stringtable.
    StringtableIndexOutOfBounds { index: usize },
    /// An error that occurs when decoding `Blob`s.
    Blob(BlobError),
    /// Malformed frame, bad OPL line, unsupported required feature, unknown
    /// compression, or any other "the bytes do not mean what they claim".
    Format(FormatError),
    /// Unknown or deprecated configuration option, or mutually exclusive
    /// settings.
    Config(ConfigError),
    /// An entity could not be serialized within the blob size budget.
    Capacity(CapacityError),
    /// The output queue was closed while a producer was still running.
    Cancelled,
}

/// An error that occurs when decoding or encoding a blob.
#[non_exhaustive]
#[derive(Debug)]
pub enum BlobError {
    /// Header size could not be decoded to a u32.
    InvalidHeaderSize,
    /// Blob header is bigger than `MAX_BLOB_HEADER_SIZE`.
    HeaderTooBig { size: u64 },
    /// Blob content is bigger than `MAX_BLOB_MESSAGE_SIZE`.
    MessageTooBig { size: u64 },
    /// The blob is empty because `raw` and `zlib_data` are both missing.
    Empty,
    /// `zlib_data` was present but decompressed to a size other than the
    /// blob's declared `raw_size`.
    SizeMismatch { expected: i32, actual: usize },
    /// The blob uses a compression scheme this crate can parse through but
    /// not decode (`lzma_data`, `lz4_data`, `zstd_data`).
    UnsupportedCompression(&'static str),
}

/// A malformed wire format: a bad frame, bad varint, unknown required
/// feature, or an invalid OPL line.
#[non_exhaustive]
#[derive(Debug)]
pub enum FormatError {
    /// First blob of a stream was not an `OSMHeader` blob.
    MissingHeaderBlob,
    /// A blob declared a `required_features` entry this decoder does not
    /// implement.
    UnsupportedRequiredFeature(String),
    /// Stream ended in the middle of a frame (length prefix, header, or
    /// blob body).
    UnexpectedEof,
    /// An OPL line failed to parse.
    OplLine { line: u64, reason: String },
    /// A `%` escape in an OPL field was not followed by two hex digits.
    OplBadEscape { line: u64 },
}

/// An invalid or conflicting configuration option.
#[non_exhaustive]
#[derive(Debug)]
pub enum ConfigError {
    /// `pbf_add_metadata` was given; the option was renamed to
    /// `add_metadata`.
    DeprecatedAlias { old: &'static str, new: &'static str },
    /// An option key this crate does not recognize.
    UnknownOption(String),
    /// An option value that does not parse for its key.
    InvalidValue { key: &'static str, value: String },
}

/// An entity could not be fit into a block within the size budget.
#[non_exhaustive]
#[derive(Debug)]
pub enum CapacityError {
    /// A single entity's encoded size alone exceeds
    /// `MAX_UNCOMPRESSED_BLOB_SIZE`, even in a freshly flushed block.
    EntityTooLarge { encoded_size: usize },
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        new_error(ErrorKind::Io(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(err)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self.0 {
            ErrorKind::Io(ref err) => Some(err),
            ErrorKind::Protobuf { ref err, .. } => Some(err),
            ErrorKind::StringtableUtf8 { ref err, .. } => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self.0 {
            ErrorKind::Io(ref err) => err.fmt(f),
            ErrorKind::Protobuf { ref err, location } => {
                write!(f, "protobuf error at '{location}': {err}")
            }
            ErrorKind::StringtableUtf8 { ref err, index } => {
                write!(f, "invalid UTF-8 at string table index {index}: {err}")
            }
            ErrorKind::StringtableIndexOutOfBounds { index } => {
                write!(f, "stringtable index out of bounds: {index}")
            }
            ErrorKind::Blob(ref e) => write!(f, "{e}"),
            ErrorKind::Format(ref e) => write!(f, "{e}"),
            ErrorKind::Config(ref e) => write!(f, "{e}"),
            ErrorKind::Capacity(ref e) => write!(f, "{e}"),
            ErrorKind::Cancelled => write!(f, "output queue was closed"),
        }
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            BlobError::InvalidHeaderSize => {
                write!(f, "blob header size could not be decoded")
            }
            BlobError::HeaderTooBig { size } => {
                write!(f, "blob header is too big: {size} bytes")
            }
            BlobError::MessageTooBig { size } => {
                write!(f, "blob message is too big: {size} bytes")
            }
            BlobError::Empty => {
                write!(f, "blob is missing fields 'raw' and 'zlib_data'")
            }
            BlobError::SizeMismatch { expected, actual } => {
                write!(
                    f,
                    "decompressed blob size {actual} does not match declared raw_size {expected}"
                )
            }
            BlobError::UnsupportedCompression(name) => {
                write!(f, "blob uses unsupported compression '{name}'")
            }
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FormatError::MissingHeaderBlob => {
                write!(f, "first blob of stream was not an OSMHeader blob")
            }
            FormatError::UnsupportedRequiredFeature(feature) => {
                write!(f, "unsupported required feature '{feature}'")
            }
            FormatError::UnexpectedEof => write!(f, "unexpected end of file mid-frame"),
            FormatError::OplLine { line, reason } => {
                write!(f, "line {line}: {reason}")
            }
            FormatError::OplBadEscape { line } => {
                write!(f, "line {line}: bare '%' is not a valid escape")
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::DeprecatedAlias { old, new } => {
                write!(f, "option '{old}' is deprecated, use '{new}' instead")
            }
            ConfigError::UnknownOption(key) => write!(f, "unknown option '{key}'"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "invalid value '{value}' for option '{key}'")
            }
        }
    }
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CapacityError::EntityTooLarge { encoded_size } => {
                write!(
                    f,
                    "entity's encoded size ({encoded_size} bytes) exceeds the maximum blob size even alone in a block"
                )
            }
        }
    }
}
