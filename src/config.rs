//! Typed parsing of the encoder configuration keys from `spec.md` §6.

use crate::dense::MetadataFlags;
use crate::error::{new_config_error, ConfigError, Result};

/// How blocks are compressed on the wire (`pbf_compression`).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    Zlib { level: u32 },
    None,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zlib { level: 6 }
    }
}

/// Parsed, validated options for [`crate::pbf::writer::PbfWriter`].
#[derive(Clone, Copy, Debug)]
pub struct PbfWriterOptions {
    /// `pbf_dense_nodes`, default `true`.
    pub dense_nodes: bool,
    /// `pbf_compression`, default `zlib` (level 6).
    pub compression: Compression,
    /// `add_metadata`, default: no metadata fields.
    pub metadata: MetadataFlags,
    /// `locations_on_ways`, default `false`.
    pub locations_on_ways: bool,
}

impl Default for PbfWriterOptions {
    fn default() -> Self {
        PbfWriterOptions {
            dense_nodes: true,
            compression: Compression::default(),
            metadata: MetadataFlags::default(),
            locations_on_ways: false,
        }
    }
}

impl PbfWriterOptions {
    /// Builds options from a `(key, value)` table, matching `spec.md` §6's
    /// recognized keys. Unknown keys raise `ConfigError::UnknownOption`, and
    /// the deprecated `pbf_add_metadata` alias raises
    /// `ConfigError::DeprecatedAlias` rather than being silently accepted.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = PbfWriterOptions::default();

        for (key, value) in pairs {
            match key {
                "pbf_dense_nodes" => opts.dense_nodes = parse_bool(key, value)?,
                "pbf_compression" => opts.compression = parse_compression(value)?,
                "add_metadata" => opts.metadata = parse_metadata(value)?,
                "locations_on_ways" => opts.locations_on_ways = parse_bool(key, value)?,
                "pbf_add_metadata" => {
                    return Err(new_config_error(ConfigError::DeprecatedAlias {
                        old: "pbf_add_metadata",
                        new: "add_metadata",
                    }))
                }
                other => {
                    return Err(new_config_error(ConfigError::UnknownOption(other.to_string())))
                }
            }
        }

        Ok(opts)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(new_config_error(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })),
    }
}

fn parse_compression(value: &str) -> Result<Compression> {
    match value {
        "none" => Ok(Compression::None),
        "zlib" => Ok(Compression::Zlib { level: 6 }),
        _ => Err(new_config_error(ConfigError::InvalidValue {
            key: "pbf_compression",
            value: value.to_string(),
        })),
    }
}

/// Parses `true`, `false`, `all`, `none`, or a comma list of
/// `version,timestamp,changeset,uid,user`.
fn parse_metadata(value: &str) -> Result<MetadataFlags> {
    match value {
        "all" | "true" => {
            return Ok(MetadataFlags {
                version: true,
                timestamp: true,
                changeset: true,
                uid: true,
                user: true,
                visible: false,
            })
        }
        "none" | "false" => return Ok(MetadataFlags::default()),
        _ => {}
    }

    let mut flags = MetadataFlags::default();
    for field in value.split(',') {
        match field.trim() {
            "version" => flags.version = true,
            "timestamp" => flags.timestamp = true,
            "changeset" => flags.changeset = true,
            "uid" => flags.uid = true,
            "user" => flags.user = true,
            other => {
                return Err(new_config_error(ConfigError::InvalidValue {
                    key: "add_metadata",
                    value: other.to_string(),
                }))
            }
        }
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = PbfWriterOptions::default();
        assert!(opts.dense_nodes);
        assert_eq!(opts.compression, Compression::Zlib { level: 6 });
        assert!(!opts.locations_on_ways);
        assert!(!opts.metadata.any());
    }

    #[test]
    fn rejects_deprecated_alias() {
        let err = PbfWriterOptions::from_pairs([("pbf_add_metadata", "all")]).unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::Config(ConfigError::DeprecatedAlias { old: "pbf_add_metadata", .. })
        ));
    }

    #[test]
    fn parses_comma_list_metadata() {
        let opts = PbfWriterOptions::from_pairs([("add_metadata", "version,uid")]).unwrap();
        assert!(opts.metadata.version);
        assert!(opts.metadata.uid);
        assert!(!opts.metadata.timestamp);
    }

    #[test]
    fn rejects_unknown_key() {
        let err = PbfWriterOptions::from_pairs([("bogus_key", "1")]).unwrap_err();
        assert!(matches!(err.kind(), crate::error::ErrorKind::Config(ConfigError::UnknownOption(_))));
    }
}
