//! OPL: the line-oriented textual OSM format (`spec.md` §4.9). Each line
//! is one `n`/`w`/`r` (node/way/relation) record; `c` (changeset) lines are
//! recognized but produce no [`OsmObject`] since the domain model this
//! crate carries (`spec.md` §3 "OSMObject (external)") has no changeset
//! variant -- see `DESIGN.md`.
//!
//! [`OplParser`] is the chunked line reassembler: it accepts byte chunks of
//! arbitrary size (`spec.md`'s "Chunked reader contract"), carries an
//! unterminated prefix across chunk boundaries, and hands completed
//! [`Buffer`]s to a caller-supplied sink once the soft threshold is crossed.
//! [`stream`] wraps it into the same "background thread + ordered queue"
//! shape [`crate::pbf::writer::PbfWriter`] uses for the encode direction,
//! so the decode direction gets the same FIFO-preserving architecture
//! (`spec.md` §5).

use std::io::{Read, Write};
use std::thread;

use crate::error::{new_error, new_format_error, ErrorKind, FormatError, Result};
use crate::model::{
    Buffer, Member, MemberType, Meta, NodeData, OsmObject, RelationData, WayData, WayRef,
    BUFFER_SOFT_THRESHOLD,
};
use crate::pipeline::{ordered_queue, ByteSink, ByteSource, FormatDecoder, FormatEncoder, QueueConsumer, Task};

/// Bytes that do not need percent-encoding: printable ASCII minus space and
/// the field/record separators `, = @ %` (`spec.md` §6).
fn is_safe_byte(b: u8) -> bool {
    (0x21..=0x7e).contains(&b) && !matches!(b, b',' | b'=' | b'@' | b'%')
}

fn percent_encode(bytes: &[u8], out: &mut String) {
    for &b in bytes {
        if is_safe_byte(b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
}

/// Percent-decodes one field's raw bytes. A bare `%` not followed by two
/// hex digits is `FormatError::OplBadEscape` (`spec.md` §4.9).
fn percent_decode(line: u64, bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            let byte = hex.and_then(|h| std::str::from_utf8(h).ok()).and_then(|h| u8::from_str_radix(h, 16).ok());
            match byte {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => return Err(new_format_error(FormatError::OplBadEscape { line })),
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

fn opl_error(line: u64, reason: impl Into<String>) -> crate::error::Error {
    new_format_error(FormatError::OplLine { line, reason: reason.into() })
}

/// Whether `y` is a leap year in the proleptic Gregorian calendar.
fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Days since 1970-01-01 for a given (proleptic Gregorian) date. Howard
/// Hinnant's `days_from_civil` algorithm.
fn days_from_civil(y: i64, m: i64, d: i64) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (m + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}

/// The mirror of [`days_from_civil`]: `civil_from_days`.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = z - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn format_timestamp(epoch_secs: u32) -> String {
    let secs = i64::from(epoch_secs);
    let (days, rem) = (secs.div_euclid(86_400), secs.rem_euclid(86_400));
    let (y, m, d) = civil_from_days(days);
    let (h, mi, s) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    format!("{y:04}-{m:02}-{d:02}T{h:02}:{mi:02}:{s:02}Z")
}

fn parse_timestamp(line: u64, s: &str) -> Result<u32> {
    let b = s.as_bytes();
    let valid = b.len() == 20
        && b[4] == b'-'
        && b[7] == b'-'
        && b[10] == b'T'
        && b[13] == b':'
        && b[16] == b':'
        && b[19] == b'Z';
    let parts = valid.then(|| {
        (
            s[0..4].parse::<i64>(),
            s[5..7].parse::<i64>(),
            s[8..10].parse::<i64>(),
            s[11..13].parse::<i64>(),
            s[14..16].parse::<i64>(),
            s[17..19].parse::<i64>(),
        )
    });
    let (y, mo, d, h, mi, se) = match parts {
        Some((Ok(y), Ok(mo), Ok(d), Ok(h), Ok(mi), Ok(se))) => (y, mo, d, h, mi, se),
        _ => return Err(opl_error(line, format!("invalid timestamp '{s}'"))),
    };
    let days = days_from_civil(y, mo, d);
    let secs = days * 86_400 + h * 3600 + mi * 60 + se;
    if secs < 0 {
        return Err(opl_error(line, format!("timestamp before epoch: '{s}'")));
    }
    Ok(secs as u32)
}

fn parse_i64(line: u64, field: char, s: &str) -> Result<i64> {
    s.parse().map_err(|_| opl_error(line, format!("field '{field}' is not an integer: '{s}'")))
}

fn parse_tags(line: u64, value: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(|&b| b == b',')
        .map(|pair| {
            let eq = pair
                .iter()
                .position(|&b| b == b'=')
                .ok_or_else(|| opl_error(line, "tag is missing '='"))?;
            let key = percent_decode(line, &pair[..eq])?;
            let val = percent_decode(line, &pair[eq + 1..])?;
            Ok((key, val))
        })
        .collect()
}

fn parse_refs(line: u64, value: &[u8]) -> Result<Vec<WayRef>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(|&b| b == b',')
        .map(|raw| {
            let s = std::str::from_utf8(raw).map_err(|_| opl_error(line, "node ref is not UTF-8"))?;
            Ok(WayRef { node_id: parse_i64(line, 'N', s)?, location: None })
        })
        .collect()
}

fn parse_members(line: u64, value: &[u8]) -> Result<Vec<Member>> {
    if value.is_empty() {
        return Ok(Vec::new());
    }
    value
        .split(|&b| b == b',')
        .map(|raw| {
            let (&type_byte, rest) = raw
                .split_first()
                .ok_or_else(|| opl_error(line, "empty relation member"))?;
            let member_type = match type_byte {
                b'n' => MemberType::Node,
                b'w' => MemberType::Way,
                b'r' => MemberType::Relation,
                other => {
                    return Err(opl_error(line, format!("unknown member type '{}'", other as char)))
                }
            };
            let at = rest.iter().position(|&b| b == b'@').ok_or_else(|| opl_error(line, "member is missing '@role'"))?;
            let id_str = std::str::from_utf8(&rest[..at]).map_err(|_| opl_error(line, "member id is not UTF-8"))?;
            let role = percent_decode(line, &rest[at + 1..])?;
            Ok(Member { member_type, id: parse_i64(line, 'M', id_str)?, role })
        })
        .collect()
}

/// Parses one OPL line (without its trailing `\n`). Returns `Ok(None)` for
/// a `c` (changeset) record, which this crate's domain model does not
/// represent (`DESIGN.md`).
fn parse_line(line: u64, raw: &[u8]) -> Result<Option<OsmObject>> {
    let mut fields = raw.split(|&b| b == b' ').filter(|f| !f.is_empty());

    let head = fields.next().ok_or_else(|| opl_error(line, "empty line"))?;
    let (&type_byte, id_bytes) = head.split_first().ok_or_else(|| opl_error(line, "missing record type"))?;
    let id_str = std::str::from_utf8(id_bytes).map_err(|_| opl_error(line, "id is not UTF-8"))?;
    let id = parse_i64(line, type_byte as char, id_str)?;

    if type_byte == b'c' {
        return Ok(None);
    }

    let mut meta = Meta::new(id);
    let mut lon = 0.0;
    let mut lat = 0.0;
    let mut refs = Vec::new();
    let mut members = Vec::new();

    for field in fields {
        let (&key, value) = field.split_first().ok_or_else(|| opl_error(line, "empty field"))?;
        let value_str = || {
            std::str::from_utf8(value).map_err(|_| opl_error(line, format!("field '{}' is not UTF-8", key as char)))
        };
        match key {
            b'v' => meta.version = value_str()?.parse().map_err(|_| opl_error(line, "bad version"))?,
            b'd' => {
                meta.visible = match value_str()? {
                    "true" => true,
                    "false" => false,
                    other => return Err(opl_error(line, format!("bad visibility '{other}'"))),
                }
            }
            b'c' => meta.changeset = parse_i64(line, 'c', value_str()?)?,
            b't' => meta.timestamp = parse_timestamp(line, value_str()?)?,
            b'i' => meta.uid = value_str()?.parse().map_err(|_| opl_error(line, "bad uid"))?,
            b'u' => meta.user = percent_decode(line, value)?,
            b'T' => meta.tags = parse_tags(line, value)?,
            b'x' => lon = value_str()?.parse().map_err(|_| opl_error(line, "bad longitude"))?,
            b'y' => lat = value_str()?.parse().map_err(|_| opl_error(line, "bad latitude"))?,
            b'N' => refs = parse_refs(line, value)?,
            b'M' => members = parse_members(line, value)?,
            other => return Err(opl_error(line, format!("unknown field '{}'", other as char))),
        }
    }

    let object = match type_byte {
        b'n' => OsmObject::Node(NodeData { meta, lon, lat }),
        b'w' => OsmObject::Way(WayData { meta, refs }),
        b'r' => OsmObject::Relation(RelationData { meta, members }),
        other => return Err(opl_error(line, format!("unknown record type '{}'", other as char))),
    };
    Ok(Some(object))
}

fn write_meta(out: &mut String, meta: &Meta) {
    out.push_str(&format!(" v{}", meta.version));
    if !meta.visible {
        out.push_str(" dfalse");
    }
    out.push_str(&format!(" c{}", meta.changeset));
    if meta.timestamp != 0 {
        out.push_str(" t");
        out.push_str(&format_timestamp(meta.timestamp));
    }
    out.push_str(&format!(" i{}", meta.uid));
    if !meta.user.is_empty() {
        out.push_str(" u");
        percent_encode(&meta.user, out);
    }
    if !meta.tags.is_empty() {
        out.push_str(" T");
        for (i, (k, v)) in meta.tags.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            percent_encode(k, out);
            out.push('=');
            percent_encode(v, out);
        }
    }
}

/// Writes one [`OsmObject`] as a single OPL line, without the trailing
/// `\n` (`spec.md` §4.9, §6).
pub fn write_line(out: &mut String, object: &OsmObject) {
    match object {
        OsmObject::Node(n) => {
            out.push('n');
            out.push_str(&n.meta.id.to_string());
            write_meta(out, &n.meta);
            out.push_str(&format!(" x{:.7} y{:.7}", n.lon, n.lat));
        }
        OsmObject::Way(w) => {
            out.push('w');
            out.push_str(&w.meta.id.to_string());
            write_meta(out, &w.meta);
            if !w.refs.is_empty() {
                out.push_str(" N");
                for (i, r) in w.refs.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&r.node_id.to_string());
                }
            }
        }
        OsmObject::Relation(r) => {
            out.push('r');
            out.push_str(&r.meta.id.to_string());
            write_meta(out, &r.meta);
            if !r.members.is_empty() {
                out.push_str(" M");
                for (i, m) in r.members.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let t = match m.member_type {
                        MemberType::Node => 'n',
                        MemberType::Way => 'w',
                        MemberType::Relation => 'r',
                    };
                    out.push(t);
                    out.push_str(&m.id.to_string());
                    out.push('@');
                    percent_encode(&m.role, out);
                }
            }
        }
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}

/// The chunked line reassembler from `spec.md` §4.9: feeds arbitrary byte
/// chunks, carrying an unterminated prefix across calls, and ships
/// completed [`Buffer`]s to a sink once [`BUFFER_SOFT_THRESHOLD`] is
/// crossed. An unterminated trailing line at EOF is parsed by [`Self::finish`].
#[derive(Default)]
pub struct OplParser {
    pending: Vec<u8>,
    line_no: u64,
    buffer: Buffer,
}

impl OplParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_line(&mut self, raw: &[u8]) -> Result<()> {
        self.line_no += 1;
        let line = strip_cr(raw);
        if line.is_empty() {
            return Ok(());
        }
        match parse_line(self.line_no, line) {
            Ok(Some(object)) => self.buffer.push(object, line.len()),
            Ok(None) => log::debug!("opl: skipping changeset record at line {}", self.line_no),
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Feeds one chunk of input, invoking `emit` with a completed buffer
    /// each time the soft threshold is crossed.
    pub fn feed<F: FnMut(Buffer)>(&mut self, chunk: &[u8], mut emit: F) -> Result<()> {
        let mut start = 0;
        for (i, &b) in chunk.iter().enumerate() {
            if b == b'\n' {
                if self.pending.is_empty() {
                    self.push_line(&chunk[start..i])?;
                } else {
                    self.pending.extend_from_slice(&chunk[start..i]);
                    let line = std::mem::take(&mut self.pending);
                    self.push_line(&line)?;
                }
                start = i + 1;
                if self.buffer.committed_bytes() > BUFFER_SOFT_THRESHOLD {
                    emit(std::mem::take(&mut self.buffer));
                }
            }
        }
        self.pending.extend_from_slice(&chunk[start..]);
        Ok(())
    }

    /// Parses any unterminated trailing line and flushes the final buffer.
    pub fn finish<F: FnMut(Buffer)>(&mut self, mut emit: F) -> Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.push_line(&line)?;
        }
        if !self.buffer.is_empty() {
            emit(std::mem::take(&mut self.buffer));
        }
        Ok(())
    }
}

/// Runs an [`OplParser`] over `reader` on a dedicated thread, pushing
/// completed buffers to an ordered queue so a consumer sees them in file
/// order (`spec.md` §5) -- the same architecture
/// [`crate::pbf::writer::PbfWriter`] uses for the encode direction, mirrored
/// here for OPL's decode direction.
pub fn stream<R: Read + Send + 'static>(mut reader: R, chunk_size: usize, queue_capacity: usize) -> QueueConsumer<Result<Buffer>> {
    let (producer, consumer) = ordered_queue::<Result<Buffer>>(queue_capacity);
    thread::spawn(move || {
        let mut parser = OplParser::new();
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let result = (|| -> Result<()> {
            loop {
                let n = reader.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                parser.feed(&chunk[..n], |part| {
                    let _ = producer.push(Task::ready(Ok(part)));
                })?;
            }
            parser.finish(|part| {
                let _ = producer.push(Task::ready(Ok(part)));
            })
        })();
        if let Err(err) = result {
            let _ = producer.push(Task::ready(Err(err)));
        }
    });
    consumer
}

/// The [`FormatDecoder`]/[`FormatEncoder`] registered under the `opl` tag
/// (`spec.md` §4.10).
#[derive(Clone, Copy, Debug, Default)]
pub struct OplCodec;

impl FormatDecoder for OplCodec {
    fn decode_all(&self, source: &mut dyn ByteSource) -> Result<Buffer> {
        let mut parser = OplParser::new();
        let mut out = Buffer::new();
        let mut sink = |part: Buffer| {
            for object in part.into_objects() {
                out.push(object, 0);
            }
        };

        loop {
            let chunk = source.get_chunk()?;
            let done = chunk.is_empty();
            if !chunk.is_empty() {
                parser.feed(&chunk, &mut sink)?;
            }
            if done || source.input_done() {
                break;
            }
        }
        parser.finish(&mut sink)?;
        Ok(out)
    }
}

impl FormatEncoder for OplCodec {
    fn encode_all(&self, buffer: &Buffer, sink: &mut dyn ByteSink) -> Result<()> {
        let mut line = String::new();
        for object in buffer {
            line.clear();
            write_line(&mut line, object);
            line.push('\n');
            sink.write_all(line.as_bytes())
                .map_err(|err| new_error(ErrorKind::Io(err)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ReadSource;

    fn node_line() -> &'static [u8] {
        b"n1 v1 c100 t2020-01-01T00:00:00Z i0 u%20 Tamenity=bar x13.0 y52.0"
    }

    #[test]
    fn parses_node_with_tags_and_location() {
        let object = parse_line(1, node_line()).unwrap().unwrap();
        match object {
            OsmObject::Node(n) => {
                assert_eq!(n.meta.id, 1);
                assert_eq!(n.meta.version, 1);
                assert_eq!(n.meta.changeset, 100);
                assert_eq!(n.meta.timestamp, 1_577_836_800);
                assert_eq!(n.meta.uid, 0);
                assert_eq!(n.meta.user, b" ".to_vec());
                assert_eq!(n.meta.tags, vec![(b"amenity".to_vec(), b"bar".to_vec())]);
                assert!((n.lon - 13.0).abs() < 1e-9);
                assert!((n.lat - 52.0).abs() < 1e-9);
            }
            _ => panic!("expected a node"),
        }
    }

    #[test]
    fn changeset_lines_are_skipped_without_error() {
        assert!(parse_line(1, b"c1 v1").unwrap().is_none());
    }

    #[test]
    fn bare_percent_is_a_format_error() {
        let err = parse_line(1, b"n1 u%2").unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::ErrorKind::Format(FormatError::OplBadEscape { line: 1 })
        ));
    }

    #[test]
    fn way_and_relation_round_trip_through_write_line() {
        let way = OsmObject::Way(WayData {
            meta: Meta::new(10),
            refs: vec![
                WayRef { node_id: 10, location: None },
                WayRef { node_id: 12, location: None },
                WayRef { node_id: 9, location: None },
            ],
        });
        let mut line = String::new();
        write_line(&mut line, &way);
        let parsed = parse_line(1, line.as_bytes()).unwrap().unwrap();
        match parsed {
            OsmObject::Way(w) => {
                assert_eq!(w.refs.iter().map(|r| r.node_id).collect::<Vec<_>>(), vec![10, 12, 9]);
            }
            _ => panic!("expected a way"),
        }

        let relation = OsmObject::Relation(RelationData {
            meta: Meta::new(1),
            members: vec![
                Member { member_type: MemberType::Node, id: 1, role: b"outer".to_vec() },
                Member { member_type: MemberType::Way, id: 7, role: b"inner".to_vec() },
                Member { member_type: MemberType::Relation, id: 7, role: Vec::new() },
            ],
        });
        line.clear();
        write_line(&mut line, &relation);
        let parsed = parse_line(1, line.as_bytes()).unwrap().unwrap();
        match parsed {
            OsmObject::Relation(r) => {
                assert_eq!(r.members[0].role, b"outer".to_vec());
                assert_eq!(r.members[1].id, 7);
                assert_eq!(r.members[2].role, Vec::<u8>::new());
            }
            _ => panic!("expected a relation"),
        }
    }

    #[test]
    fn chunked_reassembly_matches_whole_file_parse_for_every_split_point() {
        let file = format!(
            "{}\n{}\n{}\n",
            "n1 v1 x1.0 y2.0",
            "n2 v1 Tk=v x3.0 y4.0",
            "w3 v1 N1,2"
        );
        let bytes = file.as_bytes();

        let mut whole = OplParser::new();
        let mut whole_objects = Vec::new();
        whole
            .feed(bytes, |part| whole_objects.extend(part.into_objects()))
            .unwrap();
        whole.finish(|part| whole_objects.extend(part.into_objects())).unwrap();

        for split in 0..=bytes.len() {
            let mut parser = OplParser::new();
            let mut objects = Vec::new();
            parser.feed(&bytes[..split], |part| objects.extend(part.into_objects())).unwrap();
            parser.feed(&bytes[split..], |part| objects.extend(part.into_objects())).unwrap();
            parser.finish(|part| objects.extend(part.into_objects())).unwrap();
            assert_eq!(objects.len(), whole_objects.len(), "split at {split}");
        }
    }

    #[test]
    fn opl_codec_decode_all_reads_every_line() {
        let bytes = b"n1 v1 x1.0 y2.0\nn2 v1 x3.0 y4.0\n".to_vec();
        let mut source = ReadSource::new(&bytes[..], 5);
        let buffer = OplCodec.decode_all(&mut source).unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn opl_codec_encode_all_writes_one_line_per_object() {
        let mut buffer = Buffer::new();
        buffer.push(
            OsmObject::Node(NodeData { meta: Meta::new(1), lon: 13.0, lat: 52.0 }),
            0,
        );
        let mut out = Vec::new();
        OplCodec.encode_all(&buffer, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with("n1 "));
    }

    #[test]
    fn stream_preserves_order_across_many_chunks() {
        let mut file = String::new();
        for i in 0..50 {
            file.push_str(&format!("n{i} v1 x0.0 y0.0\n"));
        }
        let consumer = stream(std::io::Cursor::new(file.into_bytes()), 7, 4);
        let mut ids = Vec::new();
        for part in consumer {
            for object in part.unwrap() {
                ids.push(object.id());
            }
        }
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }
}
