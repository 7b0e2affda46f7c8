//! Append-and-deduplicate table of byte strings, one per PBF block.

use std::collections::HashMap;

use crate::error::Result;

/// Builds a PBF `StringTable` while a [`crate::block::PrimitiveBlockBuilder`]
/// accumulates entities. Id 0 is the implicit empty-string sentinel and is
/// never stored; the first real entry added gets id 1.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, u32>,
}

impl StringTable {
    pub fn new() -> Self {
        Self {
            strings: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Inserts `s`, returning its stable id. Duplicates resolve to the
    /// first-seen id. The empty string always returns 0 without being
    /// stored.
    pub fn add(&mut self, s: &[u8]) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&id) = self.index.get(s) {
            return id;
        }
        self.strings.push(s.to_vec());
        let id = self.strings.len() as u32; // 1-based: index 0 is the sentinel
        self.index.insert(s.to_vec(), id);
        id
    }

    /// Clears the table for re-use across blocks.
    pub fn clear(&mut self) {
        self.strings.clear();
        self.index.clear();
    }

    /// Iterates the stored strings in insertion order (not including the
    /// id-0 sentinel).
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.strings.iter().map(|v| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Approximate serialized footprint, used for block-capacity checks.
    pub fn size(&self) -> usize {
        // Length-prefix overhead is small and constant-ish; an exact
        // varint-tag count isn't worth computing for a capacity heuristic.
        self.strings.iter().map(|s| s.len() + 2).sum()
    }
}

/// Looks up `index` in a decoded PBF stringtable (`s[0]` is the empty-string
/// sentinel), surfacing `StringtableIndexOutOfBounds` / `StringtableUtf8`
/// on failure.
pub(crate) fn str_at<'a>(table: &'a [Vec<u8>], index: usize) -> Result<&'a str> {
    match table.get(index) {
        Some(bytes) => std::str::from_utf8(bytes)
            .map_err(|err| crate::error::new_error(crate::error::ErrorKind::StringtableUtf8 { err, index })),
        None => Err(crate::error::new_error(
            crate::error::ErrorKind::StringtableIndexOutOfBounds { index },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_id_zero_and_not_stored() {
        let mut t = StringTable::new();
        assert_eq!(t.add(b""), 0);
        assert!(t.is_empty());
    }

    #[test]
    fn ids_are_dense_and_first_seen_wins() {
        let mut t = StringTable::new();
        assert_eq!(t.add(b"abc"), 1);
        assert_eq!(t.add(b"xyz"), 2);
        assert_eq!(t.add(b"abc"), 1);
        assert_eq!(t.add(b"123"), 3);
        assert_eq!(t.iter().collect::<Vec<_>>(), vec![&b"abc"[..], b"xyz", b"123"]);
    }

    #[test]
    fn clear_resets_ids() {
        let mut t = StringTable::new();
        t.add(b"abc");
        t.clear();
        assert_eq!(t.add(b"xyz"), 1);
    }
}
