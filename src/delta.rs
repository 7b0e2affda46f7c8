//! Stateful running-difference codec over integer streams.
//!
//! Mirrors `libosmium`'s `osmium::DeltaEncode<T, Delta>` class: a tiny bit
//! of state (the last absolute value seen) plus an `update` call that both
//! advances the state and returns the value needed on the wire.

/// Encodes a sequence `v0, v1, v2, ...` as `v0, v1-v0, v2-v1, ...`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeltaEncoder {
    last: i64,
}

impl DeltaEncoder {
    /// Creates a new encoder with the running value initialized to zero.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Feeds the next absolute value, returning the delta to encode.
    pub fn update(&mut self, value: i64) -> i64 {
        let delta = value - self.last;
        self.last = value;
        delta
    }

    /// Resets the encoder to its initial state.
    pub fn clear(&mut self) {
        self.last = 0;
    }
}

/// The mirror of [`DeltaEncoder`]: reconstructs absolute values from a
/// stream of deltas.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeltaDecoder {
    last: i64,
}

impl DeltaDecoder {
    /// Creates a new decoder with the running value initialized to zero.
    pub fn new() -> Self {
        Self { last: 0 }
    }

    /// Feeds the next delta, returning the reconstructed absolute value.
    pub fn update(&mut self, delta: i64) -> i64 {
        self.last += delta;
        self.last
    }

    /// Resets the decoder to its initial state.
    pub fn clear(&mut self) {
        self.last = 0;
    }
}

/// An iterator adapter that decodes a stream of deltas into absolute
/// values, used for columns that aren't collected into a `Vec` first
/// (dense node lat/lon/id columns, way refs, relation memids).
#[derive(Clone, Debug)]
pub struct DeltaDecodeIter<I> {
    inner: I,
    decoder: DeltaDecoder,
}

impl<I: Iterator<Item = i64>> DeltaDecodeIter<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            decoder: DeltaDecoder::new(),
        }
    }
}

impl<I: Iterator<Item = i64>> Iterator for DeltaDecodeIter<I> {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        self.inner.next().map(|delta| self.decoder.update(delta))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Extension trait mirroring `delta_encoding::DeltaDecoderExt`'s
/// ergonomics, but backed by this crate's own [`DeltaDecoder`].
pub trait DeltaDecodeExt: Iterator<Item = i64> + Sized {
    fn delta_decode(self) -> DeltaDecodeIter<Self> {
        DeltaDecodeIter::new(self)
    }
}

impl<I: Iterator<Item = i64>> DeltaDecodeExt for I {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips() {
        let values = [1_i64, 5, 5, 2, -10, -10, 1000];
        let mut enc = DeltaEncoder::new();
        let deltas: Vec<i64> = values.iter().map(|&v| enc.update(v)).collect();

        let mut dec = DeltaDecoder::new();
        let restored: Vec<i64> = deltas.iter().map(|&d| dec.update(d)).collect();

        assert_eq!(&restored, &values);
    }

    #[test]
    fn delta_decode_iter_matches_manual_decoder() {
        let deltas = vec![10_i64, 2, -3];
        let restored: Vec<i64> = deltas.into_iter().delta_decode().collect();
        assert_eq!(restored, vec![10, 12, 9]);
    }

    #[test]
    fn clear_resets_state() {
        let mut enc = DeltaEncoder::new();
        enc.update(42);
        enc.clear();
        assert_eq!(enc.update(5), 5);
    }
}
