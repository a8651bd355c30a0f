//! Gorilla bit codec for compressed chunks.
//!
//! Samples are written to a single interleaved bit stream, timestamp first
//! and value second for every sample.
//!
//! ## Timestamps (delta-of-delta)
//!
//! - First timestamp: 64 bits raw
//! - `0`: `'0'` (1 bit)
//! - `[-63, 64]`: `'10'` + 7 bits
//! - `[-255, 256]`: `'110'` + 9 bits
//! - `[-2047, 2048]`: `'1110'` + 12 bits
//! - else: `'1111'` + 64 bits
//!
//! ## Values (XOR)
//!
//! - First value: 64 bits raw (IEEE 754)
//! - XOR = 0: `'0'`
//! - Inside the previous window: `'10'` + meaningful bits
//! - New window: `'11'` + 5 bits leading + 6 bits length + meaningful bits
//!
//! A meaningful length of 64 is written as 0; it cannot otherwise occur
//! because a non-zero XOR has at least one meaningful bit.

use bitvec::prelude::*;

use crate::sample::Sample;

/// Bit storage used by compressed chunks.
pub(crate) type Bits = BitVec<u8, Msb0>;

const MAX_LEADING: u32 = 31;

/// Running encoder state.
///
/// The state is `Copy` so a caller can snapshot it before an append and roll
/// back when the encoded sample overflows its bit budget.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Encoder {
    prev: Option<Sample>,
    prev_delta: i64,
    window: Option<Window>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    leading: u32,
    trailing: u32,
}

impl Window {
    fn meaningful(self) -> u32 {
        64 - self.leading - self.trailing
    }
}

impl Encoder {
    /// Appends `sample` to `out`.
    ///
    /// The caller guarantees timestamps are strictly increasing.
    pub(crate) fn encode(&mut self, sample: Sample, out: &mut Bits) {
        let Some(prev) = self.prev else {
            push_bits(out, sample.timestamp, 64);
            push_bits(out, sample.value.to_bits(), 64);
            self.prev = Some(sample);
            self.prev_delta = 0;
            self.window = None;
            return;
        };

        let delta = sample.timestamp.wrapping_sub(prev.timestamp) as i64;
        self.encode_dod(delta.wrapping_sub(self.prev_delta), out);
        self.prev_delta = delta;

        self.encode_xor(prev.value.to_bits() ^ sample.value.to_bits(), out);
        self.prev = Some(sample);
    }

    fn encode_dod(&self, dod: i64, out: &mut Bits) {
        if dod == 0 {
            out.push(false);
        } else if (-63..=64).contains(&dod) {
            push_bits(out, 0b10, 2);
            push_bits(out, (dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            push_bits(out, 0b110, 3);
            push_bits(out, (dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            push_bits(out, 0b1110, 4);
            push_bits(out, (dod + 2047) as u64, 12);
        } else {
            push_bits(out, 0b1111, 4);
            push_bits(out, dod as u64, 64);
        }
    }

    fn encode_xor(&mut self, xor: u64, out: &mut Bits) {
        if xor == 0 {
            out.push(false);
            return;
        }

        let leading = xor.leading_zeros().min(MAX_LEADING);
        let trailing = xor.trailing_zeros();

        if let Some(window) = self.window
            && leading >= window.leading
            && trailing >= window.trailing
        {
            push_bits(out, 0b10, 2);
            push_bits(out, xor >> window.trailing, window.meaningful());
            return;
        }

        let window = Window { leading, trailing };
        let meaningful = window.meaningful();
        push_bits(out, 0b11, 2);
        push_bits(out, u64::from(leading), 5);
        push_bits(out, u64::from(meaningful % 64), 6);
        push_bits(out, xor >> trailing, meaningful);
        self.window = Some(window);
    }
}

/// Sequential decoder over an encoded bit stream.
#[derive(Debug)]
pub(crate) struct Decoder<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
    remaining: usize,
    prev: Option<Sample>,
    prev_delta: i64,
    window: Option<Window>,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder that yields `count` samples from `bits`.
    pub(crate) fn new(bits: &'a BitSlice<u8, Msb0>, count: usize) -> Self {
        Self {
            bits,
            pos: 0,
            remaining: count,
            prev: None,
            prev_delta: 0,
            window: None,
        }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let bit = *self.bits.get(self.pos)?;
        self.pos += 1;
        Some(bit)
    }

    fn read_bits(&mut self, n: u32) -> Option<u64> {
        let end = self.pos + n as usize;
        let slice = self.bits.get(self.pos..end)?;
        let value = slice.iter().fold(0u64, |acc, bit| (acc << 1) | u64::from(*bit));
        self.pos = end;
        Some(value)
    }

    fn decode_dod(&mut self) -> Option<i64> {
        if !self.read_bit()? {
            return Some(0);
        }
        if !self.read_bit()? {
            return Some(self.read_bits(7)? as i64 - 63);
        }
        if !self.read_bit()? {
            return Some(self.read_bits(9)? as i64 - 255);
        }
        if !self.read_bit()? {
            return Some(self.read_bits(12)? as i64 - 2047);
        }
        Some(self.read_bits(64)? as i64)
    }

    fn decode_xor(&mut self) -> Option<u64> {
        if !self.read_bit()? {
            return Some(0);
        }
        if !self.read_bit()? {
            let window = self.window?;
            return Some(self.read_bits(window.meaningful())? << window.trailing);
        }

        let leading = self.read_bits(5)? as u32;
        let meaningful = match self.read_bits(6)? as u32 {
            0 => 64,
            n => n,
        };
        let trailing = 64u32.checked_sub(leading + meaningful)?;
        self.window = Some(Window { leading, trailing });
        Some(self.read_bits(meaningful)? << trailing)
    }

    fn decode_next(&mut self) -> Option<Sample> {
        let Some(prev) = self.prev else {
            let timestamp = self.read_bits(64)?;
            let value = f64::from_bits(self.read_bits(64)?);
            return Some(Sample::new(timestamp, value));
        };

        let delta = self.prev_delta.wrapping_add(self.decode_dod()?);
        let timestamp = prev.timestamp.wrapping_add(delta as u64);
        let value = f64::from_bits(prev.value.to_bits() ^ self.decode_xor()?);
        self.prev_delta = delta;
        Some(Sample::new(timestamp, value))
    }
}

impl Iterator for Decoder<'_> {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let sample = self.decode_next()?;
        self.prev = Some(sample);
        self.remaining -= 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

/// Encodes a sorted run of samples into a fresh bit stream.
pub(crate) fn encode_all(samples: &[Sample]) -> (Bits, Encoder) {
    let mut bits = Bits::new();
    let mut encoder = Encoder::default();
    for &sample in samples {
        encoder.encode(sample, &mut bits);
    }
    (bits, encoder)
}

fn push_bits(out: &mut Bits, value: u64, n: u32) {
    for i in (0..n).rev() {
        out.push((value >> i) & 1 == 1);
    }
}
