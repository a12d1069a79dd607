//! Sub-byte bitstream codec over 32-bit word buffers.
//!
//! [`BitWriter`] packs arbitrary-width bit fields into a caller-provided
//! `&mut [u32]`; [`BitReader`] unpacks them from a `&[u32]`. Both work
//! LSB-first: the first bit written lands in the least significant bit of the
//! first word. Neither ever allocates or grows its buffer.
//!
//! # Wire representation
//!
//! Inside the codec, words are plain host-order `u32`s. A buffer only becomes
//! wire bytes through [`words_to_bytes`], and wire bytes only become a buffer
//! through [`bytes_to_words`] - both apply **little-endian** word order, so
//! streams produced on one host decode identically on any other.
//!
//! A datagram's byte length need not be a multiple of 4: [`bytes_to_words`]
//! zero-pads the final word, and readers ignore trailing zero padding.

mod reader;
mod writer;

pub use {reader::*, writer::*};

/// Number of bits in one buffer word.
pub const WORD_BITS: usize = 32;

/// Error that occurs when writing to a [`BitWriter`].
///
/// After any error the writer must be treated as poisoned: its counters may
/// no longer describe committed data. Reset it or throw it away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BitsWriteError {
    /// Attempted to write more than [`WORD_BITS`] bits in a single operation.
    #[error("cannot write {bits} bits in one operation")]
    TooManyBits {
        /// Number of bits requested.
        bits: usize,
    },
    /// Writing this many more bits would exceed the buffer's capacity.
    #[error("buffer overflow - writing {bits} more bits with {left} left")]
    Overflow {
        /// Number of bits requested.
        bits: usize,
        /// Number of bits of capacity left.
        left: usize,
    },
}

/// Error that occurs when reading from a [`BitReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BitsReadError {
    /// Attempted to read more than [`WORD_BITS`] bits in a single operation.
    #[error("cannot read {bits} bits in one operation")]
    TooManyBits {
        /// Number of bits requested.
        bits: usize,
    },
    /// Reading this many more bits would pass the end of the buffer.
    #[error("buffer underrun - reading {bits} more bits with {left} left")]
    Underrun {
        /// Number of bits requested.
        bits: usize,
        /// Number of bits left to read.
        left: usize,
    },
    /// Alignment padding contained a non-zero bit.
    ///
    /// This indicates that the two sides disagree on the layout of the
    /// stream, or that the stream was corrupted in transit.
    #[error("alignment padding contains non-zero bits")]
    Misaligned,
    /// A bounded integer decoded to a value outside its agreed range.
    #[error("value {value} is outside the range [{min}, {max}]")]
    OutOfRange {
        /// Value decoded from the stream.
        value: i64,
        /// Minimum legal value.
        min: i64,
        /// Maximum legal value.
        max: i64,
    },
    /// String bytes were not valid UTF-8.
    #[error("string bytes are not valid UTF-8")]
    InvalidUtf8,
}

/// Reinterprets wire bytes as a little-endian word buffer, zero-padding the
/// final word.
///
/// The resulting buffer is suitable for constructing a [`BitReader`] over.
pub fn bytes_to_words(bytes: &[u8], words: &mut Vec<u32>) {
    words.clear();
    words.reserve(bytes.len().div_ceil(4));
    let mut chunks = bytes.chunks_exact(4);
    for chunk in &mut chunks {
        let chunk: [u8; 4] = chunk.try_into().expect("chunk is exactly 4 bytes");
        words.push(u32::from_le_bytes(chunk));
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut last = [0u8; 4];
        last[..rem.len()].copy_from_slice(rem);
        words.push(u32::from_le_bytes(last));
    }
}

/// Serializes the first `len` bytes of a word buffer as little-endian wire
/// bytes.
///
/// `len` is a byte count, typically [`BitWriter::bytes_written`] after a
/// [`BitWriter::flush`].
///
/// # Panics
///
/// Panics if `len` exceeds the byte length of `words`.
pub fn words_to_bytes(words: &[u32], len: usize, bytes: &mut Vec<u8>) {
    assert!(len <= words.len() * 4, "len exceeds the buffer");
    bytes.clear();
    bytes.reserve(len);
    for word in &words[..len.div_ceil(4)] {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes.truncate(len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_words_round_trip() {
        for len in 0..=9usize {
            let bytes = (0..len).map(|i| i as u8 + 1).collect::<Vec<_>>();
            let mut words = Vec::new();
            bytes_to_words(&bytes, &mut words);
            assert_eq!(len.div_ceil(4), words.len());

            let mut back = Vec::new();
            words_to_bytes(&words, len, &mut back);
            assert_eq!(bytes, back);
        }
    }

    #[test]
    fn words_are_little_endian() {
        let mut words = Vec::new();
        bytes_to_words(&[0x78, 0x56, 0x34, 0x12], &mut words);
        assert_eq!(vec![0x1234_5678], words);

        let mut bytes = Vec::new();
        words_to_bytes(&[0x1234_5678], 4, &mut bytes);
        assert_eq!(vec![0x78, 0x56, 0x34, 0x12], bytes);
    }
}
