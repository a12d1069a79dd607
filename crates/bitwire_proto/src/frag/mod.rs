//! Splitting large messages into fragments and reassembling them on the
//! receiver.
//!
//! A message longer than a datagram can carry is [`split`] into fragments of
//! at most [`MAX_FRAGMENT_LEN`] bytes. Each fragment travels in its own
//! framed packet, tagged with the message's sequence number, and the receiver
//! rebuilds the message in a fixed-size [`PacketBuffer`] keyed by that
//! sequence - out-of-order and duplicated delivery are handled there.
//!
//! See <https://gafferongames.com/post/packet_fragmentation_and_reassembly/>.
//!
//! [`PacketBuffer`]: reassembly::PacketBuffer

pub mod reassembly;

mod split;

pub use split::*;

use arbitrary::Arbitrary;
use bytes::Bytes;

use crate::{
    MAX_FRAGMENT_LEN, MAX_FRAGMENTS,
    bits::{BitReader, BitWriter, BitsReadError, BitsWriteError},
};

/// Metadata carried at the front of every fragment packet's payload.
///
/// # Encoded layout
///
/// ```text
/// fragment_len  : 32 bits   payload bytes in this fragment, 1..=1024
/// index         :  8 bits   position of this fragment in the message
/// num_frags - 1 :  8 bits   fragment count, stored minus one so that a
///                           256-fragment message is representable
/// padding       :  8 bits   to the next byte boundary
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct FragmentHeader {
    /// Number of payload bytes in this fragment.
    pub len: u32,
    /// Index of this fragment in the total message.
    pub index: u8,
    /// How many fragments the message is split up into, `1..=256`.
    pub num_frags: u16,
}

/// Error that occurs when validating a [`FragmentHeader`] received from the
/// wire.
///
/// Every field is checked before it is used as an index, size or count;
/// violations mean the packet is corrupt or hostile and is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidFragment {
    /// The fragment length was zero or above [`MAX_FRAGMENT_LEN`].
    #[error("fragment of {len} bytes is outside 1..={MAX_FRAGMENT_LEN}")]
    BadLen {
        /// Length claimed by the header.
        len: u32,
    },
    /// The fragment count was zero or above [`MAX_FRAGMENTS`].
    #[error("fragment count {num_frags} is outside 1..={MAX_FRAGMENTS}")]
    BadCount {
        /// Count claimed by the header.
        num_frags: u16,
    },
    /// The fragment index was not below the fragment count.
    #[error("fragment index {index} is out of bounds for {num_frags} fragments")]
    BadIndex {
        /// Index claimed by the header.
        index: u8,
        /// Count claimed by the header.
        num_frags: u16,
    },
    /// A fragment other than the last was not exactly [`MAX_FRAGMENT_LEN`]
    /// bytes.
    ///
    /// The splitter only ever produces a short fragment in the last position,
    /// so anything else was mangled in transit.
    #[error("non-last fragment {index} is {len} bytes, expected {MAX_FRAGMENT_LEN}")]
    ShortNonLast {
        /// Index claimed by the header.
        index: u8,
        /// Length claimed by the header.
        len: u32,
    },
}

impl FragmentHeader {
    /// Number of bits of header content, excluding alignment padding.
    pub const ENCODE_BITS: usize = 32 + 8 + 8;

    /// Encoded size of the header on the wire, in bytes.
    pub const ENCODE_LEN: usize = Self::ENCODE_BITS.div_ceil(8);

    /// Writes this header, leaving the stream byte-aligned for the fragment
    /// bytes.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    ///
    /// # Panics
    ///
    /// Panics if `num_frags` is outside `1..=256` - headers produced by
    /// [`split`] always are in range.
    pub fn encode(&self, w: &mut BitWriter) -> Result<(), BitsWriteError> {
        assert!(
            (1..=MAX_FRAGMENTS as u16).contains(&self.num_frags),
            "fragment count {} is outside 1..={MAX_FRAGMENTS}",
            self.num_frags
        );
        w.write_bits(self.len, 32)?;
        w.write_bits(u32::from(self.index), 8)?;
        w.write_bits(u32::from(self.num_frags - 1), 8)?;
        w.align()
    }

    /// Reads a header written by [`FragmentHeader::encode`], leaving the
    /// stream byte-aligned at the start of the fragment bytes.
    ///
    /// The decoded header has not been range-checked yet; see
    /// [`FragmentHeader::validate`].
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted.
    pub fn decode(r: &mut BitReader) -> Result<Self, BitsReadError> {
        let len = r.read_bits(32)?;
        #[allow(clippy::cast_possible_truncation)] // 8-bit reads
        let (index, num_minus_one) = (r.read_bits(8)? as u8, r.read_bits(8)? as u16);
        r.align()?;
        Ok(Self {
            len,
            index,
            num_frags: num_minus_one + 1,
        })
    }

    /// Range-checks every field of a header received from the wire.
    ///
    /// # Errors
    ///
    /// Errors if any field is out of bounds or the fields are mutually
    /// inconsistent.
    pub fn validate(&self) -> Result<(), InvalidFragment> {
        if self.len == 0 || self.len as usize > MAX_FRAGMENT_LEN {
            return Err(InvalidFragment::BadLen { len: self.len });
        }
        if self.num_frags == 0 || usize::from(self.num_frags) > MAX_FRAGMENTS {
            return Err(InvalidFragment::BadCount {
                num_frags: self.num_frags,
            });
        }
        if u16::from(self.index) >= self.num_frags {
            return Err(InvalidFragment::BadIndex {
                index: self.index,
                num_frags: self.num_frags,
            });
        }
        if u16::from(self.index) < self.num_frags - 1 && self.len as usize != MAX_FRAGMENT_LEN {
            return Err(InvalidFragment::ShortNonLast {
                index: self.index,
                len: self.len,
            });
        }
        Ok(())
    }
}

/// Fragment of a message as it is encoded inside a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Metadata of this fragment, such as its position in the message.
    pub header: FragmentHeader,
    /// Buffer storing the message payload of this fragment.
    pub payload: Bytes,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::bits::BitReader;

    use super::*;

    #[test]
    fn encode_decode_header() {
        let v = FragmentHeader {
            len: 1024,
            index: 34,
            num_frags: 256,
        };
        let mut words = [0u32; 2];
        let mut w = BitWriter::new(&mut words);
        v.encode(&mut w).unwrap();
        assert_eq!(FragmentHeader::ENCODE_LEN * 8, w.bits_written());
        w.flush();

        let mut r = BitReader::new(&words);
        assert_eq!(v, FragmentHeader::decode(&mut r).unwrap());
    }

    #[test]
    fn validation() {
        let ok = FragmentHeader {
            len: 1024,
            index: 0,
            num_frags: 2,
        };
        assert_matches!(ok.validate(), Ok(()));

        let last_may_be_short = FragmentHeader {
            len: 1,
            index: 1,
            num_frags: 2,
        };
        assert_matches!(last_may_be_short.validate(), Ok(()));

        assert_matches!(
            FragmentHeader { len: 0, ..ok }.validate(),
            Err(InvalidFragment::BadLen { len: 0 })
        );
        assert_matches!(
            FragmentHeader { len: 1025, ..ok }.validate(),
            Err(InvalidFragment::BadLen { len: 1025 })
        );
        assert_matches!(
            FragmentHeader {
                num_frags: 0,
                index: 0,
                len: 1024
            }
            .validate(),
            Err(InvalidFragment::BadCount { num_frags: 0 })
        );
        assert_matches!(
            FragmentHeader {
                index: 2,
                num_frags: 2,
                len: 1024
            }
            .validate(),
            Err(InvalidFragment::BadIndex { .. })
        );
        assert_matches!(
            FragmentHeader {
                len: 512,
                index: 0,
                num_frags: 2
            }
            .validate(),
            Err(InvalidFragment::ShortNonLast { .. })
        );
    }
}
