//! Framed packet header - the first bytes of every datagram on the wire.
//!
//! # Encoded layout
//!
//! ```text
//! crc32       : 32 bits   checksum, see crate::crc
//! qos         :  1 bit    delivery class
//! packet_type : 32 bits   opaque application tag
//! data_length : 32 bits   payload bytes following the header
//! sequence    : 16 bits   wrap-around message counter
//! is_fragment :  1 bit
//! padding     :  6 bits   to the next byte boundary
//! ```
//!
//! followed by `data_length` payload bytes: the whole message, or - when
//! `is_fragment` is set - a fragment header plus fragment bytes (see
//! [`frag`]).
//!
//! [`frag`]: crate::frag

use arbitrary::Arbitrary;

use crate::{
    MTU,
    bits::{BitReader, BitWriter, BitsReadError, BitsWriteError},
    seq::Seq,
    serialize::bits_required,
};

/// Delivery class of a packet.
///
/// The protocol core treats this as a wire-visible tag: every packet is
/// delivered fire-and-forget, and it is up to the application to layer
/// acknowledgement and retry on top for [`Qos::Reliable`] traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Arbitrary)]
pub enum Qos {
    /// Fire-and-forget: the message may be dropped, duplicated or reordered
    /// in transit.
    #[default]
    BestEffort = 0,
    /// The sender intends this message to be retried until acknowledged.
    Reliable = 1,
}

impl Qos {
    /// Number of delivery classes.
    pub const COUNT: usize = 2;

    /// Number of bits a delivery class occupies on the wire.
    pub const ENCODE_BITS: usize = bits_required(0, Self::COUNT as i64 - 1);

    /// Converts a wire value back into a delivery class.
    #[must_use]
    pub const fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::BestEffort),
            1 => Some(Self::Reliable),
            _ => None,
        }
    }
}

/// Error that occurs when decoding a [`PacketHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    /// Failed to read a header field from the bitstream.
    #[error("failed to read header field")]
    Read(#[from] BitsReadError),
    /// The QoS field held a value outside the known delivery classes.
    #[error("invalid qos value {value}")]
    BadQos {
        /// Value read from the wire.
        value: u32,
    },
    /// The length field promised more payload than a datagram may carry.
    ///
    /// Accepting such a header would let a hostile peer drive oversized
    /// reads, so the packet is discarded before its payload is touched.
    #[error("payload of {len} bytes exceeds the maximum of {max}")]
    PayloadTooLong {
        /// Payload length promised by the header.
        len: usize,
        /// Maximum payload length a datagram may carry.
        max: usize,
    },
}

/// Header framing every datagram on the wire.
///
/// See the [module-level documentation](self) for the encoded layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct PacketHeader {
    /// Checksum of the framed packet. See [`crate::crc`].
    pub crc: u32,
    /// Delivery class.
    pub qos: Qos,
    /// Opaque application tag dispatched on by the receiver; never
    /// interpreted by the protocol core.
    pub packet_type: u32,
    /// Length in bytes of the payload following the header.
    pub data_len: u32,
    /// Sequence number of the logical message this packet belongs to.
    ///
    /// All fragments of one message share one sequence number.
    pub seq: Seq,
    /// Whether the payload is a fragment (header plus bytes) rather than a
    /// whole message.
    pub is_fragment: bool,
}

impl PacketHeader {
    /// Number of bits of header content, excluding alignment padding.
    pub const ENCODE_BITS: usize =
        32 + Qos::ENCODE_BITS + 32 + 32 + Seq::ENCODE_BITS + 1;

    /// Encoded size of the header on the wire, in bytes.
    pub const ENCODE_LEN: usize = Self::ENCODE_BITS.div_ceil(8);

    /// Maximum legal value of [`PacketHeader::data_len`]: what is left of the
    /// MTU once the header is paid for.
    pub const MAX_DATA_LEN: usize = MTU - Self::ENCODE_LEN;

    /// Writes this header, leaving the stream byte-aligned for the payload.
    ///
    /// # Errors
    ///
    /// Errors if the underlying buffer is out of capacity.
    pub fn encode(&self, w: &mut BitWriter) -> Result<(), BitsWriteError> {
        w.write_bits(self.crc, 32)?;
        w.write_bits(self.qos as u32, Qos::ENCODE_BITS)?;
        w.write_bits(self.packet_type, 32)?;
        w.write_bits(self.data_len, 32)?;
        self.seq.encode(w)?;
        w.write_bool(self.is_fragment)?;
        w.align()
    }

    /// Reads a header written by [`PacketHeader::encode`], leaving the stream
    /// byte-aligned at the start of the payload.
    ///
    /// # Errors
    ///
    /// Errors if the stream is exhausted or any field is out of bounds.
    pub fn decode(r: &mut BitReader) -> Result<Self, HeaderError> {
        let crc = r.read_bits(32)?;
        let qos_index = r.read_bits(Qos::ENCODE_BITS)?;
        let qos = Qos::from_index(qos_index).ok_or(HeaderError::BadQos { value: qos_index })?;
        let packet_type = r.read_bits(32)?;
        let data_len = r.read_bits(32)?;
        let seq = Seq::decode(r)?;
        let is_fragment = r.read_bool()?;
        r.align()?;

        if data_len as usize > Self::MAX_DATA_LEN {
            return Err(HeaderError::PayloadTooLong {
                len: data_len as usize,
                max: Self::MAX_DATA_LEN,
            });
        }

        Ok(Self {
            crc,
            qos,
            packet_type,
            data_len,
            seq,
            is_fragment,
        })
    }
}
