#![cfg_attr(any(nightly, docsrs), feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod bits;
pub mod crc;
pub mod frag;
pub mod packet;
pub mod recv;
pub mod send;
pub mod seq;
pub mod serialize;

use std::time::Duration;

use static_assertions::const_assert;

/// Maximum length, in bytes, of the payload of a single fragment.
pub const MAX_FRAGMENT_LEN: usize = 1024;

/// Maximum number of fragments a single message may be split into.
pub const MAX_FRAGMENTS: usize = 256;

/// Maximum length, in bytes, of a single logical message.
pub const MAX_PACKET_LEN: usize = MAX_FRAGMENT_LEN * MAX_FRAGMENTS;

/// Number of slots in the receive-side reassembly buffer.
///
/// Incoming packets are stored at slot `sequence % PACKET_BUFFER_LEN`.
pub const PACKET_BUFFER_LEN: usize = 256;

/// Maximum payload bytes per datagram that the transport will accept without
/// IP fragmentation.
///
/// A framed datagram - packet header plus whole payload or fragment - never
/// exceeds this.
pub const MTU: usize = 1200;

/// How far, in sequence numbers, an incoming packet may be from the receive
/// stream's high-water mark before it is discarded as hostile or stale.
pub const MAX_SEQ_DISTANCE: i32 = 1024;

/// Protocol identifier shared by both endpoints.
///
/// Never sent on the wire directly - it salts the CRC of every packet, so
/// traffic from other applications fails verification and is discarded.
pub const PROTOCOL_ID: u32 = 0xB17E_0001;

const_assert!(MAX_PACKET_LEN == 256 * 1024);
const_assert!(MAX_FRAGMENTS <= 256);
const_assert!(MAX_FRAGMENT_LEN + frag::FragmentHeader::ENCODE_LEN + packet::PacketHeader::ENCODE_LEN <= MTU);

/// User-configurable properties shared by a [`send::SendStream`] and
/// [`recv::RecvStream`] pair.
///
/// Both endpoints must agree on [`SessionConfig::protocol_id`], otherwise
/// every packet fails CRC verification.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// CRC salt shared by both endpoints. See [`PROTOCOL_ID`].
    pub protocol_id: u32,
    /// How many framed datagrams the send stream may hold between
    /// [`send::SendStream::drain`] calls.
    ///
    /// By default, this is 8.
    pub max_outgoing_datagrams: usize,
    /// How long a partially reassembled message may go without receiving a
    /// new fragment before its slot is evicted by
    /// [`recv::RecvStream::evict_expired`].
    ///
    /// By default, this is 2 seconds.
    pub slot_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_id: PROTOCOL_ID,
            max_outgoing_datagrams: 8,
            slot_ttl: Duration::from_secs(2),
        }
    }
}
