//! See [`RecvStream`].

use std::time::Instant;

use tracing::{trace, warn};

use bitwire_io::DatagramIo;

use crate::{
    MTU, SessionConfig,
    bits::{BitReader, BitsReadError, bytes_to_words},
    crc,
    frag::{FragmentHeader, reassembly::{InsertError, PacketBuffer}},
    packet::{HeaderError, PacketHeader},
    seq::Seq,
};

/// Why an incoming datagram was discarded.
///
/// Wire-originated failures are not surfaced to the application - the
/// offending datagram is simply dropped, exactly as if the network had lost
/// it. This type exists for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The checksum did not match: corrupt traffic, or traffic from an
    /// application with a different protocol id.
    #[error("packet failed crc verification")]
    BadCrc,
    /// The packet header could not be decoded.
    #[error("failed to decode packet header")]
    Header(#[from] HeaderError),
    /// A field could not be read from the bitstream.
    #[error("failed to read packet body")]
    Read(#[from] BitsReadError),
    /// The datagram's length disagrees with the length promised by its
    /// header.
    #[error("payload of {actual} bytes does not match the {expected} promised")]
    LengthMismatch {
        /// Payload length promised by the header.
        expected: usize,
        /// Payload length actually present.
        actual: usize,
    },
    /// The reassembly buffer refused the payload.
    #[error(transparent)]
    Insert(#[from] InsertError),
}

/// Receiving half of a session: pulls datagrams off a transport, validates
/// and parses them, and reassembles fragmented messages.
///
/// Drive it by calling [`RecvStream::poll`] until it returns `false`, then
/// collect finished messages with [`RecvStream::take_completed`]. Every
/// malformed, stale, duplicated or alien datagram is silently discarded -
/// the wire is untrusted input, and dropping is always safe under
/// fire-and-forget delivery.
///
/// The stream exclusively owns its transport and reassembly state and is
/// single-threaded; run one stream per socket.
#[derive(Debug)]
pub struct RecvStream<T> {
    io: T,
    protocol_id: u32,
    buffer: PacketBuffer,
    /// Datagram receive buffer, reused across calls.
    datagram: Vec<u8>,
    /// Word scratch for parsing, reused across calls.
    words: Vec<u32>,
    /// Payload scratch, reused across calls.
    payload: Vec<u8>,
}

impl<T: DatagramIo> RecvStream<T> {
    /// Creates a stream receiving over the given transport.
    #[must_use]
    pub fn new(io: T, config: &SessionConfig) -> Self {
        Self {
            io,
            protocol_id: config.protocol_id,
            buffer: PacketBuffer::new(config.slot_ttl),
            datagram: vec![0; MTU],
            words: Vec::with_capacity(MTU.div_ceil(4)),
            payload: Vec::new(),
        }
    }

    /// Receives and processes at most one datagram, without blocking.
    ///
    /// Returns `true` if a datagram was received - in which case more may be
    /// waiting and the caller should poll again - and `false` if the
    /// transport was empty. Malformed datagrams still return `true`; they are
    /// discarded internally.
    pub fn poll(&mut self) -> bool {
        match self.io.recv(&mut self.datagram) {
            Ok(Some((len, from))) => {
                if let Err(err) = self.process(len) {
                    trace!(%from, "discarding datagram: {err}");
                }
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!("transport receive failed: {err}");
                false
            }
        }
    }

    /// Takes a reassembled message out of the buffer, if the message with
    /// this sequence is complete.
    ///
    /// Returns the message's packet type and payload, freeing its slot.
    #[must_use]
    pub fn take_completed(&mut self, seq: Seq) -> Option<(u32, Vec<u8>)> {
        self.buffer.take_completed(seq)
    }

    /// Whether the message with the given sequence has every fragment
    /// stored.
    #[must_use]
    pub fn is_complete(&self, seq: Seq) -> bool {
        self.buffer.is_complete(seq)
    }

    /// Newest sequence accepted so far, if any.
    #[must_use]
    pub const fn current(&self) -> Option<Seq> {
        self.buffer.current()
    }

    /// Evicts reassembly slots which have gone longer than the configured
    /// TTL without progress, abandoning their partial messages.
    ///
    /// Returns the number of slots evicted.
    pub fn evict_expired(&mut self) -> usize {
        self.buffer.evict_expired(Instant::now())
    }

    /// Evicts every reassembly slot too old to coexist with sequence `to`.
    ///
    /// See [`PacketBuffer::advance`].
    pub fn advance(&mut self, to: Seq) {
        self.buffer.advance(to);
    }

    /// Validates, parses and routes one datagram of `len` bytes.
    fn process(&mut self, len: usize) -> Result<(), RecvError> {
        let datagram = &self.datagram[..len];
        if !crc::verify(self.protocol_id, datagram) {
            return Err(RecvError::BadCrc);
        }

        bytes_to_words(datagram, &mut self.words);
        let mut r = BitReader::new(&self.words);
        let header = PacketHeader::decode(&mut r)?;

        let body_len = len.checked_sub(PacketHeader::ENCODE_LEN);
        if body_len != Some(header.data_len as usize) {
            return Err(RecvError::LengthMismatch {
                expected: header.data_len as usize,
                actual: body_len.unwrap_or(0),
            });
        }

        let now = Instant::now();
        if header.is_fragment {
            let frag_header = FragmentHeader::decode(&mut r)?;
            // range-check before the length is used to size a read
            frag_header.validate().map_err(InsertError::Invalid)?;

            let expected = FragmentHeader::ENCODE_LEN + frag_header.len as usize;
            if header.data_len as usize != expected {
                return Err(RecvError::LengthMismatch {
                    expected,
                    actual: header.data_len as usize,
                });
            }

            self.payload.resize(frag_header.len as usize, 0);
            r.read_bytes(&mut self.payload)?;
            let complete = self.buffer.insert(
                header.seq,
                header.packet_type,
                &frag_header,
                &self.payload,
                now,
            )?;
            if complete {
                trace!(seq = ?header.seq, "message reassembled");
            }
        } else {
            self.payload.resize(header.data_len as usize, 0);
            r.read_bytes(&mut self.payload)?;
            self.buffer
                .insert_whole(header.seq, header.packet_type, &self.payload, now)?;
        }
        Ok(())
    }
}
