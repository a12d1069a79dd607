//! See [`SendStream`].

use std::{collections::VecDeque, net::SocketAddr};

use bytes::Bytes;
use tracing::{trace, warn};

use bitwire_io::DatagramIo;

use crate::{
    MAX_PACKET_LEN, MTU, SessionConfig,
    bits::{BitWriter, words_to_bytes},
    crc,
    frag::{self, Fragment, FragmentHeader},
    packet::{PacketHeader, Qos},
    seq::Seq,
};

/// Error that occurs when using [`SendStream::enqueue`].
///
/// Enqueueing is all-or-nothing: on error, no part of the message is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EnqueueError {
    /// The message is longer than [`MAX_PACKET_LEN`] and can never be sent.
    #[error("message too big - {len} / {max} bytes")]
    PacketTooLarge {
        /// Length of the message in bytes.
        len: usize,
        /// Maximum length of the message in bytes.
        max: usize,
    },
    /// The send queue cannot hold every datagram of this message.
    ///
    /// Retry after [`SendStream::drain`].
    #[error("send queue is full - {queued} queued, {needed} needed, {cap} capacity")]
    QueueFull {
        /// Datagrams currently queued.
        queued: usize,
        /// Datagrams this message requires.
        needed: usize,
        /// Queue capacity.
        cap: usize,
    },
}

/// Sending half of a session: turns messages into framed datagrams and
/// flushes them to a transport.
///
/// Messages are framed - and fragmented, when they exceed what one datagram
/// carries - at [`SendStream::enqueue`] time into a bounded FIFO, then handed
/// to the transport by [`SendStream::drain`]. Each logical message gets one
/// sequence number, shared by all its fragments.
///
/// The stream exclusively owns its transport and is single-threaded; run one
/// stream per socket.
#[derive(Debug)]
pub struct SendStream<T> {
    io: T,
    peer: SocketAddr,
    protocol_id: u32,
    max_queued: usize,
    queue: VecDeque<Vec<u8>>,
    next_seq: Seq,
    /// Word scratch for framing, reused across calls.
    words: Vec<u32>,
    /// Byte scratch for the serialized datagram, reused across calls.
    bytes: Vec<u8>,
}

impl<T: DatagramIo> SendStream<T> {
    /// Creates a stream sending to `peer` over the given transport.
    #[must_use]
    pub fn new(io: T, peer: SocketAddr, config: &SessionConfig) -> Self {
        Self {
            io,
            peer,
            protocol_id: config.protocol_id,
            max_queued: config.max_outgoing_datagrams,
            queue: VecDeque::with_capacity(config.max_outgoing_datagrams),
            next_seq: Seq(0),
            words: vec![0; MTU.div_ceil(4)],
            bytes: Vec::with_capacity(MTU),
        }
    }

    /// Address this stream sends to.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Number of framed datagrams waiting for [`SendStream::drain`].
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Frames a message and appends its datagram(s) to the send queue,
    /// without blocking.
    ///
    /// A message longer than a single datagram's payload budget is split
    /// into fragments, each framed as its own datagram. Returns the sequence
    /// number assigned to the message.
    ///
    /// # Errors
    ///
    /// Errors if the message can never fit ([`EnqueueError::PacketTooLarge`])
    /// or if the queue lacks room for every datagram of the message
    /// ([`EnqueueError::QueueFull`]). On error nothing is queued and no
    /// sequence number is consumed.
    pub fn enqueue(
        &mut self,
        qos: Qos,
        packet_type: u32,
        msg: Bytes,
    ) -> Result<Seq, EnqueueError> {
        if msg.len() > MAX_PACKET_LEN {
            return Err(EnqueueError::PacketTooLarge {
                len: msg.len(),
                max: MAX_PACKET_LEN,
            });
        }

        let seq = self.next_seq;
        if msg.len() <= PacketHeader::MAX_DATA_LEN {
            self.check_room(1)?;
            let datagram = self.frame(qos, packet_type, seq, None, &msg);
            self.queue.push_back(datagram);
        } else {
            let frags = frag::split(msg).expect("message length was validated above");
            self.check_room(frags.len())?;
            for Fragment { header, payload } in frags {
                let datagram = self.frame(qos, packet_type, seq, Some(&header), &payload);
                self.queue.push_back(datagram);
            }
        }

        // one sequence number per logical message, consumed only on success
        self.next_seq = seq + Seq(1);
        Ok(seq)
    }

    /// Hands every queued datagram to the transport.
    ///
    /// Datagrams the transport refuses are dropped - delivery is best-effort,
    /// and the message's fate is the same as if the network had eaten it.
    /// Returns the number of datagrams accepted by the transport.
    pub fn drain(&mut self) -> usize {
        let mut flushed = 0usize;
        while let Some(datagram) = self.queue.pop_front() {
            match self.io.send(&datagram, self.peer) {
                Ok(_) => flushed += 1,
                Err(err) => {
                    warn!(peer = %self.peer, "dropping datagram: {err}");
                }
            }
        }
        if flushed > 0 {
            trace!(flushed, "drained send queue");
        }
        flushed
    }

    fn check_room(&self, needed: usize) -> Result<(), EnqueueError> {
        if self.queue.len() + needed > self.max_queued {
            return Err(EnqueueError::QueueFull {
                queued: self.queue.len(),
                needed,
                cap: self.max_queued,
            });
        }
        Ok(())
    }

    /// Serializes one framed datagram: packet header, optional fragment
    /// header, payload bytes, sealed CRC.
    fn frame(
        &mut self,
        qos: Qos,
        packet_type: u32,
        seq: Seq,
        frag_header: Option<&FragmentHeader>,
        payload: &[u8],
    ) -> Vec<u8> {
        let data_len = payload.len()
            + frag_header.map_or(0, |_| FragmentHeader::ENCODE_LEN);
        #[allow(clippy::cast_possible_truncation)] // bounded by MAX_DATA_LEN
        let header = PacketHeader {
            crc: 0,
            qos,
            packet_type,
            data_len: data_len as u32,
            seq,
            is_fragment: frag_header.is_some(),
        };

        self.words.fill(0);
        let mut w = BitWriter::new(&mut self.words);
        header
            .encode(&mut w)
            .expect("scratch buffer is sized to the MTU");
        if let Some(frag_header) = frag_header {
            frag_header
                .encode(&mut w)
                .expect("scratch buffer is sized to the MTU");
        }
        w.write_bytes(payload)
            .expect("scratch buffer is sized to the MTU");
        w.flush();
        let len = w.bytes_written();

        words_to_bytes(&self.words, len, &mut self.bytes);
        crc::seal(self.protocol_id, &mut self.bytes);
        self.bytes.clone()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use bitwire_io::channel::ChannelIo;

    use super::*;

    fn stream() -> (SendStream<ChannelIo>, ChannelIo) {
        let (a, b) = ChannelIo::pair();
        let peer = b.local_addr();
        (SendStream::new(a, peer, &SessionConfig::default()), b)
    }

    fn msg(len: usize) -> Bytes {
        #[allow(clippy::cast_possible_truncation)]
        let bytes = (0..len).map(|i| i as u8).collect::<Vec<_>>();
        bytes.into()
    }

    #[test]
    fn small_message_is_one_datagram() {
        let (mut s, _io) = stream();
        let seq = s.enqueue(Qos::BestEffort, 3, msg(512)).unwrap();
        assert_eq!(Seq(0), seq);
        assert_eq!(1, s.queued());
    }

    #[test]
    fn large_message_is_one_datagram_per_fragment() {
        let (mut s, _io) = stream();
        s.enqueue(Qos::BestEffort, 3, msg(8192)).unwrap();
        assert_eq!(8, s.queued());
    }

    #[test]
    fn datagrams_fit_the_mtu() {
        let (mut s, mut io) = stream();
        s.enqueue(Qos::BestEffort, 3, msg(PacketHeader::MAX_DATA_LEN))
            .unwrap();
        s.enqueue(Qos::BestEffort, 3, msg(5000)).unwrap();
        s.drain();

        let mut buf = [0u8; MTU + 64];
        while let Some((len, _)) = io.recv(&mut buf).unwrap() {
            assert!(len <= MTU, "datagram of {len} bytes exceeds the MTU");
        }
    }

    #[test]
    fn sequence_increments_per_message_not_per_fragment() {
        let (mut s, _io) = stream();
        assert_eq!(Seq(0), s.enqueue(Qos::BestEffort, 3, msg(5000)).unwrap());
        assert_eq!(Seq(1), s.enqueue(Qos::BestEffort, 3, msg(10)).unwrap());
    }

    #[test]
    fn oversized_message_is_refused() {
        let (mut s, _io) = stream();
        assert_matches!(
            s.enqueue(Qos::BestEffort, 3, msg(MAX_PACKET_LEN + 1)),
            Err(EnqueueError::PacketTooLarge { .. })
        );
        assert_eq!(0, s.queued());
    }

    #[test]
    fn full_queue_refuses_whole_messages() {
        let (mut s, _io) = stream();
        for _ in 0..8 {
            s.enqueue(Qos::BestEffort, 3, msg(10)).unwrap();
        }
        let refused = s.enqueue(Qos::BestEffort, 3, msg(10));
        assert_matches!(refused, Err(EnqueueError::QueueFull { queued: 8, .. }));

        // no partial message, and no sequence number burned
        s.drain();
        assert_eq!(Seq(8), s.enqueue(Qos::BestEffort, 3, msg(10)).unwrap());
    }

    #[test]
    fn queue_admission_is_all_or_nothing() {
        let (mut s, _io) = stream();
        for _ in 0..4 {
            s.enqueue(Qos::BestEffort, 3, msg(10)).unwrap();
        }
        // 5 fragments needed, 4 slots left
        assert_matches!(
            s.enqueue(Qos::BestEffort, 3, msg(4100)),
            Err(EnqueueError::QueueFull {
                queued: 4,
                needed: 5,
                ..
            })
        );
        assert_eq!(4, s.queued());
    }

    #[test]
    fn drain_empties_the_queue() {
        let (mut s, mut io) = stream();
        s.enqueue(Qos::BestEffort, 3, msg(100)).unwrap();
        s.enqueue(Qos::BestEffort, 3, msg(100)).unwrap();
        assert_eq!(2, s.drain());
        assert_eq!(0, s.queued());

        let mut buf = [0u8; MTU];
        assert!(io.recv(&mut buf).unwrap().is_some());
        assert!(io.recv(&mut buf).unwrap().is_some());
        assert!(io.recv(&mut buf).unwrap().is_none());
    }

    #[test]
    fn sequence_wraps_after_the_full_range() {
        let (mut s, mut io) = stream();
        for i in 0..=u16::MAX {
            let seq = s.enqueue(Qos::BestEffort, 3, msg(4)).unwrap();
            assert_eq!(Seq(i), seq);
            s.drain();
            // keep the channel from accumulating datagrams
            while io.recv(&mut [0u8; 64]).unwrap().is_some() {}
        }
        assert_eq!(Seq(0), s.enqueue(Qos::BestEffort, 3, msg(4)).unwrap());
    }
}
