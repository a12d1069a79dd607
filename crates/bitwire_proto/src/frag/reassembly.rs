//! See [`PacketBuffer`].

use std::time::{Duration, Instant};

use bitvec::{array::BitArray, bitarr, order::Lsb0};
use tracing::trace;

use crate::{MAX_FRAGMENT_LEN, MAX_SEQ_DISTANCE, PACKET_BUFFER_LEN, seq::Seq};

use super::{FragmentHeader, InvalidFragment};

/// Tag value marking a slot as empty.
const ENTRY_SENTINEL: u32 = 0xFFFF_FFFF;

/// Fixed-size table reassembling messages from fragments on the receive side.
///
/// The table holds [`PACKET_BUFFER_LEN`] slots; an incoming fragment with
/// sequence `s` lands in slot `s % PACKET_BUFFER_LEN`. Multiple sequences map
/// to the same slot, so each slot remembers which sequence owns it: a newer
/// sequence colliding with an occupied slot evicts it, an older one is
/// discarded. This keeps insertion, query and removal constant-time without
/// the table ever growing.
///
/// This is the structure proposed in [*Gaffer On Games*], hardened for
/// hostile input: every field of an incoming fragment is range-checked before
/// it is used as an index, size or count, and sequences far outside the
/// window around the newest seen sequence are rejected outright.
///
/// A slot moves Empty → Partial (first fragment) → Complete (last fragment),
/// returns to Empty when the application consumes it via
/// [`PacketBuffer::take_completed`], and may fall back to Empty from any
/// occupied state through eviction - by a colliding newer sequence, by
/// [`PacketBuffer::advance`], or by [`PacketBuffer::evict_expired`].
///
/// [*Gaffer On Games*]: https://gafferongames.com/post/packet_fragmentation_and_reassembly/#data-structure-on-receiver-side
#[derive(Debug)]
pub struct PacketBuffer {
    entries: Box<[Entry]>,
    current: Option<Seq>,
    len: usize,
    ttl: Duration,
}

/// Error that occurs when using [`PacketBuffer::insert`].
///
/// It is safe to ignore these: they explain why a fragment was discarded,
/// rather than signalling a fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InsertError {
    /// A header field was out of bounds. See [`InvalidFragment`].
    #[error(transparent)]
    Invalid(#[from] InvalidFragment),
    /// The sequence was too far from the newest sequence seen so far.
    ///
    /// Either a very stale packet, or a hostile one trying to poison the
    /// table.
    #[error("sequence {seq:?} is outside the receive window around {current:?}")]
    OutOfWindow {
        /// Sequence of the incoming fragment.
        seq: Seq,
        /// Newest sequence seen so far.
        current: Seq,
    },
    /// The slot for this sequence is occupied by a newer message.
    #[error("sequence {seq:?} is older than {existing:?} occupying its slot")]
    Stale {
        /// Sequence of the incoming fragment.
        seq: Seq,
        /// Sequence currently owning the slot.
        existing: Seq,
    },
    /// The fragment count disagrees with the fragments already stored for
    /// this sequence - tampered or mangled traffic.
    #[error("fragment count {got} does not match {expected} already stored")]
    MismatchedCount {
        /// Count the slot was initialized with.
        expected: u16,
        /// Count claimed by the incoming fragment.
        got: u16,
    },
    /// This fragment was already received.
    #[error("fragment {index} of {seq:?} was already received")]
    Duplicate {
        /// Sequence of the incoming fragment.
        seq: Seq,
        /// Index of the incoming fragment.
        index: u8,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    /// Sequence owning this slot, or [`ENTRY_SENTINEL`] when empty.
    seq: u32,
    packet_type: u32,
    num_frags: u16,
    received_count: u16,
    received: BitArray<[u8; 32]>,
    /// Reassembled payload, laid out at `index * MAX_FRAGMENT_LEN` offsets
    /// and truncated to the real message length once the last fragment
    /// arrives.
    payload: Vec<u8>,
    last_recv_at: Instant,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self {
            seq: ENTRY_SENTINEL,
            packet_type: 0,
            num_frags: 0,
            received_count: 0,
            received: bitarr![u8, Lsb0; 0; 256],
            payload: Vec::new(),
            last_recv_at: now,
        }
    }

    const fn is_empty(&self) -> bool {
        self.seq == ENTRY_SENTINEL
    }

    fn owner(&self) -> Seq {
        debug_assert!(!self.is_empty());
        #[allow(clippy::cast_possible_truncation)] // occupied tags are u16 values
        let seq = self.seq as u16;
        Seq(seq)
    }

    const fn is_complete(&self) -> bool {
        !self.is_empty() && self.received_count == self.num_frags
    }

    /// Returns the slot to Empty, releasing its payload storage.
    fn clear(&mut self) {
        self.seq = ENTRY_SENTINEL;
        self.packet_type = 0;
        self.num_frags = 0;
        self.received_count = 0;
        self.received.fill(false);
        self.payload = Vec::new();
    }
}

impl PacketBuffer {
    /// Creates an empty buffer whose slots expire `ttl` after their last
    /// received fragment.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            entries: (0..PACKET_BUFFER_LEN)
                .map(|_| Entry::new(now))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            current: None,
            len: 0,
            ttl,
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no slots are occupied.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Newest sequence accepted so far, if any.
    #[must_use]
    pub const fn current(&self) -> Option<Seq> {
        self.current
    }

    fn slot_index(seq: Seq) -> usize {
        usize::from(seq.0) % PACKET_BUFFER_LEN
    }

    /// Stores one fragment of the message with the given sequence.
    ///
    /// Returns whether this fragment completed the message, in which case the
    /// reassembled payload can be taken with
    /// [`PacketBuffer::take_completed`].
    ///
    /// # Errors
    ///
    /// Errors if the fragment was discarded; see [`InsertError`]. Discarding
    /// never disturbs fragments already stored.
    ///
    /// # Panics
    ///
    /// Panics if `payload` is not exactly `header.len` bytes - the caller
    /// reads the payload out of the packet using that length.
    pub fn insert(
        &mut self,
        seq: Seq,
        packet_type: u32,
        header: &FragmentHeader,
        payload: &[u8],
        now: Instant,
    ) -> Result<bool, InsertError> {
        header.validate()?;
        assert_eq!(
            header.len as usize,
            payload.len(),
            "payload must match the header length"
        );
        self.check_window(seq)?;

        let index = Self::slot_index(seq);
        self.evict_or_reject(index, seq)?;

        let entry = &mut self.entries[index];
        let newly_occupied = entry.is_empty();
        if newly_occupied {
            entry.seq = u32::from(seq.0);
            entry.packet_type = packet_type;
            entry.num_frags = header.num_frags;
            entry.received_count = 0;
            entry.received.fill(false);
            entry.payload.clear();
            entry
                .payload
                .resize(usize::from(header.num_frags) * MAX_FRAGMENT_LEN, 0);
            entry.last_recv_at = now;
        }
        if entry.num_frags != header.num_frags {
            return Err(InsertError::MismatchedCount {
                expected: entry.num_frags,
                got: header.num_frags,
            });
        }

        let frag_index = usize::from(header.index);
        if entry.received[frag_index] {
            return Err(InsertError::Duplicate {
                seq,
                index: header.index,
            });
        }

        if frag_index == usize::from(entry.num_frags) - 1 {
            // the last fragment reveals the true message length
            let total = (usize::from(entry.num_frags) - 1) * MAX_FRAGMENT_LEN + payload.len();
            entry.payload.truncate(total);
        }
        let start = frag_index * MAX_FRAGMENT_LEN;
        entry.payload[start..start + payload.len()].copy_from_slice(payload);
        entry.received.set(frag_index, true);
        entry.received_count += 1;
        entry.last_recv_at = now;

        let complete = entry.is_complete();
        if newly_occupied {
            self.len += 1;
        }
        self.bump_current(seq);
        Ok(complete)
    }

    /// Stores an unfragmented message with the given sequence, immediately
    /// complete.
    ///
    /// # Errors
    ///
    /// Errors if the message was discarded; see [`InsertError`].
    pub fn insert_whole(
        &mut self,
        seq: Seq,
        packet_type: u32,
        payload: &[u8],
        now: Instant,
    ) -> Result<(), InsertError> {
        self.check_window(seq)?;

        let index = Self::slot_index(seq);
        self.evict_or_reject(index, seq)?;

        let entry = &mut self.entries[index];
        if !entry.is_empty() {
            // same sequence delivered again
            if entry.num_frags != 1 {
                return Err(InsertError::MismatchedCount {
                    expected: entry.num_frags,
                    got: 1,
                });
            }
            return Err(InsertError::Duplicate { seq, index: 0 });
        }

        entry.seq = u32::from(seq.0);
        entry.packet_type = packet_type;
        entry.num_frags = 1;
        entry.received_count = 1;
        entry.received.fill(false);
        entry.received.set(0, true);
        entry.payload.clear();
        entry.payload.extend_from_slice(payload);
        entry.last_recv_at = now;

        self.len += 1;
        self.bump_current(seq);
        Ok(())
    }

    /// Whether the message with the given sequence has every fragment stored.
    #[must_use]
    pub fn is_complete(&self, seq: Seq) -> bool {
        let entry = &self.entries[Self::slot_index(seq)];
        !entry.is_empty() && entry.owner() == seq && entry.is_complete()
    }

    /// Takes the reassembled message with the given sequence out of the
    /// table, freeing its slot.
    ///
    /// Returns the message's packet type and payload - the fragments
    /// concatenated in index order - or [`None`] if the slot is empty, owned
    /// by a different sequence, or still waiting for fragments.
    #[must_use]
    pub fn take_completed(&mut self, seq: Seq) -> Option<(u32, Vec<u8>)> {
        let entry = &mut self.entries[Self::slot_index(seq)];
        if entry.is_empty() || entry.owner() != seq || !entry.is_complete() {
            return None;
        }
        let packet_type = entry.packet_type;
        let payload = std::mem::take(&mut entry.payload);
        entry.clear();
        self.len -= 1;
        Some((packet_type, payload))
    }

    /// Evicts every slot whose sequence falls out of the window ending at
    /// `to`, and raises the newest-seen sequence to at least `to`.
    ///
    /// A slot survives only if its sequence lies in
    /// `[to - PACKET_BUFFER_LEN + 1, to]` - anything older can no longer be
    /// addressed without colliding with upcoming sequences.
    pub fn advance(&mut self, to: Seq) {
        #[allow(clippy::cast_possible_truncation)] // buffer length fits a u16
        let oldest = to - Seq(PACKET_BUFFER_LEN as u16 - 1);
        for entry in &mut self.entries {
            if !entry.is_empty() && entry.owner() < oldest {
                trace!(seq = entry.seq, "evicting slot behind the window");
                entry.clear();
                self.len -= 1;
            }
        }
        self.bump_current(to);
    }

    /// Evicts every slot which has gone longer than the configured TTL
    /// without receiving a fragment.
    ///
    /// Returns the number of slots evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let mut evicted = 0;
        for entry in &mut self.entries {
            if !entry.is_empty() && now.duration_since(entry.last_recv_at) >= self.ttl {
                trace!(seq = entry.seq, "evicting expired slot");
                entry.clear();
                self.len -= 1;
                evicted += 1;
            }
        }
        evicted
    }

    fn check_window(&self, seq: Seq) -> Result<(), InsertError> {
        if let Some(current) = self.current {
            if current.dist_to(seq).abs() > MAX_SEQ_DISTANCE {
                return Err(InsertError::OutOfWindow { seq, current });
            }
        }
        Ok(())
    }

    /// Resolves a slot collision: a newer sequence evicts the occupant, an
    /// older one is rejected.
    fn evict_or_reject(&mut self, index: usize, seq: Seq) -> Result<(), InsertError> {
        let entry = &mut self.entries[index];
        if entry.is_empty() || entry.owner() == seq {
            return Ok(());
        }
        let existing = entry.owner();
        if seq > existing {
            trace!(?existing, ?seq, "evicting slot for newer sequence");
            entry.clear();
            self.len -= 1;
            Ok(())
        } else {
            Err(InsertError::Stale { seq, existing })
        }
    }

    fn bump_current(&mut self, seq: Seq) {
        match self.current {
            Some(current) if seq <= current => {}
            _ => self.current = Some(seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::Bytes;

    use crate::frag::split;

    use super::*;

    const TTL: Duration = Duration::from_secs(2);
    const TYPE: u32 = 3;

    fn buf() -> PacketBuffer {
        PacketBuffer::new(TTL)
    }

    fn payload(len: usize) -> Bytes {
        #[allow(clippy::cast_possible_truncation)]
        let bytes = (0..len).map(|i| i as u8).collect::<Vec<_>>();
        bytes.into()
    }

    fn insert_all(buf: &mut PacketBuffer, seq: Seq, msg: &Bytes, order: &[usize]) {
        let frags = split(msg.clone()).unwrap().collect::<Vec<_>>();
        let now = Instant::now();
        for &i in order {
            let frag = &frags[i];
            buf.insert(seq, TYPE, &frag.header, &frag.payload, now)
                .unwrap();
        }
    }

    #[test]
    fn single_fragment_message() {
        let mut buf = buf();
        let msg = payload(512);
        insert_all(&mut buf, Seq(7), &msg, &[0]);

        assert!(buf.is_complete(Seq(7)));
        let (packet_type, bytes) = buf.take_completed(Seq(7)).unwrap();
        assert_eq!(TYPE, packet_type);
        assert_eq!(msg, bytes);
        assert!(buf.is_empty());
        assert!(buf.take_completed(Seq(7)).is_none());
    }

    #[test]
    fn in_order_reassembly() {
        let mut buf = buf();
        let msg = payload(8192);
        insert_all(&mut buf, Seq(0), &msg, &[0, 1, 2, 3, 4, 5, 6, 7]);

        let (_, bytes) = buf.take_completed(Seq(0)).unwrap();
        assert_eq!(msg, bytes);
    }

    #[test]
    fn any_order_reassembly() {
        let orders: [&[usize]; 3] = [
            &[3, 0, 7, 1, 5, 2, 6, 4],
            &[7, 6, 5, 4, 3, 2, 1, 0],
            &[4, 5, 6, 7, 0, 1, 2, 3],
        ];
        let msg = payload(8192);
        for order in orders {
            let mut buf = buf();
            insert_all(&mut buf, Seq(0), &msg, order);
            let (_, bytes) = buf.take_completed(Seq(0)).unwrap();
            assert_eq!(msg, bytes, "order = {order:?}");
        }
    }

    #[test]
    fn short_last_fragment_first() {
        let mut buf = buf();
        let msg = payload(1024 + 100);
        insert_all(&mut buf, Seq(9), &msg, &[1, 0]);

        let (_, bytes) = buf.take_completed(Seq(9)).unwrap();
        assert_eq!(msg, bytes);
    }

    #[test]
    fn duplicates_are_rejected_and_idempotent() {
        let mut buf = buf();
        let msg = payload(4096);
        let frags = split(msg).unwrap().collect::<Vec<_>>();
        let now = Instant::now();

        buf.insert(Seq(0), TYPE, &frags[1].header, &frags[1].payload, now)
            .unwrap();
        assert_matches!(
            buf.insert(Seq(0), TYPE, &frags[1].header, &frags[1].payload, now),
            Err(InsertError::Duplicate { index: 1, .. })
        );
        assert!(!buf.is_complete(Seq(0)));
        assert_eq!(1, buf.len());
    }

    #[test]
    fn withheld_fragment_blocks_completion() {
        let mut buf = buf();
        let msg = payload(8192);
        insert_all(&mut buf, Seq(0), &msg, &[0, 1, 2, 3, 4, 6, 7]);

        assert!(!buf.is_complete(Seq(0)));
        assert!(buf.take_completed(Seq(0)).is_none());

        insert_all(&mut buf, Seq(0), &msg, &[5]);
        let (_, bytes) = buf.take_completed(Seq(0)).unwrap();
        assert_eq!(msg, bytes);
    }

    #[test]
    fn newer_collision_evicts_partial_slot() {
        let mut buf = buf();
        let msg = payload(2048);
        insert_all(&mut buf, Seq(1), &msg, &[0]);

        // seq 257 maps to the same slot as seq 1
        insert_all(&mut buf, Seq(257), &msg, &[0, 1]);
        assert!(buf.take_completed(Seq(1)).is_none());
        let (_, bytes) = buf.take_completed(Seq(257)).unwrap();
        assert_eq!(msg, bytes);
    }

    #[test]
    fn older_collision_is_discarded() {
        let mut buf = buf();
        let msg = payload(2048);
        insert_all(&mut buf, Seq(257), &msg, &[0]);

        let frags = split(msg).unwrap().collect::<Vec<_>>();
        assert_matches!(
            buf.insert(
                Seq(1),
                TYPE,
                &frags[0].header,
                &frags[0].payload,
                Instant::now()
            ),
            Err(InsertError::Stale { .. })
        );
    }

    #[test]
    fn mismatched_count_is_discarded() {
        let mut buf = buf();
        let msg = payload(2048);
        let frags = split(msg).unwrap().collect::<Vec<_>>();
        let now = Instant::now();
        buf.insert(Seq(0), TYPE, &frags[0].header, &frags[0].payload, now)
            .unwrap();

        let mut tampered = frags[0].header;
        tampered.index = 2;
        tampered.num_frags = 4;
        assert_matches!(
            buf.insert(Seq(0), TYPE, &tampered, &frags[0].payload, now),
            Err(InsertError::MismatchedCount {
                expected: 2,
                got: 4
            })
        );
    }

    #[test]
    fn far_sequences_are_outside_the_window() {
        let mut buf = buf();
        let msg = payload(100);
        insert_all(&mut buf, Seq(0), &msg, &[0]);

        let frags = split(msg).unwrap().collect::<Vec<_>>();
        assert_matches!(
            buf.insert(
                Seq(2000),
                TYPE,
                &frags[0].header,
                &frags[0].payload,
                Instant::now()
            ),
            Err(InsertError::OutOfWindow { .. })
        );
    }

    #[test]
    fn first_packet_may_have_any_sequence() {
        let mut buf = buf();
        let msg = payload(100);
        insert_all(&mut buf, Seq(60_000), &msg, &[0]);
        assert!(buf.is_complete(Seq(60_000)));
    }

    #[test]
    fn wrapped_sequences_stay_in_window() {
        let mut buf = buf();
        let msg = payload(100);
        insert_all(&mut buf, Seq(4), &msg, &[0]);
        // 65530 is only 10 behind 4 on the circle
        insert_all(&mut buf, Seq(65_530), &msg, &[0]);
        assert!(buf.is_complete(Seq(65_530)));
        assert_eq!(Some(Seq(4)), buf.current());
    }

    #[test]
    fn advance_evicts_behind_the_window() {
        let mut buf = buf();
        let msg = payload(100);
        insert_all(&mut buf, Seq(0), &msg, &[0]);
        insert_all(&mut buf, Seq(10), &msg, &[0]);

        buf.advance(Seq(256));
        assert!(buf.take_completed(Seq(0)).is_none());
        assert!(buf.is_complete(Seq(10)));

        buf.advance(Seq(266));
        assert!(buf.take_completed(Seq(10)).is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn expired_slots_are_evicted() {
        let mut buf = buf();
        let msg = payload(2048);
        let frags = split(msg).unwrap().collect::<Vec<_>>();
        let start = Instant::now();
        buf.insert(Seq(0), TYPE, &frags[0].header, &frags[0].payload, start)
            .unwrap();

        assert_eq!(0, buf.evict_expired(start + Duration::from_millis(500)));
        assert_eq!(1, buf.evict_expired(start + Duration::from_secs(3)));
        assert!(buf.is_empty());
    }

    #[test]
    fn whole_messages_complete_immediately() {
        let mut buf = buf();
        let msg = payload(1100);
        buf.insert_whole(Seq(3), TYPE, &msg, Instant::now()).unwrap();

        let (packet_type, bytes) = buf.take_completed(Seq(3)).unwrap();
        assert_eq!(TYPE, packet_type);
        assert_eq!(msg, bytes);

        buf.insert_whole(Seq(4), TYPE, &msg, Instant::now()).unwrap();
        assert_matches!(
            buf.insert_whole(Seq(4), TYPE, &msg, Instant::now()),
            Err(InsertError::Duplicate { index: 0, .. })
        );
    }
}
