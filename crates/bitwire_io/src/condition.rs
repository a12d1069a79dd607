//! See [`ConditionedIo`].

use std::{collections::VecDeque, net::SocketAddr};

use rand::{Rng, SeedableRng, rngs::SmallRng};
use tracing::trace;

use crate::{DatagramIo, IoError};

/// [`DatagramIo`] wrapper applying simulated network impairment to incoming
/// datagrams.
///
/// Real networks drop traffic; loopback and in-memory transports do not. This
/// wrapper makes a too-good transport behave badly on purpose, so that loss
/// handling can be exercised deterministically in tests: each incoming
/// datagram is dropped with probability [`drop_probability`], independently.
///
/// Outgoing datagrams pass through untouched. Simulated lag, corruption and
/// duplication would slot in next to the drop step but are not implemented.
///
/// [`drop_probability`]: ConditionedIo::drop_probability
#[derive(Debug)]
pub struct ConditionedIo<T> {
    inner: T,
    drop_probability: f32,
    rng: SmallRng,
    /// Datagrams received from `inner` but not yet run through the
    /// impairment step.
    staging: VecDeque<(Vec<u8>, SocketAddr)>,
    /// Datagrams which survived impairment, ready for [`DatagramIo::recv`].
    outgoing: VecDeque<(Vec<u8>, SocketAddr)>,
    /// Datagrams which did not survive, retained for inspection.
    dropped: Vec<Vec<u8>>,
}

impl<T> ConditionedIo<T> {
    /// Wraps a transport, dropping incoming datagrams with the given
    /// probability and seeding the impairment RNG from the OS.
    ///
    /// # Panics
    ///
    /// Panics if `drop_probability` is outside `[0, 1]`.
    #[must_use]
    pub fn new(inner: T, drop_probability: f32) -> Self {
        Self::with_rng(inner, drop_probability, SmallRng::from_os_rng())
    }

    /// Wraps a transport with a seeded impairment RNG, for reproducible
    /// tests.
    ///
    /// # Panics
    ///
    /// Panics if `drop_probability` is outside `[0, 1]`.
    #[must_use]
    pub fn with_seed(inner: T, drop_probability: f32, seed: u64) -> Self {
        Self::with_rng(inner, drop_probability, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(inner: T, drop_probability: f32, rng: SmallRng) -> Self {
        assert!(
            (0.0..=1.0).contains(&drop_probability),
            "drop probability {drop_probability} is outside [0, 1]"
        );
        Self {
            inner,
            drop_probability,
            rng,
            staging: VecDeque::new(),
            outgoing: VecDeque::new(),
            dropped: Vec::new(),
        }
    }

    /// Probability that any given incoming datagram is dropped.
    #[must_use]
    pub const fn drop_probability(&self) -> f32 {
        self.drop_probability
    }

    /// Datagrams dropped so far, oldest first.
    #[must_use]
    pub fn dropped(&self) -> &[Vec<u8>] {
        &self.dropped
    }

    /// The wrapped transport.
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Runs the impairment step on one staged datagram, either discarding it
    /// or forwarding it to the receive queue.
    fn process_effects(&mut self) {
        let Some((datagram, from)) = self.staging.pop_front() else {
            return;
        };
        if self.rng.random::<f32>() < self.drop_probability {
            trace!(len = datagram.len(), "dropping datagram");
            self.dropped.push(datagram);
        } else {
            self.outgoing.push_back((datagram, from));
        }
    }
}

impl<T: DatagramIo> DatagramIo for ConditionedIo<T> {
    fn send(&mut self, datagram: &[u8], to: SocketAddr) -> Result<usize, IoError> {
        self.inner.send(datagram, to)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, IoError> {
        // pull everything waiting on the wrapped transport into staging
        let mut scratch = vec![0u8; buf.len().max(2048)];
        while let Some((len, from)) = self.inner.recv(&mut scratch)? {
            self.staging.push_back((scratch[..len].to_vec(), from));
        }

        self.process_effects();

        match self.outgoing.pop_front() {
            Some((datagram, from)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(Some((len, from)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::ChannelIo;

    use super::*;

    fn pair(drop_probability: f32, seed: u64) -> (ChannelIo, ConditionedIo<ChannelIo>) {
        let (a, b) = ChannelIo::pair();
        (a, ConditionedIo::with_seed(b, drop_probability, seed))
    }

    #[test]
    fn zero_probability_drops_nothing() {
        let (mut a, mut b) = pair(0.0, 1);
        let peer = b.inner().local_addr();
        for _ in 0..100 {
            a.send(b"data", peer).unwrap();
        }

        let mut buf = [0u8; 16];
        let mut received = 0;
        while b.recv(&mut buf).unwrap().is_some() {
            received += 1;
        }
        assert_eq!(100, received);
        assert!(b.dropped().is_empty());
    }

    #[test]
    fn full_probability_drops_everything() {
        let (mut a, mut b) = pair(1.0, 1);
        let peer = b.inner().local_addr();
        for _ in 0..100 {
            a.send(b"data", peer).unwrap();
        }

        let mut buf = [0u8; 16];
        for _ in 0..200 {
            assert_eq!(None, b.recv(&mut buf).unwrap());
        }
        assert_eq!(100, b.dropped().len());
    }

    #[test]
    fn partial_probability_drops_some() {
        let (mut a, mut b) = pair(0.5, 42);
        let peer = b.inner().local_addr();
        for _ in 0..1000 {
            a.send(b"data", peer).unwrap();
        }

        let mut buf = [0u8; 16];
        let mut received = 0;
        for _ in 0..2000 {
            if b.recv(&mut buf).unwrap().is_some() {
                received += 1;
            }
        }
        let dropped = b.dropped().len();
        assert_eq!(1000, received + dropped);
        // a fair coin landing outside this band 1000 times in a row is
        // astronomically unlikely with a fixed seed
        assert!((300..=700).contains(&dropped), "dropped = {dropped}");
    }

    #[test]
    fn outgoing_traffic_is_untouched() {
        let (mut far, near) = ChannelIo::pair();
        let mut near = ConditionedIo::with_seed(near, 1.0, 7);
        near.send(b"out", far.local_addr()).unwrap();

        let mut buf = [0u8; 8];
        let (len, _) = far.recv(&mut buf).unwrap().unwrap();
        assert_eq!(b"out", &buf[..len]);
    }
}
