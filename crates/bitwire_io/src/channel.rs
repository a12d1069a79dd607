//! See [`ChannelIo`].

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicU16, Ordering},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::{DatagramIo, IoError};

/// [`DatagramIo`] endpoint connected in-memory to its pair.
///
/// [`ChannelIo::pair`] creates two endpoints joined by unbounded channels.
/// Delivery is lossless and ordered - useful for tests and for talking
/// between parts of one process. Each endpoint carries a synthetic loopback
/// address so that address-based APIs keep working.
///
/// Dropping one endpoint closes the pair: the survivor's calls return
/// [`IoError::Closed`] once the queue is empty.
#[derive(Debug)]
pub struct ChannelIo {
    send: Sender<(Vec<u8>, SocketAddr)>,
    recv: Receiver<(Vec<u8>, SocketAddr)>,
    local: SocketAddr,
    peer: SocketAddr,
}

impl ChannelIo {
    /// Creates two connected endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        // synthetic ports only distinguish endpoints in logs; they are never bound
        static NEXT_PORT: AtomicU16 = AtomicU16::new(40_000);
        let port_a = NEXT_PORT.fetch_add(2, Ordering::Relaxed);
        let addr_a = SocketAddr::from((Ipv4Addr::LOCALHOST, port_a));
        let addr_b = SocketAddr::from((Ipv4Addr::LOCALHOST, port_a + 1));

        let (send_ab, recv_ab) = crossbeam_channel::unbounded();
        let (send_ba, recv_ba) = crossbeam_channel::unbounded();
        (
            Self {
                send: send_ab,
                recv: recv_ba,
                local: addr_a,
                peer: addr_b,
            },
            Self {
                send: send_ba,
                recv: recv_ab,
                local: addr_b,
                peer: addr_a,
            },
        )
    }

    /// Synthetic address of this endpoint.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Synthetic address of the paired endpoint.
    #[must_use]
    pub const fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl DatagramIo for ChannelIo {
    fn send(&mut self, datagram: &[u8], _to: SocketAddr) -> Result<usize, IoError> {
        self.send
            .send((datagram.to_vec(), self.local))
            .map_err(|_| IoError::Closed)?;
        Ok(datagram.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, IoError> {
        match self.recv.try_recv() {
            Ok((datagram, from)) => {
                let len = datagram.len().min(buf.len());
                buf[..len].copy_from_slice(&datagram[..len]);
                Ok(Some((len, from)))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(IoError::Closed),
        }
    }
}
