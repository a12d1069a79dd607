#![cfg_attr(any(nightly, docsrs), feature(doc_cfg, doc_auto_cfg))]
#![doc = include_str!("../README.md")]

pub mod channel;
pub mod condition;
pub mod udp;

use std::net::SocketAddr;

/// Error that occurs when sending or receiving on a [`DatagramIo`].
///
/// Note that an empty receive queue is *not* an error - see
/// [`DatagramIo::recv`].
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// The other side of the transport is gone and will never deliver or
    /// accept another datagram.
    #[error("transport closed")]
    Closed,
    /// The underlying socket failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A non-blocking, unreliable byte-datagram transport.
///
/// This is the seam between the protocol layer and the operating system:
/// anything that can ship a byte blob to an address and hand back whatever
/// arrives can carry the protocol. Datagrams may be dropped, duplicated or
/// reordered in transit; neither call may ever block.
pub trait DatagramIo {
    /// Sends one datagram to the given address.
    ///
    /// Returns the number of bytes sent.
    ///
    /// # Errors
    ///
    /// Errors if the transport cannot accept the datagram. Since delivery is
    /// unreliable anyway, callers typically log the error and move on.
    fn send(&mut self, datagram: &[u8], to: SocketAddr) -> Result<usize, IoError>;

    /// Receives one datagram, if any is waiting.
    ///
    /// Copies the datagram into `buf` and returns its length and sender, or
    /// [`None`] if nothing is waiting - an empty queue is an ordinary
    /// condition, not an error. Datagrams longer than `buf` are truncated,
    /// matching UDP semantics.
    ///
    /// # Errors
    ///
    /// Errors if the transport itself failed.
    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, IoError>;
}
