//! See [`UdpIo`].

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
};

use crate::{DatagramIo, IoError};

/// [`DatagramIo`] over a non-blocking UDP socket.
#[derive(Debug)]
pub struct UdpIo {
    socket: UdpSocket,
}

impl UdpIo {
    /// Binds a socket to the given local address and puts it into
    /// non-blocking mode.
    ///
    /// Bind to port 0 to let the OS pick a free port.
    ///
    /// # Errors
    ///
    /// Errors if the socket cannot be bound or configured.
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    /// Address this socket is bound to.
    ///
    /// # Errors
    ///
    /// Errors if the OS cannot report the address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramIo for UdpIo {
    fn send(&mut self, datagram: &[u8], to: SocketAddr) -> Result<usize, IoError> {
        Ok(self.socket.send_to(datagram, to)?)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, IoError> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(IoError::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_on_localhost() {
        let mut a = UdpIo::bind("127.0.0.1:0").unwrap();
        let mut b = UdpIo::bind("127.0.0.1:0").unwrap();
        let addr_b = b.local_addr().unwrap();

        assert_eq!(None, b.recv(&mut [0u8; 16]).unwrap());

        a.send(b"ping", addr_b).unwrap();

        // non-blocking: spin briefly until the kernel delivers
        let mut buf = [0u8; 16];
        let received = std::iter::repeat_with(|| {
            std::thread::sleep(std::time::Duration::from_millis(1));
            b.recv(&mut buf).unwrap()
        })
        .take(100)
        .find_map(|r| r);

        let (len, from) = received.expect("datagram should arrive on loopback");
        assert_eq!(b"ping", &buf[..len]);
        assert_eq!(a.local_addr().unwrap(), from);
    }
}
