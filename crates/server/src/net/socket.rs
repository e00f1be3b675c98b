use std::future::Future;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;

use tokio::net::UdpSocket;

/// Datagram socket the [`Host`](super::Host) drives.
///
/// Sends are best-effort and never block: a full send buffer drops the
/// datagram like the network would.
pub trait Socket: Send + Sync + 'static {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()>;

    /// A datagram if one is queued, `None` otherwise.
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    /// Wait for the next datagram. Must be cancel-safe.
    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a;
}

impl Socket for UdpSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }

    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        match self.try_send_to(datagram, target) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tracing::trace!("Send buffer full, dropped datagram to {}", target);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match UdpSocket::try_recv_from(self, buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a {
        UdpSocket::recv_from(self, buf)
    }
}
