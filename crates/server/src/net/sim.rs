//! In-process datagram network for tests and single-process play.
//!
//! Delivery is immediate. Loss is deterministic: with `drop_every(n)` every
//! n-th datagram crossing the network is discarded, and a blackholed address
//! neither sends nor receives anything.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::socket::Socket;

type Datagram = (Vec<u8>, SocketAddr);

#[derive(Default)]
struct NetState {
    endpoints: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    blackholed: HashSet<SocketAddr>,
    drop_every: Option<u64>,
    crossed: u64,
    delivered: u64,
    dropped: u64,
    next_port: u16,
}

/// Shared handle to one simulated network.
#[derive(Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<NetState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every `n`-th datagram. `n < 2` would drop everything and is
    /// treated as lossless.
    pub fn with_drop_every(n: u64) -> Self {
        let net = Self::new();
        net.set_drop_every(n);
        net
    }

    pub fn set_drop_every(&self, n: u64) {
        self.state.lock().drop_every = (n >= 2).then_some(n);
    }

    /// Cut `addr` off the network (or reconnect it).
    pub fn set_blackholed(&self, addr: SocketAddr, blackholed: bool) {
        let mut state = self.state.lock();
        if blackholed {
            state.blackholed.insert(addr);
        } else {
            state.blackholed.remove(&addr);
        }
    }

    /// Bind a socket at `addr`. Port 0 picks a free port.
    pub fn bind(&self, addr: SocketAddr) -> io::Result<SimSocket> {
        let mut state = self.state.lock();
        let mut addr = addr;
        if addr.port() == 0 {
            loop {
                state.next_port = state.next_port.wrapping_add(1).max(40_000);
                let candidate = SocketAddr::new(addr.ip(), state.next_port);
                if !state.endpoints.contains_key(&candidate) {
                    addr = candidate;
                    break;
                }
            }
        }
        if state.endpoints.contains_key(&addr) {
            return Err(io::Error::new(
                ErrorKind::AddrInUse,
                format!("{addr} is already bound"),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.endpoints.insert(addr, tx);
        Ok(SimSocket {
            addr,
            net: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Bind on 127.0.0.1 with a fresh port.
    pub fn bind_any(&self) -> io::Result<SimSocket> {
        self.bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }

    pub fn delivered(&self) -> u64 {
        self.state.lock().delivered
    }

    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }

    fn route(&self, from: SocketAddr, to: SocketAddr, datagram: &[u8]) {
        let mut state = self.state.lock();
        state.crossed += 1;
        let lost = state.drop_every.is_some_and(|n| state.crossed % n == 0)
            || state.blackholed.contains(&from)
            || state.blackholed.contains(&to);
        let delivered = !lost
            && state
                .endpoints
                .get(&to)
                .is_some_and(|tx| tx.send((datagram.to_vec(), from)).is_ok());
        if delivered {
            state.delivered += 1;
        } else {
            state.dropped += 1;
        }
    }

    fn unbind(&self, addr: SocketAddr) {
        self.state.lock().endpoints.remove(&addr);
    }
}

/// One endpoint on a [`SimNetwork`].
pub struct SimSocket {
    addr: SocketAddr,
    net: SimNetwork,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

fn copy_out(buf: &mut [u8], (data, from): Datagram) -> (usize, SocketAddr) {
    let len = data.len().min(buf.len());
    buf[..len].copy_from_slice(&data[..len]);
    (len, from)
}

impl Socket for SimSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }

    fn send_to(&self, datagram: &[u8], target: SocketAddr) -> io::Result<()> {
        self.net.route(self.addr, target, datagram);
        Ok(())
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Ok(None);
        };
        Ok(rx.try_recv().ok().map(|datagram| copy_out(buf, datagram)))
    }

    fn recv_from<'a>(
        &'a self,
        buf: &'a mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send + 'a {
        async move {
            let mut rx = self.rx.lock().await;
            match rx.recv().await {
                Some(datagram) => Ok(copy_out(buf, datagram)),
                None => Err(io::Error::new(ErrorKind::NotConnected, "simulated network closed")),
            }
        }
    }
}

impl Drop for SimSocket {
    fn drop(&mut self) {
        self.net.unbind(self.addr);
    }
}
