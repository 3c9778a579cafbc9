//! The datagram transport abstraction (spec.md §6; `SPEC_FULL.md` §6's `ChannelSocket` addition
//! for test tooling), grounded on the teacher's `UdpFrameSink`/`FrameSink` split between a
//! concrete socket and a trait object the endpoint writes through.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;
use std::sync::mpsc;

/// A non-blocking datagram socket. Implementations must never block the calling thread; `send_to`
/// and `recv_from` report `WouldBlock` (via `Ok(None)`) rather than waiting.
pub trait DatagramSocket {
    fn local_addr(&self) -> io::Result<SocketAddr>;
    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<()>;
    /// Polls for one pending datagram. Returns `Ok(None)` when nothing is queued.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

/// The production socket: a real, non-blocking OS `UdpSocket`.
pub struct StdUdpSocket {
    inner: UdpSocket,
}

impl StdUdpSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let inner = UdpSocket::bind(addr)?;
        inner.set_nonblocking(true)?;
        Ok(Self { inner })
    }
}

impl DatagramSocket for StdUdpSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        self.inner.send_to(data, addr)?;
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inner.recv_from(buf) {
            Ok((len, addr)) => Ok(Some((len, addr))),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// An in-memory socket double for tests: datagrams sent on one end of a channel pair appear on
/// the other's `recv_from`, with no real I/O and no dropped packets unless the test drops them
/// itself. Grounded on the teacher's test-only `FrameSink` implementations in `tests/`.
pub struct ChannelSocket {
    local: SocketAddr,
    rx: mpsc::Receiver<(Box<[u8]>, SocketAddr)>,
    peers: Rc<std::cell::RefCell<Vec<(SocketAddr, mpsc::Sender<(Box<[u8]>, SocketAddr)>)>>>,
}

impl ChannelSocket {
    /// Builds a fully-connected mesh of `count` channel sockets bound to synthetic loopback
    /// addresses `127.0.0.1:<20000 + i>`, so tests can wire up several peers without touching a
    /// real socket.
    pub fn mesh(count: usize) -> Vec<Self> {
        let mut senders = Vec::with_capacity(count);
        let mut receivers = Vec::with_capacity(count);
        let mut addrs = Vec::with_capacity(count);
        for i in 0..count {
            let (tx, rx) = mpsc::channel();
            senders.push(tx);
            receivers.push(rx);
            addrs.push(SocketAddr::from(([127, 0, 0, 1], 20000 + i as u16)));
        }

        let peers = Rc::new(std::cell::RefCell::new(
            addrs.iter().cloned().zip(senders.iter().cloned()).collect::<Vec<_>>(),
        ));

        receivers
            .into_iter()
            .zip(addrs.into_iter())
            .map(|(rx, local)| Self {
                local,
                rx,
                peers: Rc::clone(&peers),
            })
            .collect()
    }
}

impl DatagramSocket for ChannelSocket {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<()> {
        if let Some((_, tx)) = self.peers.borrow().iter().find(|(a, _)| *a == addr) {
            let _ = tx.send((data.to_vec().into_boxed_slice(), self.local));
        }
        Ok(())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.rx.try_recv() {
            Ok((data, from)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(Some((len, from)))
            }
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Ok(None),
        }
    }
}
