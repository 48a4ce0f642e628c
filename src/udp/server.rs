use std::io::Result;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use crate::directory::Directory;
use crate::proto::{Message, MAX_DATAGRAM};

/// Well known rendezvous port.
pub const DEFAULT_PORT: u16 = 3478;

/// Udp rendezvous server
///
/// keep traces of all room members, and tell each of them about the others.
pub struct Server {
    socket: UdpSocket,
    directory: Directory,
    next_gc: Option<Instant>,
}

impl Server {
    pub fn new<A: ToSocketAddrs>(listen_addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(listen_addr)?;

        Ok(Self {
            socket,
            directory: Directory::new(),
            next_gc: None,
        })
    }

    /// forget members that have not registered again within `ttl`.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.directory = Directory::with_ttl(ttl);
        self.next_gc = Some(Instant::now() + ttl);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// serve forever. Only a failure to configure the socket is returned.
    pub fn run(mut self) -> Result<()> {
        let mut buf = [0; MAX_DATAGRAM];

        if let Some(ttl) = self.directory.ttl() {
            // a zero read timeout is rejected by the socket
            let tick = ttl.clamp(Duration::from_millis(1), Duration::from_secs(30));
            self.socket.set_read_timeout(Some(tick))?;
        }

        loop {
            if let Ok((size, addr)) = self.socket.recv_from(&mut buf) {
                self.handle_datagram(&buf[..size], addr, Instant::now());
            }

            if let Some(next_gc) = self.next_gc {
                if Instant::now() > next_gc {
                    self.gc();
                }
            }
        }
    }

    fn handle_datagram(&mut self, buf: &[u8], addr: SocketAddr, now: Instant) {
        match Message::parse(buf) {
            Ok(Message::Register { name, room }) => self.handle_register(name, room, addr, now),
            Ok(Message::Bye { name, room }) => self.handle_bye(name, room, addr),
            Ok(msg) => log::trace!("ignore {} from {}", msg, addr),
            Err(e) => log::trace!("drop datagram from {}: {}", addr, e),
        }
    }

    fn handle_register(&mut self, name: String, room: String, addr: SocketAddr, now: Instant) {
        log::debug!("register {} in room {} at {}", name, room, addr);

        for (to, notice) in fan_out(&mut self.directory, &name, &room, addr, now) {
            log::trace!("{} -> {}", notice, to);
            let _ = self.socket.send_to(&notice.encode(), to);
        }
    }

    fn handle_bye(&mut self, name: String, room: String, addr: SocketAddr) {
        // only the registered address may remove a member
        let registered_here = self
            .directory
            .get(&room, &name)
            .map_or(false, |ep| ep.addr == addr);

        if registered_here {
            log::debug!("bye {} from room {}", name, room);
            self.directory.remove(&room, &name);
        } else {
            log::debug!("ignore bye {} in room {} from {}", name, room, addr);
        }
    }

    fn gc(&mut self) {
        let removed = self.directory.sweep(Instant::now());
        if removed > 0 {
            log::debug!("gc removed {} members", removed);
        }

        self.next_gc = self.directory.ttl().map(|ttl| Instant::now() + ttl);
    }
}

/// Record a registration and build the `PEER` notices it causes.
///
/// For every other member the joiner learns the member's address and the
/// member learns the joiner's observed address.
pub(crate) fn fan_out(
    directory: &mut Directory,
    name: &str,
    room: &str,
    addr: SocketAddr,
    now: Instant,
) -> Vec<(SocketAddr, Message)> {
    let others = directory.upsert(room, name, addr, now);

    let mut notices = Vec::with_capacity(others.len() * 2);
    for other in others {
        notices.push((
            addr,
            Message::Peer {
                name: other.name,
                addr: other.addr,
            },
        ));
        notices.push((
            other.addr,
            Message::Peer {
                name: name.to_string(),
                addr,
            },
        ));
    }

    notices
}
