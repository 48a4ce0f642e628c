use socket2::{Domain, Protocol, Socket, Type};
use std::io::{Error, ErrorKind, ErrorKind::Other, Result};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    mpsc::{channel, Receiver, Sender},
    Arc, Condvar, Mutex, MutexGuard,
};
use std::thread::{spawn, JoinHandle};
use std::time::{Duration, Instant};

use super::session::{Action, PeerLink, Phase, SessionConfig, SessionEvent, SessionState};
use crate::proto::MAX_DATAGRAM;

/// How often the network loop wakes up without traffic to run timers.
const TICK: Duration = Duration::from_millis(100);

struct Shared {
    state: Mutex<SessionState>,
    connected: Condvar,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Udp hole punching peer
///
/// Registers in a room, punches to every member the rendezvous announces and
/// carries application payloads once a peer address is known.
///
/// # example
/// ```no_run
/// use roompunch::udp::{resolve, Client, SessionConfig, SessionEvent};
/// use std::time::Duration;
///
/// let rendezvous = resolve("rendezvous.example.com:3478").unwrap();
/// let mut c = Client::new(SessionConfig::new("alice", "lobby", rendezvous), None).unwrap();
/// let events = c.start().unwrap();
///
/// if c.wait_connected(Duration::from_secs(30)).is_some() {
///     c.send(b"hello").unwrap();
/// }
/// while let Ok(SessionEvent::Payload { data, .. }) = events.recv() {
///     println!("{}", String::from_utf8_lossy(&data));
/// }
/// ```
pub struct Client {
    socket: UdpSocket,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    exit: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Client {
    /// if no local address set, choose according rendezvous address type(ipv4 or ipv6).
    pub fn new(config: SessionConfig, local_addr: Option<SocketAddr>) -> Result<Self> {
        let local_addr = match local_addr {
            Some(addr) => addr,
            None => match config.rendezvous {
                SocketAddr::V4(_) => ([0, 0, 0, 0], 0).into(),
                SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
            },
        };

        let socket = Self::bind(local_addr)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::new(config)),
                connected: Condvar::new(),
            }),
            exit: Default::default(),
            worker: None,
        })
    }

    fn bind(local_addr: SocketAddr) -> Result<UdpSocket> {
        let socket = Socket::new(
            Domain::for_address(local_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&local_addr.into())?;

        Ok(socket.into())
    }

    /// local address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// send `REGISTER` and start the network loop.
    ///
    /// Session events, application payloads included, arrive on the returned channel.
    pub fn start(&mut self) -> Result<Receiver<SessionEvent>> {
        if self.worker.is_some() {
            return Err(Error::new(Other, "session already started"));
        }

        let (tx, rx) = channel();

        let actions = self.shared.state().start(Instant::now());
        perform(&self.socket, &self.shared, &tx, actions);

        let socket = self.socket.try_clone()?;
        socket.set_read_timeout(Some(TICK))?;
        let shared = self.shared.clone();
        let exit = self.exit.clone();

        self.worker = Some(spawn(move || network_loop(socket, shared, exit, tx)));

        Ok(rx)
    }

    /// send an application payload to every known peer.
    ///
    /// Does not wait for the hole to be confirmed, a discovered address is enough.
    /// Payloads longer than `MAX_DATAGRAM` are refused with `InvalidInput`.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        if payload.len() > MAX_DATAGRAM {
            return Err(Error::new(ErrorKind::InvalidInput, "payload too large"));
        }

        let targets = self.shared.state().payload_targets();
        if targets.is_empty() {
            return Err(Error::new(ErrorKind::NotConnected, "no peer known yet"));
        }

        for addr in &targets {
            self.socket.send_to(payload, addr)?;
        }

        Ok(targets.len())
    }

    /// block until some peer answered our punch, or `timeout` passes.
    pub fn wait_connected(&self, timeout: Duration) -> Option<SocketAddr> {
        let state = self.shared.state();
        let (state, _) = self
            .shared
            .connected
            .wait_timeout_while(state, timeout, |s| !s.is_connected())
            .unwrap_or_else(|e| e.into_inner());

        state.connected_peer().map(|l| l.addr)
    }

    pub fn phase(&self) -> Phase {
        self.shared.state().phase()
    }

    /// most recently discovered peer
    pub fn peer(&self) -> Option<PeerLink> {
        self.shared.state().peer().cloned()
    }

    pub fn peers(&self) -> Vec<PeerLink> {
        self.shared.state().peers().cloned().collect()
    }

    /// stop the network loop and tell the rendezvous we are gone.
    pub fn shutdown(&mut self) {
        if self.exit.swap(true, Relaxed) {
            return;
        }

        if let Some(Action::Send(addr, bye)) = self.shared.state().bye() {
            let _ = self.socket.send_to(&bye.encode(), addr);
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn network_loop(
    socket: UdpSocket,
    shared: Arc<Shared>,
    exit: Arc<AtomicBool>,
    tx: Sender<SessionEvent>,
) {
    let mut buf = [0; MAX_DATAGRAM];

    loop {
        if exit.load(Relaxed) {
            break;
        }

        let actions = match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                log::trace!("{} bytes from {}", n, from);
                shared.state().on_datagram(&buf[..n], from, Instant::now())
            }
            // timeouts included, nothing this round
            Err(_) => vec![],
        };
        perform(&socket, &shared, &tx, actions);

        let actions = shared.state().on_tick(Instant::now());
        perform(&socket, &shared, &tx, actions);
    }
}

fn perform(socket: &UdpSocket, shared: &Shared, tx: &Sender<SessionEvent>, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Send(addr, msg) => {
                if let Err(e) = socket.send_to(&msg.encode(), addr) {
                    log::debug!("send {} to {} failed: {}", msg, addr, e);
                }
            }
            Action::Emit(event) => {
                if let SessionEvent::Connected { .. } = event {
                    shared.connected.notify_all();
                }
                // nobody listening is fine
                let _ = tx.send(event);
            }
        }
    }
}

/// resolve a `host:port` rendezvous address.
pub fn resolve(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::new(Other, "no addr"))
}
