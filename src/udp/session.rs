//! Peer side hole punching state machine.
//!
//! [`SessionState`] performs no I/O. It is fed received datagrams and clock
//! ticks and answers with [`Action`]s for the caller to carry out, which keeps
//! every transition testable without sockets. [`Client`](super::Client) is
//! the socket driver.
//!
//! Lifecycle of a session, and of each peer link inside it:
//!
//! ```text
//! INIT -> REGISTERED -> PEER_KNOWN -> PUNCHING -> CONNECTED
//!                                        |
//!                                        +-> FAILED (only with punch retries configured)
//! ```

use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::proto::Message;

/// PINGs per punch burst.
pub const PUNCH_BURST: usize = 5;

/// Ordered from least to most progressed; a session reports the most
/// progressed phase over all its peer links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Phase {
    #[default]
    Init,
    Registered,
    Failed,
    PeerKnown,
    Punching,
    Connected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Registered => write!(f, "registered"),
            Self::Failed => write!(f, "failed"),
            Self::PeerKnown => write!(f, "peer-known"),
            Self::Punching => write!(f, "punching"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Exponential backoff for re-sending `REGISTER` until a first peer shows up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_attempts: u32,
}

impl Backoff {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial.saturating_mul(1 << attempt.min(16));
        let jitter_ms = (base.as_millis() / 10) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub name: String,
    pub room: String,
    pub rendezvous: SocketAddr,
    /// PINGs sent per burst.
    pub punch_count: usize,
    /// Extra bursts sent to a peer that has not answered, before it is
    /// marked failed. `None` sends a single burst and waits forever.
    pub punch_retries: Option<u32>,
    /// How long to wait for a PONG before the next burst.
    pub punch_timeout: Duration,
    pub register_retry: Option<Backoff>,
    /// Re-send `REGISTER` this often for as long as the session lives.
    pub keepalive: Option<Duration>,
}

impl SessionConfig {
    pub fn new<N: AsRef<str>, R: AsRef<str>>(name: N, room: R, rendezvous: SocketAddr) -> Self {
        Self {
            name: name.as_ref().into(),
            room: room.as_ref().into(),
            rendezvous,
            punch_count: PUNCH_BURST,
            punch_retries: None,
            punch_timeout: Duration::from_secs(2),
            register_retry: None,
            keepalive: None,
        }
    }

    pub fn punch_retries(mut self, retries: u32, timeout: Duration) -> Self {
        self.punch_retries = Some(retries);
        self.punch_timeout = timeout;
        self
    }

    pub fn register_retry(mut self, initial: Duration, max_attempts: u32) -> Self {
        self.register_retry = Some(Backoff {
            initial,
            max_attempts,
        });
        self
    }

    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);
        self
    }
}

/// What the session knows about one remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLink {
    /// Unknown while the peer has only been seen through its PINGs.
    pub name: Option<String>,
    pub addr: SocketAddr,
    pub phase: Phase,
    /// Bursts sent without an answering PONG.
    pub bursts: u32,
    last_burst: Option<Instant>,
}

impl PeerLink {
    fn new(name: Option<String>, addr: SocketAddr) -> Self {
        Self {
            name,
            addr,
            phase: Phase::PeerKnown,
            bursts: 0,
            last_burst: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Registered,
    /// A `PEER` notice arrived from the rendezvous.
    PeerDiscovered { name: String, addr: SocketAddr },
    /// A PING arrived from an address nobody announced.
    PeerAdopted { addr: SocketAddr },
    Connected {
        name: Option<String>,
        addr: SocketAddr,
    },
    PeerFailed {
        name: Option<String>,
        addr: SocketAddr,
    },
    /// Every `REGISTER` retry went unanswered.
    DiscoveryFailed,
    Payload { from: SocketAddr, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(SocketAddr, Message),
    Emit(SessionEvent),
}

#[derive(Debug, Default)]
struct RegisterTimers {
    attempts: u32,
    next_retry: Option<Instant>,
    next_keepalive: Option<Instant>,
}

#[derive(Debug)]
pub struct SessionState {
    config: SessionConfig,
    phase: Phase,
    peers: HashMap<SocketAddr, PeerLink>,
    latest: Option<SocketAddr>,
    discovery_failed: bool,
    timers: RegisterTimers,
}

impl SessionState {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            phase: Phase::Init,
            peers: Default::default(),
            latest: None,
            discovery_failed: false,
            timers: Default::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `INIT -> REGISTERED`. The `REGISTER` is fire and forget.
    pub fn start(&mut self, now: Instant) -> Vec<Action> {
        if self.phase != Phase::Init {
            return vec![];
        }

        self.phase = Phase::Registered;
        self.timers.next_retry = self.config.register_retry.map(|b| now + b.delay(0));
        self.timers.next_keepalive = self.config.keepalive.map(|k| now + k);

        log::debug!(
            "{} registering in room {} via {}",
            self.config.name,
            self.config.room,
            self.config.rendezvous
        );

        vec![self.register(), Action::Emit(SessionEvent::Registered)]
    }

    pub fn on_datagram(&mut self, data: &[u8], from: SocketAddr, now: Instant) -> Vec<Action> {
        match Message::parse(data) {
            Ok(Message::Peer { name, addr }) if from == self.config.rendezvous => {
                self.on_peer(name, addr, now)
            }
            Ok(Message::Ping) => self.on_ping(from, now),
            Ok(Message::Pong) => self.on_pong(from),
            Err(e) if from == self.config.rendezvous => {
                log::trace!("drop bad notice from rendezvous: {}", e);
                vec![]
            }
            _ => vec![Action::Emit(SessionEvent::Payload {
                from,
                data: data.to_vec(),
            })],
        }
    }

    fn on_peer(&mut self, name: String, addr: SocketAddr, now: Instant) -> Vec<Action> {
        // the same peer registered again from elsewhere, e.g. NAT rebinding
        let stale: Vec<SocketAddr> = self
            .peers
            .values()
            .filter(|l| l.addr != addr && l.name.as_deref() == Some(name.as_str()))
            .map(|l| l.addr)
            .collect();
        for old in stale {
            log::debug!("peer {} moved {} -> {}", name, old, addr);
            self.peers.remove(&old);
        }

        self.latest = Some(addr);
        self.timers.next_retry = None;
        self.discovery_failed = false;

        let link = self
            .peers
            .entry(addr)
            .or_insert_with(|| PeerLink::new(Some(name.clone()), addr));
        link.name = Some(name.clone());

        if link.phase == Phase::Connected {
            log::trace!("peer {} at {} already connected", name, addr);
            return vec![];
        }

        log::debug!("discovered peer {} at {}", name, addr);
        link.phase = Phase::PeerKnown;
        link.bursts = 0;

        let mut actions = vec![Action::Emit(SessionEvent::PeerDiscovered { name, addr })];
        actions.extend(Self::burst(link, self.config.punch_count, now));
        actions
    }

    fn on_ping(&mut self, from: SocketAddr, now: Instant) -> Vec<Action> {
        let mut actions = vec![];
        let no_peers = self.peers.is_empty();

        match self.peers.get_mut(&from) {
            Some(link) => {
                if link.phase == Phase::Failed {
                    link.phase = Phase::Punching;
                    link.bursts = 0;
                    link.last_burst = Some(now);
                }
            }
            None if no_peers => {
                log::debug!("adopting {} from its punch", from);
                let mut link = PeerLink::new(None, from);
                link.phase = Phase::Punching;
                link.last_burst = Some(now);
                self.peers.insert(from, link);
                self.latest = Some(from);
                self.timers.next_retry = None;
                self.discovery_failed = false;
                actions.push(Action::Emit(SessionEvent::PeerAdopted { addr: from }));
            }
            // other members are learned from their PEER notice
            None => log::trace!("answer punch from unannounced {}", from),
        }

        actions.push(Action::Send(from, Message::Pong));
        actions
    }

    fn on_pong(&mut self, from: SocketAddr) -> Vec<Action> {
        let link = match self.peers.get_mut(&from) {
            Some(link) => link,
            None => {
                log::trace!("pong from unknown {}", from);
                return vec![];
            }
        };

        if link.phase == Phase::Connected {
            return vec![];
        }

        log::debug!("hole punched to {}", from);
        link.phase = Phase::Connected;
        link.bursts = 0;

        vec![Action::Emit(SessionEvent::Connected {
            name: link.name.clone(),
            addr: from,
        })]
    }

    /// Drive retries and keepalives. Call periodically.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = vec![];

        if let Some(at) = self.timers.next_keepalive {
            if now >= at {
                actions.push(self.register());
                self.timers.next_keepalive = self.config.keepalive.map(|k| now + k);
            }
        }

        if let (Some(at), Some(backoff)) = (self.timers.next_retry, self.config.register_retry) {
            if now >= at && self.peers.is_empty() {
                if self.timers.attempts < backoff.max_attempts {
                    self.timers.attempts += 1;
                    log::debug!("no peer yet, register again ({})", self.timers.attempts);
                    actions.push(self.register());
                    self.timers.next_retry = Some(now + backoff.delay(self.timers.attempts));
                } else {
                    log::warn!("no peer discovered in room {}", self.config.room);
                    self.timers.next_retry = None;
                    self.discovery_failed = true;
                    actions.push(Action::Emit(SessionEvent::DiscoveryFailed));
                }
            }
        }

        if let Some(retries) = self.config.punch_retries {
            let max_bursts = retries.saturating_add(1);
            let timeout = self.config.punch_timeout;
            let count = self.config.punch_count;

            for link in self.peers.values_mut() {
                if link.phase != Phase::Punching {
                    continue;
                }
                let due = match link.last_burst {
                    Some(t) => now.saturating_duration_since(t) >= timeout,
                    None => true,
                };
                if !due {
                    continue;
                }

                if link.bursts >= max_bursts {
                    log::debug!("punching {} failed after {} bursts", link.addr, link.bursts);
                    link.phase = Phase::Failed;
                    actions.push(Action::Emit(SessionEvent::PeerFailed {
                        name: link.name.clone(),
                        addr: link.addr,
                    }));
                } else {
                    actions.extend(Self::burst(link, count, now));
                }
            }
        }

        actions
    }

    /// `PEER_KNOWN -> PUNCHING`: unacknowledged PINGs, no pacing.
    fn burst(link: &mut PeerLink, count: usize, now: Instant) -> Vec<Action> {
        link.phase = Phase::Punching;
        link.bursts += 1;
        link.last_burst = Some(now);

        (0..count)
            .map(|_| Action::Send(link.addr, Message::Ping))
            .collect()
    }

    fn register(&self) -> Action {
        Action::Send(
            self.config.rendezvous,
            Message::Register {
                name: self.config.name.clone(),
                room: self.config.room.clone(),
            },
        )
    }

    /// Departure notice for the rendezvous, once registered.
    pub fn bye(&self) -> Option<Action> {
        if self.phase == Phase::Init {
            return None;
        }

        Some(Action::Send(
            self.config.rendezvous,
            Message::Bye {
                name: self.config.name.clone(),
                room: self.config.room.clone(),
            },
        ))
    }

    pub fn phase(&self) -> Phase {
        match self.peers.values().map(|l| l.phase).max() {
            Some(p) => p,
            None if self.discovery_failed => Phase::Failed,
            None => self.phase,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Connected
    }

    /// The most recently discovered peer.
    pub fn peer(&self) -> Option<&PeerLink> {
        self.latest.and_then(|addr| self.peers.get(&addr))
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerLink> {
        self.peers.values()
    }

    /// First connected link, if any.
    pub fn connected_peer(&self) -> Option<&PeerLink> {
        self.peer()
            .filter(|l| l.phase == Phase::Connected)
            .or_else(|| self.peers.values().find(|l| l.phase == Phase::Connected))
    }

    /// Where application payloads go: every known peer that has not failed.
    pub fn payload_targets(&self) -> Vec<SocketAddr> {
        self.peers
            .values()
            .filter(|l| l.phase != Phase::Failed)
            .map(|l| l.addr)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RV: &str = "203.0.113.1:3478";

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn config() -> SessionConfig {
        SessionConfig::new("alice", "lobby", addr(RV))
    }

    fn started(config: SessionConfig, now: Instant) -> SessionState {
        let mut s = SessionState::new(config);
        s.start(now);
        s
    }

    fn pings_to(actions: &[Action], to: SocketAddr) -> usize {
        actions
            .iter()
            .filter(|a| **a == Action::Send(to, Message::Ping))
            .count()
    }

    fn sends(actions: &[Action]) -> Vec<(SocketAddr, Message)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send(to, m) => Some((*to, m.clone())),
                _ => None,
            })
            .collect()
    }

    fn peer_notice(name: &str, a: &str) -> Vec<u8> {
        Message::Peer {
            name: name.into(),
            addr: addr(a),
        }
        .encode()
    }

    #[test]
    fn start_registers_once() {
        let now = Instant::now();
        let mut s = SessionState::new(config());
        assert_eq!(s.phase(), Phase::Init);
        assert!(s.bye().is_none());

        let actions = s.start(now);
        assert_eq!(
            sends(&actions),
            vec![(
                addr(RV),
                Message::Register {
                    name: "alice".into(),
                    room: "lobby".into()
                }
            )]
        );
        assert_eq!(s.phase(), Phase::Registered);
        assert!(s.start(now).is_empty());
    }

    #[test]
    fn no_notice_waits_forever() {
        let now = Instant::now();
        let mut s = started(config(), now);
        assert!(s.on_tick(now + Duration::from_secs(3600)).is_empty());
        assert_eq!(s.phase(), Phase::Registered);
    }

    #[test]
    fn peer_notice_sends_five_pings() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");

        let actions = s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        assert_eq!(pings_to(&actions, bob), 5);
        assert_eq!(sends(&actions).len(), 5);
        assert!(actions.contains(&Action::Emit(SessionEvent::PeerDiscovered {
            name: "bob".into(),
            addr: bob
        })));
        assert_eq!(s.phase(), Phase::Punching);
        assert_eq!(s.peer().unwrap().addr, bob);
        assert_eq!(s.payload_targets(), vec![bob]);
    }

    #[test]
    fn peer_notice_from_stranger_is_payload() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let data = peer_notice("mallory", "10.6.6.6:1");

        let actions = s.on_datagram(&data, addr("10.0.0.9:9"), now);
        assert_eq!(
            actions,
            vec![Action::Emit(SessionEvent::Payload {
                from: addr("10.0.0.9:9"),
                data
            })]
        );
        assert!(s.peer().is_none());
    }

    #[test]
    fn ping_from_unknown_is_adopted() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");

        let actions = s.on_datagram(b"PING", bob, now);
        assert_eq!(sends(&actions), vec![(bob, Message::Pong)]);
        assert!(actions.contains(&Action::Emit(SessionEvent::PeerAdopted { addr: bob })));
        assert_eq!(s.peer().unwrap().addr, bob);
        assert_eq!(s.peer().unwrap().name, None);
        assert_eq!(s.phase(), Phase::Punching);
    }

    #[test]
    fn stranger_ping_after_discovery_is_not_adopted() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");
        let stranger = addr("198.51.100.66:4444");
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        s.on_datagram(b"PONG", bob, now);

        let actions = s.on_datagram(b"PING", stranger, now);
        assert_eq!(actions, vec![Action::Send(stranger, Message::Pong)]);
        assert_eq!(s.payload_targets(), vec![bob]);
        assert_eq!(s.peers().count(), 1);
        assert_eq!(s.peer().unwrap().addr, bob);
    }

    #[test]
    fn second_stranger_ping_is_only_answered() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let first = addr("10.0.0.2:6000");
        let second = addr("10.0.0.3:7000");
        s.on_datagram(b"PING", first, now);

        let actions = s.on_datagram(b"PING", second, now);
        assert_eq!(actions, vec![Action::Send(second, Message::Pong)]);
        assert_eq!(s.payload_targets(), vec![first]);
    }

    #[test]
    fn bad_notice_from_rendezvous_is_dropped() {
        let now = Instant::now();
        let mut s = started(config(), now);

        assert!(s.on_datagram(b"PEER bob", addr(RV), now).is_empty());
        assert!(s.on_datagram(b"PEER bob 10.0.0 1", addr(RV), now).is_empty());
        assert!(s.peer().is_none());
        assert_eq!(s.phase(), Phase::Registered);
    }

    #[test]
    fn ping_from_known_peer_only_pongs() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);

        let actions = s.on_datagram(b"PING\n", bob, now);
        assert_eq!(actions, vec![Action::Send(bob, Message::Pong)]);
    }

    #[test]
    fn pong_connects() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);

        let actions = s.on_datagram(b"PONG", bob, now);
        assert_eq!(
            actions,
            vec![Action::Emit(SessionEvent::Connected {
                name: Some("bob".into()),
                addr: bob
            })]
        );
        assert!(s.is_connected());
        assert_eq!(s.connected_peer().unwrap().addr, bob);

        // second pong is quiet
        assert!(s.on_datagram(b"PONG", bob, now).is_empty());
    }

    #[test]
    fn pong_from_unknown_is_ignored() {
        let now = Instant::now();
        let mut s = started(config(), now);
        assert!(s.on_datagram(b"PONG", addr("10.0.0.7:7"), now).is_empty());
        assert_eq!(s.phase(), Phase::Registered);
    }

    #[test]
    fn anything_else_is_payload() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");

        let cases: [&[u8]; 4] = [b"[bob] hi", b"PING twice", b"", b"REGISTER x y"];
        for data in cases {
            let actions = s.on_datagram(data, bob, now);
            assert_eq!(
                actions,
                vec![Action::Emit(SessionEvent::Payload {
                    from: bob,
                    data: data.to_vec()
                })]
            );
        }
    }

    #[test]
    fn relearns_moved_peer() {
        let now = Instant::now();
        let mut s = started(config(), now);
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        s.on_datagram(b"PONG", addr("10.0.0.2:6000"), now);

        let moved = addr("10.0.0.2:6001");
        let actions = s.on_datagram(&peer_notice("bob", "10.0.0.2:6001"), addr(RV), now);
        assert_eq!(pings_to(&actions, moved), 5);
        assert_eq!(s.peers().count(), 1);
        assert_eq!(s.peer().unwrap().addr, moved);
        assert_eq!(s.phase(), Phase::Punching);
    }

    #[test]
    fn repeated_notice_for_connected_peer_is_quiet() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        s.on_datagram(b"PONG", bob, now);

        let actions = s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        assert!(actions.is_empty());
        assert!(s.is_connected());
    }

    #[test]
    fn adopted_peer_gets_its_name_later() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");
        s.on_datagram(b"PING", bob, now);

        let actions = s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        assert_eq!(pings_to(&actions, bob), 5);
        assert_eq!(s.peers().count(), 1);
        assert_eq!(s.peer().unwrap().name.as_deref(), Some("bob"));
    }

    #[test]
    fn tracks_several_peers() {
        let now = Instant::now();
        let mut s = started(config(), now);
        let bob = addr("10.0.0.2:6000");
        let carol = addr("10.0.0.3:7000");
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        s.on_datagram(&peer_notice("carol", "10.0.0.3:7000"), addr(RV), now);

        assert_eq!(s.peer().unwrap().addr, carol);
        s.on_datagram(b"PONG", bob, now);
        assert!(s.is_connected());
        assert_eq!(s.connected_peer().unwrap().addr, bob);

        let mut targets = s.payload_targets();
        targets.sort();
        assert_eq!(targets, vec![bob, carol]);
    }

    #[test]
    fn bounded_punching_fails() {
        let now = Instant::now();
        let timeout = Duration::from_millis(500);
        let mut s = started(config().punch_retries(2, timeout), now);
        let bob = addr("10.0.0.2:6000");
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);

        assert!(s.on_tick(now + Duration::from_millis(100)).is_empty());

        let t1 = now + timeout;
        assert_eq!(pings_to(&s.on_tick(t1), bob), 5);
        let t2 = t1 + timeout;
        assert_eq!(pings_to(&s.on_tick(t2), bob), 5);

        let actions = s.on_tick(t2 + timeout);
        assert_eq!(
            actions,
            vec![Action::Emit(SessionEvent::PeerFailed {
                name: Some("bob".into()),
                addr: bob
            })]
        );
        assert_eq!(s.phase(), Phase::Failed);
        assert!(s.payload_targets().is_empty());

        // a late punch from the peer revives it
        s.on_datagram(b"PING", bob, t2 + timeout);
        assert_eq!(s.phase(), Phase::Punching);
    }

    #[test]
    fn bounded_punching_stops_when_connected() {
        let now = Instant::now();
        let timeout = Duration::from_millis(500);
        let mut s = started(config().punch_retries(1, timeout), now);
        let bob = addr("10.0.0.2:6000");
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);
        s.on_datagram(b"PONG", bob, now);

        assert!(s.on_tick(now + timeout * 10).is_empty());
        assert!(s.is_connected());
    }

    #[test]
    fn adopted_peer_is_punched_when_retries_enabled() {
        let now = Instant::now();
        let timeout = Duration::from_millis(500);
        let mut s = started(config().punch_retries(1, timeout), now);
        let bob = addr("10.0.0.2:6000");
        s.on_datagram(b"PING", bob, now);

        assert_eq!(pings_to(&s.on_tick(now + timeout), bob), 5);
    }

    #[test]
    fn register_retry_then_discovery_fails() {
        let now = Instant::now();
        let initial = Duration::from_secs(1);
        let mut s = started(config().register_retry(initial, 2), now);
        let register = Action::Send(
            addr(RV),
            Message::Register {
                name: "alice".into(),
                room: "lobby".into(),
            },
        );

        // delays carry up to 10% jitter, so step well past each deadline
        let t1 = now + Duration::from_millis(1200);
        assert_eq!(s.on_tick(t1), vec![register.clone()]);
        assert!(s.on_tick(t1 + Duration::from_millis(100)).is_empty());

        let t2 = t1 + Duration::from_millis(2300);
        assert_eq!(s.on_tick(t2), vec![register]);

        let t3 = t2 + Duration::from_millis(4500);
        assert_eq!(
            s.on_tick(t3),
            vec![Action::Emit(SessionEvent::DiscoveryFailed)]
        );
        assert_eq!(s.phase(), Phase::Failed);

        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), t3);
        assert_eq!(s.phase(), Phase::Punching);
    }

    #[test]
    fn register_retry_stops_after_discovery() {
        let now = Instant::now();
        let mut s = started(config().register_retry(Duration::from_secs(1), 5), now);
        s.on_datagram(&peer_notice("bob", "10.0.0.2:6000"), addr(RV), now);

        assert!(s.on_tick(now + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn keepalive_reregisters() {
        let now = Instant::now();
        let interval = Duration::from_secs(10);
        let mut s = started(config().keepalive(interval), now);

        assert!(s.on_tick(now + Duration::from_secs(5)).is_empty());
        let actions = s.on_tick(now + interval);
        assert_eq!(sends(&actions).len(), 1);
        assert!(matches!(sends(&actions)[0].1, Message::Register { .. }));
        assert!(s.on_tick(now + interval + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::PeerKnown.to_string(), "peer-known");
        assert_eq!(Phase::Connected.to_string(), "connected");
        assert!(Phase::Connected > Phase::Punching);
        assert!(Phase::Failed < Phase::PeerKnown);
    }
}
