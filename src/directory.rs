//! In-memory table of rooms and their member endpoints.
//!
//! Holds no locks; the owner serializes access.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Where a named member was last seen.
///
/// The address is authoritative only as of `registered_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub name: String,
    pub addr: SocketAddr,
    pub registered_at: Instant,
}

type Room = HashMap<String, PeerEndpoint>;

#[derive(Debug, Default)]
pub struct Directory {
    rooms: HashMap<String, Room>,
    ttl: Option<Duration>,
}

impl Directory {
    /// Members never expire.
    pub fn new() -> Self {
        Self::default()
    }

    /// Members not re-registered within `ttl` are no longer announced, and are
    /// dropped on the next [`sweep`](Self::sweep).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            rooms: Default::default(),
            ttl: Some(ttl),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Insert or overwrite `name` in `room`, creating the room on first use.
    ///
    /// Returns every other live member: the peers the joiner should be told
    /// about, and those the joiner should be announced to.
    pub fn upsert(
        &mut self,
        room: &str,
        name: &str,
        addr: SocketAddr,
        now: Instant,
    ) -> Vec<PeerEndpoint> {
        let members = self.rooms.entry(room.to_string()).or_default();
        let ep = members.entry(name.to_string()).or_insert_with(|| PeerEndpoint {
            name: name.to_string(),
            addr,
            registered_at: now,
        });
        ep.addr = addr;
        ep.registered_at = now;

        self.members_excluding(room, name, now).cloned().collect()
    }

    /// Every other live member of `room`, in no particular order.
    pub fn members_excluding<'a>(
        &'a self,
        room: &str,
        name: &'a str,
        now: Instant,
    ) -> impl Iterator<Item = &'a PeerEndpoint> + 'a {
        let ttl = self.ttl;
        self.rooms
            .get(room)
            .into_iter()
            .flat_map(|members| members.values())
            .filter(move |ep| ep.name != name && is_live(ep, ttl, now))
    }

    pub fn get(&self, room: &str, name: &str) -> Option<&PeerEndpoint> {
        self.rooms.get(room).and_then(|members| members.get(name))
    }

    pub fn remove(&mut self, room: &str, name: &str) -> Option<PeerEndpoint> {
        let members = self.rooms.get_mut(room)?;
        let ep = members.remove(name);
        if members.is_empty() {
            self.rooms.remove(room);
        }
        ep
    }

    /// Drop expired members and empty rooms, returning how many members went.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let ttl = match self.ttl {
            Some(ttl) => ttl,
            None => return 0,
        };

        let mut removed = 0;
        self.rooms.retain(|room, members| {
            members.retain(|name, ep| {
                let live = is_live(ep, Some(ttl), now);
                if !live {
                    log::debug!("expired {} in room {}", name, room);
                    removed += 1;
                }
                live
            });
            !members.is_empty()
        });

        removed
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn member_count(&self) -> usize {
        self.rooms.values().map(|m| m.len()).sum()
    }
}

fn is_live(ep: &PeerEndpoint, ttl: Option<Duration>, now: Instant) -> bool {
    match ttl {
        Some(ttl) => now.saturating_duration_since(ep.registered_at) <= ttl,
        None => true,
    }
}
