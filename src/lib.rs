//!Room based rendezvous and UDP hole punching for peers behind NAT.
//!
//!Two peers behind NATs can not reach each other until both have sent traffic out toward the other.
//!Neither can learn its own public address either, only a third party can observe it.
//!
//!## How it works
//!Setup a public accessable rendezvous server. Peers register a name in a room with `REGISTER <name> <room>`,
//!and the server records the address it observed the datagram come from.
//!
//!Whenever someone registers, the server tells the joiner about every other member of the room,
//!and tells every other member about the joiner, with `PEER <name> <ip> <port>` notices.
//!
//!On a notice both peers fire a burst of `PING`s straight at each other. The first of those to make it through
//!finds a hole the other side's own outbound `PING`s already opened, and gets a `PONG` back.
//!A `PONG` confirms the path works both ways, after that the rendezvous server is out of the loop.
//!
//!The essential is, a peer must use the same socket to talk with the rendezvous server and with its peers,
//!so the address the server observed is the one the NAT maps for the peer.
//!
//!Symmetric NATs, which map a new public port per destination, defeat this and are not handled.
//!
//!## Feature flags
//!For convenient, the crate include both client and server code by default.
//!Mostly you only use client or server code, set features to `client` or `server` instead.
//!
//!```toml
//!roompunch = { version = "0.1", default-features=false, features=["client"]}
//!```
//!
//!- `client`: udp hole punching peer
//!- `server`: rendezvous server
//!- `async`: tokio variants of the [`tcp`] framing helpers

pub mod directory;
pub mod proto;
pub mod tcp;
pub mod udp;
