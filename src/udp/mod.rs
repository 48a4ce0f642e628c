//! UDP rendezvous and hole punching.
//!
//! use `Server` to run the rendezvous point.
//!
//! use `Client` to join a room and punch to the other members.

pub mod session;
pub use session::{PeerLink, Phase, SessionConfig, SessionEvent};

#[cfg(feature = "client")]
mod client;
#[cfg(feature = "client")]
pub use client::{resolve, Client};

#[cfg(feature = "server")]
mod server;
#[cfg(feature = "server")]
pub use server::{Server, DEFAULT_PORT};
