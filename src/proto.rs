//! Text wire protocol.
//!
//! One message per datagram, space separated ASCII tokens:
//!
//! | message                    | direction          |
//! |----------------------------|--------------------|
//! | `REGISTER <name> <room>`   | peer -> rendezvous |
//! | `BYE <name> <room>`        | peer -> rendezvous |
//! | `PEER <name> <ip> <port>`  | rendezvous -> peer |
//! | `PING`                     | peer <-> peer      |
//! | `PONG`                     | peer <-> peer      |
//!
//! Anything else exchanged between peers is an opaque application payload.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Largest datagram either side expects to receive.
pub const MAX_DATAGRAM: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Register { name: String, room: String },
    Bye { name: String, room: String },
    Peer { name: String, addr: SocketAddr },
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ParseError {
    #[error("empty datagram")]
    Empty,

    #[error("datagram is not valid utf-8")]
    Utf8,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("missing field {0}")]
    MissingField(&'static str),

    /// `PING` and `PONG` carry nothing after the command.
    #[error("unexpected trailing data after {0}")]
    TrailingData(&'static str),

    #[error("invalid ip address {0:?}")]
    InvalidIp(String),

    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

impl Message {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(buf).map_err(|_| ParseError::Utf8)?;
        let mut tokens = text.split_whitespace();

        let cmd = tokens.next().ok_or(ParseError::Empty)?;
        match cmd {
            "REGISTER" => {
                let name = field(tokens.next(), "name")?;
                let room = field(tokens.next(), "room")?;
                Ok(Message::Register { name, room })
            }
            "BYE" => {
                let name = field(tokens.next(), "name")?;
                let room = field(tokens.next(), "room")?;
                Ok(Message::Bye { name, room })
            }
            "PEER" => {
                let name = field(tokens.next(), "name")?;
                let ip = field(tokens.next(), "ip")?;
                let port = field(tokens.next(), "port")?;

                let ip: IpAddr = ip.parse().map_err(|_| ParseError::InvalidIp(ip))?;
                let port: u16 = port.parse().map_err(|_| ParseError::InvalidPort(port))?;

                Ok(Message::Peer {
                    name,
                    addr: SocketAddr::new(ip, port),
                })
            }
            "PING" => bare(tokens.next(), "PING", Message::Ping),
            "PONG" => bare(tokens.next(), "PONG", Message::Pong),
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

fn field(token: Option<&str>, what: &'static str) -> Result<String, ParseError> {
    token
        .map(str::to_string)
        .ok_or(ParseError::MissingField(what))
}

fn bare(next: Option<&str>, what: &'static str, msg: Message) -> Result<Message, ParseError> {
    match next {
        None => Ok(msg),
        Some(_) => Err(ParseError::TrailingData(what)),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Register { name, room } => write!(f, "REGISTER {} {}", name, room),
            Message::Bye { name, room } => write!(f, "BYE {} {}", name, room),
            Message::Peer { name, addr } => write!(f, "PEER {} {} {}", name, addr.ip(), addr.port()),
            Message::Ping => write!(f, "PING"),
            Message::Pong => write!(f, "PONG"),
        }
    }
}
