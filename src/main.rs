use std::io::{self, BufRead, ErrorKind, Result};
use std::net::SocketAddr;
use std::sync::mpsc::Receiver;
use std::thread::spawn;
use std::time::Duration;
use structopt::StructOpt;

use roompunch::udp::{resolve, Client, Server, SessionConfig, SessionEvent, DEFAULT_PORT};

#[derive(StructOpt, Debug)]
#[structopt(name = "roompunch")]
enum Opt {
    /// Run the rendezvous server
    Server(ServerOpt),
    /// Join a room and chat with whoever else is in it
    Peer(PeerOpt),
}

#[derive(StructOpt, Debug)]
struct ServerOpt {
    #[structopt(long = "listen-addr")]
    listen_addr: Option<SocketAddr>,

    /// Forget members that have not registered again within this many seconds
    #[structopt(long = "ttl")]
    ttl: Option<u64>,
}

#[derive(StructOpt, Debug)]
struct PeerOpt {
    #[structopt(long = "name")]
    name: String,

    #[structopt(long = "room")]
    room: String,

    /// Rendezvous server, ip:port
    #[structopt(long = "rendezvous")]
    rendezvous: String,

    #[structopt(long = "bind")]
    bind: Option<SocketAddr>,

    /// Register again every this many seconds
    #[structopt(long = "keepalive")]
    keepalive: Option<u64>,

    /// Register again with exponential backoff this many times while nobody is around
    #[structopt(long = "register-retries")]
    register_retries: Option<u32>,

    /// Bursts to resend to a peer that does not answer before giving up on it
    #[structopt(long = "punch-retries")]
    punch_retries: Option<u32>,

    /// Milliseconds to wait for an answer to a burst
    #[structopt(long = "punch-timeout", default_value = "2000")]
    punch_timeout: u64,
}

fn main() -> Result<()> {
    env_logger::init();

    let opt: Opt = StructOpt::from_args();

    match opt {
        Opt::Server(opt) => run_server(opt),
        Opt::Peer(opt) => run_peer(opt),
    }
}

fn run_server(opt: ServerOpt) -> Result<()> {
    let listen_addr = opt
        .listen_addr
        .unwrap_or_else(|| ([0, 0, 0, 0], DEFAULT_PORT).into());

    let mut s = Server::new(listen_addr)?;
    if let Some(ttl) = opt.ttl {
        s = s.with_ttl(Duration::from_secs(ttl));
    }

    println!("Rendezvous server listening on UDP {}", s.local_addr()?);
    s.run()
}

fn run_peer(opt: PeerOpt) -> Result<()> {
    let rendezvous = resolve(&opt.rendezvous)?;

    let mut config = SessionConfig::new(&opt.name, &opt.room, rendezvous);
    if let Some(secs) = opt.keepalive {
        config = config.keepalive(Duration::from_secs(secs));
    }
    if let Some(n) = opt.register_retries {
        config = config.register_retry(Duration::from_secs(1), n);
    }
    if let Some(n) = opt.punch_retries {
        config = config.punch_retries(n, Duration::from_millis(opt.punch_timeout));
    }

    let mut client = Client::new(config, opt.bind)?;
    let events = client.start()?;
    println!("[{}] Registered with rendezvous", opt.name);

    {
        let name = opt.name.clone();
        spawn(move || print_events(&name, events));
    }

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim() == "/quit" {
            break;
        }

        let chat = format!("[{}] {}", opt.name, line);
        match client.send(chat.as_bytes()) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotConnected => println!("[waiting for peer...]"),
            Err(e) => log::warn!("send failed: {}", e),
        }
    }

    client.shutdown();
    Ok(())
}

fn print_events(name: &str, events: Receiver<SessionEvent>) {
    for event in events {
        match event {
            SessionEvent::Registered => {}
            SessionEvent::PeerDiscovered { name: peer, addr } => {
                println!("[{}] Discovered peer {} at {}", name, peer, addr)
            }
            SessionEvent::PeerAdopted { addr } => println!("[{}] Punched by {}", name, addr),
            SessionEvent::Connected { addr, .. } => {
                println!("[{}] UDP hole punching successful with {}", name, addr)
            }
            SessionEvent::PeerFailed { addr, .. } => {
                println!("[{}] Gave up punching to {}", name, addr)
            }
            SessionEvent::DiscoveryFailed => println!("[{}] Nobody else showed up", name),
            SessionEvent::Payload { data, .. } => println!("{}", String::from_utf8_lossy(&data)),
        }
    }
}
