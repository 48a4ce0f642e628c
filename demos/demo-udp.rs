use roompunch::udp::{Client, Server, SessionConfig, SessionEvent};
use std::error::Error;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn Error>> {
    let server_addr: SocketAddr = "127.0.0.1:3478".parse()?;

    {
        let server = Server::new(server_addr)?;
        thread::spawn(move || server.run().unwrap());
    }

    let local: SocketAddr = "127.0.0.1:0".parse()?;

    let mut c1 = Client::new(SessionConfig::new("c1", "lobby", server_addr), Some(local))?;
    let c1_events = c1.start()?;

    let mut c2 = Client::new(
        SessionConfig::new("c2", "lobby", server_addr)
            .register_retry(Duration::from_millis(500), 5),
        Some(local),
    )?;
    let _c2_events = c2.start()?;

    let peer = c2
        .wait_connected(Duration::from_secs(10))
        .ok_or("hole punching failed")?;
    println!("c2 connected to {}", peer);

    c2.send(b"hello")?;

    for event in c1_events {
        if let SessionEvent::Payload { data, .. } = event {
            assert_eq!(data, b"hello");
            break;
        }
    }

    Ok(())
}
