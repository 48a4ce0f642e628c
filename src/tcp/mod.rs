//! Length prefixed message framing over a reliable stream.
//!
//! Each frame is a 4 byte big endian length followed by that many bytes.
//!
//! use `send_message`/`recv_message` over [`std::io`] streams such as
//! [`std::net::TcpStream`], and the `async` feature variants over tokio streams.

mod frame;
pub use frame::{read_frame, recv_message, send_message, write_frame, MAX_FRAME};

#[cfg(feature = "async")]
mod frame_async;
#[cfg(feature = "async")]
pub use frame_async::{
    read_frame as read_frame_async, recv_message as recv_message_async,
    send_message as send_message_async, write_frame as write_frame_async,
};
