use std::io::{Error, ErrorKind, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::MAX_FRAME;

pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(w: &mut W, buf: &[u8]) -> Result<()> {
    if buf.len() > MAX_FRAME {
        return Err(Error::new(ErrorKind::InvalidInput, "frame too large"));
    }

    w.write_all(&(buf.len() as u32).to_be_bytes()).await?;
    w.write_all(buf).await?;
    w.flush().await
}

pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    r.read_exact(&mut len).await?;

    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME {
        return Err(Error::new(ErrorKind::InvalidData, "invalid frame size"));
    }

    let mut buf = vec![0; len];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn send_message<W: AsyncWrite + Unpin + ?Sized>(w: &mut W, text: &str) -> Result<()> {
    write_frame(w, text.as_bytes()).await
}

pub async fn recv_message<R: AsyncRead + Unpin + ?Sized>(r: &mut R) -> Result<String> {
    String::from_utf8(read_frame(r).await?)
        .map_err(|_| Error::new(ErrorKind::InvalidData, "message is not utf-8"))
}
