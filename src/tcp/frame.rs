use std::io::{Error, ErrorKind, Read, Result, Write};

/// Frames larger than this are refused on both ends.
pub const MAX_FRAME: usize = 1 << 20;

pub fn write_frame<W: Write + ?Sized>(w: &mut W, buf: &[u8]) -> Result<()> {
    if buf.len() > MAX_FRAME {
        return Err(Error::new(ErrorKind::InvalidInput, "frame too large"));
    }

    w.write_all(&(buf.len() as u32).to_be_bytes())?;
    w.write_all(buf)?;
    w.flush()
}

/// Fails with `UnexpectedEof` if the stream ends before the frame does.
pub fn read_frame<R: Read + ?Sized>(r: &mut R) -> Result<Vec<u8>> {
    let mut len = [0u8; 4];
    r.read_exact(&mut len)?;

    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_FRAME {
        return Err(Error::new(ErrorKind::InvalidData, "invalid frame size"));
    }

    let mut buf = vec![0; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn send_message<W: Write + ?Sized>(w: &mut W, text: &str) -> Result<()> {
    write_frame(w, text.as_bytes())
}

pub fn recv_message<R: Read + ?Sized>(r: &mut R) -> Result<String> {
    String::from_utf8(read_frame(r)?)
        .map_err(|_| Error::new(ErrorKind::InvalidData, "message is not utf-8"))
}
