//! Framing spoken on each yamux stream of the demo transport.
//!
//! Every stream carries exactly one sender link. The client opens the stream
//! with an attach frame, the server answers with a single ack byte, and from
//! then on each message frame is answered by one ack byte, in order.
//!
//! # Frame Format
//!
//! All integers are big-endian. Strings are UTF-8, prefixed by a `u16` length.
//!
//! ```text
//! +----------------+-------------------------------------------+
//! | Length (u32)   |                  Body                     |
//! +----------------+-------------------------------------------+
//!
//! Attach body:   address | name (empty = none) | count (u16) | count x (key | value)
//! Message body:  message id (empty = none) | payload bytes up to the end of the frame
//! ```
//!
//! # Ack Byte
//!
//! ```text
//! 0x00 Accepted    0x01 Released    0x02 Rejected    0x03 Modified
//! ```

use std::io;

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::LinkOptions;
use crate::error::{TransportError, TransportErrorKind, TransportResult};
use crate::message::{DeliveryState, Message};

/// Largest accepted frame body in bytes.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame length prefix size in bytes.
const FRAME_HEADER_SIZE: usize = 4;

/// Reply byte sent by the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ack {
    /// Attach granted, or message accepted.
    Accepted = 0x00,

    /// Message released without processing.
    Released = 0x01,

    /// Attach refused, or message rejected.
    Rejected = 0x02,

    /// Message modified by the receiver.
    Modified = 0x03,
}

impl Ack {
    /// Converts a byte to an Ack.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Accepted),
            0x01 => Some(Self::Released),
            0x02 => Some(Self::Rejected),
            0x03 => Some(Self::Modified),
            _ => None,
        }
    }

    /// Maps the ack of a message to its send outcome.
    pub fn into_outcome(self) -> TransportResult<DeliveryState> {
        match self {
            Ack::Accepted => Ok(DeliveryState::Accepted),
            Ack::Released => Ok(DeliveryState::Released),
            Ack::Modified => Ok(DeliveryState::Modified),
            Ack::Rejected => Err(TransportError::new(
                TransportErrorKind::Rejected,
                "message rejected by remote",
            )),
        }
    }
}

/// A decoded attach frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub address: String,
    pub options: LinkOptions,
}

pub async fn write_attach<W>(writer: &mut W, address: &str, options: &LinkOptions) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut body = Vec::new();
    put_str(&mut body, address)?;
    put_str(&mut body, options.name.as_deref().unwrap_or(""))?;

    let count = u16::try_from(options.properties.len())
        .map_err(|_| invalid("too many attach properties"))?;
    body.extend_from_slice(&count.to_be_bytes());
    for (key, value) in &options.properties {
        put_str(&mut body, key)?;
        put_str(&mut body, value)?;
    }

    write_frame(writer, &body).await
}

/// Reads an attach frame. Returns `None` if the stream ended cleanly first.
pub async fn read_attach<R>(reader: &mut R) -> io::Result<Option<AttachRequest>>
where
    R: AsyncRead + Unpin,
{
    let Some(frame) = read_frame(reader).await? else {
        return Ok(None);
    };

    let mut body = FrameReader::new(&frame);
    let address = body.string()?;
    let name = body.string()?;
    let count = body.u16()?;

    let mut options = LinkOptions::new();
    if !name.is_empty() {
        options = options.with_name(name);
    }
    for _ in 0..count {
        let key = body.string()?;
        let value = body.string()?;
        options = options.with_property(key, value);
    }
    body.finish()?;

    Ok(Some(AttachRequest { address, options }))
}

/// Checks that `message` fits in a single message frame.
pub fn check_message(message: &Message) -> io::Result<()> {
    let id = message.message_id.as_deref().unwrap_or("");
    if id.len() > u16::MAX as usize {
        return Err(invalid(format!("message id of {} bytes is too long", id.len())));
    }

    let len = 2 + id.len() + message.body.len();
    if len > MAX_FRAME_LEN {
        return Err(invalid(format!(
            "message of {} bytes exceeds the {} byte frame limit",
            len, MAX_FRAME_LEN
        )));
    }
    Ok(())
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    check_message(message)?;

    let id = message.message_id.as_deref().unwrap_or("");
    let mut body = Vec::with_capacity(2 + id.len() + message.body.len());
    put_str(&mut body, id)?;
    body.extend_from_slice(&message.body);

    write_frame(writer, &body).await
}

/// Reads a message frame. Returns `None` if the stream ended cleanly first.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    let Some(frame) = read_frame(reader).await? else {
        return Ok(None);
    };

    let mut body = FrameReader::new(&frame);
    let id = body.string()?;
    let mut message = Message::new(body.rest());
    if !id.is_empty() {
        message = message.with_message_id(id);
    }

    Ok(Some(message))
}

pub async fn write_ack<W>(writer: &mut W, ack: Ack) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[ack as u8]).await?;
    writer.flush().await
}

/// Reads one ack byte. Returns `None` on end of stream.
pub async fn read_ack<R>(reader: &mut R) -> io::Result<Option<Ack>>
where
    R: AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    if reader.read(&mut byte).await? == 0 {
        return Ok(None);
    }
    Ack::from_u8(byte[0])
        .map(Some)
        .ok_or_else(|| invalid(format!("unknown ack byte {:#04x}", byte[0])))
}

async fn write_frame<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_LEN {
        return Err(invalid(format!(
            "frame of {} bytes exceeds the {} byte limit",
            body.len(),
            MAX_FRAME_LEN
        )));
    }

    let len = body.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];

    // End of stream is clean only on a frame boundary.
    let n = reader.read(&mut header).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut header[n..]).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(invalid(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

fn put_str(buf: &mut Vec<u8>, value: &str) -> io::Result<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| invalid(format!("string of {} bytes is too long", value.len())))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

struct FrameReader<'a> {
    rest: &'a [u8],
}

impl<'a> FrameReader<'a> {
    fn new(frame: &'a [u8]) -> Self {
        Self { rest: frame }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.rest.len() < n {
            return Err(invalid("truncated frame"));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn u16(&mut self) -> io::Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self) -> io::Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| invalid("string is not valid UTF-8"))
    }

    fn rest(self) -> &'a [u8] {
        self.rest
    }

    fn finish(self) -> io::Result<()> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(invalid(format!("{} trailing bytes in frame", self.rest.len())))
        }
    }
}
