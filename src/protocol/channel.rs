//! Framed command channel over any byte stream.
//!
//! One side sends a command and reads the full response sequence before
//! sending the next; the channel itself is just frame-at-a-time reads and
//! buffered writes. Works over stdio for a remote peer or a duplex pipe for
//! an in-process one.

use crate::protocol::message::{Message, MessageCode, MAX_FRAME_SIZE};
use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};

/// Read a single frame from the stream.
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message> {
    let len = r.read_u32().await.context("Failed to read frame length")?;

    // Validate frame size before allocation
    if len > MAX_FRAME_SIZE {
        anyhow::bail!(
            "Frame size {} exceeds maximum allowed size {}",
            len,
            MAX_FRAME_SIZE
        );
    }

    let code = r.read_u8().await.context("Failed to read message code")?;
    let code = MessageCode::from_u8(code)
        .ok_or(crate::error::SyncError::UnknownCommand(code))?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)
        .await
        .context("Failed to read frame payload")?;

    Message::decode(code, Bytes::from(payload))
}

/// Write a message without flushing; callers flush once per response sequence.
pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<()> {
    w.write_all(&msg.encode())
        .await
        .context("Failed to write frame")?;
    Ok(())
}

/// Both halves of an endpoint's connection.
pub struct Channel<R, W> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Channel<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    pub async fn recv(&mut self) -> Result<Message> {
        read_message(&mut self.reader).await
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        write_message(&mut self.writer, msg).await
    }

    /// Send a batch of frames then flush - a full response sequence.
    pub async fn send_all(&mut self, msgs: &[Message]) -> Result<()> {
        for msg in msgs {
            self.send(msg).await?;
        }
        self.flush().await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await.context("Failed to flush channel")?;
        Ok(())
    }

    /// Send one message and read one reply; the handshake pattern.
    pub async fn request(&mut self, msg: &Message) -> Result<Message> {
        self.send(msg).await?;
        self.flush().await?;
        self.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{KeyTuple, Value};

    #[tokio::test]
    async fn test_channel_roundtrip_over_duplex() {
        let (a, b) = tokio::io::duplex(4096);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        let mut left = Channel::new(ar, aw);
        let mut right = Channel::new(br, bw);

        let open = Message::Open("footbl".into());
        left.send_all(std::slice::from_ref(&open)).await.unwrap();
        assert_eq!(right.recv().await.unwrap(), open);

        let reply = vec![
            Message::RowsCurr(KeyTuple(vec![Value::Int(2)])),
            Message::Row(vec![Value::Int(2), Value::Text("test".into())]),
            Message::Row(vec![]),
        ];
        right.send_all(&reply).await.unwrap();
        for expected in reply {
            assert_eq!(left.recv().await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_unknown_code_is_fatal() {
        let (a, b) = tokio::io::duplex(64);
        let (_ar, mut aw) = tokio::io::split(a);
        let (mut br, _bw) = tokio::io::split(b);

        // len=0, code=200 (unassigned)
        aw.write_all(&[0, 0, 0, 0, 200]).await.unwrap();
        aw.flush().await.unwrap();

        let err = read_message(&mut br).await.unwrap_err();
        assert!(err.to_string().contains("Unknown command 200"));
    }
}
