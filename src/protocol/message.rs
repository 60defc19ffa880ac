//! Wire messages for the sync protocol.
//!
//! Wire format: all multi-byte integers are big-endian.
//! Strings are length-prefixed (u16 len + UTF-8).
//! Frame format: len:u32 | code:u8 | payload
//!
//! Command codes are wire-stable. Codes below 64 initiate exchanges; the
//! auxiliary codes (ROW, TOKEN, ACK) only ever appear inside a response
//! sequence. A response may span several frames - a rows response is the
//! echoed range command, the row frames, an empty-row terminator, and the
//! follow-up proposal - so readers consume frames independently rather than
//! assuming one frame per reply.

use crate::diff::hasher::RowHash;
use crate::schema::Database;
use crate::value::{decode_values, encode_values, encoded_values_len, KeyTuple, Row};
use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// The one protocol version this build speaks. Both ends must agree exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame size (64MB) - prevents OOM from malicious/corrupted frames
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

// =============================================================================
// Message codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageCode {
    Quit = 0,
    Open = 1,
    RowsCurr = 2,
    RowsNext = 3,
    HashCurr = 4,
    HashNext = 5,
    Protocol = 32,
    ExportSnapshot = 33,
    ImportSnapshot = 34,
    UnholdSnapshot = 35,
    WithoutSnapshot = 36,
    Schema = 37,
    Row = 64,
    Token = 65,
    Ack = 66,
}

impl MessageCode {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Quit),
            1 => Some(Self::Open),
            2 => Some(Self::RowsCurr),
            3 => Some(Self::RowsNext),
            4 => Some(Self::HashCurr),
            5 => Some(Self::HashNext),
            32 => Some(Self::Protocol),
            33 => Some(Self::ExportSnapshot),
            34 => Some(Self::ImportSnapshot),
            35 => Some(Self::UnholdSnapshot),
            36 => Some(Self::WithoutSnapshot),
            37 => Some(Self::Schema),
            64 => Some(Self::Row),
            65 => Some(Self::Token),
            66 => Some(Self::Ack),
            _ => None,
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Orderly session termination.
    Quit,
    /// Begin a table session; the reply is the first hash proposal (or the
    /// terminal for an empty table).
    Open(String),
    /// Range `(prev_key, last_key]` without advancing the cursor first.
    RowsCurr(KeyTuple),
    /// Advance the cursor to the previous bound, then range to `last_key`.
    RowsNext(KeyTuple),
    /// Assert the hash of `(prev_key, last_key]` without advancing first.
    HashCurr(KeyTuple, RowHash),
    /// Advance the cursor, then assert the hash of the next range.
    HashNext(KeyTuple, RowHash),
    /// Version handshake; first message on every connection.
    Protocol(u32),
    ExportSnapshot,
    ImportSnapshot(String),
    UnholdSnapshot,
    WithoutSnapshot,
    /// Table list request (destination -> source).
    SchemaRequest,
    /// Table list reply (source -> destination).
    SchemaReply(Database),
    /// One row of data inside a rows response; an empty row terminates the
    /// range.
    Row(Row),
    /// Snapshot token reply to EXPORT_SNAPSHOT.
    Token(String),
    /// Empty acknowledgement for the snapshot commands that carry no payload.
    Ack,
}

impl Message {
    pub fn code(&self) -> MessageCode {
        match self {
            Message::Quit => MessageCode::Quit,
            Message::Open(_) => MessageCode::Open,
            Message::RowsCurr(_) => MessageCode::RowsCurr,
            Message::RowsNext(_) => MessageCode::RowsNext,
            Message::HashCurr(..) => MessageCode::HashCurr,
            Message::HashNext(..) => MessageCode::HashNext,
            Message::Protocol(_) => MessageCode::Protocol,
            Message::ExportSnapshot => MessageCode::ExportSnapshot,
            Message::ImportSnapshot(_) => MessageCode::ImportSnapshot,
            Message::UnholdSnapshot => MessageCode::UnholdSnapshot,
            Message::WithoutSnapshot => MessageCode::WithoutSnapshot,
            Message::SchemaRequest | Message::SchemaReply(_) => MessageCode::Schema,
            Message::Row(_) => MessageCode::Row,
            Message::Token(_) => MessageCode::Token,
            Message::Ack => MessageCode::Ack,
        }
    }

    /// Encode as a complete frame (header included).
    pub fn encode(&self) -> Bytes {
        match self {
            Message::Quit
            | Message::ExportSnapshot
            | Message::UnholdSnapshot
            | Message::WithoutSnapshot
            | Message::SchemaRequest
            | Message::Ack => frame(self.code(), |_| {}, 0),

            Message::Open(table) => encode_string_frame(self.code(), table),
            Message::ImportSnapshot(token) => encode_string_frame(self.code(), token),
            Message::Token(token) => encode_string_frame(self.code(), token),

            Message::RowsCurr(key) | Message::RowsNext(key) => frame(
                self.code(),
                |buf| encode_values(buf, key.values()),
                encoded_values_len(key.values()),
            ),

            Message::HashCurr(key, hash) | Message::HashNext(key, hash) => frame(
                self.code(),
                |buf| {
                    encode_values(buf, key.values());
                    buf.put_u16(hash.0.len() as u16);
                    buf.put_slice(&hash.0);
                },
                encoded_values_len(key.values()) + 2 + hash.0.len(),
            ),

            Message::Protocol(version) => frame(self.code(), |buf| buf.put_u32(*version), 4),

            Message::SchemaReply(database) => {
                let json = serde_json::to_vec(database).expect("schema serialization");
                frame(self.code(), |buf| buf.put_slice(&json), json.len())
            }

            Message::Row(row) => frame(
                self.code(),
                |buf| encode_values(buf, row),
                encoded_values_len(row),
            ),
        }
    }

    /// Decode a frame's payload for a known code.
    pub fn decode(code: MessageCode, mut payload: Bytes) -> Result<Self> {
        match code {
            MessageCode::Quit => Ok(Message::Quit),
            MessageCode::ExportSnapshot => Ok(Message::ExportSnapshot),
            MessageCode::UnholdSnapshot => Ok(Message::UnholdSnapshot),
            MessageCode::WithoutSnapshot => Ok(Message::WithoutSnapshot),
            MessageCode::Ack => Ok(Message::Ack),

            MessageCode::Open => Ok(Message::Open(decode_string(&mut payload)?)),
            MessageCode::ImportSnapshot => Ok(Message::ImportSnapshot(decode_string(&mut payload)?)),
            MessageCode::Token => Ok(Message::Token(decode_string(&mut payload)?)),

            MessageCode::RowsCurr => Ok(Message::RowsCurr(decode_values(&mut payload)?.into())),
            MessageCode::RowsNext => Ok(Message::RowsNext(decode_values(&mut payload)?.into())),

            MessageCode::HashCurr => {
                let (key, hash) = decode_key_and_hash(&mut payload)?;
                Ok(Message::HashCurr(key, hash))
            }
            MessageCode::HashNext => {
                let (key, hash) = decode_key_and_hash(&mut payload)?;
                Ok(Message::HashNext(key, hash))
            }

            MessageCode::Protocol => {
                if payload.remaining() < 4 {
                    anyhow::bail!("Protocol payload too short");
                }
                Ok(Message::Protocol(payload.get_u32()))
            }

            MessageCode::Schema => {
                if payload.is_empty() {
                    Ok(Message::SchemaRequest)
                } else {
                    let database =
                        serde_json::from_slice(&payload).context("Invalid schema payload")?;
                    Ok(Message::SchemaReply(database))
                }
            }

            MessageCode::Row => Ok(Message::Row(decode_values(&mut payload)?)),
        }
    }
}

fn frame(code: MessageCode, fill: impl FnOnce(&mut BytesMut), payload_len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload_len);
    buf.put_u32(payload_len as u32);
    buf.put_u8(code as u8);
    fill(&mut buf);
    debug_assert_eq!(buf.len(), 5 + payload_len);
    buf.freeze()
}

fn encode_string_frame(code: MessageCode, s: &str) -> Bytes {
    frame(
        code,
        |buf| {
            buf.put_u16(s.len() as u16);
            buf.put_slice(s.as_bytes());
        },
        2 + s.len(),
    )
}

fn decode_string(payload: &mut Bytes) -> Result<String> {
    if payload.remaining() < 2 {
        anyhow::bail!("String length truncated");
    }
    let len = payload.get_u16() as usize;
    if payload.remaining() < len {
        anyhow::bail!("String truncated: expected {} bytes, got {}", len, payload.remaining());
    }
    String::from_utf8(payload.copy_to_bytes(len).to_vec()).context("Invalid UTF-8 in string")
}

fn decode_key_and_hash(payload: &mut Bytes) -> Result<(KeyTuple, RowHash)> {
    let key: KeyTuple = decode_values(payload)?.into();
    if payload.remaining() < 2 {
        anyhow::bail!("Hash length truncated");
    }
    let len = payload.get_u16() as usize;
    if payload.remaining() < len {
        anyhow::bail!("Hash truncated: expected {} bytes, got {}", len, payload.remaining());
    }
    Ok((key, RowHash(payload.copy_to_bytes(len).to_vec())))
}
