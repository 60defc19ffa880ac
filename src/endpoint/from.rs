//! Source ("from") endpoint: answers the destination's commands.
//!
//! One worker per connection. After the protocol handshake it loops reading
//! commands, answering each with a full response sequence before reading the
//! next; per-table cursor state lives in the current table's responder.

use crate::diff::TableResponder;
use crate::error::SyncError;
use crate::protocol::{Channel, Message, PROTOCOL_VERSION};
use crate::store::Datastore;
use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

pub struct FromWorker<S, R, W> {
    store: S,
    channel: Channel<R, W>,
}

impl<S, R, W> FromWorker<S, R, W>
where
    S: Datastore,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(store: S, reader: R, writer: W) -> Self {
        Self {
            store,
            channel: Channel::new(reader, writer),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        self.negotiate_protocol().await?;

        let mut responder: Option<TableResponder> = None;

        loop {
            let msg = self.channel.recv().await?;
            match msg {
                Message::Open(name) => {
                    let table = self
                        .store
                        .schema()?
                        .table_by_name(&name)
                        .cloned()
                        .with_context(|| format!("no such table {}", name))?;
                    debug!(table = %name, "open");
                    let (r, out) = TableResponder::open(&self.store, table)?;
                    responder = Some(r);
                    self.channel.send_all(&out).await?;
                }

                msg @ (Message::HashNext(..)
                | Message::HashCurr(..)
                | Message::RowsNext(_)
                | Message::RowsCurr(_)) => {
                    let r = responder
                        .as_mut()
                        .ok_or(SyncError::UnexpectedCommand("range command before OPEN"))?;
                    debug!(table = r.table_name(), ?msg, "range command");
                    let out = r.handle(&self.store, &msg)?;
                    self.channel.send_all(&out).await?;
                }

                Message::ExportSnapshot => {
                    let token = self.store.export_snapshot()?;
                    debug!(%token, "exported snapshot");
                    self.channel.send_all(&[Message::Token(token)]).await?;
                }
                Message::ImportSnapshot(token) => {
                    self.store.import_snapshot(&token)?;
                    debug!(%token, "imported snapshot");
                    self.channel.send_all(&[Message::Ack]).await?;
                }
                Message::UnholdSnapshot => {
                    self.store.unhold_snapshot()?;
                    self.channel.send_all(&[Message::Ack]).await?;
                }
                Message::WithoutSnapshot => {
                    self.store.start_read_transaction()?;
                    self.channel.send_all(&[Message::Ack]).await?;
                }

                Message::SchemaRequest => {
                    let database = self.store.schema()?;
                    self.channel
                        .send_all(&[Message::SchemaReply(database)])
                        .await?;
                }

                Message::Quit => break,

                Message::Protocol(_)
                | Message::SchemaReply(_)
                | Message::Row(_)
                | Message::Token(_)
                | Message::Ack => {
                    return Err(SyncError::UnexpectedCommand("reply frame as request").into());
                }
            }
        }
        Ok(())
    }

    /// Every conversation starts with the destination's PROTOCOL command; we
    /// answer with our own version and both ends insist on an exact match.
    async fn negotiate_protocol(&mut self) -> Result<()> {
        let msg = self.channel.recv().await?;
        let Message::Protocol(theirs) = msg else {
            return Err(SyncError::UnexpectedCommand("expected a protocol command first").into());
        };
        self.channel
            .send_all(&[Message::Protocol(PROTOCOL_VERSION)])
            .await?;
        if theirs != PROTOCOL_VERSION {
            return Err(SyncError::ProtocolMismatch {
                ours: PROTOCOL_VERSION,
                theirs,
            }
            .into());
        }
        Ok(())
    }
}
