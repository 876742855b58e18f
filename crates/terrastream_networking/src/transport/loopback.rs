//! In-process transport. Messages still pass through the wire encoding so
//! the loopback path exercises exactly what TCP would carry.

use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};
use terrastream_core::{StreamError, StreamResult};

use super::{ClientTransport, TransportStats};
use crate::protocol::{decode_message, encode_message, Message, PacketSerializer};
use crate::server::{ConnectionId, StreamServer};

/// Client transport talking to a server in the same process.
pub struct LoopbackTransport {
    server: Arc<StreamServer>,
    id: ConnectionId,
    inbox: Receiver<Message>,
    serializer: PacketSerializer,
    stats: TransportStats,
}

impl LoopbackTransport {
    /// Registers a new connection with `server`.
    #[must_use]
    pub fn connect(server: &Arc<StreamServer>) -> Self {
        let (outbox, inbox) = crossbeam_channel::unbounded();
        let id = server.connect(outbox);
        Self {
            server: Arc::clone(server),
            id,
            inbox,
            serializer: PacketSerializer::new(),
            stats: TransportStats::default(),
        }
    }

    /// Server-side connection ID.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }
}

impl ClientTransport for LoopbackTransport {
    fn send(&mut self, message: &Message) -> StreamResult<()> {
        if !self.server.is_running() {
            self.stats.send_errors += 1;
            return Err(StreamError::Transport("server stopped".into()));
        }
        let bytes = self.serializer.serialize(message);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        let decoded = decode_message(bytes)?;
        self.server.handle_message(self.id, decoded);
        Ok(())
    }

    fn try_recv(&mut self) -> StreamResult<Option<Message>> {
        match self.inbox.try_recv() {
            Ok(message) => {
                let bytes = encode_message(&message);
                self.stats.packets_received += 1;
                self.stats.bytes_received += bytes.len() as u64;
                decode_message(&bytes).map(Some).map_err(|e| {
                    self.stats.recv_errors += 1;
                    e
                })
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.stats.recv_errors += 1;
                Err(StreamError::Transport("server closed the connection".into()))
            }
        }
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.server.disconnect(self.id);
    }
}
