//! # Client Connection Management
//!
//! Per-connection state on the server: where the viewer is, and which
//! surface versions have already been sent.

use std::collections::HashMap;

use crossbeam_channel::Sender;
use terrastream_core::{ChunkCoord, ColumnCoord};

use crate::protocol::Message;

/// Unique identifier for a client connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    /// Invalid/null connection ID.
    pub const NULL: Self = Self(u32::MAX);

    /// Returns true if this is a null/invalid ID.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::NULL
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Server-side view of one client.
#[derive(Debug)]
pub struct ClientConnection {
    /// Connection ID.
    pub id: ConnectionId,
    outbox: Sender<Message>,
    viewer: Option<ChunkCoord>,
    sent_versions: HashMap<ChunkCoord, u32>,
    messages_sent: u64,
}

impl ClientConnection {
    /// Creates a connection delivering into `outbox`.
    #[must_use]
    pub fn new(id: ConnectionId, outbox: Sender<Message>) -> Self {
        Self {
            id,
            outbox,
            viewer: None,
            sent_versions: HashMap::new(),
            messages_sent: 0,
        }
    }

    /// Last reported viewer chunk.
    #[must_use]
    pub const fn viewer(&self) -> Option<ChunkCoord> {
        self.viewer
    }

    /// Records a viewer move.
    pub fn set_viewer(&mut self, pos: ChunkCoord) {
        self.viewer = Some(pos);
    }

    /// Job priority of `pos` for this client: distance to the viewer, lower
    /// is more urgent. Without a viewer every chunk is equally urgent.
    #[must_use]
    pub fn priority_of(&self, pos: ChunkCoord) -> u32 {
        self.viewer.map_or(0, |viewer| viewer.manhattan_distance(pos))
    }

    /// Returns true if a height change of `col` concerns this client.
    #[must_use]
    pub fn cares_about(&self, col: ColumnCoord, view_radius: u32) -> bool {
        self.viewer.map_or(true, |viewer| {
            viewer.x.abs_diff(col.x) + viewer.y.abs_diff(col.y) < view_radius
        })
    }

    /// Version of `pos` last sent to this client.
    #[must_use]
    pub fn sent_version(&self, pos: ChunkCoord) -> Option<u32> {
        self.sent_versions.get(&pos).copied()
    }

    /// Returns true if this client was sent `pos` and has not asked for it
    /// from scratch since.
    #[must_use]
    pub fn holds(&self, pos: ChunkCoord) -> bool {
        self.sent_versions.contains_key(&pos)
    }

    /// The client asked for `pos` without holding its current version; the
    /// next build must reach it whatever was sent before.
    pub fn forget_sent(&mut self, pos: ChunkCoord) {
        self.sent_versions.remove(&pos);
    }

    /// Drops sent versions farther than `radius` from the viewer. Returns how many.
    pub fn forget_beyond(&mut self, radius: u32) -> usize {
        let Some(viewer) = self.viewer else {
            return 0;
        };
        let before = self.sent_versions.len();
        self.sent_versions
            .retain(|pos, _| viewer.manhattan_distance(*pos) <= radius);
        before - self.sent_versions.len()
    }

    /// Number of chunks with a recorded sent version.
    #[must_use]
    pub fn sent_len(&self) -> usize {
        self.sent_versions.len()
    }

    /// Queues a message. Returns false once the client side is gone.
    pub fn send(&mut self, message: Message) -> bool {
        if let Message::SurfaceUpdate { pos, version, .. } = &message {
            self.sent_versions.insert(*pos, *version);
        }
        if self.outbox.send(message).is_err() {
            return false;
        }
        self.messages_sent += 1;
        true
    }

    /// Number of messages queued so far.
    #[must_use]
    pub const fn messages_sent(&self) -> u64 {
        self.messages_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream_core::CompressedData;

    #[test]
    fn test_priority_follows_viewer() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut conn = ClientConnection::new(ConnectionId(1), tx);
        assert_eq!(conn.priority_of(ChunkCoord::new(5, 5, 5)), 0);
        assert!(conn.cares_about(ColumnCoord::new(100, 100), 4));

        conn.set_viewer(ChunkCoord::new(1, 1, 1));
        assert_eq!(conn.priority_of(ChunkCoord::new(2, 0, 3)), 4);
        assert!(conn.cares_about(ColumnCoord::new(2, 2), 4));
        assert!(!conn.cares_about(ColumnCoord::new(3, 3), 4));
    }

    #[test]
    fn test_send_records_versions() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut conn = ClientConnection::new(ConnectionId(7), tx);
        let pos = ChunkCoord::new(0, 0, 0);
        assert!(conn.send(Message::SurfaceUpdate {
            pos,
            version: 3,
            surface: CompressedData::default(),
            light: CompressedData::default(),
        }));
        assert_eq!(conn.sent_version(pos), Some(3));
        assert_eq!(rx.len(), 1);
        drop(rx);
        assert!(!conn.send(Message::Disconnect));
        assert_eq!(conn.messages_sent(), 1);
        assert!(ConnectionId::default().is_null());
    }

    #[test]
    fn test_sent_versions_follow_the_viewer() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut conn = ClientConnection::new(ConnectionId(2), tx);
        for x in 0..10 {
            assert!(conn.send(Message::SurfaceUpdate {
                pos: ChunkCoord::new(x, 0, 0),
                version: 1,
                surface: CompressedData::default(),
                light: CompressedData::default(),
            }));
        }
        // No viewer yet: nothing is known to be out of range.
        assert_eq!(conn.forget_beyond(3), 0);

        conn.set_viewer(ChunkCoord::new(0, 0, 0));
        assert_eq!(conn.forget_beyond(3), 6);
        assert_eq!(conn.sent_len(), 4);
        assert!(conn.holds(ChunkCoord::new(3, 0, 0)));

        conn.forget_sent(ChunkCoord::new(3, 0, 0));
        assert!(!conn.holds(ChunkCoord::new(3, 0, 0)));
        assert_eq!(conn.sent_version(ChunkCoord::new(3, 0, 0)), None);
    }
}
