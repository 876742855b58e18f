//! # Transport Layer
//!
//! Moves protocol messages between a client and a [`StreamServer`].
//!
//! ## Design
//!
//! - [`LoopbackTransport`]: in-process, still goes through the wire encoding
//! - [`TcpServer`] / [`TcpClientTransport`]: length-prefixed frames over TCP
//! - Clients poll; receiving never blocks the frame loop
//!
//! [`StreamServer`]: crate::server::StreamServer

mod loopback;
mod tcp;

pub use loopback::LoopbackTransport;
pub use tcp::{TcpClientTransport, TcpServer};

use std::io::{self, Read, Write};

use terrastream_core::{StreamError, StreamResult};

use crate::protocol::Message;

/// Largest accepted frame.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Messages sent.
    pub packets_sent: u64,
    /// Messages received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
    /// Receive errors.
    pub recv_errors: u64,
}

/// Client end of a connection to a stream server.
pub trait ClientTransport: Send {
    /// Sends one message.
    ///
    /// # Errors
    ///
    /// [`StreamError::Transport`] once the connection is gone.
    fn send(&mut self, message: &Message) -> StreamResult<()>;

    /// Returns the next received message, if any, without blocking.
    ///
    /// # Errors
    ///
    /// [`StreamError::Transport`] once the connection is gone, or a decode
    /// error for a malformed frame.
    fn try_recv(&mut self) -> StreamResult<Option<Message>>;

    /// Traffic counters.
    fn stats(&self) -> TransportStats;
}

/// Writes one `u32` length-prefixed frame.
///
/// # Errors
///
/// I/O failures, or [`StreamError::Transport`] for an oversized frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> StreamResult<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len as usize <= MAX_FRAME_SIZE)
        .ok_or_else(|| StreamError::Transport(format!("frame of {} bytes is too large", payload.len())))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame written by [`write_frame`]. Returns `None` on a clean end of stream.
///
/// # Errors
///
/// I/O failures, or [`StreamError::Transport`] for an oversized or cut-off frame.
pub fn read_frame<R: Read>(reader: &mut R) -> StreamResult<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(StreamError::Transport(format!("frame of {len} bytes exceeds limit")));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            StreamError::Transport("connection closed mid-frame".into())
        } else {
            e.into()
        }
    })?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_back_to_back() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abc").expect("write");
        write_frame(&mut wire, b"").expect("write");
        let mut reader = wire.as_slice();
        assert_eq!(read_frame(&mut reader).expect("read"), Some(b"abc".to_vec()));
        assert_eq!(read_frame(&mut reader).expect("read"), Some(Vec::new()));
        assert_eq!(read_frame(&mut reader).expect("read"), None);
    }

    #[test]
    fn test_cut_off_frame() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"abcdef").expect("write");
        wire.truncate(7);
        let err = read_frame(&mut wire.as_slice()).unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)));

        let oversized = u32::MAX.to_le_bytes();
        assert!(read_frame(&mut oversized.as_slice()).is_err());
    }
}
