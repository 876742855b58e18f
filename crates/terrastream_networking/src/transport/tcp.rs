//! TCP transport.
//!
//! Each connection gets a reader thread (frames into
//! [`StreamServer::handle_message`]) and a writer thread (connection outbox
//! into frames). The acceptor polls a nonblocking listener so shutdown never
//! waits on a pending `accept`.

use std::io::BufReader;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use terrastream_core::{StreamError, StreamResult};

use super::{read_frame, write_frame, ClientTransport, TransportStats};
use crate::protocol::{decode_message, Message, PacketSerializer};
use crate::server::{ConnectionId, StreamServer};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

struct Link {
    stream: TcpStream,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }
}

/// Accepts TCP clients for a [`StreamServer`].
pub struct TcpServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
    registry: Arc<Mutex<Vec<Link>>>,
}

impl TcpServer {
    /// Binds `addr` and starts accepting.
    ///
    /// # Errors
    ///
    /// Bind or thread spawn failures.
    pub fn bind<A: ToSocketAddrs>(addr: A, server: Arc<StreamServer>) -> StreamResult<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let registry = Arc::new(Mutex::new(Vec::new()));

        let acceptor = {
            let running = Arc::clone(&running);
            let registry = Arc::clone(&registry);
            std::thread::Builder::new()
                .name("tcp-acceptor".into())
                .spawn(move || accept_loop(&listener, &server, &running, &registry))?
        };
        tracing::info!("Listening on {}", local_addr);

        Ok(Self {
            local_addr,
            running,
            acceptor: Some(acceptor),
            registry,
        })
    }

    /// Bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and closes every connection.
    pub fn shutdown(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
        let links = std::mem::take(&mut *self.registry.lock());
        for link in &links {
            let _ = link.stream.shutdown(Shutdown::Both);
        }
        for link in links {
            let _ = link.reader.join();
            let _ = link.writer.join();
        }
        tracing::info!("TCP listener on {} closed", self.local_addr);
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: &TcpListener, server: &Arc<StreamServer>, running: &AtomicBool, registry: &Mutex<Vec<Link>>) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = serve(stream, peer, server, registry) {
                    tracing::warn!("Failed to set up connection from {}: {}", peer, e);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn serve(stream: TcpStream, peer: SocketAddr, server: &Arc<StreamServer>, registry: &Mutex<Vec<Link>>) -> StreamResult<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let (outbox, inbox) = crossbeam_channel::unbounded();
    let id = server.connect(outbox);
    tracing::info!("Client connected: {} (id: {})", peer, id);

    let writer = {
        let stream = stream.try_clone()?;
        std::thread::Builder::new()
            .name(format!("tcp-writer-{}", id.0))
            .spawn(move || write_loop(stream, &inbox))?
    };
    let reader = {
        let stream = stream.try_clone()?;
        let server = Arc::clone(server);
        std::thread::Builder::new()
            .name(format!("tcp-reader-{}", id.0))
            .spawn(move || read_loop(stream, id, &server))?
    };

    let mut links = registry.lock();
    links.retain(|link| !link.is_finished());
    links.push(Link { stream, reader, writer });
    Ok(())
}

fn write_loop(mut stream: TcpStream, inbox: &Receiver<Message>) {
    let mut serializer = PacketSerializer::new();
    // Ends once the server drops the connection and with it the outbox sender.
    for message in inbox {
        if let Err(e) = write_frame(&mut stream, serializer.serialize(&message)) {
            tracing::debug!("Write failed: {}", e);
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Write);
}

fn read_loop(stream: TcpStream, id: ConnectionId, server: &StreamServer) {
    let mut reader = BufReader::new(stream);
    loop {
        match read_frame(&mut reader) {
            Ok(Some(frame)) => match decode_message(&frame) {
                Ok(message) => server.handle_message(id, message),
                Err(e) => {
                    tracing::warn!("Malformed message from {}: {}", id, e);
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Read from {} failed: {}", id, e);
                break;
            }
        }
    }
    server.disconnect(id);
}

/// Client end of a TCP connection.
pub struct TcpClientTransport {
    stream: TcpStream,
    inbox: Receiver<(Message, usize)>,
    reader: Option<JoinHandle<()>>,
    serializer: PacketSerializer,
    stats: TransportStats,
}

impl TcpClientTransport {
    /// Connects to a server.
    ///
    /// # Errors
    ///
    /// Connect or thread spawn failures.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> StreamResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let (tx, inbox) = crossbeam_channel::unbounded();
        let reader = {
            let stream = stream.try_clone()?;
            std::thread::Builder::new()
                .name("tcp-client-reader".into())
                .spawn(move || client_read_loop(stream, &tx))?
        };
        tracing::info!("Connected to {}", stream.peer_addr()?);
        Ok(Self {
            stream,
            inbox,
            reader: Some(reader),
            serializer: PacketSerializer::new(),
            stats: TransportStats::default(),
        })
    }
}

fn client_read_loop(stream: TcpStream, tx: &Sender<(Message, usize)>) {
    let mut reader = BufReader::new(stream);
    while let Ok(Some(frame)) = read_frame(&mut reader) {
        match decode_message(&frame) {
            Ok(message) => {
                if tx.send((message, frame.len() + 4)).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("Malformed message from server: {}", e);
                break;
            }
        }
    }
}

impl ClientTransport for TcpClientTransport {
    fn send(&mut self, message: &Message) -> StreamResult<()> {
        let bytes = self.serializer.serialize(message);
        let len = bytes.len();
        if let Err(e) = write_frame(&mut self.stream, bytes) {
            self.stats.send_errors += 1;
            return Err(StreamError::Transport(format!("send failed: {e}")));
        }
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += len as u64 + 4;
        Ok(())
    }

    fn try_recv(&mut self) -> StreamResult<Option<Message>> {
        match self.inbox.try_recv() {
            Ok((message, len)) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += len as u64;
                Ok(Some(message))
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

impl Drop for TcpClientTransport {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
