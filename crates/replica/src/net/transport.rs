use std::collections::VecDeque;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use super::connection::InboundQueue;
use super::framing::{encode_frame, read_frames};

/// Byte-stream endpoint delivering whole, ordered messages.
pub trait Transport: Send {
    fn send(&mut self, message: Vec<u8>) -> io::Result<()>;

    fn close(&mut self);
}

#[derive(Debug, Default)]
struct MemoryChannel {
    messages: VecDeque<Vec<u8>>,
    closed: bool,
}

/// In-process transport. Messages sent through it are collected by the
/// paired [`MemoryPeer`].
#[derive(Debug)]
pub struct MemoryTransport {
    channel: Arc<Mutex<MemoryChannel>>,
}

#[derive(Debug, Clone)]
pub struct MemoryPeer {
    channel: Arc<Mutex<MemoryChannel>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, MemoryPeer) {
        let channel = Arc::new(Mutex::new(MemoryChannel::default()));
        (
            Self {
                channel: Arc::clone(&channel),
            },
            MemoryPeer { channel },
        )
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: Vec<u8>) -> io::Result<()> {
        let mut channel = lock(&self.channel);
        if channel.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        channel.messages.push_back(message);
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.channel).closed = true;
    }
}

impl MemoryPeer {
    pub fn drain(&self) -> Vec<Vec<u8>> {
        lock(&self.channel).messages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.channel).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.channel).closed
    }
}

fn lock(channel: &Mutex<MemoryChannel>) -> MutexGuard<'_, MemoryChannel> {
    channel.lock().unwrap_or_else(PoisonError::into_inner)
}

/// TCP transport with length-prefixed framing.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Spawns an I/O thread feeding every received frame into `inbound`.
    /// The queue is marked closed when the peer hangs up.
    pub fn spawn_reader(&self, inbound: InboundQueue) -> io::Result<JoinHandle<()>> {
        let mut stream = self.stream.try_clone()?;
        let peer = stream.peer_addr().ok();

        thread::Builder::new()
            .name("replica-reader".into())
            .spawn(move || {
                if let Err(e) = read_frames(&mut stream, |frame| {
                    inbound.receive(&frame);
                }) {
                    log::warn!("Read from {:?} failed: {}", peer, e);
                }
                inbound.close();
            })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, message: Vec<u8>) -> io::Result<()> {
        let frame = encode_frame(&message)?;
        self.stream.write_all(&frame)
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            log::debug!("Socket shutdown: {}", e);
        }
    }
}
