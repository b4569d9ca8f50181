use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use replica::net::{FrameReader, encode_frame};
use replica::{InboundQueue, PacketRegistry, Transport};

const READ_BUFFER: usize = 16 * 1024;

/// Outgoing side of a client socket. Frames go to a writer task so the
/// simulation never waits on the network.
pub struct ChannelTransport {
    sender: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

impl Transport for ChannelTransport {
    fn send(&mut self, message: Vec<u8>) -> io::Result<()> {
        let frame = encode_frame(&message)?;
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "link closed"))?;
        sender
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task stopped"))
    }

    fn close(&mut self) {
        self.sender = None;
    }
}

/// A freshly accepted socket with its I/O tasks running.
pub struct ClientLink {
    pub addr: SocketAddr,
    pub transport: ChannelTransport,
    pub inbound: InboundQueue,
}

pub fn spawn_link(stream: TcpStream, addr: SocketAddr, packets: Arc<PacketRegistry>) -> ClientLink {
    let (reader, writer) = stream.into_split();
    let inbound = InboundQueue::new(packets);
    let (sender, receiver) = mpsc::unbounded_channel();

    tokio::spawn(read_loop(reader, inbound.clone(), addr));
    tokio::spawn(write_loop(writer, receiver, addr));

    ClientLink {
        addr,
        transport: ChannelTransport {
            sender: Some(sender),
        },
        inbound,
    }
}

pub async fn accept_loop(
    listener: TcpListener,
    packets: Arc<PacketRegistry>,
    joins: mpsc::UnboundedSender<ClientLink>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("set_nodelay on {}: {}", addr, e);
                }
                if joins.send(spawn_link(stream, addr, Arc::clone(&packets))).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("Accept failed: {}", e),
        }
    }
}

async fn read_loop(mut reader: OwnedReadHalf, inbound: InboundQueue, addr: SocketAddr) {
    let mut frames = FrameReader::new();
    let mut buf = vec![0u8; READ_BUFFER];

    'read: loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::debug!("Read from {} failed: {}", addr, e);
                break;
            }
        };

        frames.push(&buf[..n]);
        loop {
            match frames.next_frame() {
                Ok(Some(frame)) => {
                    inbound.receive(&frame);
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Dropping {}: {}", addr, e);
                    break 'read;
                }
            }
        }
    }
    inbound.close();
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut receiver: mpsc::UnboundedReceiver<Vec<u8>>,
    addr: SocketAddr,
) {
    while let Some(frame) = receiver.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            log::warn!("Write to {} failed: {}", addr, e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        log::debug!("Shutdown of {}: {}", addr, e);
    }
}
