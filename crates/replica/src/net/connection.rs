use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::protocol::{Packet, PacketError, PacketTypeId};
use super::registry::{DecodedPacket, PacketRegistry};
use super::stats::NetworkStats;
use super::transport::Transport;

/// Error returned by a packet handler. Any handler error closes the
/// connection it arrived on.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler<C> = Box<dyn FnMut(&mut C, Box<dyn Any + Send>) -> Result<(), HandlerError> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlingMode {
    Immediate,
    /// Queue until [`Connection::handle_packets`].
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Decoding,
    Queued,
    Dispatching,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Local,
    HandlerFault,
    PeerClosed,
    TransportError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Local => "closed locally",
            CloseReason::HandlerFault => "closed after a handler fault",
            CloseReason::PeerClosed => "closed by peer",
            CloseReason::TransportError => "closed after a transport error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection is closed")]
    Closed,
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("transport write failed: {0}")]
    Io(#[from] io::Error),
}

enum Dispatch {
    Handled,
    NoHandler,
    Fault(HandlerError),
}

pub struct Dispatcher<C> {
    handlers: HashMap<PacketTypeId, Handler<C>>,
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<P, F>(&mut self, mut handler: F) -> &mut Self
    where
        C: 'static,
        P: Packet,
        F: FnMut(&mut C, P) -> Result<(), HandlerError> + Send + 'static,
    {
        self.handlers.insert(
            P::packet_type(),
            Box::new(move |ctx: &mut C, payload: Box<dyn Any + Send>| {
                let packet = payload
                    .downcast::<P>()
                    .map_err(|_| format!("payload is not a {}", P::NAME))?;
                handler(ctx, *packet)
            }),
        );
        self
    }

    pub fn handles(&self, id: PacketTypeId) -> bool {
        self.handlers.contains_key(&id)
    }

    fn dispatch(&mut self, ctx: &mut C, packet: DecodedPacket) -> Dispatch {
        match self.handlers.get_mut(&packet.type_id) {
            Some(handler) => match handler(ctx, packet.payload) {
                Ok(()) => Dispatch::Handled,
                Err(e) => Dispatch::Fault(e),
            },
            None => Dispatch::NoHandler,
        }
    }
}

#[derive(Default)]
struct Inbox {
    packets: VecDeque<DecodedPacket>,
    received: u64,
    dropped: u64,
    bytes: u64,
    peer_closed: bool,
    discarding: bool,
}

/// Inbound side of a connection, shareable with I/O threads.
#[derive(Clone)]
pub struct InboundQueue {
    registry: Arc<PacketRegistry>,
    inbox: Arc<Mutex<Inbox>>,
}

impl InboundQueue {
    pub fn new(registry: Arc<PacketRegistry>) -> Self {
        Self {
            registry,
            inbox: Arc::new(Mutex::new(Inbox::default())),
        }
    }

    pub fn receive(&self, message: &[u8]) -> bool {
        match self.decode(message) {
            Some(packet) => {
                let mut inbox = self.lock();
                if inbox.discarding {
                    return false;
                }
                inbox.packets.push_back(packet);
                true
            }
            None => false,
        }
    }

    /// Marks the remote end as gone. The owning connection closes on its
    /// next drain.
    pub fn close(&self) {
        self.lock().peer_closed = true;
    }

    pub fn is_peer_closed(&self) -> bool {
        self.lock().peer_closed
    }

    pub fn len(&self) -> usize {
        self.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn decode(&self, message: &[u8]) -> Option<DecodedPacket> {
        let result = self.registry.decode(message);

        let mut inbox = self.lock();
        inbox.bytes += message.len() as u64;
        match result {
            Ok(packet) => {
                inbox.received += 1;
                Some(packet)
            }
            Err(e) => {
                inbox.dropped += 1;
                drop(inbox);
                match e {
                    PacketError::Malformed { len } => log::warn!(
                        "Received message of {} bytes, too short to determine its type",
                        len
                    ),
                    PacketError::UnknownType(id) => {
                        log::warn!("Received packet of unregistered type {}", id)
                    }
                    e => log::warn!("Dropping packet: {}", e),
                }
                None
            }
        }
    }

    fn take(&self) -> VecDeque<DecodedPacket> {
        std::mem::take(&mut self.lock().packets)
    }

    fn stop(&self) -> VecDeque<DecodedPacket> {
        let mut inbox = self.lock();
        inbox.discarding = true;
        std::mem::take(&mut inbox.packets)
    }

    fn fill_stats(&self, stats: &mut NetworkStats) {
        let inbox = self.lock();
        stats.packets_received = inbox.received;
        stats.packets_dropped = inbox.dropped;
        stats.bytes_received = inbox.bytes;
    }

    fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Connection<C> {
    registry: Arc<PacketRegistry>,
    dispatcher: Dispatcher<C>,
    transport: Box<dyn Transport>,
    inbound: InboundQueue,
    mode: HandlingMode,
    state: ConnectionState,
    close_reason: Option<CloseReason>,
    stats: NetworkStats,
}

impl<C> Connection<C> {
    pub fn new(
        registry: Arc<PacketRegistry>,
        transport: impl Transport + 'static,
        mode: HandlingMode,
        dispatcher: Dispatcher<C>,
    ) -> Self {
        Self {
            inbound: InboundQueue::new(Arc::clone(&registry)),
            registry,
            dispatcher,
            transport: Box::new(transport),
            mode,
            state: ConnectionState::Open,
            close_reason: None,
            stats: NetworkStats::default(),
        }
    }

    pub fn with_inbound(mut self, inbound: InboundQueue) -> Self {
        self.inbound = inbound;
        self
    }

    pub fn mode(&self) -> HandlingMode {
        self.mode
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn inbound(&self) -> InboundQueue {
        self.inbound.clone()
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = self.stats.clone();
        self.inbound.fill_stats(&mut stats);
        stats
    }

    /// Bad messages are logged and dropped without closing.
    pub fn receive(&mut self, ctx: &mut C, message: &[u8]) {
        if !self.is_open() {
            log::debug!("Ignoring {} bytes on a closed connection", message.len());
            return;
        }

        match self.mode {
            HandlingMode::Deferred => {
                self.state = ConnectionState::Queued;
                self.inbound.receive(message);
                self.state = ConnectionState::Open;
            }
            HandlingMode::Immediate => {
                self.state = ConnectionState::Decoding;
                let packet = self.inbound.decode(message);
                self.state = ConnectionState::Open;
                if let Some(packet) = packet {
                    self.dispatch(ctx, packet);
                }
            }
        }
    }

    pub fn handle_packets(&mut self, ctx: &mut C) -> usize {
        if !self.is_open() {
            return 0;
        }

        let mut queued = self.inbound.take();
        let mut dispatched = 0;
        while let Some(packet) = queued.pop_front() {
            self.dispatch(ctx, packet);
            dispatched += 1;
            if !self.is_open() {
                warn_discarded(&queued);
                return dispatched;
            }
        }

        if self.inbound.is_peer_closed() {
            self.close(CloseReason::PeerClosed);
        }
        dispatched
    }

    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }

        let message = self.registry.encode(packet)?;
        let len = message.len() as u64;
        if let Err(e) = self.transport.send(message) {
            log::warn!("Failed to send {}-packet: {}", P::NAME, e);
            self.close(CloseReason::TransportError);
            return Err(e.into());
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += len;
        Ok(())
    }

    pub fn close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }

        log::info!("Connection {}", reason.as_str());
        self.state = ConnectionState::Closed;
        self.close_reason = Some(reason);
        self.transport.close();
        warn_discarded(&self.inbound.stop());
    }

    fn dispatch(&mut self, ctx: &mut C, packet: DecodedPacket) {
        self.state = ConnectionState::Dispatching;
        let name = packet.name;

        match self.dispatcher.dispatch(ctx, packet) {
            Dispatch::Handled => {
                self.stats.packets_handled += 1;
                self.state = ConnectionState::Open;
            }
            Dispatch::NoHandler => {
                log::warn!("No handler found for packet of type {}", name);
                self.state = ConnectionState::Open;
            }
            Dispatch::Fault(e) => {
                log::error!("Caught error while handling {}-packet: {}", name, e);
                self.close(CloseReason::HandlerFault);
            }
        }
    }
}

impl<C> Drop for Connection<C> {
    fn drop(&mut self) {
        if self.is_open() {
            warn_discarded(&self.inbound.stop());
            self.transport.close();
        }
    }
}

fn warn_discarded(packets: &VecDeque<DecodedPacket>) {
    let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
    for packet in packets {
        *remaining.entry(packet.name).or_default() += 1;
    }
    for (name, count) in remaining {
        log::warn!("Discarding {} unhandled {}-packet(s)", count, name);
    }
}
