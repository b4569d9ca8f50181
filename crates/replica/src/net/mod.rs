mod connection;
mod framing;
mod protocol;
mod registry;
mod stats;
mod transport;

pub use connection::{
    CloseReason, Connection, ConnectionState, Dispatcher, HandlerError, HandlingMode,
    InboundQueue, SendError,
};
pub use framing::{FrameError, FrameReader, MAX_MESSAGE_SIZE, encode_frame, read_frames};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, Packet, PacketError, PacketTypeId, TYPE_ID_WIDTH,
};
pub use registry::{DecodedPacket, PacketRegistry, PacketRegistryBuilder, RegistryError};
pub use stats::NetworkStats;
pub use transport::{MemoryPeer, MemoryTransport, Transport, TcpTransport};
