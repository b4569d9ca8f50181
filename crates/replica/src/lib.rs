pub mod document;
pub mod net;
pub mod persistence;
pub mod reflect;
pub mod replication;
pub mod sandbox;
pub mod script;
pub mod simulation;
pub mod template;
pub mod world;

pub use document::Document;
pub use net::{
    CloseReason, Connection, ConnectionState, DEFAULT_PORT, DEFAULT_TICK_RATE, Dispatcher,
    HandlerError, HandlingMode, InboundQueue, MemoryPeer, MemoryTransport, NetworkStats, Packet,
    PacketError, PacketRegistry, PacketTypeId, SendError, TcpTransport, Transport,
};
pub use persistence::{PersistenceError, PersistenceMode, Persistent, PersistentRecord, SaveGame};
pub use reflect::{ComponentDescriptor, ComponentRegistry, ReflectError, Volatile};
pub use replication::{
    ClientReplicator, ClientWorld, NetworkId, Networked, Replicated, ReplicationError,
    ReplicationMessage, ServerReplicator,
};
pub use script::{Callable, NativeScripts, ScriptError, ScriptHooks, ScriptHost, ScriptSystem};
pub use simulation::FixedTimestep;
pub use template::{
    FnTemplate, Template, TemplateContext, TemplateError, TemplateOrigin, TemplateRegistry,
};
pub use world::{Component, Entity, Position, World};
