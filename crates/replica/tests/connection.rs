use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use replica::replication::UpdateComponent;
use replica::sandbox::{self, Coin, TRACKED};
use replica::{
    ClientWorld, CloseReason, Connection, ConnectionState, Dispatcher, HandlingMode, InboundQueue,
    MemoryTransport, NetworkId, ServerReplicator, TcpTransport, World,
};
use serde_json::json;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

fn connect_pair() -> (TcpStream, TcpStream) {
    let port = next_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let listener = TcpListener::bind(addr).unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (server, client)
}

fn wait_until(
    connection: &mut Connection<ClientWorld>,
    ctx: &mut ClientWorld,
    timeout_ms: u64,
    done: impl Fn(&ClientWorld) -> bool,
) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        connection.handle_packets(ctx);
        if done(ctx) {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_replication_over_tcp() {
    let _ = env_logger::builder().is_test(true).try_init();
    let components = sandbox::components().unwrap();
    let templates = sandbox::templates().unwrap();
    let packets = sandbox::packets().unwrap();
    let (server_stream, client_stream) = connect_pair();

    let mut server_link = Connection::<()>::new(
        Arc::clone(&packets),
        TcpTransport::new(server_stream),
        HandlingMode::Deferred,
        Dispatcher::new(),
    );

    let client_transport = TcpTransport::new(client_stream);
    let inbound = InboundQueue::new(Arc::clone(&packets));
    client_transport.spawn_reader(inbound.clone()).unwrap();
    let mut client = Connection::new(
        packets,
        client_transport,
        HandlingMode::Deferred,
        ClientWorld::dispatcher(),
    )
    .with_inbound(inbound);
    let mut ctx = ClientWorld::new(Arc::clone(&components), Arc::clone(&templates));

    let mut world = World::new();
    let mut server = ServerReplicator::new(Arc::clone(&components), Arc::clone(&templates));
    let coin = templates
        .create(&mut world, &components, "Coin", json!({"value": 2}))
        .unwrap();
    let id = server.mark_networked(&mut world, coin, TRACKED).unwrap();

    for message in server.tick(&mut world) {
        message.send(&mut server_link).unwrap();
    }
    assert!(wait_until(&mut client, &mut ctx, 1000, |ctx| {
        ctx.replicator.entity(id).is_some()
    }));

    world.get_mut::<Coin>(coin).unwrap().value = 8;
    for message in server.tick(&mut world) {
        message.send(&mut server_link).unwrap();
    }
    assert!(wait_until(&mut client, &mut ctx, 1000, |ctx| {
        let entity = ctx.replicator.entity(id).unwrap();
        ctx.world.get::<Coin>(entity) == Some(&Coin { value: 8 })
    }));

    let stats = server_link.stats();
    assert_eq!(stats.packets_sent, 2);
    assert!(client.stats().packets_handled >= 2);

    server_link.close(CloseReason::Local);
    let start = Instant::now();
    while client.is_open() && start.elapsed() < Duration::from_millis(1000) {
        client.handle_packets(&mut ctx);
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(client.close_reason(), Some(CloseReason::PeerClosed));
}

#[test]
fn test_one_byte_message_keeps_connection_open() {
    let components = sandbox::components().unwrap();
    let templates = sandbox::templates().unwrap();
    let packets = sandbox::packets().unwrap();

    for mode in [HandlingMode::Immediate, HandlingMode::Deferred] {
        let (transport, _peer) = MemoryTransport::new();
        let mut client = Connection::new(
            Arc::clone(&packets),
            transport,
            mode,
            ClientWorld::dispatcher(),
        );
        let mut ctx = ClientWorld::new(Arc::clone(&components), Arc::clone(&templates));

        client.receive(&mut ctx, &[0x2a]);
        client.handle_packets(&mut ctx);

        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(client.stats().packets_dropped, 1);
    }
}

#[test]
fn test_unregistered_type_keeps_connection_open() {
    let components = sandbox::components().unwrap();
    let templates = sandbox::templates().unwrap();
    let packets = sandbox::packets().unwrap();

    let (transport, _peer) = MemoryTransport::new();
    let mut client = Connection::new(
        Arc::clone(&packets),
        transport,
        HandlingMode::Deferred,
        ClientWorld::dispatcher(),
    );
    let mut ctx = ClientWorld::new(components, templates);

    let mut message = 42u64.to_le_bytes().to_vec();
    message.extend_from_slice(b"payload");
    client.receive(&mut ctx, &message);

    let (link, wire) = MemoryTransport::new();
    let mut server_link =
        Connection::<()>::new(packets, link, HandlingMode::Deferred, Dispatcher::new());
    server_link
        .send(&UpdateComponent {
            network_id: NetworkId::new(42),
            component: "Coin".to_string(),
            document: json!({"value": 1}),
        })
        .unwrap();
    for message in wire.drain() {
        client.receive(&mut ctx, &message);
    }

    assert_eq!(client.handle_packets(&mut ctx), 1);
    assert!(client.is_open());
    assert!(ctx.replicator.is_empty());
}
