use std::io;
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use replica::net::read_frames;
use replica::sandbox::{self, Coin, Health};
use replica::{
    ClientWorld, CloseReason, Connection, FixedTimestep, HandlingMode, InboundQueue,
    NetworkStats, TcpTransport,
};

/// What the client has mirrored so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub entities: usize,
    pub slimes: usize,
    pub coins: usize,
    pub coin_value: i64,
}

impl Summary {
    pub fn of(client: &ClientWorld) -> Self {
        let world = &client.world;
        let coins = world.with::<Coin>();
        Self {
            entities: client.replicator.len(),
            slimes: world.with::<Health>().len(),
            coin_value: coins
                .iter()
                .filter_map(|&entity| world.get::<Coin>(entity))
                .map(|coin| coin.value)
                .sum(),
            coins: coins.len(),
        }
    }

    pub fn log(&self, stats: Option<&NetworkStats>) {
        match stats {
            Some(stats) => log::info!(
                "{} entities | {} slimes | {} coins worth {} | {} packets handled, {} dropped",
                self.entities,
                self.slimes,
                self.coins,
                self.coin_value,
                stats.packets_handled,
                stats.packets_dropped
            ),
            None => log::info!(
                "{} entities | {} slimes | {} coins worth {}",
                self.entities,
                self.slimes,
                self.coins,
                self.coin_value
            ),
        }
    }
}

fn new_world() -> Result<ClientWorld> {
    Ok(ClientWorld::new(sandbox::components()?, sandbox::templates()?))
}

fn connect(addr: &str) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {}", addr))?;
    stream.set_nodelay(true)?;
    log::info!("Connected to {}", addr);
    Ok(stream)
}

fn expired(started: Instant, duration: Option<Duration>) -> bool {
    duration.is_some_and(|duration| started.elapsed() >= duration)
}

/// Packets are queued by a reader thread and applied at the start of each
/// fixed tick.
pub fn run_deferred(config: &crate::config::ClientConfig) -> Result<Summary> {
    let packets = sandbox::packets()?;
    let transport = TcpTransport::new(connect(&config.server_addr)?);
    let inbound = InboundQueue::new(Arc::clone(&packets));
    let reader = transport.spawn_reader(inbound.clone())?;

    let mut connection = Connection::new(
        packets,
        transport,
        HandlingMode::Deferred,
        ClientWorld::dispatcher(),
    )
    .with_inbound(inbound);
    let mut client = new_world()?;

    let mut timestep = FixedTimestep::new(config.tick_rate);
    let started = Instant::now();
    let mut last_frame = started;
    let mut last_report = started;

    while connection.is_open() && !expired(started, config.duration) {
        let now = Instant::now();
        timestep.accumulate(now.duration_since(last_frame).as_secs_f32());
        last_frame = now;

        for _ in 0..timestep.drain() {
            connection.handle_packets(&mut client);
            client.world.advance_tick();
        }

        if last_report.elapsed() >= config.report_interval {
            last_report = Instant::now();
            Summary::of(&client).log(Some(&connection.stats()));
        }
        thread::sleep(timestep.period() / 4);
    }

    if let Some(reason) = connection.close_reason() {
        log::info!("Server connection {}", reason.as_str());
    }
    connection.close(CloseReason::Local);
    if reader.join().is_err() {
        log::warn!("Reader thread panicked");
    }
    Ok(Summary::of(&client))
}

/// Packets are applied on the reader thread as soon as they arrive. The
/// world is shared with the reporting loop behind a mutex.
pub fn run_immediate(config: &crate::config::ClientConfig) -> Result<Summary> {
    let packets = sandbox::packets()?;
    let stream = connect(&config.server_addr)?;
    let mut read_half = stream.try_clone()?;
    let control = stream.try_clone()?;

    let shared = Arc::new(Mutex::new(new_world()?));
    let mut connection = Connection::new(
        packets,
        TcpTransport::new(stream),
        HandlingMode::Immediate,
        ClientWorld::dispatcher(),
    );

    let world = Arc::clone(&shared);
    let reader = thread::Builder::new()
        .name("replica-immediate".into())
        .spawn(move || -> io::Result<Option<CloseReason>> {
            let result = read_frames(&mut read_half, |frame| {
                connection.receive(&mut *lock(&world), &frame);
            });
            if connection.is_open() {
                connection.close(CloseReason::PeerClosed);
            }
            result.map(|()| connection.close_reason())
        })?;

    let started = Instant::now();
    let mut last_report = started;
    while !reader.is_finished() && !expired(started, config.duration) {
        thread::sleep(Duration::from_millis(50));
        if last_report.elapsed() >= config.report_interval {
            last_report = Instant::now();
            Summary::of(&lock(&shared)).log(None);
        }
    }

    if let Err(e) = control.shutdown(Shutdown::Both) {
        log::debug!("Socket shutdown: {}", e);
    }
    match reader.join() {
        Ok(Ok(Some(reason))) => log::info!("Server connection {}", reason.as_str()),
        Ok(Ok(None)) => {}
        Ok(Err(e)) => log::warn!("Read failed: {}", e),
        Err(_) => log::warn!("Reader thread panicked"),
    }

    let summary = Summary::of(&lock(&shared));
    Ok(summary)
}

fn lock(world: &Mutex<ClientWorld>) -> MutexGuard<'_, ClientWorld> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}
