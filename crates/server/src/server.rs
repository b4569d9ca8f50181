use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use replica::sandbox;
use replica::{
    CloseReason, ComponentRegistry, Connection, Dispatcher, FixedTimestep, HandlingMode,
    NativeScripts, NetworkStats, PacketRegistry, ReplicationMessage, SaveGame, ServerReplicator,
    TemplateRegistry, Transport, World,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::link::ClientLink;
use crate::simulation::{
    appreciate_coins, count_slimes, network_new_entities, simulate_world, spawn_slime,
};

struct Client {
    id: u32,
    addr: SocketAddr,
    connection: Connection<()>,
}

pub struct ReplicaServer {
    config: ServerConfig,
    components: Arc<ComponentRegistry>,
    templates: Arc<TemplateRegistry>,
    packets: Arc<PacketRegistry>,
    world: World,
    replicator: ServerReplicator,
    scripts: NativeScripts,
    save: SaveGame,
    timestep: FixedTimestep,
    clients: Vec<Client>,
    joining: Vec<ClientLink>,
    next_client_id: u32,
    pending_events: VecDeque<ServerEvent>,
}

impl ReplicaServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let components = sandbox::components()?;
        let templates = sandbox::templates()?;
        let packets = sandbox::packets()?;

        let mut world = World::new();
        let mut save = SaveGame::load_or_default(&config.save_path)
            .with_context(|| format!("loading {}", config.save_path.display()))?;
        let restored = save.restore(&mut world, &components, &templates)?;
        log::info!(
            "Restored {} entities from {}",
            restored.len(),
            config.save_path.display()
        );

        Ok(Self {
            replicator: ServerReplicator::new(Arc::clone(&components), Arc::clone(&templates)),
            scripts: sandbox::scripts(Arc::clone(&components), Arc::clone(&templates)),
            timestep: FixedTimestep::new(config.tick_rate),
            clients: Vec::new(),
            joining: Vec::new(),
            next_client_id: 1,
            pending_events: VecDeque::new(),
            components,
            templates,
            packets,
            world,
            save,
            config,
        })
    }

    pub fn packets(&self) -> Arc<PacketRegistry> {
        Arc::clone(&self.packets)
    }

    pub fn tick_period(&self) -> Duration {
        self.timestep.period()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn accept(&mut self, mut link: ClientLink) {
        if self.clients.len() + self.joining.len() >= self.config.max_clients {
            link.transport.close();
            self.pending_events.push_back(ServerEvent::ConnectionDenied {
                addr: link.addr,
                reason: format!("server is full ({} clients)", self.config.max_clients),
            });
            return;
        }
        self.joining.push(link);
    }

    /// Feeds wall-clock time in and runs every tick that falls due.
    pub fn advance(&mut self, delta: f32) {
        self.timestep.accumulate(delta);
        for _ in 0..self.timestep.drain() {
            self.tick();
        }
    }

    /// A failing step is reported and the rest of the tick still runs.
    fn tick(&mut self) {
        self.receive();

        let tick = self.world.tick();
        let dt = self.timestep.dt();
        if tick % self.config.ticks(self.config.spawn_interval_secs) == 0 {
            if count_slimes(&self.world) < self.config.slime_cap {
                if let Err(e) = spawn_slime(&mut self.world, &self.components, &self.templates) {
                    self.report(tick, "spawning a slime", e.into());
                }
            }
            appreciate_coins(&mut self.world);
        }

        let mut messages =
            simulate_world(&mut self.world, &mut self.replicator, &mut self.scripts, dt);
        network_new_entities(&mut self.world, &mut self.replicator);
        messages.extend(self.replicator.tick(&mut self.world));
        self.broadcast(&messages);
        if let Err(e) = self.admit() {
            self.report(tick, "admitting clients", e);
        }

        self.world.advance_tick();
        if self.world.tick() % self.config.ticks(self.config.autosave_secs as f32) == 0 {
            if let Err(e) = self.save() {
                self.report(tick, "autosaving", e);
            }
        }
    }

    fn report(&mut self, tick: u32, step: &str, error: anyhow::Error) {
        self.pending_events.push_back(ServerEvent::Error {
            message: format!("Tick {} failed {}: {:#}", tick, step, error),
        });
    }

    fn receive(&mut self) {
        for client in &mut self.clients {
            client.connection.handle_packets(&mut ());
        }

        let events = &mut self.pending_events;
        self.clients.retain(|client| {
            if client.connection.is_open() {
                return true;
            }
            events.push_back(ServerEvent::ClientDisconnected {
                client_id: client.id,
                reason: client.connection.close_reason().unwrap_or(CloseReason::Local),
            });
            false
        });
    }

    fn broadcast(&mut self, messages: &[ReplicationMessage]) {
        if messages.is_empty() {
            return;
        }
        for client in &mut self.clients {
            for message in messages {
                if let Err(e) = message.send(&mut client.connection) {
                    log::warn!("Failed to replicate to client {}: {}", client.id, e);
                    break;
                }
            }
        }
    }

    /// Sends the full world to connections accepted since the last tick and
    /// starts broadcasting to them. Joiners stay queued if the snapshot fails.
    fn admit(&mut self) -> Result<()> {
        if self.joining.is_empty() {
            return Ok(());
        }

        let state = self.replicator.full_state(&self.world)?;
        for link in std::mem::take(&mut self.joining) {
            let mut connection = Connection::new(
                Arc::clone(&self.packets),
                link.transport,
                HandlingMode::Deferred,
                Dispatcher::new(),
            )
            .with_inbound(link.inbound);

            let client_id = self.next_client_id;
            self.next_client_id += 1;
            for message in &state {
                if let Err(e) = message.send(&mut connection) {
                    log::warn!("Failed to send world to client {}: {}", client_id, e);
                    break;
                }
            }

            self.pending_events.push_back(ServerEvent::ClientConnected {
                client_id,
                addr: link.addr,
                entities: self.replicator.len(),
            });
            self.clients.push(Client {
                id: client_id,
                addr: link.addr,
                connection,
            });
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        let entities = self.save.capture(&mut self.world, &self.components)?;
        self.save
            .save_to(&self.config.save_path)
            .with_context(|| format!("writing {}", self.config.save_path.display()))?;
        self.pending_events.push_back(ServerEvent::Saved {
            entities,
            path: self.config.save_path.clone(),
        });
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<()> {
        for client in &mut self.clients {
            log::debug!("Closing client {} at {}", client.id, client.addr);
            client.connection.close(CloseReason::Local);
        }
        self.clients.clear();
        self.save()
    }

    pub fn stats(&self) -> ServerStats {
        let mut network_stats = NetworkStats::default();
        for client in &self.clients {
            let stats = client.connection.stats();
            network_stats.packets_sent += stats.packets_sent;
            network_stats.bytes_sent += stats.bytes_sent;
            network_stats.packets_received += stats.packets_received;
            network_stats.packets_dropped += stats.packets_dropped;
        }
        ServerStats {
            tick: self.world.tick(),
            client_count: self.clients.len(),
            entity_count: self.world.len(),
            networked_count: self.replicator.len(),
            network_stats,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u32,
    pub client_count: usize,
    pub entity_count: usize,
    pub networked_count: usize,
    pub network_stats: NetworkStats,
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            save_path: dir.path().join("save.json"),
            ..Default::default()
        }
    }

    #[test]
    fn first_tick_spawns_and_networks_a_slime() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ReplicaServer::new(config(&dir)).unwrap();
        server.advance(0.06);

        let stats = server.stats();
        assert_eq!(stats.tick, 1);
        assert_eq!(stats.networked_count, 1);
        assert_eq!(stats.client_count, 0);
    }

    #[test]
    fn shutdown_saves_the_world() {
        let dir = tempfile::tempdir().unwrap();
        let mut server = ReplicaServer::new(config(&dir)).unwrap();
        server.advance(0.06);
        server.shutdown().unwrap();

        let events: Vec<_> = server.drain_events().collect();
        assert!(matches!(events.last(), Some(ServerEvent::Saved { entities: 1, .. })));

        let reloaded = ReplicaServer::new(config(&dir)).unwrap();
        assert_eq!(reloaded.stats().entity_count, 1);
    }
}
