use std::net::SocketAddr;
use std::path::PathBuf;

use replica::CloseReason;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: u32,
        addr: SocketAddr,
        entities: usize,
    },
    ClientDisconnected {
        client_id: u32,
        reason: CloseReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Saved {
        entities: usize,
        path: PathBuf,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn log(&self) {
        match self {
            ServerEvent::ClientConnected {
                client_id,
                addr,
                entities,
            } => log::info!(
                "Client {} connected from {} ({} entities sent)",
                client_id,
                addr,
                entities
            ),
            ServerEvent::ClientDisconnected { client_id, reason } => {
                log::info!("Client {} {}", client_id, reason.as_str())
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                log::warn!("Connection denied to {}: {}", addr, reason)
            }
            ServerEvent::Saved { entities, path } => {
                log::info!("Saved {} entities to {}", entities, path.display())
            }
            ServerEvent::Error { message } => log::error!("{}", message),
        }
    }
}
