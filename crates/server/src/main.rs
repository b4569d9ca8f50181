mod config;
mod events;
mod link;
mod server;
mod simulation;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use config::ServerConfig;
use server::ReplicaServer;

#[derive(Parser)]
#[command(name = "replica-server")]
#[command(about = "Authoritative replication server for the slime sandbox")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = replica::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = replica::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 32)]
    max_clients: usize,

    #[arg(long, default_value = "replica-save.json", help = "Save game file")]
    save: PathBuf,

    #[arg(long, default_value_t = 60, help = "Seconds between autosaves")]
    autosave: u64,

    #[arg(long, default_value_t = 30, help = "Seconds between status reports, 0 disables")]
    report: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.bind, args.port),
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        save_path: args.save,
        autosave_secs: args.autosave,
        ..Default::default()
    };

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    log::info!("Server started on {}", listener.local_addr()?);

    let mut server = ReplicaServer::new(config)?;
    let (join_tx, mut join_rx) = mpsc::unbounded_channel();
    tokio::spawn(link::accept_loop(listener, server.packets(), join_tx));

    let mut ticker = tokio::time::interval(server.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let report_every = (args.report > 0).then(|| Duration::from_secs(args.report));
    let mut last_report = Instant::now();
    let mut last_frame = Instant::now();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                server.advance(now.duration_since(last_frame).as_secs_f32());
                last_frame = now;

                for event in server.drain_events() {
                    event.log();
                }

                if let Some(every) = report_every {
                    if last_report.elapsed() >= every {
                        last_report = Instant::now();
                        let stats = server.stats();
                        log::info!(
                            "tick {} | {} clients | {} entities ({} networked) | {} packets, {} bytes sent",
                            stats.tick,
                            stats.client_count,
                            stats.entity_count,
                            stats.networked_count,
                            stats.network_stats.packets_sent,
                            stats.network_stats.bytes_sent
                        );
                    }
                }
            }
            Some(link) = join_rx.recv() => {
                log::debug!("Connection request from {}", link.addr);
                server.accept(link);
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    log::error!("Failed to listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    log::info!("Server shutting down");
    let result = server.shutdown();
    for event in server.drain_events() {
        event.log();
    }
    // Lets writer tasks flush their queues before the runtime drops them.
    tokio::time::sleep(Duration::from_millis(100)).await;
    result
}
