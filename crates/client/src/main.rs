mod client;
mod config;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use replica::HandlingMode;

use config::ClientConfig;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Apply packets at the start of each client tick.
    Deferred,
    /// Apply packets on the network thread as they arrive.
    Immediate,
}

#[derive(Parser)]
#[command(name = "replica-client")]
#[command(about = "Headless client mirroring a replica server's world")]
struct Args {
    #[arg(
        short,
        long,
        help = "Server address to connect to (e.g., 127.0.0.1:27015)"
    )]
    server: Option<String>,

    #[arg(short, long, value_enum, default_value_t = Mode::Deferred)]
    mode: Mode,

    #[arg(short, long, default_value_t = replica::DEFAULT_TICK_RATE)]
    tick_rate: u32,

    #[arg(long, default_value_t = 5, help = "Seconds between world summaries")]
    report: u64,

    #[arg(long, help = "Disconnect after this many seconds")]
    duration: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ClientConfig {
        mode: match args.mode {
            Mode::Deferred => HandlingMode::Deferred,
            Mode::Immediate => HandlingMode::Immediate,
        },
        tick_rate: args.tick_rate,
        report_interval: Duration::from_secs(args.report.max(1)),
        duration: args.duration.map(Duration::from_secs),
        ..Default::default()
    };
    if let Some(server) = args.server {
        config.server_addr = server;
    }

    let summary = match config.mode {
        HandlingMode::Deferred => client::run_deferred(&config)?,
        HandlingMode::Immediate => client::run_immediate(&config)?,
    };
    log::info!("Disconnected");
    summary.log(None);
    Ok(())
}
