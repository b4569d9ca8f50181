use std::time::Duration;

use replica::HandlingMode;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub mode: HandlingMode,
    pub tick_rate: u32,
    pub report_interval: Duration,
    /// Disconnects after this long. Runs until the server hangs up when unset.
    pub duration: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{}", replica::DEFAULT_PORT),
            mode: HandlingMode::Deferred,
            tick_rate: replica::DEFAULT_TICK_RATE,
            report_interval: Duration::from_secs(5),
            duration: None,
        }
    }
}
