use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub tick_rate: u32,
    pub max_clients: usize,
    pub save_path: PathBuf,
    pub autosave_secs: u64,
    pub slime_cap: usize,
    pub spawn_interval_secs: f32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", replica::DEFAULT_PORT),
            tick_rate: replica::DEFAULT_TICK_RATE,
            max_clients: 32,
            save_path: PathBuf::from("replica-save.json"),
            autosave_secs: 60,
            slime_cap: 8,
            spawn_interval_secs: 3.0,
        }
    }
}

impl ServerConfig {
    pub fn ticks(&self, seconds: f32) -> u32 {
        ((seconds * self.tick_rate as f32).round() as u32).max(1)
    }
}
