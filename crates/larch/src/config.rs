use std::time::Duration;

/// Tunables for the path registry and the loop that drives it.
pub struct Config {
    /// Soft target for concurrently established paths. Default: 4.
    pub num_paths: usize,
    /// How often the host loop should tick and expire paths.
    /// Default: 1 second.
    pub tick_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_paths: 4,
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    pub fn with_num_paths(mut self, n: usize) -> Self {
        self.num_paths = n;
        self
    }

    pub fn with_tick_interval(mut self, d: Duration) -> Self {
        self.tick_interval = d;
        self
    }
}
