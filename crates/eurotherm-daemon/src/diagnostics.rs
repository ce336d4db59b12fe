//! Minimal uptime tracking for periodic status logging.
//!
//! The health check only answers "the process is alive"; this module
//! exists to put a number behind that when we log it, not to back a
//! Prometheus exporter. There is no hard-real-time scan loop here with
//! overrun budgets to watch, so that machinery has no counterpart in this
//! daemon (see DESIGN.md).

use std::time::{Duration, Instant};

/// Tracks daemon start time for periodic uptime logging.
pub struct Diagnostics {
    start_time: Instant,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    /// Start the uptime clock now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Elapsed time since the daemon started serving.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_advances() {
        let diagnostics = Diagnostics::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(diagnostics.uptime() >= Duration::from_millis(5));
    }
}
