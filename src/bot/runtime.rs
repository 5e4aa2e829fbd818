use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::utils::format_duration;

/// Process status reported by `/ping`
pub struct RuntimeInfo {
    started_at: DateTime<Utc>,
    in_flight: Arc<AtomicUsize>,
}

/// Counts a unit of work as in flight until dropped
pub struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RuntimeInfo {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn track(&self) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(Arc::clone(&self.in_flight))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> String {
        let uptime = (Utc::now() - self.started_at).num_seconds();
        format!(
            "ytdl-bot v{}\nUp since: {}\nUptime: {}\nJobs in flight: {}",
            env!("CARGO_PKG_VERSION"),
            self.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            format_duration(uptime as f64),
            self.in_flight()
        )
    }
}

impl Default for RuntimeInfo {
    fn default() -> Self {
        Self::new()
    }
}
