//! Traffic snapshot published to the UI.
//!
//! Transport counters come from the tunnel client, quota from the poller.
//! Both replace the whole snapshot under the channel lock.

use std::sync::Arc;
use tg_network::RemainingTraffic;
use tokio::sync::watch;

/// Remaining quota as last reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quota {
    /// Not polled yet (or session ended)
    #[default]
    Unknown,
    Unlimited,
    Limited { remaining: u64, used: u64 },
}

impl From<RemainingTraffic> for Quota {
    fn from(traffic: RemainingTraffic) -> Self {
        if traffic.unlimited {
            Quota::Unlimited
        } else {
            Quota::Limited {
                remaining: traffic.remaining,
                used: traffic.used,
            }
        }
    }
}

/// Traffic counters and quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub quota: Quota,
}

impl TrafficSnapshot {
    /// Human-readable summary
    pub fn format(&self) -> String {
        let quota = match self.quota {
            Quota::Unknown => "quota unknown".to_string(),
            Quota::Unlimited => "unlimited".to_string(),
            Quota::Limited { remaining, used } => {
                format!("{} used, {} left", format_bytes(used), format_bytes(remaining))
            }
        };

        format!(
            "↑ {} ↓ {} | {}",
            format_bytes(self.bytes_sent),
            format_bytes(self.bytes_received),
            quota
        )
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Shared publisher of the current traffic snapshot
#[derive(Clone)]
pub struct TrafficBoard {
    tx: Arc<watch::Sender<TrafficSnapshot>>,
}

impl TrafficBoard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TrafficSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<TrafficSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        *self.tx.borrow()
    }

    /// Replace the transport counters, keeping the quota
    pub fn publish_counters(&self, bytes_sent: u64, bytes_received: u64) {
        self.tx.send_modify(|current| {
            *current = TrafficSnapshot {
                bytes_sent,
                bytes_received,
                quota: current.quota,
            }
        });
    }

    /// Replace the quota, keeping the counters
    pub fn publish_quota(&self, quota: Quota) {
        self.tx.send_modify(|current| {
            *current = TrafficSnapshot { quota, ..*current }
        });
    }

    /// Forget everything (session ended)
    pub fn reset(&self) {
        self.tx.send_replace(TrafficSnapshot::default());
    }
}

impl Default for TrafficBoard {
    fn default() -> Self {
        Self::new()
    }
}
