#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

/// Process-wide connection counters, shared by every connection handler.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
	inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
	active: AtomicU64,
	total: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
	pub active_connections: u64,
	pub total_connections: u64,
}

impl ConnectionStats {
	pub fn new() -> Self {
		Self::default()
	}

	/// Count a new connection; the guard uncounts it when dropped.
	pub fn connection_opened(&self) -> ConnectionGuard {
		let active = self.inner.active.fetch_add(1, Ordering::Relaxed) + 1;
		self.inner.total.fetch_add(1, Ordering::Relaxed);
		metrics::counter!("livemod_server_connections_total").increment(1);
		metrics::gauge!("livemod_server_active_connections").set(active as f64);
		ConnectionGuard {
			inner: Arc::clone(&self.inner),
		}
	}

	pub fn active(&self) -> u64 {
		self.inner.active.load(Ordering::Relaxed)
	}

	pub fn total(&self) -> u64 {
		self.inner.total.load(Ordering::Relaxed)
	}

	pub fn snapshot(&self) -> StatsSnapshot {
		StatsSnapshot {
			active_connections: self.active(),
			total_connections: self.total(),
		}
	}
}

#[derive(Debug)]
pub struct ConnectionGuard {
	inner: Arc<Counters>,
}

impl Drop for ConnectionGuard {
	fn drop(&mut self) {
		let active = self.inner.active.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
		metrics::gauge!("livemod_server_active_connections").set(active as f64);
	}
}

/// Periodically publish the active connection count to every subscriber.
pub fn spawn_statistic_broadcaster(stats: ConnectionStats, interval: Duration) -> broadcast::Sender<u64> {
	let (tx, _) = broadcast::channel(16);
	let sender = tx.clone();
	tokio::spawn(async move {
		let mut ticker = tokio::time::interval(interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			ticker.tick().await;
			// No receivers is fine; connections subscribe as they arrive.
			let _ = sender.send(stats.active());
		}
	});
	debug!(interval_ms = interval.as_millis() as u64, "statistic broadcaster started");
	tx
}
