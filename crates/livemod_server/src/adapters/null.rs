#![forbid(unsafe_code)]

use async_trait::async_trait;
use livemod_domain::RoomId;
use livemod_providers::{
	LiveEventSource, LiveSourceFactory, SourceControl, SourceControlRx, SourceEventTx, disconnected,
};
use tracing::info;

pub const NO_SOURCE_REASON: &str = "no live source configured";

/// Source used when no upstream is configured: reports a disconnect and idles until shutdown.
pub struct NullSource;

#[async_trait]
impl LiveEventSource for NullSource {
	fn name(&self) -> &'static str {
		"null"
	}

	async fn run(self: Box<Self>, room: RoomId, mut control_rx: SourceControlRx, events_tx: SourceEventTx) -> anyhow::Result<()> {
		info!(room = %room, "null source started");
		let _ = events_tx.try_send(disconnected(NO_SOURCE_REASON));

		while let Some(cmd) = control_rx.recv().await {
			match cmd {
				SourceControl::Shutdown => {
					info!(room = %room, "null source received Shutdown");
					break;
				}
			}
		}
		Ok(())
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSourceFactory;

impl LiveSourceFactory for NullSourceFactory {
	fn create(&self, _room: &RoomId) -> anyhow::Result<Box<dyn LiveEventSource>> {
		Ok(Box::new(NullSource))
	}
}
