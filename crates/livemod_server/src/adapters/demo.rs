#![forbid(unsafe_code)]

use std::time::Duration;

use async_trait::async_trait;
use livemod_domain::{ChatMessage, MessageId, ParseIdError, RoomId};
use livemod_providers::{
	LiveEventKind, LiveEventSource, LiveSourceFactory, SourceControl, SourceControlRx, SourceEvent, SourceEventTx,
	validate_chat_message,
};
use serde_json::{Value, json};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

enum DemoLine {
	Chat {
		handle: &'static str,
		display: &'static str,
		text: &'static str,
	},
	Live(LiveEventKind),
}

const SCRIPT: &[DemoLine] = &[
	DemoLine::Chat {
		handle: "pierre_92",
		display: "Pierre",
		text: "Bonsoir tout le monde !",
	},
	DemoLine::Live(LiveEventKind::Like),
	DemoLine::Chat {
		handle: "marie.lp",
		display: "Marie",
		text: "@SamLePirate tu joues à quoi ce soir ?",
	},
	DemoLine::Live(LiveEventKind::Gift),
	DemoLine::Chat {
		handle: "jb_off",
		display: "JB",
		text: "La France aux Français",
	},
	DemoLine::Live(LiveEventKind::RoomUser),
	DemoLine::Chat {
		handle: "lucie_",
		display: "Lucie",
		text: "Gentil Robot, raconte-nous une blague",
	},
	DemoLine::Chat {
		handle: "tom.b",
		display: "Tom",
		text: "trop bien le live",
	},
	DemoLine::Live(LiveEventKind::Member),
];

/// Synthetic room that cycles through a fixed script. For local development and tests.
pub struct DemoSource {
	interval: Duration,
	limit: Option<u64>,
}

impl DemoSource {
	pub fn new(interval: Duration) -> Self {
		Self { interval, limit: None }
	}

	/// End the stream after `limit` scripted lines.
	pub fn with_limit(mut self, limit: u64) -> Self {
		self.limit = Some(limit);
		self
	}

	fn event_for(n: u64, session: &str) -> Result<SourceEvent, ParseIdError> {
		let line = &SCRIPT[(n as usize) % SCRIPT.len()];
		Ok(match line {
			DemoLine::Chat { handle, display, text } => {
				let id = MessageId::new(format!("demo-{session}-{n}"))?;
				SourceEvent::Chat(ChatMessage::new(id, *handle, *text).with_display_name(*display))
			}
			DemoLine::Live(kind) => SourceEvent::Passthrough {
				kind: *kind,
				payload: Self::payload(*kind, n),
			},
		})
	}

	fn payload(kind: LiveEventKind, n: u64) -> Value {
		match kind {
			LiveEventKind::Like => json!({"uniqueId": "pierre_92", "likeCount": 5, "totalLikeCount": 5 * (n + 1)}),
			LiveEventKind::Gift => json!({"uniqueId": "marie.lp", "giftName": "Rose", "repeatCount": 1}),
			LiveEventKind::RoomUser => json!({"viewerCount": 120 + n}),
			_ => json!({"uniqueId": "tom.b"}),
		}
	}
}

/// Outcome of pushing one event to the connection.
enum Push {
	Sent,
	Dropped,
	Closed,
}

fn push(events_tx: &SourceEventTx, ev: SourceEvent) -> Push {
	if let SourceEvent::Chat(msg) = &ev
		&& let Err(e) = validate_chat_message(msg)
	{
		warn!(error = %e, "dropping invalid demo chat message");
		return Push::Dropped;
	}
	match events_tx.try_send(ev) {
		Ok(()) => Push::Sent,
		Err(TrySendError::Full(_)) => {
			warn!("demo source events channel full; dropping event");
			Push::Dropped
		}
		Err(TrySendError::Closed(_)) => Push::Closed,
	}
}

#[async_trait]
impl LiveEventSource for DemoSource {
	fn name(&self) -> &'static str {
		"demo"
	}

	async fn run(self: Box<Self>, room: RoomId, mut control_rx: SourceControlRx, events_tx: SourceEventTx) -> anyhow::Result<()> {
		let session = Uuid::new_v4().simple().to_string();
		let session = &session[..8];

		let connected = SourceEvent::Connected {
			room_id: room.as_str().to_string(),
			state: json!({"roomId": format!("demo-{session}"), "uniqueId": room.as_str(), "isDemo": true}),
		};
		if let Push::Closed = push(&events_tx, connected) {
			return Ok(());
		}

		let mut interval: Interval = tokio::time::interval(self.interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		// The first tick fires immediately.
		interval.tick().await;

		info!(room = %room, %session, "demo source started");
		debug!(interval_ms = self.interval.as_millis() as u64, limit = ?self.limit, "demo source configured");

		let mut n: u64 = 0;
		loop {
			tokio::select! {
				_ = interval.tick() => {
					if self.limit.is_some_and(|limit| n >= limit) {
						let _ = push(&events_tx, SourceEvent::StreamEnd);
						info!(room = %room, emitted = n, "demo stream ended");
						break;
					}
					if let Push::Closed = push(&events_tx, Self::event_for(n, session)?) {
						break;
					}
					n += 1;
				}
				cmd = control_rx.recv() => match cmd {
					Some(SourceControl::Shutdown) | None => {
						info!(room = %room, "demo source shutting down");
						break;
					}
				}
			}
		}

		Ok(())
	}
}

#[derive(Debug, Clone)]
pub struct DemoSourceFactory {
	interval: Duration,
	limit: Option<u64>,
}

impl DemoSourceFactory {
	pub fn new(interval: Duration) -> Self {
		Self { interval, limit: None }
	}

	/// End every created stream after `limit` lines (useful for tests).
	#[allow(dead_code)]
	pub fn with_limit(mut self, limit: u64) -> Self {
		self.limit = Some(limit);
		self
	}
}

impl LiveSourceFactory for DemoSourceFactory {
	fn create(&self, _room: &RoomId) -> anyhow::Result<Box<dyn LiveEventSource>> {
		let mut source = DemoSource::new(self.interval);
		if let Some(limit) = self.limit {
			source = source.with_limit(limit);
		}
		Ok(Box::new(source))
	}
}

#[cfg(test)]
mod tests {
	use livemod_providers::bounded_source_channels;

	use super::*;

	#[tokio::test]
	async fn emits_connected_script_and_stream_end() {
		let (_control_tx, control_rx, events_tx, mut events_rx) = bounded_source_channels(4, 64);
		let room = RoomId::new("@demo").unwrap();
		let source = DemoSourceFactory::new(Duration::from_millis(5))
			.with_limit(SCRIPT.len() as u64)
			.create(&room)
			.unwrap();
		let task = tokio::spawn(source.run(room, control_rx, events_tx));

		let mut events = Vec::new();
		while let Some(ev) = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
			.await
			.expect("timed out")
		{
			events.push(ev);
		}
		task.await.unwrap().unwrap();

		assert!(matches!(events.first(), Some(SourceEvent::Connected { room_id, .. }) if room_id == "demo"));
		assert!(matches!(events.last(), Some(SourceEvent::StreamEnd)));
		assert_eq!(events.len(), SCRIPT.len() + 2);

		let chats: Vec<&ChatMessage> = events
			.iter()
			.filter_map(|ev| match ev {
				SourceEvent::Chat(m) => Some(m),
				_ => None,
			})
			.collect();
		assert!(chats.iter().any(|m| m.text == "La France aux Français"));
		assert!(chats.iter().any(|m| m.text.starts_with("@SamLePirate")));
		assert!(chats.iter().all(|m| m.id.as_str().starts_with("demo-")));
	}

	#[tokio::test]
	async fn stops_on_shutdown() {
		let (control_tx, control_rx, events_tx, _events_rx) = bounded_source_channels(4, 64);
		let room = RoomId::new("demo").unwrap();
		let task = tokio::spawn(Box::new(DemoSource::new(Duration::from_secs(60))).run(room, control_rx, events_tx));
		control_tx.send(SourceControl::Shutdown).await.unwrap();
		tokio::time::timeout(Duration::from_secs(1), task)
			.await
			.expect("timed out")
			.unwrap()
			.unwrap();
	}
}
