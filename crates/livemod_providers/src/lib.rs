#![forbid(unsafe_code)]

pub mod chat_completions;
pub mod factory;
pub mod generation;
pub mod local_models;
pub mod moderation;
pub mod settings;
pub mod tags;

use std::fmt;

use anyhow::anyhow;
use livemod_domain::{ChatMessage, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub use factory::{HttpProviderFactory, ProviderFactory};
pub use generation::{LocalGenerator, OpenAiGenerator, ResponseGenerator};
pub use local_models::{LocalModelInfo, list_local_models};
pub use moderation::{EscalationModeration, LocalModeration, ModerationAdapter, ModerationAdapterKind, OpenAiModeration};
pub use settings::{ProviderClients, ProviderSettings};

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// `None` for blank input, so an empty key never counts as configured.
	pub fn non_empty(s: impl Into<String>) -> Option<Self> {
		let s = s.into();
		if s.trim().is_empty() { None } else { Some(Self(s.trim().to_string())) }
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<<S as serde::Serializer>::Ok, <S as serde::Serializer>::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str("")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Server -> source control message.
#[derive(Debug)]
pub enum SourceControl {
	/// Request a graceful shutdown.
	Shutdown,
}

/// Non-chat room events forwarded to the UI untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LiveEventKind {
	RoomUser,
	Member,
	Gift,
	Social,
	Like,
	QuestionNew,
	LinkMicBattle,
	LinkMicArmies,
	LiveIntro,
	Emote,
	Envelope,
	Subscribe,
}

impl LiveEventKind {
	pub const ALL: [LiveEventKind; 12] = [
		LiveEventKind::RoomUser,
		LiveEventKind::Member,
		LiveEventKind::Gift,
		LiveEventKind::Social,
		LiveEventKind::Like,
		LiveEventKind::QuestionNew,
		LiveEventKind::LinkMicBattle,
		LiveEventKind::LinkMicArmies,
		LiveEventKind::LiveIntro,
		LiveEventKind::Emote,
		LiveEventKind::Envelope,
		LiveEventKind::Subscribe,
	];

	/// Event name as the UI knows it.
	pub const fn as_str(self) -> &'static str {
		match self {
			LiveEventKind::RoomUser => "roomUser",
			LiveEventKind::Member => "member",
			LiveEventKind::Gift => "gift",
			LiveEventKind::Social => "social",
			LiveEventKind::Like => "like",
			LiveEventKind::QuestionNew => "questionNew",
			LiveEventKind::LinkMicBattle => "linkMicBattle",
			LiveEventKind::LinkMicArmies => "linkMicArmies",
			LiveEventKind::LiveIntro => "liveIntro",
			LiveEventKind::Emote => "emote",
			LiveEventKind::Envelope => "envelope",
			LiveEventKind::Subscribe => "subscribe",
		}
	}
}

impl fmt::Display for LiveEventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Source -> server event message.
#[derive(Debug, Clone)]
pub enum SourceEvent {
	/// Upstream room joined; `state` is the platform's room snapshot.
	Connected {
		room_id: String,
		state: Value,
	},

	Disconnected {
		reason: String,
	},

	StreamEnd,

	Chat(ChatMessage),

	Passthrough {
		kind: LiveEventKind,
		payload: Value,
	},
}

/// Helper types for wiring sources.
pub type SourceControlTx = mpsc::Sender<SourceControl>;
pub type SourceControlRx = mpsc::Receiver<SourceControl>;
pub type SourceEventTx = mpsc::Sender<SourceEvent>;
pub type SourceEventRx = mpsc::Receiver<SourceEvent>;

/// Trait representing a runnable live-room event source.
#[async_trait::async_trait]
pub trait LiveEventSource: Send + 'static {
	/// Short name used in logs.
	fn name(&self) -> &'static str;

	/// Run the source for `room` until shutdown, upstream end, or fatal error.
	async fn run(
		self: Box<Self>,
		room: RoomId,
		control_rx: SourceControlRx,
		events_tx: SourceEventTx,
	) -> anyhow::Result<()>;
}

/// Builds one source per session.
pub trait LiveSourceFactory: Send + Sync + 'static {
	fn create(&self, room: &RoomId) -> anyhow::Result<Box<dyn LiveEventSource>>;
}

/// Build a standard bounded channel pair.
pub fn bounded_source_channels(
	control_capacity: usize,
	events_capacity: usize,
) -> (SourceControlTx, SourceControlRx, SourceEventTx, SourceEventRx) {
	let (control_tx, control_rx) = mpsc::channel(control_capacity);
	let (events_tx, events_rx) = mpsc::channel(events_capacity);
	(control_tx, control_rx, events_tx, events_rx)
}

/// Build a disconnect event.
pub fn disconnected(reason: impl fmt::Display) -> SourceEvent {
	SourceEvent::Disconnected {
		reason: reason.to_string(),
	}
}

/// Reject chat messages the UI cannot address. Blank text or author still gets echoed.
pub fn validate_chat_message(m: &ChatMessage) -> anyhow::Result<()> {
	if m.id.as_str().trim().is_empty() {
		return Err(anyhow!("chat message id must be non-empty"));
	}
	Ok(())
}
