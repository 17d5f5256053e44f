#![forbid(unsafe_code)]

pub mod framing;

pub use framing::{DEFAULT_MAX_FRAME_SIZE, FramingError, decode_frame, encode_frame, encode_frame_default};

use livemod_domain::{ChatMessage, MessageId, ModerationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Machine-readable codes carried by `ServerMessage::Error`.
pub mod error_codes {
	pub const INVALID_ROOM: &str = "INVALID_ROOM";
	pub const SESSION_ALREADY_CONFIGURED: &str = "SESSION_ALREADY_CONFIGURED";
	pub const HANDSHAKE_TIMEOUT: &str = "HANDSHAKE_TIMEOUT";
	pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Per-connection options sent by the UI with `setUniqueId`.
///
/// Every field is optional on the wire; missing toggles mean "off".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ai_provider: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ai_model: Option<String>,
	#[serde(default)]
	pub show_moderation: bool,
	#[serde(default)]
	pub show_responses: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub openai_api_key: Option<String>,
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
	#[serde(rename_all = "camelCase")]
	SetUniqueId {
		unique_id: String,
		#[serde(default)]
		options: SessionOptions,
	},
}

/// A model installed on the local inference host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalModel {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub size: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub modified_at: Option<String>,
}

/// The UI's view of a chat message: the immutable message plus pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
	#[serde(flatten)]
	pub message: ChatMessage,
	pub pending_moderation: bool,
	pub pending_response: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub moderation: Option<ModerationResult>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub suggested_response: Option<String>,
}

impl ChatView {
	pub fn new(message: ChatMessage, pending_moderation: bool, pending_response: bool) -> Self {
		Self {
			message,
			pending_moderation,
			pending_response,
			moderation: None,
			suggested_response: None,
		}
	}

	pub fn id(&self) -> &MessageId {
		&self.message.id
	}
}

/// Which async pipeline a `chatUpdate` resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
	Moderation,
	Response,
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
	LocalModels {
		models: Vec<LocalModel>,
	},
	TiktokConnected {
		state: Value,
	},
	TiktokDisconnected {
		reason: String,
	},
	StreamEnd,
	Chat(ChatView),
	ChatUpdate {
		id: MessageId,
		#[serde(rename = "type")]
		kind: UpdateKind,
		data: ChatView,
	},
	/// Non-chat room event forwarded verbatim.
	Live {
		name: String,
		data: Value,
	},
	#[serde(rename_all = "camelCase")]
	Statistic {
		global_connection_count: u64,
	},
	Error {
		code: String,
		message: String,
	},
}

impl ServerMessage {
	pub fn error(code: &str, message: impl Into<String>) -> Self {
		ServerMessage::Error {
			code: code.to_string(),
			message: message.into(),
		}
	}

	/// Stable name of the `event` tag, for logs and metrics labels.
	pub fn event_name(&self) -> &'static str {
		match self {
			ServerMessage::LocalModels { .. } => "localModels",
			ServerMessage::TiktokConnected { .. } => "tiktokConnected",
			ServerMessage::TiktokDisconnected { .. } => "tiktokDisconnected",
			ServerMessage::StreamEnd => "streamEnd",
			ServerMessage::Chat(_) => "chat",
			ServerMessage::ChatUpdate { .. } => "chatUpdate",
			ServerMessage::Live { .. } => "live",
			ServerMessage::Statistic { .. } => "statistic",
			ServerMessage::Error { .. } => "error",
		}
	}
}
