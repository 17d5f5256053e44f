#![forbid(unsafe_code)]

use livemod_domain::{ParseIdError, Provider, RoomId};
use livemod_protocol::SessionOptions;
use livemod_providers::SecretString;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("invalid room id: {0}")]
	InvalidRoom(#[source] ParseIdError),
}

/// Non-fatal configuration problems; the session is still created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionWarning {
	/// Local-model provider chosen without a model name.
	MissingModelName,
	/// Provider string not recognized; `openai` used instead.
	UnknownProvider(String),
}

/// Per-connection configuration, fixed once the handshake completes.
#[derive(Debug, Clone)]
pub struct SessionContext {
	pub session_id: Uuid,
	pub room_id: RoomId,
	pub provider: Provider,
	pub model_name: Option<String>,
	pub moderation_enabled: bool,
	pub responses_enabled: bool,
	pub api_key: Option<SecretString>,
}

impl SessionContext {
	/// Build from the UI's handshake. The client key wins over `fallback_api_key`.
	pub fn from_options(
		unique_id: &str,
		options: &SessionOptions,
		fallback_api_key: Option<&SecretString>,
	) -> Result<(Self, Vec<SessionWarning>), SessionError> {
		let room_id = RoomId::new(unique_id).map_err(SessionError::InvalidRoom)?;
		let session_id = Uuid::new_v4();
		let mut warnings = Vec::new();

		let provider = match options.ai_provider.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
			None => Provider::OpenAi,
			Some(raw) => raw.parse::<Provider>().unwrap_or_else(|_| {
				warn!(%session_id, provider = %raw, "unknown ai provider; using openai");
				warnings.push(SessionWarning::UnknownProvider(raw.to_string()));
				Provider::OpenAi
			}),
		};

		let model_name = options
			.ai_model
			.as_deref()
			.map(str::trim)
			.filter(|m| !m.is_empty())
			.map(str::to_string);

		if provider == Provider::LocalModel && model_name.is_none() {
			warn!(%session_id, "local-model provider without a model name");
			warnings.push(SessionWarning::MissingModelName);
		}

		let client_key = options.openai_api_key.clone().and_then(SecretString::non_empty);
		if client_key.is_some() {
			info!(%session_id, "client provided OpenAI API key");
		}
		let api_key = client_key.or_else(|| fallback_api_key.cloned());

		let ctx = Self {
			session_id,
			room_id,
			provider,
			model_name,
			moderation_enabled: options.show_moderation,
			responses_enabled: options.show_responses,
			api_key,
		};

		info!(
			%session_id,
			room = %ctx.room_id,
			provider = %ctx.provider,
			model = ctx.model_name.as_deref().unwrap_or("-"),
			moderation = ctx.moderation_enabled,
			responses = ctx.responses_enabled,
			"session configured"
		);

		Ok((ctx, warnings))
	}

	/// Local model name, only when the session actually uses the local provider.
	pub fn local_model(&self) -> Option<&str> {
		match self.provider {
			Provider::LocalModel => self.model_name.as_deref(),
			Provider::OpenAi => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn options() -> SessionOptions {
		SessionOptions::default()
	}

	#[test]
	fn empty_room_is_rejected() {
		let err = SessionContext::from_options(" @ ", &options(), None).unwrap_err();
		assert!(matches!(err, SessionError::InvalidRoom(ParseIdError::Empty)));
	}

	#[test]
	fn defaults_to_openai_with_everything_off() {
		let (ctx, warnings) = SessionContext::from_options("@room", &options(), None).unwrap();
		assert_eq!(ctx.room_id.as_str(), "room");
		assert_eq!(ctx.provider, Provider::OpenAi);
		assert!(!ctx.moderation_enabled);
		assert!(!ctx.responses_enabled);
		assert!(ctx.api_key.is_none());
		assert!(warnings.is_empty());
	}

	#[test]
	fn unknown_provider_falls_back_to_openai() {
		let opts = SessionOptions {
			ai_provider: Some("mystery".to_string()),
			..options()
		};
		let (ctx, warnings) = SessionContext::from_options("room", &opts, None).unwrap();
		assert_eq!(ctx.provider, Provider::OpenAi);
		assert_eq!(warnings, vec![SessionWarning::UnknownProvider("mystery".to_string())]);
	}

	#[test]
	fn local_without_model_is_advisory() {
		let opts = SessionOptions {
			ai_provider: Some("ollama".to_string()),
			ai_model: Some("  ".to_string()),
			show_moderation: true,
			..options()
		};
		let (ctx, warnings) = SessionContext::from_options("room", &opts, None).unwrap();
		assert_eq!(ctx.provider, Provider::LocalModel);
		assert!(ctx.local_model().is_none());
		assert_eq!(warnings, vec![SessionWarning::MissingModelName]);
	}

	#[test]
	fn client_key_wins_over_fallback() {
		let fallback = SecretString::new("sk-server");
		let opts = SessionOptions {
			openai_api_key: Some("sk-client".to_string()),
			..options()
		};
		let (ctx, _) = SessionContext::from_options("room", &opts, Some(&fallback)).unwrap();
		assert_eq!(ctx.api_key.unwrap().expose(), "sk-client");

		let opts = SessionOptions {
			openai_api_key: Some("".to_string()),
			..options()
		};
		let (ctx, _) = SessionContext::from_options("room", &opts, Some(&fallback)).unwrap();
		assert_eq!(ctx.api_key.unwrap().expose(), "sk-server");
	}

	#[test]
	fn model_name_is_ignored_for_openai() {
		let opts = SessionOptions {
			ai_model: Some("llama3".to_string()),
			..options()
		};
		let (ctx, _) = SessionContext::from_options("room", &opts, None).unwrap();
		assert!(ctx.local_model().is_none());
	}
}
