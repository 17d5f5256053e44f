#![forbid(unsafe_code)]

use livemod_domain::{Category, ModerationResult};
use tracing::warn;

use super::{ESCALATION_PROMPT, MODERATION_USER_PREFIX, ModerationAdapter, ModerationAdapterKind};
use crate::chat_completions::{ChatCompletion, complete};
use crate::tags::parse_verdict;
use crate::{ProviderClients, SecretString};

/// Stricter second pass with the extended category vocabulary.
///
/// Runs against the hosted chat-completion endpoint, keyed by the session's API key.
#[derive(Debug, Clone)]
pub struct EscalationModeration {
	clients: ProviderClients,
	api_key: SecretString,
}

impl EscalationModeration {
	pub fn new(clients: ProviderClients, api_key: SecretString) -> Self {
		Self { clients, api_key }
	}

	fn vocabulary() -> Vec<Category> {
		Category::BASE.into_iter().chain(Category::ESCALATION).collect()
	}

	async fn try_moderate(&self, text: &str) -> anyhow::Result<ModerationResult> {
		let url = self.clients.settings.openai_url("chat/completions");
		let user = format!("{MODERATION_USER_PREFIX}{text}");
		let raw = complete(
			&self.clients.http,
			&url,
			Some(&self.api_key),
			&ChatCompletion {
				model: &self.clients.settings.escalation_model,
				system: ESCALATION_PROMPT,
				user: &user,
				max_tokens: 200,
				temperature: 0.1,
			},
		)
		.await?;

		Ok(parse_verdict(&raw, &Self::vocabulary()))
	}
}

#[async_trait::async_trait]
impl ModerationAdapter for EscalationModeration {
	fn kind(&self) -> ModerationAdapterKind {
		ModerationAdapterKind::Escalation
	}

	async fn moderate(&self, text: &str) -> Option<ModerationResult> {
		match self.try_moderate(text).await {
			Ok(result) => Some(result),
			Err(err) => {
				warn!(error = %err, "escalation moderation failed");
				None
			}
		}
	}
}
