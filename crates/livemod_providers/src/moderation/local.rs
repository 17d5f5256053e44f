#![forbid(unsafe_code)]

use livemod_domain::{Category, ModerationResult};
use tracing::{debug, warn};

use super::{LOCAL_MODERATION_PROMPT, MODERATION_USER_PREFIX, ModerationAdapter, ModerationAdapterKind};
use crate::ProviderClients;
use crate::chat_completions::{ChatCompletion, complete};
use crate::tags::parse_verdict;

/// Prompted moderation against a model on the local inference host.
#[derive(Debug, Clone)]
pub struct LocalModeration {
	clients: ProviderClients,
	model: String,
}

impl LocalModeration {
	pub fn new(clients: ProviderClients, model: impl Into<String>) -> Self {
		Self {
			clients,
			model: model.into(),
		}
	}

	async fn try_moderate(&self, text: &str) -> anyhow::Result<ModerationResult> {
		let url = self.clients.settings.local_url("v1/chat/completions");
		let user = format!("{MODERATION_USER_PREFIX}{text}");
		let raw = complete(
			&self.clients.http,
			&url,
			None,
			&ChatCompletion {
				model: &self.model,
				system: LOCAL_MODERATION_PROMPT,
				user: &user,
				max_tokens: 200,
				temperature: 0.1,
			},
		)
		.await?;

		debug!(model = %self.model, raw = %raw, "local moderation raw output");
		Ok(parse_verdict(&raw, &Category::BASE))
	}
}

#[async_trait::async_trait]
impl ModerationAdapter for LocalModeration {
	fn kind(&self) -> ModerationAdapterKind {
		ModerationAdapterKind::LocalModel
	}

	async fn moderate(&self, text: &str) -> Option<ModerationResult> {
		match self.try_moderate(text).await {
			Ok(result) => Some(result),
			Err(err) => {
				warn!(model = %self.model, error = %err, "local moderation failed");
				None
			}
		}
	}
}
