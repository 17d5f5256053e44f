#![forbid(unsafe_code)]

use livemod_domain::Provider;
use tracing::warn;

use crate::chat_completions::{ChatCompletion, complete};
use crate::tags::strip_thinking;
use crate::{ProviderClients, SecretString};

/// Persona used for every suggested reply.
pub const PERSONA_PROMPT: &str = r#"
Vous êtes un assistant qui réponds au chat en direct TikTok.
Vous recevrez des commentaires du chat provenant du canal en direct. Pour chaque nouvelle mise à jour du chat, vous repondrez.
Pour le nom d'utilisateur, assurez-vous de le dire d'une façon facile à prononcer.
Pour les smileys ou les emojis, prononce les simplement. un seul par message, sinon, c'est trop long.
ne dis pas plusieurs emojis par messages. c'est trop long.
Si il y a des fautes d'orthographe ou des fautes des frappes dans le message, corrige les dans ta réponse.
Si le commentaire est une question, tu réponds par une phrase courte et concise.
Si le commentaire est faux, contredit le.
Essaye de reconnaitre le sarcasme et la critique des religions.
Defends la declaration universelle des droits de l'homme, le progressisme.
Tu combats les discriminations, les racismes, les sexismes, les agissements de nature homophobe, transphobe, etc.
"#;

const MAX_TOKENS: u32 = 100;
const TEMPERATURE: f32 = 0.7;

/// Suggested-reply generation. `None` means no suggestion; failures are logged, never raised.
#[async_trait::async_trait]
pub trait ResponseGenerator: Send + Sync + 'static {
	fn provider(&self) -> Provider;

	async fn generate(&self, prompt: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
	clients: ProviderClients,
	api_key: SecretString,
}

impl OpenAiGenerator {
	pub fn new(clients: ProviderClients, api_key: SecretString) -> Self {
		Self { clients, api_key }
	}

	async fn try_generate(&self, prompt: &str) -> anyhow::Result<String> {
		let url = self.clients.settings.openai_url("chat/completions");
		complete(
			&self.clients.http,
			&url,
			Some(&self.api_key),
			&ChatCompletion {
				model: &self.clients.settings.generation_model,
				system: PERSONA_PROMPT,
				user: prompt,
				max_tokens: MAX_TOKENS,
				temperature: TEMPERATURE,
			},
		)
		.await
	}
}

#[async_trait::async_trait]
impl ResponseGenerator for OpenAiGenerator {
	fn provider(&self) -> Provider {
		Provider::OpenAi
	}

	async fn generate(&self, prompt: &str) -> Option<String> {
		match self.try_generate(prompt).await {
			Ok(text) => non_blank(text),
			Err(err) => {
				warn!(error = %err, "openai generation failed");
				None
			}
		}
	}
}

#[derive(Debug, Clone)]
pub struct LocalGenerator {
	clients: ProviderClients,
	model: String,
}

impl LocalGenerator {
	pub fn new(clients: ProviderClients, model: impl Into<String>) -> Self {
		Self {
			clients,
			model: model.into(),
		}
	}

	async fn try_generate(&self, prompt: &str) -> anyhow::Result<String> {
		let url = self.clients.settings.local_url("v1/chat/completions");
		let raw = complete(
			&self.clients.http,
			&url,
			None,
			&ChatCompletion {
				model: &self.model,
				system: PERSONA_PROMPT,
				user: prompt,
				max_tokens: MAX_TOKENS,
				temperature: TEMPERATURE,
			},
		)
		.await?;
		Ok(strip_thinking(&raw))
	}
}

#[async_trait::async_trait]
impl ResponseGenerator for LocalGenerator {
	fn provider(&self) -> Provider {
		Provider::LocalModel
	}

	async fn generate(&self, prompt: &str) -> Option<String> {
		match self.try_generate(prompt).await {
			Ok(text) => non_blank(text),
			Err(err) => {
				warn!(model = %self.model, error = %err, "local generation failed");
				None
			}
		}
	}
}

fn non_blank(text: String) -> Option<String> {
	if text.trim().is_empty() { None } else { Some(text) }
}
