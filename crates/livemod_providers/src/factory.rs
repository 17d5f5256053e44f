#![forbid(unsafe_code)]

use std::sync::Arc;

use crate::generation::{LocalGenerator, OpenAiGenerator, ResponseGenerator};
use crate::local_models::{LocalModelInfo, list_local_models};
use crate::moderation::{EscalationModeration, LocalModeration, ModerationAdapter, OpenAiModeration};
use crate::{ProviderClients, SecretString};

/// Builds the adapters a session needs. Swapped for stubs in tests.
#[async_trait::async_trait]
pub trait ProviderFactory: Send + Sync + 'static {
	fn openai_moderation(&self, api_key: &SecretString) -> Arc<dyn ModerationAdapter>;
	fn local_moderation(&self, model: &str) -> Arc<dyn ModerationAdapter>;
	fn escalation(&self, api_key: &SecretString) -> Arc<dyn ModerationAdapter>;
	fn openai_generator(&self, api_key: &SecretString) -> Arc<dyn ResponseGenerator>;
	fn local_generator(&self, model: &str) -> Arc<dyn ResponseGenerator>;

	/// Models offered to the UI's model picker.
	async fn local_models(&self) -> Vec<LocalModelInfo> {
		Vec::new()
	}
}

/// Real HTTP adapters sharing one client.
#[derive(Debug, Clone)]
pub struct HttpProviderFactory {
	clients: ProviderClients,
}

impl HttpProviderFactory {
	pub fn new(clients: ProviderClients) -> Self {
		Self { clients }
	}
}

#[async_trait::async_trait]
impl ProviderFactory for HttpProviderFactory {
	fn openai_moderation(&self, api_key: &SecretString) -> Arc<dyn ModerationAdapter> {
		Arc::new(OpenAiModeration::new(self.clients.clone(), api_key.clone()))
	}

	fn local_moderation(&self, model: &str) -> Arc<dyn ModerationAdapter> {
		Arc::new(LocalModeration::new(self.clients.clone(), model))
	}

	fn escalation(&self, api_key: &SecretString) -> Arc<dyn ModerationAdapter> {
		Arc::new(EscalationModeration::new(self.clients.clone(), api_key.clone()))
	}

	fn openai_generator(&self, api_key: &SecretString) -> Arc<dyn ResponseGenerator> {
		Arc::new(OpenAiGenerator::new(self.clients.clone(), api_key.clone()))
	}

	fn local_generator(&self, model: &str) -> Arc<dyn ResponseGenerator> {
		Arc::new(LocalGenerator::new(self.clients.clone(), model))
	}

	async fn local_models(&self) -> Vec<LocalModelInfo> {
		list_local_models(&self.clients).await
	}
}
