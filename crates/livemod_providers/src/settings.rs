#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LOCAL_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODERATION_MODEL: &str = "text-moderation-latest";
pub const DEFAULT_ESCALATION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GENERATION_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Endpoints and model names shared by every session.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
	pub openai_base_url: String,
	pub local_host: String,
	pub moderation_model: String,
	pub escalation_model: String,
	pub generation_model: String,
	pub request_timeout: Duration,
}

impl Default for ProviderSettings {
	fn default() -> Self {
		Self {
			openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
			local_host: DEFAULT_LOCAL_HOST.to_string(),
			moderation_model: DEFAULT_MODERATION_MODEL.to_string(),
			escalation_model: DEFAULT_ESCALATION_MODEL.to_string(),
			generation_model: DEFAULT_GENERATION_MODEL.to_string(),
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}
}

impl ProviderSettings {
	pub fn openai_url(&self, path: &str) -> String {
		format!("{}/{}", self.openai_base_url.trim_end_matches('/'), path.trim_start_matches('/'))
	}

	pub fn local_url(&self, path: &str) -> String {
		format!("{}/{}", self.local_host.trim_end_matches('/'), path.trim_start_matches('/'))
	}
}

/// One HTTP client plus settings, cloned cheaply into every adapter.
#[derive(Debug, Clone)]
pub struct ProviderClients {
	pub http: reqwest::Client,
	pub settings: std::sync::Arc<ProviderSettings>,
}

impl ProviderClients {
	pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
		let http = reqwest::Client::builder()
			.timeout(settings.request_timeout)
			.build()
			.context("build provider http client")?;
		Ok(Self {
			http,
			settings: std::sync::Arc::new(settings),
		})
	}
}
