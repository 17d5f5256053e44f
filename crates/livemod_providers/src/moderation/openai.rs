#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use livemod_domain::ModerationResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ModerationAdapter, ModerationAdapterKind};
use crate::{ProviderClients, SecretString};

/// Hosted moderation endpoint (`POST /moderations`).
#[derive(Debug, Clone)]
pub struct OpenAiModeration {
	clients: ProviderClients,
	api_key: SecretString,
}

#[derive(Debug, Serialize)]
struct ModerationRequest<'a> {
	model: &'a str,
	input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
	#[serde(default)]
	results: Vec<ModerationEntry>,
}

#[derive(Debug, Deserialize)]
struct ModerationEntry {
	flagged: bool,
	#[serde(default)]
	categories: BTreeMap<String, Option<bool>>,
	#[serde(default)]
	category_scores: BTreeMap<String, Option<f64>>,
}

impl OpenAiModeration {
	pub fn new(clients: ProviderClients, api_key: SecretString) -> Self {
		Self { clients, api_key }
	}

	async fn try_moderate(&self, text: &str) -> anyhow::Result<ModerationResult> {
		let url = self.clients.settings.openai_url("moderations");
		let body = ModerationRequest {
			model: &self.clients.settings.moderation_model,
			input: text,
		};

		let resp = self
			.clients
			.http
			.post(url)
			.bearer_auth(self.api_key.expose())
			.json(&body)
			.send()
			.await
			.context("openai moderation request")?;

		let status = resp.status();
		if !status.is_success() {
			return Err(anyhow!("openai moderation failed: status={}", status));
		}

		let parsed: ModerationResponse = resp.json().await.context("decode openai moderation")?;
		let entry = parsed
			.results
			.into_iter()
			.next()
			.ok_or_else(|| anyhow!("openai moderation returned no results"))?;

		let categories = entry
			.categories
			.into_iter()
			.map(|(k, v)| (k, v.unwrap_or(false)))
			.collect();
		let scores = entry
			.category_scores
			.into_iter()
			.map(|(k, v)| (k, v.unwrap_or(0.0)))
			.collect();
		Ok(ModerationResult::from_provider_maps(entry.flagged, categories, scores))
	}
}

#[async_trait::async_trait]
impl ModerationAdapter for OpenAiModeration {
	fn kind(&self) -> ModerationAdapterKind {
		ModerationAdapterKind::OpenAi
	}

	async fn moderate(&self, text: &str) -> Option<ModerationResult> {
		match self.try_moderate(text).await {
			Ok(result) => {
				debug!(flagged = result.flagged, "openai moderation done");
				Some(result)
			}
			Err(err) => {
				warn!(error = %err, "openai moderation failed");
				None
			}
		}
	}
}
