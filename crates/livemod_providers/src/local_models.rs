#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use serde::Deserialize;
use tracing::warn;

use crate::ProviderClients;

/// One entry of the local host's `/api/tags` listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LocalModelInfo {
	pub name: String,
	#[serde(default)]
	pub size: Option<u64>,
	#[serde(default)]
	pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
	#[serde(default)]
	models: Vec<LocalModelInfo>,
}

async fn try_list(clients: &ProviderClients) -> anyhow::Result<Vec<LocalModelInfo>> {
	let url = clients.settings.local_url("api/tags");
	let resp = clients.http.get(url).send().await.context("local model listing")?;
	let status = resp.status();
	if !status.is_success() {
		return Err(anyhow!("local model listing failed: status={}", status));
	}
	let parsed: TagsResponse = resp.json().await.context("decode local model listing")?;
	Ok(parsed.models)
}

/// Models installed on the local inference host. Empty when the host is unreachable.
pub async fn list_local_models(clients: &ProviderClients) -> Vec<LocalModelInfo> {
	match try_list(clients).await {
		Ok(models) => models,
		Err(err) => {
			warn!(error = %err, "failed to list local models");
			Vec::new()
		}
	}
}
