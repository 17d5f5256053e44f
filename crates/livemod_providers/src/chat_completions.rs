#![forbid(unsafe_code)]

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};

use crate::SecretString;

/// One system + one user turn against an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletion<'a> {
	pub model: &'a str,
	pub system: &'a str,
	pub user: &'a str,
	pub max_tokens: u32,
	pub temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
	model: &'a str,
	messages: [ChatTurn<'a>; 2],
	max_tokens: u32,
	temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatTurn<'a> {
	role: &'static str,
	content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
	#[serde(default)]
	choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
	message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
	#[serde(default)]
	content: Option<String>,
}

/// Send the completion and return the first choice's text.
pub async fn complete(
	http: &reqwest::Client,
	url: &str,
	bearer: Option<&SecretString>,
	req: &ChatCompletion<'_>,
) -> anyhow::Result<String> {
	let body = ChatCompletionRequest {
		model: req.model,
		messages: [
			ChatTurn {
				role: "system",
				content: req.system,
			},
			ChatTurn {
				role: "user",
				content: req.user,
			},
		],
		max_tokens: req.max_tokens,
		temperature: req.temperature,
	};

	let mut builder = http.post(url).json(&body);
	if let Some(key) = bearer {
		builder = builder.bearer_auth(key.expose());
	}

	let resp = builder.send().await.context("chat completion request")?;
	let status = resp.status();
	if !status.is_success() {
		return Err(anyhow!("chat completion failed: status={}", status));
	}

	let parsed: ChatCompletionResponse = resp.json().await.context("decode chat completion")?;
	parsed
		.choices
		.into_iter()
		.next()
		.and_then(|c| c.message.content)
		.ok_or_else(|| anyhow!("chat completion returned no content"))
}
