#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use livemod_providers::settings::{
	DEFAULT_ESCALATION_MODEL, DEFAULT_GENERATION_MODEL, DEFAULT_LOCAL_HOST, DEFAULT_MODERATION_MODEL,
	DEFAULT_OPENAI_BASE_URL, DEFAULT_REQUEST_TIMEOUT,
};
use livemod_providers::{ProviderSettings, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::trigger::DEFAULT_TRIGGER_TOKENS;

/// Default config path: `~/.livemod/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".livemod").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	/// Fallback key for sessions that don't bring their own.
	pub openai_api_key: Option<SecretString>,
	pub server: ServerSettings,
	pub providers: ProviderSettings,
	pub pipeline: PipelineSettings,
	pub source: SourceSettings,
}

/// Listener and per-connection settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// How long a new connection may take to send `setUniqueId`.
	pub handshake_timeout: Duration,
	pub outbound_channel_capacity: usize,
	/// Period of the `statistic` broadcast.
	pub statistic_interval: Duration,
}

/// Moderation/response pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
	/// Upper bound on a single provider call.
	pub adapter_timeout: Duration,
	/// Chat prefixes that address the responder.
	pub trigger_tokens: Vec<String>,
}

/// Live-event source selection.
#[derive(Debug, Clone)]
pub struct SourceSettings {
	/// Use the synthetic demo room instead of the null source.
	pub demo_enabled: bool,
	pub demo_interval: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	providers: FileProviderSettings,

	#[serde(default)]
	pipeline: FilePipelineSettings,

	#[serde(default)]
	source: FileSourceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	handshake_timeout_ms: Option<u64>,
	outbound_channel_capacity: Option<usize>,
	statistic_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileProviderSettings {
	openai_api_key: Option<String>,
	openai_base_url: Option<String>,
	local_host: Option<String>,
	moderation_model: Option<String>,
	escalation_model: Option<String>,
	generation_model: Option<String>,
	request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePipelineSettings {
	adapter_timeout_ms: Option<u64>,
	trigger_tokens: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileSourceSettings {
	demo_enabled: Option<bool>,
	demo_interval_ms: Option<u64>,
}

fn non_blank(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let providers = ProviderSettings {
			openai_base_url: non_blank(file.providers.openai_base_url)
				.unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
			local_host: non_blank(file.providers.local_host).unwrap_or_else(|| DEFAULT_LOCAL_HOST.to_string()),
			moderation_model: non_blank(file.providers.moderation_model)
				.unwrap_or_else(|| DEFAULT_MODERATION_MODEL.to_string()),
			escalation_model: non_blank(file.providers.escalation_model)
				.unwrap_or_else(|| DEFAULT_ESCALATION_MODEL.to_string()),
			generation_model: non_blank(file.providers.generation_model)
				.unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string()),
			request_timeout: file
				.providers
				.request_timeout_ms
				.filter(|v| *v > 0)
				.map(Duration::from_millis)
				.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
		};

		let trigger_tokens = file
			.pipeline
			.trigger_tokens
			.map(|tokens| tokens.into_iter().filter(|t| !t.trim().is_empty()).collect::<Vec<_>>())
			.unwrap_or_else(|| DEFAULT_TRIGGER_TOKENS.iter().map(|t| t.to_string()).collect());

		Self {
			openai_api_key: file.providers.openai_api_key.and_then(SecretString::non_empty),
			server: ServerSettings {
				metrics_bind: non_blank(file.server.metrics_bind),
				health_bind: non_blank(file.server.health_bind),
				handshake_timeout: Duration::from_millis(file.server.handshake_timeout_ms.unwrap_or(30_000)),
				outbound_channel_capacity: file.server.outbound_channel_capacity.unwrap_or(256).max(1),
				statistic_interval: Duration::from_millis(file.server.statistic_interval_ms.unwrap_or(2_000).max(100)),
			},
			providers,
			pipeline: PipelineSettings {
				adapter_timeout: Duration::from_millis(file.pipeline.adapter_timeout_ms.unwrap_or(10_000).max(1)),
				trigger_tokens,
			},
			source: SourceSettings {
				demo_enabled: file.source.demo_enabled.unwrap_or(false),
				demo_interval: Duration::from_millis(file.source.demo_interval_ms.unwrap_or(1_500).max(1)),
			},
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) {
	let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

	if let Some(v) = var("OPENAI_API_KEY") {
		cfg.openai_api_key = Some(SecretString::new(v));
		info!("providers: openai_api_key overridden by env");
	}

	if let Some(v) = var("OLLAMA_HOST") {
		cfg.providers.local_host = v;
		info!(local_host = %cfg.providers.local_host, "providers: local_host overridden by env");
	}

	if let Some(v) = var("LIVEMOD_OPENAI_BASE_URL") {
		cfg.providers.openai_base_url = v;
		info!("providers: openai_base_url overridden by env");
	}

	if let Some(v) = var("LIVEMOD_METRICS_BIND") {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = var("LIVEMOD_HEALTH_BIND") {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = var("LIVEMOD_ADAPTER_TIMEOUT_MS") {
		match v.parse::<u64>() {
			Ok(ms) if ms > 0 => {
				cfg.pipeline.adapter_timeout = Duration::from_millis(ms);
				info!(ms, "pipeline: adapter_timeout overridden by env");
			}
			_ => warn!(value = %v, "pipeline: ignoring invalid LIVEMOD_ADAPTER_TIMEOUT_MS"),
		}
	}

	if let Some(v) = var("LIVEMOD_TRIGGER_TOKENS") {
		cfg.pipeline.trigger_tokens = v
			.split(',')
			.map(|t| t.trim().to_string())
			.filter(|t| !t.is_empty())
			.collect();
		info!(count = cfg.pipeline.trigger_tokens.len(), "pipeline: trigger_tokens overridden by env");
	}

	if let Some(v) = var("LIVEMOD_ENABLE_DEMO_SOURCE")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.source.demo_enabled = enabled;
		info!(enabled, "source: demo_enabled overridden by env");
	}

	if let Some(v) = var("LIVEMOD_DEMO_INTERVAL_MS")
		&& let Ok(ms) = v.parse::<u64>()
		&& ms > 0
	{
		cfg.source.demo_interval = Duration::from_millis(ms);
		info!(ms, "source: demo_interval overridden by env");
	}

	if cfg.openai_api_key.is_none() {
		warn!("providers: no server-wide OpenAI key; sessions must bring their own");
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;

	fn parse(s: &str) -> ServerConfig {
		ServerConfig::from_file(toml::from_str(s).expect("valid toml"))
	}

	#[test]
	fn empty_file_gives_defaults() {
		let cfg = parse("");
		assert!(cfg.openai_api_key.is_none());
		assert_eq!(cfg.providers.openai_base_url, "https://api.openai.com/v1");
		assert_eq!(cfg.providers.local_host, "http://localhost:11434");
		assert_eq!(cfg.providers.moderation_model, "text-moderation-latest");
		assert_eq!(cfg.pipeline.adapter_timeout, Duration::from_secs(10));
		assert_eq!(cfg.pipeline.trigger_tokens, vec!["@SamLePirate", "Gentil Robot"]);
		assert_eq!(cfg.server.handshake_timeout, Duration::from_secs(30));
		assert_eq!(cfg.server.statistic_interval, Duration::from_secs(2));
		assert!(!cfg.source.demo_enabled);
	}

	#[test]
	fn file_values_are_mapped() {
		let cfg = parse(
			r#"
			[server]
			health_bind = "127.0.0.1:9100"
			metrics_bind = "  "

			[providers]
			openai_api_key = "sk-file"
			local_host = "http://gpu-box:11434"
			request_timeout_ms = 5000

			[pipeline]
			adapter_timeout_ms = 2500
			trigger_tokens = ["Robot", " "]

			[source]
			demo_enabled = true
			demo_interval_ms = 50
			"#,
		);
		assert_eq!(cfg.openai_api_key.as_ref().map(|k| k.expose()), Some("sk-file"));
		assert_eq!(cfg.server.health_bind.as_deref(), Some("127.0.0.1:9100"));
		assert!(cfg.server.metrics_bind.is_none());
		assert_eq!(cfg.providers.local_host, "http://gpu-box:11434");
		assert_eq!(cfg.providers.request_timeout, Duration::from_secs(5));
		assert_eq!(cfg.pipeline.adapter_timeout, Duration::from_millis(2500));
		assert_eq!(cfg.pipeline.trigger_tokens, vec!["Robot"]);
		assert!(cfg.source.demo_enabled);
		assert_eq!(cfg.source.demo_interval, Duration::from_millis(50));
	}

	#[test]
	fn env_overrides_win() {
		let env: HashMap<&str, &str> = HashMap::from([
			("OPENAI_API_KEY", "sk-env"),
			("OLLAMA_HOST", "http://10.0.0.2:11434"),
			("LIVEMOD_ADAPTER_TIMEOUT_MS", "750"),
			("LIVEMOD_TRIGGER_TOKENS", "Bot, @Streamer ,"),
			("LIVEMOD_ENABLE_DEMO_SOURCE", "yes"),
			("LIVEMOD_HEALTH_BIND", ""),
		]);
		let mut cfg = parse("[server]\nhealth_bind = \"127.0.0.1:9100\"");
		apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

		assert_eq!(cfg.openai_api_key.as_ref().map(|k| k.expose()), Some("sk-env"));
		assert_eq!(cfg.providers.local_host, "http://10.0.0.2:11434");
		assert_eq!(cfg.pipeline.adapter_timeout, Duration::from_millis(750));
		assert_eq!(cfg.pipeline.trigger_tokens, vec!["Bot", "@Streamer"]);
		assert!(cfg.source.demo_enabled);
		assert_eq!(cfg.server.health_bind.as_deref(), Some("127.0.0.1:9100"));
	}

	#[test]
	fn invalid_env_numbers_are_ignored() {
		let env: HashMap<&str, &str> = HashMap::from([("LIVEMOD_ADAPTER_TIMEOUT_MS", "soon"), ("LIVEMOD_DEMO_INTERVAL_MS", "0")]);
		let mut cfg = parse("");
		apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));
		assert_eq!(cfg.pipeline.adapter_timeout, Duration::from_secs(10));
		assert_eq!(cfg.source.demo_interval, Duration::from_millis(1500));
	}

	#[test]
	fn missing_file_is_not_an_error() {
		let path = std::env::temp_dir().join(format!("livemod-missing-{}.toml", uuid::Uuid::new_v4()));
		assert!(read_toml_if_exists(&path).unwrap().is_none());
	}
}
