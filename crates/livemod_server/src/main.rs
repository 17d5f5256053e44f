#![forbid(unsafe_code)]

mod adapters;
mod config;
mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use livemod_providers::{HttpProviderFactory, LiveSourceFactory, ProviderClients, ProviderFactory};
use livemod_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::adapters::{DemoSourceFactory, NullSourceFactory};
use crate::server::connection::{ConnectionSettings, ServerContext, handle_connection};
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::state::{ConnectionStats, spawn_statistic_broadcaster};
use crate::server::trigger::TriggerTokens;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: livemod_server [--bind ws://host:port]\n\
\n\
Options:\n\
\t--bind    Bind endpoint (default: ws://127.0.0.1:8081)\n\
\t         Format: ws://host:port\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> SocketAddr {
	let mut bind_endpoint = "ws://127.0.0.1:8081".to_string();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected ws://host:port)");
					usage_and_exit();
				}
				bind_endpoint = v;
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	let bind = WsEndpoint::parse(&bind_endpoint).unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	});

	bind.to_socket_addr_if_ip_literal().unwrap_or_else(|e| {
		eprintln!("{e}");
		usage_and_exit();
	})
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,livemod_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	let Some(endpoint) = otlp_endpoint else {
		base.init();
		return;
	};

	use opentelemetry::global;
	use opentelemetry::trace::TracerProvider as _;
	use opentelemetry_otlp::WithExportConfig;

	match opentelemetry_otlp::SpanExporter::builder()
		.with_tonic()
		.with_endpoint(endpoint.clone())
		.build()
	{
		Ok(exporter) => {
			let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
				.with_batch_exporter(exporter)
				.build();
			let tracer = tracer_provider.tracer("livemod_server");
			global::set_tracer_provider(tracer_provider);

			base.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
			info!(endpoint = %endpoint, "otlp tracing enabled");
		}
		Err(e) => {
			base.init();
			warn!(error = %e, "failed to initialize otlp tracing");
		}
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)"),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let bind_addr = parse_args();

	let config_path = crate::config::default_config_path()?;
	let server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let stats = ConnectionStats::new();
	let health_state = HealthState::new(stats.clone());
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let clients = ProviderClients::new(server_cfg.providers.clone())?;
	let providers: Arc<dyn ProviderFactory> = Arc::new(HttpProviderFactory::new(clients));

	let sources: Arc<dyn LiveSourceFactory> = if server_cfg.source.demo_enabled {
		info!(
			interval_ms = server_cfg.source.demo_interval.as_millis() as u64,
			"using demo live source"
		);
		Arc::new(DemoSourceFactory::new(server_cfg.source.demo_interval))
	} else {
		info!("no live source configured; sessions will report disconnected");
		Arc::new(NullSourceFactory)
	};

	let triggers = TriggerTokens::new(&server_cfg.pipeline.trigger_tokens);
	if triggers.is_empty() {
		warn!("no trigger tokens configured; suggested responses are disabled");
	}

	let ctx = ServerContext {
		providers,
		sources,
		triggers: Arc::new(triggers),
		stats: stats.clone(),
		statistics: spawn_statistic_broadcaster(stats, server_cfg.server.statistic_interval),
		fallback_api_key: server_cfg.openai_api_key.clone(),
		settings: ConnectionSettings {
			handshake_timeout: server_cfg.server.handshake_timeout,
			outbound_capacity: server_cfg.server.outbound_channel_capacity,
			adapter_timeout: server_cfg.pipeline.adapter_timeout,
			..ConnectionSettings::default()
		},
	};

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind websocket listener on {bind_addr}"))?;
	info!(bind = %bind_addr, "livemod_server: websocket endpoint ready");

	health_state.mark_ready();

	let mut next_conn_id: u64 = 1;

	loop {
		let (stream, remote) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!(error = %e, "accept failed");
				continue;
			}
		};

		let conn_id = next_conn_id;
		next_conn_id += 1;

		let ctx = ctx.clone();
		tokio::spawn(async move {
			info!(conn_id, %remote, "accepted connection");
			if let Err(e) = handle_connection(conn_id, stream, ctx).await {
				warn!(conn_id, error = %e, "connection handler exited with error");
			}
		});
	}
}
