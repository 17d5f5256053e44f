use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use livemod_domain::Provider;
use livemod_providers::{
	EscalationModeration, LocalGenerator, LocalModeration, ModerationAdapter, ModerationAdapterKind, OpenAiGenerator,
	OpenAiModeration, ProviderClients, ProviderSettings, ResponseGenerator, SecretString, list_local_models,
};
use tokio::net::TcpListener;

type Seen = Arc<Mutex<Vec<(String, String)>>>;

struct Route {
	path: &'static str,
	status: u16,
	body: String,
}

fn route(path: &'static str, status: u16, body: impl Into<String>) -> Route {
	Route {
		path,
		status,
		body: body.into(),
	}
}

async fn handle(req: Request<Incoming>, routes: Arc<Vec<Route>>, seen: Seen) -> Result<Response<Full<Bytes>>, hyper::Error> {
	let path = req.uri().path().to_string();
	let body = req.into_body().collect().await?.to_bytes();
	seen.lock()
		.unwrap()
		.push((path.clone(), String::from_utf8_lossy(&body).into_owned()));

	let (status, payload) = routes
		.iter()
		.find(|r| r.path == path)
		.map(|r| (r.status, r.body.clone()))
		.unwrap_or((404, String::new()));

	Ok(Response::builder()
		.status(status)
		.header("content-type", "application/json")
		.body(Full::new(Bytes::from(payload)))
		.unwrap())
}

/// In-process HTTP stub; returns the base URL and a log of (path, body) pairs.
async fn spawn_stub(routes: Vec<Route>) -> (String, Seen) {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
	let addr: SocketAddr = listener.local_addr().expect("stub addr");
	let routes = Arc::new(routes);
	let seen: Seen = Arc::new(Mutex::new(Vec::new()));

	let seen_srv = seen.clone();
	tokio::spawn(async move {
		loop {
			let Ok((stream, _)) = listener.accept().await else {
				return;
			};
			let routes = routes.clone();
			let seen = seen_srv.clone();
			tokio::spawn(async move {
				let service = service_fn(move |req| handle(req, routes.clone(), seen.clone()));
				let _ = http1::Builder::new().serve_connection(TokioIo::new(stream), service).await;
			});
		}
	});

	(format!("http://{addr}"), seen)
}

fn clients_for(base: &str) -> ProviderClients {
	ProviderClients::new(ProviderSettings {
		openai_base_url: format!("{base}/v1"),
		local_host: base.to_string(),
		request_timeout: Duration::from_secs(5),
		..ProviderSettings::default()
	})
	.expect("clients")
}

fn completion(content: &str) -> String {
	serde_json::json!({
		"choices": [{ "message": { "role": "assistant", "content": content } }]
	})
	.to_string()
}

async fn closed_port_base() -> String {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("addr");
	drop(listener);
	format!("http://{addr}")
}

#[tokio::test]
async fn openai_moderation_maps_and_normalizes() {
	let body = serde_json::json!({
		"results": [{
			"flagged": false,
			"categories": { "harassment": false, "hate": false, "self-harm": null },
			"category_scores": { "harassment": 0.3, "hate": 0.0, "self-harm": 0.0 }
		}]
	});
	let (base, seen) = spawn_stub(vec![route("/v1/moderations", 200, body.to_string())]).await;
	let adapter = OpenAiModeration::new(clients_for(&base), SecretString::new("sk-test"));

	assert_eq!(adapter.kind(), ModerationAdapterKind::OpenAi);
	let result = adapter.moderate("La France aux Français").await.expect("result");
	assert!(!result.flagged);
	assert!(result.category("harassment"));
	assert!(!result.category("self-harm"));
	assert!(result.is_consistent());
	assert!(result.provider_reason.is_none());

	let seen = seen.lock().unwrap();
	let sent: serde_json::Value = serde_json::from_str(&seen[0].1).unwrap();
	assert_eq!(sent["model"], "text-moderation-latest");
	assert_eq!(sent["input"], "La France aux Français");
}

#[tokio::test]
async fn openai_moderation_failure_is_none() {
	let (base, _) = spawn_stub(vec![route("/v1/moderations", 500, "{}")]).await;
	let adapter = OpenAiModeration::new(clients_for(&base), SecretString::new("sk-test"));
	assert!(adapter.moderate("hello").await.is_none());

	let (base, _) = spawn_stub(vec![route("/v1/moderations", 200, r#"{"results":[]}"#)]).await;
	let adapter = OpenAiModeration::new(clients_for(&base), SecretString::new("sk-test"));
	assert!(adapter.moderate("hello").await.is_none());
}

#[tokio::test]
async fn local_moderation_parses_tags() {
	let content = "<thinking>ok</thinking><flagged>true</flagged><reason>harassment</reason><category_scores>0.6</category_scores>";
	let (base, seen) = spawn_stub(vec![route("/v1/chat/completions", 200, completion(content))]).await;
	let adapter = LocalModeration::new(clients_for(&base), "llama3");

	let result = adapter.moderate("La France aux Français").await.expect("result");
	assert!(result.flagged);
	assert_eq!(result.score("harassment"), 0.6);
	assert_eq!(result.provider_reason.as_deref(), Some("harassment"));
	assert!(!result.categories.contains_key("politeness"));

	let seen = seen.lock().unwrap();
	let sent: serde_json::Value = serde_json::from_str(&seen[0].1).unwrap();
	assert_eq!(sent["model"], "llama3");
	assert_eq!(sent["max_tokens"], 200);
	assert_eq!(sent["messages"][0]["role"], "system");
	assert_eq!(sent["messages"][1]["content"], "Here is the message to moderate: La France aux Français");
}

#[tokio::test]
async fn local_moderation_garbage_output_is_unflagged() {
	let (base, _) = spawn_stub(vec![route("/v1/chat/completions", 200, completion("je ne sais pas"))]).await;
	let adapter = LocalModeration::new(clients_for(&base), "llama3");
	let result = adapter.moderate("bonjour").await.expect("result");
	assert!(!result.flagged);
	assert!(result.flagged_categories().next().is_none());
}

#[tokio::test]
async fn escalation_reports_extended_categories() {
	let content = "<flagged>true</flagged><reason>racism, harassment</reason><category_scores>1.0</category_scores>";
	let (base, _) = spawn_stub(vec![route("/v1/chat/completions", 200, completion(content))]).await;
	let adapter = EscalationModeration::new(clients_for(&base), SecretString::new("sk-test"));

	assert_eq!(adapter.kind(), ModerationAdapterKind::Escalation);
	let result = adapter.moderate("La France aux Français").await.expect("result");
	assert!(result.flagged);
	assert!(result.category("racism"));
	assert!(result.category("harassment"));
	assert!(!result.category("politeness"));
	assert!(result.categories.contains_key("weird_joke"));
}

#[tokio::test]
async fn local_generator_strips_thinking() {
	let content = "<think>plan the answer</think>\n\n\nMerci pour ton message !";
	let (base, _) = spawn_stub(vec![route("/v1/chat/completions", 200, completion(content))]).await;
	let generator = LocalGenerator::new(clients_for(&base), "llama3");

	assert_eq!(generator.provider(), Provider::LocalModel);
	assert_eq!(generator.generate("viewer à dit : \"salut\"").await.as_deref(), Some("Merci pour ton message !"));
}

#[tokio::test]
async fn openai_generator_returns_raw_text_and_absorbs_errors() {
	let (base, seen) = spawn_stub(vec![route("/v1/chat/completions", 200, completion(" Bonjour ! "))]).await;
	let generator = OpenAiGenerator::new(clients_for(&base), SecretString::new("sk-test"));
	assert_eq!(generator.generate("prompt").await.as_deref(), Some(" Bonjour ! "));
	let sent: serde_json::Value = serde_json::from_str(&seen.lock().unwrap()[0].1).unwrap();
	assert_eq!(sent["model"], "gpt-4o-mini");
	assert_eq!(sent["max_tokens"], 100);

	let (base, _) = spawn_stub(vec![route("/v1/chat/completions", 401, "{}")]).await;
	let generator = OpenAiGenerator::new(clients_for(&base), SecretString::new("sk-bad"));
	assert!(generator.generate("prompt").await.is_none());

	let generator = OpenAiGenerator::new(clients_for(&closed_port_base().await), SecretString::new("sk-test"));
	assert!(generator.generate("prompt").await.is_none());
}

#[tokio::test]
async fn lists_local_models() {
	let body = r#"{"models":[{"name":"llama3:latest","size":4661224676},{"name":"mistral"}]}"#;
	let (base, _) = spawn_stub(vec![route("/api/tags", 200, body)]).await;
	let models = list_local_models(&clients_for(&base)).await;
	let names: Vec<_> = models.iter().map(|m| m.name.as_str()).collect();
	assert_eq!(names, vec!["llama3:latest", "mistral"]);
	assert_eq!(models[0].size, Some(4661224676));

	assert!(list_local_models(&clients_for(&closed_port_base().await)).await.is_empty());
}
