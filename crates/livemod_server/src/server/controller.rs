#![forbid(unsafe_code)]

//! Per-session message lifecycle: echo, then independent moderation and response pipelines.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use livemod_domain::{ChatMessage, ModerationResult, Provider};
use livemod_protocol::{ChatView, ServerMessage, UpdateKind};
use livemod_providers::{ModerationAdapter, ResponseGenerator};
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::server::capabilities::SessionCapabilities;
use crate::server::policy::{ModerationTrack, PolicyError};
use crate::server::session::SessionContext;
use crate::server::trigger::TriggerTokens;

pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ControllerSettings {
	/// Upper bound for a single adapter call.
	pub adapter_timeout: Duration,
}

impl Default for ControllerSettings {
	fn default() -> Self {
		Self {
			adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
		}
	}
}

/// Latest state of one message, shared by its two pipelines so each update carries the other's progress.
type SharedView = Arc<Mutex<ChatView>>;

pub struct MessageController {
	session: Arc<SessionContext>,
	caps: SessionCapabilities,
	triggers: Arc<TriggerTokens>,
	outbound: mpsc::Sender<ServerMessage>,
	tasks: JoinSet<()>,
	settings: ControllerSettings,
}

impl MessageController {
	pub fn new(
		session: Arc<SessionContext>,
		caps: SessionCapabilities,
		triggers: Arc<TriggerTokens>,
		outbound: mpsc::Sender<ServerMessage>,
		settings: ControllerSettings,
	) -> Self {
		Self {
			session,
			caps,
			triggers,
			outbound,
			tasks: JoinSet::new(),
			settings,
		}
	}

	/// Number of pipeline tasks not yet reaped.
	pub fn in_flight(&self) -> usize {
		self.tasks.len()
	}

	/// Echo `message` to the UI, then start whichever pipelines apply.
	///
	/// Fails only when the outbound channel is closed.
	pub async fn handle_chat(&mut self, message: ChatMessage) -> anyhow::Result<()> {
		self.reap();

		metrics::counter!("livemod_server_chat_messages_total").increment(1);

		let pass1 = self
			.caps
			.pass1
			.clone()
			.filter(|_| self.session.moderation_enabled && !message.text.trim().is_empty());
		let generator = self
			.caps
			.generator
			.clone()
			.filter(|_| self.session.responses_enabled && self.triggers.matches(&message.text));

		let span = info_span!(
			"message",
			session_id = %self.session.session_id,
			message_id = %message.id
		);

		let prompt = generator.as_ref().map(|_| response_prompt(&message));
		let text = message.text.clone();
		let view = ChatView::new(message, pass1.is_some(), generator.is_some());

		self.outbound
			.send(ServerMessage::Chat(view.clone()))
			.await
			.map_err(|_| anyhow!("outbound channel closed"))?;

		let shared: SharedView = Arc::new(Mutex::new(view));
		let limit = self.settings.adapter_timeout;

		if let Some(pass1) = pass1 {
			let escalation = self.caps.escalation.clone();
			let shared = Arc::clone(&shared);
			let outbound = self.outbound.clone();
			let text = text.clone();
			self.tasks.spawn(
				async move {
					let result = match moderate(pass1, escalation, text, limit).await {
						Ok(result) => result,
						Err(e) => {
							warn!(error = %e, "moderation aborted");
							None
						}
					};
					if let Some(r) = result.as_ref().filter(|r| r.flagged) {
						metrics::counter!("livemod_server_moderation_flagged_total").increment(1);
						let categories: Vec<&str> = r.flagged_categories().map(|(name, _)| name).collect();
						info!(categories = ?categories, reason = r.provider_reason.as_deref().unwrap_or("-"), "message flagged");
					}
					publish(&shared, &outbound, UpdateKind::Moderation, |v| {
						v.moderation = result;
						v.pending_moderation = false;
					})
					.await;
				}
				.instrument(span.clone()),
			);
		}

		if let (Some(generator), Some(prompt)) = (generator, prompt) {
			let outbound = self.outbound.clone();
			self.tasks.spawn(
				async move {
					let reply = respond(generator, prompt, limit).await;
					publish(&shared, &outbound, UpdateKind::Response, |v| {
						v.suggested_response = reply;
						v.pending_response = false;
					})
					.await;
				}
				.instrument(span),
			);
		}

		Ok(())
	}

	fn reap(&mut self) {
		while let Some(res) = self.tasks.try_join_next() {
			if let Err(e) = res
				&& e.is_panic()
			{
				warn!(session_id = %self.session.session_id, error = %e, "pipeline task panicked");
			}
		}
	}

	/// Abort all in-flight pipelines. Their updates are never sent.
	pub fn shutdown(&mut self) {
		let pending = self.tasks.len();
		self.tasks.abort_all();
		if pending > 0 {
			debug!(session_id = %self.session.session_id, pending, "aborted in-flight pipelines");
		}
	}
}

/// Prompt handed to the response generator for a triggering comment.
pub fn response_prompt(message: &ChatMessage) -> String {
	let display = message.display_name();
	match message.text.strip_prefix('@') {
		Some(rest) => format!("{display} à écrit à {rest} : {}", message.text),
		None => format!("{display} à dit : \"{}\"", message.text),
	}
}

async fn moderate(
	pass1: Arc<dyn ModerationAdapter>,
	escalation: Option<Arc<dyn ModerationAdapter>>,
	text: String,
	limit: Duration,
) -> Result<Option<ModerationResult>, PolicyError> {
	let mut track = ModerationTrack::new();
	let kind = pass1.kind();

	track.begin(kind)?;
	metrics::counter!("livemod_server_moderation_passes_total", "adapter" => kind.as_str()).increment(1);
	let first = {
		let text = text.clone();
		guarded(kind.as_str(), limit, async move { pass1.moderate(&text).await }).await
	};
	track.complete_pass1(first)?;

	if track.should_escalate()
		&& let Some(escalation) = escalation
	{
		track.begin_escalation()?;
		let label = escalation.kind().as_str();
		metrics::counter!("livemod_server_moderation_escalations_total").increment(1);
		metrics::counter!("livemod_server_moderation_passes_total", "adapter" => label).increment(1);
		debug!("pass-1 clean; escalating");
		let second = guarded(label, limit, async move { escalation.moderate(&text).await }).await;
		track.complete_escalation(second)?;
	}

	// an OpenAI pass with no escalation adapter wired stops short of terminal
	debug!(
		state = track.state().name(),
		writes = track.writes(),
		terminal = track.is_terminal(),
		"moderation resolved"
	);
	Ok(track.into_result())
}

async fn respond(generator: Arc<dyn ResponseGenerator>, prompt: String, limit: Duration) -> Option<String> {
	let label = match generator.provider() {
		Provider::OpenAi => "generate-openai",
		Provider::LocalModel => "generate-local",
	};
	let reply = guarded(label, limit, async move { generator.generate(&prompt).await }).await;
	if reply.is_some() {
		metrics::counter!("livemod_server_responses_total").increment(1);
	}
	reply
}

/// Apply `f` to the shared view and send the snapshot while still holding the lock.
async fn publish(
	view: &SharedView,
	outbound: &mpsc::Sender<ServerMessage>,
	kind: UpdateKind,
	f: impl FnOnce(&mut ChatView),
) {
	let mut guard = view.lock().await;
	f(&mut guard);
	let update = ServerMessage::ChatUpdate {
		id: guard.id().clone(),
		kind,
		data: guard.clone(),
	};
	if outbound.send(update).await.is_err() {
		debug!(?kind, "outbound closed; update dropped");
	}
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// Run one adapter call in its own task under `limit`. Panics and timeouts become `None`.
async fn guarded<T, F>(adapter: &'static str, limit: Duration, call: F) -> Option<T>
where
	F: Future<Output = Option<T>> + Send + 'static,
	T: Send + 'static,
{
	let started = Instant::now();
	let mut handle = AbortOnDrop(tokio::spawn(call));

	let outcome = match tokio::time::timeout(limit, &mut handle.0).await {
		Ok(Ok(value)) => value,
		Ok(Err(e)) => {
			warn!(adapter, error = %e, "adapter task failed");
			None
		}
		Err(_) => {
			warn!(adapter, timeout_ms = limit.as_millis() as u64, "adapter call timed out");
			None
		}
	};

	metrics::histogram!("livemod_server_adapter_latency_seconds", "adapter" => adapter)
		.record(started.elapsed().as_secs_f64());
	if outcome.is_none() {
		metrics::counter!("livemod_server_adapter_failures_total", "adapter" => adapter).increment(1);
	}

	outcome
}

#[cfg(test)]
mod tests {
	use livemod_domain::MessageId;

	use super::*;

	fn msg(text: &str) -> ChatMessage {
		ChatMessage::new(MessageId::new("m1").unwrap(), "viewer", text).with_display_name("Viewer")
	}

	#[test]
	fn prompt_for_plain_comment() {
		assert_eq!(response_prompt(&msg("Gentil Robot, ça va ?")), "Viewer à dit : \"Gentil Robot, ça va ?\"");
	}

	#[test]
	fn prompt_for_addressed_comment() {
		assert_eq!(
			response_prompt(&msg("@SamLePirate salut")),
			"Viewer à écrit à SamLePirate salut : @SamLePirate salut"
		);
	}

	#[tokio::test]
	async fn guarded_absorbs_panic_and_timeout() {
		let explode = true;
		let panicked = guarded("test", Duration::from_secs(1), async move {
			assert!(!explode, "boom");
			Some(1u8)
		})
		.await;
		assert!(panicked.is_none());

		let slow: Option<u8> = guarded("test", Duration::from_millis(20), async {
			tokio::time::sleep(Duration::from_secs(5)).await;
			Some(1)
		})
		.await;
		assert!(slow.is_none());

		let ok = guarded("test", Duration::from_secs(1), async { Some(7u8) }).await;
		assert_eq!(ok, Some(7));
	}
}
