#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use futures::{SinkExt, StreamExt};
use livemod_protocol::framing::{DEFAULT_MAX_FRAME_SIZE, decode_frame, encode_frame};
use livemod_protocol::{ClientMessage, LocalModel, ServerMessage, SessionOptions, error_codes};
use livemod_providers::{
	LiveSourceFactory, ProviderFactory, SecretString, SourceControl, SourceEvent, bounded_source_channels, disconnected,
	validate_chat_message,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::server::capabilities::SessionCapabilities;
use crate::server::controller::{ControllerSettings, DEFAULT_ADAPTER_TIMEOUT, MessageController};
use crate::server::fanout::to_server_message;
use crate::server::session::SessionContext;
use crate::server::state::ConnectionStats;
use crate::server::trigger::TriggerTokens;

const SOURCE_CONTROL_CAPACITY: usize = 8;
const SOURCE_EVENTS_CAPACITY: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type WsReader<S> = futures::stream::SplitStream<WebSocketStream<S>>;

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
	/// How long a client may take to send `setUniqueId`.
	pub handshake_timeout: Duration,
	pub outbound_capacity: usize,
	pub max_frame_size: usize,
	pub adapter_timeout: Duration,
}

impl Default for ConnectionSettings {
	fn default() -> Self {
		Self {
			handshake_timeout: Duration::from_secs(30),
			outbound_capacity: 256,
			max_frame_size: DEFAULT_MAX_FRAME_SIZE,
			adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
		}
	}
}

/// Services shared by every connection.
#[derive(Clone)]
pub struct ServerContext {
	pub providers: Arc<dyn ProviderFactory>,
	pub sources: Arc<dyn LiveSourceFactory>,
	pub triggers: Arc<TriggerTokens>,
	pub stats: ConnectionStats,
	/// Active connection count, published periodically.
	pub statistics: broadcast::Sender<u64>,
	pub fallback_api_key: Option<SecretString>,
	pub settings: ConnectionSettings,
}

/// Serve one UI connection from the WebSocket upgrade until either side goes away.
pub async fn handle_connection<S>(conn_id: u64, stream: S, ctx: ServerContext) -> anyhow::Result<()>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let ws = tokio_tungstenite::accept_async(stream)
		.await
		.context("websocket upgrade")?;
	let _conn_guard = ctx.stats.connection_opened();
	let max_frame_size = ctx.settings.max_frame_size;

	let (mut ws_tx, mut ws_rx) = ws.split();
	let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(ctx.settings.outbound_capacity.max(1));

	let writer = tokio::spawn(async move {
		while let Some(msg) = out_rx.recv().await {
			let frame = match encode_frame(&msg, max_frame_size) {
				Ok(frame) => frame,
				Err(e) => {
					warn!(conn_id, event = msg.event_name(), error = %e, "dropping outbound message");
					continue;
				}
			};
			if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
				debug!(conn_id, error = %e, "websocket write failed");
				break;
			}
		}
		let _ = ws_tx.close().await;
	});

	let models_task = {
		let providers = Arc::clone(&ctx.providers);
		let out_tx = out_tx.clone();
		tokio::spawn(async move {
			let models = providers
				.local_models()
				.await
				.into_iter()
				.map(|m| LocalModel {
					name: m.name,
					size: m.size,
					modified_at: m.modified_at,
				})
				.collect();
			let _ = out_tx.send(ServerMessage::LocalModels { models }).await;
		})
	};

	let handshake = timeout(
		ctx.settings.handshake_timeout,
		wait_for_handshake(conn_id, &mut ws_rx, &out_tx, max_frame_size),
	)
	.await;

	let (unique_id, options) = match handshake {
		Ok(Some(handshake)) => handshake,
		Ok(None) => {
			debug!(conn_id, "client left before setUniqueId");
			finish(conn_id, out_tx, writer, [models_task]).await;
			return Ok(());
		}
		Err(_) => {
			warn!(conn_id, "handshake timed out");
			let _ = out_tx
				.send(ServerMessage::error(
					error_codes::HANDSHAKE_TIMEOUT,
					"expected setUniqueId",
				))
				.await;
			finish(conn_id, out_tx, writer, [models_task]).await;
			return Ok(());
		}
	};

	let (session, warnings) =
		match SessionContext::from_options(&unique_id, &options, ctx.fallback_api_key.as_ref()) {
			Ok(session) => session,
			Err(e) => {
				info!(conn_id, error = %e, "rejecting session");
				let _ = out_tx
					.send(ServerMessage::error(error_codes::INVALID_ROOM, e.to_string()))
					.await;
				finish(conn_id, out_tx, writer, [models_task]).await;
				return Ok(());
			}
		};
	for warning in &warnings {
		warn!(conn_id, session_id = %session.session_id, ?warning, "session created with warning");
	}

	let session = Arc::new(session);
	let caps = SessionCapabilities::select(&session, ctx.providers.as_ref());
	let mut controller = MessageController::new(
		Arc::clone(&session),
		caps,
		Arc::clone(&ctx.triggers),
		out_tx.clone(),
		ControllerSettings {
			adapter_timeout: ctx.settings.adapter_timeout,
		},
	);

	let (control_tx, control_rx, events_tx, mut events_rx) =
		bounded_source_channels(SOURCE_CONTROL_CAPACITY, SOURCE_EVENTS_CAPACITY);

	let source_task = match ctx.sources.create(&session.room_id) {
		Ok(source) => {
			let name = source.name();
			let room = session.room_id.clone();
			let failure_tx = events_tx.clone();
			info!(conn_id, session_id = %session.session_id, room = %room, source = name, "starting live source");
			Some(tokio::spawn(async move {
				if let Err(e) = source.run(room, control_rx, events_tx).await {
					warn!(conn_id, source = name, error = %e, "live source stopped with error");
					let _ = failure_tx.send(disconnected(e)).await;
				}
			}))
		}
		Err(e) => {
			warn!(conn_id, session_id = %session.session_id, error = %e, "live source unavailable");
			let _ = out_tx.send(disconnected_message(&e)).await;
			None
		}
	};

	let mut statistics = ctx.statistics.subscribe();
	let mut source_done = false;
	let mut statistics_done = false;

	loop {
		tokio::select! {
			ev = events_rx.recv(), if !source_done => match ev {
				Some(SourceEvent::Chat(message)) => {
					if let Err(e) = validate_chat_message(&message) {
						debug!(conn_id, error = %e, "dropping invalid chat message");
						continue;
					}
					if controller.handle_chat(message).await.is_err() {
						break;
					}
				}
				Some(event) => {
					if let Some(msg) = to_server_message(event)
						&& out_tx.send(msg).await.is_err()
					{
						break;
					}
				}
				None => {
					debug!(conn_id, "live source finished");
					source_done = true;
				}
			},
			stat = statistics.recv(), if !statistics_done => match stat {
				Ok(count) => {
					if out_tx
						.send(ServerMessage::Statistic { global_connection_count: count })
						.await
						.is_err()
					{
						break;
					}
				}
				Err(RecvError::Lagged(_)) => {}
				Err(RecvError::Closed) => statistics_done = true,
			},
			frame = ws_rx.next() => match frame {
				Some(Ok(Message::Text(text))) => {
					let reply = match decode_frame::<ClientMessage>(text.as_str(), max_frame_size) {
						Ok(ClientMessage::SetUniqueId { .. }) => ServerMessage::error(
							error_codes::SESSION_ALREADY_CONFIGURED,
							"session is already configured for this connection",
						),
						Err(e) => ServerMessage::error(error_codes::BAD_REQUEST, e.to_string()),
					};
					if out_tx.send(reply).await.is_err() {
						break;
					}
				}
				Some(Ok(Message::Binary(_))) => {
					let _ = out_tx
						.send(ServerMessage::error(error_codes::BAD_REQUEST, "binary frames are not supported"))
						.await;
				}
				Some(Ok(Message::Close(_))) | None => break,
				Some(Ok(_)) => {}
				Some(Err(e)) => {
					debug!(conn_id, error = %e, "websocket read failed");
					break;
				}
			},
			_ = out_tx.closed() => break,
		}
	}

	debug!(conn_id, in_flight = controller.in_flight(), "session closing");
	let _ = control_tx.try_send(SourceControl::Shutdown);
	controller.shutdown();
	drop(controller);

	if let Some(task) = source_task {
		let abort = task.abort_handle();
		if timeout(SHUTDOWN_GRACE, task).await.is_err() {
			warn!(conn_id, "live source did not stop in time; aborting");
			abort.abort();
		}
	}

	finish(conn_id, out_tx, writer, [models_task]).await;
	info!(conn_id, session_id = %session.session_id, "session ended");
	Ok(())
}

fn disconnected_message(err: &anyhow::Error) -> ServerMessage {
	ServerMessage::TiktokDisconnected {
		reason: format!("{err:#}"),
	}
}

/// Read client frames until a valid `setUniqueId`. `None` when the client goes away first.
async fn wait_for_handshake<S>(
	conn_id: u64,
	ws_rx: &mut WsReader<S>,
	out_tx: &mpsc::Sender<ServerMessage>,
	max_frame_size: usize,
) -> Option<(String, SessionOptions)>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	while let Some(frame) = ws_rx.next().await {
		match frame {
			Ok(Message::Text(text)) => match decode_frame::<ClientMessage>(text.as_str(), max_frame_size) {
				Ok(ClientMessage::SetUniqueId { unique_id, options }) => return Some((unique_id, options)),
				Err(e) => {
					debug!(conn_id, error = %e, "bad frame before handshake");
					let _ = out_tx
						.send(ServerMessage::error(error_codes::BAD_REQUEST, e.to_string()))
						.await;
				}
			},
			Ok(Message::Binary(_)) => {
				let _ = out_tx
					.send(ServerMessage::error(error_codes::BAD_REQUEST, "binary frames are not supported"))
					.await;
			}
			Ok(Message::Close(_)) => return None,
			Ok(_) => {}
			Err(e) => {
				debug!(conn_id, error = %e, "websocket read failed during handshake");
				return None;
			}
		}
	}
	None
}

/// Stop helper tasks, flush queued frames and close the socket.
async fn finish<const N: usize>(
	conn_id: u64,
	out_tx: mpsc::Sender<ServerMessage>,
	writer: JoinHandle<()>,
	helpers: [JoinHandle<()>; N],
) {
	for helper in helpers {
		helper.abort();
	}
	drop(out_tx);

	let abort = writer.abort_handle();
	if timeout(SHUTDOWN_GRACE, writer).await.is_err() {
		debug!(conn_id, "writer did not drain in time");
		abort.abort();
	}
}
