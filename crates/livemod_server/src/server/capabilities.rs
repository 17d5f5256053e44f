#![forbid(unsafe_code)]

use std::sync::Arc;

use livemod_providers::{ModerationAdapter, ModerationAdapterKind, ProviderFactory, ResponseGenerator};
use tracing::debug;

use crate::server::policy::select_pass1;
use crate::server::session::SessionContext;

/// Adapters a session resolved to at handshake time.
#[derive(Clone, Default)]
pub struct SessionCapabilities {
	pub pass1: Option<Arc<dyn ModerationAdapter>>,
	/// Present only alongside an OpenAI pass-1 adapter.
	pub escalation: Option<Arc<dyn ModerationAdapter>>,
	pub generator: Option<Arc<dyn ResponseGenerator>>,
}

impl SessionCapabilities {
	pub fn select(session: &SessionContext, factory: &dyn ProviderFactory) -> Self {
		let mut caps = Self::default();

		match (select_pass1(session), session.local_model(), session.api_key.as_ref()) {
			(Some(ModerationAdapterKind::LocalModel), Some(model), _) => {
				caps.pass1 = Some(factory.local_moderation(model));
			}
			(Some(ModerationAdapterKind::OpenAi), _, Some(key)) => {
				caps.pass1 = Some(factory.openai_moderation(key));
				caps.escalation = Some(factory.escalation(key));
			}
			_ => {}
		}

		if session.responses_enabled {
			caps.generator = match (session.local_model(), session.api_key.as_ref()) {
				(Some(model), _) => Some(factory.local_generator(model)),
				(None, Some(key)) => Some(factory.openai_generator(key)),
				(None, None) => None,
			};
		}

		debug!(
			session_id = %session.session_id,
			pass1 = caps.pass1.as_ref().map(|a| a.kind().as_str()).unwrap_or("none"),
			escalation = caps.escalation.is_some(),
			generator = caps.generator.is_some(),
			"session capabilities selected"
		);

		caps
	}
}
