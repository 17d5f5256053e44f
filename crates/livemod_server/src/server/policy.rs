#![forbid(unsafe_code)]

//! Per-message moderation state machine.
//!
//! ```text
//! NotModerated -> Pass1Pending -> Pass1Done -> EscalationPending -> EscalationDone
//!                                     \-> (terminal when escalation does not apply)
//! ```

use livemod_domain::ModerationResult;
use livemod_providers::ModerationAdapterKind;
use thiserror::Error;

use crate::server::session::SessionContext;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
	#[error("invalid moderation transition: {event} while {from}")]
	InvalidTransition {
		from: &'static str,
		event: &'static str,
	},
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModerationState {
	NotModerated,
	Pass1Pending {
		adapter: ModerationAdapterKind,
	},
	Pass1Done {
		adapter: ModerationAdapterKind,
		result: Option<ModerationResult>,
	},
	/// Pass-1's result stays attached until the escalation resolves.
	EscalationPending {
		pass1: ModerationResult,
	},
	EscalationDone {
		result: Option<ModerationResult>,
	},
}

impl ModerationState {
	pub fn name(&self) -> &'static str {
		match self {
			ModerationState::NotModerated => "not_moderated",
			ModerationState::Pass1Pending { .. } => "pass1_pending",
			ModerationState::Pass1Done { .. } => "pass1_done",
			ModerationState::EscalationPending { .. } => "escalation_pending",
			ModerationState::EscalationDone { .. } => "escalation_done",
		}
	}
}

/// Pass-1 adapter for a session, if any. Local wins when a model is named, else an API key.
pub fn select_pass1(session: &SessionContext) -> Option<ModerationAdapterKind> {
	if !session.moderation_enabled {
		return None;
	}
	if session.local_model().is_some() {
		return Some(ModerationAdapterKind::LocalModel);
	}
	if session.api_key.is_some() {
		return Some(ModerationAdapterKind::OpenAi);
	}
	None
}

/// Escalate only an OpenAI pass-1 verdict that exists and found nothing.
pub fn should_escalate(adapter: ModerationAdapterKind, result: Option<&ModerationResult>) -> bool {
	adapter == ModerationAdapterKind::OpenAi && result.is_some_and(|r| !r.flagged)
}

/// One message's walk through the state machine, counting result writes.
#[derive(Debug, Clone)]
pub struct ModerationTrack {
	state: ModerationState,
	writes: u8,
}

impl Default for ModerationTrack {
	fn default() -> Self {
		Self::new()
	}
}

impl ModerationTrack {
	pub fn new() -> Self {
		Self {
			state: ModerationState::NotModerated,
			writes: 0,
		}
	}

	pub fn state(&self) -> &ModerationState {
		&self.state
	}

	/// Number of times a result was attached (at most two).
	pub fn writes(&self) -> u8 {
		self.writes
	}

	fn invalid(&self, event: &'static str) -> PolicyError {
		PolicyError::InvalidTransition {
			from: self.state.name(),
			event,
		}
	}

	pub fn begin(&mut self, adapter: ModerationAdapterKind) -> Result<(), PolicyError> {
		match self.state {
			ModerationState::NotModerated if adapter != ModerationAdapterKind::Escalation => {
				self.state = ModerationState::Pass1Pending { adapter };
				Ok(())
			}
			_ => Err(self.invalid("begin")),
		}
	}

	pub fn complete_pass1(&mut self, result: Option<ModerationResult>) -> Result<(), PolicyError> {
		let ModerationState::Pass1Pending { adapter } = self.state else {
			return Err(self.invalid("complete_pass1"));
		};
		if result.is_some() {
			self.writes += 1;
		}
		self.state = ModerationState::Pass1Done { adapter, result };
		Ok(())
	}

	pub fn should_escalate(&self) -> bool {
		match &self.state {
			ModerationState::Pass1Done { adapter, result } => should_escalate(*adapter, result.as_ref()),
			_ => false,
		}
	}

	pub fn begin_escalation(&mut self) -> Result<(), PolicyError> {
		match std::mem::replace(&mut self.state, ModerationState::NotModerated) {
			ModerationState::Pass1Done {
				adapter,
				result: Some(pass1),
			} if should_escalate(adapter, Some(&pass1)) => {
				self.state = ModerationState::EscalationPending { pass1 };
				Ok(())
			}
			other => {
				self.state = other;
				Err(self.invalid("begin_escalation"))
			}
		}
	}

	/// A verdict replaces pass-1's result outright; `None` keeps pass-1's.
	pub fn complete_escalation(&mut self, result: Option<ModerationResult>) -> Result<(), PolicyError> {
		match std::mem::replace(&mut self.state, ModerationState::NotModerated) {
			ModerationState::EscalationPending { pass1 } => {
				let result = match result {
					Some(escalated) => {
						self.writes += 1;
						escalated
					}
					None => pass1,
				};
				self.state = ModerationState::EscalationDone { result: Some(result) };
				Ok(())
			}
			other => {
				self.state = other;
				Err(self.invalid("complete_escalation"))
			}
		}
	}

	/// Whether the moderation update for this message may be sent.
	pub fn is_terminal(&self) -> bool {
		match &self.state {
			ModerationState::Pass1Done { .. } => !self.should_escalate(),
			ModerationState::EscalationDone { .. } => true,
			_ => false,
		}
	}

	/// Final result; only meaningful once `is_terminal`.
	pub fn into_result(self) -> Option<ModerationResult> {
		match self.state {
			ModerationState::Pass1Done { result, .. } | ModerationState::EscalationDone { result } => result,
			ModerationState::EscalationPending { pass1 } => Some(pass1),
			ModerationState::NotModerated | ModerationState::Pass1Pending { .. } => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use livemod_domain::Provider;
	use livemod_providers::SecretString;
	use uuid::Uuid;

	use super::*;

	fn session(provider: Provider, model: Option<&str>, key: Option<&str>, moderation: bool) -> SessionContext {
		SessionContext {
			session_id: Uuid::new_v4(),
			room_id: livemod_domain::RoomId::new("room").unwrap(),
			provider,
			model_name: model.map(str::to_string),
			moderation_enabled: moderation,
			responses_enabled: false,
			api_key: key.map(SecretString::new),
		}
	}

	fn verdict(flagged: bool) -> ModerationResult {
		let mut r = ModerationResult::new(flagged);
		r.set_category("harassment", flagged, if flagged { 0.9 } else { 0.0 });
		r
	}

	#[test]
	fn pass1_selection() {
		use ModerationAdapterKind::*;
		assert_eq!(select_pass1(&session(Provider::LocalModel, Some("llama3"), Some("sk"), true)), Some(LocalModel));
		assert_eq!(select_pass1(&session(Provider::LocalModel, None, Some("sk"), true)), Some(OpenAi));
		assert_eq!(select_pass1(&session(Provider::OpenAi, Some("llama3"), Some("sk"), true)), Some(OpenAi));
		assert_eq!(select_pass1(&session(Provider::LocalModel, None, None, true)), None);
		assert_eq!(select_pass1(&session(Provider::OpenAi, None, Some("sk"), false)), None);
	}

	#[test]
	fn escalation_gating() {
		use ModerationAdapterKind::*;
		assert!(should_escalate(OpenAi, Some(&verdict(false))));
		assert!(!should_escalate(OpenAi, Some(&verdict(true))));
		assert!(!should_escalate(OpenAi, None));
		assert!(!should_escalate(LocalModel, Some(&verdict(false))));
		assert!(!should_escalate(LocalModel, Some(&verdict(true))));
	}

	#[test]
	fn openai_clean_result_escalates_and_is_replaced() {
		let mut track = ModerationTrack::new();
		track.begin(ModerationAdapterKind::OpenAi).unwrap();
		track.complete_pass1(Some(verdict(false))).unwrap();
		assert!(track.should_escalate());
		assert!(!track.is_terminal());

		track.begin_escalation().unwrap();
		let mut escalated = ModerationResult::new(true);
		escalated.set_category("racism", true, 1.0);
		track.complete_escalation(Some(escalated.clone())).unwrap();

		assert!(track.is_terminal());
		assert_eq!(track.writes(), 2);
		let result = track.into_result().unwrap();
		assert_eq!(result, escalated);
		assert!(!result.categories.contains_key("harassment"));
	}

	#[test]
	fn null_escalation_keeps_pass1() {
		let mut track = ModerationTrack::new();
		track.begin(ModerationAdapterKind::OpenAi).unwrap();
		track.complete_pass1(Some(verdict(false))).unwrap();
		track.begin_escalation().unwrap();
		track.complete_escalation(None).unwrap();
		assert!(track.is_terminal());
		assert_eq!(track.writes(), 1);
		assert_eq!(track.into_result(), Some(verdict(false)));
	}

	#[test]
	fn flagged_or_local_pass1_is_terminal() {
		let mut track = ModerationTrack::new();
		track.begin(ModerationAdapterKind::OpenAi).unwrap();
		track.complete_pass1(Some(verdict(true))).unwrap();
		assert!(track.is_terminal());
		assert_eq!(
			track.begin_escalation(),
			Err(PolicyError::InvalidTransition {
				from: "pass1_done",
				event: "begin_escalation"
			})
		);

		let mut track = ModerationTrack::new();
		track.begin(ModerationAdapterKind::LocalModel).unwrap();
		track.complete_pass1(Some(verdict(false))).unwrap();
		assert!(track.is_terminal());
		assert_eq!(track.writes(), 1);
	}

	#[test]
	fn null_pass1_is_terminal_without_result() {
		let mut track = ModerationTrack::new();
		track.begin(ModerationAdapterKind::OpenAi).unwrap();
		track.complete_pass1(None).unwrap();
		assert!(track.is_terminal());
		assert_eq!(track.writes(), 0);
		assert!(track.into_result().is_none());
	}

	#[test]
	fn rejects_out_of_order_events() {
		let mut track = ModerationTrack::new();
		assert!(track.complete_pass1(None).is_err());
		assert!(track.complete_escalation(None).is_err());
		assert!(track.begin(ModerationAdapterKind::Escalation).is_err());
		track.begin(ModerationAdapterKind::OpenAi).unwrap();
		assert!(track.begin(ModerationAdapterKind::OpenAi).is_err());
		assert_eq!(track.state().name(), "pass1_pending");
	}
}
