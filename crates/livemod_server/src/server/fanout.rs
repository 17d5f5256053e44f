#![forbid(unsafe_code)]

use livemod_protocol::ServerMessage;
use livemod_providers::SourceEvent;

/// Map a non-chat source event onto the UI message it is forwarded as.
///
/// Chat events go through the controller instead and map to `None`.
pub fn to_server_message(event: SourceEvent) -> Option<ServerMessage> {
	match event {
		SourceEvent::Chat(_) => None,
		SourceEvent::Connected { state, .. } => Some(ServerMessage::TiktokConnected { state }),
		SourceEvent::Disconnected { reason } => Some(ServerMessage::TiktokDisconnected { reason }),
		SourceEvent::StreamEnd => Some(ServerMessage::StreamEnd),
		SourceEvent::Passthrough { kind, payload } => Some(ServerMessage::Live {
			name: kind.as_str().to_string(),
			data: payload,
		}),
	}
}

#[cfg(test)]
mod tests {
	use livemod_domain::{ChatMessage, MessageId};
	use livemod_providers::LiveEventKind;
	use serde_json::json;

	use super::*;

	#[test]
	fn passthrough_is_forwarded_verbatim() {
		let payload = json!({"uniqueId": "viewer", "giftId": 5655, "repeatCount": 3});
		let msg = to_server_message(SourceEvent::Passthrough {
			kind: LiveEventKind::Gift,
			payload: payload.clone(),
		})
		.unwrap();
		assert_eq!(
			msg,
			ServerMessage::Live {
				name: "gift".to_string(),
				data: payload
			}
		);
	}

	#[test]
	fn lifecycle_events_map_to_their_own_messages() {
		let state = json!({"roomId": "7300000000000000000"});
		assert_eq!(
			to_server_message(SourceEvent::Connected {
				room_id: "room".to_string(),
				state: state.clone()
			}),
			Some(ServerMessage::TiktokConnected { state })
		);
		assert_eq!(
			to_server_message(livemod_providers::disconnected("offline")),
			Some(ServerMessage::TiktokDisconnected {
				reason: "offline".to_string()
			})
		);
		assert_eq!(to_server_message(SourceEvent::StreamEnd), Some(ServerMessage::StreamEnd));
	}

	#[test]
	fn chat_is_not_fanned_out() {
		let chat = ChatMessage::new(MessageId::new("1").unwrap(), "viewer", "salut");
		assert!(to_server_message(SourceEvent::Chat(chat)).is_none());
	}
}
