use livemod_domain::{ChatMessage, MessageId, ModerationResult};
use livemod_protocol::{
	ChatView, ClientMessage, DEFAULT_MAX_FRAME_SIZE, FramingError, ServerMessage, SessionOptions, UpdateKind,
	decode_frame, encode_frame, encode_frame_default,
};
use proptest::prelude::*;

fn view(id: &str, text: &str) -> ChatView {
	ChatView::new(ChatMessage::new(MessageId::new(id).unwrap(), "viewer", text), true, true)
}

#[test]
fn encode_frame_default_matches_explicit_default_limit() {
	let msg = ServerMessage::Chat(view("m1", "hello"));
	let a = encode_frame_default(&msg).expect("encode_frame_default");
	let b = encode_frame(&msg, DEFAULT_MAX_FRAME_SIZE).expect("encode_frame");
	assert_eq!(a, b);
}

#[test]
fn encode_rejects_oversize_payload() {
	let msg = ServerMessage::Chat(view("m1", &"a".repeat(1024)));
	let err = encode_frame(&msg, 512).unwrap_err();
	match err {
		FramingError::FrameTooLarge { len, max } => {
			assert_eq!(max, 512);
			assert!(len > max);
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn moderation_update_survives_the_wire() {
	let mut data = view("m7", "La France aux Français");
	data.pending_moderation = false;
	let mut result = ModerationResult::new(true);
	result.set_category("hate", true, 0.8);
	data.moderation = Some(result);

	let msg = ServerMessage::ChatUpdate {
		id: data.id().clone(),
		kind: UpdateKind::Moderation,
		data,
	};
	let frame = encode_frame_default(&msg).expect("encode");
	let decoded: ServerMessage = decode_frame(&frame, DEFAULT_MAX_FRAME_SIZE).expect("decode");
	assert_eq!(decoded, msg);
}

#[test]
fn unknown_client_event_is_rejected() {
	let err = decode_frame::<ClientMessage>(r#"{"event":"like","count":3}"#, DEFAULT_MAX_FRAME_SIZE).unwrap_err();
	assert!(matches!(err, FramingError::Decode(_)));
}

proptest! {
	#[test]
	fn client_handshake_decodes_any_room(room in "[a-zA-Z0-9_.]{1,24}", moderation in any::<bool>()) {
		let msg = ClientMessage::SetUniqueId {
			unique_id: room.clone(),
			options: SessionOptions { show_moderation: moderation, ..SessionOptions::default() },
		};
		let frame = encode_frame_default(&msg).unwrap();
		let decoded: ClientMessage = decode_frame(&frame, DEFAULT_MAX_FRAME_SIZE).unwrap();
		prop_assert_eq!(decoded, msg);
	}

	#[test]
	fn frames_over_limit_never_decode(extra in 1usize..256) {
		let src = " ".repeat(64 + extra);
		let res = decode_frame::<ServerMessage>(&src, 64);
		let too_large = matches!(res, Err(FramingError::FrameTooLarge { .. }));
		prop_assert!(too_large);
	}
}
