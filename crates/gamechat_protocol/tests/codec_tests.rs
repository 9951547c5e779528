use gamechat_domain::{EntityPayload, StoredEntity};
use gamechat_protocol::codec::MAX_ENTITY_SIZE;
use gamechat_protocol::{CodecError, decode_entity, encode_entity, pb};
use prost::Message;

#[test]
fn marker_entity_keeps_absent_payload() {
	let invite = StoredEntity::marker("invite_priv_a_123");

	let bytes = encode_entity(&invite).expect("encode");
	let decoded = decode_entity(&bytes).expect("decode");

	assert_eq!(decoded.id, "invite_priv_a_123");
	assert!(decoded.payload.is_none());
}

#[test]
fn channel_list_is_stored_as_chat_channels() {
	let entity = StoredEntity::with_payload(
		"subscriptions_p1",
		EntityPayload::Channels(vec!["general".to_string(), "trade".to_string()]),
	);

	let bytes = encode_entity(&entity).expect("encode");
	let raw = pb::Entity::decode(bytes.as_ref()).expect("decode raw");

	match raw.payload {
		Some(pb::entity::Payload::ChatChannels(c)) => {
			let names: Vec<_> = c.chat_channel.into_iter().map(|ch| ch.name).collect();
			assert_eq!(names, vec!["general", "trade"]);
		}
		other => panic!("expected ChatChannels payload, got: {other:?}"),
	}
}

#[test]
fn flags_are_stored_as_params() {
	let entity = StoredEntity::with_payload("channel_flagsp1general", EntityPayload::ChannelFlags("subscribers".into()));

	let decoded = decode_entity(&encode_entity(&entity).expect("encode")).expect("decode");
	assert_eq!(decoded.channel_flags(), Some("subscribers"));
}

#[test]
fn garbage_fails_to_decode() {
	let err = decode_entity(&[0xff, 0xff, 0xff]).unwrap_err();
	assert!(matches!(err, CodecError::Decode(_)), "unexpected error: {err:?}");
}

#[test]
fn oversized_entity_is_rejected() {
	let big = "x".repeat(MAX_ENTITY_SIZE);
	let entity = StoredEntity::with_payload("big", EntityPayload::Subscribers(vec![big]));

	match encode_entity(&entity) {
		Err(CodecError::TooLarge { len, max, .. }) => assert!(len > max),
		other => panic!("expected TooLarge, got: {other:?}"),
	}
}
