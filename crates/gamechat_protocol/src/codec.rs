#![forbid(unsafe_code)]

use bytes::Bytes;
use gamechat_domain::{EntityPayload, StoredEntity};
use prost::Message;
use thiserror::Error;

use crate::pb;

/// Maximum encoded size of a stored entity.
pub const MAX_ENTITY_SIZE: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("entity exceeds maximum size: id={id} len={len} max={max}")]
	TooLarge {
		id: String,
		len: usize,
		max: usize,
	},

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),
}

impl From<&StoredEntity> for pb::Entity {
	fn from(entity: &StoredEntity) -> Self {
		let payload = entity.payload.as_ref().map(|p| match p {
			EntityPayload::Subscribers(ids) => pb::entity::Payload::Subscribers(pb::Subscribers {
				subscriber_id: ids.clone(),
			}),
			EntityPayload::ChannelFlags(raw) => pb::entity::Payload::Params(raw.clone()),
			EntityPayload::Channels(names) => pb::entity::Payload::ChatChannels(pb::ChatChannels {
				chat_channel: names.iter().map(|name| pb::ChatChannel { name: name.clone() }).collect(),
			}),
		});

		Self {
			id: entity.id.clone(),
			payload,
		}
	}
}

impl From<pb::Entity> for StoredEntity {
	fn from(entity: pb::Entity) -> Self {
		let payload = entity.payload.map(|p| match p {
			pb::entity::Payload::Subscribers(s) => EntityPayload::Subscribers(s.subscriber_id),
			pb::entity::Payload::Params(raw) => EntityPayload::ChannelFlags(raw),
			pb::entity::Payload::ChatChannels(c) => {
				EntityPayload::Channels(c.chat_channel.into_iter().map(|ch| ch.name).collect())
			}
		});

		Self { id: entity.id, payload }
	}
}

/// Encode a stored entity into the bytes handed to a backend.
pub fn encode_entity(entity: &StoredEntity) -> Result<Bytes, CodecError> {
	let msg = pb::Entity::from(entity);
	let len = msg.encoded_len();
	if len > MAX_ENTITY_SIZE {
		return Err(CodecError::TooLarge {
			id: entity.id.clone(),
			len,
			max: MAX_ENTITY_SIZE,
		});
	}
	Ok(Bytes::from(msg.encode_to_vec()))
}

/// Decode backend bytes into a stored entity.
pub fn decode_entity(src: &[u8]) -> Result<StoredEntity, CodecError> {
	let msg = pb::Entity::decode(src)?;
	Ok(msg.into())
}
