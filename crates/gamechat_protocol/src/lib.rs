#![forbid(unsafe_code)]

pub mod codec;

pub use codec::{CodecError, decode_entity, encode_entity};

/// Protobuf records (`gamechat.v1`) written to the object store.
pub mod pb {
	/// Stored record; exactly one payload kind or none.
	#[derive(Clone, PartialEq, ::prost::Message)]
	pub struct Entity {
		#[prost(string, tag = "1")]
		pub id: ::prost::alloc::string::String,
		#[prost(oneof = "entity::Payload", tags = "2, 3, 4")]
		pub payload: ::core::option::Option<entity::Payload>,
	}

	pub mod entity {
		#[derive(Clone, PartialEq, ::prost::Oneof)]
		pub enum Payload {
			#[prost(message, tag = "2")]
			Subscribers(super::Subscribers),
			/// Raw channel flag string.
			#[prost(string, tag = "3")]
			Params(::prost::alloc::string::String),
			#[prost(message, tag = "4")]
			ChatChannels(super::ChatChannels),
		}
	}

	#[derive(Clone, PartialEq, ::prost::Message)]
	pub struct Subscribers {
		#[prost(string, repeated, tag = "1")]
		pub subscriber_id: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
	}

	#[derive(Clone, PartialEq, ::prost::Message)]
	pub struct ChatChannel {
		#[prost(string, tag = "1")]
		pub name: ::prost::alloc::string::String,
	}

	#[derive(Clone, PartialEq, ::prost::Message)]
	pub struct ChatChannels {
		#[prost(message, repeated, tag = "1")]
		pub chat_channel: ::prost::alloc::vec::Vec<ChatChannel>,
	}
}

