#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers and message fields.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("unknown message kind: {0}")]
	UnknownMessageKind(String),
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Stable chat identity (usually the player id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
	/// Create a non-empty `SessionId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for SessionId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		SessionId::new(s.to_string())
	}
}

/// Game a player belongs to; topics and subscriber lists are scoped by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
	/// Create a non-empty `GameId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for GameId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Where a session sends its outbound status updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrantKind {
	/// Deliver straight to the player connection for the session id.
	Player,
	/// Deliver to a named actor, tagged with the session id.
	Actor(String),
}

impl RegistrantKind {
	/// Parse the registrant label used by callers (`"player"` or an actor name).
	pub fn from_label(label: &str) -> Result<Self, ParseIdError> {
		let label = label.trim();
		if label.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if label == "player" {
			Ok(Self::Player)
		} else {
			Ok(Self::Actor(label.to_string()))
		}
	}
}

/// Flag token that asks for the subscriber list in status updates.
pub const SUBSCRIBERS_FLAG: &str = "subscribers";

/// Separator used in the raw flag string (`subscribers|muted`).
pub const FLAG_SEPARATOR: char = '|';

/// Ordered set of channel flag tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags(Vec<String>);

impl ChannelFlags {
	/// Parse a raw `a|b|c` flag string. Empty tokens and repeats are dropped.
	pub fn parse(raw: &str) -> Self {
		let mut tokens: Vec<String> = Vec::new();
		for token in raw.split(FLAG_SEPARATOR) {
			let token = token.trim();
			if token.is_empty() || tokens.iter().any(|t| t == token) {
				continue;
			}
			tokens.push(token.to_string());
		}
		Self(tokens)
	}

	pub fn contains(&self, token: &str) -> bool {
		self.0.iter().any(|t| t == token)
	}

	pub fn wants_subscribers(&self) -> bool {
		self.contains(SUBSCRIBERS_FLAG)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn tokens(&self) -> &[String] {
		&self.0
	}

	/// Raw `|`-joined form, as persisted.
	pub fn to_raw(&self) -> String {
		self.0.join("|")
	}
}

/// Prefix that marks a private channel (`priv_<owner>`).
pub const PRIVATE_CHANNEL_PREFIX: &str = "priv_";

/// Channel reference carried by join/leave requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
	pub name: String,
	/// Raw flag string; `None` leaves persisted flags untouched.
	pub flags: Option<String>,
	pub invite_id: Option<String>,
}

impl Channel {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			flags: None,
			invite_id: None,
		}
	}

	pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
		self.flags = Some(flags.into());
		self
	}

	pub fn with_invite(mut self, invite_id: impl Into<String>) -> Self {
		self.invite_id = Some(invite_id.into());
		self
	}

	pub fn is_private(&self) -> bool {
		is_private_channel(&self.name)
	}
}

/// Whether `name` follows the private channel convention.
pub fn is_private_channel(name: &str) -> bool {
	name.starts_with(PRIVATE_CHANNEL_PREFIX)
}

/// Whether `session` owns the private channel `name`.
///
/// Accepts `priv_<session>` and `priv_<session>_<suffix>`.
pub fn is_private_channel_owner(name: &str, session: &SessionId) -> bool {
	let Some(rest) = name.strip_prefix(PRIVATE_CHANNEL_PREFIX) else {
		return false;
	};
	match rest.strip_prefix(session.as_str()) {
		Some("") => true,
		Some(suffix) => suffix.starts_with('_'),
		None => false,
	}
}

/// Chat message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
	Group,
	Private,
}

impl MessageKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			MessageKind::Group => "group",
			MessageKind::Private => "private",
		}
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for MessageKind {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"" => Err(ParseIdError::Empty),
			"group" => Ok(MessageKind::Group),
			"private" => Ok(MessageKind::Private),
			other => Err(ParseIdError::UnknownMessageKind(other.to_string())),
		}
	}
}

/// A chat message. For `Private` the channel is the recipient's session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub kind: MessageKind,
	pub channel: String,
	pub invite_id: Option<String>,
	pub body: String,
	/// Stamped by the sending session.
	pub sender_id: Option<SessionId>,
}

impl ChatMessage {
	pub fn group(channel: impl Into<String>, body: impl Into<String>) -> Self {
		Self {
			kind: MessageKind::Group,
			channel: channel.into(),
			invite_id: None,
			body: body.into(),
			sender_id: None,
		}
	}

	pub fn private(recipient: impl Into<String>, body: impl Into<String>) -> Self {
		Self {
			kind: MessageKind::Private,
			channel: recipient.into(),
			invite_id: None,
			body: body.into(),
			sender_id: None,
		}
	}
}

/// Status descriptor for one subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
	pub name: String,
	/// Present only when the channel's flags include `subscribers`.
	pub subscribers: Option<Vec<String>>,
}

/// Aggregate status sent to a session's registrant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatChannels {
	pub channels: Vec<ChannelStatus>,
}

impl ChatChannels {
	pub fn get(&self, name: &str) -> Option<&ChannelStatus> {
		self.channels.iter().find(|c| c.name == name)
	}

	pub fn names(&self) -> Vec<&str> {
		self.channels.iter().map(|c| c.name.as_str()).collect()
	}
}

/// Payload variants multiplexed onto one stored record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityPayload {
	Subscribers(Vec<String>),
	ChannelFlags(String),
	Channels(Vec<String>),
}

/// Generic persisted record keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntity {
	pub id: String,
	pub payload: Option<EntityPayload>,
}

impl StoredEntity {
	/// Record with no payload (invites, subscriber patches).
	pub fn marker(id: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			payload: None,
		}
	}

	pub fn with_payload(id: impl Into<String>, payload: EntityPayload) -> Self {
		Self {
			id: id.into(),
			payload: Some(payload),
		}
	}

	pub fn subscribers(&self) -> Option<&[String]> {
		match &self.payload {
			Some(EntityPayload::Subscribers(list)) => Some(list),
			_ => None,
		}
	}

	pub fn channel_flags(&self) -> Option<&str> {
		match &self.payload {
			Some(EntityPayload::ChannelFlags(raw)) => Some(raw),
			_ => None,
		}
	}

	pub fn channels(&self) -> Option<&[String]> {
		match &self.payload {
			Some(EntityPayload::Channels(list)) => Some(list),
			_ => None,
		}
	}
}

/// Store key conventions.
pub mod keys {
	use crate::{GameId, SessionId};

	/// `subscriptions_<session>`: the session's joined topics.
	pub fn subscriptions(session: &SessionId) -> String {
		format!("subscriptions_{}", session.as_str())
	}

	/// `channel_flags<session><topic>`: raw flags for one joined topic.
	pub fn channel_flags(session: &SessionId, topic: &str) -> String {
		format!("channel_flags{}{}", session.as_str(), topic)
	}

	/// `<game>_chat_topic_<topic>`: subscriber list of a topic.
	pub fn topic_subscribers(game: &GameId, topic: &str) -> String {
		format!("{}_chat_topic_{}", game.as_str(), topic)
	}

	/// `invite_<topic>_<invite>`: an issued invite to a private channel.
	pub fn invite(topic: &str, invite_id: &str) -> String {
		format!("invite_{topic}_{invite_id}")
	}
}

/// Generate a fresh invite id.
pub fn new_invite_id() -> String {
	uuid::Uuid::new_v4().simple().to_string()
}
