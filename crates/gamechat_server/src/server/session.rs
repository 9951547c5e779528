#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use gamechat_domain::{
	Channel, ChannelFlags, ChannelStatus, ChatChannels, ChatMessage, EntityPayload, GameId, MessageKind, RegistrantKind,
	SessionId, StoredEntity, is_private_channel_owner, keys,
};
use gamechat_store::ObjectStoreClient;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::server::bridge::{BridgeConfig, BridgeHandle};
use crate::server::bus::TopicBus;
use crate::server::delivery::{Delivery, Outbound};
use crate::server::directory::PlayerDirectory;
use crate::server::procedures::{CHAT_ADD_SUBSCRIBER, CHAT_REMOVE_SUBSCRIBER, subscribers_for_topic};

/// Inbound messages of a chat session.
#[derive(Debug)]
pub enum SessionMessage {
	Join {
		channels: Vec<Channel>,
	},

	Leave {
		channels: Vec<String>,
	},

	Send {
		message: ChatMessage,
	},

	/// Emit a status update to the registrant.
	Status,

	/// Broadcast forwarded by one of the session's bridges.
	Delivered {
		topic: String,
		message: ChatMessage,
	},

	/// Leave every channel, then acknowledge.
	LeaveAll {
		done: oneshot::Sender<()>,
	},

	/// Leave every channel, acknowledge, and stop.
	Destroy {
		done: oneshot::Sender<()>,
	},

	Snapshot {
		resp: oneshot::Sender<SessionSnapshot>,
	},
}

/// Point-in-time view of a session's state.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
	pub session_id: SessionId,
	pub game_id: GameId,
	pub subscriptions: Vec<String>,
	/// Raw flags per topic; topics without flags are absent.
	pub flags: BTreeMap<String, String>,
	/// Topics with a live bridge, sorted.
	pub bridged: Vec<String>,
}

/// Why a session's run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
	Destroyed,
	MailboxClosed,
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionContext {
	pub store: ObjectStoreClient,
	pub bus: TopicBus,
	pub directory: Arc<dyn PlayerDirectory>,
	pub delivery: Arc<dyn Delivery>,
	pub bridge: BridgeConfig,
}

impl std::fmt::Debug for SessionContext {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionContext")
			.field("store", &self.store)
			.field("bridge", &self.bridge)
			.finish_non_exhaustive()
	}
}

/// Per-identity chat state machine. Owns its topics, their flags and their bridges.
pub struct ChatSession {
	id: SessionId,
	registrant: RegistrantKind,
	game_id: GameId,
	subscriptions: Vec<String>,
	flags: HashMap<String, ChannelFlags>,
	bridges: HashMap<String, BridgeHandle>,
	ctx: SessionContext,
	self_tx: mpsc::WeakSender<SessionMessage>,
}

impl ChatSession {
	pub fn new(
		id: SessionId,
		registrant: RegistrantKind,
		game_id: GameId,
		ctx: SessionContext,
		self_tx: mpsc::WeakSender<SessionMessage>,
	) -> Self {
		Self {
			id,
			registrant,
			game_id,
			subscriptions: Vec::new(),
			flags: HashMap::new(),
			bridges: HashMap::new(),
			ctx,
			self_tx,
		}
	}

	/// Recover persisted state, then process the mailbox until destroyed or closed.
	pub async fn run(mut self, rx: &mut mpsc::Receiver<SessionMessage>) -> SessionExit {
		self.recover().await;

		while let Some(msg) = rx.recv().await {
			match msg {
				SessionMessage::Join { channels } => self.join_channels(channels).await,
				SessionMessage::Leave { channels } => self.leave_channels(channels).await,
				SessionMessage::Send { message } => self.send_message(message).await,
				SessionMessage::Status => self.send_status().await,
				SessionMessage::Delivered { topic, message } => self.deliver(topic, message),
				SessionMessage::LeaveAll { done } => {
					self.leave_all().await;
					let _ = done.send(());
				}
				SessionMessage::Destroy { done } => {
					self.leave_all().await;
					let _ = done.send(());
					info!(session_id = %self.id, "chat session destroyed");
					return SessionExit::Destroyed;
				}
				SessionMessage::Snapshot { resp } => {
					let _ = resp.send(self.snapshot());
				}
			}
		}

		debug!(session_id = %self.id, "chat session mailbox closed");
		SessionExit::MailboxClosed
	}

	/// Reload subscriptions and flags and re-open a bridge per topic.
	///
	/// Unreadable or timed-out records shrink the recovered set instead of failing startup.
	async fn recover(&mut self) {
		let topics = self
			.ctx
			.store
			.get(&keys::subscriptions(&self.id))
			.await
			.and_then(|e| e.channels().map(<[String]>::to_vec))
			.unwrap_or_default();

		for topic in topics {
			if topic.is_empty() || self.bridges.contains_key(&topic) {
				continue;
			}

			let flags = self
				.ctx
				.store
				.get(&keys::channel_flags(&self.id, &topic))
				.await
				.and_then(|e| e.channel_flags().map(ChannelFlags::parse))
				.filter(|f| !f.is_empty());

			self.open_bridge(&topic).await;
			if !self.subscriptions.contains(&topic) {
				self.subscriptions.push(topic.clone());
			}
			if let Some(flags) = flags {
				self.flags.insert(topic.clone(), flags);
			}
			self.add_subscriber(&topic).await;
		}

		info!(
			session_id = %self.id,
			game_id = %self.game_id,
			topics = self.subscriptions.len(),
			"chat session recovered"
		);
	}

	async fn join_channels(&mut self, channels: Vec<Channel>) {
		for channel in channels {
			if channel.name.trim().is_empty() {
				warn!(session_id = %self.id, "join with empty channel name ignored");
				continue;
			}

			if self.bridges.contains_key(&channel.name) {
				debug!(session_id = %self.id, topic = %channel.name, "already joined");
				continue;
			}

			if channel.is_private() && !self.may_join_private(&channel).await {
				metrics::counter!("gamechat_session_join_rejected_total").increment(1);
				warn!(
					session_id = %self.id,
					topic = %channel.name,
					invite_id = ?channel.invite_id,
					"private channel join rejected"
				);
				continue;
			}

			self.open_bridge(&channel.name).await;

			if !self.subscriptions.contains(&channel.name) {
				self.subscriptions.push(channel.name.clone());
			}
			self.persist_subscriptions().await;
			self.add_subscriber(&channel.name).await;

			if let Some(raw) = channel.flags.as_deref() {
				let flags = ChannelFlags::parse(raw);
				self.ctx
					.store
					.put(StoredEntity::with_payload(
						keys::channel_flags(&self.id, &channel.name),
						EntityPayload::ChannelFlags(flags.to_raw()),
					))
					.await;
				self.flags.insert(channel.name.clone(), flags);
			}

			metrics::counter!("gamechat_session_joins_total").increment(1);
			debug!(session_id = %self.id, topic = %channel.name, "joined channel");
		}

		self.send_status().await;
	}

	/// Owners join their own private channels; anyone else needs an issued invite.
	async fn may_join_private(&self, channel: &Channel) -> bool {
		if is_private_channel_owner(&channel.name, &self.id) {
			return true;
		}

		let Some(invite_id) = channel.invite_id.as_deref().filter(|s| !s.is_empty()) else {
			return false;
		};

		self.ctx
			.store
			.get(&keys::invite(&channel.name, invite_id))
			.await
			.is_some()
	}

	async fn leave_channels(&mut self, channels: Vec<String>) {
		for topic in channels {
			let Some(bridge) = self.bridges.remove(&topic) else {
				warn!(session_id = %self.id, %topic, "leave for channel without a bridge");
				continue;
			};

			bridge.unsubscribe().await;

			self.subscriptions.retain(|t| t != &topic);
			self.persist_subscriptions().await;

			if let Err(e) = self
				.ctx
				.store
				.call_procedure(
					CHAT_REMOVE_SUBSCRIBER,
					&keys::topic_subscribers(&self.game_id, &topic),
					StoredEntity::marker(self.id.as_str()),
					false,
				)
				.await
			{
				warn!(session_id = %self.id, %topic, error = %e, "remove subscriber failed");
			}

			bridge.terminate().await;

			self.ctx.store.delete(&keys::channel_flags(&self.id, &topic)).await;
			self.flags.remove(&topic);

			metrics::counter!("gamechat_session_leaves_total").increment(1);
			debug!(session_id = %self.id, %topic, "left channel");
		}

		self.send_status().await;
	}

	async fn leave_all(&mut self) {
		let mut topics = self.subscriptions.clone();
		for topic in self.bridges.keys() {
			if !topics.contains(topic) {
				topics.push(topic.clone());
			}
		}
		self.leave_channels(topics).await;
	}

	async fn send_message(&mut self, mut message: ChatMessage) {
		message.sender_id = Some(self.id.clone());

		match message.kind {
			MessageKind::Group => {
				let Some(bridge) = self.bridges.get(&message.channel) else {
					metrics::counter!("gamechat_session_send_dropped_total").increment(1);
					debug!(session_id = %self.id, topic = %message.channel, "send to channel without a bridge dropped");
					return;
				};
				if !bridge.publish(message).await {
					metrics::counter!("gamechat_session_send_dropped_total").increment(1);
					warn!(session_id = %self.id, topic = %bridge.topic(), "bridge stopped; send dropped");
				}
			}

			MessageKind::Private => {
				let Ok(recipient) = SessionId::new(message.channel.clone()) else {
					metrics::counter!("gamechat_session_private_denied_total").increment(1);
					warn!(session_id = %self.id, "private message without recipient dropped");
					return;
				};

				match self.ctx.directory.game_of(&recipient).await {
					Some(game_id) if game_id == self.game_id => {
						self.ctx.delivery.to_player(&recipient, Outbound::Message(message));
					}
					Some(game_id) => {
						metrics::counter!("gamechat_session_private_denied_total").increment(1);
						warn!(
							session_id = %self.id,
							%recipient,
							sender_game = %self.game_id,
							recipient_game = %game_id,
							"private message across games denied"
						);
					}
					None => {
						metrics::counter!("gamechat_session_private_denied_total").increment(1);
						warn!(session_id = %self.id, %recipient, "private message to unknown player denied");
					}
				}
			}
		}
	}

	fn deliver(&self, topic: String, message: ChatMessage) {
		if !self.bridges.contains_key(&topic) {
			debug!(session_id = %self.id, %topic, "broadcast for a left channel dropped");
			return;
		}
		self.to_registrant(Outbound::Message(message));
	}

	async fn send_status(&self) {
		let status = self.build_status().await;
		self.to_registrant(Outbound::Status(status));
	}

	async fn build_status(&self) -> ChatChannels {
		let mut channels = Vec::with_capacity(self.subscriptions.len());
		for topic in &self.subscriptions {
			let wants_subscribers = self.flags.get(topic).is_some_and(ChannelFlags::wants_subscribers);
			let subscribers = if wants_subscribers {
				Some(subscribers_for_topic(&self.ctx.store, &self.game_id, topic).await)
			} else {
				None
			};
			channels.push(ChannelStatus {
				name: topic.clone(),
				subscribers,
			});
		}
		ChatChannels { channels }
	}

	fn to_registrant(&self, item: Outbound) {
		match &self.registrant {
			RegistrantKind::Player => {
				self.ctx.delivery.to_player(&self.id, item);
			}
			RegistrantKind::Actor(name) => {
				self.ctx.delivery.to_actor(name, &self.id, item);
			}
		}
	}

	fn snapshot(&self) -> SessionSnapshot {
		let mut bridged: Vec<String> = self.bridges.keys().cloned().collect();
		bridged.sort();

		SessionSnapshot {
			session_id: self.id.clone(),
			game_id: self.game_id.clone(),
			subscriptions: self.subscriptions.clone(),
			flags: self
				.flags
				.iter()
				.map(|(topic, flags)| (topic.clone(), flags.to_raw()))
				.collect(),
			bridged,
		}
	}

	async fn open_bridge(&mut self, topic: &str) {
		let bridge = BridgeHandle::spawn(
			&self.ctx.bridge,
			self.ctx.bus.clone(),
			self.game_id.clone(),
			topic.to_string(),
			self.id.clone(),
			self.self_tx.clone(),
		)
		.await;
		self.bridges.insert(topic.to_string(), bridge);
	}

	async fn persist_subscriptions(&self) {
		self.ctx
			.store
			.put(StoredEntity::with_payload(
				keys::subscriptions(&self.id),
				EntityPayload::Channels(self.subscriptions.clone()),
			))
			.await;
	}

	async fn add_subscriber(&self, topic: &str) {
		if let Err(e) = self
			.ctx
			.store
			.call_procedure(
				CHAT_ADD_SUBSCRIBER,
				&keys::topic_subscribers(&self.game_id, topic),
				StoredEntity::marker(self.id.as_str()),
				false,
			)
			.await
		{
			warn!(session_id = %self.id, %topic, error = %e, "add subscriber failed");
		}
	}
}
