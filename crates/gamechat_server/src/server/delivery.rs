#![forbid(unsafe_code)]

use std::collections::HashMap;

use gamechat_domain::{ChatChannels, ChatMessage, SessionId};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound chat traffic for a registrant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
	Status(ChatChannels),
	Message(ChatMessage),
}

/// What a named actor receives: the item plus the session it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorEnvelope {
	pub session_id: SessionId,
	pub item: Outbound,
}

/// Routes outbound items to player connections and named actors.
///
/// Delivery never blocks the calling session; a missing or saturated target drops the item.
pub trait Delivery: Send + Sync {
	fn to_player(&self, player: &SessionId, item: Outbound) -> bool;

	fn to_actor(&self, actor: &str, session_id: &SessionId, item: Outbound) -> bool;
}

#[derive(Debug)]
pub struct LocalDelivery {
	capacity: usize,
	players: RwLock<HashMap<SessionId, mpsc::Sender<Outbound>>>,
	actors: RwLock<HashMap<String, mpsc::Sender<ActorEnvelope>>>,
}

impl LocalDelivery {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: capacity.max(1),
			players: RwLock::new(HashMap::new()),
			actors: RwLock::new(HashMap::new()),
		}
	}

	/// Attach a player connection. Replaces any previous one for the same id.
	pub fn register_player(&self, player: SessionId) -> mpsc::Receiver<Outbound> {
		let (tx, rx) = mpsc::channel(self.capacity);
		self.players.write().insert(player, tx);
		rx
	}

	#[allow(dead_code)]
	pub fn register_actor(&self, name: impl Into<String>) -> mpsc::Receiver<ActorEnvelope> {
		let (tx, rx) = mpsc::channel(self.capacity);
		self.actors.write().insert(name.into(), tx);
		rx
	}
}

impl Delivery for LocalDelivery {
	fn to_player(&self, player: &SessionId, item: Outbound) -> bool {
		let Some(tx) = self.players.read().get(player).cloned() else {
			debug!(%player, "no connection for player; outbound item dropped");
			return false;
		};
		send_or_drop(&tx, item, player.as_str())
	}

	fn to_actor(&self, actor: &str, session_id: &SessionId, item: Outbound) -> bool {
		let Some(tx) = self.actors.read().get(actor).cloned() else {
			debug!(%actor, %session_id, "no actor registered under name; outbound item dropped");
			return false;
		};
		let envelope = ActorEnvelope {
			session_id: session_id.clone(),
			item,
		};
		send_or_drop(&tx, envelope, actor)
	}
}

fn send_or_drop<T>(tx: &mpsc::Sender<T>, item: T, target: &str) -> bool {
	match tx.try_send(item) {
		Ok(()) => true,
		Err(mpsc::error::TrySendError::Full(_)) => {
			metrics::counter!("gamechat_delivery_dropped_total").increment(1);
			warn!(%target, "delivery queue full; outbound item dropped");
			false
		}
		Err(mpsc::error::TrySendError::Closed(_)) => {
			debug!(%target, "delivery target closed; outbound item dropped");
			false
		}
	}
}
