#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use gamechat_domain::{ChatMessage, GameId, SessionId};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// In-process topic mediator scoped by game id.
#[derive(Debug, Clone)]
pub struct TopicBus {
	inner: Arc<Mutex<Inner>>,
	next_registration: Arc<AtomicU64>,
	cfg: TopicBusConfig,
}

#[derive(Debug, Clone)]
pub struct TopicBusConfig {
	/// Maximum number of queued items per subscriber.
	pub subscriber_queue_capacity: usize,

	pub debug_logs: bool,
}

impl Default for TopicBusConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 1024,
			debug_logs: false,
		}
	}
}

/// Items emitted on a subscriber stream.
#[derive(Debug, Clone)]
pub enum BusItem {
	Publish {
		topic: String,
		message: ChatMessage,
	},

	/// The subscriber fell behind and items were dropped.
	Lagged {
		dropped: u64,
	},
}

/// Subscribe acknowledgment. Unsubscribing needs it back, so a stale ack cannot
/// remove a newer registration for the same subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
	pub game_id: GameId,
	pub topic: String,
	pub subscriber: SessionId,
	pub registration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TopicKey {
	game_id: GameId,
	topic: String,
}

#[derive(Debug, Default)]
struct Inner {
	topics: HashMap<TopicKey, TopicEntry>,
}

#[derive(Debug, Default)]
struct TopicEntry {
	subscribers: HashMap<SessionId, Registration>,
}

#[derive(Debug)]
struct Registration {
	id: u64,
	tx: mpsc::Sender<BusItem>,
	pending_lag: u64,
}

impl TopicBus {
	pub fn new(cfg: TopicBusConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			next_registration: Arc::new(AtomicU64::new(1)),
			cfg,
		}
	}

	/// Register `subscriber` on `topic`. A subscriber holds at most one registration
	/// per topic; subscribing again replaces (and closes) the previous stream.
	pub async fn subscribe(
		&self,
		game_id: &GameId,
		topic: &str,
		subscriber: &SessionId,
	) -> (SubscribeAck, mpsc::Receiver<BusItem>) {
		let (tx, rx) = mpsc::channel(self.cfg.subscriber_queue_capacity.max(1));
		let id = self.next_registration.fetch_add(1, Ordering::Relaxed);

		let key = TopicKey {
			game_id: game_id.clone(),
			topic: topic.to_string(),
		};

		let mut inner = self.inner.lock().await;
		let entry = inner.topics.entry(key).or_default();
		prune_closed_subscribers(entry);

		let replaced = entry
			.subscribers
			.insert(
				subscriber.clone(),
				Registration {
					id,
					tx,
					pending_lag: 0,
				},
			)
			.is_some();

		if self.cfg.debug_logs {
			debug!(
				game_id = %game_id,
				%topic,
				%subscriber,
				replaced,
				subs = entry.subscribers.len(),
				"topic bus: subscribed"
			);
		}

		let ack = SubscribeAck {
			game_id: game_id.clone(),
			topic: topic.to_string(),
			subscriber: subscriber.clone(),
			registration: id,
		};
		(ack, rx)
	}

	/// Drop the registration named by `ack`. Returns false if it was already replaced or gone.
	pub async fn unsubscribe(&self, ack: &SubscribeAck) -> bool {
		let key = TopicKey {
			game_id: ack.game_id.clone(),
			topic: ack.topic.clone(),
		};

		let mut inner = self.inner.lock().await;
		let Some(entry) = inner.topics.get_mut(&key) else {
			return false;
		};

		let removed = match entry.subscribers.get(&ack.subscriber) {
			Some(reg) if reg.id == ack.registration => {
				entry.subscribers.remove(&ack.subscriber);
				true
			}
			_ => false,
		};

		prune_closed_subscribers(entry);
		if entry.subscribers.is_empty() {
			inner.topics.remove(&key);
		}

		removed
	}

	/// Fan `message` out to every subscriber of `topic` in `game_id`, including the publisher.
	pub async fn publish(&self, game_id: &GameId, topic: &str, message: ChatMessage) {
		let key = TopicKey {
			game_id: game_id.clone(),
			topic: topic.to_string(),
		};

		let mut inner = self.inner.lock().await;
		let Some(entry) = inner.topics.get_mut(&key) else {
			return;
		};

		prune_closed_subscribers(entry);

		let item = BusItem::Publish {
			topic: topic.to_string(),
			message,
		};

		let mut dropped_total: u64 = 0;

		for reg in entry.subscribers.values_mut() {
			match reg.tx.try_send(item.clone()) {
				Ok(()) => {
					if reg.pending_lag > 0
						&& reg
							.tx
							.try_send(BusItem::Lagged {
								dropped: reg.pending_lag,
							})
							.is_ok()
					{
						reg.pending_lag = 0;
					}
				}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped_total += 1;
					reg.pending_lag = reg.pending_lag.saturating_add(1);
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		prune_closed_subscribers(entry);
		if entry.subscribers.is_empty() {
			inner.topics.remove(&key);
		}

		if dropped_total > 0 {
			metrics::counter!("gamechat_bus_dropped_total").increment(dropped_total);
			if self.cfg.debug_logs {
				debug!(game_id = %game_id, %topic, dropped = dropped_total, "topic bus: dropped due to full subscriber queues");
			}
		}
	}

	/// Live subscribers of `topic` in `game_id`.
	#[allow(dead_code)]
	pub async fn subscriber_count(&self, game_id: &GameId, topic: &str) -> usize {
		let key = TopicKey {
			game_id: game_id.clone(),
			topic: topic.to_string(),
		};

		let inner = self.inner.lock().await;
		inner
			.topics
			.get(&key)
			.map(|e| e.subscribers.values().filter(|r| !r.tx.is_closed()).count())
			.unwrap_or(0)
	}
}

fn prune_closed_subscribers(entry: &mut TopicEntry) {
	entry.subscribers.retain(|_, reg| !reg.tx.is_closed());
}
