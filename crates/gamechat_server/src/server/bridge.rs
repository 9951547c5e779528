#![forbid(unsafe_code)]

use gamechat_domain::{ChatMessage, GameId, SessionId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::server::bus::{BusItem, SubscribeAck, TopicBus};
use crate::server::session::SessionMessage;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
	pub mailbox_capacity: usize,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self { mailbox_capacity: 256 }
	}
}

/// Commands a session sends to one of its bridges.
#[derive(Debug)]
pub enum BridgeCommand {
	Publish(ChatMessage),
	Unsubscribe,
	Terminate,
}

/// Session-side handle of a topic bridge. Dropping it stops the bridge.
#[derive(Debug)]
pub struct BridgeHandle {
	topic: String,
	tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
	/// Subscribe to `topic` on behalf of `session_id` and start forwarding its broadcasts.
	///
	/// The subscription is acknowledged before this returns, so a publish issued after
	/// the join completes reaches the new subscriber.
	pub async fn spawn(
		cfg: &BridgeConfig,
		bus: TopicBus,
		game_id: GameId,
		topic: String,
		session_id: SessionId,
		session_tx: mpsc::WeakSender<SessionMessage>,
	) -> Self {
		let (ack, bus_rx) = bus.subscribe(&game_id, &topic, &session_id).await;
		let (tx, rx) = mpsc::channel(cfg.mailbox_capacity.max(1));

		let bridge = TopicBridge {
			bus,
			ack: Some(ack),
			session_tx,
		};
		tokio::spawn(bridge.run(rx, bus_rx));

		Self { topic, tx }
	}

	pub fn topic(&self) -> &str {
		&self.topic
	}

	/// Ask the bridge to publish on its topic.
	pub async fn publish(&self, message: ChatMessage) -> bool {
		self.tx.send(BridgeCommand::Publish(message)).await.is_ok()
	}

	pub async fn unsubscribe(&self) {
		let _ = self.tx.send(BridgeCommand::Unsubscribe).await;
	}

	pub async fn terminate(self) {
		let _ = self.tx.send(BridgeCommand::Terminate).await;
	}
}

struct TopicBridge {
	bus: TopicBus,
	ack: Option<SubscribeAck>,
	session_tx: mpsc::WeakSender<SessionMessage>,
}

impl TopicBridge {
	async fn run(mut self, mut rx: mpsc::Receiver<BridgeCommand>, mut bus_rx: mpsc::Receiver<BusItem>) {
		loop {
			tokio::select! {
				cmd = rx.recv() => {
					match cmd {
						Some(BridgeCommand::Publish(message)) => {
							let Some(ack) = &self.ack else {
								debug!(topic = %message.channel, "bridge unsubscribed; publish dropped");
								continue;
							};
							self.bus.publish(&ack.game_id, &ack.topic, message).await;
						}
						Some(BridgeCommand::Unsubscribe) => self.unsubscribe().await,
						Some(BridgeCommand::Terminate) | None => break,
					}
				}

				item = bus_rx.recv(), if self.ack.is_some() => {
					match item {
						Some(BusItem::Publish { topic, message }) => {
							if !self.forward(topic, message) {
								break;
							}
						}
						Some(BusItem::Lagged { dropped }) => {
							metrics::counter!("gamechat_bridge_lagged_total").increment(dropped);
							warn!(dropped, "bridge lagged behind topic; messages dropped");
						}
						None => {
							debug!("bus registration closed");
							self.ack = None;
						}
					}
				}
			}
		}

		self.unsubscribe().await;
	}

	/// Hand a broadcast to the owning session. Returns false once the session is gone.
	fn forward(&self, topic: String, message: ChatMessage) -> bool {
		let Some(session_tx) = self.session_tx.upgrade() else {
			return false;
		};

		match session_tx.try_send(SessionMessage::Delivered { topic, message }) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("gamechat_bridge_dropped_total").increment(1);
				warn!("session mailbox full; broadcast dropped");
				true
			}
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		}
	}

	async fn unsubscribe(&mut self) {
		if let Some(ack) = self.ack.take() {
			self.bus.unsubscribe(&ack).await;
			debug!(topic = %ack.topic, subscriber = %ack.subscriber, "bridge unsubscribed");
		}
	}
}
