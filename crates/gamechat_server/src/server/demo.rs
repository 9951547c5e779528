#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use gamechat_domain::{Channel, ChatMessage, GameId, RegistrantKind, SessionId};
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::{debug, info, warn};

use crate::server::delivery::{LocalDelivery, Outbound};
use crate::server::directory::InMemoryPlayerDirectory;
use crate::server::manager::ChatManager;

const DEMO_TOPIC: &str = "lobby";

/// Dev-only driver: two players chatting in one topic so a bare server shows traffic.
pub struct DemoDriver {
	emit_interval: Duration,
	game_id: GameId,
}

impl DemoDriver {
	pub fn new(game_id: GameId) -> Self {
		Self {
			emit_interval: Duration::from_millis(1000),
			game_id,
		}
	}

	#[allow(dead_code)]
	pub fn with_emit_interval(mut self, interval: Duration) -> Self {
		self.emit_interval = interval;
		self
	}

	pub fn spawn(self, manager: ChatManager, directory: Arc<InMemoryPlayerDirectory>, delivery: Arc<LocalDelivery>) {
		tokio::spawn(async move {
			if let Err(e) = self.run(manager, directory, delivery).await {
				warn!(error = %e, "demo driver stopped");
			}
		});
	}

	async fn run(
		self,
		manager: ChatManager,
		directory: Arc<InMemoryPlayerDirectory>,
		delivery: Arc<LocalDelivery>,
	) -> anyhow::Result<()> {
		let players = [SessionId::new("demo_p1")?, SessionId::new("demo_p2")?];

		let mut handles = Vec::with_capacity(players.len());
		for player in &players {
			directory.register(player.clone(), self.game_id.clone());
			spawn_drain(player.clone(), delivery.register_player(player.clone()));

			let handle = manager.get_or_create(player, RegistrantKind::Player).await;
			handle.join(vec![Channel::new(DEMO_TOPIC).with_flags("subscribers")]).await;
			handles.push(handle);
		}

		info!(game_id = %self.game_id, topic = DEMO_TOPIC, "demo driver started");

		let mut interval: Interval = tokio::time::interval(self.emit_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		let mut tick: u64 = 0;
		loop {
			interval.tick().await;
			tick += 1;

			let Some(speaker) = handles.get((tick as usize) % handles.len()) else {
				continue;
			};
			speaker
				.send(ChatMessage::group(DEMO_TOPIC, format!("demo message #{tick} from {}", speaker.id())))
				.await;

			if tick % 5 == 0 {
				let peer = &players[(tick as usize + 1) % players.len()];
				speaker
					.send(ChatMessage::private(peer.as_str(), format!("psst #{tick}")))
					.await;
			}
		}
	}
}

fn spawn_drain(player: SessionId, mut rx: mpsc::Receiver<Outbound>) {
	tokio::spawn(async move {
		while let Some(item) = rx.recv().await {
			match item {
				Outbound::Status(status) => {
					debug!(%player, channels = ?status.names(), "demo: status");
				}
				Outbound::Message(message) => {
					debug!(
						%player,
						kind = %message.kind,
						channel = %message.channel,
						sender = ?message.sender_id,
						body = %message.body,
						"demo: message"
					);
				}
			}
		}
	});
}
