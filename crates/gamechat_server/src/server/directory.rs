#![forbid(unsafe_code)]

use std::collections::HashMap;

use async_trait::async_trait;
use gamechat_domain::{GameId, SessionId};
use parking_lot::RwLock;

/// Player id → game id lookup used for game scoping and private-message checks.
#[async_trait]
pub trait PlayerDirectory: Send + Sync {
	async fn game_of(&self, player: &SessionId) -> Option<GameId>;
}

/// Process-local directory fed by whoever admits players.
#[derive(Debug, Default)]
pub struct InMemoryPlayerDirectory {
	players: RwLock<HashMap<SessionId, GameId>>,
}

impl InMemoryPlayerDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, player: SessionId, game_id: GameId) {
		self.players.write().insert(player, game_id);
	}
}

#[async_trait]
impl PlayerDirectory for InMemoryPlayerDirectory {
	async fn game_of(&self, player: &SessionId) -> Option<GameId> {
		self.players.read().get(player).cloned()
	}
}
