#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use gamechat_domain::{GameId, SessionId};
use gamechat_store::{InMemoryKvBackend, ObjectStoreBuilder, ObjectStoreClient, OwnerPoolConfig};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::bridge::BridgeConfig;
use crate::server::bus::{TopicBus, TopicBusConfig};
use crate::server::delivery::{Delivery, LocalDelivery, Outbound};
use crate::server::directory::InMemoryPlayerDirectory;
use crate::server::manager::{ChatManager, ChatManagerConfig};
use crate::server::procedures::register_chat_procedures;
use crate::server::session::SessionContext;

pub(crate) const DEFAULT_GAME: &str = "default";

pub(crate) fn sid(id: &str) -> SessionId {
	SessionId::new(id).expect("valid SessionId")
}

pub(crate) fn game(id: &str) -> GameId {
	GameId::new(id).expect("valid GameId")
}

pub(crate) struct Fixture {
	pub manager: ChatManager,
	pub store: ObjectStoreClient,
	pub bus: TopicBus,
	pub directory: Arc<InMemoryPlayerDirectory>,
	pub delivery: Arc<LocalDelivery>,
}

pub(crate) fn start_store() -> ObjectStoreClient {
	let mut builder = ObjectStoreBuilder::new(Arc::new(InMemoryKvBackend::new())).with_owner_pool(OwnerPoolConfig {
		shards: 4,
		mailbox_capacity: 256,
	});
	register_chat_procedures(&mut builder).expect("register chat procedures");
	builder.start()
}

pub(crate) fn manager_config() -> ChatManagerConfig {
	ChatManagerConfig {
		default_game_id: game(DEFAULT_GAME),
		session_mailbox_capacity: 64,
		destroy_ack_timeout: Duration::from_millis(500),
		max_restarts: 3,
	}
}

/// Fixture whose sessions deliver through `outbound` instead of the local registry.
pub(crate) fn fixture_with(
	store: ObjectStoreClient,
	bus: TopicBus,
	outbound: Option<Arc<dyn Delivery>>,
	cfg: ChatManagerConfig,
) -> Fixture {
	let directory = Arc::new(InMemoryPlayerDirectory::new());
	let delivery = Arc::new(LocalDelivery::new(64));

	let ctx = SessionContext {
		store: store.clone(),
		bus: bus.clone(),
		directory: directory.clone(),
		delivery: outbound.unwrap_or_else(|| delivery.clone() as Arc<dyn Delivery>),
		bridge: BridgeConfig { mailbox_capacity: 64 },
	};

	Fixture {
		manager: ChatManager::new(ctx, cfg),
		store,
		bus,
		directory,
		delivery,
	}
}

pub(crate) fn fixture() -> Fixture {
	fixture_with(
		start_store(),
		TopicBus::new(TopicBusConfig::default()),
		None,
		manager_config(),
	)
}

/// Receive until `pick` returns `Some`, or panic after `within`.
pub(crate) async fn recv_matching<T>(
	rx: &mut mpsc::Receiver<Outbound>,
	within: Duration,
	mut pick: impl FnMut(Outbound) -> Option<T>,
) -> T {
	let deadline = Instant::now() + within;
	loop {
		let remaining = deadline.saturating_duration_since(Instant::now());
		match timeout(remaining, rx.recv()).await {
			Ok(Some(item)) => {
				if let Some(found) = pick(item) {
					return found;
				}
			}
			Ok(None) => panic!("delivery channel closed"),
			Err(_) => panic!("no matching item within {within:?}"),
		}
	}
}

/// Whether any chat message arrives within `within` (status updates are skipped).
pub(crate) async fn any_message_within(rx: &mut mpsc::Receiver<Outbound>, within: Duration) -> bool {
	let deadline = Instant::now() + within;
	loop {
		let remaining = deadline.saturating_duration_since(Instant::now());
		match timeout(remaining, rx.recv()).await {
			Ok(Some(Outbound::Message(_))) => return true,
			Ok(Some(Outbound::Status(_))) => continue,
			Ok(None) | Err(_) => return false,
		}
	}
}

/// Poll `check` until it holds or `within` passes.
pub(crate) async fn eventually<F, Fut>(within: Duration, mut check: F) -> bool
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = bool>,
{
	let deadline = Instant::now() + within;
	loop {
		if check().await {
			return true;
		}
		if Instant::now() >= deadline {
			return false;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}
