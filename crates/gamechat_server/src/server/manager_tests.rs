#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use gamechat_domain::{Channel, RegistrantKind, SessionId, keys};

use crate::server::bus::{TopicBus, TopicBusConfig};
use crate::server::delivery::{Delivery, LocalDelivery, Outbound};
use crate::server::demo::DemoDriver;
use crate::server::manager::ChatManagerConfig;
use crate::server::procedures::subscribers_for_topic;
use crate::server::test_support::{
	DEFAULT_GAME, eventually, fixture, fixture_with, game, manager_config, sid, start_store,
};

/// Lets `skip` status deliveries through, panics on the next `panics`, then behaves.
struct FlakyDelivery {
	skip: AtomicU32,
	panics: AtomicU32,
	inner: LocalDelivery,
}

impl FlakyDelivery {
	fn new(panics: u32) -> Self {
		Self::after(0, panics)
	}

	fn after(skip: u32, panics: u32) -> Self {
		Self {
			skip: AtomicU32::new(skip),
			panics: AtomicU32::new(panics),
			inner: LocalDelivery::new(16),
		}
	}
}

fn take_one(counter: &AtomicU32) -> bool {
	counter
		.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
		.is_ok()
}

impl Delivery for FlakyDelivery {
	fn to_player(&self, player: &SessionId, item: Outbound) -> bool {
		if matches!(item, Outbound::Status(_)) && !take_one(&self.skip) && take_one(&self.panics) {
			panic!("delivery failure for {player}");
		}
		self.inner.to_player(player, item)
	}

	fn to_actor(&self, actor: &str, session_id: &SessionId, item: Outbound) -> bool {
		self.inner.to_actor(actor, session_id, item)
	}
}

#[tokio::test]
async fn get_or_create_reuses_the_live_session() {
	let f = fixture();
	let p1 = sid("p1");

	let a = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	a.join(vec![Channel::new("lobby")]).await;

	let b = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	let snap = b.snapshot().await.expect("snapshot");
	assert_eq!(snap.subscriptions, vec!["lobby".to_string()]);
	assert_eq!(f.manager.len(), 1);
}

#[tokio::test]
async fn game_id_comes_from_the_directory_or_the_default() {
	let f = fixture();
	f.directory.register(sid("known"), game("g9"));

	let known = f.manager.get_or_create(&sid("known"), RegistrantKind::Player).await;
	let unknown = f.manager.get_or_create(&sid("unknown"), RegistrantKind::Player).await;

	assert_eq!(known.snapshot().await.expect("snapshot").game_id, game("g9"));
	assert_eq!(unknown.snapshot().await.expect("snapshot").game_id, game(DEFAULT_GAME));
}

#[tokio::test]
async fn destroy_leaves_everything_before_acknowledging() {
	let f = fixture();
	let p1 = sid("p1");
	let g = game(DEFAULT_GAME);

	let handle = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	handle
		.join(vec![Channel::new("lobby").with_flags("subscribers"), Channel::new("trade")])
		.await;

	assert!(f.manager.destroy(&p1).await, "destroy acknowledged");
	assert!(f.manager.get(&p1).is_none());
	assert!(f.manager.is_empty());

	let remaining = f
		.store
		.get(&keys::subscriptions(&p1))
		.await
		.and_then(|e| e.channels().map(<[String]>::to_vec))
		.unwrap_or_default();
	assert!(remaining.is_empty());
	assert!(f.store.get(&keys::channel_flags(&p1, "lobby")).await.is_none());
	assert!(subscribers_for_topic(&f.store, &g, "lobby").await.is_empty());

	let bus = f.bus.clone();
	let g2 = g.clone();
	assert!(
		eventually(Duration::from_millis(500), || {
			let bus = bus.clone();
			let g = g2.clone();
			async move { bus.subscriber_count(&g, "lobby").await == 0 && bus.subscriber_count(&g, "trade").await == 0 }
		})
		.await,
		"bridges unsubscribe after destroy"
	);

	// The identity can come back and starts empty.
	let again = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	assert!(again.snapshot().await.expect("snapshot").subscriptions.is_empty());
}

#[tokio::test]
async fn destroy_of_unknown_session_is_refused() {
	let f = fixture();
	assert!(!f.manager.destroy(&sid("nobody")).await);
}

#[tokio::test]
async fn leave_all_acknowledges_and_keeps_the_session() {
	let f = fixture();
	let p1 = sid("p1");

	let handle = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	handle.join(vec![Channel::new("lobby"), Channel::new("trade")]).await;

	assert!(handle.leave_all().await);
	let snap = handle.snapshot().await.expect("session still running");
	assert!(snap.subscriptions.is_empty());
	assert!(snap.bridged.is_empty());
}

#[tokio::test]
async fn panicking_session_is_restarted_and_recovers() {
	let delivery: Arc<dyn Delivery> = Arc::new(FlakyDelivery::new(1));
	let f = fixture_with(
		start_store(),
		TopicBus::new(TopicBusConfig::default()),
		Some(delivery),
		manager_config(),
	);
	let p1 = sid("p1");

	let handle = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	// The status update after this join panics; the restarted session must recover the join.
	handle.join(vec![Channel::new("lobby").with_flags("subscribers")]).await;

	let snap = handle.snapshot().await.expect("restarted session answers");
	assert_eq!(snap.subscriptions, vec!["lobby".to_string()]);
	assert_eq!(snap.bridged, vec!["lobby".to_string()]);
	assert_eq!(snap.flags.get("lobby").map(String::as_str), Some("subscribers"));
	assert_eq!(f.bus.subscriber_count(&game(DEFAULT_GAME), "lobby").await, 1);
	assert_eq!(f.manager.len(), 1);
}

#[tokio::test]
async fn restart_after_join_and_leave_recovers_only_the_remaining_topics() {
	// The join's status passes; the status after the leave panics.
	let delivery: Arc<dyn Delivery> = Arc::new(FlakyDelivery::after(1, 1));
	let f = fixture_with(
		start_store(),
		TopicBus::new(TopicBusConfig::default()),
		Some(delivery),
		manager_config(),
	);
	let p1 = sid("p1");
	let g = game(DEFAULT_GAME);

	let handle = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	handle
		.join(vec![
			Channel::new("guild").with_flags("subscribers"),
			Channel::new("lobby").with_flags("subscribers"),
			Channel::new("trade"),
		])
		.await;
	handle.leave(vec!["lobby".to_string()]).await;

	let snap = handle.snapshot().await.expect("restarted session answers");
	let remaining = vec!["guild".to_string(), "trade".to_string()];
	assert_eq!(snap.subscriptions, remaining);
	assert_eq!(snap.bridged, remaining);
	assert_eq!(snap.flags.get("guild").map(String::as_str), Some("subscribers"));
	assert!(!snap.flags.contains_key("lobby"));

	assert!(f.store.get(&keys::channel_flags(&p1, "lobby")).await.is_none());
	assert!(subscribers_for_topic(&f.store, &g, "lobby").await.is_empty());
	assert_eq!(subscribers_for_topic(&f.store, &g, "guild").await, vec!["p1".to_string()]);

	let bus = f.bus.clone();
	assert!(
		eventually(Duration::from_millis(500), || {
			let bus = bus.clone();
			let g = g.clone();
			async move {
				bus.subscriber_count(&g, "guild").await == 1
					&& bus.subscriber_count(&g, "trade").await == 1
					&& bus.subscriber_count(&g, "lobby").await == 0
			}
		})
		.await,
		"one bus registration per remaining topic"
	);
	assert_eq!(f.manager.len(), 1);
}

#[tokio::test]
async fn supervisor_gives_up_after_max_restarts() {
	let delivery: Arc<dyn Delivery> = Arc::new(FlakyDelivery::new(u32::MAX));
	let f = fixture_with(
		start_store(),
		TopicBus::new(TopicBusConfig::default()),
		Some(delivery),
		ChatManagerConfig {
			max_restarts: 1,
			..manager_config()
		},
	);
	let p1 = sid("p1");

	let handle = f.manager.get_or_create(&p1, RegistrantKind::Player).await;
	handle.request_status().await;
	handle.request_status().await;

	let manager = f.manager.clone();
	let id = p1.clone();
	assert!(
		eventually(Duration::from_millis(500), || {
			let manager = manager.clone();
			let id = id.clone();
			async move { manager.get(&id).is_none() }
		})
		.await,
		"session removed after exhausting restarts"
	);
	assert!(handle.snapshot().await.is_none());
}

#[tokio::test]
async fn demo_driver_joins_its_players() {
	let f = fixture();
	let g = game(DEFAULT_GAME);

	DemoDriver::new(g.clone())
		.with_emit_interval(Duration::from_millis(10))
		.spawn(f.manager.clone(), f.directory.clone(), f.delivery.clone());

	let store = f.store.clone();
	assert!(
		eventually(Duration::from_millis(1000), || {
			let store = store.clone();
			let g = g.clone();
			async move { subscribers_for_topic(&store, &g, "lobby").await.len() == 2 }
		})
		.await,
		"both demo players subscribed"
	);
	assert_eq!(f.manager.len(), 2);
}
