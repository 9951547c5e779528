#![forbid(unsafe_code)]

use std::time::Duration;

use gamechat_domain::ChatMessage;
use tokio::time::timeout;

use crate::server::bus::{BusItem, TopicBus, TopicBusConfig};
use crate::server::test_support::{game, sid};

fn bus(capacity: usize) -> TopicBus {
	TopicBus::new(TopicBusConfig {
		subscriber_queue_capacity: capacity,
		debug_logs: false,
	})
}

#[tokio::test]
async fn subscribers_receive_only_their_topic_and_game() {
	let bus = bus(16);
	let g1 = game("g1");
	let g2 = game("g2");

	let (_ack, mut rx) = bus.subscribe(&g1, "lobby", &sid("p1")).await;

	bus.publish(&g1, "trade", ChatMessage::group("trade", "wrong topic")).await;
	bus.publish(&g2, "lobby", ChatMessage::group("lobby", "wrong game")).await;

	let unexpected = timeout(Duration::from_millis(50), rx.recv()).await;
	assert!(unexpected.is_err(), "subscriber received an item for another topic or game");

	bus.publish(&g1, "lobby", ChatMessage::group("lobby", "hi")).await;

	match timeout(Duration::from_millis(250), rx.recv()).await {
		Ok(Some(BusItem::Publish { topic, message })) => {
			assert_eq!(topic, "lobby");
			assert_eq!(message.body, "hi");
		}
		other => panic!("expected Publish, got: {other:?}"),
	}
}

#[tokio::test]
async fn resubscribe_replaces_and_stale_ack_is_ignored() {
	let bus = bus(16);
	let g1 = game("g1");
	let p1 = sid("p1");

	let (old_ack, mut old_rx) = bus.subscribe(&g1, "lobby", &p1).await;
	let (new_ack, mut new_rx) = bus.subscribe(&g1, "lobby", &p1).await;
	assert_ne!(old_ack.registration, new_ack.registration);
	assert_eq!(bus.subscriber_count(&g1, "lobby").await, 1);

	// The replaced stream is closed.
	assert!(old_rx.recv().await.is_none());

	assert!(!bus.unsubscribe(&old_ack).await, "stale ack must not remove the newer registration");
	assert_eq!(bus.subscriber_count(&g1, "lobby").await, 1);

	bus.publish(&g1, "lobby", ChatMessage::group("lobby", "still here")).await;
	assert!(matches!(
		timeout(Duration::from_millis(250), new_rx.recv()).await,
		Ok(Some(BusItem::Publish { .. }))
	));

	assert!(bus.unsubscribe(&new_ack).await);
	assert_eq!(bus.subscriber_count(&g1, "lobby").await, 0);
}

#[tokio::test]
async fn dropped_receivers_are_pruned() {
	let bus = bus(16);
	let g1 = game("g1");

	{
		let _registration = bus.subscribe(&g1, "lobby", &sid("p1")).await;
	}

	bus.publish(&g1, "lobby", ChatMessage::group("lobby", "anyone?")).await;
	assert_eq!(bus.subscriber_count(&g1, "lobby").await, 0);
}

#[tokio::test]
async fn bounded_queue_drops_and_emits_lagged_marker() {
	let bus = bus(2);
	let g1 = game("g1");

	let (_ack, mut rx) = bus.subscribe(&g1, "lobby", &sid("p1")).await;

	for body in ["m-1", "m-2", "m-3"] {
		bus.publish(&g1, "lobby", ChatMessage::group("lobby", body)).await;
	}

	for expected in ["m-1", "m-2"] {
		match timeout(Duration::from_millis(250), rx.recv()).await {
			Ok(Some(BusItem::Publish { message, .. })) => assert_eq!(message.body, expected),
			other => panic!("expected {expected}, got: {other:?}"),
		}
	}

	bus.publish(&g1, "lobby", ChatMessage::group("lobby", "m-4")).await;

	match timeout(Duration::from_millis(250), rx.recv()).await {
		Ok(Some(BusItem::Publish { message, .. })) => assert_eq!(message.body, "m-4"),
		other => panic!("expected m-4, got: {other:?}"),
	}
	match timeout(Duration::from_millis(250), rx.recv()).await {
		Ok(Some(BusItem::Lagged { dropped })) => assert_eq!(dropped, 1),
		other => panic!("expected Lagged marker, got: {other:?}"),
	}
}
