#![forbid(unsafe_code)]

use std::sync::Arc;

use bytes::Bytes;
use gamechat_domain::{EntityPayload, StoredEntity};
use gamechat_store::{KvBackend, ObjectStoreBuilder, OwnerPoolConfig, SqlKvBackend, connect_backend};

async fn sqlite_backend() -> Arc<dyn KvBackend> {
	connect_backend(Some("sqlite::memory:"))
		.await
		.expect("connect sqlite and run migrations")
}

#[tokio::test]
async fn sqlite_round_trips_put_get_delete() {
	let backend = sqlite_backend().await;

	assert!(backend.get("subscriptions_p1").await.expect("get").is_none());

	backend
		.put("subscriptions_p1", Bytes::from_static(b"lobby"))
		.await
		.expect("put");
	assert_eq!(
		backend.get("subscriptions_p1").await.expect("get"),
		Some(Bytes::from_static(b"lobby"))
	);

	backend.delete("subscriptions_p1").await.expect("delete");
	assert!(backend.get("subscriptions_p1").await.expect("get").is_none());

	// Deleting a missing key is not an error.
	backend.delete("subscriptions_p1").await.expect("delete again");
}

#[tokio::test]
async fn sqlite_put_overwrites_the_existing_row() {
	let backend = sqlite_backend().await;

	backend.put("k", Bytes::from_static(b"first")).await.expect("insert");
	backend.put("k", Bytes::from_static(b"second")).await.expect("upsert");

	assert_eq!(backend.get("k").await.expect("get"), Some(Bytes::from_static(b"second")));
}

#[tokio::test]
async fn routed_reads_see_direct_writes_on_sqlite() {
	let store = ObjectStoreBuilder::new(sqlite_backend().await)
		.with_owner_pool(OwnerPoolConfig {
			shards: 2,
			mailbox_capacity: 16,
		})
		.start();

	store
		.put_direct(&StoredEntity::with_payload(
			"g1_chat_topic_lobby",
			EntityPayload::Subscribers(vec!["p1".into(), "p2".into()]),
		))
		.await
		.expect("put_direct");

	let routed = store.get("g1_chat_topic_lobby").await.expect("routed get");
	assert_eq!(routed.subscribers(), Some(&["p1".to_string(), "p2".to_string()][..]));

	store
		.put(StoredEntity::with_payload(
			"g1_chat_topic_lobby",
			EntityPayload::Subscribers(vec!["p2".into()]),
		))
		.await;
	// A routed read through the same owner is ordered after the write.
	assert!(store.get("g1_chat_topic_lobby").await.is_some());
	let direct = store
		.get_direct("g1_chat_topic_lobby")
		.await
		.expect("get_direct")
		.expect("row present");
	assert_eq!(direct.subscribers(), Some(&["p2".to_string()][..]));
}

#[tokio::test]
async fn unsupported_database_url_is_rejected() {
	let err = SqlKvBackend::connect("redis://localhost").await.err().expect("rejected");
	assert!(err.to_string().contains("unsupported database_url"), "unexpected error: {err:#}");
}
