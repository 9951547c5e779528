#![forbid(unsafe_code)]

use gamechat_domain::{EntityPayload, GameId, StoredEntity, keys};
use gamechat_store::{ObjectStoreBuilder, ObjectStoreClient, ProcedureOutcome, StoreError};

pub const CHAT_ADD_SUBSCRIBER: &str = "chat_add_subscriber";
pub const CHAT_REMOVE_SUBSCRIBER: &str = "chat_remove_subscriber";

/// Register the chat procedures on the store builder.
pub fn register_chat_procedures(builder: &mut ObjectStoreBuilder) -> Result<(), StoreError> {
	builder.define_procedure(CHAT_ADD_SUBSCRIBER, add_subscriber)?;
	builder.define_procedure(CHAT_REMOVE_SUBSCRIBER, remove_subscriber)?;
	Ok(())
}

/// Patch id is the subscriber. Adding a present id leaves the list untouched.
pub fn add_subscriber(_target: &str, current: Option<&StoredEntity>, patch: &StoredEntity) -> ProcedureOutcome {
	let mut list = current_list(current);
	if list.iter().any(|s| s == &patch.id) {
		return ProcedureOutcome::Unchanged;
	}
	list.push(patch.id.clone());
	ProcedureOutcome::Store(StoredEntity::with_payload("", EntityPayload::Subscribers(list)))
}

/// Removing an absent id is a no-op; the key is deleted once the list is empty.
pub fn remove_subscriber(_target: &str, current: Option<&StoredEntity>, patch: &StoredEntity) -> ProcedureOutcome {
	let mut list = current_list(current);
	let before = list.len();
	list.retain(|s| s != &patch.id);

	if list.len() == before {
		ProcedureOutcome::Unchanged
	} else if list.is_empty() {
		ProcedureOutcome::Delete
	} else {
		ProcedureOutcome::Store(StoredEntity::with_payload("", EntityPayload::Subscribers(list)))
	}
}

fn current_list(current: Option<&StoredEntity>) -> Vec<String> {
	current
		.and_then(StoredEntity::subscribers)
		.map(<[String]>::to_vec)
		.unwrap_or_default()
}

/// Subscriber list of `topic` in `game_id`; absent or unreadable reads as empty.
pub async fn subscribers_for_topic(store: &ObjectStoreClient, game_id: &GameId, topic: &str) -> Vec<String> {
	store
		.get(&keys::topic_subscribers(game_id, topic))
		.await
		.and_then(|e| e.subscribers().map(<[String]>::to_vec))
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use proptest::prelude::*;

	use super::*;

	type Procedure = fn(&str, Option<&StoredEntity>, &StoredEntity) -> ProcedureOutcome;

	fn apply(current: Option<StoredEntity>, f: Procedure, id: &str) -> Option<StoredEntity> {
		match f("g1_chat_topic_lobby", current.as_ref(), &StoredEntity::marker(id)) {
			ProcedureOutcome::Store(e) => Some(e),
			ProcedureOutcome::Delete => None,
			ProcedureOutcome::Unchanged => current,
		}
	}

	#[test]
	fn add_is_idempotent() {
		let once = apply(None, add_subscriber, "p1");
		let twice = apply(once.clone(), add_subscriber, "p1");
		assert_eq!(once, twice);
		assert_eq!(twice.and_then(|e| e.subscribers().map(<[String]>::to_vec)), Some(vec!["p1".to_string()]));
	}

	#[test]
	fn removing_the_last_subscriber_deletes_the_list() {
		let list = apply(None, add_subscriber, "p1");
		assert_eq!(apply(list, remove_subscriber, "p1"), None);
	}

	#[test]
	fn removing_an_absent_subscriber_is_a_no_op() {
		assert_eq!(
			remove_subscriber("k", None, &StoredEntity::marker("p1")),
			ProcedureOutcome::Unchanged
		);

		let list = apply(None, add_subscriber, "p1");
		assert_eq!(apply(list.clone(), remove_subscriber, "p2"), list);
	}

	proptest! {
		#[test]
		fn subscriber_list_behaves_as_a_set(ops in proptest::collection::vec((any::<bool>(), 0u8..8), 0..64)) {
			let mut model: BTreeSet<String> = BTreeSet::new();
			let mut stored: Option<StoredEntity> = None;

			for (add, n) in ops {
				let id = format!("p{n}");
				if add {
					model.insert(id.clone());
					stored = apply(stored, add_subscriber, &id);
				} else {
					model.remove(&id);
					stored = apply(stored, remove_subscriber, &id);
				}
			}

			let list = stored.and_then(|e| e.subscribers().map(<[String]>::to_vec)).unwrap_or_default();
			let unique: BTreeSet<String> = list.iter().cloned().collect();
			prop_assert_eq!(unique.len(), list.len());
			prop_assert_eq!(unique, model);
		}
	}
}
