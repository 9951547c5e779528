#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use gamechat_domain::StoredEntity;
use gamechat_protocol::{decode_entity, encode_entity};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::KvBackend;
use crate::error::StoreError;
use crate::owner::{ObjectDbRequest, OwnerPool, OwnerPoolConfig, OwnerReply};
use crate::procedure::{ProcedureOutcome, ProcedureRegistry};

/// Default bound for a routed `get`.
pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_millis(1000);

/// Fixed bound for a blocking procedure call.
pub const PROCEDURE_CALL_TIMEOUT: Duration = Duration::from_millis(100);

/// Startup builder. Procedures can only be defined here; the registry is frozen by `start`.
pub struct ObjectStoreBuilder {
	backend: Arc<dyn KvBackend>,
	procedures: ProcedureRegistry,
	pool: OwnerPoolConfig,
	get_timeout: Duration,
}

impl ObjectStoreBuilder {
	pub fn new(backend: Arc<dyn KvBackend>) -> Self {
		Self {
			backend,
			procedures: ProcedureRegistry::new(),
			pool: OwnerPoolConfig::default(),
			get_timeout: DEFAULT_GET_TIMEOUT,
		}
	}

	pub fn with_owner_pool(mut self, pool: OwnerPoolConfig) -> Self {
		self.pool = pool;
		self
	}

	pub fn with_get_timeout(mut self, timeout: Duration) -> Self {
		self.get_timeout = timeout;
		self
	}

	/// Register a named procedure.
	pub fn define_procedure<F>(&mut self, name: impl Into<String>, f: F) -> Result<(), StoreError>
	where
		F: Fn(&str, Option<&StoredEntity>, &StoredEntity) -> ProcedureOutcome + Send + Sync + 'static,
	{
		self.procedures.define(name, f)
	}

	/// Spawn the owner pool and return the client.
	pub fn start(self) -> ObjectStoreClient {
		let procedures = Arc::new(self.procedures);
		debug!(procedures = ?procedures.names(), "object store procedures registered");

		let owners = OwnerPool::start(self.pool, Arc::clone(&self.backend), Arc::clone(&procedures));

		ObjectStoreClient {
			backend: self.backend,
			owners: Arc::new(owners),
			procedures,
			get_timeout: self.get_timeout,
		}
	}
}

/// Stateless façade over direct (local) and routed (owner-serialized) access.
#[derive(Clone)]
pub struct ObjectStoreClient {
	backend: Arc<dyn KvBackend>,
	owners: Arc<OwnerPool>,
	procedures: Arc<ProcedureRegistry>,
	get_timeout: Duration,
}

impl std::fmt::Debug for ObjectStoreClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ObjectStoreClient")
			.field("owners", &self.owners)
			.field("procedures", &self.procedures)
			.field("get_timeout", &self.get_timeout)
			.finish()
	}
}

impl ObjectStoreClient {
	/// Write straight to the local backend, bypassing the owners.
	pub async fn put_direct(&self, entity: &StoredEntity) -> Result<(), StoreError> {
		let bytes = encode_entity(entity)?;
		self.backend.put(&entity.id, bytes).await.map_err(StoreError::backend)
	}

	pub async fn get_direct(&self, entity_id: &str) -> Result<Option<StoredEntity>, StoreError> {
		match self.backend.get(entity_id).await.map_err(StoreError::backend)? {
			Some(bytes) => Ok(Some(decode_entity(&bytes)?)),
			None => Ok(None),
		}
	}

	pub async fn delete_direct(&self, entity_id: &str) -> Result<(), StoreError> {
		self.backend.delete(entity_id).await.map_err(StoreError::backend)
	}

	/// Fire-and-forget write through the key's owner.
	pub async fn put(&self, entity: StoredEntity) {
		let owner = self.owners.resolve_owner(&entity.id);
		let entity_id = entity.id.clone();
		if let Err(e) = owner.tell(ObjectDbRequest::Put { entity }).await {
			warn!(%entity_id, error = %e, "routed put dropped");
		}
	}

	/// Routed read bounded by the configured timeout. Timeouts and failures read as absent.
	pub async fn get(&self, entity_id: &str) -> Option<StoredEntity> {
		self.get_with_timeout(entity_id, self.get_timeout).await
	}

	pub async fn get_with_timeout(&self, entity_id: &str, timeout: Duration) -> Option<StoredEntity> {
		match self.try_get(entity_id, timeout).await {
			Ok(entity) => entity,
			Err(e) => {
				debug!(%entity_id, error = %e, "routed get treated as absent");
				None
			}
		}
	}

	/// Routed read that keeps timeout and failure distinct from absence.
	///
	/// `timeout` covers waiting for mailbox space as well as the owner's reply.
	pub async fn try_get(&self, entity_id: &str, timeout: Duration) -> Result<Option<StoredEntity>, StoreError> {
		self.ask(entity_id, timeout, |resp| ObjectDbRequest::Get {
			entity_id: entity_id.to_string(),
			resp,
		})
		.await
	}

	/// Fire-and-forget delete through the key's owner.
	pub async fn delete(&self, entity_id: &str) {
		let owner = self.owners.resolve_owner(entity_id);
		if let Err(e) = owner
			.tell(ObjectDbRequest::Del {
				entity_id: entity_id.to_string(),
			})
			.await
		{
			warn!(%entity_id, error = %e, "routed delete dropped");
		}
	}

	/// Run a named procedure on the owner of `target_id`.
	///
	/// With `blocking` the call waits up to [`PROCEDURE_CALL_TIMEOUT`] and returns the value
	/// the owner stored; otherwise it returns `Ok(None)` once the request is enqueued.
	pub async fn call_procedure(
		&self,
		name: &str,
		target_id: &str,
		patch: StoredEntity,
		blocking: bool,
	) -> Result<Option<StoredEntity>, StoreError> {
		if !self.procedures.contains(name) {
			return Err(StoreError::UnknownProcedure(name.to_string()));
		}

		metrics::counter!("gamechat_store_procedure_calls_total").increment(1);

		let owner = self.owners.resolve_owner(target_id);
		if !blocking {
			owner
				.tell(ObjectDbRequest::Update {
					entity_id: target_id.to_string(),
					procedure: name.to_string(),
					patch,
					resp: None,
				})
				.await?;
			return Ok(None);
		}

		self.ask(target_id, PROCEDURE_CALL_TIMEOUT, |resp| ObjectDbRequest::Update {
			entity_id: target_id.to_string(),
			procedure: name.to_string(),
			patch,
			resp: Some(resp),
		})
		.await
	}

	pub fn procedures(&self) -> &ProcedureRegistry {
		&self.procedures
	}

	/// Shard index that owns `key`.
	pub fn owner_shard(&self, key: &str) -> usize {
		self.owners.resolve_owner(key).shard()
	}

	/// Enqueue a request on the owner of `key` and wait for its reply, all within `timeout`.
	async fn ask(
		&self,
		key: &str,
		timeout: Duration,
		request: impl FnOnce(OwnerReply) -> ObjectDbRequest,
	) -> Result<Option<StoredEntity>, StoreError> {
		let owner = self.owners.resolve_owner(key);
		let (tx, rx) = oneshot::channel();

		let exchange = async {
			match owner.tell(request(tx)).await {
				Ok(()) => rx
					.await
					.unwrap_or_else(|_| Err(StoreError::OwnerUnavailable(key.to_string()))),
				Err(e) => Err(e),
			}
		};

		match tokio::time::timeout(timeout, exchange).await {
			Ok(result) => result,
			Err(_) => {
				metrics::counter!("gamechat_store_timeouts_total").increment(1);
				Err(StoreError::Timeout {
					key: key.to_string(),
					after: timeout,
				})
			}
		}
	}
}
