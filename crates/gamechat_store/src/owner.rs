#![forbid(unsafe_code)]

use std::sync::Arc;

use gamechat_domain::StoredEntity;
use gamechat_protocol::{decode_entity, encode_entity};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::KvBackend;
use crate::error::StoreError;
use crate::procedure::{ProcedureOutcome, ProcedureRegistry};
use crate::sharding::{HashResolver, ResolveOwner};

/// Reply channel for owner requests that expect an answer.
pub type OwnerReply = oneshot::Sender<Result<Option<StoredEntity>, StoreError>>;

/// Requests handled by a key's owner.
#[derive(Debug)]
pub enum ObjectDbRequest {
	Put {
		entity: StoredEntity,
	},

	Get {
		entity_id: String,
		resp: OwnerReply,
	},

	Del {
		entity_id: String,
	},

	/// Run a named procedure against the current value of `entity_id`.
	Update {
		entity_id: String,
		procedure: String,
		patch: StoredEntity,
		resp: Option<OwnerReply>,
	},
}

impl ObjectDbRequest {
	fn kind(&self) -> &'static str {
		match self {
			Self::Put { .. } => "put",
			Self::Get { .. } => "get",
			Self::Del { .. } => "del",
			Self::Update { .. } => "update",
		}
	}
}

/// Address of one owner task.
#[derive(Debug, Clone)]
pub struct OwnerRef {
	shard: usize,
	tx: mpsc::Sender<ObjectDbRequest>,
}

impl OwnerRef {
	pub fn shard(&self) -> usize {
		self.shard
	}

	/// Enqueue a request on the owner's mailbox.
	pub async fn tell(&self, req: ObjectDbRequest) -> Result<(), StoreError> {
		self.tx
			.send(req)
			.await
			.map_err(|e| StoreError::OwnerUnavailable(format!("shard {} ({})", self.shard, e.0.kind())))
	}
}

/// Owner pool configuration.
#[derive(Debug, Clone)]
pub struct OwnerPoolConfig {
	/// Number of owner tasks; keys are hashed across them.
	pub shards: usize,

	pub mailbox_capacity: usize,
}

impl Default for OwnerPoolConfig {
	fn default() -> Self {
		Self {
			shards: 16,
			mailbox_capacity: 1024,
		}
	}
}

/// Fixed set of owner tasks. Every key maps to exactly one of them.
pub struct OwnerPool {
	owners: Vec<OwnerRef>,
	resolver: Arc<dyn ResolveOwner>,
}

impl OwnerPool {
	/// Spawn the owner tasks. Must be called inside a tokio runtime.
	pub fn start(cfg: OwnerPoolConfig, backend: Arc<dyn KvBackend>, procedures: Arc<ProcedureRegistry>) -> Self {
		let resolver = HashResolver::new(cfg.shards);
		Self::start_with_resolver(cfg, backend, procedures, Arc::new(resolver))
	}

	pub fn start_with_resolver(
		cfg: OwnerPoolConfig,
		backend: Arc<dyn KvBackend>,
		procedures: Arc<ProcedureRegistry>,
		resolver: Arc<dyn ResolveOwner>,
	) -> Self {
		let count = resolver.owner_count();
		let mut owners = Vec::with_capacity(count);

		for shard in 0..count {
			let (tx, rx) = mpsc::channel(cfg.mailbox_capacity.max(1));
			let owner = ObjectDbOwner {
				shard,
				backend: Arc::clone(&backend),
				procedures: Arc::clone(&procedures),
			};
			tokio::spawn(owner.run(rx));
			owners.push(OwnerRef { shard, tx });
		}

		info!(shards = count, "object store owners started");

		Self { owners, resolver }
	}

	/// Owner responsible for `key`.
	pub fn resolve_owner(&self, key: &str) -> &OwnerRef {
		let idx = self.resolver.resolve_owner(key) % self.owners.len();
		&self.owners[idx]
	}

	pub fn len(&self) -> usize {
		self.owners.len()
	}

	pub fn is_empty(&self) -> bool {
		self.owners.is_empty()
	}
}

impl std::fmt::Debug for OwnerPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OwnerPool").field("owners", &self.owners.len()).finish()
	}
}

/// Single-threaded owner: processes one request at a time to completion.
struct ObjectDbOwner {
	shard: usize,
	backend: Arc<dyn KvBackend>,
	procedures: Arc<ProcedureRegistry>,
}

impl ObjectDbOwner {
	async fn run(self, mut rx: mpsc::Receiver<ObjectDbRequest>) {
		while let Some(req) = rx.recv().await {
			self.handle(req).await;
		}
		debug!(shard = self.shard, "object store owner mailbox closed; exiting");
	}

	async fn handle(&self, req: ObjectDbRequest) {
		match req {
			ObjectDbRequest::Put { entity } => {
				if let Err(e) = self.store(&entity).await {
					warn!(shard = self.shard, entity_id = %entity.id, error = %e, "owner put failed");
				}
			}

			ObjectDbRequest::Get { entity_id, resp } => {
				let _ = resp.send(self.load(&entity_id).await);
			}

			ObjectDbRequest::Del { entity_id } => {
				if let Err(e) = self.backend.delete(&entity_id).await {
					metrics::counter!("gamechat_store_backend_errors_total").increment(1);
					warn!(shard = self.shard, %entity_id, error = %e, "owner delete failed");
				}
			}

			ObjectDbRequest::Update {
				entity_id,
				procedure,
				patch,
				resp,
			} => {
				let result = self.update(&entity_id, &procedure, &patch).await;
				if let Err(e) = &result {
					warn!(shard = self.shard, %entity_id, %procedure, error = %e, "procedure failed");
				}
				if let Some(resp) = resp {
					let _ = resp.send(result);
				}
			}
		}
	}

	async fn load(&self, entity_id: &str) -> Result<Option<StoredEntity>, StoreError> {
		let bytes = self.backend.get(entity_id).await.map_err(|e| {
			metrics::counter!("gamechat_store_backend_errors_total").increment(1);
			StoreError::backend(e)
		})?;

		match bytes {
			Some(bytes) => Ok(Some(decode_entity(&bytes)?)),
			None => Ok(None),
		}
	}

	async fn store(&self, entity: &StoredEntity) -> Result<(), StoreError> {
		let bytes = encode_entity(entity)?;
		self.backend.put(&entity.id, bytes).await.map_err(|e| {
			metrics::counter!("gamechat_store_backend_errors_total").increment(1);
			StoreError::backend(e)
		})
	}

	async fn update(
		&self,
		entity_id: &str,
		procedure: &str,
		patch: &StoredEntity,
	) -> Result<Option<StoredEntity>, StoreError> {
		if !self.procedures.contains(procedure) {
			return Err(StoreError::UnknownProcedure(procedure.to_string()));
		}

		let current = self.load(entity_id).await?;
		let outcome = self.procedures.apply(procedure, entity_id, current.as_ref(), patch)?;

		match outcome {
			ProcedureOutcome::Store(entity) => {
				self.store(&entity).await?;
				Ok(Some(entity))
			}
			ProcedureOutcome::Delete => {
				self.backend.delete(entity_id).await.map_err(StoreError::backend)?;
				Ok(None)
			}
			ProcedureOutcome::Unchanged => Ok(current),
		}
	}
}
