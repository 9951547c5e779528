#![forbid(unsafe_code)]

pub mod backend;
pub mod client;
pub mod error;
pub mod owner;
pub mod procedure;
pub mod sharding;

pub use backend::{InMemoryKvBackend, KvBackend, SqlKvBackend, connect_backend};
pub use client::{DEFAULT_GET_TIMEOUT, ObjectStoreBuilder, ObjectStoreClient, PROCEDURE_CALL_TIMEOUT};
pub use error::StoreError;
pub use owner::{ObjectDbRequest, OwnerPool, OwnerPoolConfig, OwnerRef};
pub use procedure::{ProcedureFn, ProcedureOutcome, ProcedureRegistry};
pub use sharding::{HashResolver, ResolveOwner, djb2_hash64};
