#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::info;

/// Key → bytes storage with single-key atomicity.
#[async_trait::async_trait]
pub trait KvBackend: Send + Sync {
	async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>>;

	async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()>;

	async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

/// Process-local backend; contents are lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryKvBackend {
	inner: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryKvBackend {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.inner.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.read().is_empty()
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.inner.read().contains_key(key)
	}
}

#[async_trait::async_trait]
impl KvBackend for InMemoryKvBackend {
	async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
		Ok(self.inner.read().get(key).cloned())
	}

	async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()> {
		self.inner.write().insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> anyhow::Result<()> {
		self.inner.write().remove(key);
		Ok(())
	}
}

/// SQL-table backend: one `(entity_id, payload)` row per key.
#[derive(Clone)]
pub struct SqlKvBackend {
	backend: SqlPool,
}

#[derive(Clone)]
enum SqlPool {
	Sqlite(sqlx::SqlitePool),
	Postgres(sqlx::PgPool),
	Mysql(sqlx::MySqlPool),
}

impl SqlKvBackend {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if database_url.starts_with("sqlite:") {
			let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
			sqlx::migrate!("migrations/sqlite")
				.run(&pool)
				.await
				.context("run sqlite migrations")?;

			Ok(Self {
				backend: SqlPool::Sqlite(pool),
			})
		} else if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
			let pool = sqlx::PgPool::connect(database_url).await.context("connect postgres")?;
			sqlx::migrate!("migrations/postgres")
				.run(&pool)
				.await
				.context("run postgres migrations")?;

			Ok(Self {
				backend: SqlPool::Postgres(pool),
			})
		} else if database_url.starts_with("mysql:") || database_url.starts_with("mariadb:") {
			let pool = sqlx::MySqlPool::connect(database_url).await.context("connect mysql")?;
			sqlx::migrate!("migrations/mysql")
				.run(&pool)
				.await
				.context("run mysql migrations")?;

			Ok(Self {
				backend: SqlPool::Mysql(pool),
			})
		} else {
			Err(anyhow!("unsupported database_url (use sqlite:, postgres:, mysql:)"))
		}
	}
}

#[async_trait::async_trait]
impl KvBackend for SqlKvBackend {
	async fn get(&self, key: &str) -> anyhow::Result<Option<Bytes>> {
		let row: Option<(Vec<u8>,)> = match &self.backend {
			SqlPool::Sqlite(pool) => sqlx::query_as("SELECT payload FROM object_store WHERE entity_id = ?")
				.bind(key)
				.fetch_optional(pool)
				.await
				.context("select object (sqlite)")?,
			SqlPool::Postgres(pool) => sqlx::query_as("SELECT payload FROM object_store WHERE entity_id = $1")
				.bind(key)
				.fetch_optional(pool)
				.await
				.context("select object (postgres)")?,
			SqlPool::Mysql(pool) => sqlx::query_as("SELECT payload FROM object_store WHERE entity_id = ?")
				.bind(key)
				.fetch_optional(pool)
				.await
				.context("select object (mysql)")?,
		};

		Ok(row.map(|(payload,)| Bytes::from(payload)))
	}

	async fn put(&self, key: &str, value: Bytes) -> anyhow::Result<()> {
		let payload = value.to_vec();
		match &self.backend {
			SqlPool::Sqlite(pool) => {
				sqlx::query(
					"INSERT INTO object_store (entity_id, payload, updated_at) VALUES (?, ?, strftime('%s','now')) \
					ON CONFLICT(entity_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
				)
				.bind(key)
				.bind(payload)
				.execute(pool)
				.await
				.context("upsert object (sqlite)")?;
			}
			SqlPool::Postgres(pool) => {
				sqlx::query(
					"INSERT INTO object_store (entity_id, payload, updated_at) VALUES ($1, $2, NOW()) \
					ON CONFLICT (entity_id) DO UPDATE SET payload = EXCLUDED.payload, updated_at = EXCLUDED.updated_at",
				)
				.bind(key)
				.bind(payload)
				.execute(pool)
				.await
				.context("upsert object (postgres)")?;
			}
			SqlPool::Mysql(pool) => {
				sqlx::query(
					"INSERT INTO object_store (entity_id, payload, updated_at) VALUES (?, ?, NOW()) \
					ON DUPLICATE KEY UPDATE payload = VALUES(payload), updated_at = VALUES(updated_at)",
				)
				.bind(key)
				.bind(payload)
				.execute(pool)
				.await
				.context("upsert object (mysql)")?;
			}
		}
		Ok(())
	}

	async fn delete(&self, key: &str) -> anyhow::Result<()> {
		match &self.backend {
			SqlPool::Sqlite(pool) => {
				sqlx::query("DELETE FROM object_store WHERE entity_id = ?")
					.bind(key)
					.execute(pool)
					.await
					.context("delete object (sqlite)")?;
			}
			SqlPool::Postgres(pool) => {
				sqlx::query("DELETE FROM object_store WHERE entity_id = $1")
					.bind(key)
					.execute(pool)
					.await
					.context("delete object (postgres)")?;
			}
			SqlPool::Mysql(pool) => {
				sqlx::query("DELETE FROM object_store WHERE entity_id = ?")
					.bind(key)
					.execute(pool)
					.await
					.context("delete object (mysql)")?;
			}
		}
		Ok(())
	}
}

/// Build the configured backend: SQL when a database URL is given, memory otherwise.
pub async fn connect_backend(database_url: Option<&str>) -> anyhow::Result<Arc<dyn KvBackend>> {
	match database_url {
		Some(url) => {
			let backend = SqlKvBackend::connect(url).await?;
			info!("object store: sql backend connected");
			Ok(Arc::new(backend))
		}
		None => {
			info!("object store: in-memory backend (state is not durable across process restarts)");
			Ok(Arc::new(InMemoryKvBackend::new()))
		}
	}
}
