#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use gamechat_domain::StoredEntity;

use crate::error::StoreError;

/// What an owner should do with a key after running a procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureOutcome {
	/// Replace the stored value. The entity id is forced to the target key.
	Store(StoredEntity),
	/// Remove the key.
	Delete,
	/// Leave the stored value as it was.
	Unchanged,
}

/// Update function run by a key's owner: `(target_id, current, patch) -> outcome`.
pub type ProcedureFn = Arc<dyn Fn(&str, Option<&StoredEntity>, &StoredEntity) -> ProcedureOutcome + Send + Sync>;

/// Named update functions, filled during startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct ProcedureRegistry {
	procedures: HashMap<String, ProcedureFn>,
}

impl ProcedureRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register `f` under `name`. Each name can be defined once.
	pub fn define<F>(&mut self, name: impl Into<String>, f: F) -> Result<(), StoreError>
	where
		F: Fn(&str, Option<&StoredEntity>, &StoredEntity) -> ProcedureOutcome + Send + Sync + 'static,
	{
		let name = name.into();
		if self.procedures.contains_key(&name) {
			return Err(StoreError::DuplicateProcedure(name));
		}
		self.procedures.insert(name, Arc::new(f));
		Ok(())
	}

	pub fn get(&self, name: &str) -> Option<&ProcedureFn> {
		self.procedures.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.procedures.contains_key(name)
	}

	/// Sorted procedure names (for startup logs).
	pub fn names(&self) -> Vec<&str> {
		let mut names: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}

	/// Run `name` against `current` and `patch`.
	pub fn apply(
		&self,
		name: &str,
		target_id: &str,
		current: Option<&StoredEntity>,
		patch: &StoredEntity,
	) -> Result<ProcedureOutcome, StoreError> {
		let f = self
			.get(name)
			.ok_or_else(|| StoreError::UnknownProcedure(name.to_string()))?;

		Ok(match f(target_id, current, patch) {
			ProcedureOutcome::Store(mut entity) => {
				entity.id = target_id.to_string();
				ProcedureOutcome::Store(entity)
			}
			other => other,
		})
	}
}

impl fmt::Debug for ProcedureRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProcedureRegistry").field("procedures", &self.names()).finish()
	}
}
