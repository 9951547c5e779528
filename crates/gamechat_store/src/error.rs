#![forbid(unsafe_code)]

use std::time::Duration;

use gamechat_protocol::CodecError;
use thiserror::Error;

/// Object store errors.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("unknown procedure: {0}")]
	UnknownProcedure(String),

	#[error("procedure already defined: {0}")]
	DuplicateProcedure(String),

	#[error("owner of {key} did not reply within {after:?}")]
	Timeout {
		key: String,
		after: Duration,
	},

	#[error("owner of {0} is unavailable")]
	OwnerUnavailable(String),

	#[error("codec error: {0}")]
	Codec(#[from] CodecError),

	#[error("backend error: {0}")]
	Backend(String),
}

impl StoreError {
	pub(crate) fn backend(err: anyhow::Error) -> Self {
		Self::Backend(format!("{err:#}"))
	}
}
