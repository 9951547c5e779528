#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.gamechat/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".gamechat").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub store: StoreSettings,
	pub chat: ChatSettings,
}

#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
}

/// Object store settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
	/// SQL backend URL (sqlite:, postgres:, mysql:). In-memory when unset.
	pub database_url: Option<String>,
	pub owner_shards: usize,
	pub owner_mailbox_capacity: usize,
	/// Bound for routed reads.
	pub get_timeout: Duration,
}

impl Default for StoreSettings {
	fn default() -> Self {
		Self {
			database_url: None,
			owner_shards: 16,
			owner_mailbox_capacity: 1024,
			get_timeout: Duration::from_millis(1000),
		}
	}
}

/// Chat session settings.
#[derive(Debug, Clone)]
pub struct ChatSettings {
	/// Game id for sessions the player directory does not know.
	pub default_game_id: String,
	pub session_mailbox_capacity: usize,
	pub bridge_mailbox_capacity: usize,
	pub bus_subscriber_queue_capacity: usize,
	/// How long `destroy` waits for a session to finish leaving its channels.
	pub destroy_ack_timeout: Duration,
	/// Restarts allowed per session before the supervisor gives up.
	pub max_restarts: u32,
}

impl Default for ChatSettings {
	fn default() -> Self {
		Self {
			default_game_id: "default".to_string(),
			session_mailbox_capacity: 256,
			bridge_mailbox_capacity: 256,
			bus_subscriber_queue_capacity: 1024,
			destroy_ack_timeout: Duration::from_secs(5),
			max_restarts: 3,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	store: FileStoreSettings,

	#[serde(default)]
	chat: FileChatSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	health_bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileStoreSettings {
	database_url: Option<String>,
	owner_shards: Option<usize>,
	owner_mailbox_capacity: Option<usize>,
	get_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChatSettings {
	default_game_id: Option<String>,
	session_mailbox_capacity: Option<usize>,
	bridge_mailbox_capacity: Option<usize>,
	bus_subscriber_queue_capacity: Option<usize>,
	destroy_ack_timeout_ms: Option<u64>,
	max_restarts: Option<u32>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let store_defaults = StoreSettings::default();
		let chat_defaults = ChatSettings::default();

		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
			},
			store: StoreSettings {
				database_url: file.store.database_url.filter(|s| !s.trim().is_empty()),
				owner_shards: file
					.store
					.owner_shards
					.filter(|v| *v > 0)
					.unwrap_or(store_defaults.owner_shards),
				owner_mailbox_capacity: file
					.store
					.owner_mailbox_capacity
					.filter(|v| *v > 0)
					.unwrap_or(store_defaults.owner_mailbox_capacity),
				get_timeout: file
					.store
					.get_timeout_ms
					.filter(|v| *v > 0)
					.map(Duration::from_millis)
					.unwrap_or(store_defaults.get_timeout),
			},
			chat: ChatSettings {
				default_game_id: file
					.chat
					.default_game_id
					.map(|s| s.trim().to_string())
					.filter(|s| !s.is_empty())
					.unwrap_or(chat_defaults.default_game_id),
				session_mailbox_capacity: file
					.chat
					.session_mailbox_capacity
					.filter(|v| *v > 0)
					.unwrap_or(chat_defaults.session_mailbox_capacity),
				bridge_mailbox_capacity: file
					.chat
					.bridge_mailbox_capacity
					.filter(|v| *v > 0)
					.unwrap_or(chat_defaults.bridge_mailbox_capacity),
				bus_subscriber_queue_capacity: file
					.chat
					.bus_subscriber_queue_capacity
					.filter(|v| *v > 0)
					.unwrap_or(chat_defaults.bus_subscriber_queue_capacity),
				destroy_ack_timeout: file
					.chat
					.destroy_ack_timeout_ms
					.map(Duration::from_millis)
					.unwrap_or(chat_defaults.destroy_ack_timeout),
				max_restarts: file.chat.max_restarts.unwrap_or(chat_defaults.max_restarts),
			},
		}
	}
}

pub(crate) fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("GAMECHAT_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GAMECHAT_HEALTH_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.health_bind = Some(v);
			info!("server config: health_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GAMECHAT_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.store.database_url = Some(v);
			info!("store config: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GAMECHAT_OWNER_SHARDS")
		&& let Ok(shards) = v.trim().parse::<usize>()
		&& shards > 0
	{
		cfg.store.owner_shards = shards;
		info!(shards, "store config: owner_shards overridden by env");
	}

	if let Ok(v) = std::env::var("GAMECHAT_GET_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.store.get_timeout = Duration::from_millis(ms);
		info!(ms, "store config: get_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("GAMECHAT_DEFAULT_GAME_ID") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.chat.default_game_id = v;
			info!("chat config: default_game_id overridden by env");
		}
	}

	if let Ok(v) = std::env::var("GAMECHAT_DESTROY_ACK_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.chat.destroy_ack_timeout = Duration::from_millis(ms);
		info!(ms, "chat config: destroy_ack_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("GAMECHAT_MAX_RESTARTS")
		&& let Ok(max_restarts) = v.trim().parse::<u32>()
	{
		cfg.chat.max_restarts = max_restarts;
		info!(max_restarts, "chat config: max_restarts overridden by env");
	}

	if cfg.chat.destroy_ack_timeout.is_zero() {
		warn!("chat config: destroy_ack_timeout is zero; destroy will not wait for sessions to leave");
	}
}
