#![forbid(unsafe_code)]

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use gamechat_domain::GameId;
use gamechat_store::{ObjectStoreBuilder, OwnerPoolConfig, connect_backend};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::parse_env_bool;
use crate::server::bridge::BridgeConfig;
use crate::server::bus::{TopicBus, TopicBusConfig};
use crate::server::delivery::LocalDelivery;
use crate::server::demo::DemoDriver;
use crate::server::directory::InMemoryPlayerDirectory;
use crate::server::health::{HealthState, spawn_health_server};
use crate::server::manager::{ChatManager, ChatManagerConfig};
use crate::server::procedures::register_chat_procedures;
use crate::server::session::SessionContext;

/// Dev-only demo driver enable flag.
const GAMECHAT_ENABLE_DEMO_ENV: &str = "GAMECHAT_ENABLE_DEMO";

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: gamechat_server [--config path]\n\
\n\
Options:\n\
\t--config  Config file (default: ~/.gamechat/config.toml)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<PathBuf> {
	let mut config_path = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				config_path = Some(PathBuf::from(v));
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	config_path
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,gamechat_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("gamechat_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = match parse_args() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(cfg.server.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let default_game_id = GameId::new(cfg.chat.default_game_id.clone()).context("chat.default_game_id")?;

	let backend = connect_backend(cfg.store.database_url.as_deref())
		.await
		.context("connect object store backend")?;

	let mut store_builder = ObjectStoreBuilder::new(backend)
		.with_owner_pool(OwnerPoolConfig {
			shards: cfg.store.owner_shards,
			mailbox_capacity: cfg.store.owner_mailbox_capacity,
		})
		.with_get_timeout(cfg.store.get_timeout);
	register_chat_procedures(&mut store_builder).context("register chat procedures")?;
	let store = store_builder.start();

	let bus = TopicBus::new(TopicBusConfig {
		subscriber_queue_capacity: cfg.chat.bus_subscriber_queue_capacity,
		debug_logs: false,
	});
	let directory = Arc::new(InMemoryPlayerDirectory::new());
	let delivery = Arc::new(LocalDelivery::new(cfg.chat.session_mailbox_capacity));

	let manager = ChatManager::new(
		SessionContext {
			store,
			bus,
			directory: directory.clone(),
			delivery: delivery.clone(),
			bridge: BridgeConfig {
				mailbox_capacity: cfg.chat.bridge_mailbox_capacity,
			},
		},
		ChatManagerConfig {
			default_game_id: default_game_id.clone(),
			session_mailbox_capacity: cfg.chat.session_mailbox_capacity,
			destroy_ack_timeout: cfg.chat.destroy_ack_timeout,
			max_restarts: cfg.chat.max_restarts,
		},
	);

	let demo_enabled = cfg!(debug_assertions)
		&& std::env::var(GAMECHAT_ENABLE_DEMO_ENV)
			.ok()
			.and_then(|v| parse_env_bool(&v))
			.unwrap_or(false);

	if demo_enabled {
		info!(env = GAMECHAT_ENABLE_DEMO_ENV, "starting dev-only demo driver (enabled by env)");
		DemoDriver::new(default_game_id).spawn(manager.clone(), directory, delivery);
	}

	health_state.mark_ready();
	info!("gamechat_server: ready");

	tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;

	info!(sessions = manager.len(), "shutting down");
	health_state.mark_not_ready();
	manager.shutdown().await;

	Ok(())
}
