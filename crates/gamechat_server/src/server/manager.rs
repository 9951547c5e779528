#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt as _;
use gamechat_domain::{
	Channel, ChatMessage, GameId, RegistrantKind, SessionId, StoredEntity, is_private_channel_owner, keys, new_invite_id,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::server::session::{ChatSession, SessionContext, SessionExit, SessionMessage, SessionSnapshot};

/// Chat manager configuration.
#[derive(Debug, Clone)]
pub struct ChatManagerConfig {
	/// Game id for sessions whose player the directory does not know.
	pub default_game_id: GameId,
	pub session_mailbox_capacity: usize,
	pub destroy_ack_timeout: Duration,
	pub max_restarts: u32,
}

/// Registry of live chat sessions keyed by session id.
#[derive(Debug, Clone)]
pub struct ChatManager {
	ctx: SessionContext,
	cfg: ChatManagerConfig,
	sessions: Arc<Mutex<HashMap<SessionId, mpsc::Sender<SessionMessage>>>>,
}

/// Caller-side handle to one session's mailbox.
#[derive(Debug, Clone)]
pub struct SessionHandle {
	id: SessionId,
	tx: mpsc::Sender<SessionMessage>,
}

impl SessionHandle {
	pub fn id(&self) -> &SessionId {
		&self.id
	}

	pub async fn join(&self, channels: Vec<Channel>) {
		self.tell(SessionMessage::Join { channels }).await;
	}

	#[allow(dead_code)]
	pub async fn leave(&self, channels: Vec<String>) {
		self.tell(SessionMessage::Leave { channels }).await;
	}

	pub async fn send(&self, message: ChatMessage) {
		self.tell(SessionMessage::Send { message }).await;
	}

	#[allow(dead_code)]
	pub async fn request_status(&self) {
		self.tell(SessionMessage::Status).await;
	}

	/// Leave every channel; resolves once the session has done so.
	#[allow(dead_code)]
	pub async fn leave_all(&self) -> bool {
		let (done, rx) = oneshot::channel();
		self.tell(SessionMessage::LeaveAll { done }).await;
		rx.await.is_ok()
	}

	#[allow(dead_code)]
	pub async fn snapshot(&self) -> Option<SessionSnapshot> {
		let (resp, rx) = oneshot::channel();
		self.tell(SessionMessage::Snapshot { resp }).await;
		rx.await.ok()
	}

	async fn tell(&self, msg: SessionMessage) {
		if self.tx.send(msg).await.is_err() {
			debug!(session_id = %self.id, "session stopped; message dropped");
		}
	}
}

impl ChatManager {
	pub fn new(ctx: SessionContext, cfg: ChatManagerConfig) -> Self {
		Self {
			ctx,
			cfg,
			sessions: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Handle to the session for `id`, creating it on first contact.
	///
	/// The game id is resolved once at creation; `registrant` only applies to a new session.
	pub async fn get_or_create(&self, id: &SessionId, registrant: RegistrantKind) -> SessionHandle {
		if let Some(tx) = self.sessions.lock().get(id) {
			return SessionHandle {
				id: id.clone(),
				tx: tx.clone(),
			};
		}

		let game_id = match self.ctx.directory.game_of(id).await {
			Some(game_id) => game_id,
			None => {
				debug!(session_id = %id, default = %self.cfg.default_game_id, "player not in directory; using default game");
				self.cfg.default_game_id.clone()
			}
		};

		let mut sessions = self.sessions.lock();
		if let Some(tx) = sessions.get(id) {
			return SessionHandle {
				id: id.clone(),
				tx: tx.clone(),
			};
		}

		let (tx, rx) = mpsc::channel(self.cfg.session_mailbox_capacity.max(1));
		sessions.insert(id.clone(), tx.clone());
		drop(sessions);

		metrics::counter!("gamechat_sessions_started_total").increment(1);
		metrics::gauge!("gamechat_sessions_live").increment(1.0);
		info!(session_id = %id, game_id = %game_id, ?registrant, "chat session created");

		let supervisor = Supervisor {
			id: id.clone(),
			registrant,
			game_id,
			ctx: self.ctx.clone(),
			self_tx: tx.clone(),
			max_restarts: self.cfg.max_restarts,
			sessions: Arc::clone(&self.sessions),
		};
		tokio::spawn(supervisor.run(rx));

		SessionHandle { id: id.clone(), tx }
	}

	/// Handle to a live session, if any.
	#[allow(dead_code)]
	pub fn get(&self, id: &SessionId) -> Option<SessionHandle> {
		self.sessions.lock().get(id).map(|tx| SessionHandle {
			id: id.clone(),
			tx: tx.clone(),
		})
	}

	/// Leave all channels, wait for the acknowledgment, then retire the identity.
	///
	/// Returns false if the session was unknown or did not acknowledge in time.
	pub async fn destroy(&self, id: &SessionId) -> bool {
		let Some(tx) = self.sessions.lock().get(id).cloned() else {
			debug!(session_id = %id, "destroy for unknown session");
			return false;
		};

		let (done, rx) = oneshot::channel();
		let acked = if tx.send(SessionMessage::Destroy { done }).await.is_err() {
			false
		} else {
			match timeout(self.cfg.destroy_ack_timeout, rx).await {
				Ok(Ok(())) => true,
				Ok(Err(_)) => false,
				Err(_) => {
					warn!(session_id = %id, timeout_ms = self.cfg.destroy_ack_timeout.as_millis(), "destroy not acknowledged in time");
					false
				}
			}
		};

		remove_if_same(&self.sessions, id, &tx);
		info!(session_id = %id, acked, "chat session retired");
		acked
	}

	/// Destroy every live session.
	pub async fn shutdown(&self) {
		let ids: Vec<SessionId> = self.sessions.lock().keys().cloned().collect();
		for id in ids {
			self.destroy(&id).await;
		}
	}

	/// Record an invite to `owner`'s private channel and return its id.
	///
	/// Only the channel's owner may issue invites.
	#[allow(dead_code)]
	pub async fn issue_invite(&self, owner: &SessionId, channel: &str) -> Option<String> {
		if !is_private_channel_owner(channel, owner) {
			warn!(session_id = %owner, %channel, "invite for a channel the session does not own refused");
			return None;
		}

		let invite_id = new_invite_id();
		self.ctx.store.put(StoredEntity::marker(keys::invite(channel, &invite_id))).await;
		info!(session_id = %owner, %channel, %invite_id, "invite issued");
		Some(invite_id)
	}

	pub fn len(&self) -> usize {
		self.sessions.lock().len()
	}

	#[allow(dead_code)]
	pub fn is_empty(&self) -> bool {
		self.sessions.lock().is_empty()
	}
}

fn remove_if_same(
	sessions: &Mutex<HashMap<SessionId, mpsc::Sender<SessionMessage>>>,
	id: &SessionId,
	tx: &mpsc::Sender<SessionMessage>,
) {
	let mut sessions = sessions.lock();
	if sessions.get(id).is_some_and(|current| current.same_channel(tx)) {
		sessions.remove(id);
		metrics::gauge!("gamechat_sessions_live").decrement(1.0);
	}
}

/// Runs a session and restarts it (re-running recovery) when it panics.
struct Supervisor {
	id: SessionId,
	registrant: RegistrantKind,
	game_id: GameId,
	ctx: SessionContext,
	self_tx: mpsc::Sender<SessionMessage>,
	max_restarts: u32,
	sessions: Arc<Mutex<HashMap<SessionId, mpsc::Sender<SessionMessage>>>>,
}

impl Supervisor {
	async fn run(self, mut rx: mpsc::Receiver<SessionMessage>) {
		let mut restarts: u32 = 0;

		loop {
			let session = ChatSession::new(
				self.id.clone(),
				self.registrant.clone(),
				self.game_id.clone(),
				self.ctx.clone(),
				self.self_tx.downgrade(),
			);

			match AssertUnwindSafe(session.run(&mut rx)).catch_unwind().await {
				Ok(SessionExit::Destroyed) | Ok(SessionExit::MailboxClosed) => break,
				Err(_) if restarts < self.max_restarts => {
					restarts += 1;
					metrics::counter!("gamechat_session_restarts_total").increment(1);
					warn!(session_id = %self.id, restarts, "chat session panicked; restarting");
				}
				Err(_) => {
					metrics::counter!("gamechat_session_failures_total").increment(1);
					error!(session_id = %self.id, restarts, "chat session panicked too often; giving up");
					break;
				}
			}
		}

		remove_if_same(&self.sessions, &self.id, &self.self_tx);
	}
}
