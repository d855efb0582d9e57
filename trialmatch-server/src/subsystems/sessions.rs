//! Owning store for live conversations, plus the idle-session sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::conversation::{Conversation, ConversationError};

struct SessionSlot {
    conversation: Arc<Mutex<Conversation>>,
    last_active: Instant,
}

/// Session id → conversation. Each conversation sits behind its own mutex, so
/// one session is processed strictly sequentially while others proceed.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Register a fresh conversation and return its handle.
    pub async fn create(&self) -> (Uuid, Arc<Mutex<Conversation>>) {
        let id = Uuid::new_v4();
        let conversation = Arc::new(Mutex::new(Conversation::new(id)));
        self.sessions.write().await.insert(
            id,
            SessionSlot {
                conversation: conversation.clone(),
                last_active: Instant::now(),
            },
        );
        tracing::debug!(session_id = %id, "Session created");
        (id, conversation)
    }

    /// Look up a conversation and mark it active.
    pub async fn get(&self, id: Uuid) -> Result<Arc<Mutex<Conversation>>, ConversationError> {
        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .get_mut(&id)
            .ok_or(ConversationError::UnknownSession(id))?;
        slot.last_active = Instant::now();
        Ok(slot.conversation.clone())
    }

    /// Exclusive access for one input. A second input while the first is
    /// still being processed is rejected rather than queued.
    pub async fn acquire(&self, id: Uuid) -> Result<OwnedMutexGuard<Conversation>, ConversationError> {
        let conversation = self.get(id).await?;
        conversation
            .try_lock_owned()
            .map_err(|_| ConversationError::Busy)
    }

    /// Remove a session. Returns whether it existed.
    pub async fn end(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            tracing::info!(session_id = %id, "Session ended");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(Instant::now()).await
    }

    /// Evict sessions idle longer than the timeout as of `now`. Sessions that
    /// are mid-request stay.
    pub async fn sweep_idle_at(&self, now: Instant) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| {
            let idle = now.saturating_duration_since(slot.last_active) > self.idle_timeout;
            let busy = slot.conversation.try_lock().is_err();
            !idle || busy
        });
        before - sessions.len()
    }
}

/// Periodically evict idle sessions until shutdown.
pub async fn run_session_sweeper(
    sessions: Arc<SessionStore>,
    interval_seconds: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        interval_s = interval_seconds,
        idle_timeout_s = sessions.idle_timeout().as_secs(),
        "Session sweeper started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = sessions.sweep_idle().await;
                if evicted > 0 {
                    let remaining = sessions.len().await;
                    tracing::info!(evicted, remaining, "Idle sessions evicted");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session sweeper shutting down");
                break;
            }
        }
    }
}
