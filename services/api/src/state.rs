//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the assessment
//! providers shared by every session and the registry of live sessions.

use chrono::{DateTime, Duration, Utc};
use hermes_core::error::Result;
use hermes_core::orchestrator::{AssessmentServices, AssessmentSession, SessionState};
use hermes_core::store::Identity;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::SessionView;

/// A live session and the identity that owns it.
///
/// The session mutex is held for the whole of a provider call. Readers that
/// must not wait use the published state and the last full snapshot.
pub struct SessionEntry {
    pub id: Uuid,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub session: Mutex<AssessmentSession>,
    state: watch::Receiver<SessionState>,
    snapshot: RwLock<SessionView>,
    last_active_ms: AtomicI64,
}

impl SessionEntry {
    /// Builds the full view of a locked session and keeps it as the snapshot.
    pub async fn publish(&self, session: &AssessmentSession) -> SessionView {
        let view = SessionView::new(self.id, self.created_at, session);
        *self.snapshot.write().await = view.clone();
        view
    }

    /// The current view, without waiting on a busy session.
    pub async fn view(&self) -> SessionView {
        match self.session.try_lock() {
            Ok(session) => self.publish(&session).await,
            Err(_) => {
                let state = self.state.borrow().clone();
                self.snapshot.read().await.clone().with_state(state)
            }
        }
    }

    pub fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn last_active_ms(&self) -> i64 {
        self.last_active_ms.load(Ordering::Relaxed)
    }
}

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub services: AssessmentServices,
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionEntry>>>>,
}

impl AppState {
    pub fn new(services: AssessmentServices) -> Self {
        Self {
            services,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Signs `identity` into a new session and registers it.
    ///
    /// State transitions are forwarded from the session's channel into a
    /// `watch` that readers consult while the session is busy.
    pub async fn create_session(&self, identity: Identity) -> Result<Arc<SessionEntry>> {
        let owner = identity.id.clone();
        let (tx, mut rx) = mpsc::channel(16);
        let mut session = AssessmentSession::new(self.services.clone()).with_state_channel(tx);
        session.authenticate(Some(identity)).await?;

        let (state_tx, state_rx) = watch::channel(session.state().clone());
        tokio::spawn(async move {
            while let Some(state) = rx.recv().await {
                state_tx.send_replace(state);
            }
        });

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let entry = Arc::new(SessionEntry {
            id,
            owner,
            created_at,
            snapshot: RwLock::new(SessionView::new(id, created_at, &session)),
            session: Mutex::new(session),
            state: state_rx,
            last_active_ms: AtomicI64::new(created_at.timestamp_millis()),
        });
        self.sessions.write().await.insert(id, entry.clone());
        Ok(entry)
    }

    /// Looks up a session, hiding sessions owned by someone else.
    pub async fn session_for(&self, id: Uuid, owner: &str) -> Option<Arc<SessionEntry>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .filter(|entry| entry.owner == owner)
            .cloned()
    }

    /// Removes a session owned by `owner`. Returns whether one was removed.
    pub async fn remove_session(&self, id: Uuid, owner: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        if sessions.get(&id).is_some_and(|entry| entry.owner == owner) {
            sessions.remove(&id);
            info!(session_id = %id, "Removed assessment session");
            true
        } else {
            false
        }
    }

    /// Drops sessions untouched for longer than `max_idle`. Sessions in the
    /// middle of an operation are kept.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = (Utc::now() - max_idle).timestamp_millis();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|id, entry| {
            let keep = entry.last_active_ms() > cutoff || entry.session.try_lock().is_err();
            if !keep {
                debug!(session_id = %id, "Evicting idle session");
            }
            keep
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
