//! Session lifecycle and the single lock around it
//!
//! `SessionManager` owns the only mutable copy of the session. Every public
//! operation holds the async mutex for its whole duration, remote I/O
//! included, so a read-modify-write and the upload it triggers can never
//! interleave with another handler's.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

use super::error::SessionError;
use super::model::Session;
use super::reconcile::{reconcile, RemoteSnapshot, SyncAction};
use super::store::LocalSessionStore;
use crate::core::metrics;
use crate::remote::{RemoteError, RemoteObject, RemoteStore, WriteMode};

/// Where the session is in its lifecycle
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Never created on this machine and not restored from the remote
    Absent,
    Active(Session),
    /// Needs a fresh authentication
    Invalidated {
        reason: String,
        at: DateTime<Utc>,
        /// Whether a valid remote copy may bring the session back.
        /// False after logout: the remote copy is deleted instead.
        restorable: bool,
    },
}

impl SessionState {
    pub fn active(&self) -> Option<&Session> {
        match self {
            SessionState::Active(session) => Some(session),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Absent => "absent",
            SessionState::Active(_) => "active",
            SessionState::Invalidated { .. } => "invalidated",
        }
    }
}

/// Public summary of the session. Never contains the credential itself.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: &'static str,
    pub checksum: Option<String>,
    pub size: Option<usize>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub remote_rev: Option<String>,
    pub dirty: bool,
    pub invalidated_reason: Option<String>,
    pub remote: Option<String>,
    pub last_sync_error: Option<String>,
}

/// Result of one sync run
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub rev: Option<String>,
    pub at: DateTime<Utc>,
}

impl SyncOutcome {
    fn new(action: SyncAction, rev: Option<String>) -> Self {
        Self {
            action,
            rev,
            at: Utc::now(),
        }
    }
}

struct Inner {
    state: SessionState,
    last_sync_error: Option<String>,
    label_tx: watch::Sender<&'static str>,
}

/// Owner of the session resource.
pub struct SessionManager {
    inner: Mutex<Inner>,
    label_rx: watch::Receiver<&'static str>,
    store: LocalSessionStore,
    remote: Option<Arc<dyn RemoteStore>>,
    remote_path: String,
}

/// Exclusive access to the session, held until dropped.
///
/// Used by callers that must read the credential, do slow work with it
/// (connecting a client), and write the result back without anyone else
/// touching the session in between.
pub struct SessionLease<'a> {
    manager: &'a SessionManager,
    inner: MutexGuard<'a, Inner>,
}

impl SessionLease<'_> {
    pub fn state(&self) -> &SessionState {
        &self.inner.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.inner.state.active()
    }

    /// Stores a credential: creates the session if none is active,
    /// refreshes it otherwise. Returns true when the stored blob changed.
    pub async fn store(&mut self, blob: Vec<u8>) -> Result<bool, SessionError> {
        if self.inner.state.active().is_some() {
            self.manager.refresh_locked(&mut self.inner, blob).await
        } else {
            self.manager.create_locked(&mut self.inner, blob).await.map(|_| true)
        }
    }

    /// Marks the held credential unusable (e.g. the client library rejected it).
    pub async fn invalidate(&mut self, reason: &str) -> Result<(), SessionError> {
        self.manager.quarantine_and_invalidate(&mut self.inner, reason).await
    }
}

impl SessionManager {
    pub fn new(store: LocalSessionStore, remote: Option<Arc<dyn RemoteStore>>, remote_path: impl Into<String>) -> Self {
        let state = SessionState::Absent;
        let (label_tx, label_rx) = watch::channel(state.label());
        Self {
            inner: Mutex::new(Inner {
                state,
                last_sync_error: None,
                label_tx,
            }),
            label_rx,
            store,
            remote,
            remote_path: remote_path.into(),
        }
    }

    pub fn remote_name(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.name())
    }

    /// Loads the local session and reconciles it with the remote.
    ///
    /// A corrupt local file is quarantined and the state becomes
    /// `Invalidated`. Remote failures are logged and recorded in the status
    /// but do not fail startup; the next sync retries.
    pub async fn init(&self) -> Result<SessionStatus, SessionError> {
        let mut inner = self.inner.lock().await;
        self.load_locked(&mut inner).await?;

        if self.remote.is_some() {
            if let Err(e) = self.sync_locked(&mut inner).await {
                log::warn!("Initial session sync failed: {}", e);
            }
        }

        Ok(self.status_of(&inner))
    }

    /// Loads the local session without contacting the remote.
    ///
    /// Used by one-shot commands (`push`, `pull`) that pick the direction themselves.
    pub async fn load_local(&self) -> Result<SessionStatus, SessionError> {
        let mut inner = self.inner.lock().await;
        self.load_locked(&mut inner).await?;
        Ok(self.status_of(&inner))
    }

    async fn load_locked(&self, inner: &mut Inner) -> Result<(), SessionError> {
        match self.store.load().await {
            Ok(Some(session)) => {
                log::info!(
                    "Loaded local session {} (updated {})",
                    session.short_checksum(),
                    session.updated_at
                );
                set_state(inner, SessionState::Active(session));
            }
            Ok(None) => {
                log::info!("No local session at {}", self.store.path().display());
                set_state(inner, SessionState::Absent);
            }
            Err(e) if e.is_corruption() => {
                log::error!("Local session is corrupt: {}", e);
                metrics::SESSION_EVENTS_TOTAL.with_label_values(&["corrupt"]).inc();
                self.store.quarantine().await?;
                invalidate_locked(inner, &e.to_string(), true);
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Exclusive access for multi-step work; see [`SessionLease`].
    pub async fn lease(&self) -> SessionLease<'_> {
        SessionLease {
            manager: self,
            inner: self.inner.lock().await,
        }
    }

    /// Stores the session produced by a first authentication.
    pub async fn create(&self, blob: Vec<u8>) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.create_locked(&mut inner, blob).await
    }

    /// Replaces the credential of the active session.
    ///
    /// Returns `Ok(false)` when the blob is unchanged.
    pub async fn refresh(&self, blob: Vec<u8>) -> Result<bool, SessionError> {
        let mut inner = self.inner.lock().await;
        self.refresh_locked(&mut inner, blob).await
    }

    /// Snapshot of the active session.
    pub async fn current(&self) -> Option<Session> {
        self.inner.lock().await.state.active().cloned()
    }

    /// Lifecycle label ("absent", "active", "invalidated") without taking the lock.
    ///
    /// Reflects the last committed state, so it stays answerable while a
    /// sync or a lease holds the session.
    pub fn state_label(&self) -> &'static str {
        *self.label_rx.borrow()
    }

    pub async fn status(&self) -> SessionStatus {
        let inner = self.inner.lock().await;
        self.status_of(&inner)
    }

    /// Runs `f` with exclusive access to the active session.
    pub async fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> Result<R, SessionError> {
        let inner = self.inner.lock().await;
        match &inner.state {
            SessionState::Active(session) => Ok(f(session)),
            SessionState::Absent => Err(SessionError::NoSession),
            SessionState::Invalidated { reason, .. } => Err(SessionError::Invalidated(reason.clone())),
        }
    }

    /// Reconciles with the remote and performs the chosen push or pull.
    pub async fn sync(&self) -> Result<SyncOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        self.sync_locked(&mut inner).await
    }

    /// Syncs only when there are local changes the remote has not seen.
    pub async fn sync_if_dirty(&self) -> Result<Option<SyncOutcome>, SessionError> {
        let mut inner = self.inner.lock().await;
        let dirty = inner.state.active().map(Session::is_dirty).unwrap_or(false);
        if !dirty || self.remote.is_none() {
            return Ok(None);
        }
        self.sync_locked(&mut inner).await.map(Some)
    }

    /// Uploads the local session regardless of what the remote holds.
    pub async fn push(&self) -> Result<SyncOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        let result = self.push_locked(&mut inner, WriteMode::Overwrite).await;
        record_sync_result(&mut inner, &result);
        result
    }

    /// Replaces the local session with the remote copy.
    ///
    /// Returns `SyncAction::Nothing` when the remote holds no session.
    pub async fn pull(&self) -> Result<SyncOutcome, SessionError> {
        let mut inner = self.inner.lock().await;
        let result = self.pull_forced(&mut inner).await;
        record_sync_result(&mut inner, &result);
        result
    }

    /// Marks the credential unusable and moves the local file aside.
    ///
    /// The next sync deletes the remote copy rather than restoring it.
    pub async fn invalidate(&self, reason: &str) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.quarantine_and_invalidate(&mut inner, reason).await
    }

    /// Invalidates the session, deletes the local file and the remote copy.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        invalidate_locked(&mut inner, "logged out", false);
        self.store.remove().await?;
        if let Some(remote) = &self.remote {
            remote.delete(&self.remote_path).await?;
            log::info!("Deleted remote session copy {}", self.remote_path);
        }
        Ok(())
    }

    async fn create_locked(&self, inner: &mut Inner, blob: Vec<u8>) -> Result<(), SessionError> {
        let mut session = Session::new(blob)?;
        if let SessionState::Active(previous) = &inner.state {
            if previous.checksum() == session.checksum() {
                return Ok(());
            }
            // Keep the remote revision so the next push is a conditional update.
            session.remote_rev = previous.remote_rev.clone();
            session.last_synced_at = previous.last_synced_at;
        }

        self.store.save(&session).await?;
        log::info!("Created session {}", session.short_checksum());
        metrics::SESSION_EVENTS_TOTAL.with_label_values(&["created"]).inc();
        set_state(inner, SessionState::Active(session));
        Ok(())
    }

    async fn refresh_locked(&self, inner: &mut Inner, blob: Vec<u8>) -> Result<bool, SessionError> {
        let session = match &mut inner.state {
            SessionState::Active(session) => session,
            SessionState::Absent => return Err(SessionError::NoSession),
            SessionState::Invalidated { reason, .. } => return Err(SessionError::Invalidated(reason.clone())),
        };

        let mut updated = session.clone();
        if !updated.refresh(blob)? {
            return Ok(false);
        }
        self.store.save(&updated).await?;
        log::info!("Refreshed session {} -> {}", session.short_checksum(), updated.short_checksum());
        metrics::SESSION_EVENTS_TOTAL.with_label_values(&["refreshed"]).inc();
        *session = updated;
        Ok(true)
    }

    async fn quarantine_and_invalidate(&self, inner: &mut Inner, reason: &str) -> Result<(), SessionError> {
        if inner.state.active().is_some() {
            self.store.quarantine().await?;
        }
        invalidate_locked(inner, reason, false);
        Ok(())
    }

    async fn sync_locked(&self, inner: &mut Inner) -> Result<SyncOutcome, SessionError> {
        let result = self.reconcile_and_apply(inner).await;
        record_sync_result(inner, &result);
        result
    }

    async fn reconcile_and_apply(&self, inner: &mut Inner) -> Result<SyncOutcome, SessionError> {
        let Some(remote) = self.remote.as_ref() else {
            return Ok(SyncOutcome::new(SyncAction::Nothing, None));
        };

        if let SessionState::Invalidated { restorable: false, .. } = inner.state {
            // Logged out: make sure no copy survives that could resurrect it.
            remote.delete(&self.remote_path).await?;
            return Ok(SyncOutcome::new(SyncAction::Nothing, None));
        }

        // A conditional upload that loses a race gets one fresh look at the remote.
        let mut conflict_retried = false;
        loop {
            let object = remote.fetch(&self.remote_path).await?;
            let snapshot = object.as_ref().and_then(|o| self.decode_remote(o));
            let action = reconcile(inner.state.active(), snapshot.as_ref());
            log::debug!("Session reconcile: {}", action);

            let result = match action {
                SyncAction::Nothing => Ok(SyncOutcome::new(action, None)),
                SyncAction::InSync => self.mark_in_sync(inner, snapshot.as_ref()).await,
                SyncAction::Push => {
                    let mode = match &object {
                        Some(o) => WriteMode::Update(o.metadata.rev.clone()),
                        None => WriteMode::Overwrite,
                    };
                    self.push_locked(inner, mode).await
                }
                SyncAction::Pull => match snapshot {
                    Some(snapshot) => self.adopt_remote(inner, snapshot).await,
                    None => Ok(SyncOutcome::new(SyncAction::Nothing, None)),
                },
            };

            match result {
                Err(SessionError::Remote(RemoteError::Conflict(path))) if !conflict_retried => {
                    log::warn!("Remote session {} changed during sync, reconciling again", path);
                    conflict_retried = true;
                }
                other => return other,
            }
        }
    }

    fn decode_remote(&self, object: &RemoteObject) -> Option<RemoteSnapshot> {
        match Session::decode(&object.bytes) {
            Ok(session) => Some(RemoteSnapshot {
                session,
                rev: object.metadata.rev.clone(),
            }),
            Err(e) => {
                log::error!("Remote session copy {} is unusable: {}", self.remote_path, e);
                metrics::SESSION_EVENTS_TOTAL.with_label_values(&["corrupt"]).inc();
                None
            }
        }
    }

    async fn mark_in_sync(&self, inner: &mut Inner, snapshot: Option<&RemoteSnapshot>) -> Result<SyncOutcome, SessionError> {
        let (Some(snapshot), SessionState::Active(session)) = (snapshot, &mut inner.state) else {
            return Ok(SyncOutcome::new(SyncAction::Nothing, None));
        };
        if session.remote_rev.as_deref() != Some(snapshot.rev.as_str()) || session.is_dirty() {
            let mut updated = session.clone();
            updated.mark_synced(Some(snapshot.rev.clone()), Utc::now());
            self.store.save(&updated).await?;
            *session = updated;
        }
        Ok(SyncOutcome::new(SyncAction::InSync, Some(snapshot.rev.clone())))
    }

    async fn push_locked(&self, inner: &mut Inner, mode: WriteMode) -> Result<SyncOutcome, SessionError> {
        let Some(remote) = self.remote.as_ref() else {
            return Ok(SyncOutcome::new(SyncAction::Nothing, None));
        };
        let session = match &mut inner.state {
            SessionState::Active(session) => session,
            SessionState::Absent => return Err(SessionError::NoSession),
            SessionState::Invalidated { reason, .. } => return Err(SessionError::Invalidated(reason.clone())),
        };

        let mut uploaded = session.clone();
        let synced_at = Utc::now();
        uploaded.mark_synced(session.remote_rev.clone(), synced_at);
        let bytes = Bytes::from(uploaded.encode()?);

        let metadata = remote.put(&self.remote_path, bytes, mode).await?;
        uploaded.mark_synced(Some(metadata.rev.clone()), synced_at);
        self.store.save(&uploaded).await?;
        log::info!(
            "Pushed session {} to {} (rev {})",
            uploaded.short_checksum(),
            remote.name(),
            metadata.rev
        );
        *session = uploaded;
        Ok(SyncOutcome::new(SyncAction::Push, Some(metadata.rev)))
    }

    async fn adopt_remote(&self, inner: &mut Inner, snapshot: RemoteSnapshot) -> Result<SyncOutcome, SessionError> {
        let RemoteSnapshot { mut session, rev } = snapshot;
        session.mark_synced(Some(rev.clone()), Utc::now());
        self.store.save(&session).await?;
        log::info!("Pulled session {} (rev {})", session.short_checksum(), rev);
        set_state(inner, SessionState::Active(session));
        Ok(SyncOutcome::new(SyncAction::Pull, Some(rev)))
    }

    async fn pull_forced(&self, inner: &mut Inner) -> Result<SyncOutcome, SessionError> {
        let Some(remote) = self.remote.as_ref() else {
            return Ok(SyncOutcome::new(SyncAction::Nothing, None));
        };
        let Some(object) = remote.fetch(&self.remote_path).await? else {
            log::warn!("Remote {} holds no session at {}", remote.name(), self.remote_path);
            return Ok(SyncOutcome::new(SyncAction::Nothing, None));
        };
        let session = Session::decode(&object.bytes)?;
        self.adopt_remote(
            inner,
            RemoteSnapshot {
                session,
                rev: object.metadata.rev,
            },
        )
        .await
    }

    fn status_of(&self, inner: &Inner) -> SessionStatus {
        let session = inner.state.active();
        let invalidated_reason = match &inner.state {
            SessionState::Invalidated { reason, .. } => Some(reason.clone()),
            _ => None,
        };
        SessionStatus {
            state: inner.state.label(),
            checksum: session.map(|s| s.short_checksum().to_string()),
            size: session.map(|s| s.blob().len()),
            updated_at: session.map(|s| s.updated_at),
            last_synced_at: session.and_then(|s| s.last_synced_at),
            remote_rev: session.and_then(|s| s.remote_rev.clone()),
            dirty: session.map(Session::is_dirty).unwrap_or(false),
            invalidated_reason,
            remote: self.remote_name().map(str::to_string),
            last_sync_error: inner.last_sync_error.clone(),
        }
    }
}

fn set_state(inner: &mut Inner, state: SessionState) {
    metrics::SESSION_ACTIVE.set(if state.active().is_some() { 1.0 } else { 0.0 });
    inner.label_tx.send_replace(state.label());
    inner.state = state;
}

fn invalidate_locked(inner: &mut Inner, reason: &str, restorable: bool) {
    log::warn!("Session invalidated: {}", reason);
    metrics::SESSION_EVENTS_TOTAL.with_label_values(&["invalidated"]).inc();
    set_state(
        inner,
        SessionState::Invalidated {
            reason: reason.to_string(),
            at: Utc::now(),
            restorable,
        },
    );
}

fn record_sync_result(inner: &mut Inner, result: &Result<SyncOutcome, SessionError>) {
    match result {
        Ok(outcome) => {
            let label: &str = outcome.action.as_ref();
            metrics::SESSION_SYNC_TOTAL.with_label_values(&[label]).inc();
            inner.last_sync_error = None;
        }
        Err(e) => {
            metrics::SESSION_SYNC_TOTAL.with_label_values(&["failed"]).inc();
            inner.last_sync_error = Some(e.to_string());
        }
    }
}
