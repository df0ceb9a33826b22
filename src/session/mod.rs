//! Session lifecycle management.
//!
//! A [`SessionManager`] owns one [`Transport`] and at most one live
//! [`Session`]. `start()` pairs a new session; from then on a background
//! driver task follows transport updates through authentication, drops,
//! reconnects and terminal failure. The session slot is only ever mutated
//! here; the harvester goes through the accessor methods.

mod reconnect;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::dispatch::{EventDispatcher, EventStream};
use crate::error::{SyncError, SyncResult};
use crate::transport::{ConnectionUpdate, Transport, TransportError};
use crate::types::{
    ContactInfo, Conversation, DisconnectReason, PairingPayload, SessionId, SessionState,
    SyncEvent, JID,
};

pub use reconnect::Backoff;

/// Snapshot of the current session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    /// Present only while `AwaitingPairing`.
    pub pairing: Option<PairingPayload>,
    /// Account JID once authenticated.
    pub account: Option<JID>,
    pub created_at: DateTime<Utc>,
    /// Successful reconnects since the session was created.
    pub reconnects: u32,
}

struct SessionSlot {
    session: Session,
    /// Cancelled whenever the session leaves `Ready`.
    epoch: CancellationToken,
    /// Cancelled to stop the driver task.
    shutdown: CancellationToken,
}

/// Proof that the session was `Ready` when a harvest began.
#[derive(Debug, Clone)]
pub(crate) struct ReadyLease {
    pub session_id: SessionId,
    /// Fires when the connection epoch the lease belongs to ends.
    pub epoch: CancellationToken,
}

struct Inner {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    dispatcher: EventDispatcher,
    slot: Mutex<Option<SessionSlot>>,
    handshake: tokio::sync::Mutex<()>,
}

/// Owns the lifecycle of one connection to a messaging account.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager bound to `transport`.
    pub fn new(config: SyncConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                dispatcher: EventDispatcher::new(),
                slot: Mutex::new(None),
                handshake: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribe to the event sequence.
    pub fn subscribe(&self) -> EventStream {
        self.inner.dispatcher.subscribe()
    }

    /// Events emitted but not yet consumed by subscribers.
    pub fn backlog(&self) -> usize {
        self.inner.dispatcher.backlog()
    }

    pub(crate) fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    pub fn state(&self) -> SessionState {
        self.inner
            .slot()
            .as_ref()
            .map(|slot| slot.session.state)
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.slot().as_ref().map(|slot| slot.session.clone())
    }

    /// Start a new session and begin pairing.
    ///
    /// Returns once the first pairing payload has been emitted as
    /// [`SyncEvent::PairingRequired`]. Fails with [`SyncError::AlreadyActive`]
    /// while another start is in flight or a session is live.
    pub async fn start(&self) -> SyncResult<SessionId> {
        let _handshake = self
            .inner
            .handshake
            .try_lock()
            .map_err(|_| SyncError::AlreadyActive)?;

        let id = SessionId::new();
        let shutdown = CancellationToken::new();
        {
            let mut slot = self.inner.slot();
            if let Some(current) = slot.as_ref() {
                if !current.session.state.accepts_start() {
                    debug!(
                        "rejecting start: session {} is {}",
                        current.session.id, current.session.state
                    );
                    return Err(SyncError::AlreadyActive);
                }
            }
            *slot = Some(SessionSlot {
                session: Session {
                    id,
                    state: SessionState::Uninitialized,
                    pairing: None,
                    account: None,
                    created_at: Utc::now(),
                    reconnects: 0,
                },
                epoch: CancellationToken::new(),
                shutdown: shutdown.clone(),
            });
        }
        info!(
            "session {}: starting as {:?}",
            id, self.inner.config.device_name
        );

        let updates = self.inner.transport.subscribe();
        let pairing = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                // stop() only closes live sessions.
                self.inner.transport.close().await;
                return Err(SyncError::TransportDisconnected("stopped during pairing".into()));
            }
            result = self.inner.transport.begin_pairing() => result,
        };

        let payload = match pairing {
            Ok(payload) => payload,
            Err(err) => {
                error!("session {}: pairing could not begin: {}", id, err);
                self.inner
                    .fail(id, DisconnectReason::NetworkError(err.to_string()))
                    .await;
                return Err(err.into());
            }
        };

        let accepted = self.inner.with_session(id, |session, dispatcher| {
            session.state = SessionState::AwaitingPairing;
            session.pairing = Some(payload.clone());
            dispatcher.emit(SyncEvent::PairingRequired(payload));
        });
        if !accepted {
            return Err(SyncError::TransportDisconnected("stopped during pairing".into()));
        }
        info!("session {}: awaiting pairing", id);

        tokio::spawn(drive(Arc::clone(&self.inner), id, updates, shutdown));
        Ok(id)
    }

    /// Tear down the session, if any. Always leaves the manager
    /// `Uninitialized`.
    pub async fn stop(&self) {
        let previous = {
            let mut slot = self.inner.slot();
            let previous = slot.take();
            if let Some(prev) = &previous {
                prev.shutdown.cancel();
                prev.epoch.cancel();
                if prev.session.state.is_live() {
                    self.inner
                        .dispatcher
                        .emit(SyncEvent::Disconnected(DisconnectReason::Stopped));
                }
            }
            previous
        };

        match previous {
            Some(prev) if prev.session.state.is_live() => {
                info!(
                    "session {}: stopped from {}",
                    prev.session.id, prev.session.state
                );
                self.inner.transport.close().await;
            }
            Some(prev) => debug!(
                "session {}: cleared after {}",
                prev.session.id, prev.session.state
            ),
            None => debug!("stop: no session"),
        }
    }

    /// Fetch the conversation list of the ready session.
    pub async fn conversations(&self) -> SyncResult<Vec<Conversation>> {
        let lease = self.ready_lease()?;
        self.list_conversations(&lease).await
    }

    pub(crate) fn ready_lease(&self) -> SyncResult<ReadyLease> {
        match self.inner.slot().as_ref() {
            Some(slot) if slot.session.state == SessionState::Ready => Ok(ReadyLease {
                session_id: slot.session.id,
                epoch: slot.epoch.clone(),
            }),
            _ => Err(SyncError::SessionNotReady),
        }
    }

    pub(crate) async fn list_conversations(
        &self,
        lease: &ReadyLease,
    ) -> SyncResult<Vec<Conversation>> {
        self.inner.ensure_ready(lease.session_id)?;
        let chats = self
            .inner
            .transport
            .list_conversations()
            .await
            .map_err(SyncError::from)?;
        Ok(chats
            .into_iter()
            .map(|chat| Conversation::from_chat(chat, lease.session_id))
            .collect())
    }

    /// Resolve the contact behind a conversation of the ready session.
    ///
    /// A dead connection surfaces as [`SyncError::TransportDisconnected`];
    /// any other transport failure as [`SyncError::ConversationLookupFailed`].
    pub async fn resolve_contact(&self, conversation: &Conversation) -> SyncResult<ContactInfo> {
        self.inner.ensure_ready(conversation.session_id)?;
        self.inner
            .transport
            .resolve_contact(conversation)
            .await
            .map_err(|err| match err {
                err if err.is_connection_loss() => SyncError::from(err),
                err => SyncError::ConversationLookupFailed {
                    conversation: conversation.jid.clone(),
                    cause: err.to_string(),
                },
            })
    }
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<SessionSlot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the session if `id` is still current. Emissions made from
    /// `f` are ordered with every other transition.
    fn with_session<F>(&self, id: SessionId, f: F) -> bool
    where
        F: FnOnce(&mut Session, &EventDispatcher),
    {
        let mut slot = self.slot();
        match slot.as_mut() {
            Some(current) if current.session.id == id => {
                f(&mut current.session, &self.dispatcher);
                true
            }
            _ => false,
        }
    }

    fn ensure_ready(&self, id: SessionId) -> SyncResult<()> {
        match self.slot().as_ref() {
            Some(slot) if slot.session.id == id && slot.session.state == SessionState::Ready => {
                Ok(())
            }
            _ => Err(SyncError::SessionNotReady),
        }
    }

    fn transition(&self, id: SessionId, to: SessionState) -> bool {
        self.with_session(id, |session, _| {
            if session.state != to {
                debug!("session {}: {} -> {}", id, session.state, to);
                session.state = to;
            }
        })
    }

    /// Enter `Ready` with a fresh connection epoch and emit `Authenticated`.
    fn enter_ready(&self, id: SessionId, account: Option<JID>) -> bool {
        let mut slot = self.slot();
        let Some(current) = slot.as_mut().filter(|s| s.session.id == id) else {
            return false;
        };
        if current.session.state == SessionState::Disconnected {
            current.session.reconnects += 1;
        }
        current.session.state = SessionState::Ready;
        current.session.pairing = None;
        if account.is_some() {
            current.session.account = account;
        }
        current.epoch = CancellationToken::new();
        self.dispatcher.emit(SyncEvent::Authenticated);
        true
    }

    /// Leave `Ready` after the connection dropped.
    fn mark_disconnected(&self, id: SessionId, reason: DisconnectReason) -> bool {
        let mut slot = self.slot();
        let Some(current) = slot.as_mut().filter(|s| s.session.id == id) else {
            return false;
        };
        current.session.state = SessionState::Disconnected;
        current.epoch.cancel();
        self.dispatcher.emit(SyncEvent::Disconnected(reason));
        true
    }

    /// Move to `Failed`, emit the reason and release the connection.
    async fn fail(&self, id: SessionId, reason: DisconnectReason) {
        let failed = {
            let mut slot = self.slot();
            match slot.as_mut().filter(|s| s.session.id == id) {
                Some(current) => {
                    current.session.state = SessionState::Failed;
                    current.session.pairing = None;
                    current.epoch.cancel();
                    current.shutdown.cancel();
                    self.dispatcher.emit(SyncEvent::Disconnected(reason.clone()));
                    true
                }
                None => false,
            }
        };

        if failed {
            error!("session {}: failed: {}", id, reason);
            self.transport.close().await;
        }
    }

    /// Follow the pairing until the account confirms or the attempt ends.
    async fn pair(
        &self,
        id: SessionId,
        updates: &mut mpsc::UnboundedReceiver<ConnectionUpdate>,
    ) -> Result<JID, DisconnectReason> {
        let auth = tokio::time::timeout(
            self.config.pairing_timeout,
            self.transport.await_authenticated(),
        );
        tokio::pin!(auth);

        loop {
            tokio::select! {
                biased;
                update = updates.recv() => match update {
                    Some(ConnectionUpdate::PairingRefreshed(payload)) => {
                        self.with_session(id, |session, dispatcher| {
                            if session.state == SessionState::AwaitingPairing {
                                session.pairing = Some(payload.clone());
                                dispatcher.emit(SyncEvent::PairingRequired(payload));
                            }
                        });
                    }
                    Some(ConnectionUpdate::PairingScanned) => {
                        if self.transition(id, SessionState::Authenticating) {
                            info!("session {}: pairing scanned, authenticating", id);
                        }
                    }
                    Some(ConnectionUpdate::Disconnected(reason)) => return Err(reason),
                    None => {
                        return Err(DisconnectReason::NetworkError(
                            "connection closed during pairing".into(),
                        ))
                    }
                },
                result = &mut auth => {
                    return match result {
                        Err(_) => Err(DisconnectReason::PairingTimeout),
                        Ok(Ok(account)) => Ok(account),
                        Ok(Err(TransportError::AuthRejected(msg))) => {
                            Err(DisconnectReason::AuthFailure(msg))
                        }
                        Ok(Err(err)) => Err(DisconnectReason::NetworkError(err.to_string())),
                    };
                }
            }
        }
    }

    /// Run the reconnect policy. Returns true once the session is `Ready`
    /// again.
    async fn reconnect(&self, id: SessionId, shutdown: &CancellationToken) -> bool {
        let policy = Backoff::from_config(&self.config);

        for attempt in 1..=policy.max_retries {
            let Some(delay) = policy.delay_for(attempt) else {
                break;
            };
            info!(
                "session {}: reconnect attempt {}/{} in {:?}",
                id, attempt, policy.max_retries, delay
            );

            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = shutdown.cancelled() => return false,
                result = self.transport.reconnect() => result,
            };

            match result {
                Ok(()) => {
                    info!("session {}: reconnected on attempt {}", id, attempt);
                    return self.enter_ready(id, None);
                }
                Err(err) => warn!("session {}: reconnect attempt {} failed: {}", id, attempt, err),
            }
        }

        self.fail(
            id,
            DisconnectReason::RetriesExhausted {
                attempts: policy.max_retries,
            },
        )
        .await;
        false
    }
}

/// Background task following one session from pairing to termination.
async fn drive(
    inner: Arc<Inner>,
    id: SessionId,
    mut updates: mpsc::UnboundedReceiver<ConnectionUpdate>,
    shutdown: CancellationToken,
) {
    let paired = tokio::select! {
        _ = shutdown.cancelled() => return,
        paired = inner.pair(id, &mut updates) => paired,
    };

    match paired {
        Ok(account) => {
            if !inner.transition(id, SessionState::Authenticating) {
                return;
            }
            if inner.enter_ready(id, Some(account.clone())) {
                info!("session {}: ready as {}", id, account);
            }
        }
        Err(reason) => {
            inner.fail(id, reason).await;
            return;
        }
    }

    loop {
        let update = tokio::select! {
            _ = shutdown.cancelled() => return,
            update = updates.recv() => update,
        };

        let reason = match update {
            Some(ConnectionUpdate::Disconnected(reason)) => reason,
            Some(other) => {
                debug!("session {}: ignoring {:?} while connected", id, other);
                continue;
            }
            None => {
                // Nothing more can arrive on this stream, so reconnecting
                // would only drop again.
                inner
                    .fail(id, DisconnectReason::NetworkError("update stream closed".into()))
                    .await;
                return;
            }
        };

        if !reason.is_recoverable() {
            inner.fail(id, reason).await;
            return;
        }

        warn!("session {}: connection dropped: {}", id, reason);
        if !inner.mark_disconnected(id, reason) {
            return;
        }
        if !inner.reconnect(id, &shutdown).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::transport::{AuthScript, LoopbackHandle, LoopbackTransport};

    fn manager_with(
        transport: LoopbackTransport,
        config: SyncConfig,
    ) -> (SessionManager, LoopbackHandle) {
        let handle = transport.handle();
        (SessionManager::new(config, Arc::new(transport)), handle)
    }

    async fn next_matching<F>(stream: &mut EventStream, mut pred: F) -> SyncEvent
    where
        F: FnMut(&SyncEvent) -> bool,
    {
        loop {
            let event = stream.next().await.expect("dispatcher alive");
            if pred(&event) {
                return event;
            }
        }
    }

    async fn ready_manager(config: SyncConfig) -> (SessionManager, LoopbackHandle, EventStream) {
        let (manager, handle) = manager_with(LoopbackTransport::new(), config);
        let mut events = manager.subscribe();
        manager.start().await.unwrap();
        next_matching(&mut events, |e| *e == SyncEvent::Authenticated).await;
        (manager, handle, events)
    }

    #[tokio::test]
    async fn test_start_pairs_and_authenticates() {
        let transport = LoopbackTransport::new().with_pairing_codes(["code-1"]);
        let (manager, _handle) = manager_with(transport, SyncConfig::default());
        let mut events = manager.subscribe();

        let id = manager.start().await.unwrap();
        assert!(matches!(
            manager.state(),
            SessionState::AwaitingPairing | SessionState::Authenticating | SessionState::Ready
        ));

        match events.next().await {
            Some(SyncEvent::PairingRequired(payload)) => assert_eq!(payload.code, "code-1"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(events.next().await, Some(SyncEvent::Authenticated));

        let session = manager.session().unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.state, SessionState::Ready);
        assert_eq!(session.account, Some(JID::user("5511900000000")));
        assert!(session.pairing.is_none());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let transport = LoopbackTransport::new().with_auth(AuthScript::Manual);
        let (manager, _handle) = manager_with(transport, SyncConfig::default());

        manager.start().await.unwrap();
        assert!(matches!(manager.start().await, Err(SyncError::AlreadyActive)));
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_ready() {
        let (manager, _handle, _events) = ready_manager(SyncConfig::default()).await;
        assert!(matches!(manager.start().await, Err(SyncError::AlreadyActive)));
        assert_eq!(manager.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_concurrent_starts_yield_one_session() {
        let transport = LoopbackTransport::new().with_auth(AuthScript::Manual);
        let (manager, handle) = manager_with(transport, SyncConfig::default());

        let (a, b) = tokio::join!(manager.start(), manager.start());
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(handle.pairing_count(), 1);
    }

    #[tokio::test]
    async fn test_scan_moves_to_authenticating() {
        let transport = LoopbackTransport::new().with_auth(AuthScript::Manual);
        let (manager, handle) = manager_with(transport, SyncConfig::default());
        let mut events = manager.subscribe();

        manager.start().await.unwrap();
        handle.scan();
        tokio::task::yield_now().await;
        assert_eq!(manager.state(), SessionState::Authenticating);

        handle.approve(JID::user("5511911112222"));
        next_matching(&mut events, |e| *e == SyncEvent::Authenticated).await;
        assert_eq!(manager.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_pairing_rotation_reemits_code() {
        let transport = LoopbackTransport::new()
            .with_auth(AuthScript::Manual)
            .with_pairing_codes(["first", "second"]);
        let (manager, handle) = manager_with(transport, SyncConfig::default());
        let mut events = manager.subscribe();

        manager.start().await.unwrap();
        handle.rotate_pairing();

        let codes: Vec<String> = [events.next().await, events.next().await]
            .into_iter()
            .map(|event| match event {
                Some(SyncEvent::PairingRequired(payload)) => payload.code,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(codes, vec!["first", "second"]);
        assert_eq!(manager.session().unwrap().pairing.unwrap().code, "second");
    }

    #[tokio::test]
    async fn test_auth_rejection_fails_without_retry() {
        let transport = LoopbackTransport::new().with_auth(AuthScript::Reject("bad scan".into()));
        let (manager, handle) = manager_with(transport, SyncConfig::default());
        let mut events = manager.subscribe();

        manager.start().await.unwrap();
        let event = next_matching(&mut events, |e| matches!(e, SyncEvent::Disconnected(_))).await;
        assert_eq!(
            event,
            SyncEvent::Disconnected(DisconnectReason::AuthFailure("bad scan".into()))
        );
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(handle.reconnect_count(), 0);
        assert!(!handle.is_connected());

        // Failed accepts a fresh start.
        assert!(manager.start().await.is_ok());
        assert_eq!(handle.pairing_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_timeout() {
        let transport = LoopbackTransport::new().with_auth(AuthScript::Manual);
        let config = SyncConfig::default().with_pairing_timeout(Duration::from_secs(5));
        let (manager, _handle) = manager_with(transport, config);
        let mut events = manager.subscribe();

        manager.start().await.unwrap();
        let event = next_matching(&mut events, |e| matches!(e, SyncEvent::Disconnected(_))).await;
        assert_eq!(event, SyncEvent::Disconnected(DisconnectReason::PairingTimeout));
        assert_eq!(manager.state(), SessionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_then_reconnect() {
        let transport = LoopbackTransport::new()
            .with_reconnect_outcomes([Err(TransportError::Timeout)]);
        let config = SyncConfig::default().with_reconnect(3, Duration::from_millis(100));
        let (manager, handle) = manager_with(transport, config);
        let mut events = manager.subscribe();
        manager.start().await.unwrap();
        next_matching(&mut events, |e| *e == SyncEvent::Authenticated).await;

        handle.drop_connection(DisconnectReason::NetworkError("reset".into()));
        assert_eq!(
            next_matching(&mut events, |e| matches!(e, SyncEvent::Disconnected(_))).await,
            SyncEvent::Disconnected(DisconnectReason::NetworkError("reset".into()))
        );
        assert_eq!(manager.state(), SessionState::Disconnected);

        next_matching(&mut events, |e| *e == SyncEvent::Authenticated).await;
        assert_eq!(manager.state(), SessionState::Ready);
        assert_eq!(handle.reconnect_count(), 2);
        assert_eq!(manager.session().unwrap().reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_fails() {
        let transport = LoopbackTransport::new().with_reconnect_outcomes(
            (0..3).map(|_| Err(TransportError::Disconnected("refused".into()))),
        );
        let config = SyncConfig::default().with_reconnect(3, Duration::from_millis(100));
        let (manager, handle) = manager_with(transport, config);
        let mut events = manager.subscribe();
        manager.start().await.unwrap();
        next_matching(&mut events, |e| *e == SyncEvent::Authenticated).await;

        handle.drop_connection(DisconnectReason::NetworkError("reset".into()));
        let event = next_matching(&mut events, |e| {
            matches!(e, SyncEvent::Disconnected(DisconnectReason::RetriesExhausted { .. }))
        })
        .await;
        assert_eq!(
            event,
            SyncEvent::Disconnected(DisconnectReason::RetriesExhausted { attempts: 3 })
        );
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(handle.reconnect_count(), 3);
        assert_eq!(handle.close_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_logout_is_terminal() {
        let (manager, handle, mut events) = ready_manager(SyncConfig::default()).await;

        handle.drop_connection(DisconnectReason::LoggedOut);
        assert_eq!(
            next_matching(&mut events, |e| matches!(e, SyncEvent::Disconnected(_))).await,
            SyncEvent::Disconnected(DisconnectReason::LoggedOut)
        );
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(handle.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (manager, handle, mut events) = ready_manager(SyncConfig::default()).await;

        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), SessionState::Uninitialized);
        assert!(manager.session().is_none());
        assert_eq!(handle.close_count(), 1);
        assert_eq!(
            events.drain(),
            vec![SyncEvent::Disconnected(DisconnectReason::Stopped)]
        );

        // A fresh session can follow.
        manager.start().await.unwrap();
        next_matching(&mut events, |e| *e == SyncEvent::Authenticated).await;
    }

    #[tokio::test]
    async fn test_stop_during_pairing() {
        let transport = LoopbackTransport::new().with_auth(AuthScript::Manual);
        let (manager, handle) = manager_with(transport, SyncConfig::default());

        manager.start().await.unwrap();
        manager.stop().await;
        handle.approve(JID::user("1"));
        tokio::task::yield_now().await;

        assert_eq!(manager.state(), SessionState::Uninitialized);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_connecting_closes_transport() {
        let transport = LoopbackTransport::new().with_pairing_delay(Duration::from_secs(10));
        let (manager, handle) = manager_with(transport, SyncConfig::default());

        let starting = tokio::spawn({
            let manager = manager.clone();
            async move { manager.start().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        manager.stop().await;

        let result = starting.await.unwrap();
        assert!(matches!(result, Err(SyncError::TransportDisconnected(_))));
        assert_eq!(handle.close_count(), 1);
        assert!(!handle.is_connected());
        assert_eq!(manager.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_closed_update_stream_is_terminal() {
        let transport = Arc::new(LoopbackTransport::new());
        let handle = transport.handle();
        let config = SyncConfig::default().with_reconnect(3, Duration::from_millis(5));
        let manager = SessionManager::new(config, transport.clone());
        let mut events = manager.subscribe();
        manager.start().await.unwrap();
        next_matching(&mut events, |e| *e == SyncEvent::Authenticated).await;

        // A new subscription drops the sender the driver listens on.
        drop(transport.subscribe());

        let event = next_matching(&mut events, |e| matches!(e, SyncEvent::Disconnected(_))).await;
        assert_eq!(
            event,
            SyncEvent::Disconnected(DisconnectReason::NetworkError(
                "update stream closed".into()
            ))
        );
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(handle.reconnect_count(), 0);
        assert!(events.drain().is_empty());
    }

    #[tokio::test]
    async fn test_conversations_require_ready() {
        let (manager, _handle) = manager_with(LoopbackTransport::new(), SyncConfig::default());
        assert!(matches!(
            manager.conversations().await,
            Err(SyncError::SessionNotReady)
        ));
    }
}
