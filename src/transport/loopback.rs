//! Scripted in-memory transport for development and testing.
//!
//! Behaves like a paired phone on the other end of the connection: it hands
//! out pairing codes, confirms (or rejects) authentication, serves a fixed chat
//! list and can be told to drop the connection at chosen points.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tokio::sync::mpsc;

use crate::transport::{ConnectionUpdate, Transport, TransportError};
use crate::types::{Chat, ContactInfo, Conversation, DisconnectReason, PairingPayload, JID};

/// How the scripted phone answers a pairing request.
#[derive(Debug, Clone)]
pub enum AuthScript {
    /// Scan the code, then confirm as `account` after `after`.
    Approve { account: JID, after: Duration },
    /// Reject the pairing.
    Reject(String),
    /// Wait for [`LoopbackHandle::approve`] or [`LoopbackHandle::reject`].
    Manual,
}

#[derive(Default)]
struct Counters {
    pairings: usize,
    lookups: usize,
    reconnects: usize,
    closes: usize,
}

struct LoopbackState {
    updates: Option<mpsc::UnboundedSender<ConnectionUpdate>>,
    connected: bool,
    auth: AuthScript,
    pairing_codes: VecDeque<String>,
    chats: Vec<Chat>,
    contacts: HashMap<JID, ContactInfo>,
    lookup_failures: HashMap<JID, TransportError>,
    lookup_delay: Duration,
    pairing_delay: Duration,
    list_failure: Option<TransportError>,
    disconnect_after: Option<(usize, DisconnectReason)>,
    reconnect_outcomes: VecDeque<Result<(), TransportError>>,
    counters: Counters,
}

impl LoopbackState {
    fn push_update(&mut self, update: ConnectionUpdate) {
        if let Some(tx) = &self.updates {
            if tx.send(update).is_err() {
                log::debug!("loopback update dropped: no subscriber");
            }
        }
    }
}

type ManualAuth = Result<JID, TransportError>;

struct Shared {
    state: Mutex<LoopbackState>,
    auth_tx: mpsc::UnboundedSender<ManualAuth>,
    auth_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ManualAuth>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`Transport`] driven by a script.
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

/// Control handle for a [`LoopbackTransport`] owned by a session manager.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

/// Time the first pairing code stays valid; rotated codes get less.
const FIRST_CODE_TIMEOUT: Duration = Duration::from_secs(60);
const ROTATED_CODE_TIMEOUT: Duration = Duration::from_secs(20);

impl LoopbackTransport {
    /// A transport that approves pairing immediately and has no chats.
    pub fn new() -> Self {
        let (auth_tx, auth_rx) = mpsc::unbounded_channel();
        let state = LoopbackState {
            updates: None,
            connected: false,
            auth: AuthScript::Approve {
                account: JID::user("5511900000000"),
                after: Duration::ZERO,
            },
            pairing_codes: VecDeque::new(),
            chats: Vec::new(),
            contacts: HashMap::new(),
            lookup_failures: HashMap::new(),
            lookup_delay: Duration::ZERO,
            pairing_delay: Duration::ZERO,
            list_failure: None,
            disconnect_after: None,
            reconnect_outcomes: VecDeque::new(),
            counters: Counters::default(),
        };

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                auth_tx,
                auth_rx: tokio::sync::Mutex::new(auth_rx),
            }),
        }
    }

    /// Control handle that stays usable after the transport is moved into a
    /// session manager.
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn with_auth(self, auth: AuthScript) -> Self {
        self.shared.state().auth = auth;
        self
    }

    /// Hand out these pairing codes before falling back to generated ones.
    pub fn with_pairing_codes<I, S>(self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared
            .state()
            .pairing_codes
            .extend(codes.into_iter().map(Into::into));
        self
    }

    /// Add a chat. Individual chats get a contact record derived from the
    /// chat unless one is registered with [`Self::with_contact`].
    pub fn with_chat(self, chat: Chat) -> Self {
        self.shared.state().chats.push(chat);
        self
    }

    pub fn with_contact(self, chat: JID, info: ContactInfo) -> Self {
        self.shared.state().contacts.insert(chat, info);
        self
    }

    /// Make the contact lookup for `chat` fail.
    pub fn with_lookup_failure(self, chat: JID, err: TransportError) -> Self {
        self.shared.state().lookup_failures.insert(chat, err);
        self
    }

    /// Delay every contact lookup.
    pub fn with_lookup_delay(self, delay: Duration) -> Self {
        self.shared.state().lookup_delay = delay;
        self
    }

    /// Hold the connection open for `delay` before the first code arrives.
    pub fn with_pairing_delay(self, delay: Duration) -> Self {
        self.shared.state().pairing_delay = delay;
        self
    }

    /// Make every conversation listing fail with `err`.
    pub fn with_list_failure(self, err: TransportError) -> Self {
        self.shared.state().list_failure = Some(err);
        self
    }

    /// Drop the connection right after the `lookups`-th contact lookup.
    pub fn with_disconnect_after(self, lookups: usize, reason: DisconnectReason) -> Self {
        self.shared.state().disconnect_after = Some((lookups, reason));
        self
    }

    /// Outcomes for successive reconnect attempts. Attempts beyond the list
    /// succeed.
    pub fn with_reconnect_outcomes<I>(self, outcomes: I) -> Self
    where
        I: IntoIterator<Item = Result<(), TransportError>>,
    {
        self.shared.state().reconnect_outcomes.extend(outcomes);
        self
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Pairing data in the `ref,noiseKey,identityKey,advSecret` layout.
fn generate_pairing_code() -> String {
    let ref_id = format!("2@{:X}", rand::random::<u64>());
    let noise_pub: [u8; 32] = rand::random();
    let identity_pub: [u8; 32] = rand::random();
    let adv_secret: [u8; 32] = rand::random();
    format!(
        "{},{},{},{}",
        ref_id,
        STANDARD.encode(noise_pub),
        STANDARD.encode(identity_pub),
        STANDARD.encode(adv_secret)
    )
}

fn next_pairing_code(state: &mut LoopbackState) -> String {
    state
        .pairing_codes
        .pop_front()
        .unwrap_or_else(generate_pairing_code)
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.state().updates = Some(tx);
        rx
    }

    async fn begin_pairing(&self) -> Result<PairingPayload, TransportError> {
        let delay = {
            let mut state = self.shared.state();
            state.connected = true;
            state.counters.pairings += 1;
            state.pairing_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.state();
        let code = next_pairing_code(&mut state);
        Ok(PairingPayload::new(code, FIRST_CODE_TIMEOUT))
    }

    async fn await_authenticated(&self) -> Result<JID, TransportError> {
        let script = self.shared.state().auth.clone();
        match script {
            AuthScript::Approve { account, after } => {
                self.shared.state().push_update(ConnectionUpdate::PairingScanned);
                // Let the subscriber observe the scan before confirming.
                tokio::task::yield_now().await;
                tokio::time::sleep(after).await;
                Ok(account)
            }
            AuthScript::Reject(msg) => Err(TransportError::AuthRejected(msg)),
            AuthScript::Manual => {
                let mut rx = self.shared.auth_rx.lock().await;
                match rx.recv().await {
                    Some(outcome) => outcome,
                    None => Err(TransportError::Other("auth channel closed".into())),
                }
            }
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state();
        state.counters.reconnects += 1;
        let outcome = state.reconnect_outcomes.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            state.connected = true;
        }
        outcome
    }

    async fn list_conversations(&self) -> Result<Vec<Chat>, TransportError> {
        let state = self.shared.state();
        if !state.connected {
            return Err(TransportError::Disconnected("connection closed".into()));
        }
        if let Some(err) = &state.list_failure {
            return Err(err.clone());
        }
        Ok(state.chats.clone())
    }

    async fn resolve_contact(
        &self,
        conversation: &Conversation,
    ) -> Result<ContactInfo, TransportError> {
        let delay = {
            let mut state = self.shared.state();
            if !state.connected {
                return Err(TransportError::Disconnected("connection closed".into()));
            }
            state.counters.lookups += 1;
            state.lookup_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.shared.state();
        if let Some(err) = state.lookup_failures.get(&conversation.jid) {
            return Err(err.clone());
        }

        let info = state
            .contacts
            .get(&conversation.jid)
            .cloned()
            .unwrap_or_else(|| {
                let info = ContactInfo::new(conversation.jid.clone());
                match &conversation.name {
                    Some(name) => info.with_push_name(name.clone()),
                    None => info,
                }
            });

        let lookups = state.counters.lookups;
        if let Some((after, reason)) = state.disconnect_after.clone() {
            if lookups == after {
                state.connected = false;
                state.push_update(ConnectionUpdate::Disconnected(reason));
            }
        }

        Ok(info)
    }

    async fn close(&self) {
        let mut state = self.shared.state();
        state.connected = false;
        state.updates = None;
        state.counters.closes += 1;
    }
}

impl LoopbackHandle {
    /// Confirm a [`AuthScript::Manual`] pairing.
    pub fn approve(&self, account: JID) {
        let _ = self.shared.auth_tx.send(Ok(account));
    }

    /// Reject a [`AuthScript::Manual`] pairing.
    pub fn reject(&self, reason: impl Into<String>) {
        let _ = self
            .shared
            .auth_tx
            .send(Err(TransportError::AuthRejected(reason.into())));
    }

    /// Report that the phone scanned the current code.
    pub fn scan(&self) {
        self.shared.state().push_update(ConnectionUpdate::PairingScanned);
    }

    /// Rotate the pairing code. Returns the new payload.
    pub fn rotate_pairing(&self) -> PairingPayload {
        let mut state = self.shared.state();
        let code = next_pairing_code(&mut state);
        let payload = PairingPayload::new(code, ROTATED_CODE_TIMEOUT);
        state.push_update(ConnectionUpdate::PairingRefreshed(payload.clone()));
        payload
    }

    /// Drop the connection as the remote side would.
    pub fn drop_connection(&self, reason: DisconnectReason) {
        let mut state = self.shared.state();
        state.connected = false;
        state.push_update(ConnectionUpdate::Disconnected(reason));
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().connected
    }

    pub fn pairing_count(&self) -> usize {
        self.shared.state().counters.pairings
    }

    pub fn lookup_count(&self) -> usize {
        self.shared.state().counters.lookups
    }

    pub fn reconnect_count(&self) -> usize {
        self.shared.state().counters.reconnects
    }

    pub fn close_count(&self) -> usize {
        self.shared.state().counters.closes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;

    fn conversation(chat: Chat) -> Conversation {
        Conversation::from_chat(chat, SessionId::new())
    }

    #[test]
    fn test_generated_code_layout() {
        let code = generate_pairing_code();
        let parts: Vec<&str> = code.split(',').collect();
        assert_eq!(parts.len(), 4);
        assert!(parts[0].starts_with("2@"));
        assert_eq!(STANDARD.decode(parts[1]).unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_scripted_codes_come_first() {
        let transport = LoopbackTransport::new().with_pairing_codes(["first"]);
        let handle = transport.handle();
        let _updates = transport.subscribe();

        let payload = transport.begin_pairing().await.unwrap();
        assert_eq!(payload.code, "first");
        assert_eq!(payload.timeout, FIRST_CODE_TIMEOUT);

        let rotated = handle.rotate_pairing();
        assert_ne!(rotated.code, "first");
        assert_eq!(rotated.timeout, ROTATED_CODE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_lookup_requires_connection() {
        let jid = JID::user("5511999991234");
        let transport = LoopbackTransport::new().with_chat(Chat::individual(jid.clone(), "João"));
        let conv = conversation(Chat::individual(jid, "João"));

        let err = transport.resolve_contact(&conv).await.unwrap_err();
        assert!(err.is_connection_loss());

        transport.begin_pairing().await.unwrap();
        let info = transport.resolve_contact(&conv).await.unwrap();
        assert_eq!(info.push_name.as_deref(), Some("João"));
    }

    #[tokio::test]
    async fn test_disconnect_after_lookups() {
        let a = JID::user("1");
        let b = JID::user("2");
        let transport = LoopbackTransport::new()
            .with_disconnect_after(1, DisconnectReason::NetworkError("reset".into()));
        let mut updates = transport.subscribe();
        transport.begin_pairing().await.unwrap();

        let first = transport.resolve_contact(&conversation(Chat::individual(a, "a"))).await;
        assert!(first.is_ok());
        assert_eq!(
            updates.recv().await,
            Some(ConnectionUpdate::Disconnected(DisconnectReason::NetworkError(
                "reset".into()
            )))
        );

        let second = transport.resolve_contact(&conversation(Chat::individual(b, "b"))).await;
        assert!(matches!(second, Err(TransportError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_manual_auth() {
        let transport = LoopbackTransport::new().with_auth(AuthScript::Manual);
        let handle = transport.handle();
        handle.reject("nope");
        assert_eq!(
            transport.await_authenticated().await,
            Err(TransportError::AuthRejected("nope".into()))
        );
    }

    #[tokio::test]
    async fn test_reconnect_outcomes_then_success() {
        let transport = LoopbackTransport::new()
            .with_reconnect_outcomes([Err(TransportError::Timeout)]);
        let handle = transport.handle();
        assert!(transport.reconnect().await.is_err());
        assert!(transport.reconnect().await.is_ok());
        assert_eq!(handle.reconnect_count(), 2);
        assert!(handle.is_connected());
    }
}
