//! Contact harvesting.
//!
//! A harvest walks every conversation of a `Ready` session, drops groups,
//! resolves the remaining counterparts with bounded concurrency and emits one
//! [`SyncEvent::ContactDiscovered`] per distinct contact JID.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{SyncError, SyncResult};
use crate::session::SessionManager;
use crate::types::{Contact, SessionId, SyncEvent};

/// Outcome of one complete harvest.
#[derive(Debug)]
pub struct HarvestReport {
    pub session_id: SessionId,
    /// Contacts in the order they were emitted.
    pub contacts: Vec<Contact>,
    pub count: usize,
    /// Group conversations left out.
    pub skipped_groups: usize,
    /// Lookups that failed and were skipped, as
    /// [`SyncError::ConversationLookupFailed`].
    pub errors: Vec<SyncError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Collects contacts from the conversations of a session.
#[derive(Clone)]
pub struct Harvester {
    manager: SessionManager,
}

impl Harvester {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    /// Run one harvest to completion.
    ///
    /// Fails with [`SyncError::SessionNotReady`] if the session is not
    /// `Ready`, or stops being `Ready` before the walk finishes. Contacts
    /// emitted before such an abort are not retracted.
    pub async fn harvest(&self) -> SyncResult<HarvestReport> {
        self.harvest_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`Self::harvest`], but gives up with
    /// [`SyncError::HarvestCancelled`] once `cancel` fires.
    pub async fn harvest_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> SyncResult<HarvestReport> {
        let lease = self.manager.ready_lease()?;
        let epoch = lease.epoch.clone();
        let started_at = Utc::now();

        let conversations = tokio::select! {
            biased;
            _ = epoch.cancelled() => return Err(SyncError::SessionNotReady),
            _ = cancel.cancelled() => return Err(SyncError::HarvestCancelled),
            listed = self.manager.list_conversations(&lease) => listed.map_err(abort_reason)?,
        };

        let total = conversations.len();
        let (groups, individuals): (Vec<_>, Vec<_>) =
            conversations.into_iter().partition(|conv| conv.is_group);
        info!(
            "session {}: harvesting {} conversation(s), skipping {} group(s)",
            lease.session_id,
            individuals.len(),
            groups.len()
        );

        let concurrency = self.manager.config().harvest_concurrency.max(1);
        let mut lookups = stream::iter(individuals)
            .map(|conversation| {
                let manager = self.manager.clone();
                async move {
                    let resolved = manager.resolve_contact(&conversation).await;
                    (conversation, resolved)
                }
            })
            .buffer_unordered(concurrency);

        let dispatcher = self.manager.dispatcher();
        let mut seen = HashSet::new();
        let mut contacts = Vec::new();
        let mut errors = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = epoch.cancelled() => {
                    warn!(
                        "session {}: harvest aborted after {} contact(s): session left ready",
                        lease.session_id,
                        contacts.len()
                    );
                    return Err(SyncError::SessionNotReady);
                }
                _ = cancel.cancelled() => return Err(SyncError::HarvestCancelled),
                next = lookups.next() => next,
            };

            let Some((conversation, resolved)) = next else {
                break;
            };

            match resolved {
                Ok(info) => {
                    let contact = Contact::resolve(info, &conversation);
                    if seen.insert(contact.id.clone()) {
                        dispatcher.emit(SyncEvent::ContactDiscovered(contact.clone()));
                        contacts.push(contact);
                    } else {
                        debug!("duplicate contact {} via {}", contact.id, conversation.jid);
                    }
                }
                Err(err @ SyncError::ConversationLookupFailed { .. }) => {
                    warn!("skipping conversation: {}", err);
                    errors.push(err);
                }
                Err(err) => {
                    warn!(
                        "session {}: harvest aborted after {} contact(s): {}",
                        lease.session_id,
                        contacts.len(),
                        err
                    );
                    return Err(SyncError::SessionNotReady);
                }
            }
        }

        if epoch.is_cancelled() {
            return Err(SyncError::SessionNotReady);
        }

        let count = contacts.len();
        dispatcher.emit(SyncEvent::HarvestComplete { count });
        info!(
            "session {}: harvest complete, {} contact(s) from {} conversation(s), {} failed",
            lease.session_id,
            count,
            total,
            errors.len()
        );

        Ok(HarvestReport {
            session_id: lease.session_id,
            contacts,
            count,
            skipped_groups: groups.len(),
            errors,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Anything that stops a harvest from listing conversations means the session
/// is no longer usable for it.
fn abort_reason(err: SyncError) -> SyncError {
    match err {
        SyncError::TransportDisconnected(_) | SyncError::SessionNotReady => {
            SyncError::SessionNotReady
        }
        other => other,
    }
}
