//! Ordered fan-out of [`SyncEvent`]s to subscribers.
//!
//! Every subscriber owns an unbounded queue. Emission happens under one lock,
//! so all subscribers see the same total order even when the session driver
//! and a harvest emit concurrently. Nothing is discarded: a slow consumer only
//! grows its queue, and the depth is observable through
//! [`EventStream::backlog`] and [`EventDispatcher::backlog`]. Events emitted
//! while nobody is subscribed are held for the first subscriber.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::types::SyncEvent;

struct Subscriber {
    tx: mpsc::UnboundedSender<SyncEvent>,
    depth: Arc<AtomicUsize>,
}

impl Subscriber {
    /// Returns false once the receiving stream is gone.
    fn deliver(&self, event: SyncEvent) -> bool {
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(event).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }
}

#[derive(Default)]
struct DispatchState {
    subscribers: Vec<Subscriber>,
    /// Events emitted before anyone subscribed.
    held: VecDeque<SyncEvent>,
    emitted: u64,
}

/// Shared handle for emitting events.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    state: Arc<Mutex<DispatchState>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver an event to every live subscriber, in emission order.
    pub fn emit(&self, event: SyncEvent) {
        let mut state = self.state();
        state.emitted += 1;

        if state.subscribers.is_empty() {
            log::debug!("no subscribers, holding {:?}", event);
            state.held.push_back(event);
            return;
        }

        let before = state.subscribers.len();
        state.subscribers.retain(|sub| sub.deliver(event.clone()));
        let pruned = before - state.subscribers.len();
        if pruned > 0 {
            log::debug!("pruned {} closed event subscriber(s)", pruned);
            if state.subscribers.is_empty() {
                state.held.push_back(event);
            }
        }
    }

    /// Open a new event stream. The first subscriber also receives any events
    /// held while nobody was listening.
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let subscriber = Subscriber {
            tx,
            depth: Arc::clone(&depth),
        };

        let mut state = self.state();
        while let Some(event) = state.held.pop_front() {
            subscriber.deliver(event);
        }
        state.subscribers.push(subscriber);

        EventStream { rx, depth }
    }

    /// Events queued but not yet consumed, across all subscribers plus any
    /// held events.
    pub fn backlog(&self) -> usize {
        let state = self.state();
        state.held.len()
            + state
                .subscribers
                .iter()
                .map(|sub| sub.depth.load(Ordering::SeqCst))
                .sum::<usize>()
    }

    /// Total number of events emitted so far.
    pub fn emitted(&self) -> u64 {
        self.state().emitted
    }

    pub fn subscriber_count(&self) -> usize {
        self.state().subscribers.len()
    }
}

/// Receiving end of a subscription.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<SyncEvent>,
    depth: Arc<AtomicUsize>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the dispatcher is gone.
    pub async fn next(&mut self) -> Option<SyncEvent> {
        let event = self.rx.recv().await;
        if event.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    /// Take the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<SyncEvent> {
        let event = self.rx.try_recv().ok();
        if event.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        event
    }

    /// Drain everything currently queued.
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Events queued on this stream and not yet consumed.
    pub fn backlog(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl Stream for EventStream {
    type Item = SyncEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(_)) = &poll {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        poll
    }
}
