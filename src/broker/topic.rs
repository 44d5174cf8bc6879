//! Topic queue
//!
//! A `TopicQueue` holds the messages of one topic and the listeners consuming
//! them. Messages move through three places:
//! - `waiting`: FIFO of messages nobody has reserved yet
//! - `in_flight`: the single reserved, unsettled delivery
//! - gone: acked deliveries are dropped
//!
//! A rejected delivery goes back to the head of `waiting`, so it is the next
//! one handed out.
//!
//! Concurrency note: the queue state sits behind its own mutex and the lock
//! is released before any handler runs. Handlers can therefore ack, reject,
//! publish or register listeners on the queue that is calling them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::broker::manager::MessageManager;
use crate::broker::message::{DeliveryId, MessageMeta, QueuedMessage};
use crate::utils::error::{BrokerError, HandlerError, Result};

pub type ListenerId = u64;

/// Callback invoked for every delivery. The handler settles the delivery
/// through the `MessageManager` it receives.
pub type Handler =
    Arc<dyn Fn(&MessageMeta, MessageManager) -> std::result::Result<(), HandlerError> + Send + Sync>;

#[derive(Clone)]
struct Listener {
    handler: Handler,
    prefetch: usize,
}

#[derive(Default)]
struct QueueState {
    waiting: VecDeque<QueuedMessage>,
    in_flight: Option<QueuedMessage>,
    listeners: Vec<(ListenerId, Listener)>,
    next_delivery_id: u64,
    next_listener_id: ListenerId,
}

/// Why a dispatch pass ended.
enum Pass {
    /// Nothing left to deliver, or nobody to deliver it to.
    Drained,
    /// Messages remain but the pass gave up on them for now.
    Paused,
}

/// What a handler did with the delivery it was given.
enum Settlement {
    Acked,
    Rejected,
    Held,
}

pub struct TopicQueue {
    name: String,
    state: Mutex<QueueState>,
    dispatching: AtomicBool,
}

struct DispatchGuard<'a>(&'a AtomicBool);

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TopicQueue {
    /// Consecutive dispatch rounds in which every delivery was rejected
    /// before a pass gives up and leaves the messages queued.
    pub const MAX_IDLE_ROUNDS: usize = 3;
}

impl TopicQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(QueueState::default()),
            dispatching: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Every mutation completes before the guard is dropped, so a poisoned
    // lock still holds consistent state.
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message to the tail and return its delivery id.
    pub fn add(&self, message: MessageMeta) -> DeliveryId {
        let mut state = self.state();
        let id = DeliveryId::from(state.next_delivery_id);
        state.next_delivery_id += 1;
        state.waiting.push_back(QueuedMessage { id, message });
        id
    }

    /// Reserve the next delivery.
    ///
    /// While a delivery is in flight the same delivery is returned again, so
    /// retrying a reservation is safe. Otherwise the head of the queue moves
    /// into the in-flight slot.
    pub fn reserve_next(&self) -> Result<QueuedMessage> {
        let mut state = self.state();
        if let Some(entry) = &state.in_flight {
            return Ok(entry.clone());
        }

        match state.waiting.pop_front() {
            Some(entry) => {
                state.in_flight = Some(entry.clone());
                Ok(entry)
            }
            None => Err(BrokerError::QueueEmpty {
                topic: self.name.clone(),
            }),
        }
    }

    /// Drop the in-flight delivery if it is `id`.
    ///
    /// Returns `false` and leaves the queue untouched for any other id.
    pub fn mark_as_processed(&self, id: DeliveryId) -> bool {
        let mut state = self.state();
        if state.in_flight.as_ref().is_some_and(|entry| entry.id == id) {
            state.in_flight = None;
            return true;
        }
        debug!(topic = %self.name, delivery_id = %id, "ignoring stale ack");
        false
    }

    /// Put the in-flight delivery `id` back at the head of the queue.
    ///
    /// Returns `false` and leaves the queue untouched for any other id.
    pub fn move_back_from_reserved(&self, id: DeliveryId) -> bool {
        let mut state = self.state();
        if state.in_flight.as_ref().is_some_and(|entry| entry.id == id) {
            if let Some(entry) = state.in_flight.take() {
                state.waiting.push_front(entry);
            }
            return true;
        }
        debug!(topic = %self.name, delivery_id = %id, "ignoring stale reject");
        false
    }

    /// Register a handler. A prefetch of zero is treated as one.
    pub fn add_listener(&self, handler: Handler, prefetch: usize) -> ListenerId {
        let mut state = self.state();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.push((
            id,
            Listener {
                handler,
                prefetch: prefetch.max(1),
            },
        ));
        id
    }

    pub fn rm_listener(&self, id: ListenerId) -> bool {
        let mut state = self.state();
        let before = state.listeners.len();
        state.listeners.retain(|(listener_id, _)| *listener_id != id);
        state.listeners.len() != before
    }

    pub fn listeners_count(&self) -> usize {
        self.state().listeners.len()
    }

    pub fn messages_to_process_count(&self) -> usize {
        let state = self.state();
        debug_assert!(
            state
                .in_flight
                .as_ref()
                .is_none_or(|entry| state.waiting.iter().all(|w| w.id != entry.id)),
            "in-flight delivery is also waiting"
        );
        state.waiting.len() + usize::from(state.in_flight.is_some())
    }

    fn listener_ids(&self) -> Vec<ListenerId> {
        self.state().listeners.iter().map(|(id, _)| *id).collect()
    }

    fn listener(&self, id: ListenerId) -> Option<Listener> {
        self.state()
            .listeners
            .iter()
            .find(|(listener_id, _)| *listener_id == id)
            .map(|(_, listener)| listener.clone())
    }

    fn settlement(&self, id: DeliveryId) -> Settlement {
        let state = self.state();
        if state.in_flight.as_ref().is_some_and(|entry| entry.id == id) {
            Settlement::Held
        } else if state.waiting.iter().any(|entry| entry.id == id) {
            Settlement::Rejected
        } else {
            Settlement::Acked
        }
    }

    /// Deliver queued messages to the listeners until the queue is drained.
    ///
    /// Listeners are visited round-robin in registration order, each one
    /// receiving up to `prefetch` messages per round. Handlers run on the
    /// calling thread, one at a time.
    ///
    /// The pass stops early when:
    /// - a handler fails: its error is returned and the delivery stays in
    ///   flight for redelivery
    /// - a handler returns without settling its delivery
    /// - `MAX_IDLE_ROUNDS` rounds in a row acked nothing (every delivery was
    ///   rejected)
    ///
    /// A call made while this queue is already dispatching returns at once;
    /// the running pass picks up whatever was added, including messages added
    /// after it found the queue empty but before it released the queue.
    pub fn process_all(self: &Arc<Self>) -> Result<()> {
        loop {
            if self.dispatching.swap(true, Ordering::AcqRel) {
                debug!(topic = %self.name, "dispatch already running");
                return Ok(());
            }

            let pass = {
                let _guard = DispatchGuard(&self.dispatching);
                self.dispatch()?
            };

            match pass {
                Pass::Paused => return Ok(()),
                // a caller that lost the race for the flag between the empty
                // check and the release left its messages to us
                Pass::Drained
                    if self.listeners_count() > 0 && self.messages_to_process_count() > 0 =>
                {
                    continue;
                }
                Pass::Drained => return Ok(()),
            }
        }
    }

    fn dispatch(self: &Arc<Self>) -> Result<Pass> {
        let mut idle_rounds = 0usize;
        loop {
            let listener_ids = self.listener_ids();
            if listener_ids.is_empty() || self.messages_to_process_count() == 0 {
                return Ok(Pass::Drained);
            }

            let mut acked = 0usize;
            for listener_id in listener_ids {
                let Some(prefetch) = self.listener(listener_id).map(|l| l.prefetch) else {
                    continue;
                };

                for _ in 0..prefetch {
                    if self.messages_to_process_count() == 0 {
                        break;
                    }
                    // re-read each time: the handler may have removed itself
                    let Some(listener) = self.listener(listener_id) else {
                        break;
                    };

                    let entry = self.reserve_next()?;
                    debug!(
                        topic = %self.name,
                        delivery_id = %entry.id,
                        listener_id,
                        "dispatching message"
                    );
                    let manager = MessageManager::new(Arc::clone(self), entry.id);
                    (listener.handler)(&entry.message, manager).map_err(|source| {
                        BrokerError::Handler {
                            topic: self.name.clone(),
                            delivery_id: entry.id,
                            source,
                        }
                    })?;

                    match self.settlement(entry.id) {
                        Settlement::Acked => acked += 1,
                        Settlement::Rejected => {}
                        Settlement::Held => {
                            debug!(
                                topic = %self.name,
                                delivery_id = %entry.id,
                                "delivery left unsettled, pausing dispatch"
                            );
                            return Ok(Pass::Paused);
                        }
                    }
                }
            }

            if acked > 0 {
                idle_rounds = 0;
                continue;
            }
            idle_rounds += 1;
            if idle_rounds >= Self::MAX_IDLE_ROUNDS {
                warn!(
                    topic = %self.name,
                    remaining = self.messages_to_process_count(),
                    rounds = idle_rounds,
                    "every delivery was rejected, leaving messages queued"
                );
                return Ok(Pass::Paused);
            }
        }
    }
}

impl fmt::Debug for TopicQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("TopicQueue")
            .field("name", &self.name)
            .field("waiting", &state.waiting.len())
            .field("in_flight", &state.in_flight.as_ref().map(|entry| entry.id))
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
