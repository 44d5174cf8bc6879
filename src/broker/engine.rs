//! Broker engine
//!
//! `MemoryBroker` owns the topic queues and exposes the same surface a
//! network broker driver would: lifecycle (`initialize`, `connect`, `close`),
//! consumption (`add_consumer`, `start_consuming`, `stop_consuming`),
//! `publish`, and request/response over correlated answer topics.
//!
//! Lifecycle: `Uninitialized -> Initialized -> Consuming`. Entering
//! `Consuming` is one-way; a second `start_consuming` is an error.
//!
//! Concurrency and usage notes:
//! - `MemoryBroker` is a cheap handle; clones share the same topics.
//! - Dispatch is synchronous: once consuming, `publish` delivers to the
//!   topic's handlers on the caller's thread before returning.
//! - Locks are never held while handlers run, so handlers may publish,
//!   answer, or register consumers through a cloned handle.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::broker::manager::MessageManager;
use crate::broker::message::MessageMeta;
use crate::broker::topic::{Handler, ListenerId, TopicQueue};
use crate::config::{BrokerSettings, HandlerErrorPolicy, Settings};
use crate::utils::error::{BrokerError, HandlerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerState {
    #[default]
    Uninitialized,
    Initialized,
    Consuming,
}

#[derive(Debug, Default)]
struct Registry {
    topics: HashMap<String, Arc<TopicQueue>>,
    answer_topics: HashSet<String>,
    consumers: usize,
    state: BrokerState,
}

#[derive(Debug)]
struct Shared {
    settings: BrokerSettings,
    registry: Mutex<Registry>,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

/// Name of the per-request topic an answer to `answer_id` is published on.
pub fn answer_topic_name(answer_topic: &str, answer_id: impl Display) -> String {
    format!("{answer_topic}.{answer_id}")
}

/// Topic receiving failed messages under `HandlerErrorPolicy::ErrorTopic`.
pub fn error_topic_name(topic: &str) -> String {
    format!("{topic}__error")
}

impl MemoryBroker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                settings,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Build a broker and initialize the topics listed in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let broker = Self::new(settings.broker.clone());
        broker.initialize(
            settings.broker.topics.iter().cloned(),
            settings.broker.answer_topics.iter().cloned(),
        );
        broker
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.shared.settings
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the queue for `topic`, creating it if needed.
    fn queue(&self, topic: &str) -> Arc<TopicQueue> {
        let mut registry = self.registry();
        Self::queue_in(&mut registry, topic)
    }

    fn queue_in(registry: &mut Registry, topic: &str) -> Arc<TopicQueue> {
        registry
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic, "creating topic queue");
                Arc::new(TopicQueue::new(topic))
            })
            .clone()
    }

    /// Create the queues of `topics` and record `answer_topics`.
    ///
    /// Topics that already exist are left untouched.
    pub fn initialize<T, A>(&self, topics: T, answer_topics: A)
    where
        T: IntoIterator,
        T::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        let mut registry = self.registry();
        for topic in topics {
            let topic: String = topic.into();
            Self::queue_in(&mut registry, &topic);
        }
        for answer_topic in answer_topics {
            registry.answer_topics.insert(answer_topic.into());
        }
        if registry.state == BrokerState::Uninitialized {
            registry.state = BrokerState::Initialized;
        }
        info!(
            topics = registry.topics.len(),
            answer_topics = registry.answer_topics.len(),
            "broker initialized"
        );
    }

    /// Nothing to connect to in memory; always succeeds.
    pub fn connect(&self) -> Result<()> {
        debug!("memory broker connected");
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        debug!("memory broker closed");
        Ok(())
    }

    /// Call `connect` up to `retry_max_count` times, sleeping `retry_delay`
    /// between failed attempts.
    pub fn wait_for_connection(&self) -> Result<()> {
        let attempts = self.shared.settings.retry_max_count;
        for attempt in 1..=attempts {
            match self.connect() {
                Ok(()) => {
                    info!(attempt, "broker connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "broker connection failed");
                    if attempt < attempts {
                        thread::sleep(self.shared.settings.retry_delay());
                    }
                }
            }
        }
        Err(BrokerError::Connection { attempts })
    }

    /// Register `handler` on `topic`. Up to `prefetch` messages are handed to
    /// it per dispatch round before the next consumer gets its turn.
    #[instrument(skip_all, fields(topic = %topic, prefetch = prefetch))]
    pub fn add_consumer<F>(&self, topic: &str, prefetch: usize, handler: F) -> Result<ListenerId>
    where
        F: Fn(&MessageMeta, MessageManager) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        if prefetch == 0 {
            return Err(BrokerError::InvalidPrefetch {
                topic: topic.to_string(),
            });
        }

        let handler: Handler = match self.shared.settings.handler_error_policy {
            HandlerErrorPolicy::Propagate => Arc::new(handler) as Handler,
            HandlerErrorPolicy::ErrorTopic => self.route_errors(topic, handler),
        };

        let mut registry = self.registry();
        let listener_id = Self::queue_in(&mut registry, topic).add_listener(handler, prefetch);
        registry.consumers += 1;
        info!(listener_id, consumers = registry.consumers, "consumer added");
        Ok(listener_id)
    }

    /// `add_consumer` with the configured `default_prefetch`.
    pub fn add_consumer_default<F>(&self, topic: &str, handler: F) -> Result<ListenerId>
    where
        F: Fn(&MessageMeta, MessageManager) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        self.add_consumer(topic, self.shared.settings.default_prefetch, handler)
    }

    pub fn remove_consumer(&self, topic: &str, listener_id: ListenerId) -> bool {
        let mut registry = self.registry();
        let removed = registry
            .topics
            .get(topic)
            .is_some_and(|queue| queue.rm_listener(listener_id));
        if removed {
            registry.consumers = registry.consumers.saturating_sub(1);
            info!(topic, listener_id, "consumer removed");
        }
        removed
    }

    // The wrapper holds a weak handle: queues own their handlers, so a strong
    // one would keep the broker alive forever.
    fn route_errors<F>(&self, topic: &str, handler: F) -> Handler
    where
        F: Fn(&MessageMeta, MessageManager) -> std::result::Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let error_topic = error_topic_name(topic);

        Arc::new(move |message: &MessageMeta, manager: MessageManager| {
            let Err(err) = handler(message, manager.clone()) else {
                return Ok(());
            };
            let Some(shared) = shared.upgrade() else {
                return Err(err);
            };

            // a handler that settled its delivery before failing keeps that
            // decision; only an unsettled delivery is moved to the error topic
            if !manager.ack() {
                debug!(
                    topic = %manager.topic(),
                    delivery_id = %manager.delivery_id(),
                    error = %err,
                    "handler failed after settling its delivery"
                );
                return Ok(());
            }

            warn!(
                topic = %manager.topic(),
                delivery_id = %manager.delivery_id(),
                error_topic = %error_topic,
                error = %err,
                "handler failed, routing message to error topic"
            );
            let failed = message
                .create_child(message.payload.clone())
                .with_error("handler", err.to_string());

            MemoryBroker { shared }
                .publish(&error_topic, [failed])
                .map_err(HandlerError::from)
        })
    }

    /// Drain every topic to its consumers.
    ///
    /// Fails if consumption already started. With no consumers registered it
    /// logs a warning and returns without changing state.
    #[instrument(skip_all)]
    pub fn start_consuming(&self) -> Result<()> {
        let queues = {
            let mut registry = self.registry();
            if registry.state == BrokerState::Consuming {
                return Err(BrokerError::AlreadyConsuming);
            }
            if registry.consumers == 0 {
                warn!("no consumers registered, nothing to consume");
                return Ok(());
            }
            registry.state = BrokerState::Consuming;

            let mut queues: Vec<Arc<TopicQueue>> = registry.topics.values().cloned().collect();
            queues.sort_by(|a, b| a.name().cmp(b.name()));
            queues
        };

        info!(topics = queues.len(), "consuming started");
        for queue in queues {
            queue.process_all()?;
        }
        Ok(())
    }

    /// Handlers are driven by `publish`, there is no loop to stop.
    pub fn stop_consuming(&self) -> Result<()> {
        debug!("stop consuming requested");
        Ok(())
    }

    /// Queue `messages` on `topic`; once consuming, deliver them right away.
    #[instrument(skip_all, fields(topic = %topic))]
    pub fn publish<I>(&self, topic: &str, messages: I) -> Result<()>
    where
        I: IntoIterator<Item = MessageMeta>,
    {
        let queue = self.queue(topic);
        let mut count = 0usize;
        for message in messages {
            queue.add(message);
            count += 1;
        }
        debug!(count, "messages published");

        if self.state() == BrokerState::Consuming {
            queue.process_all()?;
        }
        Ok(())
    }

    /// Wait up to `max_delay` for the answer correlated with `answer_id`.
    #[instrument(skip_all, fields(answer_topic = %answer_topic, answer_id = %answer_id))]
    pub fn get_answer(
        &self,
        answer_topic: &str,
        answer_id: impl Display,
        max_delay: Duration,
    ) -> Result<MessageMeta> {
        let topic = answer_topic_name(answer_topic, &answer_id);
        let queue = {
            let mut registry = self.registry();
            Self::check_answer_topic(&registry, answer_topic);
            Self::queue_in(&mut registry, &topic)
        };
        // too far out to represent means no deadline
        let deadline = Instant::now().checked_add(max_delay);

        loop {
            match queue.reserve_next() {
                Ok(entry) => {
                    queue.mark_as_processed(entry.id);
                    self.drop_if_drained(&topic);
                    debug!("answer received");
                    return Ok(entry.message);
                }
                Err(BrokerError::QueueEmpty { .. }) => {}
                Err(e) => return Err(e),
            }

            let mut pause = self.shared.settings.answer_poll_interval();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    self.drop_if_drained(&topic);
                    return Err(BrokerError::AnswerTimeout {
                        topic,
                        answer_id: answer_id.to_string(),
                        max_delay,
                    });
                }
                pause = pause.min(deadline - now);
            }
            thread::sleep(pause);
        }
    }

    /// Make `message` the answer for the request `answer_id`.
    pub fn publish_answer(
        &self,
        answer_topic: &str,
        answer_id: impl Display,
        message: MessageMeta,
    ) -> Result<()> {
        let topic = answer_topic_name(answer_topic, answer_id);
        // added under the registry lock so a concurrent get_answer cannot
        // drop the queue in between
        let mut registry = self.registry();
        Self::check_answer_topic(&registry, answer_topic);
        Self::queue_in(&mut registry, &topic).add(message);
        debug!(topic = %topic, "answer published");
        Ok(())
    }

    // Answer topic names given to `initialize` are informational: any prefix
    // works, unknown ones are only reported.
    fn check_answer_topic(registry: &Registry, answer_topic: &str) {
        if !registry.answer_topics.contains(answer_topic) {
            debug!(answer_topic, "answer topic was not registered by initialize");
        }
    }

    fn drop_if_drained(&self, topic: &str) {
        let mut registry = self.registry();
        let drained = registry
            .topics
            .get(topic)
            .is_some_and(|q| q.messages_to_process_count() == 0 && q.listeners_count() == 0);
        if drained {
            registry.topics.remove(topic);
        }
    }

    /// Waiting plus in-flight messages of `topic`; 0 for unknown topics.
    pub fn get_topic_approximate_messages_count(&self, topic: &str) -> usize {
        self.registry()
            .topics
            .get(topic)
            .map_or(0, |queue| queue.messages_to_process_count())
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.registry().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn answer_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.registry().answer_topics.iter().cloned().collect();
        topics.sort();
        topics
    }

    pub fn consumers_count(&self) -> usize {
        self.registry().consumers
    }

    pub fn state(&self) -> BrokerState {
        self.registry().state
    }
}
