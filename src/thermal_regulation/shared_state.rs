// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the chamber-thermostat project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared state for the thermal regulation system
//!
//! Controllers hand their state to a [`StatePublisher`] after every iteration.
//! Publishing never blocks: updates go through a bounded queue and are dropped
//! (and counted) when the queue is full. A single delivery task applies the
//! queued messages in order to a map keyed by alias and forwards every applied
//! state to a broadcast feed for observers such as the metrics sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, trace};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::controller::ControllerState;

/// Shared map of the latest state of every running controller
pub type SharedControllerStates = Arc<RwLock<HashMap<String, ControllerState>>>;

/// Minimum capacity of the observer feed
const MIN_FEED_CAPACITY: usize = 16;

enum PublisherMessage {
    Update(ControllerState),
    Retire(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to the state publisher, cheap to clone
#[derive(Clone)]
pub struct StatePublisher {
    queue: mpsc::Sender<PublisherMessage>,
    states: SharedControllerStates,
    feed: broadcast::Sender<ControllerState>,
    dropped: Arc<AtomicU64>,
}

impl StatePublisher {
    /// Create a publisher with a queue of `capacity` updates and spawn its
    /// delivery task.
    ///
    /// The delivery task ends once every handle has been dropped.
    pub fn spawn(capacity: usize) -> (Self, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (queue, receiver) = mpsc::channel(capacity);
        let (feed, _) = broadcast::channel(capacity.max(MIN_FEED_CAPACITY));
        let states: SharedControllerStates = Arc::new(RwLock::new(HashMap::new()));

        let handle = tokio::spawn(deliver(receiver, states.clone(), feed.clone()));

        let publisher = Self {
            queue,
            states,
            feed,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (publisher, handle)
    }

    /// Queue a state update without waiting.
    ///
    /// Returns `false` when the update was dropped.
    pub fn publish(&self, state: ControllerState) -> bool {
        match self.queue.try_send(PublisherMessage::Update(state)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(PublisherMessage::Update(state))) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(
                    "State queue full, dropped update for '{}' ({} dropped so far)",
                    state.alias, dropped
                );
                false
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("State publisher closed, update dropped");
                false
            }
        }
    }

    /// Remove `alias` from the map once every update queued before it has been applied
    pub async fn retire(&self, alias: &str) {
        if self
            .queue
            .send(PublisherMessage::Retire(alias.to_string()))
            .await
            .is_err()
        {
            debug!("State publisher closed, cannot retire '{}'", alias);
        }
    }

    /// Wait until every message queued before this call has been applied
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.send(PublisherMessage::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Latest state published under `alias`
    pub fn snapshot(&self, alias: &str) -> Option<ControllerState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(alias)
            .cloned()
    }

    /// Latest state of every controller, sorted by alias
    pub fn snapshot_all(&self) -> Vec<ControllerState> {
        let mut states: Vec<ControllerState> = self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        states.sort_by(|a, b| a.alias.cmp(&b.alias));
        states
    }

    /// Number of aliases currently published
    pub fn len(&self) -> usize {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every applied state from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerState> {
        self.feed.subscribe()
    }

    /// Number of updates dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

async fn deliver(
    mut receiver: mpsc::Receiver<PublisherMessage>,
    states: SharedControllerStates,
    feed: broadcast::Sender<ControllerState>,
) {
    while let Some(message) = receiver.recv().await {
        match message {
            PublisherMessage::Update(state) => {
                trace!("Applying state update for '{}'", state.alias);
                states
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(state.alias.clone(), state.clone());
                // No subscriber is not an error
                let _ = feed.send(state);
            }
            PublisherMessage::Retire(alias) => {
                debug!("Retiring published state for '{}'", alias);
                states
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&alias);
            }
            PublisherMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("State publisher delivery task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state(alias: &str, temperature: f64) -> ControllerState {
        ControllerState {
            sensor_id: format!("28-{}", alias),
            alias: alias.to_string(),
            temperature,
            heating: false,
            cooling: false,
            last_reading_at: Utc::now(),
            last_changed_at: Utc::now(),
            dwell: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_updates_applied_in_order() {
        let (publisher, _task) = StatePublisher::spawn(8);
        assert!(publisher.publish(state("a", 1.0)));
        assert!(publisher.publish(state("a", 2.0)));
        assert!(publisher.publish(state("b", 3.0)));
        publisher.flush().await;

        assert_eq!(publisher.snapshot("a").unwrap().temperature, 2.0);
        let all = publisher.snapshot_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].alias, "a");
        assert_eq!(all[1].alias, "b");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_full_queue_drops_and_counts() {
        let (publisher, _task) = StatePublisher::spawn(2);
        // The delivery task cannot run before this test yields
        assert!(publisher.publish(state("a", 1.0)));
        assert!(publisher.publish(state("a", 2.0)));
        assert!(!publisher.publish(state("a", 3.0)));
        assert_eq!(publisher.dropped(), 1);

        publisher.flush().await;
        assert_eq!(publisher.snapshot("a").unwrap().temperature, 2.0);
    }

    #[tokio::test]
    async fn test_retire_is_ordered_after_last_update() {
        let (publisher, _task) = StatePublisher::spawn(8);
        publisher.publish(state("gone", 1.0));
        publisher.retire("gone").await;
        publisher.flush().await;
        assert!(publisher.snapshot("gone").is_none());
        assert!(publisher.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_receive_applied_states() {
        let (publisher, _task) = StatePublisher::spawn(8);
        let mut feed = publisher.subscribe();
        publisher.publish(state("a", 5.5));
        let received = feed.recv().await.unwrap();
        assert_eq!(received.alias, "a");
        assert_eq!(received.temperature, 5.5);
    }

    #[tokio::test]
    async fn test_delivery_task_ends_with_last_handle() {
        let (publisher, task) = StatePublisher::spawn(4);
        drop(publisher);
        task.await.unwrap();
    }
}
