//! Steering: messages injected into a running session from outside.
//!
//! Callers queue messages with a priority; the run picks them up at its next
//! turn boundary. Processed entries linger for a grace period so late
//! observers can still see they were handled, then are purged lazily on the
//! next queue operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use steerclaw_core::message::Message;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub message: Message,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    pub processed: bool,
    #[serde(skip)]
    processed_at: Option<Instant>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Notifications delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteeringEvent {
    Queued { id: String, priority: Priority },
    Processed { id: String },
    Interrupted,
}

pub struct SteeringController {
    queue: Mutex<Vec<QueuedMessage>>,
    interrupted: AtomicBool,
    events: broadcast::Sender<SteeringEvent>,
    grace: Duration,
}

impl SteeringController {
    pub fn new(processed_grace: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            queue: Mutex::new(Vec::new()),
            interrupted: AtomicBool::new(false),
            events,
            grace: processed_grace,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueuedMessage>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let grace = self.grace;
        let now = Instant::now();
        queue.retain(|m| match m.processed_at {
            Some(at) => now.duration_since(at) < grace,
            None => true,
        });
        queue
    }

    fn notify(&self, event: SteeringEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Receive queue notifications until the receiver is dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<SteeringEvent> {
        self.events.subscribe()
    }

    /// Queue a message; returns its id. Higher priorities move ahead of
    /// lower ones, arrival order is kept within a priority.
    pub fn queue_message(
        &self,
        message: Message,
        priority: Priority,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> String {
        let id = format!("steer_{}", uuid::Uuid::new_v4().simple());
        {
            let mut queue = self.lock();
            queue.push(QueuedMessage {
                id: id.clone(),
                message,
                priority,
                timestamp: Utc::now(),
                processed: false,
                processed_at: None,
                metadata,
            });
            queue.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        debug!(id = %id, ?priority, "Steering message queued");
        self.notify(SteeringEvent::Queued {
            id: id.clone(),
            priority,
        });
        id
    }

    /// The highest-priority unprocessed message, left in place.
    pub fn get_next_message(&self) -> Option<QueuedMessage> {
        self.lock().iter().find(|m| !m.processed).cloned()
    }

    /// Mark a message processed. Processing an urgent message also sets
    /// the interrupt flag. Returns `false` for unknown or already processed ids.
    pub fn mark_processed(&self, id: &str) -> bool {
        let priority = {
            let mut queue = self.lock();
            let Some(entry) = queue.iter_mut().find(|m| m.id == id && !m.processed) else {
                return false;
            };
            entry.processed = true;
            entry.processed_at = Some(Instant::now());
            entry.priority
        };
        self.notify(SteeringEvent::Processed { id: id.to_string() });
        if priority == Priority::Urgent {
            self.interrupt();
        }
        true
    }

    /// Consume every unprocessed message in priority order.
    ///
    /// Unlike [`mark_processed`](Self::mark_processed) this never sets the
    /// interrupt flag: the caller is handling the messages right now.
    pub fn drain_pending(&self) -> Vec<QueuedMessage> {
        let drained: Vec<QueuedMessage> = {
            let mut queue = self.lock();
            let now = Instant::now();
            queue
                .iter_mut()
                .filter(|m| !m.processed)
                .map(|m| {
                    m.processed = true;
                    m.processed_at = Some(now);
                    m.clone()
                })
                .collect()
        };
        for m in &drained {
            self.notify(SteeringEvent::Processed { id: m.id.clone() });
        }
        drained
    }

    /// Ask the owning run to stop at its next checkpoint.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.notify(SteeringEvent::Interrupted);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Reset the interrupt flag, returning whether it was set.
    pub fn clear_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().iter().filter(|m| !m.processed).count()
    }

    /// Entries still held, processed ones within their grace period included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SteeringController {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Steering controllers keyed by session, created on first use.
pub struct SteeringRegistry {
    controllers: Mutex<HashMap<String, Arc<SteeringController>>>,
    grace: Duration,
}

impl SteeringRegistry {
    pub fn new(processed_grace: Duration) -> Self {
        Self {
            controllers: Mutex::new(HashMap::new()),
            grace: processed_grace,
        }
    }

    fn controllers(&self) -> MutexGuard<'_, HashMap<String, Arc<SteeringController>>> {
        self.controllers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<SteeringController> {
        self.controllers()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(SteeringController::new(self.grace)))
            .clone()
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SteeringController>> {
        self.controllers().get(session_id).cloned()
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.controllers().remove(session_id).is_some()
    }
}

impl Default for SteeringRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(c: &SteeringController, text: &str, priority: Priority) -> String {
        c.queue_message(Message::user(text), priority, serde_json::Map::new())
    }

    #[test]
    fn urgent_jumps_ahead_of_low() {
        let c = SteeringController::default();
        queue(&c, "low", Priority::Low);
        queue(&c, "urgent", Priority::Urgent);
        assert_eq!(c.get_next_message().unwrap().message.content, "urgent");
    }

    #[test]
    fn arrival_order_kept_within_priority() {
        let c = SteeringController::default();
        queue(&c, "n1", Priority::Normal);
        queue(&c, "h1", Priority::High);
        queue(&c, "n2", Priority::Normal);
        queue(&c, "h2", Priority::High);
        let order: Vec<String> = c.drain_pending().into_iter().map(|m| m.message.content).collect();
        assert_eq!(order, vec!["h1", "h2", "n1", "n2"]);
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn get_next_does_not_consume() {
        let c = SteeringController::default();
        let id = queue(&c, "hello", Priority::Normal);
        assert_eq!(c.get_next_message().unwrap().id, id);
        assert_eq!(c.get_next_message().unwrap().id, id);
        assert!(c.mark_processed(&id));
        assert!(c.get_next_message().is_none());
        assert!(!c.mark_processed(&id));
    }

    #[test]
    fn processing_urgent_sets_interrupt() {
        let c = SteeringController::default();
        let normal = queue(&c, "n", Priority::Normal);
        c.mark_processed(&normal);
        assert!(!c.is_interrupted());

        let urgent = queue(&c, "stop", Priority::Urgent);
        c.mark_processed(&urgent);
        assert!(c.is_interrupted());
        assert!(c.clear_interrupt());
        assert!(!c.is_interrupted());
    }

    #[test]
    fn drain_does_not_interrupt() {
        let c = SteeringController::default();
        queue(&c, "now", Priority::Urgent);
        assert_eq!(c.drain_pending().len(), 1);
        assert!(!c.is_interrupted());
    }

    #[test]
    fn subscribers_are_notified_before_return() {
        let c = SteeringController::default();
        let mut rx = c.subscribe();
        let id = queue(&c, "hi", Priority::High);
        assert_eq!(
            rx.try_recv().unwrap(),
            SteeringEvent::Queued {
                id: id.clone(),
                priority: Priority::High
            }
        );
        c.interrupt();
        assert_eq!(rx.try_recv().unwrap(), SteeringEvent::Interrupted);
        drop(rx);
        // Sending with no subscribers is harmless.
        queue(&c, "again", Priority::Low);
    }

    #[test]
    fn registry_hands_out_one_controller_per_session() {
        let registry = SteeringRegistry::default();
        let a = registry.get_or_create("s1");
        let again = registry.get_or_create("s1");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &registry.get_or_create("s2")));
        assert!(registry.remove("s1"));
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn processed_messages_purged_after_grace() {
        let c = SteeringController::new(Duration::from_millis(500));
        let id = queue(&c, "x", Priority::Normal);
        c.mark_processed(&id);
        assert_eq!(c.len(), 1);

        tokio::time::advance(Duration::from_millis(499)).await;
        assert_eq!(c.len(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(c.len(), 0);
    }
}
