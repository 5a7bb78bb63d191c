//! Ordered, single-producer event delivery for one run.
//!
//! The producer pushes into an append-only log; every subscriber walks the
//! log with its own cursor, so any number of consumers observe the exact push
//! order without affecting each other. Nothing is ever dropped. A terminal
//! event (by default `agent_end`) closes the stream and becomes its final
//! result; pushes after that are no-ops.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::watch;

use crate::event::AgentEvent;

type TerminalPredicate = Box<dyn Fn(&AgentEvent) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    events: Vec<AgentEvent>,
    result: Option<AgentEvent>,
    closed: bool,
}

struct Inner {
    state: Mutex<State>,
    /// Bumped after every state change; subscribers wait on it.
    version: watch::Sender<u64>,
    is_terminal: TerminalPredicate,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }
}

/// Producer handle for a run's event stream. Cloning yields another handle
/// to the same stream.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<Inner>,
}

impl EventStream {
    /// A stream closed by the first event matching `is_terminal`.
    pub fn new(is_terminal: impl Fn(&AgentEvent) -> bool + Send + Sync + 'static) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                version,
                is_terminal: Box::new(is_terminal),
            }),
        }
    }

    /// A stream closed by `agent_end`.
    pub fn for_run() -> Self {
        Self::new(AgentEvent::is_agent_end)
    }

    /// Append an event. Returns `false` if the stream was already closed.
    pub fn push(&self, event: AgentEvent) -> bool {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return false;
            }
            if (self.inner.is_terminal)(&event) {
                state.closed = true;
                state.result = Some(event.clone());
            }
            state.events.push(event);
        }
        self.inner.bump();
        true
    }

    /// Close the stream without a terminal event (e.g. the producer died).
    pub fn close(&self) {
        {
            let mut state = self.inner.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.inner.bump();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of events pushed so far.
    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every event pushed so far.
    pub fn snapshot(&self) -> Vec<AgentEvent> {
        self.inner.lock().events.clone()
    }

    /// A new consumer positioned at the first event ever pushed.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            inner: self.inner.clone(),
            cursor: 0,
            version: self.inner.version.subscribe(),
        }
    }

    /// Wait until the stream closes; resolves to the terminal event, if any.
    pub async fn completion(&self) -> Option<AgentEvent> {
        let mut version = self.inner.version.subscribe();
        loop {
            version.borrow_and_update();
            {
                let state = self.inner.lock();
                if state.closed {
                    return state.result.clone();
                }
            }
            if version.changed().await.is_err() {
                return None;
            }
        }
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::for_run()
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("EventStream")
            .field("events", &state.events.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// An independent cursor over an [`EventStream`].
pub struct EventSubscriber {
    inner: Arc<Inner>,
    cursor: usize,
    version: watch::Receiver<u64>,
}

impl EventSubscriber {
    /// The next event in push order, or `None` once the stream is closed and drained.
    pub async fn next(&mut self) -> Option<AgentEvent> {
        loop {
            // Mark the current version seen before inspecting state so a push
            // racing with this check still wakes the `changed()` below.
            self.version.borrow_and_update();
            {
                let state = self.inner.lock();
                if let Some(event) = state.events.get(self.cursor) {
                    self.cursor += 1;
                    return Some(event.clone());
                }
                if state.closed {
                    return None;
                }
            }
            if self.version.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Everything currently buffered for this subscriber, without waiting.
    pub fn drain_ready(&mut self) -> Vec<AgentEvent> {
        let state = self.inner.lock();
        let ready = state.events[self.cursor.min(state.events.len())..].to_vec();
        self.cursor = state.events.len();
        ready
    }

    /// Collect every remaining event until the stream closes.
    pub async fn collect(mut self) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Some(event) = self.next().await {
            out.push(event);
        }
        out
    }

    /// Adapt this subscriber into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = AgentEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|event| (event, sub))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RunStatus;
    use crate::event::EventKind;
    use futures::StreamExt;

    fn turn(n: u32) -> AgentEvent {
        AgentEvent::new(EventKind::TurnStart { turn: n })
    }

    fn end() -> AgentEvent {
        AgentEvent::new(EventKind::AgentEnd {
            status: RunStatus::Completed,
            turns: 1,
            error: None,
        })
    }

    fn turn_number(event: &AgentEvent) -> Option<u32> {
        match event.kind {
            EventKind::TurnStart { turn } => Some(turn),
            _ => None,
        }
    }

    #[tokio::test]
    async fn subscriber_sees_push_order() {
        let stream = EventStream::for_run();
        let sub = stream.subscribe();
        for i in 1..=5 {
            assert!(stream.push(turn(i)));
        }
        stream.push(end());

        let events = sub.collect().await;
        assert_eq!(events.len(), 6);
        let turns: Vec<u32> = events.iter().filter_map(turn_number).collect();
        assert_eq!(turns, vec![1, 2, 3, 4, 5]);
        assert!(events.last().unwrap().is_agent_end());
    }

    #[tokio::test]
    async fn pushes_after_terminal_are_noops() {
        let stream = EventStream::for_run();
        stream.push(turn(1));
        assert!(stream.push(end()));
        assert!(!stream.push(turn(2)));
        assert!(stream.is_closed());
        assert_eq!(stream.len(), 2);
    }

    #[tokio::test]
    async fn fan_out_subscribers_are_independent() {
        let stream = EventStream::for_run();
        let mut a = stream.subscribe();
        stream.push(turn(1));
        stream.push(turn(2));

        assert_eq!(turn_number(&a.next().await.unwrap()), Some(1));

        // A late subscriber starts from the beginning.
        let mut b = stream.subscribe();
        assert_eq!(turn_number(&b.next().await.unwrap()), Some(1));
        assert_eq!(turn_number(&b.next().await.unwrap()), Some(2));
        assert_eq!(turn_number(&a.next().await.unwrap()), Some(2));
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken_by_push() {
        let stream = EventStream::for_run();
        let mut sub = stream.subscribe();
        let producer = stream.clone();

        let reader = tokio::spawn(async move { sub.next().await });
        tokio::task::yield_now().await;
        producer.push(turn(7));

        let event = reader.await.unwrap().unwrap();
        assert_eq!(turn_number(&event), Some(7));
    }

    #[tokio::test]
    async fn completion_resolves_once_with_terminal_event() {
        let stream = EventStream::for_run();
        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.completion().await })
        };
        stream.push(turn(1));
        stream.push(end());
        stream.push(end());

        let result = waiter.await.unwrap().unwrap();
        assert!(result.is_agent_end());
        assert_eq!(stream.snapshot().iter().filter(|e| e.is_agent_end()).count(), 1);
    }

    #[tokio::test]
    async fn close_without_terminal_ends_subscribers() {
        let stream = EventStream::for_run();
        let sub = stream.subscribe();
        stream.push(turn(1));
        stream.close();
        assert_eq!(sub.collect().await.len(), 1);
        assert!(stream.completion().await.is_none());
    }

    #[tokio::test]
    async fn custom_terminal_predicate() {
        let stream = EventStream::new(|e| matches!(e.kind, EventKind::TurnStart { turn: 3 }));
        stream.push(turn(1));
        stream.push(turn(3));
        assert!(stream.is_closed());
        assert!(!stream.push(turn(4)));
    }

    #[tokio::test]
    async fn into_stream_adapter() {
        let stream = EventStream::for_run();
        stream.push(turn(1));
        stream.push(end());
        let collected: Vec<AgentEvent> = stream.subscribe().into_stream().collect().await;
        assert_eq!(collected.len(), 2);
    }
}
