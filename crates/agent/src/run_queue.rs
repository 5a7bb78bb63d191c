//! Per-session run serialization.
//!
//! Every session keeps a tail: a shared future that settles when its most
//! recently enqueued run finishes. A new run waits on the previous tail and
//! becomes the new one, so runs within a session execute strictly in
//! enqueue order while different sessions never wait on each other.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Deserialize, Serialize};
use steerclaw_core::agent::{AgentResult, RunStatus};
use steerclaw_core::error::{Error, Result};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Point-in-time view of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub session_id: String,
    pub status: RunStatus,
    pub queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// How a runner's successful value maps onto a terminal status.
pub trait RunOutcome {
    fn status(&self) -> RunStatus {
        RunStatus::Completed
    }

    fn error(&self) -> Option<String> {
        None
    }
}

impl RunOutcome for () {}

impl RunOutcome for AgentResult {
    fn status(&self) -> RunStatus {
        self.status
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }
}

/// Resolves with the runner's result once it has run.
#[derive(Debug)]
pub struct RunHandle<T> {
    run_id: String,
    result: oneshot::Receiver<Result<T>>,
}

impl<T> RunHandle<T> {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn wait(self) -> Result<T> {
        self.result
            .await
            .unwrap_or_else(|_| Err(Error::Internal(format!("run {} was dropped", self.run_id))))
    }
}

type Tail = Shared<BoxFuture<'static, ()>>;

#[derive(Default)]
struct Runs {
    by_seq: BTreeMap<u64, RunMetadata>,
    index: HashMap<String, u64>,
    next_seq: u64,
}

#[derive(Default)]
struct Inner {
    runs: Mutex<Runs>,
    /// session id → (generation, tail)
    tails: Mutex<HashMap<String, (u64, Tail)>>,
    generation: AtomicU64,
}

impl Inner {
    fn runs(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tails(&self) -> MutexGuard<'_, HashMap<String, (u64, Tail)>> {
        self.tails.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Update the record enqueued as `seq`. A record replaced by a reused
    /// run id is gone, so its late updates are dropped.
    fn update(&self, seq: u64, f: impl FnOnce(&mut RunMetadata)) {
        if let Some(meta) = self.runs().by_seq.get_mut(&seq) {
            f(meta);
        }
    }

    fn release_tail(&self, session_id: &str, generation: u64) {
        let mut tails = self.tails();
        if tails.get(session_id).is_some_and(|(g, _)| *g == generation) {
            tails.remove(session_id);
        }
    }
}

#[derive(Clone, Default)]
pub struct RunQueue {
    inner: Arc<Inner>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_run_id() -> String {
        format!("run_{}", uuid::Uuid::new_v4().simple())
    }

    /// Schedule `runner` behind every run already enqueued for `session_id`.
    ///
    /// The returned metadata is the `queued` snapshot. A runner error is
    /// recorded on the run and handed back through the handle; a panic is
    /// recorded the same way and never poisons the session's chain.
    pub fn enqueue<T, F, Fut>(
        &self,
        session_id: &str,
        run_id: Option<String>,
        runner: F,
    ) -> (RunMetadata, RunHandle<T>)
    where
        T: RunOutcome + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let run_id = run_id.unwrap_or_else(Self::create_run_id);
        let meta = RunMetadata {
            run_id: run_id.clone(),
            session_id: session_id.to_string(),
            status: RunStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            ended_at: None,
            error: None,
        };
        let seq = {
            let mut runs = self.inner.runs();
            let seq = runs.next_seq;
            runs.next_seq += 1;
            if let Some(old) = runs.index.insert(run_id.clone(), seq) {
                warn!(run_id = %run_id, "Run id reused, replacing earlier record");
                runs.by_seq.remove(&old);
            }
            runs.by_seq.insert(seq, meta.clone());
            seq
        };

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let session = session_id.to_string();
        let id = run_id.clone();

        let task = {
            let mut tails = self.inner.tails();
            let previous = tails.get(session_id).map(|(_, tail)| tail.clone());
            let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

            let task: Tail = async move {
                if let Some(previous) = previous {
                    previous.await;
                }

                inner.update(seq, |m| {
                    m.status = RunStatus::Running;
                    m.started_at = Some(Utc::now());
                });
                debug!(run_id = %id, session_id = %session, "Run started");

                let result = match AssertUnwindSafe(async move { runner().await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => Err(Error::Internal(format!(
                        "run panicked: {}",
                        panic_message(payload.as_ref())
                    ))),
                };

                let (status, error) = match &result {
                    Ok(outcome) => (outcome.status(), outcome.error()),
                    Err(Error::Aborted(reason)) => (RunStatus::Aborted, Some(reason.clone())),
                    Err(e @ Error::Timeout { .. }) => (RunStatus::Timeout, Some(e.to_string())),
                    Err(e) => (RunStatus::Error, Some(e.to_string())),
                };
                inner.update(seq, |m| {
                    m.status = status;
                    m.ended_at = Some(Utc::now());
                    m.error = error;
                });
                debug!(run_id = %id, session_id = %session, %status, "Run settled");

                inner.release_tail(&session, generation);
                // Nobody waiting on the handle is fine.
                let _ = tx.send(result);
            }
            .boxed()
            .shared();

            tails.insert(session_id.to_string(), (generation, task.clone()));
            task
        };
        tokio::spawn(task);

        (
            meta,
            RunHandle {
                run_id,
                result: rx,
            },
        )
    }

    pub fn get_run(&self, run_id: &str) -> Option<RunMetadata> {
        let runs = self.inner.runs();
        runs.index
            .get(run_id)
            .and_then(|seq| runs.by_seq.get(seq))
            .cloned()
    }

    /// Runs in enqueue order, optionally limited to one session.
    pub fn list_runs(&self, session_id: Option<&str>) -> Vec<RunMetadata> {
        self.inner
            .runs()
            .by_seq
            .values()
            .filter(|m| session_id.is_none_or(|s| m.session_id == s))
            .cloned()
            .collect()
    }

    /// Sessions with a run queued or in flight.
    pub fn busy_sessions(&self) -> usize {
        self.inner.tails().len()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}
