//! Per-instance FIFO job queue and the minimum-interval rate limiter.
//!
//! Callers get a [`JobHandle`] as soon as a job is queued. A single worker
//! pulls jobs through [`JobQueue::next`] in submission order and calls
//! [`RateLimiter::acquire`] before every provider call.

use crate::error::GatewayError;
use crate::query::{AskOverrides, AskResult};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use uuid::Uuid;

const JOB_QUEUED: u8 = 0;
const JOB_DISPATCHED: u8 = 1;
const JOB_CANCELLED: u8 = 2;

/// Shared dispatch state of one job.
#[derive(Debug, Clone, Default)]
struct JobState(Arc<AtomicU8>);

impl JobState {
    fn cancel(&self) -> bool {
        self.0
            .compare_exchange(JOB_QUEUED, JOB_CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn start(&self) -> bool {
        self.0
            .compare_exchange(JOB_QUEUED, JOB_DISPATCHED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst) == JOB_CANCELLED
    }
}

/// A queued question and everything needed to answer it.
#[derive(Debug)]
pub struct RequestJob {
    pub id: Uuid,
    pub question: String,
    pub overrides: AskOverrides,
    pub submitted_at: Instant,
    pub deadline: Instant,
    state: JobState,
    reply: oneshot::Sender<AskResult>,
}

impl RequestJob {
    /// Mark the job as dispatched. Fails if it was cancelled first.
    pub fn start(&self) -> bool {
        self.state.start()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Deliver the terminal result. A caller that stopped waiting is ignored.
    pub fn resolve(self, result: AskResult) {
        let _ = self.reply.send(result);
    }
}

/// Caller side of a queued job.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    instance: String,
    question: String,
    state: JobState,
    result: oneshot::Receiver<AskResult>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cancel the job if it has not been dispatched yet.
    ///
    /// Returns false when the provider call already started; that call runs
    /// to completion.
    pub fn cancel(&self) -> bool {
        self.state.cancel()
    }

    /// Wait for the terminal result.
    pub async fn result(self) -> AskResult {
        match self.result.await {
            Ok(result) => result,
            Err(_) => AskResult::rejected(
                self.instance.clone(),
                self.question,
                String::new(),
                &GatewayError::ShutDown(self.instance),
            ),
        }
    }
}

/// Submission side of an instance queue.
#[derive(Debug, Clone)]
pub struct Scheduler {
    instance: String,
    tx: mpsc::UnboundedSender<RequestJob>,
    depth: Arc<AtomicUsize>,
}

/// Worker side of an instance queue.
#[derive(Debug)]
pub struct JobQueue {
    rx: mpsc::UnboundedReceiver<RequestJob>,
    depth: Arc<AtomicUsize>,
}

impl Scheduler {
    /// Create a connected scheduler and queue.
    pub fn channel(instance: impl Into<String>) -> (Scheduler, JobQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Scheduler {
                instance: instance.into(),
                tx,
                depth: depth.clone(),
            },
            JobQueue { rx, depth },
        )
    }

    /// Queue a job. Never waits; fails only once the worker is gone.
    pub fn enqueue(
        &self,
        question: String,
        overrides: AskOverrides,
        deadline: Duration,
    ) -> Result<JobHandle, GatewayError> {
        let (reply, result) = oneshot::channel();
        let state = JobState::default();
        let now = Instant::now();
        let job = RequestJob {
            id: Uuid::new_v4(),
            question: question.clone(),
            overrides,
            submitted_at: now,
            deadline: now + deadline,
            state: state.clone(),
            reply,
        };
        let id = job.id;

        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::ShutDown(self.instance.clone()));
        }

        Ok(JobHandle {
            id,
            instance: self.instance.clone(),
            question,
            state,
            result,
        })
    }

    /// Jobs submitted and not yet taken by the worker.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl JobQueue {
    /// Next job in submission order; `None` once every scheduler is dropped
    /// and the queue is drained.
    pub async fn next(&mut self) -> Option<RequestJob> {
        let job = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    /// Jobs still waiting behind the current one.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs; already queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Enforces a minimum interval between provider calls.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_dispatch: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_dispatch: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Earliest instant the next call may start.
    pub fn ready_at(&self) -> Instant {
        match self.last_dispatch {
            Some(last) => last + self.interval,
            None => Instant::now(),
        }
    }

    /// Time left until the next call may start.
    pub fn wait_time(&self) -> Duration {
        self.ready_at().saturating_duration_since(Instant::now())
    }

    /// Wait for the interval to pass, then claim the dispatch slot.
    pub async fn acquire(&mut self) -> Instant {
        sleep_until(self.ready_at()).await;
        let now = Instant::now();
        self.last_dispatch = Some(now);
        now
    }
}
