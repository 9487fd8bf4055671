//! Per-instance request lifecycle engine.
//!
//! An [`InstanceEngine`] owns the queue, the history store and the status of
//! one instance. Callers submit questions with [`InstanceEngine::ask`]; a
//! single worker task drains the queue in order, waits out the request
//! interval, drives the provider call through the retry policy, records the
//! outcome and publishes the new state before it takes the next job.

use crate::config::{InstanceSettings, SettingsUpdate};
use crate::context::ConversationContext;
use crate::error::{GatewayError, Result};
use crate::history::{HistoryLimits, HistoryRecord, HistoryStore, HistoryWindow, TokenCounts};
use crate::query::{AskOverrides, AskResult, HistoryEntry, HistoryQuery};
use crate::retry::{RetryController, RetryDecision};
use crate::scheduler::{JobHandle, JobQueue, RateLimiter, RequestJob, Scheduler};
use crate::state::InstanceState;
use crate::status::{EndpointStatus, StatusPublisher, StatusSnapshot, StatusTransition};
use crate::tokens::{HeuristicEstimator, TokenEstimator};
use llm::{ErrorKind, LlmError, NormalizedRequest, NormalizedResponse, Provider, ProviderAdapter};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

/// Builder for [`InstanceEngine`].
pub struct EngineBuilder {
    settings: InstanceSettings,
    history_dir: PathBuf,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    estimator: Arc<dyn TokenEstimator>,
}

impl EngineBuilder {
    /// Use this adapter instead of building one from the settings.
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Validate settings, open the history store and spawn the worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<InstanceEngine> {
        let settings = self.settings;
        let name = settings.name.clone();
        let status = StatusPublisher::new(StatusSnapshot::new(&name));

        settings.validate()?;

        let adapter: Arc<dyn ProviderAdapter> = match self.adapter {
            Some(adapter) => adapter,
            None => Arc::new(Provider::from_config(settings.provider_config())?),
        };
        let store = HistoryStore::open(&self.history_dir, &name, settings.history_limits())?;

        status.update(|s| {
            s.provider = settings.provider.as_str().to_string();
            s.model = settings.model.clone();
            s.endpoint = settings.endpoint.clone();
            s.system_prompt = settings.system_prompt.clone();
            s.history_size = store.len();
        });

        let shared = Arc::new(EngineShared {
            name: name.clone(),
            settings: RwLock::new(settings),
            adapter: RwLock::new(adapter),
            store: tokio::sync::Mutex::new(store),
            status,
            estimator: self.estimator,
            shutting_down: AtomicBool::new(false),
        });

        let (scheduler, queue) = Scheduler::channel(&name);
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), queue));

        shared.status.transition(InstanceState::Ready);
        info!(instance = %name, "Instance ready");

        Ok(InstanceEngine {
            name,
            shared,
            scheduler: Mutex::new(Some(scheduler)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

struct EngineShared {
    name: String,
    settings: RwLock<InstanceSettings>,
    adapter: RwLock<Arc<dyn ProviderAdapter>>,
    store: tokio::sync::Mutex<HistoryStore>,
    status: StatusPublisher,
    estimator: Arc<dyn TokenEstimator>,
    shutting_down: AtomicBool,
}

/// One configured instance and its worker.
pub struct InstanceEngine {
    name: String,
    shared: Arc<EngineShared>,
    scheduler: Mutex<Option<Scheduler>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InstanceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceEngine")
            .field("name", &self.name)
            .field("state", &self.shared.status.state())
            .finish()
    }
}

impl InstanceEngine {
    pub fn builder(settings: InstanceSettings, history_dir: impl Into<PathBuf>) -> EngineBuilder {
        EngineBuilder {
            settings,
            history_dir: history_dir.into(),
            adapter: None,
            estimator: Arc::new(HeuristicEstimator),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask a question and wait for the terminal result.
    ///
    /// Never fails: rejections and provider failures come back as an
    /// [`AskResult`] with `success == false`.
    pub async fn ask(&self, question: impl Into<String>, overrides: AskOverrides) -> AskResult {
        let question = question.into();
        match self.ask_with_handle(question.clone(), overrides) {
            Ok(handle) => handle.result().await,
            Err(err) => {
                debug!(instance = %self.name, error = %err, "Request rejected");
                AskResult::rejected(&self.name, question, self.settings().model, &err)
            }
        }
    }

    /// Queue a question and return a handle that can be awaited or cancelled.
    pub fn ask_with_handle(&self, question: impl Into<String>, overrides: AskOverrides) -> Result<JobHandle> {
        let question = question.into();
        if question.trim().is_empty() {
            return Err(GatewayError::InvalidRequest("question must not be empty".to_string()));
        }
        overrides.validate()?;

        let scheduler = self
            .scheduler
            .lock()
            .clone()
            .ok_or_else(|| GatewayError::ShutDown(self.name.clone()))?;
        let deadline = self.shared.settings.read().job_deadline();

        self.shared
            .status
            .transition_if(InstanceState::Queued, |state| !state.is_busy());
        let handle = scheduler.enqueue(question, overrides, deadline)?;
        let depth = scheduler.depth();
        self.shared.status.update(|s| s.queue_depth = depth);

        debug!(instance = %self.name, job_id = %handle.id(), queue_depth = depth, "Request queued");
        Ok(handle)
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> InstanceSettings {
        self.shared.settings.read().clone()
    }

    /// Replace the system prompt; `None` or blank clears it.
    pub fn set_system_prompt(&self, prompt: Option<String>) -> Result<()> {
        self.update_settings(SettingsUpdate {
            system_prompt: Some(prompt),
            ..Default::default()
        })
    }

    /// Validate and apply a settings change. Jobs already dispatched keep the
    /// settings they started with.
    pub fn update_settings(&self, update: SettingsUpdate) -> Result<()> {
        let mut settings = self.shared.settings.write();
        let next = update.apply_to(&settings)?;

        if settings.connection_changed(&next) {
            let provider = Provider::from_config(next.provider_config())?;
            *self.shared.adapter.write() = Arc::new(provider);
            info!(instance = %self.name, provider = %next.provider, endpoint = %next.endpoint, "Provider client rebuilt");
        }

        self.shared.status.update(|s| {
            s.provider = next.provider.as_str().to_string();
            s.model = next.model.clone();
            s.endpoint = next.endpoint.clone();
            s.system_prompt = next.system_prompt.clone();
        });
        *settings = next;
        Ok(())
    }

    /// Empty the active history. Counters are kept.
    pub async fn clear_history(&self) -> Result<()> {
        self.shared.store.lock().await.clear()?;
        self.shared.status.update(|s| s.history_size = 0);
        Ok(())
    }

    pub async fn recent_history(&self, n: usize) -> HistoryWindow {
        self.shared.store.lock().await.recent(n)
    }

    pub async fn get_history(&self, query: &HistoryQuery) -> Vec<HistoryEntry> {
        let window = self.shared.store.lock().await.snapshot();
        query.apply(&window)
    }

    /// Archived records of this instance, oldest first.
    pub async fn archived_history(&self) -> Result<Vec<HistoryRecord>> {
        self.shared.store.lock().await.archived_records()
    }

    pub async fn history_limits(&self) -> HistoryLimits {
        self.shared.store.lock().await.limits()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.shared.status.snapshot()
    }

    pub fn state(&self) -> InstanceState {
        self.shared.status.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StatusTransition> {
        self.shared.status.subscribe_transitions()
    }

    /// Check the provider connection and record the endpoint status.
    pub async fn check_connection(&self) -> std::result::Result<(), LlmError> {
        let adapter = self.shared.adapter.read().clone();
        let result = adapter.check_connection().await;

        let endpoint_status = match &result {
            Ok(()) => EndpointStatus::Connected,
            Err(e) if e.is_auth_error() => EndpointStatus::AuthFailed,
            Err(_) => EndpointStatus::Disconnected,
        };
        self.shared.status.update(|s| s.endpoint_status = endpoint_status);

        match &result {
            Ok(()) => debug!(instance = %self.name, "Provider reachable"),
            Err(e) => warn!(instance = %self.name, error = %e, "Provider check failed"),
        }
        result
    }

    /// Stop accepting work, let the in-flight job finish and release the store.
    ///
    /// Jobs still queued resolve as shut down without reaching the provider.
    pub async fn shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.scheduler.lock().take();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(instance = %self.name, error = %e, "Worker task ended abnormally");
            }
        }
        info!(instance = %self.name, "Instance shut down");
    }
}

async fn run_worker(shared: Arc<EngineShared>, mut queue: JobQueue) {
    let initial = shared.settings.read().clone();
    let mut limiter = RateLimiter::new(initial.request_interval);
    let mut jitter_seed = initial.retry.jitter_seed;
    let mut rng = initial.retry.rng();

    while let Some(job) = queue.next().await {
        let depth = queue.depth();
        shared.status.update(|s| s.queue_depth = depth);

        if shared.shutting_down.load(Ordering::SeqCst) {
            let model = shared.settings.read().model.clone();
            let result = AskResult::rejected(&shared.name, job.question.clone(), model, &GatewayError::ShutDown(shared.name.clone()));
            job.resolve(result);
            continue;
        }

        if !job.start() {
            debug!(instance = %shared.name, job_id = %job.id, "Skipping cancelled request");
            let model = shared.settings.read().model.clone();
            let result = AskResult::rejected(&shared.name, job.question.clone(), model, &GatewayError::Cancelled);
            job.resolve(result);
            if queue.depth() == 0 {
                shared
                    .status
                    .transition_if(InstanceState::Ready, |state| state == InstanceState::Queued);
            }
            continue;
        }

        let settings = shared.settings.read().clone();
        limiter.set_interval(settings.request_interval);
        if settings.retry.jitter_seed != jitter_seed {
            jitter_seed = settings.retry.jitter_seed;
            rng = settings.retry.rng();
        }

        let dispatched = shared.dispatch(&job, &settings, &mut limiter, &mut rng).await;
        let result = shared.finish(&job, &settings, dispatched, queue.depth()).await;

        // Jobs submitted while this one was in flight did not mark the
        // instance as queued, and may have arrived after `finish` read the depth.
        if queue.depth() > 0 {
            shared
                .status
                .transition_if(InstanceState::Queued, |state| !state.is_busy());
        }
        job.resolve(result);
    }

    debug!(instance = %shared.name, "Worker stopped");
}

/// Outcome of driving one job through the provider.
struct Dispatched {
    model: String,
    outcome: Result<NormalizedResponse>,
    elapsed_ms: u64,
}

impl EngineShared {
    async fn dispatch(
        &self,
        job: &RequestJob,
        settings: &InstanceSettings,
        limiter: &mut RateLimiter,
        rng: &mut StdRng,
    ) -> Dispatched {
        let started = Instant::now();
        let model = job.overrides.model.clone().unwrap_or_else(|| settings.model.clone());
        let request = self.build_request(job, settings, &model).await;

        let outcome = self.call_with_retry(job, settings, request, limiter, rng).await;

        Dispatched {
            model,
            outcome,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn build_request(&self, job: &RequestJob, settings: &InstanceSettings, model: &str) -> NormalizedRequest {
        let context_size = job.overrides.context_messages.unwrap_or(settings.context_messages);
        let max_tokens = job.overrides.max_tokens.unwrap_or(settings.max_tokens);
        let temperature = job.overrides.temperature.unwrap_or(settings.temperature);
        let system_prompt = job
            .overrides
            .system_prompt
            .as_deref()
            .or(settings.system_prompt.as_deref());

        let window = self.store.lock().await.snapshot();
        let mut context = ConversationContext::from_records(&window, context_size);
        context.fit_to_budget(&job.question, max_tokens, self.estimator.as_ref());

        debug!(
            instance = %self.name,
            job_id = %job.id,
            context = context.len(),
            model = %model,
            "Built request"
        );

        NormalizedRequest::new(model, context.into_messages(system_prompt, &job.question))
            .with_temperature(temperature)
            .with_max_tokens(max_tokens)
    }

    async fn call_with_retry(
        &self,
        job: &RequestJob,
        settings: &InstanceSettings,
        request: NormalizedRequest,
        limiter: &mut RateLimiter,
        rng: &mut StdRng,
    ) -> Result<NormalizedResponse> {
        let deadline_exceeded = GatewayError::DeadlineExceeded {
            deadline_secs: (job.deadline - job.submitted_at).as_secs_f64(),
        };
        let mut controller = RetryController::new(settings.retry.clone());

        loop {
            if job.deadline_passed() || limiter.ready_at() >= job.deadline {
                warn!(instance = %self.name, job_id = %job.id, "Deadline reached before dispatch");
                return Err(deadline_exceeded);
            }

            limiter.acquire().await;
            self.status.transition(InstanceState::Processing);
            let attempt = controller.record_attempt();

            let adapter = self.adapter.read().clone();
            let call = tokio::spawn({
                let request = request.clone();
                async move { adapter.send(request).await }
            });

            debug!(instance = %self.name, job_id = %job.id, attempt, "Dispatched provider call");

            let error = match timeout(job.remaining(), call).await {
                Err(_) => {
                    warn!(instance = %self.name, job_id = %job.id, attempt, "Provider answered after the deadline, discarding");
                    return Err(deadline_exceeded);
                }
                Ok(Ok(Ok(response))) => return Ok(response),
                Ok(Ok(Err(e))) => e,
                Ok(Err(join_error)) => LlmError::TransportError(format!("provider call aborted: {}", join_error)),
            };

            self.status.update(|s| {
                s.metrics.record_error();
                s.last_error = Some(error.to_string());
                if error.is_auth_error() {
                    s.endpoint_status = EndpointStatus::AuthFailed;
                }
            });

            match controller.decide(&error, rng) {
                RetryDecision::Fail => return Err(error.into()),
                RetryDecision::Retry { delay, state } => {
                    if Instant::now() + delay >= job.deadline {
                        warn!(instance = %self.name, job_id = %job.id, kind = %error.kind(), "Retry would pass the deadline, giving up");
                        return Err(error.into());
                    }

                    warn!(
                        instance = %self.name,
                        job_id = %job.id,
                        attempt,
                        max_attempts = settings.retry.max_attempts,
                        kind = %error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "Provider call failed, will retry"
                    );
                    self.status.transition(state);
                    sleep(delay).await;
                }
            }
        }
    }

    async fn finish(
        &self,
        job: &RequestJob,
        settings: &InstanceSettings,
        dispatched: Dispatched,
        pending: usize,
    ) -> AskResult {
        let Dispatched { model, outcome, elapsed_ms } = dispatched;
        let record = match &outcome {
            Ok(response) => {
                let tokens = TokenCounts::from_usage(
                    &response.usage,
                    self.estimator.estimate(&job.question),
                    self.estimator.estimate(&response.text),
                );
                HistoryRecord::success(
                    &self.name,
                    &job.question,
                    &response.text,
                    &response.model,
                    tokens,
                    response.latency.as_millis() as u64,
                )
                .requested(&model)
            }
            Err(err) => HistoryRecord::failure(&self.name, &job.question, &model, describe_failure(err), elapsed_ms),
        };

        let mut result = AskResult::from_record(&record);

        let history_size = {
            let mut store = self.store.lock().await;
            store.set_limits(settings.history_limits());
            match store.append(record.clone()) {
                Ok(appended) => {
                    if let Some(rotation) = appended.rotation_error {
                        result.warning = Some(format!("HistoryRotationError: {}", rotation));
                    }
                }
                Err(e) => {
                    error!(instance = %self.name, job_id = %job.id, error = %e, "Failed to persist history record");
                    result.warning = Some(format!("HistoryStorageError: {}", e));
                }
            }
            store.len()
        };

        let next_state = match &outcome {
            Ok(_) if pending > 0 => InstanceState::Queued,
            Ok(_) => InstanceState::Ready,
            Err(err) if is_transport_failure(err) => InstanceState::Disconnected,
            Err(_) => InstanceState::Error,
        };

        self.status.update(|s| {
            s.history_size = history_size;
            s.last_question = Some(record.question.clone());
            match &outcome {
                Ok(_) => {
                    s.last_response = Some(record.response.clone());
                    s.last_error = None;
                    s.endpoint_status = EndpointStatus::Connected;
                    s.metrics.record_success(
                        record.latency_ms,
                        record.tokens.prompt,
                        record.tokens.completion,
                        record.tokens.total,
                    );
                }
                Err(err) => {
                    s.last_error = record.error.clone();
                    s.metrics.record_failure();
                    if err.as_provider().is_none() {
                        s.metrics.record_error();
                    }
                    if next_state == InstanceState::Disconnected {
                        s.endpoint_status = EndpointStatus::Disconnected;
                    }
                }
            }
        });
        self.status.transition(next_state);

        match &outcome {
            Ok(_) => info!(
                instance = %self.name,
                job_id = %job.id,
                latency_ms = record.latency_ms,
                tokens = record.tokens.total,
                estimated = record.tokens.estimated,
                "Request completed"
            ),
            Err(err) => warn!(
                instance = %self.name,
                job_id = %job.id,
                code = err.code(),
                error = %err,
                "Request failed"
            ),
        }

        result
    }
}

fn is_transport_failure(err: &GatewayError) -> bool {
    err.as_provider().map(|e| e.kind()) == Some(ErrorKind::TransportError)
}

/// Error text stored with the record and returned to the caller.
fn describe_failure(err: &GatewayError) -> String {
    match err.as_provider().map(|e| e.kind()) {
        Some(ErrorKind::ContextTooLong) => format!(
            "{} (shorten the question or lower context_messages)",
            err
        ),
        _ => err.to_string(),
    }
}
