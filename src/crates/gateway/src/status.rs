//! Observable instance status.
//!
//! The latest [`StatusSnapshot`] is held in a `watch` channel, so readers
//! always see a complete, recent state without locking the engine. Every
//! applied state change is also broadcast as a [`StatusTransition`].

use crate::state::InstanceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const TRANSITION_CAPACITY: usize = 256;

/// Request counters of one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetrics {
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Every classified provider error, including ones later retried.
    pub total_errors: u64,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub min_latency_ms: Option<u64>,
    pub max_latency_ms: Option<u64>,
    pub avg_latency_ms: f64,
    pub last_latency_ms: Option<u64>,
}

impl InstanceMetrics {
    pub fn total_requests(&self) -> u64 {
        self.successful_requests + self.failed_requests
    }

    pub fn record_success(&mut self, latency_ms: u64, prompt: u64, completion: u64, total: u64) {
        self.successful_requests += 1;
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += total;

        let n = self.successful_requests as f64;
        self.avg_latency_ms += (latency_ms as f64 - self.avg_latency_ms) / n;
        self.min_latency_ms = Some(self.min_latency_ms.map_or(latency_ms, |m| m.min(latency_ms)));
        self.max_latency_ms = Some(self.max_latency_ms.map_or(latency_ms, |m| m.max(latency_ms)));
        self.last_latency_ms = Some(latency_ms);
    }

    pub fn record_failure(&mut self) {
        self.failed_requests += 1;
    }

    pub fn record_error(&mut self) {
        self.total_errors += 1;
    }
}

/// Reachability of the provider as last observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
    AuthFailed,
}

/// Point-in-time view of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub instance: String,
    pub state: InstanceState,
    pub provider: String,
    pub model: String,
    pub endpoint: String,
    pub system_prompt: Option<String>,
    pub last_question: Option<String>,
    pub last_response: Option<String>,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    /// Seconds since `started_at`, as of `last_updated` or the last read.
    #[serde(default)]
    pub uptime_secs: i64,
    pub metrics: InstanceMetrics,
    pub queue_depth: usize,
    pub history_size: usize,
    pub is_processing: bool,
    pub is_rate_limited: bool,
    pub is_maintenance: bool,
    pub endpoint_status: EndpointStatus,
}

impl StatusSnapshot {
    pub fn new(instance: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            instance: instance.into(),
            state: InstanceState::Initializing,
            provider: String::new(),
            model: String::new(),
            endpoint: String::new(),
            system_prompt: None,
            last_question: None,
            last_response: None,
            last_error: None,
            last_updated: now,
            started_at: now,
            uptime_secs: 0,
            metrics: InstanceMetrics::default(),
            queue_depth: 0,
            history_size: 0,
            is_processing: false,
            is_rate_limited: false,
            is_maintenance: false,
            endpoint_status: EndpointStatus::Unknown,
        }
    }

    /// Stamp `last_updated` and refresh the uptime.
    pub fn touch(&mut self) {
        let now = Utc::now();
        self.last_updated = now;
        self.uptime_secs = (now - self.started_at).num_seconds().max(0);
    }
}

/// A state change that was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: InstanceState,
    pub to: InstanceState,
    pub at: DateTime<Utc>,
}

/// Owner of the status channels of one instance.
#[derive(Debug)]
pub struct StatusPublisher {
    snapshot: watch::Sender<StatusSnapshot>,
    transitions: broadcast::Sender<StatusTransition>,
}

impl StatusPublisher {
    pub fn new(initial: StatusSnapshot) -> Self {
        let (snapshot, _) = watch::channel(initial);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            snapshot,
            transitions,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        let mut snapshot = self.snapshot.borrow().clone();
        snapshot.uptime_secs = (Utc::now() - snapshot.started_at).num_seconds().max(0);
        snapshot
    }

    pub fn state(&self) -> InstanceState {
        self.snapshot.borrow().state
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn subscribe_transitions(&self) -> broadcast::Receiver<StatusTransition> {
        self.transitions.subscribe()
    }

    /// Modify non-state fields of the snapshot.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut StatusSnapshot),
    {
        self.snapshot.send_modify(|snap| {
            f(snap);
            snap.touch();
        });
    }

    /// Move to `to` if the transition table allows it.
    ///
    /// Returns whether the state changed. Same-state requests are no-ops;
    /// illegal ones are logged and ignored.
    pub fn transition(&self, to: InstanceState) -> bool {
        self.transition_if(to, |_| true)
    }

    /// Like [`transition`](Self::transition), but only when `guard` accepts
    /// the current state. The check and the change happen atomically.
    pub fn transition_if<G>(&self, to: InstanceState, guard: G) -> bool
    where
        G: FnOnce(InstanceState) -> bool,
    {
        let mut applied = None;

        self.snapshot.send_if_modified(|snap| {
            let from = snap.state;
            if from == to || !guard(from) {
                return false;
            }
            if !from.can_transition_to(to) {
                warn!(instance = %snap.instance, from = %from, to = %to, "Ignoring invalid state transition");
                return false;
            }

            snap.state = to;
            snap.is_processing = to.is_busy();
            snap.is_rate_limited = to == InstanceState::RateLimited;
            snap.is_maintenance = to == InstanceState::Maintenance;
            snap.touch();
            applied = Some((snap.instance.clone(), from));
            true
        });

        match applied {
            Some((instance, from)) => {
                debug!(instance = %instance, from = %from, to = %to, "State changed");
                let _ = self.transitions.send(StatusTransition {
                    from,
                    to,
                    at: Utc::now(),
                });
                true
            }
            None => false,
        }
    }
}
