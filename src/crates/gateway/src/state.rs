//! Instance lifecycle states and the allowed transitions between them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Observable state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Initializing,
    Ready,
    Processing,
    Queued,
    Retrying,
    RateLimited,
    Maintenance,
    Error,
    Disconnected,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Initializing => "initializing",
            InstanceState::Ready => "ready",
            InstanceState::Processing => "processing",
            InstanceState::Queued => "queued",
            InstanceState::Retrying => "retrying",
            InstanceState::RateLimited => "rate_limited",
            InstanceState::Maintenance => "maintenance",
            InstanceState::Error => "error",
            InstanceState::Disconnected => "disconnected",
        }
    }

    /// States in which a provider call is pending or being waited on.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            InstanceState::Processing
                | InstanceState::Retrying
                | InstanceState::RateLimited
                | InstanceState::Maintenance
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `error` and `disconnected` are reachable from anywhere and are left
    /// again once a new request is queued or dispatched.
    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        use InstanceState::*;

        if matches!(next, Error | Disconnected) {
            return true;
        }

        match (self, next) {
            (Initializing, Ready) => true,
            (Ready, Queued | Processing) => true,
            (Queued, Processing | Ready) => true,
            (Processing, Ready | Queued | Retrying | RateLimited | Maintenance) => true,
            (Retrying | RateLimited | Maintenance, Processing) => true,
            (Error | Disconnected, Ready | Queued | Processing) => true,
            _ => false,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
