//! Stream session control
//!
//! A stream session is one user turn: the outbound submission plus the
//! streamed reply. [`StreamController`] owns every conversation's session
//! slot and guarantees at most one active session per conversation.
//!
//! ```text
//! Idle --submit--> Sending --2xx--> Streaming --EOF--> Finalizing --> Idle(Succeeded)
//!                     |                 |
//!                     +--failure--------+--------------------------> Idle(Failed)
//! any --cancel-------------------------------------------------------> Idle(Cancelled)
//! ```

pub mod controller;

use std::time::Duration;

use crate::config::{Config, Plan};
use crate::stream::TokenUsage;

pub use controller::{StreamController, DEFAULT_TITLE, GREETING};

/// Why a conversation's session slot is idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    /// No turn has run yet
    New,
    /// The last turn finished and was persisted
    Succeeded,
    /// The last turn failed (transport, timeout or backend error)
    Failed,
    /// The last turn was cancelled
    Cancelled,
}

/// State of a conversation's session slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No turn in flight
    Idle(IdleReason),
    /// Request sent, waiting for the response head
    Sending,
    /// Response body is being decoded
    Streaming,
    /// Body finished; persisting the turn
    Finalizing,
}

impl SessionState {
    /// True while a turn occupies the slot
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle(IdleReason::New) => write!(f, "idle"),
            SessionState::Idle(IdleReason::Succeeded) => write!(f, "idle (succeeded)"),
            SessionState::Idle(IdleReason::Failed) => write!(f, "idle (failed)"),
            SessionState::Idle(IdleReason::Cancelled) => write!(f, "idle (cancelled)"),
            SessionState::Sending => write!(f, "sending"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Finalizing => write!(f, "finalizing"),
        }
    }
}

/// How a submitted turn ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream ended and the turn was persisted
    Completed {
        /// Title reported by the backend, if any
        title: Option<String>,
        /// Usage reported by the backend, if any
        usage: Option<TokenUsage>,
    },
    /// The turn failed; the transcript carries a failure notice
    Failed {
        /// Human readable cause
        reason: String,
    },
    /// The turn was cancelled before it finished
    Cancelled,
}

/// Settings shared by every session of one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Identity sent as `user_id` and billed for usage
    pub identity: String,
    /// Longest allowed gap between response chunks
    pub idle_timeout: Duration,
    /// Account plan; `Pro` skips usage accounting
    pub plan: Plan,
}

impl ControllerSettings {
    /// Settings with the default idle timeout and the free plan
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            idle_timeout: Duration::from_secs(60),
            plan: Plan::Free,
        }
    }

    /// Build settings from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            identity: config.backend.identity.clone(),
            idle_timeout: Duration::from_secs(config.session.idle_timeout_seconds),
            plan: config.account.plan,
        }
    }

    /// Replace the idle timeout
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Replace the plan
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = plan;
        self
    }
}
