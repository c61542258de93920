use tokio::task::AbortHandle;

use crate::obs::metrics::{KIND_POLICY, KIND_REGISTER};

/// Orchestrator life-cycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built; initialization task not run yet.
    Uninitialized,
    /// Not registered and no auth token available.
    AwaitingToken,
    /// Register request outstanding.
    Registering,
    /// Policy request outstanding.
    FetchingPolicy,
    /// Last fetch succeeded; refresh scheduled.
    Idle,
    /// Last attempt failed; retry scheduled.
    ErrorBackoff,
    /// Token source or backend said the client is not managed.
    Unmanaged,
    /// `shutdown()` called.
    ShuttingDown,
}

impl Phase {
    /// No further network activity will be started.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Unmanaged | Phase::ShuttingDown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::AwaitingToken => "awaiting_token",
            Phase::Registering => "registering",
            Phase::FetchingPolicy => "fetching_policy",
            Phase::Idle => "idle",
            Phase::ErrorBackoff => "error_backoff",
            Phase::Unmanaged => "unmanaged",
            Phase::ShuttingDown => "shutting_down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Register,
    Policy,
}

impl RequestKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            RequestKind::Register => KIND_REGISTER,
            RequestKind::Policy => KIND_POLICY,
        }
    }
}

/// What a fired timer should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerAction {
    /// Regular refresh after a successful fetch.
    Refresh,
    RetryPolicy,
    RetryRegister,
    /// Token source reported an error; try registering again.
    RetryToken,
}

#[derive(Debug)]
pub(crate) struct ScheduledTimer {
    pub(crate) generation: u64,
    pub(crate) action: TimerAction,
    pub(crate) abort: AbortHandle,
}

/// Mutable orchestrator state. Owning context only.
#[derive(Debug)]
pub(crate) struct FetchState {
    pub(crate) phase: Phase,
    /// Registration credential.
    pub(crate) device_token: Option<String>,
    /// At most one register or policy request is outstanding.
    pub(crate) pending: Option<RequestKind>,
    pub(crate) timer: Option<ScheduledTimer>,
    pub(crate) timer_generation: u64,
    /// Consecutive failures, reset on success.
    pub(crate) register_failures: u32,
    pub(crate) policy_failures: u32,
}

impl FetchState {
    pub(crate) fn new(device_token: Option<String>) -> Self {
        Self {
            phase: Phase::Uninitialized,
            device_token,
            pending: None,
            timer: None,
            timer_generation: 0,
            register_failures: 0,
            policy_failures: 0,
        }
    }

    /// Cancel the scheduled timer, if any. Idempotent.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(t) = self.timer.take() {
            t.abort.abort();
        }
    }
}
