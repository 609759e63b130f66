pub mod prompt;

pub use prompt::{FailurePrompt, ScriptedPrompt};

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The operator chose to stop. Never handled as an ordinary failure; it
/// unwinds to the session driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Aborted by operator during {operation}")]
pub struct UserAbort {
    pub operation: String,
}

/// Operator answer after automatic retries are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryDecision {
    Retry,
    Skip,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Attempting,
    AutoRetrying,
    PromptingUser,
    Skipped,
    Aborted,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Completed(T),
    Skipped,
}

impl<T> RetryOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            RetryOutcome::Completed(value) => Some(value),
            RetryOutcome::Skipped => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RetryOutcome::Skipped)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures handled without asking; the next failure prompts
    pub max_auto_attempts: u32,
    pub delay: Duration,
    /// Whether an operator retry grants a fresh automatic budget
    pub reset_on_user_retry: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_auto_attempts: 3,
            delay: Duration::from_secs(1),
            reset_on_user_retry: false,
        }
    }
}

/// Error types that can travel through the retry engine.
pub trait RetryableError: fmt::Display + From<UserAbort> {
    fn is_user_abort(&self) -> bool;
}

enum Next {
    Again,
    Skip,
}

struct Escalation<'a, P: FailurePrompt + ?Sized> {
    policy: &'a RetryPolicy,
    prompt: &'a mut P,
    operation: &'a str,
    failures: u32,
}

impl<P: FailurePrompt + ?Sized> Escalation<'_, P> {
    fn transition(&self, state: RetryState) {
        log::debug!("{}: {:?} (failures: {})", self.operation, state, self.failures);
    }

    /// Decide what happens after a failure described by `reason`.
    fn on_failure(&mut self, reason: &str) -> Result<Next, UserAbort> {
        self.failures += 1;
        log::warn!("{} failed (attempt {}): {}", self.operation, self.failures, reason);

        if self.failures < self.policy.max_auto_attempts {
            self.transition(RetryState::AutoRetrying);
            if !self.policy.delay.is_zero() {
                thread::sleep(self.policy.delay);
            }
            self.transition(RetryState::Attempting);
            return Ok(Next::Again);
        }

        self.transition(RetryState::PromptingUser);
        let message = format!("{} failed: {}", self.operation, reason);
        match self.prompt.decide(&message) {
            RetryDecision::Retry => {
                if self.policy.reset_on_user_retry {
                    self.failures = 0;
                }
                self.transition(RetryState::Attempting);
                Ok(Next::Again)
            }
            RetryDecision::Skip => {
                self.transition(RetryState::Skipped);
                log::warn!("Skipping {}", self.operation);
                Ok(Next::Skip)
            }
            RetryDecision::Abort => {
                self.transition(RetryState::Aborted);
                log::error!("Operator aborted during {}", self.operation);
                Err(UserAbort {
                    operation: self.operation.to_string(),
                })
            }
        }
    }
}

/// Retry an operation that reports failure by returning `Ok(None)`.
///
/// `reason` is what the operator is told when a failure is escalated. Errors
/// returned by the operation are not retried; they propagate untouched.
pub fn retry_on_failure<T, E, P, F>(
    policy: &RetryPolicy,
    prompt: &mut P,
    operation: &str,
    reason: &str,
    mut op: F,
) -> Result<RetryOutcome<T>, E>
where
    E: RetryableError,
    P: FailurePrompt + ?Sized,
    F: FnMut() -> Result<Option<T>, E>,
{
    let mut escalation = Escalation { policy, prompt, operation, failures: 0 };
    escalation.transition(RetryState::Attempting);
    loop {
        if let Some(value) = op()? {
            escalation.transition(RetryState::Succeeded);
            return Ok(RetryOutcome::Completed(value));
        }
        match escalation.on_failure(reason)? {
            Next::Again => continue,
            Next::Skip => return Ok(RetryOutcome::Skipped),
        }
    }
}

/// Retry an operation while it fails with an error accepted by `handles`.
///
/// Errors `handles` rejects, and every [`UserAbort`], propagate immediately.
pub fn retry_on_exception<T, E, P, F, H>(
    policy: &RetryPolicy,
    prompt: &mut P,
    operation: &str,
    handles: H,
    mut op: F,
) -> Result<RetryOutcome<T>, E>
where
    E: RetryableError,
    P: FailurePrompt + ?Sized,
    F: FnMut() -> Result<T, E>,
    H: Fn(&E) -> bool,
{
    let mut escalation = Escalation { policy, prompt, operation, failures: 0 };
    escalation.transition(RetryState::Attempting);
    loop {
        match op() {
            Ok(value) => {
                escalation.transition(RetryState::Succeeded);
                return Ok(RetryOutcome::Completed(value));
            }
            Err(e) if e.is_user_abort() || !handles(&e) => return Err(e),
            Err(e) => match escalation.on_failure(&e.to_string())? {
                Next::Again => continue,
                Next::Skip => return Ok(RetryOutcome::Skipped),
            },
        }
    }
}
