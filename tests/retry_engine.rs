use std::cell::Cell;
use std::time::Duration;

use ipx_config_lib::retry::{
    retry_on_exception, retry_on_failure, RetryDecision, RetryOutcome, RetryPolicy,
    ScriptedPrompt,
};
use ipx_config_lib::serial::{ProtocolError, SerialError};
use ipx_config_lib::workflow::WorkflowError;

fn policy(max_auto_attempts: u32, reset_on_user_retry: bool) -> RetryPolicy {
    RetryPolicy {
        max_auto_attempts,
        delay: Duration::ZERO,
        reset_on_user_retry,
    }
}

fn no_response() -> WorkflowError {
    WorkflowError::Protocol(ProtocolError::Serial(SerialError::NoResponse))
}

#[test]
fn operator_retry_continues_the_count() {
    let calls = Cell::new(0);
    let mut prompt = ScriptedPrompt::new(vec![RetryDecision::Retry, RetryDecision::Skip]);

    let outcome = retry_on_failure(&policy(3, false), &mut prompt, "detect", "no sensors", || {
        calls.set(calls.get() + 1);
        Ok::<Option<()>, WorkflowError>(None)
    })
    .unwrap();

    assert_eq!(outcome, RetryOutcome::Skipped);
    // three automatic attempts, then one per operator retry
    assert_eq!(calls.get(), 4);
    assert_eq!(prompt.asked(), 2);
}

#[test]
fn operator_retry_can_reset_the_budget() {
    let calls = Cell::new(0);
    let mut prompt = ScriptedPrompt::new(vec![RetryDecision::Retry, RetryDecision::Skip]);

    retry_on_exception(
        &policy(2, true),
        &mut prompt,
        "calibrate",
        WorkflowError::is_device_failure,
        || {
            calls.set(calls.get() + 1);
            Err::<(), _>(no_response())
        },
    )
    .unwrap();

    assert_eq!(calls.get(), 4);
    assert_eq!(prompt.asked(), 2);
    assert!(prompt.messages()[0].starts_with("calibrate failed: "));
}

#[test]
fn success_after_failures_needs_no_prompt() {
    let calls = Cell::new(0);
    let mut prompt = ScriptedPrompt::new(vec![]);

    let outcome = retry_on_exception(
        &policy(3, false),
        &mut prompt,
        "status",
        WorkflowError::is_device_failure,
        || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(no_response())
            } else {
                Ok(calls.get())
            }
        },
    )
    .unwrap();

    assert_eq!(outcome, RetryOutcome::Completed(3));
    assert_eq!(prompt.asked(), 0);
}

#[test]
fn abort_propagates_as_user_abort() {
    let mut prompt = ScriptedPrompt::new(vec![RetryDecision::Abort]);
    let err = retry_on_exception(
        &policy(1, false),
        &mut prompt,
        "set baud",
        WorkflowError::is_device_failure,
        || Err::<(), _>(no_response()),
    )
    .unwrap_err();
    assert!(matches!(err, WorkflowError::Aborted(ref abort) if abort.operation == "set baud"));
}

#[test]
fn unhandled_errors_are_not_retried() {
    let calls = Cell::new(0);
    let mut prompt = ScriptedPrompt::new(vec![]);
    let err = retry_on_exception(
        &policy(3, false),
        &mut prompt,
        "classify",
        WorkflowError::is_device_failure,
        || {
            calls.set(calls.get() + 1);
            Err::<(), _>(WorkflowError::MixedSensorTypes(vec![1040001, 2001]))
        },
    )
    .unwrap_err();
    assert!(matches!(err, WorkflowError::MixedSensorTypes(_)));
    assert_eq!(calls.get(), 1);
    assert_eq!(prompt.asked(), 0);
}

#[test]
fn closure_prompt_is_accepted() {
    let mut asked = Vec::new();
    let mut prompt = |message: &str| {
        asked.push(message.to_string());
        RetryDecision::Skip
    };
    let outcome = retry_on_failure(&policy(1, false), &mut prompt, "detect", "Sensor count mismatch", || {
        Ok::<Option<()>, WorkflowError>(None)
    })
    .unwrap();
    assert!(outcome.is_skipped());
    assert_eq!(asked, vec!["detect failed: Sensor count mismatch".to_string()]);
}
