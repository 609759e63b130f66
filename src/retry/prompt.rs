use std::collections::VecDeque;

use super::RetryDecision;

/// Asks the operator what to do once automatic retries are exhausted.
pub trait FailurePrompt {
    /// `failure` is the error text, shown verbatim.
    fn decide(&mut self, failure: &str) -> RetryDecision;
}

impl<F> FailurePrompt for F
where
    F: FnMut(&str) -> RetryDecision,
{
    fn decide(&mut self, failure: &str) -> RetryDecision {
        self(failure)
    }
}

/// Answers from a fixed list, then aborts. Used for unattended runs and tests.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<RetryDecision>,
    messages: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new(answers: Vec<RetryDecision>) -> Self {
        Self {
            answers: answers.into(),
            messages: Vec::new(),
        }
    }

    /// Number of times the prompt was shown
    pub fn asked(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl FailurePrompt for ScriptedPrompt {
    fn decide(&mut self, failure: &str) -> RetryDecision {
        self.messages.push(failure.to_string());
        let answer = self.answers.pop_front().unwrap_or(RetryDecision::Abort);
        log::info!("Prompt '{}' answered with {:?}", failure, answer);
        answer
    }
}
