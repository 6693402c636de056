//! # Mock Agents for Testing
//!
//! Agents with scripted, predictable behaviour. Every mock is `Clone` and
//! clones share their call history, so a test can keep one copy while the
//! registry owns another.

use async_trait::async_trait;
use conductor_core::{Agent, AgentContext, AgentError, AgentResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCall {
    pub input: String,
    pub context: AgentContext,
}

/// An agent that answers from a table of scripted responses
#[derive(Debug, Clone)]
pub struct MockAgent {
    name: String,
    responses: HashMap<String, Result<String, AgentError>>,
    default_response: Option<Result<String, AgentError>>,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<AgentCall>>>,
}

impl MockAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: HashMap::new(),
            default_response: None,
            delay: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Respond to an exact input
    pub fn with_response(mut self, input: impl Into<String>, response: impl Into<String>) -> Self {
        self.responses.insert(input.into(), Ok(response.into()));
        self
    }

    /// Fail on an exact input
    pub fn with_failure(mut self, input: impl Into<String>, error: impl Into<String>) -> Self {
        self.responses
            .insert(input.into(), Err(AgentError::failed(error)));
        self
    }

    /// Response for any unmatched input
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(Ok(response.into()));
        self
    }

    /// Failure for any unmatched input
    pub fn with_default_failure(mut self, error: impl Into<String>) -> Self {
        self.default_response = Some(Err(AgentError::failed(error)));
        self
    }

    /// Sleep before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Inputs received, in call order
    pub fn call_history(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.input.clone()).collect()
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        lock(&self.calls).clone()
    }

    pub fn last_context(&self) -> Option<AgentContext> {
        lock(&self.calls).last().map(|c| c.context.clone())
    }

    pub fn was_called_with(&self, input: &str) -> bool {
        lock(&self.calls).iter().any(|c| c.input == input)
    }

    pub fn reset(&self) {
        lock(&self.calls).clear();
    }
}

#[async_trait]
impl Agent for MockAgent {
    async fn invoke(&self, input: &str, context: &AgentContext) -> AgentResult<String> {
        lock(&self.calls).push(AgentCall {
            input: input.to_string(),
            context: context.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.responses.get(input).or(self.default_response.as_ref()) {
            Some(response) => response.clone(),
            None => Ok(format!("{} response for: {}", self.name, input)),
        }
    }
}

/// An agent that returns its input, optionally prefixed
#[derive(Debug, Clone, Default)]
pub struct EchoAgent {
    prefix: String,
    calls: Arc<AtomicUsize>,
}

impl EchoAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn invoke(&self, input: &str, _context: &AgentContext) -> AgentResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}{}", self.prefix, input))
    }
}

/// An agent that always fails
#[derive(Debug, Clone)]
pub struct FailingAgent {
    error: AgentError,
    calls: Arc<AtomicUsize>,
}

impl FailingAgent {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_error(AgentError::failed(message))
    }

    pub fn with_error(error: AgentError) -> Self {
        Self {
            error,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FailingAgent {
    async fn invoke(&self, _input: &str, _context: &AgentContext) -> AgentResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

/// An agent that fails a fixed number of times, then succeeds
#[derive(Debug, Clone)]
pub struct FlakyAgent {
    failures: usize,
    response: String,
    calls: Arc<AtomicUsize>,
}

impl FlakyAgent {
    pub fn new(failures: usize, response: impl Into<String>) -> Self {
        Self {
            failures,
            response: response.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for FlakyAgent {
    async fn invoke(&self, _input: &str, _context: &AgentContext) -> AgentResult<String> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            Err(AgentError::Unavailable(format!(
                "flaky failure {} of {}",
                attempt + 1,
                self.failures
            )))
        } else {
            Ok(self.response.clone())
        }
    }
}
