//! Stub Gateway
//!
//! Testing gateway that returns scripted responses without network
//! calls. Records every prompt and tracks the maximum number of
//! concurrent in-flight calls so scheduler tests can assert ordering
//! and the global concurrency bound.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::gateway::{GatewayError, LlmGateway};
use crate::types::CompletionRequest;

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Stub gateway for testing
pub struct StubGateway {
    name: String,
    responder: Responder,
    /// Optional artificial latency per call
    delay: Option<Duration>,
    /// Number of leading calls that fail with a transport-style error
    fail_first: AtomicUsize,
    /// Number of leading calls that return an empty string
    empty_first: AtomicUsize,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubGateway {
    /// Stub that echoes a fixed response
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_responder(name, |_| "stub response".to_string())
    }

    /// Stub whose response is computed from the prompt
    pub fn with_responder(
        name: impl Into<String>,
        responder: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            responder: Box::new(responder),
            delay: None,
            fail_first: AtomicUsize::new(0),
            empty_first: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Add artificial latency so concurrent calls overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the first `n` calls with an error
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Return an empty string for the first `n` calls
    pub fn empty_first(self, n: usize) -> Self {
        self.empty_first.store(n, Ordering::SeqCst);
        self
    }

    /// All prompts seen so far, in completion order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Number of calls seen so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }

    /// Highest number of concurrently outstanding calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn take_injected(&self, counter: &AtomicUsize) -> bool {
        loop {
            let current = counter.load(Ordering::SeqCst);
            if current == 0 {
                return false;
            }
            if counter
                .compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }
}

#[async_trait]
impl LlmGateway for StubGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        self.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.calls
            .lock()
            .expect("calls lock")
            .push(request.prompt.clone());

        let result = if self.take_injected(&self.fail_first) {
            Err(GatewayError::Malformed("injected failure".to_string()))
        } else if self.take_injected(&self.empty_first) {
            Ok(String::new())
        } else {
            Ok((self.responder)(&request.prompt))
        };

        self.exit();
        result
    }

    async fn stream_complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<String>, GatewayError> {
        // Emit the scripted response in chunks for realism
        let full = self.complete(request).await?;
        let mut chunks = Vec::new();
        let mut chars = full.chars().peekable();
        while chars.peek().is_some() {
            let chunk: String = chars.by_ref().take(20).collect();
            chunks.push(chunk);
        }
        Ok(chunks)
    }
}
