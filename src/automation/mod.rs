//! Automation collaborator
//!
//! The seam between the dispatch loop and the remote UI-automation
//! endpoint. Workers only see the trait; the HTTP mechanics live in
//! [`http::HttpAutomation`].

mod http;

pub use http::HttpAutomation;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::allocator::Allocation;
use crate::domain::TaskAction;

/// Errors from a single automation run
#[derive(Debug, Clone, Error)]
pub enum AutomationError {
    #[error("Failed to create session on {endpoint_url}: {message}")]
    SessionCreate { endpoint_url: String, message: String },

    #[error("Operation '{op}' failed: {message}")]
    Operation { op: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type AutomationResult = Result<Value, AutomationError>;

/// Executes one action on an allocated endpoint/device pair
#[async_trait]
pub trait Automation: Send + Sync {
    async fn run(&self, allocation: &Allocation, action: &TaskAction) -> AutomationResult;
}

/// Scripted automation for tests
pub mod mock {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a queue of canned outcomes; repeats the last one when empty
    pub struct MockAutomation {
        outcomes: Mutex<VecDeque<AutomationResult>>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl MockAutomation {
        pub fn new() -> Self {
            Self {
                outcomes: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn succeed_with(self, result: Value) -> Self {
            self.outcomes.lock().unwrap().push_back(Ok(result));
            self
        }

        pub fn fail_with(self, message: &str) -> Self {
            self.outcomes.lock().unwrap().push_back(Err(AutomationError::Operation {
                op: "mock".to_string(),
                message: message.to_string(),
            }));
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Default for MockAutomation {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Automation for MockAutomation {
        async fn run(&self, allocation: &Allocation, action: &TaskAction) -> AutomationResult {
            self.calls
                .lock()
                .unwrap()
                .push((allocation.endpoint_id.clone(), action.op_name().to_string()));

            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.pop_front().unwrap()
            } else {
                outcomes.front().cloned().unwrap_or(Ok(Value::Null))
            }
        }
    }
}
