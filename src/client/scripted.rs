//! Scripted in-memory client for multi-call workflow tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::ClientError;

use super::facade::RemoteClient;
use super::types::{Attributes, Operation};

type Reply = std::result::Result<Attributes, ClientError>;

/// Replays scripted replies per operation name and records every call.
///
/// The last reply queued for an operation repeats once the others are used.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<(String, Attributes)>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a reply for the named operation.
    pub fn on(&self, operation: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .expect("replies lock")
            .entry(operation.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queues a successful reply built from `(name, value)` pairs.
    pub fn ok(&self, operation: &str, attributes: &[(&str, super::AttrValue)]) -> &Self {
        let attributes = attributes
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        self.on(operation, Ok(attributes))
    }

    pub fn calls(&self) -> Vec<(String, Attributes)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|(name, _)| name).collect()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(name, _)| name == operation)
            .count()
    }
}

#[async_trait]
impl RemoteClient for ScriptedClient {
    async fn invoke(&self, operation: &Operation, request: Attributes) -> Reply {
        self.calls
            .lock()
            .expect("calls lock")
            .push((operation.name.clone(), request));

        let mut replies = self.replies.lock().expect("replies lock");
        match replies.get_mut(&operation.name) {
            Some(queue) if queue.len() > 1 => queue.pop_front().expect("non-empty queue"),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ClientError::fatal(&operation.name, "no reply scripted"))),
            None => Err(ClientError::fatal(&operation.name, "no reply scripted")),
        }
    }

    fn backend_type(&self) -> &'static str {
        "scripted"
    }
}
