//! Deterministic doubles for the reasoning service and the remote
//! transport, so router and guard behavior can be tested without a network.

use anyhow::{anyhow, Result};
use logpilot_core::ToolCall;
use logpilot_llm::{ChatRequest, ReasoningClient, ReasoningReply};
use logpilot_remote::{HostEntry, RemoteError};
use logpilot_tools::RemoteExec;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One scripted oracle response.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    ToolCalls {
        text: String,
        calls: Vec<(String, Value)>,
    },
    Fail(String),
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self::ToolCalls {
            text: String::new(),
            calls: vec![(name.into(), args)],
        }
    }

    pub fn tool_calls(calls: Vec<(String, Value)>) -> Self {
        Self::ToolCalls {
            text: String::new(),
            calls,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }
}

/// Replays a fixed script of replies and records every request it saw.
/// Running past the end of the script is a test bug and fails loudly.
pub struct ScriptedClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedClient {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("replies").len()
    }
}

impl ReasoningClient for ScriptedClient {
    fn complete(&self, req: &ChatRequest) -> Result<ReasoningReply> {
        self.requests.lock().expect("requests").push(req.clone());
        let next = self
            .replies
            .lock()
            .expect("replies")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted client ran out of replies"))?;
        match next {
            ScriptedReply::Text(text) => Ok(ReasoningReply {
                text,
                tool_calls: vec![],
            }),
            ScriptedReply::ToolCalls { text, calls } => Ok(ReasoningReply {
                text,
                tool_calls: calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, args))| ToolCall {
                        id: format!("call_{i}"),
                        name,
                        args,
                    })
                    .collect(),
            }),
            ScriptedReply::Fail(message) => Err(anyhow!(message)),
        }
    }
}

enum RemoteBehavior {
    Succeed(String),
    Fail(RemoteError),
}

/// Records every command handed to the remote transport and returns a
/// canned outcome.
pub struct RecordingRemote {
    commands: Mutex<Vec<(String, String)>>,
    behavior: RemoteBehavior,
}

impl RecordingRemote {
    pub fn succeeding(output: impl Into<String>) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            behavior: RemoteBehavior::Succeed(output.into()),
        }
    }

    pub fn failing(error: RemoteError) -> Self {
        Self {
            commands: Mutex::new(Vec::new()),
            behavior: RemoteBehavior::Fail(error),
        }
    }

    /// `(host, command)` pairs in invocation order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().expect("commands").clone()
    }
}

impl RemoteExec for RecordingRemote {
    fn run(&self, host: &str, _entry: &HostEntry, command: &str) -> Result<String, RemoteError> {
        self.commands
            .lock()
            .expect("commands")
            .push((host.to_string(), command.to_string()));
        match &self.behavior {
            RemoteBehavior::Succeed(output) => Ok(output.clone()),
            RemoteBehavior::Fail(error) => Err(clone_remote_error(error)),
        }
    }
}

fn clone_remote_error(error: &RemoteError) -> RemoteError {
    match error {
        RemoteError::Connect { host, detail } => RemoteError::Connect {
            host: host.clone(),
            detail: detail.clone(),
        },
        RemoteError::Exec { status, output } => RemoteError::Exec {
            status: *status,
            output: output.clone(),
        },
        RemoteError::Transfer {
            remote_path,
            detail,
        } => RemoteError::Transfer {
            remote_path: remote_path.clone(),
            detail: detail.clone(),
        },
        RemoteError::HostNotFound(host) => RemoteError::HostNotFound(host.clone()),
        RemoteError::Registry { path, detail } => RemoteError::Registry {
            path: path.clone(),
            detail: detail.clone(),
        },
    }
}
