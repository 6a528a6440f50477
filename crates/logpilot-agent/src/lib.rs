//! The dialogue router.
//!
//! One user turn drives the state machine Chatting → Routing →
//! {InvokingTool, VerifyingCommand, Done} → Explaining → Done. A candidate
//! remote command must pass the safety guard before the remote-command tool
//! runs; a rejection appends a fixed rejection turn and ends the turn with
//! the transcript preserved. Component failures (unknown host, unknown
//! tool, remote exec errors) are recovered here and rendered into the
//! transcript — nothing propagates past one router turn except a reasoning
//! service outage, and even that only fails the turn it interrupted: the
//! next turn abandons the stale state and starts over.

pub mod prompts;

use anyhow::Context;
use logpilot_core::{
    next_state, EventEnvelope, EventKind, LlmConfig, Result, RouterEvent, RouterState, Session,
    ToolCall, Turn,
};
use logpilot_llm::{ChatRequest, ReasoningClient, ReasoningReply};
use logpilot_observe::Observer;
use logpilot_policy::SafetyGuard;
use logpilot_tools::{ToolKind, ToolRegistry};
use std::sync::Arc;

pub struct Router {
    llm: Arc<dyn ReasoningClient + Send + Sync>,
    tools: ToolRegistry,
    guard: SafetyGuard,
    observer: Option<Observer>,
    llm_cfg: LlmConfig,
}

impl Router {
    pub fn new(
        llm: Arc<dyn ReasoningClient + Send + Sync>,
        tools: ToolRegistry,
        guard: SafetyGuard,
        llm_cfg: LlmConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            guard,
            observer: None,
            llm_cfg,
        }
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Process one user turn to completion. Returns the text of the final
    /// assistant turn (direct answer, explanation, or rejection notice).
    pub fn handle_turn(&self, session: &mut Session, user_input: &str) -> Result<String> {
        match session.state {
            RouterState::Chatting => {}
            RouterState::Done => self.advance(session, RouterEvent::UserTurnStarted)?,
            // A reasoning-service failure can abort a turn mid-flight; the
            // next turn abandons the stale state instead of wedging.
            _ => self.advance(session, RouterEvent::TurnAbandoned)?,
        }
        self.push_turn(
            session,
            Turn::User {
                content: user_input.to_string(),
            },
        );

        let reply = self
            .ask_with_tools(session)
            .context("reasoning service failed to produce a reply")?;

        let Some(first) = reply.tool_calls.first().cloned() else {
            self.advance(session, RouterEvent::ReplyWithoutTools)?;
            self.advance(session, RouterEvent::ReplyWithoutTools)?;
            let text = reply.text.clone();
            self.push_turn(
                session,
                Turn::Assistant {
                    content: Some(text.clone()),
                    tool_calls: vec![],
                },
            );
            return Ok(text);
        };

        // Single-invocation-per-turn policy: only the first tool call in a
        // reply is acted upon.
        if reply.tool_calls.len() > 1 {
            self.record(
                session,
                EventKind::ToolCallsIgnored {
                    count: reply.tool_calls.len() - 1,
                },
            );
        }

        let is_remote = ToolKind::from_name(&first.name) == Some(ToolKind::RemoteCommand);
        let routing_event = if is_remote {
            RouterEvent::ReplyWithRemoteCommand
        } else {
            RouterEvent::ReplyWithLocalTool
        };
        self.advance(session, routing_event)?;
        self.advance(session, routing_event)?;

        if is_remote {
            let command = first
                .args
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            let verdict = self.guard.assess(command);
            self.record(
                session,
                EventKind::GuardVerdict {
                    command: command.to_string(),
                    dangerous: verdict.dangerous,
                },
            );
            if verdict.dangerous {
                self.advance(session, RouterEvent::CommandRejected)?;
                let notice = prompts::rejection_message(command, verdict.reason.as_deref());
                self.push_turn(
                    session,
                    Turn::Assistant {
                        content: Some(notice.clone()),
                        tool_calls: vec![],
                    },
                );
                return Ok(notice);
            }
            self.advance(session, RouterEvent::CommandApproved)?;
            if let Some(host) = first.args.get("host").and_then(|v| v.as_str()) {
                self.record(
                    session,
                    EventKind::RemoteExec {
                        host: host.to_string(),
                    },
                );
            }
        }

        // Restore the acted-upon invocation request to the transcript.
        self.push_turn(
            session,
            Turn::Assistant {
                content: if reply.text.is_empty() {
                    None
                } else {
                    Some(reply.text.clone())
                },
                tool_calls: vec![first.clone()],
            },
        );

        self.record(
            session,
            EventKind::ToolProposed {
                name: first.name.clone(),
            },
        );
        let outcome = self.tools.invoke(&first);
        self.record(
            session,
            EventKind::ToolCompleted {
                name: outcome.name.clone(),
                success: outcome.success,
            },
        );
        let output = outcome.content.clone();
        self.push_turn(
            session,
            Turn::Tool {
                source: first.name.clone(),
                call_id: first.id.clone(),
                content: output.clone(),
            },
        );
        self.advance(session, RouterEvent::ToolResultAppended)?;

        let explanation = self
            .explain(session, &first, is_remote, &output)
            .context("reasoning service failed to produce an explanation")?;
        self.push_turn(
            session,
            Turn::Assistant {
                content: Some(explanation.clone()),
                tool_calls: vec![],
            },
        );
        self.advance(session, RouterEvent::ExplanationAppended)?;
        Ok(explanation)
    }

    /// Extract the server name the user is talking about, if any.
    pub fn identify_host(&self, question: &str) -> Result<Option<String>> {
        let reply = self.llm.complete(&ChatRequest {
            model: self.llm_cfg.model.clone(),
            turns: prompts::identify_host_turns(question),
            tools: vec![],
            max_tokens: 64,
            temperature: Some(0.0),
        })?;
        let name = reply.text.trim().trim_matches('\'').to_string();
        if name.is_empty() || name == "NONE" {
            Ok(None)
        } else {
            Ok(Some(name))
        }
    }

    fn ask_with_tools(&self, session: &Session) -> Result<ReasoningReply> {
        let mut turns = vec![Turn::System {
            content: prompts::SYSTEM_PROMPT.to_string(),
        }];
        turns.extend(session.turns.iter().cloned());
        self.llm.complete(&ChatRequest {
            model: self.llm_cfg.model.clone(),
            turns,
            tools: self.tools.definitions(),
            max_tokens: self.llm_cfg.max_tokens,
            temperature: self.llm_cfg.temperature,
        })
    }

    /// Ask for the explanation turn. Remote commands get the specialized
    /// template that quotes the question, the command, and the output
    /// verbatim; other tools are explained from the running transcript.
    fn explain(
        &self,
        session: &Session,
        call: &ToolCall,
        is_remote: bool,
        output: &str,
    ) -> Result<String> {
        let turns = if is_remote {
            let question = session.last_user_question().unwrap_or_default();
            let command = call
                .args
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            prompts::remote_explanation_turns(question, command, output)
        } else {
            let mut turns = vec![Turn::System {
                content: prompts::EXPLAIN_SYSTEM_PROMPT.to_string(),
            }];
            turns.extend(session.turns.iter().cloned());
            turns
        };
        let reply = self.llm.complete(&ChatRequest {
            model: self.llm_cfg.model.clone(),
            turns,
            tools: vec![],
            max_tokens: self.llm_cfg.max_tokens,
            temperature: self.llm_cfg.temperature,
        })?;
        Ok(reply.text)
    }

    fn advance(&self, session: &mut Session, event: RouterEvent) -> Result<()> {
        let from = session.state;
        let to = next_state(from, event)?;
        session.state = to;
        self.record(session, EventKind::StateChanged { from, to });
        Ok(())
    }

    fn push_turn(&self, session: &mut Session, turn: Turn) {
        let role = match &turn {
            Turn::System { .. } => "system",
            Turn::User { .. } => "user",
            Turn::Assistant { .. } => "assistant",
            Turn::Tool { .. } => "tool",
        };
        self.record(
            session,
            EventKind::TurnAppended {
                role: role.to_string(),
            },
        );
        session.push(turn);
    }

    fn record(&self, session: &Session, kind: EventKind) {
        if let Some(observer) = &self.observer {
            let _ = observer.record_event(&EventEnvelope::now(session.session_id, kind));
        }
    }
}
