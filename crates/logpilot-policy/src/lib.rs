//! The safety guard: classifies a candidate remote command as dangerous or
//! safe before the router lets it anywhere near a remote session.
//!
//! Classification is delegated to the reasoning oracle, but the contract is
//! owned here: the input is the exact literal command text about to run and
//! any oracle failure or unparseable verdict is treated as dangerous.

use logpilot_core::{GuardConfig, SafetyVerdict, Turn};
use logpilot_llm::{ChatRequest, ReasoningClient};
use std::sync::Arc;

const GUARD_SYSTEM_PROMPT: &str = "You are a shell command safety classifier for a \
production server. Given one command, reply with exactly one line: either \
'SAFE' or 'DANGEROUS: <short reason>'. A command is DANGEROUS if it can \
destroy data, change system state irreversibly, exfiltrate secrets, or \
disrupt running services. Read-only inspection commands are SAFE. Reply with \
nothing but the verdict line.";

pub struct SafetyGuard {
    oracle: Arc<dyn ReasoningClient + Send + Sync>,
    model: String,
    max_tokens: u32,
}

impl SafetyGuard {
    pub fn new(
        oracle: Arc<dyn ReasoningClient + Send + Sync>,
        default_model: &str,
        cfg: &GuardConfig,
    ) -> Self {
        let model = if cfg.model.is_empty() {
            default_model.to_string()
        } else {
            cfg.model.clone()
        };
        Self {
            oracle,
            model,
            max_tokens: cfg.max_tokens,
        }
    }

    /// Assess one literal command string. Re-evaluated on every call; the
    /// verdict is never cached across commands.
    pub fn assess(&self, command: &str) -> SafetyVerdict {
        let request = ChatRequest {
            model: self.model.clone(),
            turns: vec![
                Turn::System {
                    content: GUARD_SYSTEM_PROMPT.to_string(),
                },
                Turn::User {
                    content: format!("Command:\n{command}"),
                },
            ],
            tools: vec![],
            max_tokens: self.max_tokens,
            temperature: Some(0.0),
        };

        match self.oracle.complete(&request) {
            Ok(reply) => parse_verdict(&reply.text),
            Err(e) => SafetyVerdict::dangerous(format!("safety oracle unavailable: {e}")),
        }
    }
}

/// Parse the oracle's verdict line. Anything that is not a recognizable
/// SAFE/DANGEROUS answer fails closed.
fn parse_verdict(text: &str) -> SafetyVerdict {
    let line = text.trim().lines().next().unwrap_or("").trim();
    let upper = line.to_ascii_uppercase();

    if upper == "SAFE" {
        return SafetyVerdict::safe();
    }
    if let Some(rest) = upper.strip_prefix("DANGEROUS") {
        let reason = line[line.len() - rest.len()..]
            .trim_start_matches(':')
            .trim();
        return if reason.is_empty() {
            SafetyVerdict::dangerous("classified as dangerous")
        } else {
            SafetyVerdict::dangerous(reason)
        };
    }

    SafetyVerdict::dangerous(format!("unrecognized safety verdict: {line:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use logpilot_core::GuardConfig;
    use logpilot_testkit::{ScriptedClient, ScriptedReply};

    fn guard_with(replies: Vec<ScriptedReply>) -> (SafetyGuard, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient::new(replies));
        let guard = SafetyGuard::new(client.clone(), "deepseek-chat", &GuardConfig::default());
        (guard, client)
    }

    #[test]
    fn safe_verdicts_pass_through() {
        let (guard, _) = guard_with(vec![ScriptedReply::text("SAFE")]);
        let verdict = guard.assess("docker logs caddy");
        assert!(!verdict.dangerous);
    }

    #[test]
    fn dangerous_verdicts_carry_the_reason() {
        let (guard, _) = guard_with(vec![ScriptedReply::text(
            "DANGEROUS: recursively deletes the filesystem",
        )]);
        let verdict = guard.assess("rm -rf /");
        assert!(verdict.dangerous);
        assert_eq!(
            verdict.reason.as_deref(),
            Some("recursively deletes the filesystem")
        );
    }

    #[test]
    fn oracle_errors_fail_closed() {
        let (guard, _) = guard_with(vec![ScriptedReply::fail("connection reset")]);
        let verdict = guard.assess("uptime");
        assert!(verdict.dangerous);
        assert!(verdict.reason.unwrap().contains("safety oracle unavailable"));
    }

    #[test]
    fn malformed_verdicts_fail_closed() {
        for reply in ["", "maybe?", "sure, that looks fine to run", "SAFEish"] {
            let (guard, _) = guard_with(vec![ScriptedReply::text(reply)]);
            let verdict = guard.assess("uptime");
            assert!(verdict.dangerous, "reply {reply:?} must fail closed");
        }
    }

    #[test]
    fn verdict_is_parsed_case_insensitively() {
        let (guard, _) = guard_with(vec![ScriptedReply::text("safe")]);
        assert!(!guard.assess("df -h").dangerous);
        let (guard, _) = guard_with(vec![ScriptedReply::text("dangerous: wipes disk")]);
        let verdict = guard.assess("mkfs /dev/sda");
        assert!(verdict.dangerous);
        assert_eq!(verdict.reason.as_deref(), Some("wipes disk"));
    }

    #[test]
    fn the_literal_command_reaches_the_oracle() {
        let (guard, client) = guard_with(vec![ScriptedReply::text("SAFE")]);
        guard.assess("journalctl -u caddy --since today");
        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        let prompt = match &requests[0].turns[1] {
            Turn::User { content } => content.clone(),
            other => panic!("expected user turn, got {other:?}"),
        };
        assert!(prompt.contains("journalctl -u caddy --since today"));
    }
}
