use anyhow::{anyhow, Context, Result};
use logpilot_core::{LlmConfig, ToolCall, ToolDefinition, Turn};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;

/// A parsed reply from the reasoning service: free text plus any tool
/// invocation requests, in the order the model produced them.
#[derive(Debug, Clone, Default)]
pub struct ReasoningReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// One chat-completion request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub turns: Vec<Turn>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// The reasoning service seam. The router, the safety guard, and the host
/// identification helper all go through this trait so tests can substitute
/// a deterministic double.
pub trait ReasoningClient {
    fn complete(&self, req: &ChatRequest) -> Result<ReasoningReply>;
}

/// Blocking client for an OpenAI-style chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct HttpReasoningClient {
    cfg: LlmConfig,
    client: Client,
}

impl HttpReasoningClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self { cfg, client })
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.cfg.api_key_env).with_context(|| {
            format!(
                "API key not found: set the {} environment variable",
                self.cfg.api_key_env
            )
        })
    }
}

impl ReasoningClient for HttpReasoningClient {
    fn complete(&self, req: &ChatRequest) -> Result<ReasoningReply> {
        let api_key = self.api_key()?;
        let payload = build_payload(req);

        let mut last_err: Option<anyhow::Error> = None;
        let mut attempt: u8 = 0;
        while attempt <= self.cfg.max_retries {
            let response = self
                .client
                .post(&self.cfg.endpoint)
                .bearer_auth(&api_key)
                .json(&payload)
                .send();

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text()?;
                    if status.is_success() {
                        return parse_reply(&body);
                    }
                    last_err = Some(anyhow!(
                        "reasoning service returned {}: {}",
                        status,
                        truncate(&body, 400)
                    ));
                    if should_retry_status(status) && attempt < self.cfg.max_retries {
                        thread::sleep(retry_delay(self.cfg.retry_base_ms, attempt));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    last_err = Some(anyhow!("reasoning service transport error: {e}"));
                    if (e.is_timeout() || e.is_connect()) && attempt < self.cfg.max_retries {
                        thread::sleep(retry_delay(self.cfg.retry_base_ms, attempt));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("reasoning request failed without detail")))
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_delay(base_ms: u64, attempt: u8) -> Duration {
    Duration::from_millis(base_ms.saturating_mul(1 << attempt.min(6)))
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Map transcript turns onto wire messages. Tool call arguments are sent
/// as a JSON-encoded string per the chat-completions schema.
pub fn build_payload(req: &ChatRequest) -> Value {
    let messages: Vec<Value> = req
        .turns
        .iter()
        .map(|turn| match turn {
            Turn::System { content } => json!({"role": "system", "content": content}),
            Turn::User { content } => json!({"role": "user", "content": content}),
            Turn::Assistant {
                content,
                tool_calls,
            } => {
                let mut msg = json!({"role": "assistant"});
                if let Some(c) = content {
                    msg["content"] = json!(c);
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<Value> = tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.args.to_string(),
                                }
                            })
                        })
                        .collect();
                    msg["tool_calls"] = json!(calls);
                }
                msg
            }
            Turn::Tool {
                call_id, content, ..
            } => json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": content,
            }),
        })
        .collect();

    let mut payload = json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "stream": false,
    });
    if let Some(t) = req.temperature {
        payload["temperature"] = json!(t);
    }
    if !req.tools.is_empty() {
        payload["tools"] = serde_json::to_value(&req.tools).unwrap_or(Value::Null);
        payload["tool_choice"] = json!("auto");
    }
    payload
}

/// Parse a non-streaming chat-completions body into a `ReasoningReply`.
pub fn parse_reply(body: &str) -> Result<ReasoningReply> {
    let value: Value =
        serde_json::from_str(body).context("reasoning service returned invalid JSON")?;
    let message = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow!("reasoning reply missing choices[0].message"))?;

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let id = call
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let function = call
                .get("function")
                .ok_or_else(|| anyhow!("tool call missing function"))?;
            let name = function
                .get("name")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow!("tool call missing function name"))?
                .to_string();
            let args = match function.get("arguments").and_then(|v| v.as_str()) {
                Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)
                    .with_context(|| format!("tool call {name} has malformed arguments"))?,
                _ => json!({}),
            };
            tool_calls.push(ToolCall { id, name, args });
        }
    }

    Ok(ReasoningReply { text, tool_calls })
}
