use logpilot_agent::Router;
use logpilot_core::{GuardConfig, LlmConfig, RouterState, Session, ToolsConfig, Turn};
use logpilot_policy::SafetyGuard;
use logpilot_remote::{HostEntry, HostRegistry};
use logpilot_testkit::{RecordingRemote, ScriptedClient, ScriptedReply};
use logpilot_tools::ToolRegistry;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

fn build_router(
    replies: Vec<ScriptedReply>,
    remote: Arc<RecordingRemote>,
) -> (Router, Arc<ScriptedClient>) {
    let client = Arc::new(ScriptedClient::new(replies));
    let hosts = HostRegistry::from_entries([(
        "helium".to_string(),
        HostEntry {
            username: "root".to_string(),
            key_path: "/keys/helium".to_string(),
        },
    )]);
    let tools = ToolRegistry::with_remote(hosts, ToolsConfig::default(), remote);
    let guard = SafetyGuard::new(client.clone(), "deepseek-chat", &GuardConfig::default());
    let router = Router::new(client.clone(), tools, guard, LlmConfig::default());
    (router, client)
}

#[test]
fn plain_chat_goes_straight_to_done() {
    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    let (router, client) = build_router(
        vec![ScriptedReply::text("Hello! Ask me about your servers.")],
        remote.clone(),
    );
    let mut session = Session::new();

    let answer = router.handle_turn(&mut session, "hi there").unwrap();
    assert_eq!(answer, "Hello! Ask me about your servers.");
    assert_eq!(session.state, RouterState::Done);
    // One reasoning call; no guard traffic, no tool execution.
    assert_eq!(client.requests().len(), 1);
    assert!(remote.commands().is_empty());
    assert_eq!(session.turns.len(), 2);
}

#[test]
fn dangerous_command_is_rejected_without_touching_the_remote() {
    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    let (router, client) = build_router(
        vec![
            ScriptedReply::tool_call(
                "remote_command",
                json!({"host": "helium", "command": "rm -rf /"}),
            ),
            ScriptedReply::text("DANGEROUS: recursively deletes the filesystem"),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    let answer = router.handle_turn(&mut session, "clean up the disk").unwrap();
    assert!(answer.contains("rm -rf /"));
    assert!(answer.contains("dangerous"));
    assert_eq!(session.state, RouterState::Done);
    // The remote transport was never reached.
    assert!(remote.commands().is_empty());
    // Router reply + guard verdict, no explanation call.
    assert_eq!(client.requests().len(), 2);
    // Transcript preserved: user turn still present, rejection appended last.
    assert!(matches!(&session.turns[0], Turn::User { content } if content == "clean up the disk"));
    assert!(
        matches!(session.turns.last(), Some(Turn::Assistant { content: Some(c), .. }) if c.contains("dangerous"))
    );
}

#[test]
fn safe_command_runs_and_gets_the_specialized_explanation() {
    let remote = Arc::new(RecordingRemote::succeeding(
        "caddy | restarted at 04:12 after OOM",
    ));
    let (router, client) = build_router(
        vec![
            ScriptedReply::tool_call(
                "remote_command",
                json!({"host": "helium", "command": "docker logs caddy"}),
            ),
            ScriptedReply::text("SAFE"),
            ScriptedReply::text("Caddy restarted at 04:12 after an OOM kill."),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    let answer = router
        .handle_turn(&mut session, "what happened to caddy on helium?")
        .unwrap();
    assert_eq!(answer, "Caddy restarted at 04:12 after an OOM kill.");
    assert_eq!(session.state, RouterState::Done);
    assert_eq!(
        remote.commands(),
        vec![("helium".to_string(), "docker logs caddy".to_string())]
    );

    let requests = client.requests();
    assert_eq!(requests.len(), 3);
    // The guard saw the literal command before execution.
    let guard_prompt = match &requests[1].turns[1] {
        Turn::User { content } => content.clone(),
        other => panic!("expected user turn, got {other:?}"),
    };
    assert!(guard_prompt.contains("docker logs caddy"));
    // The explanation request quotes question, command, and output verbatim.
    let explain_prompt = match &requests[2].turns[1] {
        Turn::User { content } => content.clone(),
        other => panic!("expected user turn, got {other:?}"),
    };
    assert!(explain_prompt.contains("what happened to caddy on helium?"));
    assert!(explain_prompt.contains("docker logs caddy"));
    assert!(explain_prompt.contains("caddy | restarted at 04:12 after OOM"));

    // The tool result landed in the transcript.
    assert!(session.turns.iter().any(|t| matches!(
        t,
        Turn::Tool { source, content, .. }
            if source == "remote_command" && content.contains("restarted at 04:12")
    )));
}

#[test]
fn guard_failure_fails_closed_and_blocks_execution() {
    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    let (router, _client) = build_router(
        vec![
            ScriptedReply::tool_call(
                "remote_command",
                json!({"host": "helium", "command": "uptime"}),
            ),
            ScriptedReply::fail("oracle timeout"),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    let answer = router.handle_turn(&mut session, "is helium up?").unwrap();
    assert!(answer.contains("dangerous"));
    assert!(remote.commands().is_empty());
    assert_eq!(session.state, RouterState::Done);
}

#[test]
fn unregistered_host_is_surfaced_without_opening_a_session() {
    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    let (router, _client) = build_router(
        vec![
            ScriptedReply::tool_call(
                "remote_command",
                json!({"host": "mystery", "command": "uptime"}),
            ),
            ScriptedReply::text("SAFE"),
            ScriptedReply::text("I couldn't reach that host: it isn't registered."),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    let answer = router.handle_turn(&mut session, "check mystery").unwrap();
    assert_eq!(answer, "I couldn't reach that host: it isn't registered.");
    assert!(remote.commands().is_empty());
    assert!(session.turns.iter().any(|t| matches!(
        t,
        Turn::Tool { content, .. } if content.contains("not registered")
    )));
}

#[test]
fn unknown_tool_is_surfaced_and_the_session_stays_usable() {
    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    let (router, client) = build_router(
        vec![
            ScriptedReply::tool_call("nonexistent_tool", json!({})),
            ScriptedReply::text("That tool does not exist, sorry."),
            ScriptedReply::text("All good, ask me something else."),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    let answer = router.handle_turn(&mut session, "do the thing").unwrap();
    assert_eq!(answer, "That tool does not exist, sorry.");
    assert!(session.turns.iter().any(|t| matches!(
        t,
        Turn::Tool { content, .. } if content.contains("unknown tool")
    )));
    assert_eq!(session.state, RouterState::Done);

    // Next turn re-enters the state machine cleanly.
    let answer = router.handle_turn(&mut session, "never mind").unwrap();
    assert_eq!(answer, "All good, ask me something else.");
    assert_eq!(session.state, RouterState::Done);
    assert_eq!(client.remaining(), 0);
}

#[test]
fn local_tool_skips_the_guard_entirely() {
    let mut log = tempfile::NamedTempFile::new().unwrap();
    log.write_all(b"boot ok\ndisk degraded\n").unwrap();
    let path = log.path().to_string_lossy().to_string();

    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    // Exactly two scripted replies: the tool call and the explanation.
    // A guard call would consume the explanation reply and exhaust the
    // script, failing this test.
    let (router, client) = build_router(
        vec![
            ScriptedReply::tool_call("log_tail", json!({"path": path, "lines": 1})),
            ScriptedReply::text("The last log line reports a degraded disk."),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    let answer = router.handle_turn(&mut session, "anything in the log?").unwrap();
    assert_eq!(answer, "The last log line reports a degraded disk.");
    assert_eq!(client.requests().len(), 2);
    assert!(remote.commands().is_empty());
    assert!(session.turns.iter().any(|t| matches!(
        t,
        Turn::Tool { source, content, .. } if source == "log_tail" && content == "disk degraded"
    )));
}

#[test]
fn only_the_first_tool_call_in_a_reply_is_acted_upon() {
    let remote = Arc::new(RecordingRemote::succeeding("14:02 up 3 days"));
    let (router, _client) = build_router(
        vec![
            ScriptedReply::tool_calls(vec![
                (
                    "remote_command".to_string(),
                    json!({"host": "helium", "command": "uptime"}),
                ),
                (
                    "remote_command".to_string(),
                    json!({"host": "helium", "command": "who"}),
                ),
            ]),
            ScriptedReply::text("SAFE"),
            ScriptedReply::text("helium has been up for three days."),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    router.handle_turn(&mut session, "how long has helium been up?").unwrap();
    assert_eq!(
        remote.commands(),
        vec![("helium".to_string(), "uptime".to_string())]
    );
}

#[test]
fn session_recovers_after_a_mid_turn_reasoning_outage() {
    let mut log = tempfile::NamedTempFile::new().unwrap();
    log.write_all(b"boot ok\n").unwrap();
    let path = log.path().to_string_lossy().to_string();

    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    let (router, client) = build_router(
        vec![
            ScriptedReply::tool_call("log_tail", json!({"path": path, "lines": 1})),
            // The explanation call dies, stranding the session mid-turn.
            ScriptedReply::fail("service unavailable"),
            ScriptedReply::text("Back online. The log looks healthy."),
        ],
        remote.clone(),
    );
    let mut session = Session::new();

    let err = router.handle_turn(&mut session, "anything in the log?").unwrap_err();
    assert!(err.to_string().contains("explanation"));
    assert_eq!(session.state, RouterState::Explaining);

    // The next turn abandons the stale state instead of wedging forever.
    let answer = router.handle_turn(&mut session, "still there?").unwrap();
    assert_eq!(answer, "Back online. The log looks healthy.");
    assert_eq!(session.state, RouterState::Done);
    assert_eq!(client.remaining(), 0);
}

#[test]
fn identify_host_returns_none_for_the_none_sentinel() {
    let remote = Arc::new(RecordingRemote::succeeding("unused"));
    let (router, _client) = build_router(
        vec![
            ScriptedReply::text("helium"),
            ScriptedReply::text("NONE"),
        ],
        remote,
    );
    assert_eq!(
        router.identify_host("what is up with server helium?").unwrap(),
        Some("helium".to_string())
    );
    assert_eq!(router.identify_host("hello there").unwrap(), None);
}
