//! Prompt templates. Kept in one place so wording changes never touch
//! router logic.

use logpilot_core::Turn;

pub const SYSTEM_PROMPT: &str = "You are LogPilot, a sysadmin assistant. You can chat, \
look things up with your local tools, and run commands on registered remote servers. \
Prefer tools over guessing. When the user asks about a server's state or logs, use the \
remote_command or log_tail tool rather than answering from memory. Be concise.";

pub const EXPLAIN_SYSTEM_PROMPT: &str = "You are a helpful sysadmin. Use the tool output \
in the conversation to answer the user's question. Quote the lines that support your \
answer. If the output does not contain relevant information, say 'I don't know'.";

const REMOTE_EXPLAIN_SYSTEM_PROMPT: &str = "You are a helpful sysadmin. A command was \
just run on a remote server on the user's behalf. First restate the question, the \
command, and its output exactly as given, then analyze what the output means for the \
user's question. Quote output lines that support your answer. If the output does not \
answer the question, say 'I don't know'.";

const IDENTIFY_HOST_SYSTEM_PROMPT: &str = "As a case-sensitive data extraction system, \
identify and return the server name from the following input. The server name must be \
extracted with its exact original capitalization. If no server name is present, output \
the literal string 'NONE'.\n\
Input: 'What is happening in server helium?'\nOutput: 'helium'\n\
Input: 'Deploy to Server PROD.'\nOutput: 'PROD'\n\
Input: 'Status on server dev.'\nOutput: 'dev'\n\
Input: 'No server specified in the request.'\nOutput: 'NONE'";

/// Fixed rejection turn appended when the safety guard blocks a command.
pub fn rejection_message(command: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!(
            "I won't run `{command}`: the safety check classified it as dangerous ({reason})."
        ),
        None => format!("I won't run `{command}`: the safety check classified it as dangerous."),
    }
}

/// Explanation request for a completed remote command. The question, the
/// command, and its output appear verbatim before any analysis.
pub fn remote_explanation_turns(question: &str, command: &str, output: &str) -> Vec<Turn> {
    vec![
        Turn::System {
            content: REMOTE_EXPLAIN_SYSTEM_PROMPT.to_string(),
        },
        Turn::User {
            content: format!(
                "User's Question: {question}\n\nCommand: {command}\n\nOutput:\n{output}"
            ),
        },
    ]
}

/// Host-name extraction request. The reply is either the name with its
/// original casing or the literal `NONE`.
pub fn identify_host_turns(question: &str) -> Vec<Turn> {
    vec![
        Turn::System {
            content: IDENTIFY_HOST_SYSTEM_PROMPT.to_string(),
        },
        Turn::User {
            content: format!("Your turn: {question}"),
        },
    ]
}
