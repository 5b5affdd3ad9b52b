//! Typed events decoded from the agent's structured output stream, and the
//! completion summary folded from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What happened to a file the agent touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Created,
    Modified,
    Deleted,
}

/// One decoded unit from the agent's structured output stream.
///
/// Events are immutable once parsed; ownership transfers to the run
/// record's append-only event list. A line that is not valid structured
/// data becomes an [`AgentEvent::Error`] carrying the raw text, so one bad
/// line never aborts an otherwise successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental assistant text.
    MessageDelta { text: String },
    /// The agent invoked a tool.
    ToolCall { tool: String, args: Value },
    /// A tool returned to the agent.
    ToolResult { tool: String, output: String },
    /// The agent reports a file change.
    FileChange {
        path: String,
        action: FileAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    /// The agent ran a shell command.
    CommandRun {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
        duration_ms: u64,
    },
    /// An error reported by the agent, or a raw line that failed to parse.
    Error { message: String },
    /// The agent's final self-reported account of the run.
    Completion { payload: Value },
}

impl AgentEvent {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::MessageDelta { .. } => "message_delta",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::FileChange { .. } => "file_change",
            AgentEvent::CommandRun { .. } => "command_run",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Completion { .. } => "completion",
        }
    }
}

/// Test-result counts reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    #[serde(default)]
    pub passed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// Token usage reported by the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
}

/// The agent's schema-checked account of what it did.
///
/// Produced by folding the event list once a completion event or stream end
/// is observed; never mutated after creation. `synthesized` is true when no
/// completion event arrived and the summary was derived best-effort from
/// accumulated file-change and command events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestCounts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub tokens: TokenUsage,
    #[serde(default)]
    pub synthesized: bool,
}
