//! Decoding of the generator's stream-json output.
//!
//! Every stdout line becomes a [`DecodedEvent`]. Lines that are not one of the
//! structured shapes we care about degrade to [`DecodedEvent::Unrecognized`]
//! so that their raw text can still be scanned for stage markers.

use serde::Deserialize;
use serde_json::Value;

/// Wire shape of the generator's stream-json lines.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// A tool invocation reported by the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub name: String,
    pub input: Value,
}

/// One decoded line of generator output.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    Assistant { texts: Vec<String>, tool_uses: Vec<ToolUse> },
    Result { text: String },
    Unrecognized { raw: String },
}

impl DecodedEvent {
    /// All text payloads carried by the event, regardless of its shape.
    pub fn text_payloads(&self) -> Vec<&str> {
        match self {
            DecodedEvent::Assistant { texts, .. } => texts.iter().map(String::as_str).collect(),
            DecodedEvent::Result { text } => vec![text.as_str()],
            DecodedEvent::Unrecognized { raw } => vec![raw.as_str()],
        }
    }

    pub fn tool_uses(&self) -> &[ToolUse] {
        match self {
            DecodedEvent::Assistant { tool_uses, .. } => tool_uses,
            _ => &[],
        }
    }
}

/// Decode a single line. Never fails: anything that isn't a recognized
/// structured event comes back as `Unrecognized` carrying the whole line.
pub fn decode_line(line: &str) -> DecodedEvent {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return DecodedEvent::Unrecognized {
            raw: line.to_string(),
        };
    }

    match serde_json::from_str::<StreamEvent>(trimmed) {
        Ok(StreamEvent::Assistant { message }) => {
            let mut texts = Vec::new();
            let mut tool_uses = Vec::new();
            for block in message.content {
                match block {
                    ContentBlock::Text { text } => texts.push(text),
                    ContentBlock::ToolUse { name, input } => tool_uses.push(ToolUse { name, input }),
                    ContentBlock::Other => {}
                }
            }
            DecodedEvent::Assistant { texts, tool_uses }
        }
        Ok(StreamEvent::Result { result }) => DecodedEvent::Result {
            text: result.unwrap_or_default(),
        },
        Err(_) => DecodedEvent::Unrecognized {
            raw: line.to_string(),
        },
    }
}

/// Extract a human-readable description from a tool use event
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let path = || {
        input
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(shorten_path)
            .unwrap_or_else(|| "file".to_string())
    };
    match name {
        "Read" => format!("Reading: {}", path()),
        "Write" => format!("Creating: {}", path()),
        "Edit" | "MultiEdit" => format!("Editing: {}", path()),
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        "Glob" => {
            let pattern = input.get("pattern").and_then(|v| v.as_str()).unwrap_or("*");
            format!("Searching: {}", pattern)
        }
        "Grep" => {
            let pattern = input
                .get("pattern")
                .and_then(|v| v.as_str())
                .map(|s| truncate_str(s, 30))
                .unwrap_or_else(|| "pattern".to_string());
            format!("Grep: {}", pattern)
        }
        "Task" => {
            let desc = input
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("subagent");
            format!("Agent: {}", desc)
        }
        _ => name.to_string(),
    }
}

/// Shorten a file path to just the last 2 components
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

/// Truncate a string with ellipsis, respecting char boundaries.
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
