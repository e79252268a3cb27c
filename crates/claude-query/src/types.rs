use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ─── Outer Message enum ───────────────────────────────────────────────────

/// One decoded line of `claude --output-format stream-json` output.
///
/// Discriminated on the wire by the JSON `"type"` field. Lines whose type is
/// not one of the four known kinds decode to [`Message::System`] with the raw
/// discriminator as `subtype`, so no line is ever dropped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Assistant(AssistantMessage),
    User(UserMessage),
    System(SystemMessage),
    Result(ResultMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Assistant,
    User,
    System,
    Result,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Assistant => "assistant",
            MessageType::User => "user",
            MessageType::System => "system",
            MessageType::Result => "result",
        }
    }
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Assistant(_) => MessageType::Assistant,
            Message::User(_) => MessageType::User,
            Message::System(_) => MessageType::System,
            Message::Result(_) => MessageType::Result,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Message::Assistant(m) => &m.session_id,
            Message::User(m) => &m.session_id,
            Message::System(m) => &m.session_id,
            Message::Result(m) => &m.session_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Message::Assistant(m) => m.created_at,
            Message::User(m) => m.created_at,
            Message::System(m) => m.created_at,
            Message::Result(m) => m.created_at,
        }
    }

    /// Content blocks carried by this message.
    ///
    /// System messages have none. A result message with a `result` string is
    /// rendered as a single synthetic text block.
    pub fn content(&self) -> Cow<'_, [ContentBlock]> {
        match self {
            Message::Assistant(m) => Cow::Borrowed(&m.content),
            Message::User(m) => Cow::Borrowed(&m.content),
            Message::System(_) => Cow::Borrowed(&[]),
            Message::Result(m) => match &m.result {
                Some(text) => Cow::Owned(vec![ContentBlock::Text { text: text.clone() }]),
                None => Cow::Borrowed(&[]),
            },
        }
    }

    /// Returns `Some(&ResultMessage)` if this is a result message.
    pub fn as_result(&self) -> Option<&ResultMessage> {
        if let Message::Result(r) = self {
            Some(r)
        } else {
            None
        }
    }
}

// ─── Conversation turns ───────────────────────────────────────────────────

/// `type = "assistant"`: model output, including tool calls.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

/// `type = "user"`: typically tool results fed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserMessage {
    pub content: Vec<ContentBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

// ─── System messages ──────────────────────────────────────────────────────

/// `type = "system"`, or any unrecognized message type.
///
/// Only `init` carries the tool/model fields; the rest are left empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemMessage {
    pub subtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpServerStatus {
    pub name: String,
    pub status: String,
}

// ─── Result messages ──────────────────────────────────────────────────────

/// `type = "result"`: the summary the agent emits when a run finishes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultMessage {
    pub subtype: String,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub is_error: bool,
    pub num_turns: u32,
    pub session_id: String,
    /// `None` unless the agent reported a cost greater than zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ResultMessage {
    pub fn result_text(&self) -> Option<&str> {
        self.result.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

// ─── Content blocks ───────────────────────────────────────────────────────

/// Content within an assistant or user message, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool inputs vary per tool, so they stay as raw JSON.
        input: serde_json::Map<String, serde_json::Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
        is_error: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentBlockType {
    Text,
    ToolUse,
    ToolResult,
}

impl ContentBlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentBlockType::Text => "text",
            ContentBlockType::ToolUse => "tool_use",
            ContentBlockType::ToolResult => "tool_result",
        }
    }
}

impl ContentBlock {
    pub fn block_type(&self) -> ContentBlockType {
        match self {
            ContentBlock::Text { .. } => ContentBlockType::Text,
            ContentBlock::ToolUse { .. } => ContentBlockType::ToolUse,
            ContentBlock::ToolResult { .. } => ContentBlockType::ToolResult,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        if let ContentBlock::Text { text } = self {
            Some(text)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_message(result: Option<&str>) -> Message {
        Message::Result(ResultMessage {
            subtype: "success".into(),
            duration_ms: 10,
            duration_api_ms: 8,
            is_error: false,
            num_turns: 1,
            session_id: "s1".into(),
            total_cost_usd: None,
            usage: None,
            result: result.map(str::to_owned),
            created_at: Utc::now(),
        })
    }

    #[test]
    fn result_text_becomes_synthetic_block() {
        let msg = result_message(Some("done"));
        let content = msg.content();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].as_text(), Some("done"));
        assert_eq!(msg.message_type(), MessageType::Result);
    }

    #[test]
    fn result_without_text_has_no_content() {
        assert!(result_message(None).content().is_empty());
    }

    #[test]
    fn assistant_content_is_borrowed_in_order() {
        let created_at = Utc::now();
        let msg = Message::Assistant(AssistantMessage {
            content: vec![
                ContentBlock::Text { text: "a".into() },
                ContentBlock::ToolUse {
                    id: "tu_1".into(),
                    name: "Read".into(),
                    input: serde_json::Map::new(),
                },
            ],
            parent_tool_use_id: None,
            session_id: "s1".into(),
            created_at,
        });
        let content = msg.content();
        assert!(matches!(content, Cow::Borrowed(_)));
        assert_eq!(content[1].block_type(), ContentBlockType::ToolUse);
        assert_eq!(msg.created_at(), created_at);
        assert_eq!(msg.session_id(), "s1");
    }

    #[test]
    fn type_tags_match_serialized_type_field() {
        let msg = result_message(Some("ok"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], msg.message_type().as_str());

        let blocks = [
            ContentBlock::Text { text: "a".into() },
            ContentBlock::ToolUse {
                id: "tu_1".into(),
                name: "Read".into(),
                input: serde_json::Map::new(),
            },
            ContentBlock::ToolResult {
                tool_use_id: "tu_1".into(),
                content: serde_json::Value::Null,
                is_error: false,
            },
        ];
        for block in &blocks {
            let value = serde_json::to_value(block).unwrap();
            assert_eq!(value["type"], block.block_type().as_str());
        }
        assert_eq!(MessageType::System.as_str(), "system");
    }

    #[test]
    fn serializes_with_type_tag() {
        let value = serde_json::to_value(result_message(Some("ok"))).unwrap();
        assert_eq!(value["type"], "result");
        assert_eq!(value["result"], "ok");
        assert!(value.get("total_cost_usd").is_none());
    }
}
