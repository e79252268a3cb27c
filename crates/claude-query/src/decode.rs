//! Decoder for the agent's newline-delimited JSON output.
//!
//! Each non-empty line is one JSON object discriminated by `"type"`. The
//! decoder is lenient about field shapes: a field that is
//! missing or has the wrong JSON type is treated as absent. Only the
//! structure needed to pick a variant is fatal: valid JSON, an object, a
//! string `type`, and recognizable content blocks.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::DecodeFailure;
use crate::types::{
    AssistantMessage, ContentBlock, McpServerStatus, Message, ResultMessage, SystemMessage,
    Usage, UserMessage,
};
use crate::{ClaudeQueryError, Result};

type Object = Map<String, Value>;

/// Decode one line of agent output into a [`Message`].
///
/// Errors carry the raw line verbatim.
pub fn decode_line(line: &str) -> Result<Message> {
    decode_str(line).map_err(|reason| ClaudeQueryError::decode(line, reason))
}

/// Decode a fully buffered NDJSON document, skipping blank lines.
///
/// Stops at the first bad line; no partial list is returned.
pub fn decode_output(output: &str) -> Result<Vec<Message>> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(decode_line)
        .collect()
}

fn decode_str(line: &str) -> std::result::Result<Message, DecodeFailure> {
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(obj) = value else {
        return Err(DecodeFailure::NotAnObject);
    };
    decode_object(&obj)
}

fn decode_object(obj: &Object) -> std::result::Result<Message, DecodeFailure> {
    let message_type = str_field(obj, "type").ok_or(DecodeFailure::MissingType)?;

    let common = Common {
        session_id: str_field(obj, "session_id").unwrap_or_default().to_owned(),
        parent_tool_use_id: opt_string_field(obj, "parent_tool_use_id"),
        created_at: timestamp_field(obj),
    };

    let message = match message_type {
        "system" => Message::System(system_message(obj, common)),
        "assistant" => {
            let content = message_content(obj)?;
            Message::Assistant(AssistantMessage {
                content,
                parent_tool_use_id: common.parent_tool_use_id,
                session_id: common.session_id,
                created_at: common.created_at,
            })
        }
        "user" => {
            let content = message_content(obj)?;
            Message::User(UserMessage {
                content,
                parent_tool_use_id: common.parent_tool_use_id,
                session_id: common.session_id,
                created_at: common.created_at,
            })
        }
        "result" => Message::Result(result_message(obj, common)),
        other => Message::System(SystemMessage {
            subtype: other.to_owned(),
            api_key_source: None,
            cwd: None,
            session_id: common.session_id,
            tools: Vec::new(),
            mcp_servers: Vec::new(),
            model: None,
            permission_mode: None,
            created_at: common.created_at,
        }),
    };
    Ok(message)
}

/// Fields shared by every message kind.
struct Common {
    session_id: String,
    parent_tool_use_id: Option<String>,
    created_at: DateTime<Utc>,
}

// ─── Variant extraction ───────────────────────────────────────────────────

fn system_message(obj: &Object, common: Common) -> SystemMessage {
    let tools = array_field(obj, "tools")
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect();

    let mcp_servers = array_field(obj, "mcp_servers")
        .iter()
        .filter_map(Value::as_object)
        .map(|server| McpServerStatus {
            name: str_field(server, "name").unwrap_or_default().to_owned(),
            status: str_field(server, "status").unwrap_or_default().to_owned(),
        })
        .collect();

    SystemMessage {
        subtype: str_field(obj, "subtype").unwrap_or_default().to_owned(),
        api_key_source: opt_string_field(obj, "apiKeySource"),
        cwd: opt_string_field(obj, "cwd"),
        session_id: common.session_id,
        tools,
        mcp_servers,
        model: opt_string_field(obj, "model"),
        permission_mode: opt_string_field(obj, "permissionMode")
            .or_else(|| opt_string_field(obj, "permission_mode")),
        created_at: common.created_at,
    }
}

fn result_message(obj: &Object, common: Common) -> ResultMessage {
    let total_cost_usd = f64_field(obj, "total_cost_usd").filter(|cost| *cost > 0.0);

    let usage = obj.get("usage").and_then(Value::as_object).map(|u| Usage {
        input_tokens: u64_field(u, "input_tokens").unwrap_or_default(),
        output_tokens: u64_field(u, "output_tokens").unwrap_or_default(),
    });

    // Strings are taken verbatim; any other non-null value is kept as compact JSON.
    let result = match obj.get("result") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    ResultMessage {
        subtype: str_field(obj, "subtype").unwrap_or_default().to_owned(),
        duration_ms: u64_field(obj, "duration_ms").unwrap_or_default(),
        duration_api_ms: u64_field(obj, "duration_api_ms").unwrap_or_default(),
        is_error: bool_field(obj, "is_error").unwrap_or_default(),
        num_turns: u64_field(obj, "num_turns")
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or_default(),
        session_id: common.session_id,
        total_cost_usd,
        usage,
        result,
        created_at: common.created_at,
    }
}

// ─── Content blocks ───────────────────────────────────────────────────────

/// Blocks from `message.content`. A missing `message`, missing `content`
/// or `null` content yields no blocks.
///
/// Other SDKs reject `null` content as an invalid format; here it reads as
/// an empty turn. Non-null content of the wrong shape is still an error.
fn message_content(obj: &Object) -> std::result::Result<Vec<ContentBlock>, DecodeFailure> {
    match obj
        .get("message")
        .and_then(Value::as_object)
        .and_then(|m| m.get("content"))
    {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(content) => content_blocks(content),
    }
}

fn content_blocks(content: &Value) -> std::result::Result<Vec<ContentBlock>, DecodeFailure> {
    match content {
        Value::String(text) => Ok(vec![ContentBlock::Text { text: text.clone() }]),
        Value::Array(items) => items.iter().map(content_block).collect(),
        Value::Object(_) => Ok(vec![content_block(content)?]),
        other => Err(DecodeFailure::InvalidContent(other.to_string())),
    }
}

fn content_block(raw: &Value) -> std::result::Result<ContentBlock, DecodeFailure> {
    let block = match raw {
        Value::Object(block) => block,
        Value::String(text) => return Ok(ContentBlock::Text { text: text.clone() }),
        other => return Err(DecodeFailure::InvalidBlock(other.to_string())),
    };

    let Some(block_type) = str_field(block, "type") else {
        // Untyped blocks are accepted as text when they carry one.
        return match str_field(block, "text") {
            Some(text) => Ok(ContentBlock::Text {
                text: text.to_owned(),
            }),
            None => Err(DecodeFailure::InvalidBlock(raw.to_string())),
        };
    };

    match block_type {
        "text" => {
            let text = str_field(block, "text").ok_or(DecodeFailure::MissingText)?;
            Ok(ContentBlock::Text {
                text: text.to_owned(),
            })
        }
        "tool_use" => Ok(ContentBlock::ToolUse {
            id: str_field(block, "id").unwrap_or_default().to_owned(),
            name: str_field(block, "name").unwrap_or_default().to_owned(),
            input: block
                .get("input")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }),
        "tool_result" => Ok(ContentBlock::ToolResult {
            tool_use_id: str_field(block, "tool_use_id").unwrap_or_default().to_owned(),
            content: block.get("content").cloned().unwrap_or(Value::Null),
            is_error: bool_field(block, "is_error").unwrap_or_default(),
        }),
        other => Err(DecodeFailure::UnknownBlockType(other.to_owned())),
    }
}

// ─── Typed field accessors ────────────────────────────────────────────────

/// `Some` only when the key holds a JSON string.
fn str_field<'a>(obj: &'a Object, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Owned optional string; an empty string counts as absent.
fn opt_string_field(obj: &Object, key: &str) -> Option<String> {
    str_field(obj, key)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn bool_field(obj: &Object, key: &str) -> Option<bool> {
    obj.get(key).and_then(Value::as_bool)
}

fn f64_field(obj: &Object, key: &str) -> Option<f64> {
    obj.get(key).and_then(Value::as_f64)
}

/// Non-negative integer; floats are truncated, negatives are absent.
fn u64_field(obj: &Object, key: &str) -> Option<u64> {
    let value = obj.get(key)?;
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

fn array_field<'a>(obj: &'a Object, key: &str) -> &'a [Value] {
    obj.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// RFC 3339 `timestamp`, or the current time when absent or unparsable.
fn timestamp_field(obj: &Object) -> DateTime<Utc> {
    str_field(obj, "timestamp")
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

// ─── Tests ────────────────────────────────────────────────────────────────
