use claude_query::{
    ContentBlock, Message, MessageType, ResultMessage, SystemMessage, TEXT_OUTPUT_SUBTYPE,
};

/// One message as a single JSON line.
pub fn json_line(message: &Message) -> anyhow::Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// One message for a terminal. Returns an empty string for messages with
/// nothing worth showing.
pub fn human(message: &Message) -> String {
    match message {
        Message::Assistant(m) => blocks(&m.content),
        Message::User(m) => blocks(&m.content),
        Message::System(m) => system(m),
        Message::Result(m) => result(m),
    }
}

fn blocks(content: &[ContentBlock]) -> String {
    content.iter().map(block).collect::<Vec<_>>().join("\n")
}

fn block(block: &ContentBlock) -> String {
    let tag = block.block_type().as_str();
    match block {
        ContentBlock::Text { text } => text.clone(),
        ContentBlock::ToolUse { id, name, input } => {
            let input = serde_json::Value::Object(input.clone());
            format!("[{tag} {name} {id}] {input}")
        }
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => {
            let status = if *is_error { "error" } else { "ok" };
            let content = match content {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("[{tag} {tool_use_id} {status}] {content}")
        }
    }
}

fn system(m: &SystemMessage) -> String {
    let mut line = format!(
        "[{}:{}] session={}",
        MessageType::System.as_str(),
        m.subtype,
        m.session_id
    );
    if let Some(model) = &m.model {
        line.push_str(&format!(" model={model}"));
    }
    if !m.tools.is_empty() {
        line.push_str(&format!(" tools={}", m.tools.len()));
    }
    line
}

fn result(m: &ResultMessage) -> String {
    // Text output carries the whole answer and nothing else.
    if m.subtype == TEXT_OUTPUT_SUBTYPE {
        return m.result_text().unwrap_or_default().trim_end().to_owned();
    }

    let mut summary = format!(
        "\n---\nTurns: {}  Cost: ${:.4}  Duration: {}ms",
        m.num_turns,
        m.total_cost_usd.unwrap_or(0.0),
        m.duration_ms
    );
    if let Some(usage) = &m.usage {
        summary.push_str(&format!(
            "  Tokens: {} in / {} out",
            usage.input_tokens, usage.output_tokens
        ));
    }
    if m.is_error {
        summary.push_str("  (error)");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use claude_query::decode_line;

    #[test]
    fn assistant_text_and_tool_use() {
        let msg = decode_line(
            r#"{"type":"assistant","session_id":"s","message":{"content":[
                {"type":"text","text":"Reading it now."},
                {"type":"tool_use","id":"tu_1","name":"Read","input":{"path":"a.rs"}}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(
            human(&msg),
            "Reading it now.\n[tool_use Read tu_1] {\"path\":\"a.rs\"}"
        );
    }

    #[test]
    fn tool_result_marks_errors() {
        let msg = decode_line(
            r#"{"type":"user","session_id":"s","message":{"content":[
                {"type":"tool_result","tool_use_id":"tu_1","content":"boom","is_error":true}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(human(&msg), "[tool_result tu_1 error] boom");
    }

    #[test]
    fn system_init_summary() {
        let msg = decode_line(
            r#"{"type":"system","subtype":"init","session_id":"s","model":"sonnet","tools":["Read","Bash"]}"#,
        )
        .unwrap();
        assert_eq!(human(&msg), "[system:init] session=s model=sonnet tools=2");
    }

    #[test]
    fn result_summary_line() {
        let msg = decode_line(
            r#"{"type":"result","subtype":"success","session_id":"s","num_turns":2,
                "duration_ms":1500,"total_cost_usd":0.0123,"is_error":false,
                "usage":{"input_tokens":10,"output_tokens":20}}"#,
        )
        .unwrap();
        assert_eq!(
            human(&msg),
            "\n---\nTurns: 2  Cost: $0.0123  Duration: 1500ms  Tokens: 10 in / 20 out"
        );
    }

    #[test]
    fn json_line_is_tagged_by_type() {
        let msg = decode_line(r#"{"type":"assistant","session_id":"s","message":{"content":"hi"}}"#)
            .unwrap();
        let line = json_line(&msg).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "assistant");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "hi");
    }
}
