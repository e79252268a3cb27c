use chrono::Utc;
use tracing::debug;

use crate::command::Invocation;
use crate::decode::decode_output;
use crate::options::{OutputFormat, Options};
use crate::process::{join_writer, ClaudeProcess};
use crate::types::{Message, ResultMessage};
use crate::Result;

/// Subtype of the single result message produced for `text` output.
pub const TEXT_OUTPUT_SUBTYPE: &str = "text_output";
/// Session ID of the single result message produced for `text` output.
pub const TEXT_OUTPUT_SESSION: &str = "text_output_session";

/// Run a query to completion and return every message it produced.
///
/// The agent's stdout is buffered in full and decoded after EOF. `text`
/// output yields one result message holding the whole output, with invalid
/// UTF-8 replaced by U+FFFD; `json` and `stream-json` are decoded line by
/// line. Any error discards the messages decoded so far.
pub(crate) async fn run(prompt: String, options: &Options) -> Result<Vec<Message>> {
    let format = options.output_format.unwrap_or_default();
    let invocation = Invocation::prepare(options, format)?;
    let mut process = ClaudeProcess::start(&invocation)?;

    let writer = process.write_input(prompt)?;
    let output = process.read_to_end().await?;
    debug!(bytes = output.len(), %format, "claude output buffered");

    let messages = match format {
        OutputFormat::Text => vec![text_output_message(output)],
        OutputFormat::Json | OutputFormat::StreamJson => match decode_output(&output) {
            Ok(messages) => messages,
            Err(e) => {
                let stderr = process.abort().await;
                debug!(stderr = %stderr.trim_end(), "claude output failed to decode");
                return Err(e);
            }
        },
    };

    let write_result = join_writer(writer).await;
    process.wait().await?;
    write_result?;

    Ok(messages)
}

fn text_output_message(output: String) -> Message {
    Message::Result(ResultMessage {
        subtype: TEXT_OUTPUT_SUBTYPE.to_owned(),
        duration_ms: 0,
        duration_api_ms: 0,
        is_error: false,
        num_turns: 0,
        session_id: TEXT_OUTPUT_SESSION.to_owned(),
        total_cost_usd: None,
        usage: None,
        result: Some(output),
        created_at: Utc::now(),
    })
}
