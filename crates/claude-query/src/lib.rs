//! `claude-query`: run the `claude` CLI as a subprocess and decode its
//! output into typed messages.
//!
//! The prompt is written to the agent's stdin; its newline-delimited JSON
//! output is decoded either after the process finishes ([`query`]) or while
//! it runs ([`query_stream`]).
//!
//! # Architecture
//!
//! ```text
//! Options
//!     │
//!     ▼
//! Invocation      ← locates `claude`, builds `--print … --output-format …`
//!     │
//!     ▼
//! ClaudeProcess   ← owns stdin (prompt writer task), stdout, stderr drain
//!     │
//!     ▼
//! decode_line     ← one JSON line → one Message, lenient on optional fields
//!     │
//!     ▼
//! QueryStream     ← futures::Stream<Item = Result<Message>>
//!                   background task + bounded mpsc + first-error slot
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! use claude_query::{query_stream, Message, Options};
//! use futures::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! let opts = Options {
//!     model: Some("sonnet".into()),
//!     max_turns: Some(1),
//!     ..Default::default()
//! };
//!
//! let mut stream = query_stream("What is 2+2?", opts, CancellationToken::new());
//! while let Some(msg) = stream.next().await {
//!     for block in msg?.content().iter() {
//!         if let Some(text) = block.as_text() {
//!             println!("{text}");
//!         }
//!     }
//! }
//! ```

pub mod command;
pub mod decode;
pub mod error;
pub mod options;
pub mod stream;
pub mod types;

mod batch;
pub(crate) mod process;

use tokio_util::sync::CancellationToken;

pub use batch::{TEXT_OUTPUT_SESSION, TEXT_OUTPUT_SUBTYPE};
pub use command::{build_args, locate_executable, Invocation};
pub use decode::{decode_line, decode_output};
pub use error::{ClaudeQueryError, DecodeFailure};
pub use options::{McpServerConfig, Options, OutputFormat, PermissionMode, QueryRequest};
pub use stream::QueryStream;
pub use types::{
    AssistantMessage, ContentBlock, ContentBlockType, McpServerStatus, Message, MessageType,
    ResultMessage, SystemMessage, Usage, UserMessage,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClaudeQueryError>;

/// Run a query to completion and return all of its messages.
///
/// Decodes according to `options.output_format` (default `stream-json`).
/// On any error no messages are returned.
///
/// # Example
///
/// ```rust,ignore
/// use claude_query::{query, Options};
///
/// let messages = query("What is 2+2?", Options::default()).await?;
/// if let Some(result) = messages.last().and_then(|m| m.as_result()) {
///     println!("{}", result.result_text().unwrap_or(""));
/// }
/// ```
pub async fn query(prompt: impl Into<String>, options: Options) -> Result<Vec<Message>> {
    batch::run(prompt.into(), &options).await
}

/// Start a query and stream its messages while the agent runs.
///
/// Output is always requested as `stream-json`. Cancelling `cancel` aborts
/// delivery: the stream then yields [`ClaudeQueryError::Cancelled`] and
/// ends. Must be called from within a Tokio runtime.
pub fn query_stream(
    prompt: impl Into<String>,
    options: Options,
    cancel: CancellationToken,
) -> QueryStream {
    QueryStream::new(prompt.into(), options, cancel)
}

/// [`query`] taking a [`QueryRequest`].
pub async fn query_with_request(request: QueryRequest) -> Result<Vec<Message>> {
    query(request.prompt, request.options.unwrap_or_default()).await
}

/// [`query_stream`] taking a [`QueryRequest`].
pub fn query_stream_with_request(request: QueryRequest, cancel: CancellationToken) -> QueryStream {
    query_stream(request.prompt, request.options.unwrap_or_default(), cancel)
}
