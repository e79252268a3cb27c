use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::command::Invocation;
use crate::decode::decode_line;
use crate::options::{OutputFormat, Options};
use crate::process::{join_writer, ClaudeProcess};
use crate::types::Message;
use crate::{ClaudeQueryError, Result};

/// Capacity of the delivery channel. A slow consumer blocks the decode loop
/// once this many messages are waiting.
pub const MESSAGE_BUFFER: usize = 10;

// ─── QueryStream ──────────────────────────────────────────────────────────

/// An async stream of [`Message`]s decoded while the agent runs.
///
/// Yields messages in the order the agent printed them, then at most one
/// terminal `Err`, then ends. A clean agent exit simply ends the stream.
///
/// A background task owns the [`ClaudeProcess`]; dropping the stream closes
/// the channel, which stops that task on its next send and kills the agent.
///
/// ```rust,ignore
/// use claude_query::{query_stream, Message, Options};
/// use futures::StreamExt;
/// use tokio_util::sync::CancellationToken;
///
/// let mut stream = query_stream("say hello", Options::default(), CancellationToken::new());
/// while let Some(msg) = stream.next().await {
///     if let Message::Result(r) = msg? {
///         println!("result: {:?}", r.result_text());
///     }
/// }
/// ```
pub struct QueryStream {
    rx: mpsc::Receiver<Message>,
    /// First fatal error from the driver task. Dropped unsent on success.
    error: oneshot::Receiver<ClaudeQueryError>,
    cancel: CancellationToken,
    finished: bool,
}

impl QueryStream {
    pub(crate) fn new(prompt: String, options: Options, cancel: CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let (error_tx, error_rx) = oneshot::channel();

        let token = cancel.clone();
        tokio::spawn(async move {
            let outcome = match start(&options) {
                Ok(mut process) => pump(&mut process, prompt, &tx, &token).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                debug!(error = %e, "query stream ended with an error");
                let _ = error_tx.send(e);
            }
        });

        QueryStream {
            rx,
            error: error_rx,
            cancel,
            finished: false,
        }
    }

    /// Drive an already spawned process. Used by tests to inject a mock
    /// command in place of the agent.
    #[cfg(test)]
    pub(crate) fn from_process(
        mut process: ClaudeProcess,
        prompt: String,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let (error_tx, error_rx) = oneshot::channel();
        let token = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = pump(&mut process, prompt, &tx, &token).await {
                let _ = error_tx.send(e);
            }
        });
        QueryStream {
            rx,
            error: error_rx,
            cancel,
            finished: false,
        }
    }

    /// Abort the query. The stream yields [`ClaudeQueryError::Cancelled`]
    /// next and then ends; buffered messages are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Stream for QueryStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if self.cancel.is_cancelled() {
            self.finished = true;
            return Poll::Ready(Some(Err(ClaudeQueryError::Cancelled)));
        }

        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(msg)) => Poll::Ready(Some(Ok(msg))),
            Poll::Pending => Poll::Pending,
            // Channel closed: the driver is done, report its error if any.
            Poll::Ready(None) => match Pin::new(&mut self.error).poll(cx) {
                Poll::Ready(Ok(e)) => {
                    self.finished = true;
                    Poll::Ready(Some(Err(e)))
                }
                Poll::Ready(Err(_)) => {
                    self.finished = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

// ─── Driver ───────────────────────────────────────────────────────────────

fn start(options: &Options) -> Result<ClaudeProcess> {
    let invocation = Invocation::prepare(options, OutputFormat::StreamJson)?;
    ClaudeProcess::start(&invocation)
}

/// Decode stdout line by line into `tx` until EOF, a fatal error, or
/// cancellation. An undecodable line kills the agent; its stderr is logged.
///
/// After a clean EOF the exit status is checked first: a non-zero exit wins
/// over a failed prompt write, since it usually explains it.
async fn pump(
    process: &mut ClaudeProcess,
    prompt: String,
    tx: &mpsc::Sender<Message>,
    cancel: &CancellationToken,
) -> Result<()> {
    let writer = process.write_input(prompt)?;
    let mut lines = process.take_lines()?;

    loop {
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClaudeQueryError::Cancelled),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };

        if line.trim().is_empty() {
            continue;
        }
        trace!(%line, "stream-json line");
        let message = match decode_line(&line) {
            Ok(message) => message,
            Err(e) => {
                let stderr = process.abort().await;
                debug!(stderr = %stderr.trim_end(), "claude stopped after undecodable output");
                return Err(e);
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ClaudeQueryError::Cancelled),
            sent = tx.send(message) => {
                if sent.is_err() {
                    debug!("query stream dropped, stopping");
                    return Ok(());
                }
            }
        }
    }

    let write_result = join_writer(writer).await;
    process.wait().await?;
    write_result
}

// ─── Tests ────────────────────────────────────────────────────────────────
