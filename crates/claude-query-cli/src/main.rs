mod render;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use claude_query::{
    query, query_stream, ClaudeQueryError, Message, Options, OutputFormat, PermissionMode,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "claude-query",
    about = "Run one Claude Code query and print the messages it produces",
    version
)]
struct Cli {
    /// Prompt text (default: read from stdin)
    prompt: Option<String>,

    /// Model alias or full name
    #[arg(long)]
    model: Option<String>,

    /// Replace the default system prompt
    #[arg(long)]
    system_prompt: Option<String>,

    /// Append to the default system prompt
    #[arg(long)]
    append_system_prompt: Option<String>,

    #[arg(long)]
    max_turns: Option<u32>,

    /// Tools allowed without prompting (comma-separated)
    #[arg(long, value_delimiter = ',')]
    allowed_tools: Vec<String>,

    /// Tools the agent may not use (comma-separated)
    #[arg(long, value_delimiter = ',')]
    disallowed_tools: Vec<String>,

    /// Resume the session with this ID
    #[arg(long)]
    resume: Option<String>,

    /// Continue the most recent conversation
    #[arg(long = "continue")]
    continue_conversation: bool,

    /// default, acceptEdits, bypassPermissions or plan
    #[arg(long)]
    permission_mode: Option<PermissionMode>,

    /// Working directory for the agent
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Path to the `claude` binary (default: search PATH and common install locations)
    #[arg(long, env = "CLAUDE_QUERY_EXECUTABLE")]
    executable: Option<PathBuf>,

    /// text, json or stream-json. Implies --batch unless stream-json.
    #[arg(long)]
    output_format: Option<OutputFormat>,

    /// Wait for the agent to finish before printing anything
    #[arg(long)]
    batch: bool,

    /// Print each message as a JSON line
    #[arg(long, short = 'j')]
    json: bool,

    /// Cancel the query after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// YAML file with query options; flags override its values
    #[arg(long = "options", value_name = "FILE")]
    options_file: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Cli {
    /// File options (if any) with every flag given on the command line
    /// applied on top.
    fn options(&self) -> Result<Options> {
        let mut opts = match &self.options_file {
            Some(path) => load_options(path)?,
            None => Options::default(),
        };

        override_with(&mut opts.model, &self.model);
        override_with(&mut opts.system_prompt, &self.system_prompt);
        override_with(&mut opts.append_system_prompt, &self.append_system_prompt);
        override_with(&mut opts.max_turns, &self.max_turns);
        override_with(&mut opts.resume, &self.resume);
        override_with(&mut opts.permission_mode, &self.permission_mode);
        override_with(&mut opts.cwd, &self.cwd);
        override_with(&mut opts.executable, &self.executable);
        override_with(&mut opts.output_format, &self.output_format);
        if !self.allowed_tools.is_empty() {
            opts.allowed_tools = self.allowed_tools.clone();
        }
        if !self.disallowed_tools.is_empty() {
            opts.disallowed_tools = self.disallowed_tools.clone();
        }
        if self.continue_conversation {
            opts.continue_conversation = Some(true);
        }

        Ok(opts)
    }

    fn batch_mode(&self, opts: &Options) -> bool {
        self.batch || matches!(opts.output_format, Some(f) if f != OutputFormat::StreamJson)
    }
}

fn override_with<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

fn load_options(path: &Path) -> Result<Options> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read options file {}", path.display()))?;
    serde_yaml::from_str(&text)
        .with_context(|| format!("invalid options file {}", path.display()))
}

fn read_prompt(arg: Option<&str>) -> Result<String> {
    let prompt = match arg {
        Some(p) => p.to_owned(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read prompt from stdin")?;
            buf
        }
    };
    if prompt.trim().is_empty() {
        bail!("no prompt given (pass it as an argument or on stdin)");
    }
    Ok(prompt)
}

// ---------------------------------------------------------------------------
// Query execution
// ---------------------------------------------------------------------------

struct Printer {
    json: bool,
    saw_error_result: bool,
}

impl Printer {
    fn print(&mut self, message: &Message) -> Result<()> {
        if let Message::Result(r) = message {
            self.saw_error_result |= r.is_error;
        }
        if self.json {
            println!("{}", render::json_line(message)?);
        } else {
            let text = render::human(message);
            if !text.is_empty() {
                println!("{text}");
            }
        }
        Ok(())
    }
}

async fn run_batch(
    prompt: String,
    opts: Options,
    timeout: Option<Duration>,
    printer: &mut Printer,
) -> Result<()> {
    let messages = match timeout {
        Some(limit) => tokio::time::timeout(limit, query(prompt, opts))
            .await
            .map_err(|_| anyhow::anyhow!("query timed out after {}s", limit.as_secs()))??,
        None => query(prompt, opts).await?,
    };
    tracing::debug!(count = messages.len(), "batch query finished");
    for message in &messages {
        printer.print(message)?;
    }
    Ok(())
}

async fn run_stream(
    prompt: String,
    opts: Options,
    timeout: Option<Duration>,
    printer: &mut Printer,
) -> Result<()> {
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted, cancelling query");
            on_interrupt.cancel();
        }
    });
    let timed_out = CancellationToken::new();
    if let Some(limit) = timeout {
        let (cancel, timed_out) = (cancel.clone(), timed_out.clone());
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            timed_out.cancel();
            cancel.cancel();
        });
    }

    let mut stream = query_stream(prompt, opts, cancel);
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => printer.print(&message)?,
            Err(ClaudeQueryError::Cancelled) if timed_out.is_cancelled() => {
                bail!(
                    "query timed out after {}s",
                    timeout.map(|t| t.as_secs()).unwrap_or_default()
                )
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let opts = cli.options()?;
    let prompt = read_prompt(cli.prompt.as_deref())?;
    let timeout = cli.timeout_secs.map(Duration::from_secs);
    let batch = cli.batch_mode(&opts);
    let mut printer = Printer {
        json: cli.json,
        saw_error_result: false,
    };

    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(async {
        if batch {
            run_batch(prompt, opts, timeout, &mut printer).await
        } else {
            run_stream(prompt, opts, timeout, &mut printer).await
        }
    })?;

    if printer.saw_error_result {
        bail!("agent run ended with an error result");
    }
    Ok(())
}

/// Exit status for a failed run: the agent's own code when it exited
/// non-zero, otherwise 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ClaudeQueryError>()
        .and_then(ClaudeQueryError::exit_code)
        .filter(|code| *code > 0)
        .unwrap_or(1)
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(exit_code(&e));
    }
}
