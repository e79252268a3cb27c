use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaudeQueryError {
    /// The agent executable could not be located. `path` is set when an
    /// explicit override was given and does not exist.
    #[error("{}", not_found_message(.path.as_deref()))]
    NotFound { path: Option<PathBuf> },

    #[error("CLI connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("CLI process error (exit code {exit_code}): {stderr}")]
    Process { exit_code: i32, stderr: String },

    #[error("failed to decode CLI JSON: {reason}\n  line: {line}")]
    JsonDecode {
        line: String,
        #[source]
        reason: DecodeFailure,
    },

    #[error("query cancelled")]
    Cancelled,
}

impl ClaudeQueryError {
    pub(crate) fn connection(message: impl Into<String>, source: std::io::Error) -> Self {
        ClaudeQueryError::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    pub(crate) fn decode(line: &str, reason: DecodeFailure) -> Self {
        ClaudeQueryError::JsonDecode {
            line: line.to_owned(),
            reason,
        }
    }

    /// Exit code of the agent process, for `Process` errors only.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ClaudeQueryError::Process { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClaudeQueryError::Cancelled)
    }
}

/// Why a line of agent output was rejected by the decoder.
#[derive(Debug, Error)]
pub enum DecodeFailure {
    #[error("invalid JSON: {0}")]
    Syntax(#[from] serde_json::Error),

    #[error("top-level value is not a JSON object")]
    NotAnObject,

    #[error("missing or invalid message type")]
    MissingType,

    #[error("invalid content format: {0}")]
    InvalidContent(String),

    #[error("invalid content block format: {0}")]
    InvalidBlock(String),

    #[error("missing text in text block")]
    MissingText,

    #[error("unknown content block type: {0}")]
    UnknownBlockType(String),
}

fn not_found_message(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("Claude Code not found at: {}", p.display()),
        None => "Claude Code not found or not installed.\n\n\
                 Install Claude Code with:\n  \
                 npm install -g @anthropic-ai/claude-code\n\n\
                 If already installed locally, try:\n  \
                 export PATH=\"$HOME/node_modules/.bin:$PATH\"\n\n\
                 Or set the executable explicitly:\n  \
                 Options { executable: Some(\"/path/to/claude\".into()), ..Default::default() }"
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_with_path_names_the_path() {
        let err = ClaudeQueryError::NotFound {
            path: Some(PathBuf::from("/usr/bin/claude")),
        };
        assert_eq!(err.to_string(), "Claude Code not found at: /usr/bin/claude");
    }

    #[test]
    fn not_found_without_path_has_install_hint() {
        let err = ClaudeQueryError::NotFound { path: None };
        assert!(err.to_string().contains("npm install -g @anthropic-ai/claude-code"));
    }

    #[test]
    fn process_error_reports_exit_code_and_stderr() {
        let err = ClaudeQueryError::Process {
            exit_code: 1,
            stderr: "auth failed".into(),
        };
        assert!(err.to_string().contains("exit code 1"));
        assert!(err.to_string().contains("auth failed"));
        assert_eq!(err.exit_code(), Some(1));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn decode_error_keeps_raw_line() {
        let err = ClaudeQueryError::decode("{oops", DecodeFailure::MissingType);
        let ClaudeQueryError::JsonDecode { line, .. } = &err else {
            panic!("expected JsonDecode");
        };
        assert_eq!(line, "{oops");
        assert!(std::error::Error::source(&err).is_some());
    }
}
