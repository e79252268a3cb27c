use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── Options ──────────────────────────────────────────────────────────────

/// Options for a single query against the `claude` CLI.
///
/// Every field is optional. The query core only looks at `output_format`
/// and `verbose`; the rest is translated into CLI flags by
/// [`build_args`](crate::command::build_args).
///
/// Deserializes with missing fields defaulted, so a YAML or JSON file can
/// hold any subset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Model alias or full name (e.g. `"sonnet"`)
    pub model: Option<String>,
    /// Replace the default system prompt
    pub system_prompt: Option<String>,
    /// Text appended to the default system prompt
    pub append_system_prompt: Option<String>,
    /// Maximum number of agentic turns
    pub max_turns: Option<u32>,
    /// Continue the most recent conversation (`--continue`)
    #[serde(alias = "continue")]
    pub continue_conversation: Option<bool>,
    /// Session ID to resume (`--resume`)
    pub resume: Option<String>,
    /// Tools the agent may use without prompting
    pub allowed_tools: Vec<String>,
    /// Tools the agent may not use
    pub disallowed_tools: Vec<String>,
    /// Inline MCP servers, keyed by server name
    pub mcp_servers: BTreeMap<String, McpServerConfig>,
    /// Path to an MCP config file, or a JSON string
    pub mcp_config: Option<String>,
    pub permission_mode: Option<PermissionMode>,
    /// MCP tool used to answer permission prompts
    pub permission_prompt_tool: Option<String>,
    /// Bypass all permission checks. Only for sandboxes without network access.
    pub dangerously_skip_permissions: Option<bool>,
    /// Working directory for the subprocess
    pub cwd: Option<PathBuf>,
    /// Additional directories the agent's tools may access (`--add-dir`)
    pub add_dirs: Vec<PathBuf>,
    /// `text` (default) or `stream-json`
    pub input_format: Option<String>,
    /// Output format; batch queries default to `stream-json`
    pub output_format: Option<OutputFormat>,
    pub debug: Option<bool>,
    /// `Some(false)` suppresses the `--verbose` flag that stream-json
    /// output otherwise forces.
    pub verbose: Option<bool>,
    /// Explicit path to the `claude` binary
    pub executable: Option<PathBuf>,
    /// Additional environment variables for the subprocess only
    pub env: HashMap<String, String>,
}

// ─── OutputFormat ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Text,
    Json,
    #[default]
    StreamJson,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Text => "text",
            OutputFormat::Json => "json",
            OutputFormat::StreamJson => "stream-json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "stream-json" => Ok(OutputFormat::StreamJson),
            other => Err(format!(
                "unknown output format '{other}' (expected text, json or stream-json)"
            )),
        }
    }
}

// ─── PermissionMode ───────────────────────────────────────────────────────

/// Permission mode: controls how tool executions are authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Standard: prompts for dangerous operations
    Default,
    /// Auto-accept file edit operations
    AcceptEdits,
    /// Bypass all permission checks
    BypassPermissions,
    /// Planning mode: no actual tool execution
    Plan,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(PermissionMode::Default),
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            "bypassPermissions" => Ok(PermissionMode::BypassPermissions),
            "plan" => Ok(PermissionMode::Plan),
            other => Err(format!("unknown permission mode '{other}'")),
        }
    }
}

// ─── McpServerConfig ──────────────────────────────────────────────────────

/// MCP server configuration for stdio transport.
///
/// Serialized under `mcpServers.<name>` in the JSON passed to `--mcp-config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Executable to spawn
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

// ─── QueryRequest ─────────────────────────────────────────────────────────

/// A prompt plus options, in the request shape other SDKs accept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Options>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_partial_yaml() {
        let yaml = "model: sonnet\nmax_turns: 5\nallowed_tools: [Read, Write]\npermission_mode: acceptEdits\noutput_format: stream-json\n";
        let opts: Options = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(opts.model.as_deref(), Some("sonnet"));
        assert_eq!(opts.max_turns, Some(5));
        assert_eq!(opts.allowed_tools, vec!["Read", "Write"]);
        assert_eq!(opts.permission_mode, Some(PermissionMode::AcceptEdits));
        assert_eq!(opts.output_format, Some(OutputFormat::StreamJson));
        assert!(opts.verbose.is_none());
    }

    #[test]
    fn query_request_without_options() {
        let req: QueryRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert_eq!(req.prompt, "hi");
        assert!(req.options.is_none());
    }

    #[test]
    fn output_format_parses_cli_names() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!(OutputFormat::default().as_str(), "stream-json");
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn permission_mode_round_trips_cli_name() {
        for mode in [
            PermissionMode::Default,
            PermissionMode::AcceptEdits,
            PermissionMode::BypassPermissions,
            PermissionMode::Plan,
        ] {
            assert_eq!(mode.as_str().parse::<PermissionMode>(), Ok(mode));
        }
    }
}
