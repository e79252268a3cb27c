use std::path::{Path, PathBuf};

use tracing::debug;

use crate::options::{McpServerConfig, OutputFormat, Options};
use crate::{ClaudeQueryError, Result};

/// Environment variable identifying this SDK to the agent. Set on the child
/// only.
pub const ENTRYPOINT_ENV: &str = "CLAUDE_CODE_ENTRYPOINT";
pub const ENTRYPOINT_VALUE: &str = "sdk-rust";

// ─── Invocation ───────────────────────────────────────────────────────────

/// Everything needed to launch one agent process.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Child-only environment, applied on top of the inherited one.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// Resolve the executable and flags for a query decoded as `format`.
    ///
    /// `format` overrides `options.output_format` so the process and the
    /// decoder always agree on the protocol.
    pub fn prepare(options: &Options, format: OutputFormat) -> Result<Self> {
        let executable = locate_executable(options.executable.as_deref())?;
        let args = build_args(options, format);

        let mut env: Vec<(String, String)> = options
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();
        env.push((ENTRYPOINT_ENV.to_owned(), ENTRYPOINT_VALUE.to_owned()));

        debug!(executable = %executable.display(), ?args, "prepared claude invocation");

        Ok(Invocation {
            executable,
            args,
            cwd: options.cwd.clone(),
            env,
        })
    }
}

// ─── Executable discovery ─────────────────────────────────────────────────

/// Find the `claude` binary.
///
/// An explicit path must exist. Otherwise `PATH` is searched, then the
/// usual per-user install locations, then the npm global root.
pub fn locate_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit.filter(|p| !p.as_os_str().is_empty()) {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ClaudeQueryError::NotFound {
            path: Some(path.to_path_buf()),
        });
    }

    if let Ok(path) = which::which("claude") {
        return Ok(path);
    }

    if let Some(home) = home::home_dir() {
        let candidates = [
            home.join(".claude").join("local").join("claude"),
            home.join(".npm-global").join("bin").join("claude"),
            home.join("node_modules").join(".bin").join("claude"),
            home.join(".local").join("bin").join("claude"),
        ];
        if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
            return Ok(found);
        }
    }

    if let Some(found) = npm_global_install() {
        return Ok(found);
    }

    Err(ClaudeQueryError::NotFound { path: None })
}

fn npm_global_install() -> Option<PathBuf> {
    let npm = which::which("npm").ok()?;
    let output = std::process::Command::new(npm)
        .args(["root", "-g"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8(output.stdout).ok()?;
    let path = Path::new(root.trim())
        .join("@anthropic-ai")
        .join("claude-code")
        .join("bin")
        .join("claude");
    path.is_file().then_some(path)
}

// ─── Argument builder ─────────────────────────────────────────────────────

/// Translate `options` into CLI flags, starting with `--print`.
///
/// The prompt is NOT an argument; it is written to stdin.
pub fn build_args(options: &Options, format: OutputFormat) -> Vec<String> {
    let mut args = vec!["--print".to_owned()];

    push_opt(&mut args, "--system-prompt", &options.system_prompt);
    push_opt(&mut args, "--append-system-prompt", &options.append_system_prompt);
    if let Some(max_turns) = options.max_turns {
        args.push("--max-turns".into());
        args.push(max_turns.to_string());
    }

    push_opt(&mut args, "--model", &options.model);
    if !options.allowed_tools.is_empty() {
        args.push("--allowedTools".into());
        args.push(options.allowed_tools.join(","));
    }
    if !options.disallowed_tools.is_empty() {
        args.push("--disallowedTools".into());
        args.push(options.disallowed_tools.join(","));
    }

    push_opt(&mut args, "--resume", &options.resume);
    push_flag(&mut args, "--continue", options.continue_conversation);

    args.push("--output-format".into());
    args.push(format.as_str().into());
    if options
        .verbose
        .unwrap_or(format == OutputFormat::StreamJson)
    {
        args.push("--verbose".into());
    }

    push_opt(&mut args, "--mcp-config", &options.mcp_config);
    if !options.mcp_servers.is_empty() {
        args.push("--mcp-config".into());
        args.push(mcp_config_json(&options.mcp_servers));
    }

    if let Some(mode) = options.permission_mode {
        args.push("--permission-mode".into());
        args.push(mode.as_str().into());
    }
    push_opt(
        &mut args,
        "--permission-prompt-tool",
        &options.permission_prompt_tool,
    );
    push_flag(
        &mut args,
        "--dangerously-skip-permissions",
        options.dangerously_skip_permissions,
    );

    push_flag(&mut args, "--debug", options.debug);
    push_opt(&mut args, "--input-format", &options.input_format);
    for dir in &options.add_dirs {
        args.push("--add-dir".into());
        args.push(dir.display().to_string());
    }

    args
}

/// Push `flag value` unless the value is unset or empty.
fn push_opt(args: &mut Vec<String>, flag: &str, value: &Option<String>) {
    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
        args.push(flag.to_owned());
        args.push(v.to_owned());
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, enabled: Option<bool>) {
    if enabled == Some(true) {
        args.push(flag.to_owned());
    }
}

/// JSON for `claude --mcp-config '...'`.
///
/// Format: `{"mcpServers":{"<name>":{"type":"stdio","command":"...","args":[...],"env":{...}}}}`
fn mcp_config_json<'a>(
    servers: impl IntoIterator<Item = (&'a String, &'a McpServerConfig)>,
) -> String {
    let mut mcp_servers = serde_json::Map::new();

    for (name, srv) in servers {
        let mut cfg = serde_json::Map::new();
        cfg.insert("type".into(), "stdio".into());
        cfg.insert("command".into(), srv.command.clone().into());

        if !srv.args.is_empty() {
            cfg.insert("args".into(), srv.args.clone().into());
        }

        if !srv.env.is_empty() {
            let env: serde_json::Map<String, serde_json::Value> = srv
                .env
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            cfg.insert("env".into(), serde_json::Value::Object(env));
        }

        mcp_servers.insert(name.clone(), serde_json::Value::Object(cfg));
    }

    serde_json::json!({ "mcpServers": mcp_servers }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::PermissionMode;
    use std::collections::HashMap;

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn defaults_to_print_and_forced_format() {
        let args = build_args(&Options::default(), OutputFormat::StreamJson);
        assert_eq!(
            args,
            vec!["--print", "--output-format", "stream-json", "--verbose"]
        );
    }

    #[test]
    fn format_argument_overrides_options() {
        let opts = Options {
            output_format: Some(OutputFormat::Text),
            ..Default::default()
        };
        let args = build_args(&opts, OutputFormat::StreamJson);
        assert!(has_pair(&args, "--output-format", "stream-json"));
    }

    #[test]
    fn verbose_only_forced_for_stream_json() {
        let args = build_args(&Options::default(), OutputFormat::Json);
        assert!(!args.contains(&"--verbose".to_owned()));

        let opts = Options {
            verbose: Some(true),
            ..Default::default()
        };
        assert!(build_args(&opts, OutputFormat::Text).contains(&"--verbose".to_owned()));
    }

    #[test]
    fn explicit_silence_suppresses_verbose() {
        let opts = Options {
            verbose: Some(false),
            ..Default::default()
        };
        let args = build_args(&opts, OutputFormat::StreamJson);
        assert!(!args.contains(&"--verbose".to_owned()));
    }

    #[test]
    fn maps_every_flag() {
        let mut mcp_servers = std::collections::BTreeMap::new();
        mcp_servers.insert(
            "fs".to_owned(),
            McpServerConfig {
                command: "mcp-fs".into(),
                args: vec!["--root".into(), "/tmp".into()],
                env: HashMap::new(),
            },
        );
        let opts = Options {
            model: Some("sonnet".into()),
            system_prompt: Some("be brief".into()),
            append_system_prompt: Some("".into()),
            max_turns: Some(3),
            continue_conversation: Some(true),
            resume: Some("sess-1".into()),
            allowed_tools: vec!["Read".into(), "Write".into()],
            disallowed_tools: vec!["Bash".into()],
            mcp_servers,
            mcp_config: Some("/etc/mcp.json".into()),
            permission_mode: Some(PermissionMode::AcceptEdits),
            permission_prompt_tool: Some("mcp__perm__ask".into()),
            dangerously_skip_permissions: Some(false),
            add_dirs: vec!["/a".into(), "/b".into()],
            input_format: Some("text".into()),
            debug: Some(true),
            ..Default::default()
        };
        let args = build_args(&opts, OutputFormat::StreamJson);

        assert_eq!(args[0], "--print");
        assert!(has_pair(&args, "--model", "sonnet"));
        assert!(has_pair(&args, "--system-prompt", "be brief"));
        assert!(!args.contains(&"--append-system-prompt".to_owned()));
        assert!(has_pair(&args, "--max-turns", "3"));
        assert!(args.contains(&"--continue".to_owned()));
        assert!(has_pair(&args, "--resume", "sess-1"));
        assert!(has_pair(&args, "--allowedTools", "Read,Write"));
        assert!(has_pair(&args, "--disallowedTools", "Bash"));
        assert!(has_pair(&args, "--mcp-config", "/etc/mcp.json"));
        let inline = args
            .windows(2)
            .filter(|w| w[0] == "--mcp-config")
            .map(|w| w[1].clone())
            .nth(1)
            .expect("inline mcp config");
        let inline: serde_json::Value = serde_json::from_str(&inline).unwrap();
        assert_eq!(inline["mcpServers"]["fs"]["type"], "stdio");
        assert_eq!(inline["mcpServers"]["fs"]["command"], "mcp-fs");
        assert_eq!(inline["mcpServers"]["fs"]["args"][1], "/tmp");
        assert!(inline["mcpServers"]["fs"].get("env").is_none());
        assert!(has_pair(&args, "--permission-mode", "acceptEdits"));
        assert!(has_pair(&args, "--permission-prompt-tool", "mcp__perm__ask"));
        assert!(!args.contains(&"--dangerously-skip-permissions".to_owned()));
        assert!(args.contains(&"--debug".to_owned()));
        assert!(has_pair(&args, "--input-format", "text"));
        assert!(has_pair(&args, "--add-dir", "/a"));
        assert!(has_pair(&args, "--add-dir", "/b"));
    }

    #[test]
    fn missing_explicit_executable_is_not_found() {
        let err = locate_executable(Some(Path::new("/nonexistent/path/claude"))).unwrap_err();
        assert!(matches!(
            err,
            ClaudeQueryError::NotFound { path: Some(ref p) } if p == Path::new("/nonexistent/path/claude")
        ));
    }

    #[test]
    fn existing_explicit_executable_is_returned() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let found = locate_executable(Some(file.path())).unwrap();
        assert_eq!(found, file.path());
    }

    #[test]
    fn invocation_sets_entrypoint_env_for_child() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut env = HashMap::new();
        env.insert("FOO".to_owned(), "bar".to_owned());
        let opts = Options {
            executable: Some(file.path().to_path_buf()),
            cwd: Some("/tmp".into()),
            env,
            ..Default::default()
        };
        let inv = Invocation::prepare(&opts, OutputFormat::Json).unwrap();
        assert_eq!(inv.executable, file.path());
        assert_eq!(inv.cwd.as_deref(), Some(Path::new("/tmp")));
        assert!(inv.env.contains(&("FOO".into(), "bar".into())));
        assert!(inv
            .env
            .contains(&(ENTRYPOINT_ENV.into(), ENTRYPOINT_VALUE.into())));
        assert!(has_pair(&inv.args, "--output-format", "json"));
    }
}
