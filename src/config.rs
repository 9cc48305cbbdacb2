//! Framework configuration loading: the `[core]`/`[tool:<name>]` INI file (§6, §10.A).

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::{Error, Result};

/// A config's log verbosity (§7). `Fatal` has no more severe equivalent in the `log` crate's
/// vocabulary, so it resolves to [`log::LevelFilter::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug.
    Debug,
    /// Default.
    Info,
    /// Warnings.
    Warn,
    /// Errors.
    Error,
    /// Fatal.
    Fatal,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            "FATAL" => Ok(LogLevel::Fatal),
            other => Err(Error::ParseFailed(format!("unknown log_level '{other}'"))),
        }
    }
}

impl LogLevel {
    /// The `log::LevelFilter` this level configures the logger to.
    pub fn as_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => log::LevelFilter::Error,
        }
    }
}

/// The `[core]`/`[framework]` section (§6).
#[derive(Debug, Clone)]
pub struct Config {
    /// Log file path.
    pub log_file: String,
    /// Log verbosity.
    pub log_level: LogLevel,
    /// PID file path.
    pub pid_file: String,
    /// Soft cap on the number of registered tools (advisory; [`crate::registry::MAX_TOOLS`] is
    /// the hard cap).
    pub max_tools: usize,
    /// Event bus queue size (advisory; [`crate::event::MAX_EVENTS_QUEUE`] is the hard cap).
    pub message_queue_size: usize,
    /// Forces debug-level logging regardless of `log_level`.
    pub enable_debug: bool,
    /// Whether to start the loopback control socket.
    pub enable_remote_control: bool,
    /// Control socket port.
    pub control_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: "logs/yuki-frame.log".to_string(),
            log_level: LogLevel::Info,
            pid_file: "yuki-frame.pid".to_string(),
            max_tools: 50,
            message_queue_size: 1000,
            enable_debug: false,
            enable_remote_control: false,
            control_port: 9999,
        }
    }
}

/// One `[tool:<name>]` section (§6).
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Tool name (the part after `tool:`).
    pub name: String,
    /// Shell command line.
    pub command: String,
    /// Optional description.
    pub description: Option<String>,
    /// Start automatically at framework init.
    pub autostart: bool,
    /// Restart automatically when the process crashes.
    pub restart_on_crash: bool,
    /// Maximum automatic restarts.
    pub max_restarts: u32,
    /// Event-type subscriptions, already split and trimmed.
    pub subscriptions: Vec<String>,
}

impl ToolConfig {
    fn new(name: String) -> Self {
        Self {
            name,
            command: String::new(),
            description: None,
            autostart: false,
            restart_on_crash: false,
            max_restarts: 3,
            subscriptions: Vec::new(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}

/// A config file section header: `[core]`/`[framework]`, `[tool:<name>]`, or anything else
/// (ignored after a `warn` log, for forward compatibility).
enum Section {
    Core,
    Tool(String),
    Other,
}

/// Loads `path`, returning the global config plus one [`ToolConfig`] per `[tool:<name>]` section,
/// in file order. A missing file is [`Error::NotFound`]; a line that isn't a section header and
/// doesn't split on `=` is `warn`-logged and skipped rather than failing the whole load.
pub fn load(path: &Path) -> Result<(Config, Vec<ToolConfig>)> {
    let text = fs::read_to_string(path)
        .map_err(|_| Error::NotFound(format!("config file '{}'", path.display())))?;

    let mut config = Config::default();
    let mut tools: Vec<ToolConfig> = Vec::new();
    let mut section = Section::Other;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(inner) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            section = if inner.eq_ignore_ascii_case("core") || inner.eq_ignore_ascii_case("framework") {
                Section::Core
            } else if let Some(name) = inner.strip_prefix("tool:") {
                tools.push(ToolConfig::new(name.to_string()));
                Section::Tool(name.to_string())
            } else {
                log::warn!(target: "config", "ignoring unrecognised section '[{inner}]'");
                Section::Other
            };
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            log::warn!(
                target: "config",
                "{}:{}: line is neither a section header nor a key=value pair, skipping",
                path.display(),
                lineno + 1
            );
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match &section {
            Section::Core => apply_core_key(&mut config, key, value),
            Section::Tool(name) => {
                if let Some(tool) = tools.iter_mut().find(|t| &t.name == name) {
                    apply_tool_key(tool, key, value);
                }
            }
            Section::Other => {
                log::warn!(target: "config", "ignoring key '{key}' outside any recognised section");
            }
        }
    }

    Ok((config, tools))
}

fn apply_core_key(config: &mut Config, key: &str, value: &str) {
    match key {
        "log_file" => config.log_file = value.to_string(),
        "log_level" => match value.parse() {
            Ok(level) => config.log_level = level,
            Err(e) => log::warn!(target: "config", "invalid log_level '{value}': {e}"),
        },
        "pid_file" => config.pid_file = value.to_string(),
        "max_tools" => match value.parse() {
            Ok(n) => config.max_tools = n,
            Err(_) => log::warn!(target: "config", "invalid max_tools '{value}'"),
        },
        "message_queue_size" => match value.parse() {
            Ok(n) => config.message_queue_size = n,
            Err(_) => log::warn!(target: "config", "invalid message_queue_size '{value}'"),
        },
        "enable_debug" => config.enable_debug = is_truthy(value),
        "enable_remote_control" => config.enable_remote_control = is_truthy(value),
        "control_port" => match value.parse() {
            Ok(n) => config.control_port = n,
            Err(_) => log::warn!(target: "config", "invalid control_port '{value}'"),
        },
        other => log::warn!(target: "config", "ignoring unrecognised [core] key '{other}'"),
    }
}

fn apply_tool_key(tool: &mut ToolConfig, key: &str, value: &str) {
    match key {
        "command" => tool.command = value.to_string(),
        "description" => tool.description = Some(value.to_string()),
        "autostart" => tool.autostart = is_truthy(value),
        "restart_on_crash" => tool.restart_on_crash = is_truthy(value),
        "max_restarts" => match value.parse() {
            Ok(n) => tool.max_restarts = n,
            Err(_) => log::warn!(target: "config", "invalid max_restarts '{value}' for tool '{}'", tool.name),
        },
        // §9: both the source's `subscribe_to` and the in-memory `subscriptions` name are
        // accepted; whichever appears later in the section wins, consistent with the general
        // last-key-wins rule.
        "subscribe_to" | "subscriptions" => {
            tool.subscriptions =
                value.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        other => log::warn!(target: "config", "ignoring unrecognised tool key '{other}' for tool '{}'", tool.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_core_and_tool_sections() {
        let f = write_temp(
            "[core]\nlog_level = DEBUG\ncontrol_port = 8888\nenable_remote_control = yes\n\n\
             [tool:logger]\ncommand = cat\nautostart = yes\nsubscribe_to = foo, bar\n",
        );
        let (config, tools) = load(f.path()).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.control_port, 8888);
        assert!(config.enable_remote_control);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "logger");
        assert_eq!(tools[0].command, "cat");
        assert!(tools[0].autostart);
        assert_eq!(tools[0].subscriptions, vec!["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let f = write_temp("[core]\n");
        let (config, _) = load(f.path()).unwrap();
        assert_eq!(config.control_port, 9999);
        assert_eq!(config.max_tools, 50);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn subscriptions_synonym_and_last_key_wins() {
        let f = write_temp("[tool:a]\ncommand = true\nsubscribe_to = one\nsubscriptions = two, three\n");
        let (_, tools) = load(f.path()).unwrap();
        assert_eq!(tools[0].subscriptions, vec!["two".to_string(), "three".to_string()]);
    }

    #[test]
    fn truthy_values_are_case_insensitive() {
        let f = write_temp("[tool:a]\ncommand = true\nautostart = True\nrestart_on_crash = 1\n");
        let (_, tools) = load(f.path()).unwrap();
        assert!(tools[0].autostart);
        assert!(tools[0].restart_on_crash);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let f = write_temp("# a comment\n\n; also a comment\n[core]\nlog_level = WARN\n");
        let (config, _) = load(f.path()).unwrap();
        assert_eq!(config.log_level, LogLevel::Warn);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load(Path::new("/nonexistent/path/to/config.conf")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
