//! Host collaborators that handlers act on.
//!
//! Handlers never reach for UI or tool machinery directly; they go through a
//! [`Host`]. [`ConsoleHost`] is the headless host: tools come from a TOML
//! [`ToolIndex`], UI requests are logged, and output goes to the process's
//! standard streams.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Output stream named by the `pipe` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

impl FromStr for OutputStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(Self::Stdout),
            "stderr" => Ok(Self::Stderr),
            other => Err(format!("unknown stream '{other}', expected stdout or stderr")),
        }
    }
}

/// A named tool or application that can be launched.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> io::Result<()>;
}

/// Surfaces a handler may act on.
pub trait Host: Send + Sync {
    fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>>;

    fn show_logger(&self);

    fn show_treegrunt(&self);

    /// Identify this process for diagnostics.
    fn set_active_app_name(&self, name: &str);

    fn write_output(&self, stream: OutputStream, text: &str) -> io::Result<()>;
}

/// How to launch one tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolSpec {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolIndexFile {
    #[serde(default)]
    tools: BTreeMap<String, ToolSpec>,
}

/// Tool name to launch spec, loaded from TOML:
///
/// ```toml
/// [tools.DailyTool]
/// program = "/opt/tools/daily"
/// args = ["--quiet"]
/// ```
#[derive(Debug, Clone, Default)]
pub struct ToolIndex {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolIndex {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadTools {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|source| ConfigError::ParseTools {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        let file: ToolIndexFile = toml::from_str(text)?;
        Ok(Self { tools: file.tools })
    }

    pub fn insert(&mut self, name: impl Into<String>, spec: ToolSpec) {
        self.tools.insert(name.into(), spec);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Exact match first, then case-insensitive.
    pub fn get(&self, name: &str) -> Option<(&str, &ToolSpec)> {
        self.tools
            .get_key_value(name)
            .or_else(|| {
                self.tools
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
            })
            .map(|(key, spec)| (key.as_str(), spec))
    }
}

/// Tool launched as a detached process and reaped in the background.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    spec: ToolSpec,
}

impl CommandTool {
    pub fn new(name: impl Into<String>, spec: ToolSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> io::Result<()> {
        let mut command = std::process::Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }
        let mut child = command.spawn()?;
        let pid = child.id();
        tracing::info!(tool = %self.name, pid, program = %self.spec.program.display(), "Launched tool");

        // The launching process may run for a long time; reap the tool off-thread.
        let name = self.name.clone();
        std::thread::Builder::new()
            .name(format!("reap-{pid}"))
            .spawn(move || match child.wait() {
                Ok(status) => tracing::debug!(tool = %name, pid, %status, "Tool exited"),
                Err(e) => tracing::warn!(tool = %name, pid, error = %e, "Failed waiting for tool"),
            })?;
        Ok(())
    }
}

/// Headless host.
pub struct ConsoleHost {
    tools: ToolIndex,
    stdout_to_stderr: bool,
    app_name: Mutex<Option<String>>,
}

impl ConsoleHost {
    pub fn new(tools: ToolIndex) -> Self {
        Self {
            tools,
            stdout_to_stderr: false,
            app_name: Mutex::new(None),
        }
    }

    /// Send `Stdout` output to stderr. The child process needs this because
    /// its stdout carries the channel.
    pub fn with_stdout_to_stderr(mut self, redirect: bool) -> Self {
        self.stdout_to_stderr = redirect;
        self
    }

    pub fn active_app_name(&self) -> Option<String> {
        match self.app_name.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Host for ConsoleHost {
    fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let (key, spec) = self.tools.get(name)?;
        Some(Arc::new(CommandTool::new(key, spec.clone())))
    }

    fn show_logger(&self) {
        tracing::info!(app = ?self.active_app_name(), "Logger requested");
    }

    fn show_treegrunt(&self) {
        tracing::info!(app = ?self.active_app_name(), "Treegrunt requested");
    }

    fn set_active_app_name(&self, name: &str) {
        tracing::debug!(name, "Setting active application name");
        let mut guard = match self.app_name.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(name.to_string());
    }

    fn write_output(&self, stream: OutputStream, text: &str) -> io::Result<()> {
        match stream {
            OutputStream::Stdout if !self.stdout_to_stderr => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes())?;
                out.flush()
            }
            _ => {
                let mut err = io::stderr().lock();
                err.write_all(text.as_bytes())?;
                err.flush()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
        [tools.DailyTool]
        program = "/opt/tools/daily"
        args = ["--quiet"]

        [tools.wtf]
        program = "wtf"
        cwd = "/tmp"
    "#;

    #[test]
    fn tool_index_parses_toml() {
        let index = ToolIndex::from_toml_str(INDEX).unwrap();
        assert_eq!(index.len(), 2);

        let (name, spec) = index.get("DailyTool").unwrap();
        assert_eq!(name, "DailyTool");
        assert_eq!(spec.program, PathBuf::from("/opt/tools/daily"));
        assert_eq!(spec.args, vec!["--quiet".to_string()]);
        assert!(spec.cwd.is_none());
    }

    #[test]
    fn tool_lookup_falls_back_to_case_insensitive() {
        let index = ToolIndex::from_toml_str(INDEX).unwrap();
        assert_eq!(index.get("dailytool").map(|(name, _)| name), Some("DailyTool"));
        assert!(index.get("missing").is_none());
    }

    #[test]
    fn empty_index_is_valid() {
        let index = ToolIndex::from_toml_str("").unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn tool_index_loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tools.toml");
        std::fs::write(&path, INDEX).unwrap();

        let index = ToolIndex::load(&path).unwrap();
        assert!(index.get("wtf").is_some());

        let missing = ToolIndex::load(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadTools { .. })));

        std::fs::write(&path, "[tools.bad]\nargs = 3\n").unwrap();
        assert!(matches!(
            ToolIndex::load(&path),
            Err(ConfigError::ParseTools { .. })
        ));
    }

    #[test]
    fn console_host_resolves_tools_and_tracks_app_name() {
        let host = ConsoleHost::new(ToolIndex::from_toml_str(INDEX).unwrap());
        assert_eq!(host.find_tool("wtf").unwrap().name(), "wtf");
        assert!(host.find_tool("missing").is_none());

        assert_eq!(host.active_app_name(), None);
        host.set_active_app_name("external");
        assert_eq!(host.active_app_name(), Some("external".to_string()));
    }

    #[test]
    fn output_stream_parses() {
        assert_eq!("stdout".parse::<OutputStream>(), Ok(OutputStream::Stdout));
        assert_eq!("stderr".parse::<OutputStream>(), Ok(OutputStream::Stderr));
        assert!("stdin".parse::<OutputStream>().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn command_tool_launches() {
        let tool = CommandTool::new(
            "true",
            ToolSpec {
                program: PathBuf::from("true"),
                args: Vec::new(),
                cwd: None,
            },
        );
        tool.run().unwrap();

        let broken = CommandTool::new(
            "missing",
            ToolSpec {
                program: PathBuf::from("/definitely/not/a/program"),
                args: Vec::new(),
                cwd: None,
            },
        );
        assert!(broken.run().is_err());
    }

    /// Children of this process whose command name is `name`, zombies included.
    #[cfg(target_os = "linux")]
    fn children_named(name: &str) -> usize {
        let me = std::process::id().to_string();
        std::fs::read_dir("/proc")
            .unwrap()
            .filter_map(Result::ok)
            .filter_map(|entry| std::fs::read_to_string(entry.path().join("stat")).ok())
            .filter(|stat| {
                let Some((head, rest)) = stat.rsplit_once(')') else {
                    return false;
                };
                let comm = head.split_once('(').map(|(_, comm)| comm);
                let ppid = rest.split_whitespace().nth(1);
                comm == Some(name) && ppid == Some(me.as_str())
            })
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn launched_tools_are_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let target = ["/usr/bin/true", "/bin/true"]
            .into_iter()
            .map(Path::new)
            .find(|path| path.exists())
            .expect("no `true` binary");
        let program = dir.path().join("reaped-tool");
        std::os::unix::fs::symlink(target, &program).unwrap();

        let mut index = ToolIndex::default();
        index.insert(
            "quick",
            ToolSpec {
                program,
                args: Vec::new(),
                cwd: None,
            },
        );
        let host = ConsoleHost::new(index);
        for _ in 0..5 {
            host.find_tool("quick").unwrap().run().unwrap();
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        loop {
            let left = children_named("reaped-tool");
            if left == 0 {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "{left} launched tools were never reaped"
            );
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
    }
}
