//! Child launch arguments and spawn strategies.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::bridge::SessionId;

/// Name of the child executable looked up on `PATH`.
pub const CHILD_PROGRAM: &str = "blurdev";

/// Subcommand the child executable runs.
pub const CHILD_SUBCOMMAND: &str = "child";

/// Everything a child needs to attach to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgs {
    pub session: SessionId,
    pub parent_pid: u32,
    pub parent_name: String,
    /// Host application identifier, used by the child to adapt windowing.
    pub core_name: String,
    pub window_handle: Option<u64>,
}

impl LaunchArgs {
    /// Command-line form, starting with the child subcommand.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            CHILD_SUBCOMMAND.to_string(),
            "--session".to_string(),
            self.session.to_string(),
            "--parent-pid".to_string(),
            self.parent_pid.to_string(),
            "--parent-name".to_string(),
            self.parent_name.clone(),
            "--core-name".to_string(),
            self.core_name.clone(),
        ];
        if let Some(handle) = self.window_handle {
            args.push("--window-handle".to_string());
            args.push(handle.to_string());
        }
        args
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("no child executable found (set BLURDEV_CHILD_EXE or put blurdev on PATH)")]
    ExecutableNotFound,
}

/// Extension point for different child spawn strategies.
///
/// The returned child must have piped stdin and stdout; they become the
/// channel.
pub trait Spawner: Send + Sync {
    fn spawn(&self, args: &LaunchArgs) -> Result<Child, SpawnError>;
}

/// Runs `<executable> child ...` with stdin/stdout piped and stderr inherited.
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    executable: PathBuf,
}

impl CommandSpawner {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

impl Spawner for CommandSpawner {
    fn spawn(&self, args: &LaunchArgs) -> Result<Child, SpawnError> {
        tracing::debug!(
            executable = %self.executable.display(),
            session = %args.session,
            "Spawning child process"
        );
        let child = Command::new(&self.executable)
            .args(args.to_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;
        Ok(child)
    }
}

/// Locate the child executable: the configured path (which already folds in
/// `BLURDEV_CHILD_EXE`), then the running executable when it is `blurdev`
/// itself, then `PATH`.
pub fn resolve_executable(configured: Option<&Path>) -> Result<PathBuf, SpawnError> {
    resolve_executable_from(
        configured,
        std::env::current_exe().ok(),
        std::env::var_os("PATH"),
    )
}

fn resolve_executable_from(
    configured: Option<&Path>,
    current_exe: Option<PathBuf>,
    path_var: Option<OsString>,
) -> Result<PathBuf, SpawnError> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    if let Some(exe) = current_exe
        && exe.file_stem().is_some_and(|stem| stem == CHILD_PROGRAM)
    {
        return Ok(exe);
    }
    let program = format!("{CHILD_PROGRAM}{}", std::env::consts::EXE_SUFFIX);
    path_var
        .iter()
        .flat_map(std::env::split_paths)
        .map(|dir| dir.join(&program))
        .find(|candidate| candidate.is_file())
        .ok_or(SpawnError::ExecutableNotFound)
}
