//! Process supervisor: owns the child process and this side of the channel.
//!
//! A parent-side supervisor spawns at most one live child and waits for its
//! ready frame. A child-side supervisor is attached to the channel it was
//! launched with and watches its parent for orphaning. Both are driven from a
//! single task; nothing here is shared across threads.

mod liveness;
mod spawn;

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio_util::sync::CancellationToken;

use crate::bridge::{Channel, ChannelError, Frame, RemoteError, SessionId};
use crate::config::BusConfig;
use crate::protocol::Command;

pub use liveness::{ExitMonitor, LivenessProbe, SysinfoProbe};
pub use spawn::{
    CHILD_PROGRAM, CHILD_SUBCOMMAND, CommandSpawner, LaunchArgs, SpawnError, Spawner,
    resolve_executable,
};

/// Application name a child reports for itself.
pub const CHILD_APP_NAME: &str = "external";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Uninitialized,
    Spawning,
    /// Parent side with a live child.
    Running,
    /// Child side, attached to its parent.
    ChildRunning,
    ShuttingDown,
    Closed,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Spawning => "spawning",
            Self::Running => "running",
            Self::ChildRunning => "child_running",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies the live child of a parent-side supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
    pub pid: u32,
    pub session: SessionId,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("child did not report ready within {0:?}")]
    SpawnTimeout(Duration),
    #[error("child failed during startup: {0}")]
    SpawnFailed(String),
    #[error("failed waiting for child: {0}")]
    Io(#[from] std::io::Error),
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

pub struct Supervisor {
    is_child: bool,
    state: SupervisorState,
    channel: Option<Channel>,
    /// Closed channel whose writer may still be flushing.
    closing: Option<Channel>,
    child: Option<Child>,
    child_handle: Option<ChildHandle>,
    exit_monitor: Option<ExitMonitor>,
    check_if_orphaned: bool,
    parent_core_name: Option<String>,
    core_name: String,
    window_handle: Option<u64>,
    spawn_timeout: Duration,
    child_executable: Option<std::path::PathBuf>,
    spawner: Option<Arc<dyn Spawner>>,
    probe: Arc<dyn LivenessProbe>,
    shutdown_hooks: Vec<ShutdownHook>,
    shutdown: CancellationToken,
    spawn_count: usize,
}

impl Supervisor {
    fn base(config: &BusConfig) -> Self {
        Self {
            is_child: false,
            state: SupervisorState::Uninitialized,
            channel: None,
            closing: None,
            child: None,
            child_handle: None,
            exit_monitor: None,
            check_if_orphaned: false,
            parent_core_name: None,
            core_name: config.core_name.clone(),
            window_handle: config.window_handle,
            spawn_timeout: config.spawn_timeout,
            child_executable: config.child_executable.clone(),
            spawner: None,
            probe: Arc::new(SysinfoProbe::new()),
            shutdown_hooks: Vec::new(),
            shutdown: CancellationToken::new(),
            spawn_count: 0,
        }
    }

    /// Parent-side supervisor. No child is spawned until [`ensure_child`].
    ///
    /// [`ensure_child`]: Self::ensure_child
    pub fn parent(config: &BusConfig) -> Self {
        Self::base(config)
    }

    /// Child-side supervisor attached to the channel this process was launched
    /// with. Announces itself to the parent with a ready frame.
    pub fn attach_child(args: &LaunchArgs, channel: Channel, config: &BusConfig) -> Self {
        let mut supervisor = Self::base(config);
        supervisor.is_child = true;
        supervisor.state = SupervisorState::ChildRunning;
        supervisor.exit_monitor = Some(ExitMonitor::new(args.parent_pid, args.parent_name.clone()));
        supervisor.check_if_orphaned = true;
        supervisor.parent_core_name = Some(args.core_name.clone());
        supervisor.window_handle = args.window_handle;

        let ready = Frame::Ready {
            session: args.session,
            pid: std::process::id(),
            app_name: CHILD_APP_NAME.to_string(),
        };
        if !channel.send(ready) {
            tracing::warn!(session = %args.session, "Could not announce child to parent");
        }
        tracing::info!(
            session = %args.session,
            parent_pid = args.parent_pid,
            parent_name = %args.parent_name,
            core = %args.core_name,
            "Attached to parent"
        );
        supervisor.channel = Some(channel);
        supervisor
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Make sure a live child exists, spawning one if needed.
    ///
    /// Returns `None` in the child process itself. Repeated calls return the
    /// same handle while that child is alive.
    pub async fn ensure_child(&mut self) -> Result<Option<ChildHandle>, SupervisorError> {
        if self.is_child {
            return Ok(None);
        }
        if let Some(handle) = self.live_child() {
            return Ok(Some(handle));
        }

        self.state = SupervisorState::Spawning;
        let result = self.spawn_child().await;
        match &result {
            Ok(handle) => {
                self.state = SupervisorState::Running;
                self.spawn_count += 1;
                tracing::info!(pid = handle.pid, session = %handle.session, "Child process ready");
            }
            Err(e) => {
                self.state = SupervisorState::Closed;
                tracing::error!(error = %e, "Failed to start child process");
            }
        }
        result.map(Some)
    }

    async fn spawn_child(&mut self) -> Result<ChildHandle, SupervisorError> {
        let spawner = self.spawner()?;
        let session = SessionId::new();
        let args = LaunchArgs {
            session,
            parent_pid: std::process::id(),
            parent_name: SysinfoProbe::current_process_name(),
            core_name: self.core_name.clone(),
            window_handle: self.window_handle,
        };

        let mut child = spawner.spawn(&args)?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            kill(&mut child).await;
            return Err(SupervisorError::SpawnFailed(
                "child stdin/stdout not captured".to_string(),
            ));
        };
        let mut channel = Channel::spawn(stdout, stdin);

        tracing::debug!(%session, timeout = ?self.spawn_timeout, "Waiting for child ready");
        let ready = tokio::time::timeout(self.spawn_timeout, wait_ready(&mut channel, session)).await;
        let reported_pid = match ready {
            Ok(Ok(pid)) => pid,
            Ok(Err(e)) => {
                kill(&mut child).await;
                return Err(SupervisorError::SpawnFailed(e.to_string()));
            }
            Err(_) => {
                kill(&mut child).await;
                return Err(SupervisorError::SpawnTimeout(self.spawn_timeout));
            }
        };

        let handle = ChildHandle {
            pid: child.id().unwrap_or(reported_pid),
            session,
        };
        self.child = Some(child);
        self.child_handle = Some(handle);
        self.channel = Some(channel);
        Ok(handle)
    }

    fn spawner(&mut self) -> Result<Arc<dyn Spawner>, SpawnError> {
        if let Some(spawner) = &self.spawner {
            return Ok(Arc::clone(spawner));
        }
        let executable = resolve_executable(self.child_executable.as_deref())?;
        let spawner: Arc<dyn Spawner> = Arc::new(CommandSpawner::new(executable));
        self.spawner = Some(Arc::clone(&spawner));
        Ok(spawner)
    }

    /// The current child if it is still running and its channel is intact.
    fn live_child(&mut self) -> Option<ChildHandle> {
        let handle = self.child_handle?;
        let exited = match self.child.as_mut() {
            Some(child) => !matches!(child.try_wait(), Ok(None)),
            None => false,
        };
        let broken = self.channel.as_ref().is_none_or(Channel::is_broken);
        if exited || broken {
            tracing::info!(pid = handle.pid, exited, broken, "Child process is gone");
            self.child = None;
            self.child_handle = None;
            self.channel = None;
            self.state = SupervisorState::Closed;
            return None;
        }
        Some(handle)
    }

    /// Queue `payload` for the other end. Returns whether a channel existed to
    /// write to.
    pub fn send(&self, payload: serde_json::Value) -> bool {
        match &self.channel {
            Some(channel) => channel.send(Frame::payload(payload)),
            None => false,
        }
    }

    pub fn send_command(&self, command: &Command) -> bool {
        self.send(command.to_payload())
    }

    pub fn send_error(&self, error: &RemoteError) -> bool {
        self.send(error.to_payload())
    }

    /// Next pending payload, without waiting.
    ///
    /// A lost channel is dropped for good. With orphan checking enabled it
    /// forces shutdown; otherwise it reads as "no data".
    pub fn poll_once(&mut self) -> Option<serde_json::Value> {
        loop {
            let received = self.channel.as_mut()?.try_recv();
            match received {
                Ok(None) => return None,
                Ok(Some(Frame::Payload { payload })) => return Some(payload),
                Ok(Some(Frame::Shutdown)) if self.is_child => {
                    tracing::info!("Shutdown requested by parent");
                    self.check_orphaned(true);
                    return None;
                }
                Ok(Some(frame)) => {
                    tracing::debug!(kind = frame.kind(), "Ignoring unexpected frame");
                }
                Err(e) => {
                    self.channel_lost(e);
                    return None;
                }
            }
        }
    }

    fn channel_lost(&mut self, err: ChannelError) {
        tracing::info!(error = %err, "Channel ended");
        self.channel = None;
        if self.check_if_orphaned {
            self.check_orphaned(true);
        } else if !self.is_child {
            // The handle stays until the process is seen to exit or is
            // replaced by `ensure_child`.
            self.state = SupervisorState::Closed;
        }
    }

    /// Shut down if forced or the parent process is gone. Returns whether a
    /// shutdown happened (now or earlier).
    pub fn check_orphaned(&mut self, force: bool) -> bool {
        if self.shutdown.is_cancelled() {
            return true;
        }
        if !force {
            let Some(monitor) = &self.exit_monitor else {
                return false;
            };
            if self.probe.is_alive(monitor) {
                return false;
            }
            tracing::info!(
                pid = monitor.pid,
                name = %monitor.process_name,
                "Parent process is gone"
            );
        }
        self.shutdown_now();
        true
    }

    fn shutdown_now(&mut self) {
        self.state = SupervisorState::ShuttingDown;
        tracing::info!(hooks = self.shutdown_hooks.len(), "Shutting down");
        for hook in self.shutdown_hooks.drain(..) {
            hook();
        }
        if let Some(mut channel) = self.channel.take() {
            if !self.is_child {
                channel.send(Frame::Shutdown);
            }
            channel.close();
            self.closing = Some(channel);
        }
        self.shutdown.cancel();
        self.state = SupervisorState::Closed;
    }

    /// Wait up to `timeout` for frames queued before shutdown to be written.
    pub async fn drain(&mut self, timeout: Duration) {
        if let Some(channel) = self.closing.take()
            && tokio::time::timeout(timeout, channel.flush_and_close())
                .await
                .is_err()
        {
            tracing::warn!(timeout = ?timeout, "Gave up flushing channel");
        }
    }

    /// Parent side: ask the child to exit, wait up to `grace`, then kill it.
    pub async fn shutdown_child(
        &mut self,
        grace: Duration,
    ) -> Result<Option<ExitStatus>, SupervisorError> {
        if let Some(mut channel) = self.channel.take() {
            channel.send(Frame::Shutdown);
            channel.close();
        }
        self.child_handle = None;
        let status = match self.child.take() {
            Some(mut child) => match tokio::time::timeout(grace, child.wait()).await {
                Ok(status) => Some(status?),
                Err(_) => {
                    tracing::warn!(grace = ?grace, "Child did not exit in time, killing");
                    child.kill().await?;
                    child.try_wait()?
                }
            },
            None => None,
        };
        if self.state != SupervisorState::Uninitialized {
            self.state = SupervisorState::Closed;
        }
        tracing::debug!(?status, "Child shut down");
        Ok(status)
    }

    /// Register a hook run once, in registration order, when shutdown starts.
    pub fn on_shutdown(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.shutdown_hooks.push(Box::new(hook));
    }

    /// Cancelled when shutdown completes.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn is_child(&self) -> bool {
        self.is_child
    }

    /// Core name of the parent application (child side only).
    pub fn parent_core_name(&self) -> Option<&str> {
        self.parent_core_name.as_deref()
    }

    pub fn window_handle(&self) -> Option<u64> {
        self.window_handle
    }

    pub fn exit_monitor(&self) -> Option<&ExitMonitor> {
        self.exit_monitor.as_ref()
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child_handle.map(|h| h.pid)
    }

    /// Number of children spawned so far.
    pub fn spawn_count(&self) -> usize {
        self.spawn_count
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn pending_messages(&self) -> usize {
        self.channel.as_ref().map_or(0, Channel::pending)
    }

    pub fn check_if_orphaned(&self) -> bool {
        self.check_if_orphaned
    }

    pub fn set_check_if_orphaned(&mut self, enabled: bool) {
        self.check_if_orphaned = enabled;
    }

    /// Parent-side supervisor wired to an in-memory channel, no process.
    #[cfg(test)]
    pub(crate) fn connected(channel: Channel) -> Self {
        let mut supervisor = Self::base(&BusConfig::default());
        supervisor.state = SupervisorState::Running;
        supervisor.channel = Some(channel);
        supervisor
    }
}

async fn wait_ready(channel: &mut Channel, session: SessionId) -> Result<u32, ChannelError> {
    loop {
        match channel.recv().await? {
            Frame::Ready {
                session: reported,
                pid,
                app_name,
            } if reported == session => {
                tracing::debug!(pid, %app_name, "Child reported ready");
                return Ok(pid);
            }
            Frame::Ready {
                session: reported, ..
            } => {
                tracing::warn!(%reported, expected = %session, "Ignoring ready frame for another session");
            }
            other => {
                tracing::warn!(kind = other.kind(), "Discarding frame received before ready");
            }
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "Failed to kill child process");
    }
}
