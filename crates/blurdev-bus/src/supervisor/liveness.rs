//! Parent-process liveness checks for orphan detection.

use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};

/// The process a child watches: its parent, identified by pid and name.
///
/// The name guards against pid reuse after the parent exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitMonitor {
    pub pid: u32,
    pub process_name: String,
}

impl ExitMonitor {
    pub fn new(pid: u32, process_name: impl Into<String>) -> Self {
        Self {
            pid,
            process_name: process_name.into(),
        }
    }
}

pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, monitor: &ExitMonitor) -> bool;
}

/// Probe backed by the OS process table.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Name of `pid` as the process table reports it.
    pub fn process_name(pid: u32) -> Option<String> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system
            .process(pid)
            .map(|p| p.name().to_string_lossy().into_owned())
    }

    /// Name other processes will see for this one.
    pub fn current_process_name() -> String {
        Self::process_name(std::process::id())
            .or_else(|| {
                std::env::current_exe()
                    .ok()
                    .and_then(|exe| exe.file_name().map(|n| n.to_string_lossy().into_owned()))
            })
            .unwrap_or_default()
    }
}

impl LivenessProbe for SysinfoProbe {
    fn is_alive(&self, monitor: &ExitMonitor) -> bool {
        let pid = Pid::from_u32(monitor.pid);
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let Some(process) = system.process(pid) else {
            return false;
        };
        // An empty name means the parent could not be named at spawn time.
        monitor.process_name.is_empty() || process.name().to_string_lossy() == monitor.process_name
    }
}
