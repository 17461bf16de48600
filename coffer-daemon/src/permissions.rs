//! Caller identity: mapping the IPC peer's PID to an application id.

use std::collections::HashMap;

use sysinfo::{Pid, ProcessesToUpdate, System};

/// Resolves which application a caller PID belongs to.
pub trait CallerPermissions: Send + Sync {
    fn application_id(&self, caller_pid: u32) -> String;

    /// Platform applications share one application id and therefore one set
    /// of owned entries.
    fn is_platform_application(&self, _caller_pid: u32) -> bool {
        false
    }

    fn platform_application_id(&self) -> String {
        "platform".to_string()
    }

    /// The id ownership checks compare against.
    fn effective_application_id(&self, caller_pid: u32) -> String {
        if self.is_platform_application(caller_pid) {
            self.platform_application_id()
        } else {
            self.application_id(caller_pid)
        }
    }
}

/// Default resolver: the caller's process name from the process table,
/// falling back to a PID-derived id when the process has already exited.
pub struct ProcPermissions;

impl CallerPermissions for ProcPermissions {
    fn application_id(&self, caller_pid: u32) -> String {
        let pid = Pid::from_u32(caller_pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match sys.process(pid) {
            Some(process) => {
                let name = process.name().to_string_lossy().into_owned();
                if name.is_empty() {
                    format!("pid:{caller_pid}")
                } else {
                    name
                }
            }
            None => format!("pid:{caller_pid}"),
        }
    }
}

/// Fixed PID-to-application mapping for tests.
pub struct StaticPermissions {
    map: HashMap<u32, String>,
    fallback: String,
}

impl StaticPermissions {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            map: HashMap::new(),
            fallback: fallback.into(),
        }
    }

    pub fn with_application(mut self, caller_pid: u32, application_id: impl Into<String>) -> Self {
        self.map.insert(caller_pid, application_id.into());
        self
    }
}

impl CallerPermissions for StaticPermissions {
    fn application_id(&self, caller_pid: u32) -> String {
        self.map
            .get(&caller_pid)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_mapping_resolves_and_falls_back() {
        let permissions = StaticPermissions::new("other")
            .with_application(10, "app-a")
            .with_application(20, "app-b");
        assert_eq!(permissions.effective_application_id(10), "app-a");
        assert_eq!(permissions.effective_application_id(20), "app-b");
        assert_eq!(permissions.effective_application_id(30), "other");
    }

    #[test]
    fn proc_resolver_identifies_the_current_process() {
        let id = ProcPermissions.application_id(std::process::id());
        assert!(!id.is_empty());
        assert!(!id.starts_with("pid:"), "running process must resolve by name");
    }

    #[test]
    fn proc_resolver_falls_back_for_dead_pids() {
        // Far above the kernel's pid ceiling, so never a live process.
        let id = ProcPermissions.application_id(999_999_999);
        assert_eq!(id, "pid:999999999");
    }
}
