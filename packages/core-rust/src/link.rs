//! The worker's channel back to its process supervisor.
//!
//! The supervisor is a black box from the worker's point of view: it spawned
//! the process, it expects periodic liveness notifications, and it recorded
//! the parent pid the worker should still see while the supervisor is alive.

/// Contract between a worker process and its supervisor.
pub trait SupervisorLink: Send + Sync {
    /// Supervisor-level base initialization for a freshly spawned process.
    ///
    /// Runs once, before the worker constructs its event loop. A failure
    /// here is fatal: the worker must exit without leaving partial state.
    ///
    /// # Errors
    ///
    /// Returns an error when base initialization cannot complete.
    fn init_process(&self) -> anyhow::Result<()>;

    /// Reports liveness to the supervisor.
    ///
    /// Called from timer ticks on the worker's event loop, so it must not
    /// block.
    fn notify(&self);

    /// Parent process id recorded at spawn time.
    ///
    /// The watchdog compares this against the OS-reported parent to detect
    /// orphaning.
    fn ppid(&self) -> u32;
}

/// Link used when a worker runs without a real supervisor (standalone
/// binaries, tests).
///
/// Records the current parent pid at construction and turns liveness
/// notifications into trace events.
#[derive(Debug, Clone)]
pub struct StandaloneLink {
    ppid: u32,
}

impl StandaloneLink {
    /// Creates a standalone link, recording the current parent process id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ppid: current_parent_pid(),
        }
    }
}

impl Default for StandaloneLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SupervisorLink for StandaloneLink {
    fn init_process(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn notify(&self) {
        tracing::trace!("worker liveness notify");
    }

    fn ppid(&self) -> u32 {
        self.ppid
    }
}

/// OS-reported parent process id of the current process.
#[must_use]
pub fn current_parent_pid() -> u32 {
    #[cfg(unix)]
    {
        std::os::unix::process::parent_id()
    }
    #[cfg(not(unix))]
    {
        // No parent-pid notion to compare against on this platform.
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standalone_link_records_current_parent() {
        let link = StandaloneLink::new();
        assert_eq!(link.ppid(), current_parent_pid());
    }

    #[test]
    fn standalone_init_process_succeeds() {
        let link = StandaloneLink::new();
        assert!(link.init_process().is_ok());
    }

    #[test]
    fn link_is_usable_as_trait_object() {
        let link: Box<dyn SupervisorLink> = Box::new(StandaloneLink::new());
        link.notify();
        assert_eq!(link.ppid(), current_parent_pid());
    }
}
