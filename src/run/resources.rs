use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Watches the resident memory of the current process against a high-water mark.
pub struct MemoryMonitor {
    system: System,
    pid: Option<Pid>,
    high_water: u64,
}

impl MemoryMonitor {
    #[must_use]
    pub fn new(high_water: u64) -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|err| tracing::warn!(error = err, "cannot identify current process"))
            .ok();
        Self {
            system: System::new(),
            pid,
            high_water,
        }
    }

    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Current resident set size in bytes, if it can be measured.
    pub fn resident_bytes(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        self.system.process(pid).map(sysinfo::Process::memory)
    }

    /// Whether resident memory is above the high-water mark. Unmeasurable memory never is.
    pub fn exceeded(&mut self) -> bool {
        match self.resident_bytes() {
            Some(bytes) if bytes > self.high_water => {
                tracing::info!(
                    memory.resident = bytes,
                    memory.high_water = self.high_water,
                    "memory high-water mark exceeded"
                );
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("pid", &self.pid)
            .field("high_water", &self.high_water)
            .finish_non_exhaustive()
    }
}
