//! Memory sampling sources

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::DeliveryError;

/// Source of the process's current memory use in bytes
pub trait MemorySampler: Send + Sync {
    fn sample_memory(&self) -> Result<u64, DeliveryError>;
}

/// Resident memory of the current process, read through `sysinfo`
pub struct ProcessMemorySampler {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessMemorySampler {
    pub fn new() -> Result<Self, DeliveryError> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| DeliveryError::Sampling(format!("cannot resolve current pid: {}", e)))?;

        Ok(Self {
            pid,
            system: Mutex::new(System::new()),
        })
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample_memory(&self) -> Result<u64, DeliveryError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| DeliveryError::poisoned("memory sampler"))?;

        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), false);
        system
            .process(self.pid)
            .map(sysinfo::Process::memory)
            .ok_or_else(|| DeliveryError::Sampling(format!("process {} not found", self.pid)))
    }
}

/// Fixed, settable reading. Useful for embedding and for tests.
#[derive(Debug, Default)]
pub struct StaticMemorySampler {
    memory_bytes: AtomicU64,
    failing: AtomicBool,
}

impl StaticMemorySampler {
    pub fn new(memory_bytes: u64) -> Self {
        Self {
            memory_bytes: AtomicU64::new(memory_bytes),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set(&self, memory_bytes: u64) {
        self.memory_bytes.store(memory_bytes, Ordering::SeqCst);
    }

    /// While set, every sample returns an error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl MemorySampler for StaticMemorySampler {
    fn sample_memory(&self) -> Result<u64, DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Sampling("sampler set to fail".to_string()));
        }
        Ok(self.memory_bytes.load(Ordering::SeqCst))
    }
}
