//! Process memory monitoring, pressure classification and reclamation.

mod resource_monitor;
mod sampler;
mod types;

pub use resource_monitor::{
    PressureCallback, Reclaimer, ResourceMonitor, AGGRESSIVE_RECLAIM_PASSES,
};
pub use sampler::{MemorySampler, ProcessMemorySampler, StaticMemorySampler};
pub use types::{
    MonitorReport, PressureLevel, ReclaimEvent, ResourceSample, Thresholds, TriggerMode,
};
