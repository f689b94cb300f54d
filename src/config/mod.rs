mod settings;

pub use settings::{
    validate_thresholds, BroadcastConfig, BufferConfig, ConnectionLimitsConfig, LoggingConfig,
    MemoryConfig, OtelConfig, ServerConfig, Settings,
};
