pub use crate::app::Application;
pub use crate::command::{
    ANY_STATE, CommandEnvelope, STATE_INITIAL, STATE_NONE, Selector, StartParams, Target,
};
pub use crate::config::{
    AppConfig, ConfSource, FileConfSource, InitSpec, MemoryConfSource, ModuleSpec, QueueSpec,
};
pub use crate::error::{ClaimError, CommandError, InitError, InvalidReason, PopError, PushError};
pub use crate::io::{QueueRegistry, QueueSink, QueueSource, SpscQueue, SpscReceiver, SpscSender};
pub use crate::manager::ModuleManager;
pub use crate::module::{DaqModule, ModuleRegistry};
pub use crate::telemetry::{
    Collector, LogSink, RunInfo, Sampler, StatsSource, TelemetrySettings, TelemetrySink,
};
pub use crate::utils::logger::LogConfig;
pub use crate::utils::{CancelToken, Flag, StateCell};
