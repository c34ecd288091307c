use crate::config::ModuleSpec;
use crate::error::InitError;
use crate::io::QueueRegistry;
use crate::telemetry::Collector;
use ahash::AHashMap;
use serde_json::Value;

/// Contract every processing module implements.
///
/// Modules are constructed once during topology initialization, live for
/// the whole run, and are torn down in `cleanup`. Errors cross this
/// boundary as `anyhow`; the manager folds them into the command-error
/// taxonomy.
pub trait DaqModule: Send {
    /// Unique module name; the manager indexes the registry by it.
    fn name(&self) -> &str;

    /// Command ids this module responds to. Empty slice: responds to any.
    fn commands(&self) -> &[&str] {
        &[]
    }

    /// Whether the module can accept a command right now.
    fn ready(&self) -> bool {
        true
    }

    /// Apply one routed command.
    fn execute(&mut self, state: &str, cmd: &str, payload: &Value) -> anyhow::Result<()>;

    /// Contribute to a telemetry snapshot. A failure here is logged by the
    /// manager and the module's contribution skipped; it never aborts the
    /// aggregation.
    fn report(&mut self, collector: &mut Collector, level: u32) -> anyhow::Result<()> {
        let _ = (collector, level);
        Ok(())
    }

    /// Controlled teardown; best-effort, invoked in reverse registration
    /// order.
    fn teardown(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn DaqModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaqModule")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Factory that binds a declared module spec to a concrete implementation,
/// claiming its queue endpoints on the way.
pub type ModuleFactory =
    Box<dyn Fn(&ModuleSpec, &mut QueueRegistry) -> anyhow::Result<Box<dyn DaqModule>> + Send + Sync>;

/// Map of module kind to factory, populated by explicit registration at
/// startup. Keeps configuration-declared kind strings late-bound to
/// concrete types without any reflection.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: AHashMap<String, ModuleFactory>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for `kind`. Last registration wins, which lets
    /// tests shadow a production kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleSpec, &mut QueueRegistry) -> anyhow::Result<Box<dyn DaqModule>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleSpec, &mut QueueRegistry) -> anyhow::Result<Box<dyn DaqModule>>
            + Send
            + Sync
            + 'static,
    {
        self.register(kind, factory);
        self
    }

    /// Construct the module declared by `spec`.
    pub fn create(
        &self,
        spec: &ModuleSpec,
        queues: &mut QueueRegistry,
    ) -> Result<Box<dyn DaqModule>, InitError> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| InitError::UnknownKind {
                module: spec.name.clone(),
                kind: spec.kind.clone(),
            })?;

        factory(spec, queues).map_err(|source| InitError::Construction {
            module: spec.name.clone(),
            source,
        })
    }
}
