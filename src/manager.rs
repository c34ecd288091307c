use crate::command::{CommandEnvelope, Selector};
use crate::config::InitSpec;
use crate::error::{CommandError, InitError};
use crate::io::QueueRegistry;
use crate::module::{DaqModule, ModuleRegistry};
use crate::telemetry::Collector;
use ahash::AHashMap;
use parking_lot::Mutex;
use serde_json::Value;

/// One registered module plus everything matching needs without taking
/// its lock: name, kind and the command ids captured at construction.
struct ModuleCell {
    name: String,
    kind: String,
    commands: Vec<String>,
    module: Mutex<Box<dyn DaqModule>>,
}

impl ModuleCell {
    fn supports(&self, cmd: &str) -> bool {
        self.commands.is_empty() || self.commands.iter().any(|c| c == cmd)
    }
}

/// Payload assignment for one module of a routed command.
struct PlanEntry {
    idx: usize,
    payload: Value,
}

/// Owns the module registry built from configuration and routes commands
/// under the two dispatch policies.
pub struct ModuleManager {
    app: String,
    initialized: bool,
    cells: Vec<ModuleCell>,
    index: AHashMap<String, usize>,
    exclusive: Vec<String>,
}

impl ModuleManager {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            initialized: false,
            cells: Vec::new(),
            index: AHashMap::new(),
            exclusive: Vec::new(),
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    /// Registered module names, in registration order.
    pub fn module_names(&self) -> Vec<String> {
        self.cells.iter().map(|c| c.name.clone()).collect()
    }

    /// Build the topology: queues first so modules can bind to them, then
    /// each module in declaration order. Any failure is fatal.
    pub fn initialize(
        &mut self,
        registry: &ModuleRegistry,
        init: &InitSpec,
    ) -> Result<(), InitError> {
        let mut queues = QueueRegistry::new();
        queues.configure(&init.queues)?;

        for spec in &init.modules {
            if self.index.contains_key(&spec.name) {
                return Err(InitError::DuplicateModule {
                    name: spec.name.clone(),
                });
            }

            let module = registry.create(spec, &mut queues)?;
            let commands = module.commands().iter().map(|c| c.to_string()).collect();
            tracing::info!(app = %self.app, module = %spec.name, kind = %spec.kind, "module constructed");

            self.index.insert(spec.name.clone(), self.cells.len());
            self.cells.push(ModuleCell {
                name: spec.name.clone(),
                kind: spec.kind.clone(),
                commands,
                module: Mutex::new(module),
            });
        }

        self.exclusive = init.exclusive.clone();
        self.initialized = true;
        Ok(())
    }

    /// Modules addressed by `selector` that also respond to `cmd`, in
    /// registration order. Stable across repeated calls for the same
    /// registry state.
    pub fn get_targets(&self, cmd: &str, selector: &Selector) -> Vec<String> {
        self.cells
            .iter()
            .filter(|c| selector.matches(&c.name, &c.kind) && c.supports(cmd))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Assign each matched module the payload of the first target entry
    /// that addresses it; plan ordered by registration order.
    fn plan(&self, env: &CommandEnvelope) -> Vec<PlanEntry> {
        let mut taken = vec![false; self.cells.len()];
        let mut plan = Vec::new();

        for target in &env.targets {
            for (idx, cell) in self.cells.iter().enumerate() {
                if taken[idx] || !target.select.matches(&cell.name, &cell.kind) {
                    continue;
                }
                if !cell.supports(&env.id) {
                    continue;
                }
                taken[idx] = true;
                plan.push(PlanEntry {
                    idx,
                    payload: target.data.clone(),
                });
            }
        }

        plan.sort_by_key(|e| e.idx);
        plan
    }

    /// Route one command under the policy configured for its id.
    pub fn execute(&self, state: &str, env: &CommandEnvelope) -> Result<(), CommandError> {
        if !self.initialized {
            return Err(CommandError::NotInitialized {
                cmd: env.id.clone(),
            });
        }

        let plan = self.plan(env);
        if self.exclusive.iter().any(|c| c == &env.id) {
            self.dispatch_exclusive(state, &env.id, plan)
        } else {
            self.dispatch_merge(state, &env.id, plan)
        }
    }

    /// Exactly one matching module, or nothing runs.
    fn dispatch_exclusive(
        &self,
        state: &str,
        cmd: &str,
        plan: Vec<PlanEntry>,
    ) -> Result<(), CommandError> {
        if plan.len() != 1 {
            let matched = plan.iter().map(|e| self.cells[e.idx].name.clone()).collect();
            return Err(CommandError::ConflictingMatch {
                cmd: cmd.to_string(),
                matched,
            });
        }

        let entry = &plan[0];
        let name = &self.cells[entry.idx].name;
        match self.run_one(entry.idx, state, cmd, &entry.payload) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(app = %self.app, module = %name, cmd, "command failed: {e:#}");
                Err(CommandError::DispatchFailure {
                    cmd: cmd.to_string(),
                    failed: vec![name.clone()],
                })
            }
        }
    }

    /// Every matching module runs, even after earlier failures; the
    /// failing subset is reported as one decision.
    fn dispatch_merge(
        &self,
        state: &str,
        cmd: &str,
        plan: Vec<PlanEntry>,
    ) -> Result<(), CommandError> {
        let mut failed: Vec<String> = Vec::new();

        for entry in &plan {
            let name = &self.cells[entry.idx].name;
            if let Err(e) = self.run_one(entry.idx, state, cmd, &entry.payload) {
                tracing::error!(app = %self.app, module = %name, cmd, "command failed: {e:#}");
                failed.push(name.clone());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(CommandError::DispatchFailure {
                cmd: cmd.to_string(),
                failed,
            })
        }
    }

    fn run_one(&self, idx: usize, state: &str, cmd: &str, payload: &Value) -> anyhow::Result<()> {
        let cell = &self.cells[idx];
        let mut module = cell.module.lock();
        if !module.ready() {
            anyhow::bail!("module {} is not ready", cell.name);
        }
        module.execute(state, cmd, payload)
    }

    /// Pull every module's telemetry. A module that fails, or that is
    /// locked by an in-flight command, is skipped; aggregation always
    /// completes.
    pub fn gather_stats(&self, collector: &mut Collector, level: u32) {
        for cell in &self.cells {
            let Some(mut module) = cell.module.try_lock() else {
                tracing::debug!(module = %cell.name, "module busy, telemetry skipped");
                continue;
            };

            let mut child = Collector::default();
            match module.report(&mut child, level) {
                Ok(()) => collector.nest(&cell.name, child),
                Err(e) => {
                    tracing::error!(module = %cell.name, "telemetry collection failed: {e:#}");
                }
            }
        }
    }

    /// Tear modules down in reverse registration order, best-effort.
    pub fn cleanup(&mut self) {
        for cell in self.cells.iter().rev() {
            if let Err(e) = cell.module.lock().teardown() {
                tracing::error!(module = %cell.name, "teardown failed: {e:#}");
            }
        }
        self.cells.clear();
        self.index.clear();
        self.initialized = false;
    }
}
