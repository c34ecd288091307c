use crate::command::{ANY_STATE, CommandEnvelope, STATE_INITIAL, STATE_NONE, StartParams, Target};
use crate::config::{AppConfig, ConfSource};
use crate::error::{CommandError, InvalidReason};
use crate::manager::ModuleManager;
use crate::module::ModuleRegistry;
use crate::telemetry::{
    AppInfo, Collector, RunInfo, Sampler, StatsSource, TelemetrySettings, TelemetrySink,
    host_identity,
};
use crate::utils::{CancelToken, Flag, StateCell};
use parking_lot::{Mutex, RwLock};
use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Run bookkeeping; the start instant stays private to the controller.
#[derive(Debug, Default)]
struct RunState {
    info: RunInfo,
    started: Option<Instant>,
}

/// Top-level lifecycle state machine of one application instance.
///
/// Validates incoming commands against the current state and the
/// busy/error overlays, forwards them to the module manager, and
/// aggregates hierarchical telemetry. Safe to share across threads; the
/// `busy` flag serializes command execution.
pub struct Application {
    name: String,
    fqn: String,
    conf: Arc<dyn ConfSource>,
    registry: ModuleRegistry,
    mgr: RwLock<ModuleManager>,
    state: StateCell,
    busy: Flag,
    error: Flag,
    initialized: Flag,
    /// Root cancellation token; cancelling it stops command intake.
    intake: CancelToken,
    run: Mutex<RunState>,
}

impl Application {
    pub fn new(cfg: AppConfig, conf: Arc<dyn ConfSource>, registry: ModuleRegistry) -> Self {
        Self {
            fqn: cfg.fully_qualified_name(),
            mgr: RwLock::new(ModuleManager::new(cfg.name.as_str())),
            name: cfg.name,
            conf,
            registry,
            state: StateCell::new(STATE_NONE),
            busy: Flag::new(false),
            error: Flag::new(false),
            initialized: Flag::new(false),
            intake: CancelToken::new_root(),
            run: Mutex::new(RunState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fully_qualified_name(&self) -> &str {
        &self.fqn
    }

    pub fn state(&self) -> Arc<String> {
        self.state.get()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    pub fn is_error(&self) -> bool {
        self.error.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    /// Build the module topology from the configuration source and move
    /// the application to INITIAL.
    pub fn init(&self) -> anyhow::Result<()> {
        let spec = self.conf.init_data(&self.name)?;
        self.mgr.write().initialize(&self.registry, &spec)?;
        self.state.set(STATE_INITIAL);
        self.initialized.raise();
        tracing::info!(app = %self.fqn, "topology initialized");
        Ok(())
    }

    /// Stop accepting commands; checked before validation of every
    /// envelope. The only cancellation surface: an in-flight dispatch is
    /// never interrupted.
    pub fn halt_intake(&self) {
        self.intake.cancel();
    }

    /// Clear a latched error. The explicit administrative recovery path;
    /// a successful command never clears the latch implicitly.
    pub fn acknowledge_error(&self) -> bool {
        let was = self.error.get();
        if was {
            self.error.clear();
            tracing::warn!(app = %self.fqn, "error flag acknowledged and cleared");
        }
        was
    }

    /// Execute one run-control command end to end.
    ///
    /// Atomic from the caller's perspective: `busy` is false before this
    /// returns, a second command cannot start while one is outstanding,
    /// and a failed dispatch leaves a diagnosable `error` latch instead of
    /// a half-applied state.
    pub fn execute(&self, env: &CommandEnvelope) -> Result<(), CommandError> {
        let cmd = env.id.as_str();

        if self.intake.is_cancelled() {
            return Err(CommandError::invalid(cmd, InvalidReason::Draining));
        }
        if self.error.get() {
            return Err(CommandError::invalid(cmd, InvalidReason::ErrorLatched));
        }
        // Atomic read-and-set: two commands racing here cannot both win.
        if !self.busy.try_raise() {
            return Err(CommandError::invalid(cmd, InvalidReason::Busy));
        }

        // Re-check under busy ownership; an error latched by a command
        // that finished between the gate above and the CAS must still
        // block us.
        if self.error.get() {
            self.busy.clear();
            return Err(CommandError::invalid(cmd, InvalidReason::ErrorLatched));
        }

        let state = self.state.get();
        if env.entry_state != ANY_STATE && *state != env.entry_state {
            self.busy.clear();
            return Err(CommandError::invalid(
                cmd,
                InvalidReason::WrongEntryState {
                    expected: env.entry_state.clone(),
                    actual: state.to_string(),
                },
            ));
        }

        let env = match self.apply_command_data(env) {
            Ok(env) => env,
            Err(reason) => {
                self.busy.clear();
                return Err(CommandError::invalid(cmd, reason));
            }
        };

        if let Err(reason) = self.preprocess(&env) {
            self.busy.clear();
            return Err(CommandError::invalid(cmd, reason));
        }

        tracing::info!(app = %self.fqn, cmd, state = %state, "executing command");
        match self.mgr.read().execute(&state, &env) {
            Ok(()) => {
                self.busy.clear();
                if env.exit_state != ANY_STATE {
                    self.state.set(env.exit_state.as_str());
                    tracing::info!(app = %self.fqn, cmd, exit = %env.exit_state, "state transition");
                }
                Ok(())
            }
            Err(e) => {
                self.busy.clear();
                self.error.raise();
                tracing::error!(app = %self.fqn, cmd, "command failed: {e}");
                Err(e)
            }
        }
    }

    /// Command-specific pre-processing, before any module is touched.
    /// `start` seeds the run bookkeeping from the first target's payload;
    /// `stop` clears it.
    fn preprocess(&self, env: &CommandEnvelope) -> Result<(), InvalidReason> {
        match env.id.as_str() {
            "start" => {
                let first = env.targets.first().ok_or_else(|| {
                    InvalidReason::MalformedPayload("start carries no target payload".to_string())
                })?;
                let pars: StartParams = serde_json::from_value(first.data.clone())
                    .map_err(|e| InvalidReason::MalformedPayload(e.to_string()))?;

                let mut run = self.run.lock();
                run.info = RunInfo {
                    running: true,
                    run_number: pars.run,
                    runtime_secs: 0,
                };
                run.started = Some(Instant::now());
            }
            "stop" => {
                let mut run = self.run.lock();
                run.info = RunInfo::default();
                run.started = None;
            }
            _ => {}
        }
        Ok(())
    }

    /// Let the configuration source supply payloads the envelope does not
    /// carry itself, e.g. `conf` parameters kept in a config database: a
    /// stored payload fills every null target, or becomes a broadcast
    /// target when the envelope has none.
    fn apply_command_data(&self, env: &CommandEnvelope) -> Result<CommandEnvelope, InvalidReason> {
        let stored = self
            .conf
            .command_data(&self.name, &env.id)
            .map_err(|e| InvalidReason::MalformedPayload(format!("{e:#}")))?;

        let Some(stored) = stored else {
            return Ok(env.clone());
        };

        let mut env = env.clone();
        if env.targets.is_empty() {
            env.targets.push(Target {
                select: Default::default(),
                data: stored,
            });
        } else {
            for target in &mut env.targets {
                if target.data.is_null() {
                    target.data = stored.clone();
                }
            }
        }
        Ok(env)
    }

    /// Current run bookkeeping, with the elapsed runtime recomputed while
    /// a run is in progress.
    pub fn run_info(&self) -> RunInfo {
        let mut run = self.run.lock();
        if run.info.running && let Some(started) = run.started {
            run.info.runtime_secs = started.elapsed().as_secs();
        }
        run.info
    }

    /// Drive the application until `end` rises: periodic telemetry while
    /// alive, then intake stop and controlled teardown.
    pub fn run(self: &Arc<Self>, end: &AtomicBool, sink: Arc<dyn TelemetrySink>) -> anyhow::Result<()> {
        if !self.initialized.get() {
            anyhow::bail!("application {} is not initialized", self.name);
        }

        let settings = TelemetrySettings::from_env();
        let source: Arc<dyn StatsSource> = self.clone();
        let sampler = Sampler::start(source, sink, settings, self.intake.new_child());

        while !end.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(50));
        }

        tracing::info!(app = %self.fqn, "end marker observed, shutting down");
        self.halt_intake();
        sampler.stop();
        self.mgr.write().cleanup();
        Ok(())
    }

    /// Like [`run`](Self::run), with the end marker wired to the process
    /// termination signals.
    pub fn run_until_terminated(self: &Arc<Self>, sink: Arc<dyn TelemetrySink>) -> anyhow::Result<()> {
        let end = Arc::new(AtomicBool::new(false));
        for sig in TERM_SIGNALS {
            flag::register(*sig, end.clone())?;
        }
        self.run(&end, sink)
    }
}

impl StatsSource for Application {
    /// Snapshot of the whole application, keyed by its fully-qualified
    /// name. Level 0 carries only the top-level records; module
    /// aggregation is skipped entirely, not filtered.
    fn gather_stats(&self, collector: &mut Collector, level: u32) {
        let state = self.state.get();
        let mut app = Collector::default();

        app.record(
            "app",
            &AppInfo {
                state: state.to_string(),
                busy: self.busy.get(),
                error: self.error.get(),
                host: host_identity(),
            },
        )
        .ok();
        app.record("run", &self.run_info()).ok();

        if level > 0 && state.as_str() != STATE_NONE && state.as_str() != STATE_INITIAL {
            let mut modules = Collector::default();
            self.mgr.read().gather_stats(&mut modules, level);
            app.nest("modules", modules);
        }

        collector.nest(&self.fqn, app);
    }
}
