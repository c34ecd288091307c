#[cfg(test)]
mod tests {
    use crate::app::Application;
    use crate::command::{CommandEnvelope, Selector};
    use crate::config::{AppConfig, InitSpec, MemoryConfSource, ModuleSpec, QueueSpec};
    use crate::error::{CommandError, InvalidReason};
    use crate::module::{DaqModule, ModuleRegistry};
    use crate::telemetry::{Collector, StatsSource, TelemetrySink};
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Test module: journals every call, optionally fails one command id,
    /// optionally stalls to keep the controller busy.
    struct Probe {
        name: String,
        journal: Arc<Mutex<Vec<String>>>,
        fail_cmd: Option<String>,
        stall: Option<Duration>,
    }

    impl DaqModule for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn execute(&mut self, _state: &str, cmd: &str, payload: &Value) -> anyhow::Result<()> {
            if let Some(stall) = self.stall {
                thread::sleep(stall);
            }
            let suffix = payload
                .get("tag")
                .and_then(|v| v.as_str())
                .map(|t| format!("[{t}]"))
                .unwrap_or_default();
            self.journal.lock().push(format!("{}:{}{}", self.name, cmd, suffix));
            if self.fail_cmd.as_deref() == Some(cmd) {
                anyhow::bail!("simulated module failure");
            }
            Ok(())
        }

        fn report(&mut self, collector: &mut Collector, _level: u32) -> anyhow::Result<()> {
            collector.record("executed", &self.journal.lock().len())
        }

        fn teardown(&mut self) -> anyhow::Result<()> {
            self.journal.lock().push(format!("{}:teardown", self.name));
            Ok(())
        }
    }

    struct Fixture {
        app: Arc<Application>,
        journal: Arc<Mutex<Vec<String>>>,
    }

    /// Three probe modules a/b/c wired through one queue pair; module
    /// behavior is driven by each module spec's construction payload.
    fn fixture() -> Fixture {
        let journal: Arc<Mutex<Vec<String>>> = Arc::default();

        let mut registry = ModuleRegistry::new();
        {
            let journal = journal.clone();
            registry.register("probe", move |spec: &ModuleSpec, queues: &mut crate::io::QueueRegistry| {
                // Wiring is claimed even though probes never pump data;
                // a bad declaration must fail construction.
                for output in &spec.outputs {
                    let _tx = queues.sink::<u64>(output, &spec.name)?;
                }
                for input in &spec.inputs {
                    let _rx = queues.source::<u64>(input, &spec.name)?;
                }
                Ok(Box::new(Probe {
                    name: spec.name.clone(),
                    journal: journal.clone(),
                    fail_cmd: spec
                        .data
                        .get("fail_cmd")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    stall: spec
                        .data
                        .get("stall_ms")
                        .and_then(|v| v.as_u64())
                        .map(Duration::from_millis),
                }) as Box<dyn DaqModule>)
            });
        }

        let conf = MemoryConfSource::new(init_spec(Value::Null))
            .with_command_data("conf", json!({ "tag": "fromdb" }));

        let app = Arc::new(Application::new(
            AppConfig::new("daq0", "test"),
            Arc::new(conf),
            registry,
        ));

        Fixture { app, journal }
    }

    fn init_spec(module_b_data: Value) -> InitSpec {
        InitSpec {
            queues: vec![QueueSpec {
                name: "frames".into(),
                capacity: 8,
            }],
            modules: vec![
                ModuleSpec {
                    name: "a".into(),
                    kind: "probe".into(),
                    inputs: vec![],
                    outputs: vec!["frames".into()],
                    data: Value::Null,
                },
                ModuleSpec {
                    name: "b".into(),
                    kind: "probe".into(),
                    inputs: vec!["frames".into()],
                    outputs: vec![],
                    data: module_b_data,
                },
                ModuleSpec {
                    name: "c".into(),
                    kind: "probe".into(),
                    inputs: vec![],
                    outputs: vec![],
                    data: Value::Null,
                },
            ],
            exclusive: vec!["seed".into()],
        }
    }

    fn fixture_with_failing_b(fail_cmd: &str) -> Fixture {
        let journal: Arc<Mutex<Vec<String>>> = Arc::default();
        let mut registry = ModuleRegistry::new();
        {
            let journal = journal.clone();
            registry.register("probe", move |spec: &ModuleSpec, _q: &mut crate::io::QueueRegistry| {
                Ok(Box::new(Probe {
                    name: spec.name.clone(),
                    journal: journal.clone(),
                    fail_cmd: spec
                        .data
                        .get("fail_cmd")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    stall: None,
                }) as Box<dyn DaqModule>)
            });
        }
        let conf = MemoryConfSource::new(init_spec(json!({ "fail_cmd": fail_cmd })));
        let app = Arc::new(Application::new(
            AppConfig::new("daq0", "test"),
            Arc::new(conf),
            registry,
        ));
        Fixture { app, journal }
    }

    fn broadcast(id: &str) -> CommandEnvelope {
        CommandEnvelope::new(id).with_target(Selector::All, Value::Null)
    }

    fn snapshot(app: &Application, level: u32) -> Value {
        let mut collector = Collector::default();
        app.gather_stats(&mut collector, level);
        collector.into_value()
    }

    #[test]
    fn command_before_init_is_fatal_to_that_command_only() {
        let f = fixture();
        let err = f.app.execute(&broadcast("conf")).unwrap_err();
        assert!(matches!(err, CommandError::NotInitialized { .. }));
        assert_eq!(*f.app.state(), "NONE");
        assert!(f.journal.lock().is_empty());
    }

    #[test]
    fn init_then_level0_snapshot_round_trip() {
        let f = fixture();
        f.app.init().unwrap();
        assert_eq!(*f.app.state(), "INITIAL");

        let snap = snapshot(&f.app, 0);
        let top = &snap["test.daq0"];
        assert_eq!(top["app"]["state"], "INITIAL");
        assert_eq!(top["app"]["busy"], false);
        assert_eq!(top["app"]["error"], false);
        assert!(top["app"]["host"].as_str().is_some());
        assert!(top.get("modules").is_none(), "level 0 skips module telemetry");
    }

    #[test]
    fn busy_is_false_before_and_after_every_execute() {
        let f = fixture_with_failing_b("start");
        f.app.init().unwrap();

        assert!(!f.app.is_busy());
        f.app
            .execute(&broadcast("conf").with_states("INITIAL", "CONFIGURED"))
            .unwrap();
        assert!(!f.app.is_busy());

        let env = CommandEnvelope::new("start")
            .with_states("CONFIGURED", "RUNNING")
            .with_target(Selector::All, json!({ "run": 5 }));
        assert!(f.app.execute(&env).is_err());
        assert!(!f.app.is_busy(), "busy must clear on the failure path too");
    }

    #[test]
    fn full_lifecycle_with_run_bookkeeping() {
        let f = fixture();
        f.app.init().unwrap();

        f.app
            .execute(&broadcast("conf").with_states("INITIAL", "CONFIGURED"))
            .unwrap();
        assert_eq!(*f.app.state(), "CONFIGURED");

        let start = CommandEnvelope::new("start")
            .with_states("CONFIGURED", "RUNNING")
            .with_target(Selector::All, json!({ "run": 42 }));
        f.app.execute(&start).unwrap();
        assert_eq!(*f.app.state(), "RUNNING");

        let run = f.app.run_info();
        assert!(run.running);
        assert_eq!(run.run_number, 42);

        let snap = snapshot(&f.app, 1);
        let top = &snap["test.daq0"];
        assert_eq!(top["run"]["run_number"], 42);
        assert_eq!(top["run"]["running"], true);
        assert!(top["modules"].get("a").is_some());
        assert!(top["modules"].get("b").is_some());
        assert!(top["modules"].get("c").is_some());

        f.app
            .execute(&broadcast("stop").with_states("RUNNING", "CONFIGURED"))
            .unwrap();
        let run = f.app.run_info();
        assert!(!run.running);
        assert_eq!(run.run_number, 0);
        assert_eq!(run.runtime_secs, 0);
    }

    #[test]
    fn entry_state_mismatch_rejects_without_side_effects() {
        let f = fixture();
        f.app.init().unwrap();

        let env = broadcast("start").with_states("CONFIGURED", "RUNNING");
        let err = f.app.execute(&env).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Invalid {
                reason: InvalidReason::WrongEntryState { .. },
                ..
            }
        ));
        assert_eq!(*f.app.state(), "INITIAL");
        assert!(!f.app.is_error());
        assert!(f.journal.lock().is_empty());
    }

    #[test]
    fn any_entry_succeeds_from_every_state_and_any_exit_never_mutates() {
        let f = fixture();
        f.app.init().unwrap();

        for next in ["CONFIGURED", "RUNNING", "DRAINING"] {
            // ANY -> ANY probe first: must pass and leave the state alone.
            let before = f.app.state();
            f.app.execute(&broadcast("probe")).unwrap();
            assert_eq!(*f.app.state(), *before);

            f.app
                .execute(&broadcast("walk").with_states("ANY", next))
                .unwrap();
            assert_eq!(*f.app.state(), next);
        }
    }

    #[test]
    fn merge_failure_latches_error_and_blocks_all_further_commands() {
        let f = fixture_with_failing_b("init");
        f.app.init().unwrap();

        let err = f.app.execute(&broadcast("init")).unwrap_err();
        match err {
            CommandError::DispatchFailure { failed, .. } => assert_eq!(failed, vec!["b"]),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // All three ran; no short-circuit.
        assert_eq!(*f.journal.lock(), vec!["a:init", "b:init", "c:init"]);
        assert_eq!(*f.app.state(), "INITIAL");
        assert!(f.app.is_error());

        for cmd in ["conf", "start", "stop", "probe"] {
            let err = f.app.execute(&broadcast(cmd)).unwrap_err();
            assert!(matches!(
                err,
                CommandError::Invalid {
                    reason: InvalidReason::ErrorLatched,
                    ..
                }
            ));
        }
        assert_eq!(f.journal.lock().len(), 3, "no module ran while latched");

        assert!(f.app.acknowledge_error());
        assert!(!f.app.is_error());
        f.app.execute(&broadcast("probe")).unwrap();
    }

    #[test]
    fn exclusive_command_requires_exactly_one_match() {
        let f = fixture();
        f.app.init().unwrap();

        // "seed" is configured exclusive; a broadcast matches all three.
        let err = f.app.execute(&broadcast("seed")).unwrap_err();
        match err {
            CommandError::ConflictingMatch { matched, .. } => {
                assert_eq!(matched, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(f.journal.lock().is_empty(), "conflict must precede execution");
        assert!(f.app.is_error());

        f.app.acknowledge_error();
        f.app
            .execute(&CommandEnvelope::new("seed").with_target(Selector::names(&["b"]), Value::Null))
            .unwrap();
        assert_eq!(*f.journal.lock(), vec!["b:seed"]);
    }

    #[test]
    fn conf_payload_comes_from_the_configuration_source() {
        let f = fixture();
        f.app.init().unwrap();

        // The broadcast target carries null data; the memory backend
        // supplies the stored "conf" parameters instead.
        f.app.execute(&broadcast("conf")).unwrap();
        assert_eq!(
            *f.journal.lock(),
            vec!["a:conf[fromdb]", "b:conf[fromdb]", "c:conf[fromdb]"]
        );
    }

    #[test]
    fn racing_commands_serialize_on_the_busy_flag() {
        let journal: Arc<Mutex<Vec<String>>> = Arc::default();
        let mut registry = ModuleRegistry::new();
        {
            let journal = journal.clone();
            registry.register("probe", move |spec: &ModuleSpec, _q: &mut crate::io::QueueRegistry| {
                Ok(Box::new(Probe {
                    name: spec.name.clone(),
                    journal: journal.clone(),
                    fail_cmd: None,
                    stall: Some(Duration::from_millis(150)),
                }) as Box<dyn DaqModule>)
            });
        }
        let conf = MemoryConfSource::new(InitSpec {
            queues: vec![],
            modules: vec![ModuleSpec {
                name: "slow".into(),
                kind: "probe".into(),
                inputs: vec![],
                outputs: vec![],
                data: Value::Null,
            }],
            exclusive: vec![],
        });
        let app = Arc::new(Application::new(
            AppConfig::new("daq0", "test"),
            Arc::new(conf),
            registry,
        ));
        app.init().unwrap();

        let racer = {
            let app = app.clone();
            thread::spawn(move || app.execute(&broadcast("crawl")))
        };
        thread::sleep(Duration::from_millis(40));

        let err = app.execute(&broadcast("crawl")).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Invalid {
                reason: InvalidReason::Busy,
                ..
            }
        ));
        racer.join().unwrap().unwrap();
        assert_eq!(journal.lock().len(), 1);
        assert!(!app.is_busy());
    }

    struct VecSink(Mutex<Vec<Value>>);

    impl TelemetrySink for VecSink {
        fn deliver(&self, snapshot: Value) -> anyhow::Result<()> {
            self.0.lock().push(snapshot);
            Ok(())
        }
    }

    #[test]
    fn run_loop_tears_down_and_stops_intake() {
        let f = fixture();
        f.app.init().unwrap();

        let end = Arc::new(AtomicBool::new(false));
        let sink = Arc::new(VecSink(Mutex::new(Vec::new())));

        let runner = {
            let app = f.app.clone();
            let end = end.clone();
            let sink = sink.clone();
            thread::spawn(move || app.run(&end, sink))
        };

        thread::sleep(Duration::from_millis(100));
        end.store(true, Ordering::Release);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !runner.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        runner.join().unwrap().unwrap();

        // Teardown ran in reverse registration order.
        let journal = f.journal.lock().clone();
        assert_eq!(journal, vec!["c:teardown", "b:teardown", "a:teardown"]);

        // Intake is closed for good.
        let err = f.app.execute(&broadcast("probe")).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Invalid {
                reason: InvalidReason::Draining,
                ..
            }
        ));
    }

    #[test]
    fn run_refuses_before_init() {
        let f = fixture();
        let end = AtomicBool::new(false);
        let sink = Arc::new(VecSink(Mutex::new(Vec::new())));
        assert!(f.app.run(&end, sink).is_err());
    }

    #[test]
    fn malformed_start_payload_is_rejected_without_latching() {
        let f = fixture();
        f.app.init().unwrap();

        let env = CommandEnvelope::new("start")
            .with_states("INITIAL", "RUNNING")
            .with_target(Selector::All, json!({ "not_run": true }));
        let err = f.app.execute(&env).unwrap_err();
        assert!(matches!(
            err,
            CommandError::Invalid {
                reason: InvalidReason::MalformedPayload(_),
                ..
            }
        ));
        assert_eq!(*f.app.state(), "INITIAL");
        assert!(!f.app.is_error());
        assert!(!f.app.is_busy());
        assert!(f.journal.lock().is_empty());
    }
}
