use crate::utils::CancelToken;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Hierarchical telemetry snapshot under construction.
///
/// Leaf records are serde-serialized values; child collectors nest under a
/// name, producing one self-describing tree per aggregation.
#[derive(Debug, Default, Clone)]
pub struct Collector {
    entries: Map<String, Value>,
}

impl Collector {
    /// Serialize `info` under `tag`.
    pub fn record<T: Serialize>(&mut self, tag: &str, info: &T) -> anyhow::Result<()> {
        self.entries
            .insert(tag.to_string(), serde_json::to_value(info)?);
        Ok(())
    }

    /// Attach a child snapshot under `name`. Empty children are kept: an
    /// empty branch still says the source was reachable.
    pub fn nest(&mut self, name: &str, child: Collector) {
        self.entries
            .insert(name.to_string(), Value::Object(child.entries));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.entries)
    }
}

/// Top-level application record of every snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct AppInfo {
    pub state: String,
    pub busy: bool,
    pub error: bool,
    pub host: String,
}

/// Run bookkeeping attached alongside the application record.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunInfo {
    pub running: bool,
    pub run_number: u32,
    pub runtime_secs: u64,
}

/// Where this process runs; "unknown" when the OS will not say.
pub fn host_identity() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Anything that can populate a collector on demand. The application
/// controller is the provider; the sampler only knows this seam.
pub trait StatsSource: Send + Sync + 'static {
    fn gather_stats(&self, collector: &mut Collector, level: u32);
}

/// Receiving end of periodic snapshots.
pub trait TelemetrySink: Send + Sync + 'static {
    fn deliver(&self, snapshot: Value) -> anyhow::Result<()>;
}

/// Sink that emits snapshots through the tracing pipeline.
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn deliver(&self, snapshot: Value) -> anyhow::Result<()> {
        tracing::info!(target: "daqrt::telemetry", %snapshot);
        Ok(())
    }
}

/// Sampling cadence and detail level.
///
/// Environment variables: `DAQRT_TELEMETRY_INTERVAL` (seconds, default 10)
/// and `DAQRT_TELEMETRY_LEVEL` (default 1).
#[derive(Debug, Clone, Copy)]
pub struct TelemetrySettings {
    pub interval: Duration,
    pub level: u32,
}

impl TelemetrySettings {
    pub fn from_env() -> Self {
        let interval = std::env::var("DAQRT_TELEMETRY_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        let level = std::env::var("DAQRT_TELEMETRY_LEVEL")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);

        Self {
            interval: Duration::from_secs(interval.max(1)),
            level,
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            level: 1,
        }
    }
}

/// Background thread pulling snapshots from a [`StatsSource`] into a
/// [`TelemetrySink`] on a fixed cadence until cancelled.
pub struct Sampler {
    cancel: CancelToken,
    join: Option<JoinHandle<()>>,
}

impl Sampler {
    pub fn start(
        source: Arc<dyn StatsSource>,
        sink: Arc<dyn TelemetrySink>,
        settings: TelemetrySettings,
        cancel: CancelToken,
    ) -> Self {
        let worker_cancel = cancel.clone();
        let join = std::thread::spawn(move || {
            while worker_cancel.sleep_cancellable(settings.interval) {
                let mut collector = Collector::default();
                source.gather_stats(&mut collector, settings.level);
                if let Err(e) = sink.deliver(collector.into_value()) {
                    tracing::error!("telemetry delivery failed: {e:#}");
                }
            }
        });

        Self {
            cancel,
            join: Some(join),
        }
    }

    /// Cancel and join the sampling thread.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn collector_builds_nested_tree() {
        let mut child = Collector::default();
        child
            .record("run", &RunInfo {
                running: true,
                run_number: 3,
                runtime_secs: 12,
            })
            .unwrap();

        let mut root = Collector::default();
        root.nest("global.daq0", child);
        assert!(!root.is_empty());
        assert_eq!(root.len(), 1);

        let value = root.into_value();
        assert_eq!(value["global.daq0"]["run"]["run_number"], 3);
        assert_eq!(value["global.daq0"]["run"]["running"], true);
    }

    struct CountingSource;

    impl StatsSource for CountingSource {
        fn gather_stats(&self, collector: &mut Collector, level: u32) {
            collector.record("level", &level).ok();
        }
    }

    struct VecSink(Mutex<Vec<Value>>);

    impl TelemetrySink for VecSink {
        fn deliver(&self, snapshot: Value) -> anyhow::Result<()> {
            self.0.lock().push(snapshot);
            Ok(())
        }
    }

    #[test]
    fn sampler_pulls_until_cancelled() {
        let sink = Arc::new(VecSink(Mutex::new(Vec::new())));
        let settings = TelemetrySettings {
            interval: Duration::from_millis(10),
            level: 2,
        };

        let sampler = Sampler::start(
            Arc::new(CountingSource),
            sink.clone(),
            settings,
            CancelToken::new_root(),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while sink.0.lock().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        sampler.stop();

        let delivered = sink.0.lock();
        assert!(delivered.len() >= 2);
        assert_eq!(delivered[0]["level"], 2);
    }
}
