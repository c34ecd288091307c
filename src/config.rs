use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Identity and tunables of one application instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub name: String,
    /// Partition the application runs in; prefixes the fully-qualified name.
    #[serde(default = "default_partition")]
    pub partition: String,
}

fn default_partition() -> String {
    "global".to_string()
}

impl AppConfig {
    pub fn new(name: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
        }
    }

    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}", self.partition, self.name)
    }
}

/// Declared queue endpoint: name plus fixed capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueSpec {
    pub name: String,
    pub capacity: usize,
}

/// Declared module: unique name, factory kind, endpoint wiring and an
/// opaque construction payload interpreted by the factory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModuleSpec {
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub data: Value,
}

/// Topology description consumed by `ModuleManager::initialize`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InitSpec {
    #[serde(default)]
    pub queues: Vec<QueueSpec>,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    /// Command ids that dispatch exclusively (exactly one matching module).
    #[serde(default)]
    pub exclusive: Vec<String>,
}

/// Configuration provider boundary.
///
/// Backends are interchangeable: a structured-document file, an in-memory
/// map, or a configuration database all sit behind this contract; the
/// application controller never knows which.
pub trait ConfSource: Send + Sync {
    /// Topology for the named application.
    fn init_data(&self, app: &str) -> anyhow::Result<InitSpec>;

    /// Optional per-command payload override (e.g. the `conf` parameters),
    /// `None` when the command carries its own data.
    fn command_data(&self, app: &str, cmd: &str) -> anyhow::Result<Option<Value>>;
}

/// Flat structured-document backend built on the `config` crate
/// (JSON/TOML/YAML by file extension).
///
/// Document layout, either single-app or keyed by application name:
///
/// ```json
/// { "init": { "queues": [...], "modules": [...] },
///   "commands": { "conf": { ... } } }
/// ```
/// or `{ "apps": { "<name>": { "init": ..., "commands": ... } } }`.
pub struct FileConfSource {
    root: Value,
}

impl FileConfSource {
    pub fn load(path: impl AsRef<str>) -> anyhow::Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(PathBuf::from(path.as_ref())))
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.as_ref()))?;

        let root: Value = cfg
            .try_deserialize()
            .with_context(|| format!("failed to deserialize configuration from {}", path.as_ref()))?;

        Ok(Self { root })
    }

    fn section(&self, app: &str) -> &Value {
        match self.root.get("apps").and_then(|apps| apps.get(app)) {
            Some(section) => section,
            None => &self.root,
        }
    }
}

impl ConfSource for FileConfSource {
    fn init_data(&self, app: &str) -> anyhow::Result<InitSpec> {
        let init = self
            .section(app)
            .get("init")
            .with_context(|| format!("no init section for application {app}"))?;
        serde_json::from_value(init.clone())
            .with_context(|| format!("bad init section for application {app}"))
    }

    fn command_data(&self, app: &str, cmd: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .section(app)
            .get("commands")
            .and_then(|cmds| cmds.get(cmd))
            .cloned())
    }
}

/// In-process backend; also the test double for the file source.
#[derive(Default)]
pub struct MemoryConfSource {
    init: InitSpec,
    commands: Vec<(String, Value)>,
}

impl MemoryConfSource {
    pub fn new(init: InitSpec) -> Self {
        Self {
            init,
            commands: Vec::new(),
        }
    }

    pub fn with_command_data(mut self, cmd: impl Into<String>, data: Value) -> Self {
        self.commands.push((cmd.into(), data));
        self
    }
}

impl ConfSource for MemoryConfSource {
    fn init_data(&self, _app: &str) -> anyhow::Result<InitSpec> {
        Ok(self.init.clone())
    }

    fn command_data(&self, _app: &str, cmd: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .commands
            .iter()
            .find(|(id, _)| id == cmd)
            .map(|(_, data)| data.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_source_resolves_single_app_layout() {
        let dir = std::env::temp_dir().join("daqrt-conf-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("app.json");
        std::fs::write(
            &path,
            json!({
                "init": {
                    "queues": [ { "name": "frames", "capacity": 8 } ],
                    "modules": [ { "name": "gen", "kind": "generator" } ],
                    "exclusive": [ "seed" ]
                },
                "commands": { "conf": { "threshold": 7 } }
            })
            .to_string(),
        )
        .unwrap();

        let src = FileConfSource::load(path.to_str().unwrap()).unwrap();
        let init = src.init_data("daq0").unwrap();
        assert_eq!(init.queues.len(), 1);
        assert_eq!(init.modules[0].kind, "generator");
        assert_eq!(init.exclusive, vec!["seed"]);

        let conf = src.command_data("daq0", "conf").unwrap().unwrap();
        assert_eq!(conf["threshold"], 7);
        assert!(src.command_data("daq0", "start").unwrap().is_none());
    }

    #[test]
    fn memory_source_serves_init_and_command_data() {
        let src = MemoryConfSource::new(InitSpec {
            queues: vec![],
            modules: vec![],
            exclusive: vec!["seed".into()],
        })
        .with_command_data("conf", json!({ "gain": 2 }));

        assert_eq!(src.init_data("any").unwrap().exclusive, vec!["seed"]);
        assert_eq!(src.command_data("any", "conf").unwrap().unwrap()["gain"], 2);
        assert!(src.command_data("any", "stop").unwrap().is_none());
    }
}
