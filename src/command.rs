use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wildcard accepted for both entry and exit state.
pub const ANY_STATE: &str = "ANY";

/// Lifecycle states seeded by the core; configuration may extend the
/// vocabulary beyond these.
pub const STATE_NONE: &str = "NONE";
pub const STATE_INITIAL: &str = "INITIAL";

fn any_state() -> String {
    ANY_STATE.to_string()
}

/// Run-control command as delivered by the external command transport.
///
/// ```json
/// { "id": "start",
///   "entry_state": "READY",
///   "exit_state": "RUNNING",
///   "targets": [ { "select": "all", "data": { "run": 42 } } ] }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandEnvelope {
    pub id: String,
    #[serde(default = "any_state")]
    pub entry_state: String,
    #[serde(default = "any_state")]
    pub exit_state: String,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl CommandEnvelope {
    /// Envelope with wildcard entry/exit and no targets; builder-style
    /// helpers fill in the rest.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entry_state: any_state(),
            exit_state: any_state(),
            targets: Vec::new(),
        }
    }

    pub fn with_states(mut self, entry: impl Into<String>, exit: impl Into<String>) -> Self {
        self.entry_state = entry.into();
        self.exit_state = exit.into();
        self
    }

    pub fn with_target(mut self, select: Selector, data: Value) -> Self {
        self.targets.push(Target { select, data });
        self
    }
}

/// One addressed entry of a command: who it is for and with what payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Target {
    #[serde(default)]
    pub select: Selector,
    #[serde(default)]
    pub data: Value,
}

/// Addressing rule of a command target.
///
/// Wire grammar: `"all"` (or empty) addresses every module, `"kind:<type>"`
/// addresses every module of a configured kind, anything else is a
/// comma-separated list of module names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum Selector {
    All,
    Kind(String),
    Names(Vec<String>),
}

impl Default for Selector {
    fn default() -> Self {
        Selector::All
    }
}

impl Selector {
    pub fn names(names: &[&str]) -> Self {
        Selector::Names(names.iter().map(|n| n.to_string()).collect())
    }

    /// Does this rule address a module with the given name and kind?
    pub fn matches(&self, name: &str, kind: &str) -> bool {
        match self {
            Selector::All => true,
            Selector::Kind(k) => k == kind,
            Selector::Names(names) => names.iter().any(|n| n == name),
        }
    }
}

impl From<String> for Selector {
    fn from(raw: String) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("all") {
            return Selector::All;
        }
        if let Some(kind) = raw.strip_prefix("kind:") {
            return Selector::Kind(kind.trim().to_string());
        }
        Selector::Names(
            raw.split(',')
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
        )
    }
}

impl From<Selector> for String {
    fn from(sel: Selector) -> Self {
        match sel {
            Selector::All => "all".to_string(),
            Selector::Kind(k) => format!("kind:{k}"),
            Selector::Names(names) => names.join(","),
        }
    }
}

/// Payload of the run-seeding command.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct StartParams {
    pub run: u32,
}
