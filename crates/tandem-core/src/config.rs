//! Sandbox configuration.
//!
//! Every struct has a `Default` that matches the documented behaviour, and
//! deserializes with missing fields filled from those defaults, so a config
//! file only needs to mention what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for an execution sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Scripting engine settings.
    pub scripting: ScriptingConfig,

    /// Relational engine settings.
    pub relational: RelationalConfig,

    /// Per-run deadline. `None` lets a run go on forever.
    #[serde(rename = "run_timeout_ms", with = "duration_ms")]
    pub run_timeout: Option<Duration>,

    /// What happens when a run arrives while another is in flight.
    pub busy_policy: BusyPolicy,
}

/// Handling of a run request on an adapter that is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyPolicy {
    /// Fail immediately with `Err("busy")`.
    #[default]
    Reject,
    /// Wait for the in-flight run to finish.
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingConfig {
    /// Variable the dataset is bound to.
    pub binding: String,

    /// Interpreter resource limits.
    pub limits: ScriptLimits,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            binding: "df".to_string(),
            limits: ScriptLimits::default(),
        }
    }
}

/// Interpreter limits. A zero operation budget means unlimited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,

    /// Keywords and functions scripts may not use.
    pub disabled_symbols: Vec<String>,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 0,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 16 * 1024 * 1024,
            max_array_size: 1_000_000,
            max_map_size: 100_000,
            disabled_symbols: vec!["eval".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationalConfig {
    /// Name of the table the dataset is materialized as.
    pub table_name: String,

    /// Allow `CREATE`/`DROP` statements.
    pub allow_ddl: bool,

    /// Allow `INSERT`/`UPDATE`/`DELETE` statements.
    pub allow_dml: bool,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            table_name: "dataset".to_string(),
            allow_ddl: false,
            allow_dml: false,
        }
    }
}

impl SandboxConfig {
    /// Parse a JSON config document.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
