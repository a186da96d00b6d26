//! Procedure definitions and the immutable registry built from them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HookdError, Result};

// ---------------------------------------------------------------------------
// StepDefinition / ProcedureDefinition
// ---------------------------------------------------------------------------

/// A single external command within a procedure.
///
/// Commands are shell lines executed via `sh -c`, since deployment steps
/// are written the way operators write them ("git pull --ff-only",
/// "docker compose up -d").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Shell command line for this step.
    pub run: String,
    /// Working directory for the command (inherited from the server if unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Extra environment variables for this step; the rest of the
    /// environment is inherited.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Whether a non-zero exit aborts the remaining steps.
    #[serde(default = "default_abort_on_failure")]
    pub abort_on_failure: bool,
}

fn default_abort_on_failure() -> bool {
    true
}

impl StepDefinition {
    /// A step with just a command line and default flags.
    pub fn shell(run: impl Into<String>) -> Self {
        Self {
            run: run.into(),
            workdir: None,
            env: HashMap::new(),
            abort_on_failure: true,
        }
    }
}

/// What to do when a trigger arrives while the same procedure is running.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Reject the trigger immediately with an already-running outcome.
    #[default]
    Reject,
    /// Wait for the in-flight run to finish, then execute.
    Queue,
}

/// A named, ordered sequence of steps constituting one deployment action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcedureDefinition {
    pub id: String,
    /// Overall budget for the whole procedure, shared across steps.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub on_busy: BusyPolicy,
    pub steps: Vec<StepDefinition>,
}

fn default_timeout_secs() -> u64 {
    300
}

impl ProcedureDefinition {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable id → procedure mapping, built once at startup.
#[derive(Debug)]
pub struct Registry {
    procedures: HashMap<String, ProcedureDefinition>,
}

impl Registry {
    /// Build a registry, rejecting duplicate ids.
    ///
    /// Step-level validation (non-empty commands, at least one step) happens
    /// in config loading; this only guards the unique-key invariant so the
    /// registry can also be constructed directly in tests.
    pub fn from_procedures(procedures: Vec<ProcedureDefinition>) -> Result<Self> {
        let mut map = HashMap::with_capacity(procedures.len());
        for def in procedures {
            if map.contains_key(&def.id) {
                return Err(HookdError::DuplicateProcedure(def.id));
            }
            map.insert(def.id.clone(), def);
        }
        Ok(Self { procedures: map })
    }

    pub fn lookup(&self, id: &str) -> Option<&ProcedureDefinition> {
        self.procedures.get(id)
    }

    /// Registered procedure ids, sorted for stable output.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.procedures.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}
