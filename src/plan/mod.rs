// ABOUTME: Execution-plan provider resolving step keys to unit-of-work specs
// ABOUTME: Consumed as a narrow collaborator; graph construction lives elsewhere

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashMap;

use crate::history::StepKey;

/// Compute resources requested for one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub cpu: Option<String>,

    #[serde(default)]
    pub memory: Option<String>,
}

/// What to run for one step: command, arguments, environment, resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpec {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: ResourceSpec,
}

impl StepSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Resolves step keys to specs and supplies the full step set for a run.
pub trait PlanProvider: Send + Sync {
    fn step_spec(&self, step_key: &StepKey) -> Option<StepSpec>;

    fn step_keys(&self) -> Vec<StepKey>;
}

/// Map-backed plan for callers that already hold resolved specs.
#[derive(Default)]
pub struct StaticPlan {
    steps: HashMap<StepKey, StepSpec>,
    ordered_keys: Vec<StepKey>,
}

impl StaticPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step(mut self, step_key: impl Into<StepKey>, spec: StepSpec) -> Self {
        let key = step_key.into();
        if !self.steps.contains_key(&key) {
            self.ordered_keys.push(key.clone());
        }
        self.steps.insert(key, spec);
        self
    }
}

impl PlanProvider for StaticPlan {
    fn step_spec(&self, step_key: &StepKey) -> Option<StepSpec> {
        self.steps.get(step_key).cloned()
    }

    fn step_keys(&self) -> Vec<StepKey> {
        self.ordered_keys.clone()
    }
}
