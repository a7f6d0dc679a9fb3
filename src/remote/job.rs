// ABOUTME: Remote job specification and two-level container context merging
// ABOUTME: Caller defaults merge with per-invocation overrides, overrides win

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::plan::ResourceSpec;

pub const DEFAULT_JOB_PARALLELISM: u32 = 1;

fn default_namespace() -> String {
    "default".to_string()
}

fn default_parallelism() -> u32 {
    DEFAULT_JOB_PARALLELISM
}

/// Container-level settings contributed by a caller (launcher defaults) or a
/// single invocation. Two contexts merge field by field; the override side
/// wins on conflict, and map entries merge key by key with the override
/// winning per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerContext {
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub image_pull_policy: Option<String>,

    #[serde(default)]
    pub service_account: Option<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: Option<ResourceSpec>,
}

impl ContainerContext {
    /// Merge `overrides` on top of `self`, last write wins.
    pub fn merge(&self, overrides: &ContainerContext) -> ContainerContext {
        let mut env = self.env.clone();
        env.extend(overrides.env.clone());

        let mut labels = self.labels.clone();
        labels.extend(overrides.labels.clone());

        ContainerContext {
            namespace: overrides.namespace.clone().or_else(|| self.namespace.clone()),
            image_pull_policy: overrides
                .image_pull_policy
                .clone()
                .or_else(|| self.image_pull_policy.clone()),
            service_account: overrides
                .service_account
                .clone()
                .or_else(|| self.service_account.clone()),
            env,
            labels,
            resources: overrides.resources.clone().or_else(|| self.resources.clone()),
        }
    }
}

/// Everything the substrate needs to run one dispatched step-attempt.
/// Exactly one job exists per attempt; the launcher owns it until terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteJobSpec {
    pub job_name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub image: String,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub resources: ResourceSpec,

    /// Number of backing units the job runs; the terminal wait expects this
    /// many terminal units.
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,

    /// Wall-clock budget for the whole launch. Zero means wait unbounded.
    #[serde(default)]
    pub timeout: Duration,
}

impl RemoteJobSpec {
    pub fn new(job_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            namespace: default_namespace(),
            image: image.into(),
            command: Vec::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            resources: ResourceSpec::default(),
            parallelism: DEFAULT_JOB_PARALLELISM,
            timeout: Duration::ZERO,
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Fold a merged container context into the spec. Spec-level env and
    /// labels stay authoritative over context-supplied entries.
    pub fn apply_context(mut self, context: &ContainerContext) -> Self {
        if let Some(ref namespace) = context.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(ref resources) = context.resources {
            self.resources = resources.clone();
        }

        let mut env = context.env.clone();
        env.extend(std::mem::take(&mut self.env));
        self.env = env;

        let mut labels = context.labels.clone();
        labels.extend(std::mem::take(&mut self.labels));
        self.labels = labels;

        self
    }
}
