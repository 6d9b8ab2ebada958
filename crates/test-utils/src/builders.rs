#![allow(dead_code)]

use std::collections::BTreeMap;

use serde_json::Value;
use dagrelay::config::{
    ChannelSection, ConfigFile, CoordinatorSection, NodeConfig, RawConfigFile,
};
use dagrelay::graph::{TaskGraph, TaskSpec};

/// Builder for `TaskGraph` to simplify test setup.
#[derive(Default)]
pub struct GraphBuilder {
    tasks: Vec<TaskSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task with no params and no dependencies.
    pub fn task(self, id: &str, kind: &str) -> Self {
        self.with_task(TaskSpecBuilder::new(id, kind))
    }

    pub fn with_task(mut self, task: TaskSpecBuilder) -> Self {
        self.tasks.push(task.build());
        self
    }

    pub fn build(self) -> TaskGraph {
        TaskGraph { tasks: self.tasks }
    }
}

/// Builder for `TaskSpec`.
pub struct TaskSpecBuilder {
    task: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new(id: &str, kind: &str) -> Self {
        Self {
            task: TaskSpec {
                id: id.to_string(),
                kind: kind.to_string(),
                params: Value::Null,
                depends_on: vec![],
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.task.params = params;
        self
    }

    pub fn build(self) -> TaskSpec {
        self.task
    }
}

/// Builder for `ConfigFile`.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                coordinator: CoordinatorSection::default(),
                channel: ChannelSection::default(),
                node: BTreeMap::new(),
            },
        }
    }

    pub fn with_node(mut self, id: &str, capabilities: &[&str], capacity: usize) -> Self {
        self.config.node.insert(
            id.to_string(),
            NodeConfig {
                target: format!("fake://{id}"),
                capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
                capacity,
            },
        );
        self
    }

    pub fn critical_kind(mut self, kind: &str) -> Self {
        self.config.coordinator.critical_kinds.push(kind.to_string());
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.coordinator.max_retries = retries;
        self
    }

    pub fn reserve_wait_ms(mut self, millis: u64) -> Self {
        self.config.coordinator.reserve_wait_ms = millis;
        self
    }

    pub fn backoff_ms(mut self, base: u64, cap: u64) -> Self {
        self.config.channel.backoff_base_ms = base;
        self.config.channel.backoff_cap_ms = cap;
        self
    }

    pub fn health_interval_ms(mut self, millis: u64) -> Self {
        self.config.channel.health_interval_ms = millis;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
