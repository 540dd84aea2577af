// Resource Hints
// Per-node cluster resource requests forwarded verbatim to execution backends

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

/// Resource request attached to every job of a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceHints {
    /// Cluster partition / queue
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    /// Number of GPUs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpus: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    /// Memory request, e.g. `16G`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<String>,
    /// Wall-clock limit, e.g. `01:00:00`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Additional backend options passed through untouched
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ResourceHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    pub fn with_gpus(mut self, gpus: u32) -> Self {
        self.gpus = Some(gpus);
        self
    }

    pub fn with_cpus(mut self, cpus: u32) -> Self {
        self.cpus = Some(cpus);
        self
    }

    pub fn with_mem(mut self, mem: impl Into<String>) -> Self {
        self.mem = Some(mem.into());
        self
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay `other` on top of these hints; fields set in `other` win
    pub fn merged(&self, other: &ResourceHints) -> ResourceHints {
        let mut extra = self.extra.clone();
        extra.extend(other.extra.clone());
        ResourceHints {
            partition: other.partition.clone().or_else(|| self.partition.clone()),
            gpus: other.gpus.or(self.gpus),
            cpus: other.cpus.or(self.cpus),
            mem: other.mem.clone().or_else(|| self.mem.clone()),
            time: other.time.clone().or_else(|| self.time.clone()),
            extra,
        }
    }
}
