use std::{collections::HashSet, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Labels, ModelError};

/// Environment variable passed to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// One execution unit of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Unit name; used as the output prefix when a pod has several containers.
    pub name: String,
    /// Container image (e.g. `"busybox:1.36"`).
    ///
    /// Backends that run commands on the host ignore it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Entrypoint followed by its own arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Arguments appended to `command`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Full argv: `command` followed by `args`.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        self.command
            .iter()
            .chain(self.args.iter())
            .map(String::as_str)
    }
}

/// A batch unit of execution (a "job").
///
/// Read by the watcher for its selector and container names only; immutable for the duration of a watch session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub name: String,
    /// Filled in on submission.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Labels used to find the pods of this workload.
    ///
    /// When empty, the orchestrator assigns its default selector on submission.
    #[serde(default, skip_serializing_if = "Labels::is_empty")]
    pub selector: Labels,
    pub containers: Vec<ContainerSpec>,
}

impl Workload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_container(mut self, container: ContainerSpec) -> Self {
        self.containers.push(container);
        self
    }

    pub fn with_selector(mut self, selector: Labels) -> Self {
        self.selector = selector;
        self
    }

    /// Decode a workload from a JSON document.
    pub fn from_json(s: &str) -> Result<Self, ModelError> {
        serde_json::from_str(s).map_err(ModelError::from)
    }

    pub fn container_names(&self) -> impl Iterator<Item = &str> {
        self.containers.iter().map(|c| c.name.as_str())
    }

    /// Check the fields the runner depends on.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::InvalidSpec("job name is empty".into()));
        }
        if self.containers.is_empty() {
            return Err(ModelError::InvalidSpec(format!(
                "job {:?} declares no containers",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for c in &self.containers {
            if c.name.trim().is_empty() {
                return Err(ModelError::InvalidSpec("container name is empty".into()));
            }
            if !seen.insert(c.name.as_str()) {
                return Err(ModelError::InvalidSpec(format!(
                    "duplicate container name {:?}",
                    c.name
                )));
            }
            if c.command.is_empty() && c.args.is_empty() && c.image.is_none() {
                return Err(ModelError::InvalidSpec(format!(
                    "container {:?} has neither image nor command",
                    c.name
                )));
            }
        }
        Ok(())
    }

    /// Advisory findings that do not prevent submission.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.selector.is_empty() {
            out.push(format!(
                "job {:?} has no selector; the orchestrator default will be used",
                self.name
            ));
        }
        if !is_dns_label(&self.name) {
            out.push(format!("job name {:?} is not a valid DNS-1123 label", self.name));
        }
        for c in &self.containers {
            if !is_dns_label(&c.name) {
                out.push(format!(
                    "container name {:?} is not a valid DNS-1123 label",
                    c.name
                ));
            }
            if c.image.is_none() {
                out.push(format!("container {:?} has no image", c.name));
            }
        }
        out
    }
}

fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-'
}
