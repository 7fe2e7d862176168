//! Edge worker identities and their bootstrap environment.
//!
//! Every VM runs one edge worker. The worker learns its name and the task
//! ids it may accept from environment variables baked into the VM's
//! bootstrap payload.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bench_core::config::OrchestrationConfig;
use bench_core::{Labels, new_id};
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

pub const WORKER_NAME_PREFIX: &str = "edge-wrk";

pub const ENV_WORKER_NAME: &str = "HATCHET_EDGE_WORKER_NAME";
pub const ENV_ACCEPTABLE_TASKS: &str = "HATCHET_EDGE_ACCEPTABLE_TASKS";
pub const ENV_CLIENT_HOST_PORT: &str = "HATCHET_CLIENT_HOST_PORT";
pub const ENV_CLIENT_TOKEN: &str = "HATCHET_CLIENT_TOKEN";
pub const ENV_CLIENT_TLS_STRATEGY: &str = "HATCHET_CLIENT_TLS_STRATEGY";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

pub const METADATA_ROLE: &str = "METADATA_ROLE";
pub const METADATA_RUN_ID: &str = "METADATA_RUN_ID";
pub const ROLE_DATABASE: &str = "database";
pub const ROLE_STROPPY: &str = "stroppy";

const TASK_LIST_SEPARATOR: &str = ";";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    SetupContainers,
    InstallStroppy,
    RunStroppy,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SetupContainers => "setup_containers",
            TaskKind::InstallStroppy => "install_stroppy",
            TaskKind::RunStroppy => "run_stroppy",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "setup_containers" => Ok(TaskKind::SetupContainers),
            "install_stroppy" => Ok(TaskKind::InstallStroppy),
            "run_stroppy" => Ok(TaskKind::RunStroppy),
            other => Err(ProvisionError::Config(format!("unknown task kind {other:?}"))),
        }
    }
}

/// One task a worker may accept, written as `{kind}-{run_id}-{task_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    pub kind: TaskKind,
    pub run_id: String,
    pub task_id: String,
}

impl TaskId {
    /// A task of `kind` in run `run_id` with a fresh task id.
    pub fn new(run_id: &str, kind: TaskKind) -> Self {
        Self {
            kind,
            run_id: run_id.to_string(),
            task_id: new_id(),
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.kind, self.run_id, self.task_id)
    }
}

impl FromStr for TaskId {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(run_id), Some(task_id)) if !run_id.is_empty() && !task_id.is_empty() => {
                Ok(Self {
                    kind: kind.parse()?,
                    run_id: run_id.to_string(),
                    task_id: task_id.to_string(),
                })
            }
            _ => Err(ProvisionError::Config(format!("invalid edge task string {s:?}"))),
        }
    }
}

pub fn task_list_to_string(tasks: &[TaskId]) -> String {
    tasks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(TASK_LIST_SEPARATOR)
}

/// Parse a `;`-separated task list. An empty string is an empty list.
pub fn parse_task_list(s: &str) -> Result<Vec<TaskId>, ProvisionError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    s.split(TASK_LIST_SEPARATOR).map(str::parse).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub name: String,
    pub acceptable_tasks: Vec<TaskId>,
    pub metadata: Labels,
}

impl Worker {
    /// A worker for `role` in run `run_id`, accepting one fresh task per kind.
    pub fn new(run_id: &str, role: &str, kinds: &[TaskKind], metadata: Labels) -> Self {
        Self {
            name: worker_name(run_id, role),
            acceptable_tasks: kinds.iter().map(|k| TaskId::new(run_id, *k)).collect(),
            metadata,
        }
    }

    /// The accepted task of `kind`, if any.
    pub fn task(&self, kind: TaskKind) -> Option<&TaskId> {
        self.acceptable_tasks.iter().find(|t| t.kind == kind)
    }

    /// Environment the worker reads at boot.
    pub fn bootstrap_env(&self, orchestration: &OrchestrationConfig) -> BTreeMap<String, String> {
        BTreeMap::from([
            (ENV_WORKER_NAME.to_string(), self.name.clone()),
            (
                ENV_ACCEPTABLE_TASKS.to_string(),
                task_list_to_string(&self.acceptable_tasks),
            ),
            (ENV_CLIENT_HOST_PORT.to_string(), orchestration.host_port.clone()),
            (ENV_CLIENT_TOKEN.to_string(), orchestration.token.clone()),
            (
                ENV_CLIENT_TLS_STRATEGY.to_string(),
                orchestration.tls_strategy.clone(),
            ),
            (ENV_LOG_LEVEL.to_string(), orchestration.log_level.clone()),
        ])
    }
}

pub fn worker_name(run_id: &str, role: &str) -> String {
    format!("{WORKER_NAME_PREFIX}-{role}-{run_id}")
}

/// Labels marking a VM's role within a run.
pub fn role_metadata(run_id: &str, role: &str) -> Labels {
    Labels::from([
        (METADATA_ROLE.to_string(), role.to_string()),
        (METADATA_RUN_ID.to_string(), run_id.to_string()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_format_and_parse() {
        let task = TaskId::new("0190aa", TaskKind::SetupContainers);
        let text = task.to_string();
        assert!(text.starts_with("setup_containers-0190aa-"));
        assert_eq!(text.parse::<TaskId>().unwrap(), task);
    }

    #[test]
    fn task_list_roundtrip() {
        let tasks = vec![
            TaskId::new("run1", TaskKind::SetupContainers),
            TaskId::new("run1", TaskKind::InstallStroppy),
            TaskId::new("run1", TaskKind::RunStroppy),
        ];
        let text = task_list_to_string(&tasks);
        assert_eq!(text.matches(';').count(), 2);
        assert_eq!(parse_task_list(&text).unwrap(), tasks);
        assert!(parse_task_list("").unwrap().is_empty());
    }

    #[test]
    fn malformed_task_is_rejected() {
        assert!("setup_containers".parse::<TaskId>().is_err());
        assert!("launch-run1-t1".parse::<TaskId>().is_err());
    }

    #[test]
    fn worker_env() {
        let worker = Worker::new(
            "run1",
            "postgres-master",
            &[TaskKind::SetupContainers, TaskKind::RunStroppy],
            role_metadata("run1", ROLE_DATABASE),
        );
        assert_eq!(worker.name, "edge-wrk-postgres-master-run1");
        assert!(worker.task(TaskKind::InstallStroppy).is_none());

        let orchestration = OrchestrationConfig {
            host_port: "hatchet:7077".into(),
            token: "secret".into(),
            ..Default::default()
        };
        let env = worker.bootstrap_env(&orchestration);
        assert_eq!(env[ENV_WORKER_NAME], "edge-wrk-postgres-master-run1");
        assert_eq!(env[ENV_CLIENT_HOST_PORT], "hatchet:7077");
        assert_eq!(env[ENV_CLIENT_TLS_STRATEGY], "none");
        assert_eq!(env[ENV_LOG_LEVEL], "info");
        let tasks = parse_task_list(&env[ENV_ACCEPTABLE_TASKS]).unwrap();
        assert_eq!(tasks, worker.acceptable_tasks);
        assert_eq!(worker.metadata[METADATA_ROLE], "database");
    }
}
