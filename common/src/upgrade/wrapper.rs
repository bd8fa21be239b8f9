use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::task::{Task, TaskType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageWrapperType {
    RuTasks,
    Restart,
    ServiceCheck,
    ServerSideAction,
    Configure,
    Start,
    Stop,
    Manual,
}

impl StageWrapperType {
    pub fn is_server_side(self) -> bool {
        matches!(
            self,
            StageWrapperType::ServerSideAction | StageWrapperType::Manual
        )
    }
}

/// Tareas que corren juntas sobre un conjunto de hosts de un componente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskWrapper {
    pub service: String,
    pub component: String,
    pub hosts: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub tasks: Vec<Task>,
}

impl TaskWrapper {
    pub fn new(service: &str, component: &str, hosts: Vec<String>, tasks: Vec<Task>) -> Self {
        Self {
            service: service.to_string(),
            component: component.to_string(),
            hosts,
            params: BTreeMap::new(),
            tasks,
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }

    pub fn is_sequential(&self) -> bool {
        self.tasks.iter().any(Task::is_sequential)
    }
}

/// Un stage del plan, todavía sin ids ni estado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageWrapper {
    pub stage_type: StageWrapperType,
    pub text: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    pub tasks: Vec<TaskWrapper>,
}

impl StageWrapper {
    pub fn new(stage_type: StageWrapperType, text: &str, tasks: Vec<TaskWrapper>) -> Self {
        Self {
            stage_type,
            text: text.to_string(),
            params: BTreeMap::new(),
            tasks,
        }
    }

    /// Hosts de todas las tareas, sin repetir y en orden de aparición.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for h in self.tasks.iter().flat_map(|t| t.hosts.iter()) {
            if !hosts.contains(h) {
                hosts.push(h.clone());
            }
        }
        hosts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskBucket {
    pub task_type: TaskType,
    pub stage_type: StageWrapperType,
    pub tasks: Vec<Task>,
}

/// Agrupa tareas consecutivas del mismo tipo. Un tipo que reaparece después
/// de otro distinto abre un bucket nuevo.
pub fn buckets(tasks: &[Task]) -> Vec<TaskBucket> {
    let mut out: Vec<TaskBucket> = Vec::new();
    for task in tasks {
        let task_type = task.task_type();
        match out.last_mut() {
            Some(bucket) if bucket.task_type == task_type => bucket.tasks.push(task.clone()),
            _ => out.push(TaskBucket {
                task_type,
                stage_type: task_type.stage_wrapper_type(),
                tasks: vec![task.clone()],
            }),
        }
    }
    out
}
