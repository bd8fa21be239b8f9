use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::wrapper::StageWrapperType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Execute,
    Configure,
    ConfigureFunction,
    Manual,
    ServerAction,
    Restart,
    ServiceCheck,
    Start,
    Stop,
}

impl TaskType {
    pub fn stage_wrapper_type(self) -> StageWrapperType {
        match self {
            TaskType::Execute => StageWrapperType::RuTasks,
            TaskType::Configure | TaskType::ServerAction | TaskType::Manual => {
                StageWrapperType::ServerSideAction
            }
            TaskType::ConfigureFunction => StageWrapperType::Configure,
            TaskType::Restart => StageWrapperType::Restart,
            TaskType::Start => StageWrapperType::Start,
            TaskType::Stop => StageWrapperType::Stop,
            TaskType::ServiceCheck => StageWrapperType::ServiceCheck,
        }
    }

    /// Corre en el server, no en los hosts del componente.
    pub fn is_server_side(self) -> bool {
        matches!(
            self,
            TaskType::Configure | TaskType::ServerAction | TaskType::Manual
        )
    }
}

/// Sobre qué hosts del componente corre un Execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteHostType {
    /// Uno solo (el master si hay, si no el primero).
    Any,
    #[default]
    All,
    Master,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecuteTask {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub hosts: ExecuteHostType,
    #[serde(default)]
    pub command: String,
    /// Se corre antes que `command`.
    #[serde(default)]
    pub first: Option<String>,
    /// Si este comando sale con 0, no se corre `command`.
    #[serde(default)]
    pub unless: Option<String>,
    #[serde(default)]
    pub on_failure: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfigureTask {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub config_type: Option<String>,
    #[serde(default)]
    pub set: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ManualTask {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sequential: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerActionTask {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sequential: bool,
    pub class_name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Restart, Start, Stop, ServiceCheck y ConfigureFunction no llevan más que
/// el resumen y el flag de secuencial.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CommandTask {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sequential: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Task {
    Execute(ExecuteTask),
    Configure(ConfigureTask),
    ConfigureFunction(CommandTask),
    Manual(ManualTask),
    ServerAction(ServerActionTask),
    Restart(CommandTask),
    ServiceCheck(CommandTask),
    Start(CommandTask),
    Stop(CommandTask),
}

impl Task {
    pub fn restart() -> Self {
        Task::Restart(CommandTask::default())
    }

    pub fn start() -> Self {
        Task::Start(CommandTask::default())
    }

    pub fn stop() -> Self {
        Task::Stop(CommandTask::default())
    }

    pub fn service_check() -> Self {
        Task::ServiceCheck(CommandTask::default())
    }

    pub fn manual(summary: &str, messages: Vec<String>) -> Self {
        Task::Manual(ManualTask {
            summary: Some(summary.to_string()),
            sequential: false,
            messages,
        })
    }

    pub fn execute(command: &str) -> Self {
        Task::Execute(ExecuteTask {
            command: command.to_string(),
            ..ExecuteTask::default()
        })
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            Task::Execute(_) => TaskType::Execute,
            Task::Configure(_) => TaskType::Configure,
            Task::ConfigureFunction(_) => TaskType::ConfigureFunction,
            Task::Manual(_) => TaskType::Manual,
            Task::ServerAction(_) => TaskType::ServerAction,
            Task::Restart(_) => TaskType::Restart,
            Task::ServiceCheck(_) => TaskType::ServiceCheck,
            Task::Start(_) => TaskType::Start,
            Task::Stop(_) => TaskType::Stop,
        }
    }

    pub fn summary(&self) -> Option<&str> {
        match self {
            Task::Execute(t) => t.summary.as_deref(),
            Task::Configure(t) => t.summary.as_deref(),
            Task::Manual(t) => t.summary.as_deref(),
            Task::ServerAction(t) => t.summary.as_deref(),
            Task::ConfigureFunction(t)
            | Task::Restart(t)
            | Task::ServiceCheck(t)
            | Task::Start(t)
            | Task::Stop(t) => t.summary.as_deref(),
        }
    }

    pub fn summary_mut(&mut self) -> &mut Option<String> {
        match self {
            Task::Execute(t) => &mut t.summary,
            Task::Configure(t) => &mut t.summary,
            Task::Manual(t) => &mut t.summary,
            Task::ServerAction(t) => &mut t.summary,
            Task::ConfigureFunction(t)
            | Task::Restart(t)
            | Task::ServiceCheck(t)
            | Task::Start(t)
            | Task::Stop(t) => &mut t.summary,
        }
    }

    /// Un task secuencial ocupa su propio stage.
    pub fn is_sequential(&self) -> bool {
        match self {
            Task::Execute(t) => t.sequential,
            Task::Configure(t) => t.sequential,
            Task::Manual(t) => t.sequential,
            Task::ServerAction(t) => t.sequential,
            Task::ConfigureFunction(t)
            | Task::Restart(t)
            | Task::ServiceCheck(t)
            | Task::Start(t)
            | Task::Stop(t) => t.sequential,
        }
    }

    pub fn execute_hosts(&self) -> ExecuteHostType {
        match self {
            Task::Execute(t) => t.hosts,
            _ => ExecuteHostType::All,
        }
    }

    /// Parámetros que viajan en el HostRoleCommand.
    pub fn command_params(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        if let Some(summary) = self.summary() {
            params.insert("summary".to_string(), summary.to_string());
        }

        match self {
            Task::Execute(t) => {
                params.insert("command".into(), t.command.clone());
                if let Some(first) = &t.first {
                    params.insert("first".into(), first.clone());
                }
                if let Some(unless) = &t.unless {
                    params.insert("unless".into(), unless.clone());
                }
                if let Some(on_failure) = &t.on_failure {
                    params.insert("on_failure".into(), on_failure.clone());
                }
                if t.retry_count > 0 {
                    params.insert("retry_count".into(), t.retry_count.to_string());
                }
            }
            Task::Configure(t) => {
                if let Some(id) = &t.id {
                    params.insert("configure_id".into(), id.clone());
                }
                if let Some(config_type) = &t.config_type {
                    params.insert("config_type".into(), config_type.clone());
                }
                for (k, v) in &t.set {
                    params.insert(format!("set.{}", k), v.clone());
                }
            }
            Task::ConfigureFunction(_) => {
                params.insert("function".into(), "configure".into());
            }
            Task::Manual(t) => {
                params.insert("messages".into(), t.messages.join("\n"));
            }
            Task::ServerAction(t) => {
                params.insert("class_name".into(), t.class_name.clone());
                params.extend(t.params.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Task::Restart(_) | Task::ServiceCheck(_) | Task::Start(_) | Task::Stop(_) => {}
        }
        params
    }
}
