use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::request::action_id;
use crate::status::HostRoleStatus;

pub type RequestId = i64;
pub type StageId = i64;
pub type TaskId = i64;

/// Exit code de un comando que todavía no reportó.
pub const UNKNOWN_EXIT_CODE: i32 = 999;

/// Por defecto todos los hosts de un rol tienen que completar.
pub const DEFAULT_SUCCESS_FACTOR: f64 = 1.0;

/// Timeout de stage que nunca vence (stages manuales).
pub const UNBOUNDED_TIMEOUT_MS: u64 = u64::MAX;

/// Qué hace un comando sobre su componente. También define el evento que
/// se dispara al FSM del cluster cuando el comando se agenda por primera vez.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleCommand {
    Install,
    Start,
    Stop,
    Restart,
    Upgrade,
    Execute,
    ServiceCheck,
    ServerAction,
    Manual,
}

/* --------- Comandos por (host, rol) --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRoleCommand {
    /// Asignado por el accessor al persistir (0 = todavía sin persistir).
    pub task_id: TaskId,
    pub host: String,
    pub role: String,
    pub role_command: RoleCommand,
    pub service: Option<String>,
    pub status: HostRoleStatus,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl HostRoleCommand {
    pub fn new(host: &str, role: &str, role_command: RoleCommand) -> Self {
        Self {
            task_id: 0,
            host: host.to_string(),
            role: role.to_string(),
            role_command,
            service: None,
            status: HostRoleStatus::Pending,
            exit_code: UNKNOWN_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            start_time: None,
            end_time: None,
            params: BTreeMap::new(),
        }
    }
}

/// Todos los comandos de un stage para un host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostAction {
    pub host: String,
    pub role_commands: Vec<HostRoleCommand>,
    /// Primera vez que el scheduler lo agendó.
    pub start_time: Option<i64>,
    pub last_attempt_time: Option<i64>,
    pub attempt_count: u32,
}

impl HostAction {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            role_commands: Vec::new(),
            start_time: None,
            last_attempt_time: None,
            attempt_count: 0,
        }
    }

    pub fn command(&self, role: &str) -> Option<&HostRoleCommand> {
        self.role_commands.iter().find(|c| c.role == role)
    }

    pub fn command_mut(&mut self, role: &str) -> Option<&mut HostRoleCommand> {
        self.role_commands.iter_mut().find(|c| c.role == role)
    }
}

/* --------- Payload que viaja al agente --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleCommandPayload {
    pub task_id: TaskId,
    pub role: String,
    pub role_command: RoleCommand,
    pub service: Option<String>,
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCommand {
    /// `"<requestId>-<stageId>"`, se devuelve tal cual en los reportes.
    pub command_id: String,
    pub request_id: RequestId,
    pub stage_id: StageId,
    pub cluster_name: String,
    pub host: String,
    pub role_commands: Vec<RoleCommandPayload>,
}

/* --------- Stage --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub request_id: RequestId,
    stage_id: Option<StageId>,
    pub cluster_name: String,
    /// Texto legible, ej: "Restarting DATANODE on 5 hosts".
    pub request_context: String,
    pub success_factors: HashMap<String, f64>,
    pub host_actions: BTreeMap<String, HostAction>,
    /// Reemplaza el timeout por defecto del scheduler.
    pub timeout_ms: Option<u64>,
    pub skippable: bool,
    /// Si un rol falla, el stage se da por terminado en vez de abortar el request.
    pub auto_skip_on_failure: bool,
}

impl Stage {
    pub fn new(request_id: RequestId, cluster_name: &str, request_context: &str) -> Self {
        Self {
            request_id,
            stage_id: None,
            cluster_name: cluster_name.to_string(),
            request_context: request_context.to_string(),
            success_factors: HashMap::new(),
            host_actions: BTreeMap::new(),
            timeout_ms: None,
            skippable: false,
            auto_skip_on_failure: false,
        }
    }

    pub fn stage_id(&self) -> Option<StageId> {
        self.stage_id
    }

    /// Se puede llamar una sola vez; la segunda falla aunque el valor sea el mismo.
    pub fn set_stage_id(&mut self, stage_id: StageId) -> Result<()> {
        if let Some(current) = self.stage_id {
            return Err(Error::StageIdAlreadySet {
                current,
                requested: stage_id,
            });
        }
        self.stage_id = Some(stage_id);
        Ok(())
    }

    pub fn action_id(&self) -> String {
        action_id(self.request_id, self.stage_id.unwrap_or(-1))
    }

    pub fn success_factor(&self, role: &str) -> f64 {
        self.success_factors
            .get(role)
            .copied()
            .unwrap_or(DEFAULT_SUCCESS_FACTOR)
    }

    pub fn set_success_factor(&mut self, role: &str, factor: f64) {
        self.success_factors.insert(role.to_string(), factor);
    }

    /// Agrega (o devuelve, si ya existe) el comando de `role` en `host`.
    pub fn add_host_role_command(
        &mut self,
        host: &str,
        role: &str,
        role_command: RoleCommand,
    ) -> &mut HostRoleCommand {
        let action = self
            .host_actions
            .entry(host.to_string())
            .or_insert_with(|| HostAction::new(host));

        let idx = match action.role_commands.iter().position(|c| c.role == role) {
            Some(idx) => idx,
            None => {
                action
                    .role_commands
                    .push(HostRoleCommand::new(host, role, role_command));
                action.role_commands.len() - 1
            }
        };
        &mut action.role_commands[idx]
    }

    pub fn host_action(&self, host: &str) -> Option<&HostAction> {
        self.host_actions.get(host)
    }

    pub fn host_action_mut(&mut self, host: &str) -> Option<&mut HostAction> {
        self.host_actions.get_mut(host)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.host_actions.keys().cloned().collect()
    }

    pub fn commands(&self) -> impl Iterator<Item = &HostRoleCommand> {
        self.host_actions.values().flat_map(|a| a.role_commands.iter())
    }

    pub fn commands_mut(&mut self) -> impl Iterator<Item = &mut HostRoleCommand> {
        self.host_actions
            .values_mut()
            .flat_map(|a| a.role_commands.iter_mut())
    }

    pub fn is_empty(&self) -> bool {
        self.commands().next().is_none()
    }

    /// Algún comando todavía en PENDING, QUEUED o IN_PROGRESS.
    pub fn is_in_progress(&self) -> bool {
        self.commands().any(|c| c.status.is_in_progress())
    }

    /// Payload para el host con los comandos que todavía no llegaron al agente.
    pub fn execution_command(&self, host: &str) -> Option<ExecutionCommand> {
        let action = self.host_actions.get(host)?;
        let role_commands: Vec<RoleCommandPayload> = action
            .role_commands
            .iter()
            .filter(|c| c.status.is_schedulable())
            .map(|c| RoleCommandPayload {
                task_id: c.task_id,
                role: c.role.clone(),
                role_command: c.role_command,
                service: c.service.clone(),
                params: c.params.clone(),
            })
            .collect();

        if role_commands.is_empty() {
            return None;
        }

        Some(ExecutionCommand {
            command_id: self.action_id(),
            request_id: self.request_id,
            stage_id: self.stage_id.unwrap_or(-1),
            cluster_name: self.cluster_name.clone(),
            host: host.to_string(),
            role_commands,
        })
    }
}
