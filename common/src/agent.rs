use serde::{Deserialize, Serialize};

use crate::request::CommandReport;
use crate::stage::ExecutionCommand;

pub type AgentId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterRequest {
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegisterResponse {
    pub agent_id: AgentId,
}

/// Cada heartbeat trae los reportes acumulados desde el anterior y se lleva
/// lo que el scheduler encoló para el host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHeartbeatRequest {
    pub hostname: String,
    #[serde(default)]
    pub reports: Vec<CommandReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentHeartbeatResponse {
    pub commands: Vec<ExecutionCommand>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    pub hostname: String,
    pub last_heartbeat_secs_ago: u64,
    /// Sin heartbeat hace rato; vuelve a false con el próximo.
    #[serde(default)]
    pub lost: bool,
    pub commands_dispatched: u64,
    pub reports_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub request_id: i64,
    pub aborted: bool,
}
