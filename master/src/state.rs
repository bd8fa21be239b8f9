// master/src/state.rs

use parking_lot::Mutex;
use rollout_common::{ActionManager, AgentId, AgentInfo};
use std::{
    collections::HashMap,
    sync::Arc,
    time::SystemTime,
};

use crate::config::MasterConfig;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ActionManager>,
    // agentes por hostname
    pub agents: Arc<Mutex<HashMap<String, AgentMeta>>>,
    pub config: Arc<MasterConfig>,
}

impl AppState {
    pub fn new(manager: Arc<ActionManager>, config: MasterConfig) -> Self {
        Self {
            manager,
            agents: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentMeta {
    pub agent_id: AgentId,
    pub last_heartbeat: SystemTime,
    pub lost: bool,

    // Métricas
    pub commands_dispatched: u64,
    pub reports_received: u64,
}

impl AgentMeta {
    pub fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            last_heartbeat: SystemTime::now(),
            lost: false,
            commands_dispatched: 0,
            reports_received: 0,
        }
    }

    pub fn info(&self, hostname: &str, now: SystemTime) -> AgentInfo {
        AgentInfo {
            agent_id: self.agent_id.clone(),
            hostname: hostname.to_string(),
            last_heartbeat_secs_ago: now
                .duration_since(self.last_heartbeat)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            lost: self.lost,
            commands_dispatched: self.commands_dispatched,
            reports_received: self.reports_received,
        }
    }
}
