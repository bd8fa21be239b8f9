use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::stage::RoleCommand;

/// Evento que el scheduler le avisa a la máquina de estados de un
/// componente en un host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceComponentHostEvent {
    /// Primera vez que el comando se agenda en el host.
    OpStarted { command: RoleCommand, timestamp: i64 },
    /// Se agotaron los intentos.
    OpFailed { command: RoleCommand, timestamp: i64 },
}

#[derive(Debug, Error)]
#[error("transición inválida para {role} en {host}: {reason}")]
pub struct FsmError {
    pub role: String,
    pub host: String,
    pub reason: String,
}

pub trait ClusterFsm: Send + Sync {
    fn fire_event(
        &self,
        cluster_name: &str,
        role: &str,
        host: &str,
        event: ServiceComponentHostEvent,
    ) -> Result<(), FsmError>;
}

/// Solo deja constancia en el log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFsm;

impl ClusterFsm for LoggingFsm {
    fn fire_event(
        &self,
        cluster_name: &str,
        role: &str,
        host: &str,
        event: ServiceComponentHostEvent,
    ) -> Result<(), FsmError> {
        debug!("fsm {}: {} en {} -> {:?}", cluster_name, role, host, event);
        Ok(())
    }
}

/// Guarda los eventos recibidos; útil para inspeccionar qué disparó el scheduler.
#[derive(Debug, Default)]
pub struct RecordingFsm {
    events: Mutex<Vec<(String, String, ServiceComponentHostEvent)>>,
    /// Roles para los que `fire_event` devuelve error.
    failing_roles: Vec<String>,
}

impl RecordingFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(roles: &[&str]) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failing_roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// (role, host, event) en orden de llegada.
    pub fn events(&self) -> Vec<(String, String, ServiceComponentHostEvent)> {
        self.events.lock().clone()
    }
}

impl ClusterFsm for RecordingFsm {
    fn fire_event(
        &self,
        _cluster_name: &str,
        role: &str,
        host: &str,
        event: ServiceComponentHostEvent,
    ) -> Result<(), FsmError> {
        self.events
            .lock()
            .push((role.to_string(), host.to_string(), event));

        if self.failing_roles.iter().any(|r| r == role) {
            return Err(FsmError {
                role: role.to_string(),
                host: host.to_string(),
                reason: "rechazado".to_string(),
            });
        }
        Ok(())
    }
}
