use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::stage::{RequestId, Stage, StageId};
use crate::status::HostRoleStatus;
use crate::upgrade::{ClusterTopology, Direction, UpgradePack};

/// `"<requestId>-<stageId>"`
pub fn action_id(request_id: RequestId, stage_id: StageId) -> String {
    format!("{}-{}", request_id, stage_id)
}

pub fn parse_action_id(action_id: &str) -> Result<(RequestId, StageId)> {
    let invalid = || Error::InvalidActionId(action_id.to_string());

    let (request, stage) = action_id.trim().split_once('-').ok_or_else(invalid)?;
    let request_id = request.parse::<RequestId>().map_err(|_| invalid())?;
    let stage_id = stage.parse::<StageId>().map_err(|_| invalid())?;
    Ok((request_id, stage_id))
}

/// Resultado que manda un agente sobre un comando.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReport {
    pub action_id: String,
    pub role: String,
    /// Nombre de un HostRoleStatus, ej: "COMPLETED".
    pub status: String,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: RequestId,
    pub cluster_name: String,
    pub context: String,
    pub create_time: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub target_service: Option<String>,
    pub target_component: Option<String>,
    #[serde(default)]
    pub target_hosts: Vec<String>,
    /// Derivado de los comandos; la verdad está en cada HostRoleCommand.
    pub status: HostRoleStatus,
}

/// Estado agregado de un request a partir de sus comandos.
///
/// Con algo sin terminar: PENDING si todo está pendiente, si no IN_PROGRESS.
/// Todo terminado: ABORTED > TIMEDOUT > FAILED > COMPLETED.
pub fn derive_status<I>(statuses: I) -> HostRoleStatus
where
    I: IntoIterator<Item = HostRoleStatus>,
{
    let mut any = false;
    let mut all_pending = true;
    let mut any_running = false;
    let (mut aborted, mut timed_out, mut failed) = (false, false, false);

    for status in statuses {
        any = true;
        if status != HostRoleStatus::Pending {
            all_pending = false;
        }
        match status {
            HostRoleStatus::Pending | HostRoleStatus::Queued | HostRoleStatus::InProgress => {
                any_running = true
            }
            HostRoleStatus::Aborted => aborted = true,
            HostRoleStatus::Timedout => timed_out = true,
            HostRoleStatus::Failed => failed = true,
            HostRoleStatus::Completed => {}
        }
    }

    if !any {
        return HostRoleStatus::Completed;
    }
    if any_running {
        return if all_pending {
            HostRoleStatus::Pending
        } else {
            HostRoleStatus::InProgress
        };
    }
    if aborted {
        HostRoleStatus::Aborted
    } else if timed_out {
        HostRoleStatus::Timedout
    } else if failed {
        HostRoleStatus::Failed
    } else {
        HostRoleStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestStatusSummary {
    pub request_id: RequestId,
    pub status: HostRoleStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub timed_out: u32,
    pub aborted: u32,
    pub in_progress: u32,
    pub progress_percent: f64,
}

impl RequestStatusSummary {
    pub fn from_stages(request_id: RequestId, stages: &[Stage]) -> Self {
        let mut summary = Self {
            request_id,
            status: derive_status(stages.iter().flat_map(|s| s.commands().map(|c| c.status))),
            total: 0,
            completed: 0,
            failed: 0,
            timed_out: 0,
            aborted: 0,
            in_progress: 0,
            progress_percent: 0.0,
        };

        for cmd in stages.iter().flat_map(|s| s.commands()) {
            summary.total += 1;
            match cmd.status {
                HostRoleStatus::Completed => summary.completed += 1,
                HostRoleStatus::Failed => summary.failed += 1,
                HostRoleStatus::Timedout => summary.timed_out += 1,
                HostRoleStatus::Aborted => summary.aborted += 1,
                _ => summary.in_progress += 1,
            }
        }

        if summary.total > 0 {
            let done = summary.total - summary.in_progress;
            summary.progress_percent = (done as f64 / summary.total as f64) * 100.0;
        }
        summary
    }
}

/* --------- Pedido de upgrade que llega al master --------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitUpgradeRequest {
    pub pack: UpgradePack,
    pub topology: ClusterTopology,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitUpgradeResponse {
    pub request_id: RequestId,
    pub stage_count: usize,
    pub groups: Vec<String>,
}
