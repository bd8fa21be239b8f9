//! Frontera de persistencia del scheduler.
//!
//! El scheduler y los handlers de reportes solo hablan con el estado de los
//! comandos a través de [`ActionDbAccessor`]. [`InMemoryActionDb`] es la
//! implementación de referencia: un único lock protege todo, así que cada
//! operación es atómica respecto de las demás.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::request::{derive_status, CommandReport, Request};
use crate::stage::{ExecutionCommand, HostRoleCommand, RequestId, Stage, StageId, TaskId};
use crate::status::HostRoleStatus;

pub trait ActionDbAccessor: Send + Sync {
    /// Stages con al menos un comando sin terminar, en orden (request, stage).
    fn get_stages_in_progress(&self) -> Result<Vec<Stage>>;

    /// Guarda un lote de stages nuevos. Todo o nada.
    fn persist_actions(&self, stages: Vec<Stage>) -> Result<()>;

    /// Pasa a ABORTED todo comando PENDING/QUEUED del request. Idempotente.
    fn abort_operation(&self, request_id: RequestId) -> Result<()>;

    /// Pasa el comando a TIMEDOUT solo si sigue PENDING/QUEUED. Devuelve el
    /// estado con el que quedó, que puede ser otro si un reporte o un abort
    /// llegó antes.
    fn timeout_host_role(
        &self,
        host: &str,
        request_id: RequestId,
        stage_id: StageId,
        role: &str,
    ) -> Result<HostRoleStatus>;

    /// Registra un intento de envío al host: start_time (la primera vez),
    /// last_attempt_time, attempt_count + 1, y PENDING -> QUEUED.
    ///
    /// Devuelve el comando a encolar armado con el estado guardado, o `None`
    /// (sin registrar nada) si el host ya no tiene comandos PENDING/QUEUED.
    fn record_host_attempt(
        &self,
        host: &str,
        request_id: RequestId,
        stage_id: StageId,
        now: i64,
    ) -> Result<Option<ExecutionCommand>>;

    /// Único camino por el que un comando llega a COMPLETED o FAILED.
    fn update_host_role_state(
        &self,
        host: &str,
        request_id: RequestId,
        stage_id: StageId,
        role: &str,
        report: &CommandReport,
    ) -> Result<()>;

    fn get_all_stages(&self, request_id: RequestId) -> Result<Vec<Stage>>;

    fn get_action(&self, request_id: RequestId, stage_id: StageId) -> Result<Option<Stage>>;

    fn get_task(&self, task_id: TaskId) -> Result<Option<HostRoleCommand>>;

    fn get_requests(&self) -> Result<Vec<RequestId>>;

    fn get_request(&self, request_id: RequestId) -> Result<Option<Request>>;

    /// 0 si nunca se persistió nada.
    fn last_persisted_request_id(&self) -> Result<RequestId>;
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Default)]
struct DbState {
    stages: BTreeMap<(RequestId, StageId), Stage>,
    requests: BTreeMap<RequestId, Request>,
    // task_id -> (request, stage, host, role)
    tasks: HashMap<TaskId, (RequestId, StageId, String, String)>,
    next_task_id: TaskId,
}

impl DbState {
    fn command_mut(
        &mut self,
        host: &str,
        request_id: RequestId,
        stage_id: StageId,
        role: &str,
    ) -> Result<&mut HostRoleCommand> {
        self.stages
            .get_mut(&(request_id, stage_id))
            .and_then(|s| s.host_action_mut(host))
            .and_then(|a| a.command_mut(role))
            .ok_or_else(|| Error::CommandNotFound {
                host: host.to_string(),
                request_id,
                stage_id,
                role: role.to_string(),
            })
    }

    /// Recalcula el estado derivado del request.
    fn refresh_request(&mut self, request_id: RequestId, now: i64) {
        let status = derive_status(
            self.stages
                .range((request_id, StageId::MIN)..=(request_id, StageId::MAX))
                .flat_map(|(_, s)| s.commands().map(|c| c.status)),
        );

        if let Some(request) = self.requests.get_mut(&request_id) {
            if status != HostRoleStatus::Pending && request.start_time.is_none() {
                request.start_time = Some(now);
            }
            if status.is_terminal() && request.end_time.is_none() {
                request.end_time = Some(now);
            }
            request.status = status;
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryActionDb {
    state: RwLock<DbState>,
}

impl InMemoryActionDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActionDbAccessor for InMemoryActionDb {
    fn get_stages_in_progress(&self) -> Result<Vec<Stage>> {
        let state = self.state.read();
        Ok(state
            .stages
            .values()
            .filter(|s| s.is_in_progress())
            .cloned()
            .collect())
    }

    fn persist_actions(&self, stages: Vec<Stage>) -> Result<()> {
        let mut state = self.state.write();

        // Validar todo antes de tocar nada
        let mut keys = Vec::with_capacity(stages.len());
        for stage in &stages {
            let stage_id = stage.stage_id().ok_or(Error::StageIdMissing {
                request_id: stage.request_id,
            })?;
            let key = (stage.request_id, stage_id);
            if state.stages.contains_key(&key) || keys.contains(&key) {
                return Err(Error::DuplicateStage {
                    request_id: stage.request_id,
                    stage_id,
                });
            }
            keys.push(key);
        }

        let now = now_millis();
        let mut touched: Vec<RequestId> = keys.iter().map(|k| k.0).collect();
        touched.dedup();

        for (mut stage, key) in stages.into_iter().zip(keys) {
            for cmd in stage.commands_mut() {
                state.next_task_id += 1;
                cmd.task_id = state.next_task_id;
                state
                    .tasks
                    .insert(cmd.task_id, (key.0, key.1, cmd.host.clone(), cmd.role.clone()));
            }

            state.requests.entry(key.0).or_insert_with(|| Request {
                request_id: key.0,
                cluster_name: stage.cluster_name.clone(),
                context: stage.request_context.clone(),
                create_time: now,
                start_time: None,
                end_time: None,
                target_service: None,
                target_component: None,
                target_hosts: Vec::new(),
                status: HostRoleStatus::Pending,
            });

            debug!(
                "persistido stage {}-{} ({} hosts)",
                key.0,
                key.1,
                stage.host_actions.len()
            );
            state.stages.insert(key, stage);
        }

        for request_id in touched {
            state.refresh_request(request_id, now);
        }
        Ok(())
    }

    fn abort_operation(&self, request_id: RequestId) -> Result<()> {
        let mut state = self.state.write();
        let now = now_millis();
        let mut aborted = 0;

        for (_, stage) in state
            .stages
            .range_mut((request_id, StageId::MIN)..=(request_id, StageId::MAX))
        {
            for cmd in stage.commands_mut() {
                if cmd.status.is_schedulable() {
                    cmd.status = HostRoleStatus::Aborted;
                    cmd.end_time = Some(now);
                    aborted += 1;
                }
            }
        }

        if aborted > 0 {
            info!("request {} abortado ({} comandos)", request_id, aborted);
        }
        state.refresh_request(request_id, now);
        Ok(())
    }

    fn timeout_host_role(
        &self,
        host: &str,
        request_id: RequestId,
        stage_id: StageId,
        role: &str,
    ) -> Result<HostRoleStatus> {
        let mut state = self.state.write();
        let now = now_millis();
        let cmd = state.command_mut(host, request_id, stage_id, role)?;

        if !cmd.status.is_schedulable() {
            warn!(
                "timeout de {} en {} (stage {}-{}) descartado: el comando ya está {}",
                role, host, request_id, stage_id, cmd.status
            );
            return Ok(cmd.status);
        }

        cmd.status = HostRoleStatus::Timedout;
        cmd.end_time = Some(now);
        state.refresh_request(request_id, now);
        Ok(HostRoleStatus::Timedout)
    }

    fn record_host_attempt(
        &self,
        host: &str,
        request_id: RequestId,
        stage_id: StageId,
        now: i64,
    ) -> Result<Option<ExecutionCommand>> {
        let mut state = self.state.write();
        let stage = state
            .stages
            .get_mut(&(request_id, stage_id))
            .ok_or(Error::StageNotFound {
                request_id,
                stage_id,
            })?;
        let action = stage.host_action_mut(host).ok_or(Error::StageNotFound {
            request_id,
            stage_id,
        })?;

        if !action.role_commands.iter().any(|c| c.status.is_schedulable()) {
            warn!(
                "intento en {} (stage {}-{}) descartado: no quedan comandos por enviar",
                host, request_id, stage_id
            );
            return Ok(None);
        }

        action.start_time.get_or_insert(now);
        action.last_attempt_time = Some(now);
        action.attempt_count += 1;
        for cmd in action.role_commands.iter_mut() {
            if cmd.status == HostRoleStatus::Pending {
                cmd.status = HostRoleStatus::Queued;
                cmd.start_time.get_or_insert(now);
            }
        }
        let execution = stage.execution_command(host);
        state.refresh_request(request_id, now);
        Ok(execution)
    }

    fn update_host_role_state(
        &self,
        host: &str,
        request_id: RequestId,
        stage_id: StageId,
        role: &str,
        report: &CommandReport,
    ) -> Result<()> {
        let status: HostRoleStatus = report.status.parse()?;

        let mut state = self.state.write();
        let now = now_millis();
        let cmd = state.command_mut(host, request_id, stage_id, role)?;

        // Terminales no se mueven; el resto solo avanza
        if !cmd.status.can_move_to(status) {
            warn!(
                "ignorando reporte {} de {} en {} ({}): el comando ya está {}",
                status, role, host, report.action_id, cmd.status
            );
            return Ok(());
        }

        cmd.status = status;
        cmd.exit_code = report.exit_code;
        cmd.stdout = report.stdout.clone();
        cmd.stderr = report.stderr.clone();
        if status.is_terminal() {
            cmd.end_time = Some(now);
        }
        state.refresh_request(request_id, now);
        Ok(())
    }

    fn get_all_stages(&self, request_id: RequestId) -> Result<Vec<Stage>> {
        let state = self.state.read();
        Ok(state
            .stages
            .range((request_id, StageId::MIN)..=(request_id, StageId::MAX))
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn get_action(&self, request_id: RequestId, stage_id: StageId) -> Result<Option<Stage>> {
        Ok(self.state.read().stages.get(&(request_id, stage_id)).cloned())
    }

    fn get_task(&self, task_id: TaskId) -> Result<Option<HostRoleCommand>> {
        let state = self.state.read();
        let Some((request_id, stage_id, host, role)) = state.tasks.get(&task_id) else {
            return Ok(None);
        };
        Ok(state
            .stages
            .get(&(*request_id, *stage_id))
            .and_then(|s| s.host_action(host))
            .and_then(|a| a.command(role))
            .cloned())
    }

    fn get_requests(&self) -> Result<Vec<RequestId>> {
        Ok(self.state.read().requests.keys().copied().collect())
    }

    fn get_request(&self, request_id: RequestId) -> Result<Option<Request>> {
        Ok(self.state.read().requests.get(&request_id).cloned())
    }

    fn last_persisted_request_id(&self) -> Result<RequestId> {
        Ok(self
            .state
            .read()
            .requests
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }
}
