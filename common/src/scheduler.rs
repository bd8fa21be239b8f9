//! Loop de control que lleva los stages en curso a término.
//!
//! Cada tick (`do_work`) corre completo antes de dormir: lee los stages en
//! progreso, reagenda lo que venció, evalúa cada rol contra su success
//! factor y, si un rol ya no puede cumplirlo, aborta el request entero.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::accessor::ActionDbAccessor;
use crate::error::Result;
use crate::fsm::{ClusterFsm, ServiceComponentHostEvent};
use crate::queue::ActionQueue;
use crate::stage::{HostRoleCommand, RequestId, Stage, StageId};
use crate::status::HostRoleStatus;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
pub const DEFAULT_SLEEP_TIME: Duration = Duration::from_secs(1);
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pausa entre ticks.
    pub sleep_time: Duration,
    /// Tiempo sin reporte antes de reintentar (o vencer) un comando.
    pub action_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sleep_time: DEFAULT_SLEEP_TIME,
            action_timeout: DEFAULT_ACTION_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Agregado de un rol sobre todos los hosts de un stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleStatus {
    pub role: String,
    pub total_hosts: usize,
    pub success_factor: f64,
    pub num_succeeded: usize,
    pub num_failed: usize,
    pub num_pending: usize,
    pub num_queued: usize,
    pub num_in_progress: usize,
    pub num_timed_out: usize,
    pub num_aborted: usize,
}

impl RoleStatus {
    pub fn new(role: &str, total_hosts: usize, success_factor: f64) -> Self {
        Self {
            role: role.to_string(),
            total_hosts,
            success_factor,
            num_succeeded: 0,
            num_failed: 0,
            num_pending: 0,
            num_queued: 0,
            num_in_progress: 0,
            num_timed_out: 0,
            num_aborted: 0,
        }
    }

    pub fn from_commands<'a, I>(role: &str, success_factor: f64, commands: I) -> Self
    where
        I: IntoIterator<Item = &'a HostRoleCommand>,
    {
        let statuses: Vec<HostRoleStatus> = commands.into_iter().map(|c| c.status).collect();
        let mut status = Self::new(role, statuses.len(), success_factor);
        for s in statuses {
            status.record(s);
        }
        status
    }

    pub fn record(&mut self, status: HostRoleStatus) {
        match status {
            HostRoleStatus::Pending => self.num_pending += 1,
            HostRoleStatus::Queued => self.num_queued += 1,
            HostRoleStatus::InProgress => self.num_in_progress += 1,
            HostRoleStatus::Completed => self.num_succeeded += 1,
            HostRoleStatus::Failed => self.num_failed += 1,
            HostRoleStatus::Timedout => self.num_timed_out += 1,
            HostRoleStatus::Aborted => self.num_aborted += 1,
        }
    }

    /// Fracción de hosts completados, no cantidad.
    pub fn is_role_successful(&self) -> bool {
        if self.total_hosts == 0 {
            return true;
        }
        self.success_factor <= self.num_succeeded as f64 / self.total_hosts as f64
    }

    pub fn is_role_in_progress(&self) -> bool {
        self.num_pending + self.num_queued + self.num_in_progress > 0
    }

    /// Ni exitoso ni en curso: ya no puede llegar al success factor.
    pub fn is_role_failed(&self) -> bool {
        !self.is_role_successful() && !self.is_role_in_progress()
    }
}

pub struct ActionScheduler {
    db: Arc<dyn ActionDbAccessor>,
    queue: Arc<ActionQueue>,
    fsm: Arc<dyn ClusterFsm>,
    config: SchedulerConfig,
}

impl ActionScheduler {
    pub fn new(
        db: Arc<dyn ActionDbAccessor>,
        queue: Arc<ActionQueue>,
        fsm: Arc<dyn ClusterFsm>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            queue,
            fsm,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Loop principal: un tick, dormir, repetir hasta que llegue la señal de
    /// parada. Un error en un tick se loguea y el loop sigue.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "scheduler iniciado (sleep={:?}, timeout={:?}, max_attempts={})",
            self.config.sleep_time, self.config.action_timeout, self.config.max_attempts
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.do_work() {
                warn!("error en tick del scheduler: {:?}", e);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.sleep_time) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler detenido");
    }

    pub fn do_work(&self) -> Result<()> {
        self.do_work_at(chrono::Utc::now().timestamp_millis())
    }

    /// Un tick con `now` en milisegundos.
    pub fn do_work_at(&self, now: i64) -> Result<()> {
        let stages = self.db.get_stages_in_progress()?;
        if stages.is_empty() {
            return Ok(());
        }

        // requests cuyo stage anterior todavía no cumplió
        let mut blocked: HashSet<RequestId> = HashSet::new();

        for mut stage in stages {
            let request_id = stage.request_id;
            if blocked.contains(&request_id) {
                continue;
            }
            let Some(stage_id) = stage.stage_id() else {
                warn!("stage sin id en request {}, se ignora", request_id);
                continue;
            };

            // rol -> host -> comando; se arma de nuevo en cada tick
            let mut roles: BTreeMap<String, BTreeMap<String, HostRoleCommand>> = BTreeMap::new();
            for cmd in stage.commands() {
                roles
                    .entry(cmd.role.clone())
                    .or_default()
                    .insert(cmd.host.clone(), cmd.clone());
            }

            let mut move_to_next_stage = true;
            for (role, mut commands) in roles {
                self.process_pendings_and_reschedule(&mut stage, stage_id, &mut commands, now)?;

                let status =
                    RoleStatus::from_commands(&role, stage.success_factor(&role), commands.values());

                if status.is_role_failed() {
                    if stage.auto_skip_on_failure {
                        warn!(
                            "rol {} falló en stage {}-{} ({}/{} ok), se saltea por auto-skip",
                            role, request_id, stage_id, status.num_succeeded, status.total_hosts
                        );
                        continue;
                    }

                    warn!(
                        "rol {} falló en stage {}-{} ({}/{} ok, factor {}), abortando request {}",
                        role,
                        request_id,
                        stage_id,
                        status.num_succeeded,
                        status.total_hosts,
                        status.success_factor,
                        request_id
                    );
                    self.db.abort_operation(request_id)?;
                    return Ok(());
                }

                if !status.is_role_successful() && status.is_role_in_progress() {
                    move_to_next_stage = false;
                }
            }

            if !move_to_next_stage {
                blocked.insert(request_id);
            }
        }

        Ok(())
    }

    /// Reintenta o vence los comandos PENDING/QUEUED de un rol cuyo último
    /// intento ya superó el timeout.
    fn process_pendings_and_reschedule(
        &self,
        stage: &mut Stage,
        stage_id: StageId,
        commands: &mut BTreeMap<String, HostRoleCommand>,
        now: i64,
    ) -> Result<()> {
        let timeout = self.timeout_for(stage);
        let request_id = stage.request_id;
        let cluster_name = stage.cluster_name.clone();

        for (host, command) in commands.iter_mut() {
            if !command.status.is_schedulable() {
                continue;
            }
            let Some(action) = stage.host_action_mut(host) else {
                continue;
            };

            let due = match action.last_attempt_time {
                None => true,
                Some(last) => now > last.saturating_add(timeout),
            };
            if !due {
                continue;
            }

            if action.attempt_count >= self.config.max_attempts {
                let left = self
                    .db
                    .timeout_host_role(host, request_id, stage_id, &command.role)?;
                if left == HostRoleStatus::Timedout {
                    warn!(
                        "{} en {} (stage {}-{}) sin respuesta tras {} intentos, marcado TIMEDOUT",
                        command.role, host, request_id, stage_id, action.attempt_count
                    );
                    self.fire(
                        &cluster_name,
                        &command.role,
                        host,
                        ServiceComponentHostEvent::OpFailed {
                            command: command.role_command,
                            timestamp: now,
                        },
                    );
                }

                command.status = left;
                if let Some(local) = action.command_mut(&command.role) {
                    local.status = left;
                }
                continue;
            }

            let Some(execution) = self.db.record_host_attempt(host, request_id, stage_id, now)?
            else {
                // un reporte o un abort llegó después de la lectura del tick
                let fresh = self
                    .db
                    .get_action(request_id, stage_id)?
                    .and_then(|s| s.host_action(host).cloned());
                if let Some(fresh) = fresh {
                    if let Some(saved) = fresh.command(&command.role) {
                        command.status = saved.status;
                    }
                    *action = fresh;
                }
                continue;
            };

            if action.start_time.is_none() {
                for rc in &action.role_commands {
                    self.fire(
                        &cluster_name,
                        &rc.role,
                        host,
                        ServiceComponentHostEvent::OpStarted {
                            command: rc.role_command,
                            timestamp: now,
                        },
                    );
                }
                action.start_time = Some(now);
            }

            action.last_attempt_time = Some(now);
            action.attempt_count += 1;
            for rc in action.role_commands.iter_mut() {
                if rc.status == HostRoleStatus::Pending {
                    rc.status = HostRoleStatus::Queued;
                }
            }
            let attempt = action.attempt_count;

            if attempt > 1 {
                info!(
                    "re-encolando stage {}-{} para {} (intento {}/{})",
                    request_id, stage_id, host, attempt, self.config.max_attempts
                );
            } else {
                debug!("encolando stage {}-{} para {}", request_id, stage_id, host);
            }
            self.queue.enqueue(host, execution);

            if command.status == HostRoleStatus::Pending {
                command.status = HostRoleStatus::Queued;
            }
        }

        Ok(())
    }

    fn timeout_for(&self, stage: &Stage) -> i64 {
        let ms = stage.timeout_ms.unwrap_or_else(|| {
            u64::try_from(self.config.action_timeout.as_millis()).unwrap_or(u64::MAX)
        });
        i64::try_from(ms).unwrap_or(i64::MAX)
    }

    /// Los errores del FSM no cortan el tick.
    fn fire(&self, cluster_name: &str, role: &str, host: &str, event: ServiceComponentHostEvent) {
        if let Err(e) = self.fsm.fire_event(cluster_name, role, host, event) {
            warn!("error disparando evento al fsm para {} en {}: {}", role, host, e);
        }
    }
}
