use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::accessor::ActionDbAccessor;
use crate::error::{Error, Result};
use crate::fsm::ClusterFsm;
use crate::queue::ActionQueue;
use crate::request::{parse_action_id, CommandReport, Request, RequestStatusSummary};
use crate::scheduler::{ActionScheduler, SchedulerConfig};
use crate::stage::{RequestId, Stage, StageId};

/// Punto de entrada para el resto del master: persiste requests, recibe
/// reportes de los agentes y controla el loop del scheduler.
pub struct ActionManager {
    db: Arc<dyn ActionDbAccessor>,
    queue: Arc<ActionQueue>,
    scheduler: Arc<ActionScheduler>,
    request_counter: AtomicI64,
    runtime: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl ActionManager {
    pub fn new(
        db: Arc<dyn ActionDbAccessor>,
        queue: Arc<ActionQueue>,
        fsm: Arc<dyn ClusterFsm>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let last = db.last_persisted_request_id()?;
        let scheduler = Arc::new(ActionScheduler::new(
            db.clone(),
            queue.clone(),
            fsm,
            config,
        ));

        Ok(Self {
            db,
            queue,
            scheduler,
            request_counter: AtomicI64::new(last),
            runtime: Mutex::new(None),
        })
    }

    /// Lanza el loop del scheduler en una tarea de tokio. Si ya corre, no hace nada.
    pub fn start(&self) {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() {
            debug!("scheduler ya iniciado");
            return;
        }

        let (tx, rx) = watch::channel(false);
        let scheduler = self.scheduler.clone();
        let handle = tokio::spawn(async move {
            scheduler.run(rx).await;
        });
        *runtime = Some((tx, handle));
    }

    /// Corta el sleep del scheduler y espera a que termine el tick en curso.
    pub async fn shutdown(&self) {
        let Some((tx, handle)) = self.runtime.lock().take() else {
            return;
        };

        let _ = tx.send(true);
        if let Err(e) = handle.await {
            warn!("el scheduler terminó con error: {:?}", e);
        }
        info!("action manager detenido");
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().is_some()
    }

    /// Solo persiste; el scheduler los toma en el próximo tick.
    pub fn send_actions(&self, stages: Vec<Stage>) -> Result<()> {
        if let Some(first) = stages.first() {
            info!(
                "recibidos {} stages para request {}",
                stages.len(),
                first.request_id
            );
        }
        self.db.persist_actions(stages)
    }

    pub fn get_request_status(&self, request_id: RequestId) -> Result<RequestStatusSummary> {
        let stages = self.db.get_all_stages(request_id)?;
        if stages.is_empty() {
            return Err(Error::RequestNotFound(request_id));
        }
        Ok(RequestStatusSummary::from_stages(request_id, &stages))
    }

    pub fn get_request(&self, request_id: RequestId) -> Result<Request> {
        self.db
            .get_request(request_id)?
            .ok_or(Error::RequestNotFound(request_id))
    }

    pub fn get_requests(&self) -> Result<Vec<RequestId>> {
        self.db.get_requests()
    }

    pub fn get_action(&self, request_id: RequestId, stage_id: StageId) -> Result<Option<Stage>> {
        self.db.get_action(request_id, stage_id)
    }

    pub fn get_request_stages(&self, request_id: RequestId) -> Result<Vec<Stage>> {
        self.db.get_all_stages(request_id)
    }

    pub fn abort_request(&self, request_id: RequestId) -> Result<()> {
        if self.db.get_request(request_id)?.is_none() {
            return Err(Error::RequestNotFound(request_id));
        }
        info!("abortando request {} a pedido del operador", request_id);
        self.db.abort_operation(request_id)
    }

    /// Aplica los reportes de un host. Un reporte malformado o que no
    /// corresponde a ningún comando se descarta; los errores de
    /// almacenamiento se propagan.
    pub fn action_response(&self, host: &str, reports: &[CommandReport]) -> Result<()> {
        for report in reports {
            let (request_id, stage_id) = match parse_action_id(&report.action_id) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("reporte de {} descartado: {}", host, e);
                    continue;
                }
            };

            match self
                .db
                .update_host_role_state(host, request_id, stage_id, &report.role, report)
            {
                Ok(()) => debug!(
                    "reporte {} de {} en {} ({})",
                    report.status, report.role, host, report.action_id
                ),
                Err(e @ (Error::CommandNotFound { .. } | Error::InvalidStatus(_))) => {
                    warn!("reporte de {} descartado: {}", host, e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn get_next_request_id(&self) -> RequestId {
        self.request_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<ActionScheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::InMemoryActionDb;
    use crate::fsm::LoggingFsm;
    use crate::request::action_id;
    use crate::stage::RoleCommand;
    use crate::status::HostRoleStatus;
    use std::time::Duration;

    fn manager_with(db: Arc<InMemoryActionDb>) -> ActionManager {
        ActionManager::new(
            db,
            Arc::new(ActionQueue::new()),
            Arc::new(LoggingFsm),
            SchedulerConfig {
                sleep_time: Duration::from_millis(10),
                ..SchedulerConfig::default()
            },
        )
        .unwrap()
    }

    fn stage(request_id: RequestId, stage_id: StageId, hosts: &[&str]) -> Stage {
        let mut stage = Stage::new(request_id, "c1", "Restarting DATANODE");
        stage.set_stage_id(stage_id).unwrap();
        for host in hosts {
            stage.add_host_role_command(host, "DATANODE", RoleCommand::Restart);
        }
        stage
    }

    fn report(action: &str, status: &str) -> CommandReport {
        CommandReport {
            action_id: action.to_string(),
            role: "DATANODE".into(),
            status: status.into(),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    #[test]
    fn request_ids_continue_after_last_persisted() {
        let db = Arc::new(InMemoryActionDb::new());
        db.persist_actions(vec![stage(41, 1, &["h1"])]).unwrap();

        let manager = manager_with(db);
        assert_eq!(manager.get_next_request_id(), 42);
        assert_eq!(manager.get_next_request_id(), 43);
    }

    #[test]
    fn send_actions_only_persists() {
        let manager = manager_with(Arc::new(InMemoryActionDb::new()));
        manager.send_actions(vec![stage(1, 1, &["h1"])]).unwrap();

        assert_eq!(manager.queue().size("h1"), 0);
        let status = manager.get_request_status(1).unwrap();
        assert_eq!(status.status, HostRoleStatus::Pending);
        assert_eq!(status.total, 1);
        assert!(matches!(
            manager.get_request_status(9),
            Err(Error::RequestNotFound(9))
        ));
    }

    #[test]
    fn action_response_routes_reports_by_action_id() {
        let manager = manager_with(Arc::new(InMemoryActionDb::new()));
        manager
            .send_actions(vec![stage(1, 1, &["h1"]), stage(1, 2, &["h1"])])
            .unwrap();

        manager
            .action_response(
                "h1",
                &[
                    report(&action_id(1, 2), "COMPLETED"),
                    report("basura", "COMPLETED"),
                    report(&action_id(1, 7), "COMPLETED"),
                    report(&action_id(1, 1), "NOPE"),
                ],
            )
            .unwrap();

        let first = manager.get_action(1, 1).unwrap().unwrap();
        let second = manager.get_action(1, 2).unwrap().unwrap();
        assert_eq!(
            first.host_action("h1").unwrap().role_commands[0].status,
            HostRoleStatus::Pending
        );
        assert_eq!(
            second.host_action("h1").unwrap().role_commands[0].status,
            HostRoleStatus::Completed
        );

        manager.action_response("h1", &[]).unwrap();
    }

    #[test]
    fn abort_unknown_request_is_an_error() {
        let manager = manager_with(Arc::new(InMemoryActionDb::new()));
        assert!(matches!(
            manager.abort_request(5),
            Err(Error::RequestNotFound(5))
        ));

        manager.send_actions(vec![stage(5, 1, &["h1", "h2"])]).unwrap();
        manager.abort_request(5).unwrap();
        assert_eq!(manager.get_request(5).unwrap().status, HostRoleStatus::Aborted);
    }

    #[tokio::test]
    async fn background_loop_dispatches_and_stops() {
        let manager = manager_with(Arc::new(InMemoryActionDb::new()));
        manager.send_actions(vec![stage(1, 1, &["h1"])]).unwrap();

        manager.start();
        manager.start();
        assert!(manager.is_running());

        let mut dispatched = 0;
        for _ in 0..100 {
            dispatched = manager.queue().size("h1");
            if dispatched > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dispatched, 1);

        manager.shutdown().await;
        assert!(!manager.is_running());
        // segunda vez no hace nada
        manager.shutdown().await;
    }
}
