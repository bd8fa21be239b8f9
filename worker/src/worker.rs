use anyhow::Result;
use reqwest::{Client, StatusCode};
use rollout_common::{
    AgentHeartbeatRequest, AgentHeartbeatResponse, AgentRegisterRequest, AgentRegisterResponse,
    CommandReport, ExecutionCommand, HostRoleStatus,
};
use std::{env, sync::Arc, time::Duration};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

const DEFAULT_WORKER_CONCURRENCY: usize = 2;
const DEFAULT_TASK_MS: u64 = 2000;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Los MANUAL los completa el operador desde el master.
const MANUAL_ROLE: &str = "MANUAL";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub base_url: String,
    pub hostname: String,
    pub concurrency: usize,
    /// Duración simulada de cada comando.
    pub task_time: Duration,
    /// Roles que este agente reporta como FAILED.
    pub fail_roles: Vec<String>,
}

impl WorkerConfig {
    /// - En Docker usaremos: MASTER_URL=http://master:8080
    /// - Si no está definida, usa http://localhost:8080 (para pruebas locales)
    pub fn from_env() -> Self {
        let hostname = env::var("WORKER_HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string()
        });

        Self {
            base_url: env::var("MASTER_URL").unwrap_or_else(|_| "http://localhost:8080".to_string()),
            hostname,
            concurrency: env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(DEFAULT_WORKER_CONCURRENCY)
                .max(1),
            task_time: Duration::from_millis(
                env::var("WORKER_TASK_MS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_TASK_MS),
            ),
            fail_roles: env::var("WORKER_FAIL_ROLES")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    fn outcome(&self, role: &str) -> (HostRoleStatus, i32) {
        if self.fail_roles.iter().any(|r| r == role) {
            (HostRoleStatus::Failed, 1)
        } else {
            (HostRoleStatus::Completed, 0)
        }
    }
}

type Reports = Arc<Mutex<Vec<CommandReport>>>;

fn report(command: &ExecutionCommand, role: &str, status: HostRoleStatus, exit_code: i32, stdout: String) -> CommandReport {
    CommandReport {
        action_id: command.command_id.clone(),
        role: role.to_string(),
        status: status.as_str().to_string(),
        exit_code,
        stdout,
        stderr: String::new(),
    }
}

async fn register(client: &Client, config: &WorkerConfig) -> Result<String> {
    let register_url = format!("{}/api/v1/agents/register", config.base_url);
    let AgentRegisterResponse { agent_id } = client
        .post(&register_url)
        .json(&AgentRegisterRequest {
            hostname: config.hostname.clone(),
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    info!(
        "agente {} registrado como {} contra {}",
        agent_id, config.hostname, config.base_url
    );
    Ok(agent_id)
}

/// Simula la ejecución: IN_PROGRESS al arrancar y el resultado al terminar.
async fn execute(command: ExecutionCommand, config: &WorkerConfig, reports: &Reports) {
    let roles: Vec<&str> = command
        .role_commands
        .iter()
        .map(|rc| rc.role.as_str())
        .filter(|role| *role != MANUAL_ROLE)
        .collect();
    if roles.is_empty() {
        debug!("comando {} sin roles ejecutables", command.command_id);
        return;
    }

    {
        let mut pending = reports.lock().await;
        for role in &roles {
            pending.push(report(&command, role, HostRoleStatus::InProgress, 0, String::new()));
        }
    }

    info!("ejecutando {} ({})", command.command_id, roles.join(", "));
    sleep(config.task_time).await;

    let mut pending = reports.lock().await;
    for role in roles {
        let (status, exit_code) = config.outcome(role);
        if status.is_failed_state() {
            warn!("{} falló en {}", role, command.command_id);
        }
        let stdout = format!("{} {} en {}", role, status, config.hostname);
        pending.push(report(&command, role, status, exit_code, stdout));
    }
}

/// Loop principal del worker.
/// - Se registra en el master.
/// - Cada segundo manda un heartbeat con los reportes acumulados.
/// - Ejecuta cada comando recibido en paralelo (hasta WORKER_CONCURRENCY).
pub async fn run(config: WorkerConfig) -> Result<()> {
    let client = Client::new();
    let config = Arc::new(config);

    register(&client, &config).await?;

    let sem = Arc::new(Semaphore::new(config.concurrency));
    let reports: Reports = Arc::new(Mutex::new(Vec::new()));
    let hb_url = format!("{}/api/v1/agents/heartbeat", config.base_url);

    loop {
        let outgoing = std::mem::take(&mut *reports.lock().await);
        let request = AgentHeartbeatRequest {
            hostname: config.hostname.clone(),
            reports: outgoing.clone(),
        };

        match client.post(&hb_url).json(&request).send().await {
            Ok(res) if res.status() == StatusCode::NOT_FOUND => {
                // el master no nos conoce (reinicio): registrarse de nuevo
                warn!("master no reconoce a {}, re-registrando", config.hostname);
                requeue(&reports, outgoing).await;
                if let Err(e) = register(&client, &config).await {
                    warn!("no se pudo re-registrar: {}", e);
                }
            }
            Ok(res) => match res.error_for_status() {
                Ok(res) => match res.json::<AgentHeartbeatResponse>().await {
                    Ok(AgentHeartbeatResponse { commands }) => {
                        for command in commands {
                            let sem = sem.clone();
                            let config = config.clone();
                            let reports = reports.clone();
                            tokio::spawn(async move {
                                let Ok(_permit) = sem.acquire_owned().await else {
                                    return;
                                };
                                execute(command, &config, &reports).await;
                            });
                        }
                    }
                    Err(e) => warn!("respuesta de heartbeat inválida: {}", e),
                },
                Err(e) => {
                    warn!("heartbeat rechazado: {}", e);
                    requeue(&reports, outgoing).await;
                }
            },
            Err(e) => {
                warn!("error HTTP en heartbeat: {}", e);
                requeue(&reports, outgoing).await;
            }
        }

        sleep(HEARTBEAT_INTERVAL).await;
    }
}

/// Devuelve al buffer los reportes que no llegaron, delante de los nuevos.
async fn requeue(reports: &Reports, outgoing: Vec<CommandReport>) {
    if outgoing.is_empty() {
        return;
    }
    let mut pending = reports.lock().await;
    pending.splice(0..0, outgoing);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rollout_common::{RoleCommand, RoleCommandPayload};
    use std::collections::BTreeMap;

    fn config(fail_roles: &[&str]) -> WorkerConfig {
        WorkerConfig {
            base_url: "http://localhost:0".into(),
            hostname: "h1".into(),
            concurrency: 1,
            task_time: Duration::ZERO,
            fail_roles: fail_roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn command(roles: &[&str]) -> ExecutionCommand {
        ExecutionCommand {
            command_id: "3-4".into(),
            request_id: 3,
            stage_id: 4,
            cluster_name: "c1".into(),
            host: "h1".into(),
            role_commands: roles
                .iter()
                .enumerate()
                .map(|(i, role)| RoleCommandPayload {
                    task_id: i as i64 + 1,
                    role: role.to_string(),
                    role_command: RoleCommand::Restart,
                    service: None,
                    params: BTreeMap::new(),
                })
                .collect(),
        }
    }

    fn statuses(reports: &[CommandReport]) -> Vec<(String, String)> {
        reports
            .iter()
            .map(|r| (r.role.clone(), r.status.clone()))
            .collect()
    }

    #[tokio::test]
    async fn reports_progress_then_outcome() {
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        execute(command(&["DATANODE", "NODEMANAGER"]), &config(&["NODEMANAGER"]), &reports).await;

        let reports = reports.lock().await;
        assert_eq!(
            statuses(&reports),
            vec![
                ("DATANODE".to_string(), "IN_PROGRESS".to_string()),
                ("NODEMANAGER".to_string(), "IN_PROGRESS".to_string()),
                ("DATANODE".to_string(), "COMPLETED".to_string()),
                ("NODEMANAGER".to_string(), "FAILED".to_string()),
            ]
        );
        assert!(reports.iter().all(|r| r.action_id == "3-4"));
        assert_eq!(reports[3].exit_code, 1);
    }

    #[tokio::test]
    async fn manual_roles_are_left_to_the_operator() {
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        execute(command(&["MANUAL"]), &config(&[]), &reports).await;
        assert!(reports.lock().await.is_empty());
    }

    #[tokio::test]
    async fn requeue_keeps_order() {
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        let cmd = command(&["A"]);
        reports
            .lock()
            .await
            .push(report(&cmd, "NEW", HostRoleStatus::Completed, 0, String::new()));

        requeue(
            &reports,
            vec![report(&cmd, "OLD", HostRoleStatus::InProgress, 0, String::new())],
        )
        .await;

        let roles: Vec<String> = reports.lock().await.iter().map(|r| r.role.clone()).collect();
        assert_eq!(roles, vec!["OLD".to_string(), "NEW".to_string()]);
    }
}
