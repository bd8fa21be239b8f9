use rollout_common::SchedulerConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_CLUSTER_NAME: &str = "default";
pub const DEFAULT_SERVER_HOST: &str = "rollout-master";

#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: String,
    /// Se usa cuando la topología del pedido no trae nombre de cluster.
    pub cluster_name: String,
    /// Host al que van las acciones de server y los stages manuales.
    ///
    /// El master no ejecuta SERVER_ACTION por su cuenta: quedan en la cola de
    /// este host hasta que un worker se registre con ese nombre
    /// (`WORKER_HOSTNAME=<SERVER_HOST>`). Si ninguno lo hace, vencen por
    /// timeout y abortan el request. Los MANUAL se confirman por HTTP.
    pub server_host: String,
    pub scheduler: SchedulerConfig,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl MasterConfig {
    pub fn from_env() -> Self {
        let defaults = SchedulerConfig::default();
        let sleep_ms = env_or("SCHEDULER_SLEEP_MS", defaults.sleep_time.as_millis() as u64);
        let timeout_ms = env_or("ACTION_TIMEOUT_MS", defaults.action_timeout.as_millis() as u64);

        Self {
            bind_addr: env::var("MASTER_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            cluster_name: env::var("CLUSTER_NAME").unwrap_or_else(|_| DEFAULT_CLUSTER_NAME.to_string()),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| DEFAULT_SERVER_HOST.to_string()),
            scheduler: SchedulerConfig {
                sleep_time: Duration::from_millis(sleep_ms),
                action_timeout: Duration::from_millis(timeout_ms),
                max_attempts: env_or("MAX_ATTEMPTS", defaults.max_attempts).max(1),
            },
        }
    }
}
