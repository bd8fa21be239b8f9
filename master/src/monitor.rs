use crate::state::AppState;
use crate::AGENT_LOST_TIMEOUT;
use std::time::{Duration, SystemTime};
use tracing::warn;

const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

pub async fn monitor_agents(state: AppState) {
    loop {
        tokio::time::sleep(MONITOR_INTERVAL).await;
        mark_lost_agents(&state, SystemTime::now());
    }
}

/// Marca como perdidos los agentes sin heartbeat reciente. Sus comandos
/// quedan en manos del timeout del scheduler.
pub fn mark_lost_agents(state: &AppState, now: SystemTime) -> Vec<String> {
    let mut lost = Vec::new();
    let mut agents = state.agents.lock();

    for (hostname, meta) in agents.iter_mut() {
        if meta.lost {
            continue;
        }
        if let Ok(elapsed) = now.duration_since(meta.last_heartbeat) {
            if elapsed > AGENT_LOST_TIMEOUT {
                meta.lost = true;
                warn!(
                    "agente {} ({}) sin heartbeat hace {}s",
                    hostname,
                    meta.agent_id,
                    elapsed.as_secs()
                );
                lost.push(hostname.clone());
            }
        }
    }
    lost
}
