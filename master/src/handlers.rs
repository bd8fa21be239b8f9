use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rollout_common::upgrade::{create_sequence, StageFactory, UpgradeContext};
use rollout_common::{
    action_id, AbortResponse, AgentHeartbeatRequest, AgentHeartbeatResponse, AgentInfo,
    AgentRegisterRequest, AgentRegisterResponse, CommandReport, Error, HostRoleStatus, Request,
    RequestId, RequestStatusSummary, Stage, StageId, SubmitUpgradeRequest, SubmitUpgradeResponse,
};
use std::time::SystemTime;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::{AgentMeta, AppState};

type ApiError = (StatusCode, String);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/agents", get(list_agents))
        .route("/api/v1/agents/register", post(register_agent))
        .route("/api/v1/agents/heartbeat", post(agent_heartbeat))
        .route("/api/v1/requests", get(list_requests).post(submit_upgrade))
        .route("/api/v1/requests/:id", get(get_request))
        .route("/api/v1/requests/:id/stages", get(get_request_stages))
        .route("/api/v1/requests/:id/abort", post(abort_request))
        .route(
            "/api/v1/requests/:id/stages/:stage_id/confirm",
            post(confirm_manual_stage),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::RequestNotFound(_) | Error::StageNotFound { .. } | Error::CommandNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    if status.is_server_error() {
        warn!("error interno: {}", e);
    }
    (status, e.to_string())
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

/* ---------------- agentes ---------------- */

// Registra un agente; si el host ya estaba, se le asigna un id nuevo
async fn register_agent(
    State(state): State<AppState>,
    Json(req): Json<AgentRegisterRequest>,
) -> Json<AgentRegisterResponse> {
    let agent_id = uuid::Uuid::new_v4().to_string();

    {
        let mut agents = state.agents.lock();
        agents.insert(req.hostname.clone(), AgentMeta::new(agent_id.clone()));
    }

    info!("agente registrado: {} en {}", agent_id, req.hostname);
    Json(AgentRegisterResponse { agent_id })
}

// Recibe reportes y devuelve lo que haya en cola para el host
async fn agent_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<AgentHeartbeatRequest>,
) -> Result<Json<AgentHeartbeatResponse>, ApiError> {
    {
        let mut agents = state.agents.lock();
        let Some(meta) = agents.get_mut(&req.hostname) else {
            return Err((
                StatusCode::NOT_FOUND,
                format!("agente {} no registrado", req.hostname),
            ));
        };
        meta.last_heartbeat = SystemTime::now();
        if meta.lost {
            info!("agente {} volvió a reportar", req.hostname);
            meta.lost = false;
        }
        meta.reports_received += req.reports.len() as u64;
    }

    state
        .manager
        .action_response(&req.hostname, &req.reports)
        .map_err(api_error)?;

    let commands = state.manager.queue().drain(&req.hostname);
    if !commands.is_empty() {
        info!("enviando {} comandos a {}", commands.len(), req.hostname);
        if let Some(meta) = state.agents.lock().get_mut(&req.hostname) {
            meta.commands_dispatched += commands.len() as u64;
        }
    }

    Ok(Json(AgentHeartbeatResponse { commands }))
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    let now = SystemTime::now();
    let agents = state.agents.lock();
    let mut list: Vec<AgentInfo> = agents
        .iter()
        .map(|(hostname, meta)| meta.info(hostname, now))
        .collect();
    list.sort_by(|a, b| a.hostname.cmp(&b.hostname));
    Json(list)
}

/* ---------------- requests ---------------- */

// Compila el pack contra la topología y persiste los stages
async fn submit_upgrade(
    State(state): State<AppState>,
    Json(req): Json<SubmitUpgradeRequest>,
) -> Result<Json<SubmitUpgradeResponse>, ApiError> {
    let ctx = UpgradeContext::new(&req.pack, req.topology, req.direction).map_err(api_error)?;
    let groups = create_sequence(&req.pack, &ctx).map_err(api_error)?;

    let cluster_name = if ctx.topology.cluster_name.is_empty() {
        state.config.cluster_name.clone()
    } else {
        ctx.topology.cluster_name.clone()
    };
    let factory = StageFactory::new(&cluster_name, &state.config.server_host);

    let request_id = state.manager.get_next_request_id();
    let stages = factory
        .create_stages(request_id, &groups, ctx.auto_skip_failures)
        .map_err(api_error)?;
    let stage_count = stages.len();

    if stage_count == 0 {
        warn!("el pack {} no generó stages para {}", req.pack.name, cluster_name);
    } else {
        state.manager.send_actions(stages).map_err(api_error)?;
    }

    info!(
        "request {}: {} {} con {} stages en {} grupos",
        request_id,
        ctx.direction.text(false),
        ctx.version,
        stage_count,
        groups.len()
    );

    Ok(Json(SubmitUpgradeResponse {
        request_id,
        stage_count,
        groups: groups.into_iter().map(|g| g.name).collect(),
    }))
}

async fn list_requests(State(state): State<AppState>) -> Result<Json<Vec<Request>>, ApiError> {
    let ids = state.manager.get_requests().map_err(api_error)?;
    let mut requests = Vec::with_capacity(ids.len());
    for id in ids {
        requests.push(state.manager.get_request(id).map_err(api_error)?);
    }
    Ok(Json(requests))
}

async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<RequestStatusSummary>, ApiError> {
    state
        .manager
        .get_request_status(id)
        .map(Json)
        .map_err(api_error)
}

async fn get_request_stages(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<Vec<Stage>>, ApiError> {
    let stages = state.manager.get_request_stages(id).map_err(api_error)?;
    if stages.is_empty() {
        return Err(api_error(Error::RequestNotFound(id)));
    }
    Ok(Json(stages))
}

async fn abort_request(
    State(state): State<AppState>,
    Path(id): Path<RequestId>,
) -> Result<Json<AbortResponse>, ApiError> {
    state.manager.abort_request(id).map_err(api_error)?;
    Ok(Json(AbortResponse {
        request_id: id,
        aborted: true,
    }))
}

// El operador da por hecho un stage MANUAL
async fn confirm_manual_stage(
    State(state): State<AppState>,
    Path((id, stage_id)): Path<(RequestId, StageId)>,
) -> Result<Json<Stage>, ApiError> {
    let host = state.config.server_host.clone();
    let stage = state
        .manager
        .get_action(id, stage_id)
        .map_err(api_error)?
        .ok_or_else(|| api_error(Error::StageNotFound { request_id: id, stage_id }))?;

    let Some(cmd) = stage.host_action(&host).and_then(|a| a.command("MANUAL")) else {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("el stage {}-{} no es una confirmación manual", id, stage_id),
        ));
    };
    if cmd.status.is_terminal() {
        return Err((
            StatusCode::CONFLICT,
            format!("el stage {}-{} ya terminó ({})", id, stage_id, cmd.status),
        ));
    }

    let report = CommandReport {
        action_id: action_id(id, stage_id),
        role: "MANUAL".to_string(),
        status: HostRoleStatus::Completed.as_str().to_string(),
        exit_code: 0,
        stdout: "confirmado por el operador".to_string(),
        stderr: String::new(),
    };
    state
        .manager
        .action_response(&host, &[report])
        .map_err(api_error)?;
    info!("stage {}-{} confirmado", id, stage_id);

    let updated = state
        .manager
        .get_action(id, stage_id)
        .map_err(api_error)?
        .ok_or_else(|| api_error(Error::StageNotFound { request_id: id, stage_id }))?;
    Ok(Json(updated))
}
