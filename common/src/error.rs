use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// El id de un stage se asigna una sola vez.
    #[error("el stage ya tiene id {current}, no se puede reasignar a {requested}")]
    StageIdAlreadySet { current: i64, requested: i64 },

    #[error("stage sin id asignado (request {request_id})")]
    StageIdMissing { request_id: i64 },

    #[error("el stage {stage_id} del request {request_id} ya existe")]
    DuplicateStage { request_id: i64, stage_id: i64 },

    #[error("request {0} no encontrado")]
    RequestNotFound(i64),

    #[error("stage {stage_id} del request {request_id} no encontrado")]
    StageNotFound { request_id: i64, stage_id: i64 },

    #[error("comando {role} en {host} (request {request_id}, stage {stage_id}) no encontrado")]
    CommandNotFound {
        host: String,
        request_id: i64,
        stage_id: i64,
        role: String,
    },

    #[error("action id inválido: {0:?} (se espera \"<requestId>-<stageId>\")")]
    InvalidActionId(String),

    #[error("estado de comando inválido: {0:?}")]
    InvalidStatus(String),

    #[error("upgrade pack inválido: {0}")]
    InvalidUpgradePack(String),

    #[error("no se pudieron resolver hosts para {service}/{component}: {reason}")]
    UnresolvableHosts {
        service: String,
        component: String,
        reason: String,
    },

    #[error("batch inválido: {0}")]
    InvalidBatch(String),

    #[error("error de almacenamiento: {0}")]
    Storage(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}
