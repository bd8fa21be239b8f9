pub mod accessor;
pub mod agent;
pub mod error;
pub mod fsm;
pub mod manager;
pub mod queue;
pub mod request;
pub mod scheduler;
pub mod stage;
pub mod status;
pub mod upgrade;

pub use accessor::{ActionDbAccessor, InMemoryActionDb};
pub use agent::{
    AbortResponse, AgentHeartbeatRequest, AgentHeartbeatResponse, AgentId, AgentInfo,
    AgentRegisterRequest, AgentRegisterResponse,
};
pub use error::{Error, Result};
pub use fsm::{ClusterFsm, LoggingFsm, ServiceComponentHostEvent};
pub use manager::ActionManager;
pub use queue::ActionQueue;
pub use request::{
    action_id, parse_action_id, CommandReport, Request, RequestStatusSummary,
    SubmitUpgradeRequest, SubmitUpgradeResponse,
};
pub use scheduler::{ActionScheduler, SchedulerConfig};
pub use stage::{
    ExecutionCommand, HostAction, HostRoleCommand, RequestId, RoleCommand, RoleCommandPayload,
    Stage, StageId, TaskId,
};
pub use status::HostRoleStatus;
