use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::batch::Batch;
use super::context::{Direction, UpgradeType};
use super::task::{Task, TaskType};

fn default_true() -> bool {
    true
}

/// Descripción declarativa de un upgrade. Se lee, nunca se modifica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradePack {
    pub name: String,
    #[serde(default)]
    pub target_version: Option<String>,
    #[serde(default, rename = "type")]
    pub upgrade_type: UpgradeType,
    /// Habilita auto-skip en los grupos que lo soportan.
    #[serde(default)]
    pub skip_failures: bool,
    #[serde(default)]
    pub groups: Vec<Grouping>,
    /// servicio -> componente -> tareas
    #[serde(default)]
    pub processing: BTreeMap<String, BTreeMap<String, ProcessingComponent>>,
}

impl UpgradePack {
    /// En downgrade los grupos se recorren al revés.
    pub fn groups(&self, direction: Direction) -> Vec<&Grouping> {
        let mut groups: Vec<&Grouping> = self.groups.iter().collect();
        if direction.is_downgrade() {
            groups.reverse();
        }
        groups
    }

    pub fn processing_component(&self, service: &str, component: &str) -> Option<&ProcessingComponent> {
        self.processing.get(service)?.get(component)
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.processing.contains_key(service)
    }
}

/// Tareas de un componente: antes, durante y después de reiniciarlo.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessingComponent {
    #[serde(default)]
    pub pre_upgrade: Vec<Task>,
    #[serde(default)]
    pub pre_downgrade: Option<Vec<Task>>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub post_upgrade: Vec<Task>,
    #[serde(default)]
    pub post_downgrade: Option<Vec<Task>>,
}

impl ProcessingComponent {
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            ..Self::default()
        }
    }

    /// Sin lista de downgrade propia se usa la de upgrade.
    pub fn pre_tasks(&self, direction: Direction) -> &[Task] {
        match direction {
            Direction::Upgrade => &self.pre_upgrade,
            Direction::Downgrade => self.pre_downgrade.as_deref().unwrap_or(&self.pre_upgrade),
        }
    }

    pub fn post_tasks(&self, direction: Direction) -> &[Task] {
        match direction {
            Direction::Upgrade => &self.post_upgrade,
            Direction::Downgrade => self
                .post_downgrade
                .as_deref()
                .unwrap_or(&self.post_upgrade),
        }
    }
}

/* --------- Groupings --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingOptions {
    pub name: String,
    pub title: String,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default = "default_true")]
    pub allow_retry: bool,
    #[serde(default = "default_true")]
    pub supports_auto_skip_on_failure: bool,
}

impl GroupingOptions {
    pub fn new(name: &str, title: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            skippable: false,
            allow_retry: true,
            supports_auto_skip_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderService {
    pub service_name: String,
    #[serde(default)]
    pub components: Vec<String>,
}

impl OrderService {
    pub fn new(service_name: &str, components: &[&str]) -> Self {
        Self {
            service_name: service_name.to_string(),
            components: components.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Tope de hosts por stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParallelScheduler {
    pub max_degree_of_parallelism: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultGrouping {
    #[serde(flatten)]
    pub options: GroupingOptions,
    #[serde(default)]
    pub services: Vec<OrderService>,
    #[serde(default = "default_true")]
    pub service_check: bool,
    #[serde(default)]
    pub batch: Option<Batch>,
    #[serde(default)]
    pub parallel_scheduler: Option<ParallelScheduler>,
    /// En NON_ROLLING, la operación que aplica el grupo (stop/start/restart)
    /// cuando el pack no define tareas para el componente.
    #[serde(default)]
    pub function: Option<TaskType>,
}

impl DefaultGrouping {
    pub fn new(options: GroupingOptions, services: Vec<OrderService>) -> Self {
        Self {
            options,
            services,
            service_check: true,
            batch: None,
            parallel_scheduler: None,
            function: None,
        }
    }
}

/// Componentes que comparten hosts y se actualizan host por host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColocatedGrouping {
    #[serde(flatten)]
    pub options: GroupingOptions,
    #[serde(default)]
    pub services: Vec<OrderService>,
    #[serde(default = "default_true")]
    pub service_check: bool,
    /// Define el tamaño de la tanda inicial.
    pub batch: Batch,
    /// Mensaje de la confirmación entre tandas.
    #[serde(default)]
    pub batch_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteStage {
    pub title: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub component: Option<String>,
    /// Solo corre en esta dirección; sin valor, en ambas.
    #[serde(default)]
    pub direction: Option<Direction>,
    pub task: Task,
}

/// Pasos de alcance cluster: checkpoints, acciones de server, confirmaciones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGrouping {
    #[serde(flatten)]
    pub options: GroupingOptions,
    #[serde(default)]
    pub execute_stages: Vec<ExecuteStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCheckGrouping {
    #[serde(flatten)]
    pub options: GroupingOptions,
    #[serde(default)]
    pub priorities: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostOrderItem {
    Hosts { hosts: Vec<String> },
    ServiceChecks { services: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostOrderGrouping {
    #[serde(flatten)]
    pub options: GroupingOptions,
    #[serde(default)]
    pub items: Vec<HostOrderItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Grouping {
    Default(DefaultGrouping),
    Colocated(ColocatedGrouping),
    Cluster(ClusterGrouping),
    ServiceCheck(ServiceCheckGrouping),
    HostOrder(HostOrderGrouping),
}

impl Grouping {
    pub fn options(&self) -> &GroupingOptions {
        match self {
            Grouping::Default(g) => &g.options,
            Grouping::Colocated(g) => &g.options,
            Grouping::Cluster(g) => &g.options,
            Grouping::ServiceCheck(g) => &g.options,
            Grouping::HostOrder(g) => &g.options,
        }
    }

    pub fn name(&self) -> &str {
        &self.options().name
    }
}
