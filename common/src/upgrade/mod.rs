//! Compilador de planes de upgrade.
//!
//! Un [`UpgradePack`] describe grupos ordenados y las tareas de cada
//! componente. Contra una [`ClusterTopology`] y una [`Direction`] se compila
//! en una secuencia de [`UpgradeGroupHolder`] con sus [`StageWrapper`], y
//! [`StageFactory`] la convierte en los `Stage` que ejecuta el scheduler.

pub mod batch;
pub mod builder;
pub mod context;
pub mod grouping;
pub mod sequence;
pub mod stages;
pub mod task;
pub mod wrapper;

pub use batch::Batch;
pub use builder::{build_grouping, ColocatedBuilder, DefaultBuilder, StageWrapperBuilder};
pub use context::{ClusterTopology, Direction, HostsType, ServiceTopology, UpgradeContext, UpgradeType};
pub use grouping::{Grouping, ProcessingComponent, UpgradePack};
pub use sequence::{create_sequence, token_replace, UpgradeGroupHolder};
pub use stages::StageFactory;
pub use task::{ExecuteHostType, Task, TaskType};
pub use wrapper::{StageWrapper, StageWrapperType, TaskWrapper};
