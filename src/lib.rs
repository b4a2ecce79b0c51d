pub mod config;
pub mod error;
pub mod identity;
pub mod liveness;
pub mod master;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use config::{MasterConfig, SelectionPolicy, TaskPlan};
pub use error::{ClusterError, Result};
pub use master::Master;
pub use registry::{Node, NodeRegistry, NodeStatus};
