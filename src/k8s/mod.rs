mod drain;
pub mod resources;

pub use drain::{DrainOptions, NodeGroupDrainer, PodDeleteStatus, pod_delete_status};
pub use resources::{EvictError, NodeInfo, PodInfo, ServiceInfo};
