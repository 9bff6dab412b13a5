//! One [`ResourceTask`](crate::task::ResourceTask) per resource kind.

pub mod floating_ip;
pub mod instance;
pub mod listener;
pub mod loadbalancer;
pub mod pool;
pub mod pool_association;
pub mod port;
pub mod server_group;

pub use floating_ip::FloatingIp;
pub use instance::Instance;
pub use listener::LbListener;
pub use loadbalancer::LoadBalancer;
pub use pool::LbPool;
pub use pool_association::PoolAssociation;
pub use port::Port;
pub use server_group::ServerGroup;
