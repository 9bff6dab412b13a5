//! Resource kinds and remote operations, used to give every error and log
//! line the context of what was being attempted against which resource.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of cloud resource a task or facade call operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Instance,
    Port,
    FloatingIp,
    ServerGroup,
    LoadBalancer,
    LbPool,
    LbListener,
    PoolAssociation,
    PoolMember,
    Image,
    Flavor,
    Network,
    Subnet,
    Tag,
}

impl ResourceKind {
    /// Human-readable name used in error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Port => "port",
            Self::FloatingIp => "floating IP",
            Self::ServerGroup => "server group",
            Self::LoadBalancer => "load balancer",
            Self::LbPool => "pool",
            Self::LbListener => "listener",
            Self::PoolAssociation => "pool association",
            Self::PoolMember => "pool member",
            Self::Image => "image",
            Self::Flavor => "flavor",
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verb of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Get,
    List,
    Create,
    Update,
    Delete,
    Tag,
    Poll,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Tag => "tag",
            Self::Poll => "poll",
        };
        f.write_str(verb)
    }
}

/// Describes one remote call: which operation, on which kind of resource,
/// against which name or ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: ResourceKind,
    pub operation: Operation,
    pub target: String,
}

impl Call {
    pub fn new(kind: ResourceKind, operation: Operation, target: impl Into<String>) -> Self {
        Self {
            kind,
            operation,
            target: target.into(),
        }
    }

    pub fn get(kind: ResourceKind, target: impl Into<String>) -> Self {
        Self::new(kind, Operation::Get, target)
    }

    pub fn list(kind: ResourceKind, target: impl Into<String>) -> Self {
        Self::new(kind, Operation::List, target)
    }

    pub fn create(kind: ResourceKind, target: impl Into<String>) -> Self {
        Self::new(kind, Operation::Create, target)
    }

    pub fn update(kind: ResourceKind, target: impl Into<String>) -> Self {
        Self::new(kind, Operation::Update, target)
    }

    pub fn delete(kind: ResourceKind, target: impl Into<String>) -> Self {
        Self::new(kind, Operation::Delete, target)
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} '{}'", self.operation, self.kind, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_display_names_operation_kind_and_target() {
        let call = Call::create(ResourceKind::FloatingIp, "fip-bastion-1");
        assert_eq!(call.to_string(), "create floating IP 'fip-bastion-1'");
    }
}
