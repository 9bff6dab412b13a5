//! Core error types for reconciliation.
//!
//! Every variant carries enough context (resource kind, name or ID, attempted
//! operation) to be actionable without a backtrace.

use thiserror::Error;

use crate::resource::{Call, Operation, ResourceKind};

/// Core error type for cumulus operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Lookup outcomes
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("found {count} {kind} resources matching '{name}', refusing to pick one")]
    Ambiguous {
        kind: ResourceKind,
        name: String,
        count: usize,
    },

    // Remote call failures
    #[error("conflict during {operation} {kind} '{name}': {reason}")]
    Conflict {
        kind: ResourceKind,
        name: String,
        operation: Operation,
        reason: String,
    },

    #[error("{operation} {kind} '{target}' failed: {reason}")]
    Transport {
        kind: ResourceKind,
        operation: Operation,
        target: String,
        reason: String,
    },

    #[error(
        "{operation} {kind} '{target}' did not converge after {attempts} attempts{}",
        last_error_suffix(.last_error)
    )]
    ConvergenceTimeout {
        kind: ResourceKind,
        operation: Operation,
        target: String,
        attempts: u32,
        last_error: Option<String>,
    },

    // Plan validation
    #[error("cannot change field '{field}' of {kind} '{name}'")]
    CannotChangeField {
        kind: ResourceKind,
        name: String,
        field: &'static str,
    },

    #[error("field '{field}' is required for {kind}")]
    RequiredField {
        kind: ResourceKind,
        field: &'static str,
    },

    #[error("rendering {kind} '{name}' failed: {reason}")]
    Render {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    // Task graph
    #[error("dependency cycle detected between tasks: {}", .tasks.join(", "))]
    DependencyCycle { tasks: Vec<String> },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    DependencyMissing { task: String, dependency: String },

    #[error("task '{task}' blocked by failed dependency '{dependency}'")]
    Blocked { task: String, dependency: String },

    // Generic errors
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid record: {reason}")]
    InvalidRecord { reason: String },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

impl Error {
    /// Create a not-found error.
    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an ambiguous-match error.
    pub fn ambiguous(kind: ResourceKind, name: impl Into<String>, count: usize) -> Self {
        Self::Ambiguous {
            kind,
            name: name.into(),
            count,
        }
    }

    /// Create a conflict error for the given call.
    pub fn conflict(call: &Call, reason: impl Into<String>) -> Self {
        Self::Conflict {
            kind: call.kind,
            name: call.target.clone(),
            operation: call.operation,
            reason: reason.into(),
        }
    }

    /// Create a transport error for the given call.
    pub fn transport(call: &Call, reason: impl Into<String>) -> Self {
        Self::Transport {
            kind: call.kind,
            operation: call.operation,
            target: call.target.clone(),
            reason: reason.into(),
        }
    }

    /// Create a convergence timeout for the given call.
    pub fn convergence_timeout(call: &Call, attempts: u32, last_error: Option<String>) -> Self {
        Self::ConvergenceTimeout {
            kind: call.kind,
            operation: call.operation,
            target: call.target.clone(),
            attempts,
            last_error,
        }
    }

    /// Create an immutable-field violation.
    pub fn cannot_change_field(
        kind: ResourceKind,
        name: impl Into<String>,
        field: &'static str,
    ) -> Self {
        Self::CannotChangeField {
            kind,
            name: name.into(),
            field,
        }
    }

    /// Create a missing required field error.
    pub const fn required_field(kind: ResourceKind, field: &'static str) -> Self {
        Self::RequiredField { kind, field }
    }

    /// Create a render error.
    pub fn render(kind: ResourceKind, name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Render {
            kind,
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create an invalid record error.
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }

    /// Whether the retrying executor may try the call again.
    ///
    /// Only transport failures are transient; everything else is a decision
    /// the cloud (or the plan) has already made.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    #[must_use]
    pub const fn is_convergence_timeout(&self) -> bool {
        matches!(self, Self::ConvergenceTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let call = Call::create(ResourceKind::Instance, "nodes-a1b2c3");
        let err = Error::transport(&call, "503 service unavailable");
        let msg = err.to_string();
        assert!(msg.contains("create"));
        assert!(msg.contains("instance"));
        assert!(msg.contains("nodes-a1b2c3"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_convergence_timeout_mentions_last_error() {
        let call = Call::get(ResourceKind::FloatingIp, "fip-1");
        let err = Error::convergence_timeout(&call, 3, Some("no address yet".into()));
        assert!(err.to_string().contains("after 3 attempts"));
        assert!(err.to_string().contains("no address yet"));

        let bare = Error::convergence_timeout(&call, 3, None);
        assert!(!bare.to_string().contains("last error"));
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        let call = Call::get(ResourceKind::Port, "port-1");
        assert!(Error::transport(&call, "reset").is_retryable());
        assert!(!Error::conflict(&call, "in use").is_retryable());
        assert!(!Error::not_found(ResourceKind::Port, "port-1").is_retryable());
        assert!(!Error::ambiguous(ResourceKind::Port, "port-1", 2).is_retryable());
    }

    #[test]
    fn test_dependency_cycle_lists_tasks() {
        let err = Error::DependencyCycle {
            tasks: vec!["instance/a".into(), "port/a".into()],
        };
        assert!(err.to_string().contains("instance/a, port/a"));
    }
}
