//! Unified error handling system
//!
//! Provides the violation taxonomy of the kernel as structured error types with
//! context for operators and proper error chaining

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

pub type TenantryResult<T> = Result<T, TenantryError>;

/// Error context providing additional information for auditing and debugging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique error ID for tracking
    pub error_id: String,
    /// Timestamp when error occurred
    pub timestamp: DateTime<Utc>,
    /// Component where error originated
    pub component: String,
    /// Operation being performed when error occurred
    pub operation: Option<String>,
    /// Additional metadata
    pub metadata: std::collections::HashMap<String, String>,
}

impl ErrorContext {
    pub fn new(component: &str) -> Self {
        Self {
            error_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component: component.to_string(),
            operation: None,
            metadata: std::collections::HashMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// The kind of violation carried by a denied decision.
///
/// Every variant maps onto one of the security variants of [`TenantryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationKind {
    /// Generic denial.
    Security,
    /// Denial rooted in a role or group mismatch.
    GroupSecurity,
    /// Attempt to grant broader visibility than the group ceiling allows.
    PermissionMismatch,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::Security => write!(f, "SecurityViolation"),
            ViolationKind::GroupSecurity => write!(f, "GroupSecurityViolation"),
            ViolationKind::PermissionMismatch => {
                write!(f, "PermissionMismatchGroupSecurityViolation")
            }
        }
    }
}

/// Main error type for the Tenantry kernel
#[derive(Error, Debug)]
pub enum TenantryError {
    #[error("Security violation: {message}")]
    SecurityViolation {
        message: String,
        context: ErrorContext,
    },

    #[error("Group security violation: {message}")]
    GroupSecurityViolation {
        message: String,
        context: ErrorContext,
    },

    #[error("Permission mismatch group security violation: {message}")]
    PermissionMismatch {
        message: String,
        context: ErrorContext,
    },

    #[error("Invalid permission: {message}")]
    InvalidPermission { message: String, input: String },

    #[error("Graph inconsistency: {message}")]
    GraphInconsistency {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    #[error("Resource not found: {resource}")]
    NotFound {
        resource: String,
        context: ErrorContext,
    },

    #[error("Store conflict: expected version {expected}, found {actual}")]
    StoreConflict {
        expected: u64,
        actual: u64,
        context: ErrorContext,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
        context: ErrorContext,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TenantryError {
    /// Build the typed error matching a denied decision
    pub fn from_violation(kind: ViolationKind, message: impl Into<String>, component: &str) -> Self {
        let message = message.into();
        let context = ErrorContext::new(component);
        match kind {
            ViolationKind::Security => TenantryError::SecurityViolation { message, context },
            ViolationKind::GroupSecurity => {
                TenantryError::GroupSecurityViolation { message, context }
            }
            ViolationKind::PermissionMismatch => {
                TenantryError::PermissionMismatch { message, context }
            }
        }
    }

    /// Get the error context
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            TenantryError::SecurityViolation { context, .. } => Some(context),
            TenantryError::GroupSecurityViolation { context, .. } => Some(context),
            TenantryError::PermissionMismatch { context, .. } => Some(context),
            TenantryError::GraphInconsistency { context, .. } => Some(context),
            TenantryError::Validation { context, .. } => Some(context),
            TenantryError::NotFound { context, .. } => Some(context),
            TenantryError::StoreConflict { context, .. } => Some(context),
            TenantryError::Config { context, .. } => Some(context),
            _ => None,
        }
    }

    /// The violation kind, if this error is one of the security denials
    pub fn violation(&self) -> Option<ViolationKind> {
        match self {
            TenantryError::SecurityViolation { .. } => Some(ViolationKind::Security),
            TenantryError::GroupSecurityViolation { .. } => Some(ViolationKind::GroupSecurity),
            TenantryError::PermissionMismatch { .. } => Some(ViolationKind::PermissionMismatch),
            _ => None,
        }
    }

    /// Whether the error is any kind of security violation.
    ///
    /// `GroupSecurityViolation` and `PermissionMismatch` specialise the generic
    /// violation, so they count as well.
    pub fn is_security_violation(&self) -> bool {
        self.violation().is_some()
    }

    /// Check if error is recoverable.
    ///
    /// The kernel never retries. Only a store conflict may be worth a fresh
    /// attempt by the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TenantryError::StoreConflict { .. })
    }

    /// Fatal errors signal a broken store invariant and need an operator
    pub fn is_fatal(&self) -> bool {
        matches!(self, TenantryError::GraphInconsistency { .. })
    }

    /// Log the error with appropriate level
    pub fn log(&self) {
        match self {
            TenantryError::GraphInconsistency { .. } => {
                error!(
                    target: "audit",
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Graph inconsistency detected, operator investigation required"
                );
            }
            TenantryError::SecurityViolation { .. }
            | TenantryError::GroupSecurityViolation { .. }
            | TenantryError::PermissionMismatch { .. } => {
                warn!(
                    target: "audit",
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Access denied"
                );
            }
            TenantryError::StoreConflict { .. } | TenantryError::Cancelled { .. } => {
                warn!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Operation aborted without changes"
                );
            }
            _ => {
                error!(
                    error_id = ?self.context().map(|c| &c.error_id),
                    error = %self,
                    "Error occurred"
                );
            }
        }
    }
}

/// Convenience macros for creating errors with context
#[macro_export]
macro_rules! security_violation {
    ($msg:expr, $component:expr) => {
        $crate::TenantryError::SecurityViolation {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! group_violation {
    ($msg:expr, $component:expr) => {
        $crate::TenantryError::GroupSecurityViolation {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! permission_mismatch {
    ($msg:expr, $component:expr) => {
        $crate::TenantryError::PermissionMismatch {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! graph_inconsistency {
    ($msg:expr, $component:expr) => {
        $crate::TenantryError::GraphInconsistency {
            message: $msg.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! validation_error {
    ($msg:expr, $field:expr, $component:expr) => {
        $crate::TenantryError::Validation {
            message: $msg.to_string(),
            field: Some($field.to_string()),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[macro_export]
macro_rules! not_found_error {
    ($resource:expr, $component:expr) => {
        $crate::TenantryError::NotFound {
            resource: $resource.to_string(),
            context: $crate::ErrorContext::new($component),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_kind_round_trips_through_error() {
        for kind in [
            ViolationKind::Security,
            ViolationKind::GroupSecurity,
            ViolationKind::PermissionMismatch,
        ] {
            let err = TenantryError::from_violation(kind, "denied", "test");
            assert_eq!(err.violation(), Some(kind));
            assert!(err.is_security_violation());
            assert!(!err.is_recoverable());
        }
    }

    #[test]
    fn graph_inconsistency_is_fatal() {
        let err = graph_inconsistency!("pixels split from image", "test");
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());
        assert!(err.violation().is_none());
        err.log();
    }

    #[test]
    fn store_conflict_is_the_only_recoverable_error() {
        let err = TenantryError::StoreConflict {
            expected: 3,
            actual: 4,
            context: ErrorContext::new("test"),
        };
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("expected version 3"));
    }
}
