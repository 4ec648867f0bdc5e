//! Configuration management

use crate::error::{ErrorContext, TenantryError, TenantryResult};
use crate::logging::LoggingConfig;
use crate::types::{GroupId, UserId};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level kernel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TenantryConfig {
    pub reserved: ReservedConfig,
    pub policy: PolicyConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Ids and names of the installation's reserved groups and root user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReservedConfig {
    pub system_group_id: i64,
    pub system_group_name: String,
    pub user_group_id: i64,
    pub user_group_name: String,
    pub root_user_id: i64,
    pub root_user_name: String,
}

impl Default for ReservedConfig {
    fn default() -> Self {
        Self {
            system_group_id: 0,
            system_group_name: "system".to_string(),
            user_group_id: 1,
            user_group_name: "user".to_string(),
            root_user_id: 0,
            root_user_name: "root".to_string(),
        }
    }
}

impl ReservedConfig {
    pub fn system_group(&self) -> GroupId {
        GroupId(self.system_group_id)
    }

    pub fn user_group(&self) -> GroupId {
        GroupId(self.user_group_id)
    }

    pub fn root_user(&self) -> UserId {
        UserId(self.root_user_id)
    }
}

/// How administrator links into a private group are handled.
///
/// Such writes risk producing graphs that mix owners inside a group whose
/// members cannot see each other's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdminPrivateGroupWrites {
    #[default]
    Deny,
    /// Allow, and record the write on the audit log
    AllowWithAudit,
    /// Allow, and make the target's owner the owner of the new link
    AllowWithOwnershipTransfer,
}

impl std::fmt::Display for AdminPrivateGroupWrites {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminPrivateGroupWrites::Deny => write!(f, "deny"),
            AdminPrivateGroupWrites::AllowWithAudit => write!(f, "allow_with_audit"),
            AdminPrivateGroupWrites::AllowWithOwnershipTransfer => {
                write!(f, "allow_with_ownership_transfer")
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PolicyConfig {
    pub admin_private_group_writes: AdminPrivateGroupWrites,
    /// Lets a non-administrator owner step down from ownership on their own
    pub allow_owner_self_demotion: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle timeout of regular sessions
    pub idle_timeout_secs: u64,
    /// Idle timeout of sessions created through sudo
    pub sudo_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            sudo_timeout_secs: 600,
        }
    }
}

impl TenantryConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TenantryResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TenantryError::Config {
            message: format!("Failed to read config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("read_file"),
        })?;

        let config: TenantryConfig = toml::from_str(&content).map_err(|e| TenantryError::Config {
            message: format!("Failed to parse config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("parse_toml"),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> TenantryResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| TenantryError::Config {
            message: format!("Failed to serialize config: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("serialize_toml"),
        })?;

        std::fs::write(path, content).map_err(|e| TenantryError::Config {
            message: format!("Failed to write config file: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("config").with_operation("write_file"),
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> TenantryResult<()> {
        let reserved = &self.reserved;
        if reserved.system_group_id == reserved.user_group_id {
            return Err(invalid("reserved.user_group_id must differ from reserved.system_group_id"));
        }

        // -1 is the wire sentinel for the wildcard contexts
        if reserved.system_group_id < 0 || reserved.user_group_id < 0 || reserved.root_user_id < 0 {
            return Err(invalid("reserved ids must be non-negative"));
        }

        if reserved.system_group_name.trim().is_empty()
            || reserved.user_group_name.trim().is_empty()
            || reserved.root_user_name.trim().is_empty()
        {
            return Err(invalid("reserved names must not be empty"));
        }

        if self.session.idle_timeout_secs == 0 || self.session.sudo_timeout_secs == 0 {
            return Err(invalid("session timeouts must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> TenantryError {
    TenantryError::Config {
        message: message.to_string(),
        source: None,
        context: ErrorContext::new("config").with_operation("validate"),
    }
}
