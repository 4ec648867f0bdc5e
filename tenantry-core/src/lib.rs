//! Tenantry Core - Permission primitives and collaborator contracts
//!
//! This crate defines the value types shared by the whole kernel (ids,
//! [`Permission`], [`Details`], rights and roles), the violation taxonomy,
//! configuration, logging setup, and the traits through which the kernel
//! reaches its external collaborators (object store, credential checks).

pub mod config;
pub mod error;
pub mod logging;
pub mod permission;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use permission::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tracing;
