//! In-memory credential verifier

use async_trait::async_trait;
use std::collections::HashMap;
use tenantry_core::{CredentialVerifier, TenantryResult};

/// Username/password pairs held in memory, for tests and small deployments
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    passwords: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.passwords.insert(username.into(), password.into());
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.add_user(username, password);
        self
    }
}

#[async_trait]
impl CredentialVerifier for StaticCredentials {
    async fn verify(&self, username: &str, password: &str) -> TenantryResult<bool> {
        Ok(self
            .passwords
            .get(username)
            .is_some_and(|expected| expected == password))
    }
}
