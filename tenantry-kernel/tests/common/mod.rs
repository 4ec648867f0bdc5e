//! Shared fixture for kernel integration tests
//!
//! Builds a kernel with the in-memory store and provides helpers for setting
//! up groups, experimenters and contexts.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use tenantry_kernel::tenantry_core::{GroupId, ObjectStore, Permission, TenantryConfig, UserId};
use tenantry_kernel::{
    ContextGroup, Kernel, KernelBuilder, NewExperimenter, NewGroup, SecurityContext, StaticCredentials,
};

static INIT: Once = Once::new();

/// Initialize logging for tests
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("tenantry_kernel=debug,audit=info")
            .with_test_writer()
            .try_init();
    });
}

pub const PASSWORD: &str = "secret";

pub struct Fixture {
    pub kernel: Kernel,
    pub root: SecurityContext,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(TenantryConfig::default())
    }

    /// Every experimenter created through [`Fixture::user`] logs in with
    /// [`PASSWORD`]
    pub fn with_config(config: TenantryConfig) -> Self {
        Self::build(Kernel::builder(config))
    }

    /// Fixture over a caller-provided store
    pub fn with_store(store: Arc<dyn ObjectStore>) -> Self {
        Self::build(Kernel::builder(TenantryConfig::default()).with_store(store))
    }

    fn build(builder: KernelBuilder) -> Self {
        init_logging();
        let mut credentials = StaticCredentials::new().with_user("root", PASSWORD);
        for name in ["ana", "ben", "cleo", "dev"] {
            credentials.add_user(name, PASSWORD);
        }

        let kernel = builder
            .with_credentials(Arc::new(credentials))
            .build()
            .expect("kernel builds from a valid config");
        let root = kernel.root_context();
        Self { kernel, root }
    }

    pub async fn group(&self, name: &str, permission: Permission) -> GroupId {
        self.kernel
            .lifecycle()
            .create_group(&self.root, NewGroup::new(name, permission))
            .await
            .expect("group created")
    }

    pub async fn user(&self, name: &str, group: GroupId) -> UserId {
        self.kernel
            .lifecycle()
            .create_experimenter(&self.root, NewExperimenter::new(name), group)
            .await
            .expect("experimenter created")
    }

    pub async fn join(&self, user: UserId, group: GroupId) {
        self.kernel
            .lifecycle()
            .add_groups(&self.root, user, &[group])
            .await
            .expect("membership added");
    }

    /// Log `user` in and address `group` from the new session.
    ///
    /// The group is not checked against the user's memberships, so tests can
    /// exercise refusals from groups the user does not belong to.
    pub async fn context(&self, user: UserId, group: GroupId) -> SecurityContext {
        let principal = self
            .kernel
            .registry()
            .principal(user)
            .await
            .expect("experimenter exists");
        let login = self
            .kernel
            .sessions()
            .login(&principal.username, PASSWORD)
            .await
            .expect("fixture users log in");
        SecurityContext::new(user, ContextGroup::Group(group), login.session)
    }
}
