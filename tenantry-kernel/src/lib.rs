//! Tenantry Kernel - Group-scoped authorization for a shared object graph
//!
//! The kernel decides who may read, link, edit and delete objects that belong
//! to users and groups, and keeps the object graph consistent with that
//! decision:
//!
//! - [`AccessDecisionEngine`]: pure access decisions from permission bits,
//!   roles and the active context group
//! - [`GraphConsistencyEnforcer`]: no edge crosses a group boundary, and
//!   group moves (chgrp) are atomic
//! - [`GroupLifecycleManager`]: groups, experimenters, memberships and
//!   permission cascades
//! - [`SessionManager`]: login, context switching and sudo
//! - [`ObjectService`]: the data-plane entry point tying the above together
//!
//! ## Architecture
//!
//! Persistence and credential checks stay outside the kernel behind the
//! [`ObjectStore`] and [`CredentialVerifier`] traits from `tenantry-core`.
//! [`Kernel`] wires the components from a [`TenantryConfig`].

pub mod context;
pub mod credentials;
pub mod engine;
pub mod graph;
pub mod lifecycle;
pub mod objects;
pub mod principal;
pub mod registry;
pub mod session;
pub mod store;

pub use context::{ContextGroup, SecurityContext, SessionId};
pub use credentials::StaticCredentials;
pub use engine::{AccessDecisionEngine, Decision};
pub use graph::{CopiedAnnotation, GraphConsistencyEnforcer, MovePolicy, MoveReport};
pub use lifecycle::{GroupLifecycleManager, NewExperimenter, NewGroup, PermissionChange};
pub use objects::ObjectService;
pub use principal::Principal;
pub use registry::{Experimenter, Group, GroupRegistry, RegistryState, ReservedGroups};
pub use session::{SessionInfo, SessionManager};
pub use store::MemoryObjectStore;

pub use tenantry_core;
pub use tokio_util::sync::CancellationToken;

use std::sync::Arc;
use tenantry_core::{
    not_found_error, CredentialVerifier, ObjectRef, ObjectStore, Right, TenantryConfig,
    TenantryResult,
};
use tracing::info;

/// A fully wired kernel
pub struct Kernel {
    config: TenantryConfig,
    registry: Arc<GroupRegistry>,
    store: Arc<dyn ObjectStore>,
    engine: AccessDecisionEngine,
    graph: Arc<GraphConsistencyEnforcer>,
    lifecycle: GroupLifecycleManager,
    objects: ObjectService,
    sessions: Arc<SessionManager>,
}

/// Builder for [`Kernel`] to swap in external collaborators
pub struct KernelBuilder {
    config: TenantryConfig,
    store: Option<Arc<dyn ObjectStore>>,
    credentials: Option<Arc<dyn CredentialVerifier>>,
}

impl KernelBuilder {
    pub fn new(config: TenantryConfig) -> Self {
        Self {
            config,
            store: None,
            credentials: None,
        }
    }

    /// Use an external object store instead of [`MemoryObjectStore`]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an external credential verifier instead of an empty
    /// [`StaticCredentials`]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialVerifier>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn build(self) -> TenantryResult<Kernel> {
        self.config.validate()?;

        let registry = Arc::new(GroupRegistry::new(&self.config.reserved));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryObjectStore::new()));
        let credentials = self
            .credentials
            .unwrap_or_else(|| Arc::new(StaticCredentials::new()));

        let engine = AccessDecisionEngine::new(
            registry.reserved(),
            self.config.policy.admin_private_group_writes,
        );
        let sessions = Arc::new(SessionManager::new(
            registry.clone(),
            credentials,
            self.config.session.clone(),
        ));
        let graph = Arc::new(GraphConsistencyEnforcer::new(store.clone(), registry.clone()));
        let lifecycle =
            GroupLifecycleManager::new(registry.clone(), store.clone(), self.config.policy.clone())
                .with_sessions(sessions.clone());
        let objects = ObjectService::new(
            registry.clone(),
            store.clone(),
            engine,
            graph.clone(),
            sessions.clone(),
        );

        info!(
            system = %registry.reserved().system,
            user = %registry.reserved().user,
            admin_private_group_writes = %self.config.policy.admin_private_group_writes,
            "Kernel initialized"
        );

        Ok(Kernel {
            config: self.config,
            registry,
            store,
            engine,
            graph,
            lifecycle,
            objects,
            sessions,
        })
    }
}

impl Kernel {
    /// Build a kernel with the in-memory store and no credentials
    pub fn new(config: TenantryConfig) -> TenantryResult<Self> {
        KernelBuilder::new(config).build()
    }

    pub fn builder(config: TenantryConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    pub fn config(&self) -> &TenantryConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn engine(&self) -> &AccessDecisionEngine {
        &self.engine
    }

    pub fn graph(&self) -> &GraphConsistencyEnforcer {
        &self.graph
    }

    pub fn lifecycle(&self) -> &GroupLifecycleManager {
        &self.lifecycle
    }

    pub fn objects(&self) -> &ObjectService {
        &self.objects
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Context of the root administrator working in the system group.
    ///
    /// For bootstrapping and tooling that runs without a login. It is bound
    /// to the session manager's bootstrap session.
    pub fn root_context(&self) -> SecurityContext {
        SecurityContext::new(
            self.registry.root(),
            ContextGroup::Group(self.registry.reserved().system),
            self.sessions.bootstrap_session(),
        )
    }

    /// Resolve the principal behind a context
    pub async fn principal(&self, context: &SecurityContext) -> TenantryResult<Principal> {
        self.registry.principal(context.user).await
    }

    /// Authorize `right` on an existing object
    pub async fn authorize(
        &self,
        context: &SecurityContext,
        reference: &ObjectRef,
        right: Right,
    ) -> TenantryResult<Decision> {
        self.sessions.validate(context).await?;
        let principal = self.principal(context).await?;
        let object = self
            .store
            .object(reference)
            .await?
            .ok_or_else(|| not_found_error!(reference, "kernel"))?;
        Ok(self.engine.authorize(&principal, context, &object.details, right))
    }
}
