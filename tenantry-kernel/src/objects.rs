//! Object service
//!
//! The data-plane entry point. Every call resolves the caller's principal
//! once, asks the [`AccessDecisionEngine`] before touching the store, and
//! routes new edges and group moves through the [`GraphConsistencyEnforcer`].
//!
//! Writes pin the store version before their first read and commit against
//! it, so a decision taken on one snapshot never lands on another.

use crate::context::{ContextGroup, SecurityContext};
use crate::engine::AccessDecisionEngine;
use crate::graph::{GraphConsistencyEnforcer, MovePolicy, MoveReport};
use crate::principal::Principal;
use crate::registry::GroupRegistry;
use crate::session::SessionManager;
use std::collections::BTreeSet;
use std::sync::Arc;
use tenantry_core::{
    group_violation, not_found_error, permission_mismatch, security_violation, validation_error,
    AdminPrivateGroupWrites, Details, GroupId, LinkId, LinkKind, Mutation, ObjectRef, ObjectStore,
    Permission, Right, StoredLink, StoredObject, TenantryError, TenantryResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

fn refuse<T>(err: TenantryError) -> TenantryResult<T> {
    err.log();
    Err(err)
}

pub struct ObjectService {
    registry: Arc<GroupRegistry>,
    store: Arc<dyn ObjectStore>,
    engine: AccessDecisionEngine,
    enforcer: Arc<GraphConsistencyEnforcer>,
    sessions: Arc<SessionManager>,
}

impl ObjectService {
    pub fn new(
        registry: Arc<GroupRegistry>,
        store: Arc<dyn ObjectStore>,
        engine: AccessDecisionEngine,
        enforcer: Arc<GraphConsistencyEnforcer>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self {
            registry,
            store,
            engine,
            enforcer,
            sessions,
        }
    }

    async fn principal(&self, context: &SecurityContext) -> TenantryResult<Principal> {
        self.sessions.validate(context).await?;
        self.registry.principal(context.user).await
    }

    async fn load(&self, reference: &ObjectRef) -> TenantryResult<StoredObject> {
        self.store
            .object(reference)
            .await?
            .ok_or_else(|| not_found_error!(reference, "objects"))
    }

    async fn commit(&self, version: u64, mutations: Vec<Mutation>) -> TenantryResult<u64> {
        match self.store.commit(version, mutations).await {
            Err(err @ TenantryError::StoreConflict { .. }) => refuse(err),
            result => result,
        }
    }

    /// Create an object in the context's group, inheriting the group's
    /// permission
    pub async fn create_object(
        &self,
        context: &SecurityContext,
        kind: &str,
        name: &str,
    ) -> TenantryResult<ObjectRef> {
        self.create_object_with_permission(context, kind, name, None)
            .await
    }

    /// Create an object, optionally overriding the inherited permission.
    ///
    /// Only administrators may override, and never beyond the group's own
    /// permission.
    pub async fn create_object_with_permission(
        &self,
        context: &SecurityContext,
        kind: &str,
        name: &str,
        permission: Option<Permission>,
    ) -> TenantryResult<ObjectRef> {
        let ContextGroup::Group(group) = context.group else {
            return Err(validation_error!(
                format!("objects are created in a concrete group, not {}", context.group),
                "context-group",
                "objects"
            ));
        };

        let version = self.store.version().await?;
        let principal = self.principal(context).await?;
        if !principal.is_administrator() && !principal.is_member_of(group) {
            return refuse(group_violation!(
                format!("{} is not a member of {}", principal, group),
                "objects"
            ));
        }

        let ceiling = self.registry.group(group).await?.permission;
        let permission = match permission {
            None => ceiling,
            Some(requested) if requested.identical(&ceiling) => ceiling,
            Some(requested) if !principal.is_administrator() => {
                return refuse(security_violation!(
                    format!("{} may not choose the permission {} for new data", principal, requested),
                    "objects"
                ));
            }
            Some(requested) if !requested.is_within(&ceiling) => {
                return refuse(permission_mismatch!(
                    format!("{} is broader than the {} permission of {}", requested, ceiling, group),
                    "objects"
                ));
            }
            Some(requested) => requested,
        };

        let reference = ObjectRef::new(kind, self.store.reserve_id().await?);
        self.commit(version, vec![Mutation::InsertObject(StoredObject {
            reference: reference.clone(),
            name: name.to_string(),
            details: Details::new(principal.user_id, group, permission),
        })])
        .await?;

        debug!(user = %principal.user_id, group = %group, object = %reference, "Object created");
        Ok(reference)
    }

    pub async fn get(&self, context: &SecurityContext, reference: &ObjectRef) -> TenantryResult<StoredObject> {
        let principal = self.principal(context).await?;
        let object = self.load(reference).await?;
        self.engine
            .require(&principal, context, &object.details, Right::Read, reference)?;
        Ok(object)
    }

    /// Objects readable from the context, optionally filtered by kind.
    ///
    /// A concrete context lists its own group and the user group. A wildcard
    /// context lists every group of the caller, or every group for an
    /// administrator.
    pub async fn list(&self, context: &SecurityContext, kind: Option<&str>) -> TenantryResult<Vec<StoredObject>> {
        let principal = self.principal(context).await?;
        let reserved = self.registry.reserved();

        let mut groups: BTreeSet<GroupId> = match context.group {
            ContextGroup::Group(group) => BTreeSet::from([group]),
            ContextGroup::AllGroups | ContextGroup::AllShares if principal.is_administrator() => {
                self.registry.group_ids().await
            }
            ContextGroup::AllGroups | ContextGroup::AllShares => principal.groups().collect(),
        };
        groups.insert(reserved.user);

        let mut candidates = Vec::new();
        for group in groups {
            candidates.extend(
                self.store
                    .objects_in_group(group)
                    .await?
                    .into_iter()
                    .filter(|object| kind.map_or(true, |k| k == object.reference.kind)),
            );
        }
        Ok(self.engine.filter_visible(&principal, context, candidates))
    }

    pub async fn rename(&self, context: &SecurityContext, reference: &ObjectRef, name: &str) -> TenantryResult<()> {
        let version = self.store.version().await?;
        let principal = self.principal(context).await?;
        let object = self.load(reference).await?;
        self.engine
            .require(&principal, context, &object.details, Right::Write, reference)?;

        self.commit(version, vec![Mutation::Rename {
            target: reference.clone(),
            name: name.to_string(),
        }])
        .await?;
        Ok(())
    }

    /// Object permissions follow their group. Editing them one by one is
    /// always refused; change the group's permission instead.
    pub async fn set_permissions(
        &self,
        context: &SecurityContext,
        reference: &ObjectRef,
        permission: Permission,
    ) -> TenantryResult<()> {
        refuse(security_violation!(
            format!(
                "{} may not set {} on {}; permissions follow the group",
                context.user, permission, reference
            ),
            "objects"
        ))
    }

    /// Link `child` under `parent`.
    ///
    /// The link lives in the parent's group with that group's permission.
    pub async fn link(
        &self,
        context: &SecurityContext,
        parent: &ObjectRef,
        child: &ObjectRef,
        kind: LinkKind,
    ) -> TenantryResult<LinkId> {
        let version = self.store.version().await?;
        let principal = self.principal(context).await?;
        let parent_object = self.load(parent).await?;
        let child_object = self.load(child).await?;

        self.engine
            .require(&principal, context, &parent_object.details, Right::Link, parent)?;
        self.engine
            .require(&principal, context, &child_object.details, Right::Read, child)?;
        self.enforcer
            .validate_link(parent_object.details.group, child_object.details.group, kind)?;

        let group = parent_object.details.group;
        let permission = self.registry.group(group).await?.permission;
        let transfer = self.engine.admin_private_writes()
            == AdminPrivateGroupWrites::AllowWithOwnershipTransfer
            && self
                .engine
                .is_admin_private_write(&principal, &parent_object.details);
        let owner = if transfer {
            info!(
                target: "audit",
                user = %principal.user_id,
                owner = %parent_object.details.owner,
                parent = %parent,
                "Link ownership transferred to the parent's owner"
            );
            parent_object.details.owner
        } else {
            principal.user_id
        };

        let id = LinkId(self.store.reserve_id().await?);
        self.commit(version, vec![Mutation::InsertLink(StoredLink {
            id,
            parent: parent.clone(),
            child: child.clone(),
            kind,
            details: Details::new(owner, group, permission),
        })])
        .await?;

        debug!(user = %principal.user_id, link = %id, parent = %parent, child = %child, "Linked");
        Ok(id)
    }

    pub async fn unlink(&self, context: &SecurityContext, link: LinkId) -> TenantryResult<()> {
        let version = self.store.version().await?;
        let principal = self.principal(context).await?;
        let stored = self
            .store
            .link(link)
            .await?
            .ok_or_else(|| not_found_error!(link, "objects"))?;
        self.engine
            .require(&principal, context, &stored.details, Right::Delete, &link)?;

        self.commit(version, vec![Mutation::RemoveLink(link)]).await?;
        Ok(())
    }

    /// Delete an object that no link refers to
    pub async fn delete(&self, context: &SecurityContext, reference: &ObjectRef) -> TenantryResult<()> {
        let version = self.store.version().await?;
        let principal = self.principal(context).await?;
        let object = self.load(reference).await?;
        self.engine
            .require(&principal, context, &object.details, Right::Delete, reference)?;

        let links = self.store.links_from(reference).await?.len()
            + self.store.links_to(reference).await?.len();
        if links > 0 {
            return Err(validation_error!(
                format!("{} still has {} links", reference, links),
                "reference",
                "objects"
            ));
        }

        self.commit(version, vec![Mutation::RemoveObject(reference.clone())])
            .await?;
        Ok(())
    }

    pub async fn chgrp(
        &self,
        context: &SecurityContext,
        root: &ObjectRef,
        destination: GroupId,
        policy: MovePolicy,
        cancel: &CancellationToken,
    ) -> TenantryResult<MoveReport> {
        let principal = self.principal(context).await?;
        self.enforcer
            .chgrp(&principal, root, destination, policy, cancel)
            .await
    }

    pub async fn move_to_common_space(
        &self,
        context: &SecurityContext,
        root: &ObjectRef,
        cancel: &CancellationToken,
    ) -> TenantryResult<MoveReport> {
        let principal = self.principal(context).await?;
        self.enforcer
            .move_to_common_space(&principal, root, cancel)
            .await
    }
}
