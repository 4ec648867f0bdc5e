//! Group lifecycle management
//!
//! Creates and deletes groups and experimenters, moves users along the
//! membership state machine and recomputes object permissions when a group's
//! permission changes:
//!
//! ```text
//! NonMember -> Member -> Owner -> Member -> NonMember
//! ```
//!
//! Every operation resolves the caller from the registry under the same write
//! guard it mutates with, so authorization and mutation see one state.

use crate::context::{ContextGroup, SecurityContext};
use crate::principal::Principal;
use crate::registry::{principal_from, GroupRegistry, RegistryState};
use crate::session::SessionManager;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tenantry_core::{
    log_operation_error, log_operation_start, log_operation_success, not_found_error,
    permission_mismatch, security_violation, validation_error, GroupId, Mutation, ObjectStore,
    Permission, PolicyConfig, TenantryError, TenantryResult, UserId,
};
use tracing::{info, warn};

/// Request to create a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub name: String,
    pub permission: Permission,
    #[serde(default)]
    pub ldap: bool,
}

impl NewGroup {
    pub fn new(name: impl Into<String>, permission: Permission) -> Self {
        Self {
            name: name.into(),
            permission,
            ldap: false,
        }
    }
}

/// Request to create an experimenter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewExperimenter {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl NewExperimenter {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            display_name: None,
        }
    }
}

/// Summary of a permission change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionChange {
    pub group: GroupId,
    pub previous: Permission,
    pub permission: Permission,
    /// Objects rewritten
    pub objects: usize,
    /// Links rewritten
    pub links: usize,
}

/// Log a refusal on the audit target and hand it back
fn refuse<T>(err: TenantryError) -> TenantryResult<T> {
    err.log();
    Err(err)
}

pub struct GroupLifecycleManager {
    registry: Arc<GroupRegistry>,
    store: Arc<dyn ObjectStore>,
    policy: PolicyConfig,
    sessions: Option<Arc<SessionManager>>,
}

impl GroupLifecycleManager {
    pub fn new(registry: Arc<GroupRegistry>, store: Arc<dyn ObjectStore>, policy: PolicyConfig) -> Self {
        Self {
            registry,
            store,
            policy,
            sessions: None,
        }
    }

    /// Refuse contexts whose session is closed or expired
    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    async fn check_session(&self, context: &SecurityContext) -> TenantryResult<()> {
        match &self.sessions {
            Some(sessions) => sessions.validate(context).await,
            None => Ok(()),
        }
    }

    fn caller(&self, state: &RegistryState, context: &SecurityContext) -> TenantryResult<Principal> {
        principal_from(state, self.registry.reserved(), context.user)
    }

    /// Create a new group.
    ///
    /// Non-administrators cannot create a group more visible than the group
    /// they are currently working in, and join the new group as a member.
    pub async fn create_group(&self, context: &SecurityContext, group: NewGroup) -> TenantryResult<GroupId> {
        log_operation_start!("create_group", user = %context.user, name = %group.name);

        self.check_session(context).await?;
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;

        if !caller.is_administrator() {
            let ceiling = match context.group {
                ContextGroup::Group(current) => state.group(current)?.permission,
                ContextGroup::AllGroups | ContextGroup::AllShares => Permission::PRIVATE,
            };
            if !group.permission.is_within(&ceiling) {
                return refuse(permission_mismatch!(
                    format!(
                        "{} may not create a {} group from a {} context",
                        caller, group.permission, ceiling
                    ),
                    "lifecycle"
                ));
            }
        }

        let id = state.insert_group(&group.name, group.permission, group.ldap)?;
        if !caller.is_administrator() {
            state.set_membership(caller.user_id, id, false);
        }

        log_operation_success!(
            "create_group",
            user = %caller.user_id,
            group = %id,
            permission = %group.permission
        );
        Ok(id)
    }

    /// Change a group's permission and rewrite every object and link in it.
    ///
    /// The cascade is one store commit. The group's own bits only change once
    /// that commit succeeded.
    pub async fn change_permissions(
        &self,
        context: &SecurityContext,
        group: GroupId,
        permission: Permission,
    ) -> TenantryResult<PermissionChange> {
        log_operation_start!("change_permissions", user = %context.user, group = %group);

        self.check_session(context).await?;
        // Held across the cascade so no object is created with the old bits
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;
        let previous = state.group(group)?.permission;

        let reserved = self.registry.reserved();
        let allowed = caller.is_administrator()
            || (caller.is_owner_of(group) && !reserved.is_reserved(group));
        if !allowed {
            return refuse(security_violation!(
                format!("{} may not change the permissions of {}", caller, group),
                "lifecycle"
            ));
        }

        if previous.identical(&permission) {
            return Ok(PermissionChange {
                group,
                previous,
                permission,
                objects: 0,
                links: 0,
            });
        }

        let version = self.store.version().await?;
        let objects = self.store.objects_in_group(group).await?;
        let links = self.store.links_in_group(group).await?;

        if !permission.is_group_readable() {
            let owners: BTreeMap<_, _> = objects
                .iter()
                .map(|o| (o.reference.clone(), o.details.owner))
                .collect();
            let mixed = links
                .iter()
                .find(|l| owners.get(&l.parent) != owners.get(&l.child));
            if let Some(link) = mixed {
                return refuse(security_violation!(
                    format!(
                        "{} joins data of different owners; {} cannot become {}",
                        link.id, group, permission
                    ),
                    "lifecycle"
                ));
            }
        }

        let mut mutations = Vec::with_capacity(objects.len() + links.len());
        for object in &objects {
            let mut details = object.details;
            details.permission = permission;
            mutations.push(Mutation::SetDetails {
                target: object.reference.clone(),
                details,
            });
        }
        for link in &links {
            let mut details = link.details;
            details.permission = permission;
            mutations.push(Mutation::SetLinkDetails {
                link: link.id,
                details,
            });
        }

        if let Err(err) = self.store.commit(version, mutations).await {
            log_operation_error!("change_permissions", err, group = %group);
            return Err(err);
        }
        state.set_group_permission(group, permission)?;

        info!(
            target: "audit",
            user = %caller.user_id,
            group = %group,
            from = %previous,
            to = %permission,
            objects = objects.len(),
            links = links.len(),
            "Group permissions changed"
        );
        Ok(PermissionChange {
            group,
            previous,
            permission,
            objects: objects.len(),
            links: links.len(),
        })
    }

    pub async fn add_group_owners(
        &self,
        context: &SecurityContext,
        group: GroupId,
        users: &[UserId],
    ) -> TenantryResult<()> {
        self.set_owner_flag(context, group, users, true).await
    }

    pub async fn remove_group_owners(
        &self,
        context: &SecurityContext,
        group: GroupId,
        users: &[UserId],
    ) -> TenantryResult<()> {
        self.set_owner_flag(context, group, users, false).await
    }

    pub async fn set_group_owner(&self, context: &SecurityContext, group: GroupId, user: UserId) -> TenantryResult<()> {
        self.set_owner_flag(context, group, &[user], true).await
    }

    pub async fn unset_group_owner(&self, context: &SecurityContext, group: GroupId, user: UserId) -> TenantryResult<()> {
        self.set_owner_flag(context, group, &[user], false).await
    }

    async fn set_owner_flag(
        &self,
        context: &SecurityContext,
        group: GroupId,
        users: &[UserId],
        owner: bool,
    ) -> TenantryResult<()> {
        let operation = if owner { "add_group_owners" } else { "remove_group_owners" };
        log_operation_start!(operation, user = %context.user, group = %group);

        self.check_session(context).await?;
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;
        state.group(group)?;

        if !caller.is_administrator() && !caller.is_owner_of(group) {
            return refuse(security_violation!(
                format!("{} is neither administrator nor owner of {}", caller, group),
                "lifecycle"
            ));
        }
        if owner && self.registry.reserved().is_reserved(group) {
            return refuse(security_violation!(
                format!("{} is reserved and has no owners", group),
                "lifecycle"
            ));
        }

        // Check the whole batch before flipping any flag
        for user in users {
            if state.membership(*user, group).is_none() {
                return refuse(validation_error!(
                    format!("{} must be a member of {} first", user, group),
                    "users",
                    "lifecycle"
                ));
            }
            if *user != caller.user_id || caller.is_administrator() {
                continue;
            }
            if owner {
                return refuse(security_violation!(
                    format!("{} may not promote themselves", caller),
                    "lifecycle"
                ));
            }
            if !self.policy.allow_owner_self_demotion {
                return refuse(security_violation!(
                    format!("{} may not step down as owner of {}", caller, group),
                    "lifecycle"
                ));
            }
        }

        for user in users {
            if *user == caller.user_id && owner {
                warn!(
                    target: "audit",
                    user = %caller.user_id,
                    group = %group,
                    already_owner = state.membership(*user, group) == Some(true),
                    "Administrator elevated themselves to group owner"
                );
            }
            state.set_membership(*user, group, owner);
        }

        log_operation_success!(operation, user = %caller.user_id, group = %group, count = users.len());
        Ok(())
    }

    /// Make `user` a member of each of `groups`. Existing memberships keep
    /// their owner flag.
    pub async fn add_groups(&self, context: &SecurityContext, user: UserId, groups: &[GroupId]) -> TenantryResult<()> {
        log_operation_start!("add_groups", user = %context.user, target = %user);

        self.check_session(context).await?;
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;
        state.experimenter(user)?;

        for group in groups {
            state.group(*group)?;
            if !caller.is_administrator() && !caller.is_owner_of(*group) {
                return refuse(security_violation!(
                    format!("{} may not add members to {}", caller, group),
                    "lifecycle"
                ));
            }
        }

        for group in groups {
            if state.membership(user, *group).is_none() {
                state.set_membership(user, *group, false);
            }
        }

        log_operation_success!("add_groups", user = %caller.user_id, target = %user, count = groups.len());
        Ok(())
    }

    /// Remove `user` from each of `groups`. Administrators only.
    pub async fn remove_groups(&self, context: &SecurityContext, user: UserId, groups: &[GroupId]) -> TenantryResult<()> {
        log_operation_start!("remove_groups", user = %context.user, target = %user);

        self.check_session(context).await?;
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;
        if !caller.is_administrator() {
            return refuse(security_violation!(
                format!("{} may not remove group memberships", caller),
                "lifecycle"
            ));
        }

        let reserved = self.registry.reserved();
        for group in groups {
            match state.membership(user, *group) {
                None => {
                    return refuse(validation_error!(
                        format!("{} is not a member of {}", user, group),
                        "groups",
                        "lifecycle"
                    ))
                }
                Some(true) => {
                    return refuse(validation_error!(
                        format!("{} owns {}; demote before removing", user, group),
                        "groups",
                        "lifecycle"
                    ))
                }
                Some(false) => {}
            }
            if *group == reserved.user {
                return refuse(validation_error!(
                    format!("every experimenter belongs to {}", group),
                    "groups",
                    "lifecycle"
                ));
            }
            if *group == reserved.system && user == self.registry.root() {
                return refuse(security_violation!(
                    "root cannot leave the system group",
                    "lifecycle"
                ));
            }
        }

        for group in groups {
            state.remove_membership(user, *group);
        }

        log_operation_success!("remove_groups", user = %caller.user_id, target = %user, count = groups.len());
        Ok(())
    }

    /// Create an experimenter in `target_group`.
    ///
    /// Only an owner of that group or an administrator may do so. The new
    /// experimenter also joins the user group.
    pub async fn create_experimenter(
        &self,
        context: &SecurityContext,
        experimenter: NewExperimenter,
        target_group: GroupId,
    ) -> TenantryResult<UserId> {
        log_operation_start!("create_experimenter", user = %context.user, username = %experimenter.username);

        self.check_session(context).await?;
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;
        state.group(target_group)?;

        if !caller.is_administrator() && !caller.is_owner_of(target_group) {
            return refuse(security_violation!(
                format!(
                    "{} must own {} to create experimenters in it",
                    caller, target_group
                ),
                "lifecycle"
            ));
        }

        let id = state.insert_experimenter(&experimenter.username, experimenter.display_name)?;
        state.set_membership(id, target_group, false);
        state.set_membership(id, self.registry.reserved().user, false);

        log_operation_success!(
            "create_experimenter",
            user = %caller.user_id,
            created = %id,
            group = %target_group
        );
        Ok(id)
    }

    /// Delete an experimenter that owns no data
    pub async fn delete_experimenter(&self, context: &SecurityContext, user: UserId) -> TenantryResult<()> {
        log_operation_start!("delete_experimenter", user = %context.user, target = %user);

        self.check_session(context).await?;
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;
        state.experimenter(user)?;

        if user == caller.user_id || user == self.registry.root() {
            return refuse(security_violation!(
                format!("{} may not delete {}", caller, user),
                "lifecycle"
            ));
        }

        if !caller.is_administrator() {
            let reserved = self.registry.reserved();
            let groups: BTreeSet<GroupId> = state
                .groups_of(user)
                .into_keys()
                .filter(|g| !reserved.is_reserved(*g))
                .collect();
            if groups.is_empty() || !groups.iter().all(|g| caller.is_owner_of(*g)) {
                return refuse(security_violation!(
                    format!("{} does not own every group of {}", caller, user),
                    "lifecycle"
                ));
            }
        }

        let owned = self.store.count_owned_by(user).await?;
        if owned > 0 {
            return refuse(validation_error!(
                format!("{} still owns {} objects or links", user, owned),
                "user",
                "lifecycle"
            ));
        }

        state.remove_experimenter(user);
        log_operation_success!("delete_experimenter", user = %caller.user_id, target = %user);
        Ok(())
    }

    /// Delete an empty, non-reserved group
    pub async fn delete_group(&self, context: &SecurityContext, group: GroupId) -> TenantryResult<()> {
        log_operation_start!("delete_group", user = %context.user, group = %group);

        self.check_session(context).await?;
        let mut state = self.registry.write().await;
        let caller = self.caller(&state, context)?;
        state.group(group)?;

        if self.registry.reserved().is_reserved(group) {
            return refuse(security_violation!(
                format!("{} is reserved", group),
                "lifecycle"
            ));
        }
        if !caller.is_administrator() && !caller.is_owner_of(group) {
            return refuse(security_violation!(
                format!("{} may not delete {}", caller, group),
                "lifecycle"
            ));
        }

        let remaining = self.store.objects_in_group(group).await?.len();
        if remaining > 0 {
            return refuse(validation_error!(
                format!("{} still holds {} objects", group, remaining),
                "group",
                "lifecycle"
            ));
        }

        state.remove_group(group);
        log_operation_success!("delete_group", user = %caller.user_id, group = %group);
        Ok(())
    }

    /// Owners of `group`
    pub async fn leaders(&self, group: GroupId) -> TenantryResult<Vec<UserId>> {
        self.registry.leaders(group).await
    }

    pub async fn members(&self, group: GroupId) -> TenantryResult<Vec<UserId>> {
        self.registry.members(group).await
    }

    /// Resolve an experimenter id from a username
    pub async fn experimenter_id(&self, username: &str) -> TenantryResult<UserId> {
        self.registry
            .experimenter_by_name(username)
            .await
            .map(|e| e.id)
            .ok_or_else(|| not_found_error!(username, "lifecycle"))
    }
}
