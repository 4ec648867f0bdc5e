//! Group registry
//!
//! Source of truth for experimenters, groups, membership edges and their
//! `owner` flag. The reserved "system" and "user" groups come from
//! configuration and are handed to every component that needs them through
//! this registry.

use crate::principal::Principal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tenantry_core::{
    not_found_error, validation_error, GroupId, Permission, ReservedConfig, Role, TenantryResult,
    UserId,
};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// The installation's reserved group ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedGroups {
    pub system: GroupId,
    pub user: GroupId,
}

impl ReservedGroups {
    pub fn is_reserved(&self, group: GroupId) -> bool {
        group == self.system || group == self.user
    }
}

/// A tenancy boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Default permission of objects created in the group
    pub permission: Permission,
    pub ldap: bool,
}

/// A user identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experimenter {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
}

/// Mutable registry contents, only reachable through a registry lock
#[derive(Debug, Default)]
pub struct RegistryState {
    groups: BTreeMap<GroupId, Group>,
    experimenters: BTreeMap<UserId, Experimenter>,
    /// GroupExperimenterMap: the value is the `owner` flag
    memberships: BTreeMap<(UserId, GroupId), bool>,
    next_group_id: i64,
    next_user_id: i64,
}

impl RegistryState {
    pub fn group(&self, id: GroupId) -> TenantryResult<&Group> {
        self.groups
            .get(&id)
            .ok_or_else(|| not_found_error!(id, "registry"))
    }

    pub fn experimenter(&self, id: UserId) -> TenantryResult<&Experimenter> {
        self.experimenters
            .get(&id)
            .ok_or_else(|| not_found_error!(id, "registry"))
    }

    pub fn group_by_name(&self, name: &str) -> Option<&Group> {
        self.groups.values().find(|g| g.name == name)
    }

    pub fn experimenter_by_name(&self, username: &str) -> Option<&Experimenter> {
        self.experimenters.values().find(|e| e.username == username)
    }

    /// `Some(owner_flag)` when `user` belongs to `group`
    pub fn membership(&self, user: UserId, group: GroupId) -> Option<bool> {
        self.memberships.get(&(user, group)).copied()
    }

    pub fn members(&self, group: GroupId) -> Vec<UserId> {
        self.memberships
            .keys()
            .filter(|(_, g)| *g == group)
            .map(|(u, _)| *u)
            .collect()
    }

    pub fn leaders(&self, group: GroupId) -> Vec<UserId> {
        self.memberships
            .iter()
            .filter(|((_, g), owner)| *g == group && **owner)
            .map(|((u, _), _)| *u)
            .collect()
    }

    pub fn groups_of(&self, user: UserId) -> BTreeMap<GroupId, Role> {
        self.memberships
            .iter()
            .filter(|((u, _), _)| *u == user)
            .map(|((_, g), owner)| (*g, if *owner { Role::Owner } else { Role::Member }))
            .collect()
    }

    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.keys().copied().collect()
    }

    pub(crate) fn insert_group(
        &mut self,
        name: &str,
        permission: Permission,
        ldap: bool,
    ) -> TenantryResult<GroupId> {
        if name.trim().is_empty() {
            return Err(validation_error!("Group name must not be empty", "name", "registry"));
        }
        if self.group_by_name(name).is_some() {
            return Err(validation_error!(
                format!("Group '{}' already exists", name),
                "name",
                "registry"
            ));
        }

        let id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        self.groups.insert(
            id,
            Group {
                id,
                name: name.to_string(),
                permission,
                ldap,
            },
        );
        Ok(id)
    }

    pub(crate) fn insert_experimenter(
        &mut self,
        username: &str,
        display_name: Option<String>,
    ) -> TenantryResult<UserId> {
        if username.trim().is_empty() {
            return Err(validation_error!(
                "Username must not be empty",
                "username",
                "registry"
            ));
        }
        if self.experimenter_by_name(username).is_some() {
            return Err(validation_error!(
                format!("Experimenter '{}' already exists", username),
                "username",
                "registry"
            ));
        }

        let id = UserId(self.next_user_id);
        self.next_user_id += 1;
        self.experimenters.insert(
            id,
            Experimenter {
                id,
                username: username.to_string(),
                display_name,
            },
        );
        Ok(id)
    }

    /// Insert or update a membership edge
    pub(crate) fn set_membership(&mut self, user: UserId, group: GroupId, owner: bool) {
        self.memberships.insert((user, group), owner);
    }

    pub(crate) fn remove_membership(&mut self, user: UserId, group: GroupId) -> bool {
        self.memberships.remove(&(user, group)).is_some()
    }

    pub(crate) fn set_group_permission(&mut self, group: GroupId, permission: Permission) -> TenantryResult<()> {
        let entry = self
            .groups
            .get_mut(&group)
            .ok_or_else(|| not_found_error!(group, "registry"))?;
        entry.permission = permission;
        Ok(())
    }

    pub(crate) fn remove_group(&mut self, group: GroupId) {
        self.groups.remove(&group);
        self.memberships.retain(|(_, g), _| *g != group);
    }

    pub(crate) fn remove_experimenter(&mut self, user: UserId) {
        self.experimenters.remove(&user);
        self.memberships.retain(|(u, _), _| *u != user);
    }
}

/// Shared, lock-protected registry
pub struct GroupRegistry {
    reserved: ReservedGroups,
    root: UserId,
    state: RwLock<RegistryState>,
}

impl GroupRegistry {
    /// Bootstrap the reserved groups and the root administrator
    pub fn new(config: &ReservedConfig) -> Self {
        let reserved = ReservedGroups {
            system: config.system_group(),
            user: config.user_group(),
        };
        let root = config.root_user();

        let mut state = RegistryState::default();
        state.groups.insert(
            reserved.system,
            Group {
                id: reserved.system,
                name: config.system_group_name.clone(),
                permission: Permission::PRIVATE,
                ldap: false,
            },
        );
        state.groups.insert(
            reserved.user,
            Group {
                id: reserved.user,
                name: config.user_group_name.clone(),
                permission: Permission::GROUP_READABLE,
                ldap: false,
            },
        );
        state.experimenters.insert(
            root,
            Experimenter {
                id: root,
                username: config.root_user_name.clone(),
                display_name: Some("Administrator".to_string()),
            },
        );
        state.set_membership(root, reserved.system, false);
        state.set_membership(root, reserved.user, false);

        state.next_group_id = reserved.system.0.max(reserved.user.0) + 1;
        state.next_user_id = root.0 + 1;

        debug!(
            system = %reserved.system,
            user = %reserved.user,
            root = %root,
            "Group registry bootstrapped"
        );

        Self {
            reserved,
            root,
            state: RwLock::new(state),
        }
    }

    pub fn reserved(&self) -> ReservedGroups {
        self.reserved
    }

    pub fn root(&self) -> UserId {
        self.root
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().await
    }

    /// Resolve the principal for `user` from the current membership state
    pub async fn principal(&self, user: UserId) -> TenantryResult<Principal> {
        let state = self.state.read().await;
        principal_from(&state, self.reserved, user)
    }

    pub async fn group(&self, id: GroupId) -> TenantryResult<Group> {
        self.state.read().await.group(id).cloned()
    }

    pub async fn experimenter_by_name(&self, username: &str) -> Option<Experimenter> {
        self.state.read().await.experimenter_by_name(username).cloned()
    }

    pub async fn group_by_name(&self, name: &str) -> Option<Group> {
        self.state.read().await.group_by_name(name).cloned()
    }

    /// Group owners ("leaders") of `group`
    pub async fn leaders(&self, group: GroupId) -> TenantryResult<Vec<UserId>> {
        let state = self.state.read().await;
        state.group(group)?;
        Ok(state.leaders(group))
    }

    pub async fn members(&self, group: GroupId) -> TenantryResult<Vec<UserId>> {
        let state = self.state.read().await;
        state.group(group)?;
        Ok(state.members(group))
    }

    pub async fn group_ids(&self) -> BTreeSet<GroupId> {
        self.state.read().await.group_ids().into_iter().collect()
    }
}

pub(crate) fn principal_from(
    state: &RegistryState,
    reserved: ReservedGroups,
    user: UserId,
) -> TenantryResult<Principal> {
    let experimenter = state.experimenter(user)?;
    let roles = state.groups_of(user);
    let administrator = roles.contains_key(&reserved.system);
    Ok(Principal::new(
        user,
        experimenter.username.clone(),
        administrator,
        roles,
    ))
}
