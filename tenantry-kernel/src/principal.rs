//! Authenticated principals

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tenantry_core::{GroupId, Role, UserId};

/// An authenticated identity with its memberships, resolved once per request.
///
/// Membership roles are only ever [`Role::Member`] or [`Role::Owner`];
/// [`Role::Administrator`] is derived from membership in the system group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub username: String,
    administrator: bool,
    roles: BTreeMap<GroupId, Role>,
}

impl Principal {
    pub fn new(
        user_id: UserId,
        username: impl Into<String>,
        administrator: bool,
        roles: BTreeMap<GroupId, Role>,
    ) -> Self {
        Self {
            user_id,
            username: username.into(),
            administrator,
            roles,
        }
    }

    pub fn is_administrator(&self) -> bool {
        self.administrator
    }

    /// Membership role in `group`, ignoring administrator status
    pub fn membership(&self, group: GroupId) -> Option<Role> {
        self.roles.get(&group).copied()
    }

    /// The single role that governs this principal's access to `group`
    pub fn role_in(&self, group: GroupId) -> Option<Role> {
        if self.administrator {
            Some(Role::Administrator)
        } else {
            self.membership(group)
        }
    }

    pub fn is_member_of(&self, group: GroupId) -> bool {
        self.roles.contains_key(&group)
    }

    pub fn is_owner_of(&self, group: GroupId) -> bool {
        self.membership(group) == Some(Role::Owner)
    }

    pub fn groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.roles.keys().copied()
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.administrator {
            write!(f, "{}({}, admin)", self.username, self.user_id)
        } else {
            write!(f, "{}({})", self.username, self.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn administrator_role_overrides_membership() {
        let roles = BTreeMap::from([(GroupId(2), Role::Member)]);
        let admin = Principal::new(UserId(0), "root", true, roles.clone());
        assert_eq!(admin.role_in(GroupId(2)), Some(Role::Administrator));
        assert_eq!(admin.role_in(GroupId(9)), Some(Role::Administrator));
        assert_eq!(admin.membership(GroupId(2)), Some(Role::Member));

        let member = Principal::new(UserId(5), "ana", false, roles);
        assert_eq!(member.role_in(GroupId(2)), Some(Role::Member));
        assert_eq!(member.role_in(GroupId(9)), None);
        assert!(!member.is_owner_of(GroupId(2)));
    }
}
