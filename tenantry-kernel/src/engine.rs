//! Access decision engine
//!
//! Decides whether a principal, acting in a security context, may exercise a
//! right on a target. Resolution order:
//!
//! ```text
//! administrator -> owner of target -> group owner (PI) -> member -> world
//! ```
//!
//! The first rule that applies decides. The engine is pure: it never touches
//! the store and holds no mutable state, so it can sit on every read and write
//! path of a multi-user service.

use crate::context::SecurityContext;
use crate::principal::Principal;
use crate::registry::ReservedGroups;
use serde::{Deserialize, Serialize};
use tenantry_core::{
    AdminPrivateGroupWrites, Details, GroupId, PermissionRight, PermissionRole, Right, Role,
    StoredObject, TenantryError, TenantryResult, ViolationKind,
};
use tracing::{debug, warn};

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Deny(ViolationKind),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn violation(&self) -> Option<ViolationKind> {
        match self {
            Decision::Allow => None,
            Decision::Deny(kind) => Some(*kind),
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::Deny(kind) => write!(f, "deny ({})", kind),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessDecisionEngine {
    reserved: ReservedGroups,
    admin_private_writes: AdminPrivateGroupWrites,
}

impl AccessDecisionEngine {
    pub fn new(reserved: ReservedGroups, admin_private_writes: AdminPrivateGroupWrites) -> Self {
        Self {
            reserved,
            admin_private_writes,
        }
    }

    pub fn reserved(&self) -> ReservedGroups {
        self.reserved
    }

    pub fn admin_private_writes(&self) -> AdminPrivateGroupWrites {
        self.admin_private_writes
    }

    /// True when an administrator link on `target` falls under the
    /// private-group policy
    pub fn is_admin_private_write(&self, principal: &Principal, target: &Details) -> bool {
        principal.is_administrator()
            && target.owner != principal.user_id
            && !target.permission.is_group_readable()
            && !self.reserved.is_reserved(target.group)
    }

    /// Whether objects of `group` are in scope for `context`.
    ///
    /// The user group is visible from every context.
    pub fn visible_in_scope(&self, context: &SecurityContext, group: GroupId) -> bool {
        group == self.reserved.user || context.group.includes(group)
    }

    /// Keep the objects `principal` may read from `context`
    pub fn filter_visible(
        &self,
        principal: &Principal,
        context: &SecurityContext,
        objects: impl IntoIterator<Item = StoredObject>,
    ) -> Vec<StoredObject> {
        objects
            .into_iter()
            .filter(|object| {
                self.authorize(principal, context, &object.details, Right::Read)
                    .is_allowed()
            })
            .collect()
    }

    pub fn authorize(
        &self,
        principal: &Principal,
        context: &SecurityContext,
        target: &Details,
        right: Right,
    ) -> Decision {
        let decision = self.decide(principal, context, target, right);
        debug!(
            user = %principal.user_id,
            context = %context.group,
            owner = %target.owner,
            group = %target.group,
            permission = %target.permission,
            right = %right,
            decision = %decision,
            "Access decision"
        );
        decision
    }

    fn decide(
        &self,
        principal: &Principal,
        context: &SecurityContext,
        target: &Details,
        right: Right,
    ) -> Decision {
        if principal.is_administrator() {
            return self.administrator_decision(principal, target, right);
        }

        if target.owner == principal.user_id {
            return Decision::Allow;
        }

        let role = if target.group == self.reserved.user {
            // Everybody reads the user group; nobody administers it but admins
            principal.membership(target.group).or(Some(Role::Member))
        } else {
            principal.role_in(target.group)
        };

        match role {
            Some(Role::Owner) if self.reserved.is_reserved(target.group) => {
                Decision::Deny(ViolationKind::GroupSecurity)
            }
            Some(Role::Owner) | Some(Role::Administrator) => Decision::Allow,
            Some(Role::Member) => self.member_decision(context, target, right),
            None => Self::world_decision(target, right),
        }
    }

    fn administrator_decision(&self, principal: &Principal, target: &Details, right: Right) -> Decision {
        if right != Right::Link || !self.is_admin_private_write(principal, target) {
            return Decision::Allow;
        }

        match self.admin_private_writes {
            AdminPrivateGroupWrites::Deny => Decision::Deny(ViolationKind::GroupSecurity),
            AdminPrivateGroupWrites::AllowWithAudit => {
                warn!(
                    target: "audit",
                    user = %principal.user_id,
                    owner = %target.owner,
                    group = %target.group,
                    "Administrator link into a private group"
                );
                Decision::Allow
            }
            AdminPrivateGroupWrites::AllowWithOwnershipTransfer => Decision::Allow,
        }
    }

    fn member_decision(&self, context: &SecurityContext, target: &Details, right: Right) -> Decision {
        let scoped = self.visible_in_scope(context, target.group);
        let permission = &target.permission;

        match right {
            Right::Read => {
                if scoped && permission.is_granted(PermissionRole::Group, PermissionRight::Read) {
                    Decision::Allow
                } else {
                    Decision::Deny(ViolationKind::Security)
                }
            }
            // Group write governs new links, never edits of another's data
            Right::Link => {
                if scoped && permission.is_granted(PermissionRole::Group, PermissionRight::Write) {
                    Decision::Allow
                } else {
                    Decision::Deny(ViolationKind::GroupSecurity)
                }
            }
            Right::Write | Right::Delete => Decision::Deny(ViolationKind::Security),
        }
    }

    fn world_decision(target: &Details, right: Right) -> Decision {
        let permission = &target.permission;
        let granted = match right {
            Right::Read => permission.is_granted(PermissionRole::World, PermissionRight::Read),
            Right::Link => permission.is_granted(PermissionRole::World, PermissionRight::Write),
            Right::Write | Right::Delete => false,
        };

        if granted {
            Decision::Allow
        } else {
            Decision::Deny(ViolationKind::GroupSecurity)
        }
    }

    /// Authorize, turning a denial into the matching typed error
    pub fn require(
        &self,
        principal: &Principal,
        context: &SecurityContext,
        target: &Details,
        right: Right,
        what: &dyn std::fmt::Display,
    ) -> TenantryResult<()> {
        match self.authorize(principal, context, target, right) {
            Decision::Allow => Ok(()),
            Decision::Deny(kind) => {
                let err = TenantryError::from_violation(
                    kind,
                    format!("{} may not {} {}", principal, right, what),
                    "engine",
                );
                err.log();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextGroup, SessionId};
    use std::collections::BTreeMap;
    use tenantry_core::{Permission, UserId};

    const SYSTEM: GroupId = GroupId(0);
    const USER: GroupId = GroupId(1);
    const LAB: GroupId = GroupId(2);
    const OTHER: GroupId = GroupId(3);

    fn engine(policy: AdminPrivateGroupWrites) -> AccessDecisionEngine {
        AccessDecisionEngine::new(
            ReservedGroups {
                system: SYSTEM,
                user: USER,
            },
            policy,
        )
    }

    fn principal(id: i64, roles: &[(GroupId, Role)]) -> Principal {
        let roles: BTreeMap<_, _> = roles.iter().copied().collect();
        let admin = roles.contains_key(&SYSTEM);
        Principal::new(UserId(id), format!("user{}", id), admin, roles)
    }

    fn ctx(user: i64, group: ContextGroup) -> SecurityContext {
        SecurityContext::new(UserId(user), group, SessionId::new())
    }

    fn object(owner: i64, group: GroupId, permission: Permission) -> Details {
        Details::new(UserId(owner), group, permission)
    }

    #[test]
    fn owner_keeps_control_under_private() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let owner = principal(10, &[(LAB, Role::Member)]);
        let target = object(10, LAB, Permission::PRIVATE);
        let context = ctx(10, ContextGroup::Group(LAB));

        for right in [Right::Read, Right::Write, Right::Link, Right::Delete] {
            assert_eq!(eng.authorize(&owner, &context, &target, right), Decision::Allow);
        }
    }

    #[test]
    fn collab_readonly_member_reads_but_cannot_link_or_edit() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let member = principal(11, &[(LAB, Role::Member)]);
        let target = object(10, LAB, Permission::COLLAB_READONLY);
        let context = ctx(11, ContextGroup::Group(LAB));

        assert_eq!(eng.authorize(&member, &context, &target, Right::Read), Decision::Allow);
        assert_eq!(
            eng.authorize(&member, &context, &target, Right::Link),
            Decision::Deny(ViolationKind::GroupSecurity)
        );
        assert_eq!(
            eng.authorize(&member, &context, &target, Right::Write),
            Decision::Deny(ViolationKind::Security)
        );
    }

    #[test]
    fn collab_readlink_member_links_but_cannot_edit() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let member = principal(11, &[(LAB, Role::Member)]);
        let target = object(10, LAB, Permission::COLLAB_READLINK);
        let context = ctx(11, ContextGroup::Group(LAB));

        assert_eq!(eng.authorize(&member, &context, &target, Right::Link), Decision::Allow);
        assert_eq!(
            eng.authorize(&member, &context, &target, Right::Write),
            Decision::Deny(ViolationKind::Security)
        );
    }

    #[test]
    fn member_reads_only_within_scope() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let member = principal(11, &[(LAB, Role::Member), (OTHER, Role::Member)]);
        let target = object(10, LAB, Permission::COLLAB_READONLY);

        let wrong_group = ctx(11, ContextGroup::Group(OTHER));
        assert_eq!(
            eng.authorize(&member, &wrong_group, &target, Right::Read),
            Decision::Deny(ViolationKind::Security)
        );

        for wildcard in [ContextGroup::AllGroups, ContextGroup::AllShares] {
            let all = ctx(11, wildcard);
            assert_eq!(eng.authorize(&member, &all, &target, Right::Read), Decision::Allow);
        }
    }

    #[test]
    fn filter_keeps_readable_objects_in_scope() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let member = principal(11, &[(LAB, Role::Member), (USER, Role::Member)]);
        let context = ctx(11, ContextGroup::Group(LAB));
        let stored = |id: i64, details: Details| StoredObject {
            reference: tenantry_core::ObjectRef::new("Image", id),
            name: format!("image{}", id),
            details,
        };

        let visible = eng.filter_visible(
            &member,
            &context,
            vec![
                stored(1, object(10, LAB, Permission::COLLAB_READONLY)),
                stored(2, object(10, LAB, Permission::PRIVATE)),
                stored(3, object(11, LAB, Permission::PRIVATE)),
                stored(4, object(10, USER, Permission::COLLAB_READONLY)),
            ],
        );
        let ids: Vec<i64> = visible.iter().map(|o| o.reference.id).collect();
        assert_eq!(ids, vec![1, 3, 4]);

        assert!(eng.visible_in_scope(&context, USER));
        assert!(!eng.visible_in_scope(&context, OTHER));
    }

    #[test]
    fn group_owner_administers_group_data() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let pi = principal(12, &[(LAB, Role::Owner)]);
        let target = object(10, LAB, Permission::PRIVATE);
        let context = ctx(12, ContextGroup::Group(LAB));

        assert_eq!(eng.authorize(&pi, &context, &target, Right::Write), Decision::Allow);
        assert_eq!(eng.authorize(&pi, &context, &target, Right::Delete), Decision::Allow);
    }

    #[test]
    fn group_owner_of_reserved_group_gets_no_data_rights() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let pi = principal(12, &[(USER, Role::Owner)]);
        let photo = object(10, USER, Permission::GROUP_READABLE);
        let context = ctx(12, ContextGroup::Group(LAB));

        assert_eq!(
            eng.authorize(&pi, &context, &photo, Right::Write),
            Decision::Deny(ViolationKind::GroupSecurity)
        );
    }

    #[test]
    fn user_group_is_readable_from_every_context() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let member = principal(11, &[(LAB, Role::Member)]);
        let photo = object(10, USER, Permission::GROUP_READABLE);
        let context = ctx(11, ContextGroup::Group(LAB));

        assert_eq!(eng.authorize(&member, &context, &photo, Right::Read), Decision::Allow);
        assert_eq!(
            eng.authorize(&member, &context, &photo, Right::Write),
            Decision::Deny(ViolationKind::Security)
        );
    }

    #[test]
    fn non_members_fall_back_to_world_bits() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let outsider = principal(13, &[(OTHER, Role::Member)]);
        let context = ctx(13, ContextGroup::Group(OTHER));

        let public = object(10, LAB, Permission::PUBLIC);
        assert_eq!(eng.authorize(&outsider, &context, &public, Right::Read), Decision::Allow);
        assert_eq!(eng.authorize(&outsider, &context, &public, Right::Link), Decision::Allow);
        assert_eq!(
            eng.authorize(&outsider, &context, &public, Right::Write),
            Decision::Deny(ViolationKind::GroupSecurity)
        );

        let world_readable = object(10, LAB, "rwrwr-".parse().unwrap());
        assert_eq!(
            eng.authorize(&outsider, &context, &world_readable, Right::Read),
            Decision::Allow
        );
        assert_eq!(
            eng.authorize(&outsider, &context, &world_readable, Right::Link),
            Decision::Deny(ViolationKind::GroupSecurity)
        );

        let readonly = object(10, LAB, Permission::COLLAB_READONLY);
        assert_eq!(
            eng.authorize(&outsider, &context, &readonly, Right::Read),
            Decision::Deny(ViolationKind::GroupSecurity)
        );
    }

    #[test]
    fn administrator_private_links_follow_policy() {
        let admin = principal(0, &[(SYSTEM, Role::Member)]);
        let context = ctx(0, ContextGroup::Group(LAB));
        let target = object(10, LAB, Permission::PRIVATE);

        let deny = engine(AdminPrivateGroupWrites::Deny);
        assert_eq!(deny.authorize(&admin, &context, &target, Right::Read), Decision::Allow);
        assert_eq!(deny.authorize(&admin, &context, &target, Right::Write), Decision::Allow);
        assert_eq!(
            deny.authorize(&admin, &context, &target, Right::Link),
            Decision::Deny(ViolationKind::GroupSecurity)
        );

        for policy in [
            AdminPrivateGroupWrites::AllowWithAudit,
            AdminPrivateGroupWrites::AllowWithOwnershipTransfer,
        ] {
            assert_eq!(
                engine(policy).authorize(&admin, &context, &target, Right::Link),
                Decision::Allow
            );
        }

        let readable = object(10, LAB, Permission::COLLAB_READLINK);
        assert_eq!(deny.authorize(&admin, &context, &readable, Right::Link), Decision::Allow);
    }

    #[test]
    fn require_maps_denials_to_typed_errors() {
        let eng = engine(AdminPrivateGroupWrites::Deny);
        let member = principal(11, &[(LAB, Role::Member)]);
        let target = object(10, LAB, Permission::COLLAB_READONLY);
        let context = ctx(11, ContextGroup::Group(LAB));

        let err = eng
            .require(&member, &context, &target, Right::Link, &"Image:1")
            .unwrap_err();
        assert!(matches!(err, TenantryError::GroupSecurityViolation { .. }));
        assert!(eng
            .require(&member, &context, &target, Right::Read, &"Image:1")
            .is_ok());
    }
}
