//! Security context
//!
//! A [`SecurityContext`] is the (user, active group) pair that scopes what a
//! request can see. It is a plain value: switching groups yields a new context,
//! and only the session manager decides which context a session holds.

use serde::{Deserialize, Serialize};
use std::fmt;
use tenantry_core::{validation_error, GroupId, TenantryResult, UserId};

/// Session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The group a context is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextGroup {
    Group(GroupId),
    AllGroups,
    AllShares,
}

impl ContextGroup {
    /// Wire sentinel shared by both wildcard contexts
    pub const WILDCARD_ID: i64 = -1;

    /// Decode a raw group id as found on the wire
    pub fn from_raw(raw: i64) -> TenantryResult<Self> {
        match raw {
            Self::WILDCARD_ID => Ok(ContextGroup::AllGroups),
            id if id >= 0 => Ok(ContextGroup::Group(GroupId(id))),
            id => Err(validation_error!(
                format!("{} is not a valid context group", id),
                "context-group",
                "context"
            )),
        }
    }

    /// Parse the out-of-band `context-group` header value
    pub fn parse_header(value: &str) -> TenantryResult<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(ContextGroup::AllGroups);
        }
        if value.eq_ignore_ascii_case("shares") || value.eq_ignore_ascii_case("all_shares") {
            return Ok(ContextGroup::AllShares);
        }
        let raw = value.parse::<i64>().map_err(|_| {
            validation_error!(
                format!("'{}' is not a group id, ALL or SHARES", value),
                "context-group",
                "context"
            )
        })?;
        Self::from_raw(raw)
    }

    pub fn raw_id(&self) -> i64 {
        match self {
            ContextGroup::Group(group) => group.0,
            ContextGroup::AllGroups | ContextGroup::AllShares => Self::WILDCARD_ID,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        !matches!(self, ContextGroup::Group(_))
    }

    /// The concrete group, if the context is not a wildcard
    pub fn group(&self) -> Option<GroupId> {
        match self {
            ContextGroup::Group(group) => Some(*group),
            _ => None,
        }
    }

    /// True when objects of `group` fall inside this scope
    pub fn includes(&self, group: GroupId) -> bool {
        match self {
            ContextGroup::Group(current) => *current == group,
            ContextGroup::AllGroups | ContextGroup::AllShares => true,
        }
    }
}

impl fmt::Display for ContextGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextGroup::Group(group) => write!(f, "{}", group.0),
            ContextGroup::AllGroups => write!(f, "ALL"),
            ContextGroup::AllShares => write!(f, "SHARES"),
        }
    }
}

/// The active user and group of one session or call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub user: UserId,
    pub group: ContextGroup,
    pub session: SessionId,
}

impl SecurityContext {
    pub fn new(user: UserId, group: ContextGroup, session: SessionId) -> Self {
        Self {
            user,
            group,
            session,
        }
    }

    /// Same user and session, different scope
    pub fn with_group(&self, group: ContextGroup) -> Self {
        Self { group, ..*self }
    }
}

impl fmt::Display for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.user, self.group, self.session)
    }
}
