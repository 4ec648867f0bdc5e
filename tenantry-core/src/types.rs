//! Core data type definitions

use crate::permission::Permission;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Experimenter (user) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// ExperimenterGroup identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub i64);

/// Identifier of a link row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group:{}", self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link:{}", self.0)
    }
}

/// Typed reference to a persisted object, e.g. `Image:12`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub id: i64,
}

impl ObjectRef {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Ownership triple carried by every securable row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Details {
    pub owner: UserId,
    pub group: GroupId,
    pub permission: Permission,
}

impl Details {
    pub fn new(owner: UserId, group: GroupId, permission: Permission) -> Self {
        Self {
            owner,
            group,
            permission,
        }
    }
}

/// Access requested on a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Right {
    /// Read the object
    Read,
    /// Edit existing core fields
    Write,
    /// Create a new relationship or annotation pointing at the object
    Link,
    /// Delete the object
    Delete,
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Right::Read => write!(f, "read"),
            Right::Write => write!(f, "write"),
            Right::Link => write!(f, "link"),
            Right::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for Right {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "read" => Ok(Right::Read),
            "write" | "edit" => Ok(Right::Write),
            "link" | "annotate" => Ok(Right::Link),
            "delete" => Ok(Right::Delete),
            _ => Err(format!("Unknown right: {}", s)),
        }
    }
}

/// Role a principal holds for one group, resolved once per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Owner,
    Administrator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Member => write!(f, "member"),
            Role::Owner => write!(f, "owner"),
            Role::Administrator => write!(f, "administrator"),
        }
    }
}

/// Edge type between two objects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Owned dependency, always travels with its parent (e.g. Image -> Pixels)
    Part,
    /// Container content (e.g. Dataset -> Image)
    Containment,
    /// Annotation attached to an object
    Annotation,
    /// Reference from any group into the user group's profile photos
    ProfilePhoto,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkKind::Part => write!(f, "part"),
            LinkKind::Containment => write!(f, "containment"),
            LinkKind::Annotation => write!(f, "annotation"),
            LinkKind::ProfilePhoto => write!(f, "profile_photo"),
        }
    }
}

impl std::str::FromStr for LinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "part" => Ok(LinkKind::Part),
            "containment" => Ok(LinkKind::Containment),
            "annotation" => Ok(LinkKind::Annotation),
            "profile_photo" => Ok(LinkKind::ProfilePhoto),
            _ => Err(format!("Unknown link kind: {}", s)),
        }
    }
}

/// A persisted securable object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub reference: ObjectRef,
    pub name: String,
    pub details: Details,
}

/// A persisted directed edge, itself a securable row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLink {
    pub id: LinkId,
    pub parent: ObjectRef,
    pub child: ObjectRef,
    pub kind: LinkKind,
    pub details: Details,
}
