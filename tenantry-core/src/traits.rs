//! Collaborator trait definitions
//!
//! The kernel never owns persistence or credential checks. It talks to them
//! through the traits below.

use crate::error::TenantryResult;
use crate::types::*;
use async_trait::async_trait;

/// A single change applied by [`ObjectStore::commit`]
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    InsertObject(StoredObject),
    InsertLink(StoredLink),
    RemoveObject(ObjectRef),
    RemoveLink(LinkId),
    Rename { target: ObjectRef, name: String },
    SetDetails { target: ObjectRef, details: Details },
    SetLinkDetails { link: LinkId, details: Details },
}

/// Opaque persistence layer.
///
/// Reads are snapshot reads. `commit` is the transaction boundary: it either
/// applies every mutation of the batch or none of them, and refuses the batch
/// when the store moved past `expected_version` in the meantime.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Monotonic version, bumped by every successful commit
    async fn version(&self) -> TenantryResult<u64>;

    async fn object(&self, reference: &ObjectRef) -> TenantryResult<Option<StoredObject>>;

    async fn link(&self, id: LinkId) -> TenantryResult<Option<StoredLink>>;

    /// Links whose parent is `reference`
    async fn links_from(&self, reference: &ObjectRef) -> TenantryResult<Vec<StoredLink>>;

    /// Links whose child is `reference`
    async fn links_to(&self, reference: &ObjectRef) -> TenantryResult<Vec<StoredLink>>;

    async fn objects_in_group(&self, group: GroupId) -> TenantryResult<Vec<StoredObject>>;

    async fn links_in_group(&self, group: GroupId) -> TenantryResult<Vec<StoredLink>>;

    async fn count_owned_by(&self, owner: UserId) -> TenantryResult<usize>;

    /// Reserve a fresh row id. Reservations are not visible state.
    async fn reserve_id(&self) -> TenantryResult<i64>;

    /// Apply the whole batch atomically, returning the new version
    async fn commit(&self, expected_version: u64, mutations: Vec<Mutation>) -> TenantryResult<u64>;
}

/// Credential checks are delegated; the kernel never sees password hashes.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> TenantryResult<bool>;
}
