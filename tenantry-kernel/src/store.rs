//! In-memory object store
//!
//! Reference implementation of [`ObjectStore`] used by tests, the CLI and
//! embedders without a database. A commit stages the batch on a copy of the
//! state and swaps it in only when every mutation applied cleanly, so readers
//! never observe a half-applied batch.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tenantry_core::{
    not_found_error, validation_error, ErrorContext, GroupId, LinkId, Mutation,
    ObjectRef, ObjectStore, StoredLink, StoredObject, TenantryError, TenantryResult, UserId,
};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct StoreState {
    version: u64,
    objects: BTreeMap<ObjectRef, StoredObject>,
    links: BTreeMap<LinkId, StoredLink>,
}

impl StoreState {
    fn apply(&mut self, mutation: Mutation) -> TenantryResult<()> {
        match mutation {
            Mutation::InsertObject(object) => {
                if self.objects.contains_key(&object.reference) {
                    return Err(validation_error!(
                        format!("{} already exists", object.reference),
                        "reference",
                        "memory-store"
                    ));
                }
                self.objects.insert(object.reference.clone(), object);
            }
            Mutation::InsertLink(link) => {
                if self.links.contains_key(&link.id) {
                    return Err(validation_error!(
                        format!("{} already exists", link.id),
                        "id",
                        "memory-store"
                    ));
                }
                for end in [&link.parent, &link.child] {
                    if !self.objects.contains_key(end) {
                        return Err(not_found_error!(end, "memory-store"));
                    }
                }
                self.links.insert(link.id, link);
            }
            Mutation::RemoveObject(reference) => {
                if self.objects.remove(&reference).is_none() {
                    return Err(not_found_error!(reference, "memory-store"));
                }
                if let Some(link) = self
                    .links
                    .values()
                    .find(|l| l.parent == reference || l.child == reference)
                {
                    return Err(validation_error!(
                        format!("{} is still referenced by {}", reference, link.id),
                        "reference",
                        "memory-store"
                    ));
                }
            }
            Mutation::RemoveLink(id) => {
                if self.links.remove(&id).is_none() {
                    return Err(not_found_error!(id, "memory-store"));
                }
            }
            Mutation::Rename { target, name } => {
                let object = self
                    .objects
                    .get_mut(&target)
                    .ok_or_else(|| not_found_error!(target, "memory-store"))?;
                object.name = name;
            }
            Mutation::SetDetails { target, details } => {
                let object = self
                    .objects
                    .get_mut(&target)
                    .ok_or_else(|| not_found_error!(target, "memory-store"))?;
                object.details = details;
            }
            Mutation::SetLinkDetails { link, details } => {
                let entry = self
                    .links
                    .get_mut(&link)
                    .ok_or_else(|| not_found_error!(link, "memory-store"))?;
                entry.details = details;
            }
        }
        Ok(())
    }
}

pub struct MemoryObjectStore {
    state: RwLock<StoreState>,
    next_id: AtomicI64,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn object_count(&self) -> usize {
        self.state.read().await.objects.len()
    }

    pub async fn link_count(&self) -> usize {
        self.state.read().await.links.len()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn version(&self) -> TenantryResult<u64> {
        Ok(self.state.read().await.version)
    }

    async fn object(&self, reference: &ObjectRef) -> TenantryResult<Option<StoredObject>> {
        Ok(self.state.read().await.objects.get(reference).cloned())
    }

    async fn link(&self, id: LinkId) -> TenantryResult<Option<StoredLink>> {
        Ok(self.state.read().await.links.get(&id).cloned())
    }

    async fn links_from(&self, reference: &ObjectRef) -> TenantryResult<Vec<StoredLink>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .values()
            .filter(|l| &l.parent == reference)
            .cloned()
            .collect())
    }

    async fn links_to(&self, reference: &ObjectRef) -> TenantryResult<Vec<StoredLink>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .values()
            .filter(|l| &l.child == reference)
            .cloned()
            .collect())
    }

    async fn objects_in_group(&self, group: GroupId) -> TenantryResult<Vec<StoredObject>> {
        let state = self.state.read().await;
        Ok(state
            .objects
            .values()
            .filter(|o| o.details.group == group)
            .cloned()
            .collect())
    }

    async fn links_in_group(&self, group: GroupId) -> TenantryResult<Vec<StoredLink>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .values()
            .filter(|l| l.details.group == group)
            .cloned()
            .collect())
    }

    async fn count_owned_by(&self, owner: UserId) -> TenantryResult<usize> {
        let state = self.state.read().await;
        let objects = state.objects.values().filter(|o| o.details.owner == owner).count();
        let links = state.links.values().filter(|l| l.details.owner == owner).count();
        Ok(objects + links)
    }

    async fn reserve_id(&self) -> TenantryResult<i64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn commit(&self, expected_version: u64, mutations: Vec<Mutation>) -> TenantryResult<u64> {
        let mut state = self.state.write().await;
        if state.version != expected_version {
            return Err(TenantryError::StoreConflict {
                expected: expected_version,
                actual: state.version,
                context: ErrorContext::new("memory-store").with_operation("commit"),
            });
        }

        let count = mutations.len();
        let mut staged = state.clone();
        for mutation in mutations {
            staged.apply(mutation)?;
        }
        staged.version += 1;
        *state = staged;

        debug!(version = state.version, mutations = count, "Committed batch");
        Ok(state.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::{Details, LinkKind, Permission};

    fn object(id: i64, group: i64) -> StoredObject {
        StoredObject {
            reference: ObjectRef::new("Image", id),
            name: format!("image-{}", id),
            details: Details::new(UserId(5), GroupId(group), Permission::PRIVATE),
        }
    }

    #[tokio::test]
    async fn commit_bumps_version() {
        let store = MemoryObjectStore::new();
        let version = store.version().await.unwrap();
        let next = store
            .commit(version, vec![Mutation::InsertObject(object(1, 2))])
            .await
            .unwrap();
        assert_eq!(next, version + 1);
        assert_eq!(store.objects_in_group(GroupId(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_batch_leaves_state_untouched() {
        let store = MemoryObjectStore::new();
        store
            .commit(0, vec![Mutation::InsertObject(object(1, 2))])
            .await
            .unwrap();

        let result = store
            .commit(
                1,
                vec![
                    Mutation::SetDetails {
                        target: ObjectRef::new("Image", 1),
                        details: Details::new(UserId(5), GroupId(3), Permission::PRIVATE),
                    },
                    Mutation::RemoveLink(LinkId(99)),
                ],
            )
            .await;

        assert!(result.is_err());
        assert_eq!(store.version().await.unwrap(), 1);
        let image = store.object(&ObjectRef::new("Image", 1)).await.unwrap().unwrap();
        assert_eq!(image.details.group, GroupId(2));
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let store = MemoryObjectStore::new();
        store
            .commit(0, vec![Mutation::InsertObject(object(1, 2))])
            .await
            .unwrap();
        let err = store
            .commit(0, vec![Mutation::InsertObject(object(2, 2))])
            .await
            .unwrap_err();
        assert!(matches!(err, TenantryError::StoreConflict { expected: 0, actual: 1, .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn referenced_objects_cannot_be_removed() {
        let store = MemoryObjectStore::new();
        let link = StoredLink {
            id: LinkId(10),
            parent: ObjectRef::new("Image", 1),
            child: ObjectRef::new("Image", 2),
            kind: LinkKind::Annotation,
            details: Details::new(UserId(5), GroupId(2), Permission::PRIVATE),
        };
        store
            .commit(
                0,
                vec![
                    Mutation::InsertObject(object(1, 2)),
                    Mutation::InsertObject(object(2, 2)),
                    Mutation::InsertLink(link),
                ],
            )
            .await
            .unwrap();

        assert!(store
            .commit(1, vec![Mutation::RemoveObject(ObjectRef::new("Image", 2))])
            .await
            .is_err());
        assert_eq!(store.link_count().await, 1);
        assert_eq!(store.links_to(&ObjectRef::new("Image", 2)).await.unwrap().len(), 1);
    }
}
