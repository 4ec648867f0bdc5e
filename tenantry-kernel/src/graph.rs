//! Graph consistency enforcement
//!
//! Every edge of the object graph must stay inside one group. The only
//! sanctioned crossing is a profile photo reference into the user group.
//!
//! The enforcer also owns the group reassignment protocol (chgrp). A move
//! runs in three phases:
//!
//! ```text
//! plan    walk the owned dependency graph from one snapshot version
//! check   every walked node and part edge must sit in the source group
//! commit  one batch, guarded by the snapshot version
//! ```
//!
//! Nothing is written before the commit, and the commit is all-or-nothing, so
//! a reader never sees a graph split across the source and destination.

use crate::principal::Principal;
use crate::registry::GroupRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tenantry_core::{
    graph_inconsistency, group_violation, not_found_error, security_violation, Details, GroupId,
    LinkId, LinkKind, Mutation, ObjectRef, ObjectStore, Permission, StoredLink, StoredObject,
    TenantryError, TenantryResult,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// Options recognised by [`GraphConsistencyEnforcer::chgrp`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovePolicy {
    /// Move annotations only reachable from the moved graph
    pub move_annotations: bool,
    /// Copy annotations that cannot be moved, keeping the original in place
    pub copy_annotations: bool,
    /// Unlink annotations that are neither moved nor copied
    pub unlink_annotations: bool,
    /// Pull parent containers into the move instead of unlinking from them
    pub include_containers: bool,
}

impl Default for MovePolicy {
    fn default() -> Self {
        Self {
            move_annotations: true,
            copy_annotations: false,
            unlink_annotations: true,
            include_containers: false,
        }
    }
}

/// An annotation copied into the destination group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedAnnotation {
    pub original: ObjectRef,
    pub copy: ObjectRef,
}

/// What a committed move changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveReport {
    pub root: ObjectRef,
    pub from: GroupId,
    pub to: GroupId,
    pub moved: Vec<ObjectRef>,
    pub moved_links: Vec<LinkId>,
    pub copied_annotations: Vec<CopiedAnnotation>,
    pub unlinked: Vec<LinkId>,
    /// Store version after the commit
    pub version: u64,
}

impl MoveReport {
    fn unchanged(root: ObjectRef, group: GroupId, version: u64) -> Self {
        Self {
            root,
            from: group,
            to: group,
            moved: Vec::new(),
            moved_links: Vec::new(),
            copied_annotations: Vec::new(),
            unlinked: Vec::new(),
            version,
        }
    }
}

/// What happens to one annotation hanging off the moved graph
enum AnnotationFate {
    Move,
    Copy,
    Unlink,
}

struct MovePlan {
    report: MoveReport,
    mutations: Vec<Mutation>,
}

pub struct GraphConsistencyEnforcer {
    store: Arc<dyn ObjectStore>,
    registry: Arc<GroupRegistry>,
    move_lock: Mutex<()>,
}

impl GraphConsistencyEnforcer {
    pub fn new(store: Arc<dyn ObjectStore>, registry: Arc<GroupRegistry>) -> Self {
        Self {
            store,
            registry,
            move_lock: Mutex::new(()),
        }
    }

    /// Check that a new edge from `source_group` into `target_group` keeps the
    /// graph consistent.
    pub fn validate_link(
        &self,
        source_group: GroupId,
        target_group: GroupId,
        kind: LinkKind,
    ) -> TenantryResult<()> {
        if source_group == target_group {
            return Ok(());
        }

        let reserved = self.registry.reserved();
        if kind == LinkKind::ProfilePhoto && target_group == reserved.user {
            return Ok(());
        }

        let err = security_violation!(
            format!(
                "{} link from {} into {} would cross a group boundary",
                kind, source_group, target_group
            ),
            "graph"
        );
        err.log();
        Err(err)
    }

    /// Atomically reassign `root` and its owned dependency graph to
    /// `destination`.
    pub async fn chgrp(
        &self,
        invoker: &Principal,
        root: &ObjectRef,
        destination: GroupId,
        policy: MovePolicy,
        cancel: &CancellationToken,
    ) -> TenantryResult<MoveReport> {
        let reserved = self.registry.reserved();
        let target = self.registry.group(destination).await?;

        if reserved.is_reserved(destination) {
            let err = security_violation!(
                format!(
                    "{} is reserved; objects reach the user group only through move_to_common_space",
                    target.name
                ),
                "chgrp"
            );
            err.log();
            return Err(err);
        }

        if !invoker.is_administrator() && !invoker.is_member_of(destination) {
            let err = group_violation!(
                format!("{} can only move data to a group they belong to", invoker),
                "chgrp"
            );
            err.log();
            return Err(err);
        }

        self.execute(invoker, root, destination, target.permission, policy, cancel)
            .instrument(info_span!("chgrp", root = %root, to = %destination))
            .await
    }

    /// Move `root` into the user group so it is visible from every context.
    ///
    /// Administrators only. Containment and annotation links that would cross
    /// into the user group are removed.
    pub async fn move_to_common_space(
        &self,
        invoker: &Principal,
        root: &ObjectRef,
        cancel: &CancellationToken,
    ) -> TenantryResult<MoveReport> {
        if !invoker.is_administrator() {
            let err = security_violation!(
                format!("{} may not move {} into the common space", invoker, root),
                "chgrp"
            );
            err.log();
            return Err(err);
        }

        let destination = self.registry.reserved().user;
        let target = self.registry.group(destination).await?;
        let policy = MovePolicy {
            move_annotations: false,
            copy_annotations: false,
            unlink_annotations: true,
            include_containers: false,
        };

        self.execute(invoker, root, destination, target.permission, policy, cancel)
            .instrument(info_span!("move_to_common_space", root = %root))
            .await
    }

    async fn execute(
        &self,
        invoker: &Principal,
        root: &ObjectRef,
        destination: GroupId,
        permission: Permission,
        policy: MovePolicy,
        cancel: &CancellationToken,
    ) -> TenantryResult<MoveReport> {
        let _guard = self.move_lock.lock().await;
        let version = self.store.version().await?;

        let plan = match self
            .plan(invoker, root, destination, permission, policy, version)
            .await
        {
            Ok(plan) => plan,
            Err(err) => {
                err.log();
                return Err(err);
            }
        };

        if plan.mutations.is_empty() {
            return Ok(plan.report);
        }

        // Last point at which the caller may back out
        if cancel.is_cancelled() {
            let err = TenantryError::Cancelled {
                operation: format!("chgrp {}", root),
            };
            err.log();
            return Err(err);
        }

        let mut report = plan.report;
        report.version = self.store.commit(version, plan.mutations).await?;

        info!(
            target: "audit",
            user = %invoker.user_id,
            root = %report.root,
            from = %report.from,
            to = %report.to,
            moved = report.moved.len(),
            copied = report.copied_annotations.len(),
            unlinked = report.unlinked.len(),
            "Group reassignment committed"
        );
        Ok(report)
    }

    async fn load(&self, reference: &ObjectRef) -> TenantryResult<StoredObject> {
        self.store
            .object(reference)
            .await?
            .ok_or_else(|| not_found_error!(reference, "chgrp"))
    }

    /// Load the far end of an existing edge. A missing row is a store fault.
    async fn load_linked(&self, link: &StoredLink, reference: &ObjectRef) -> TenantryResult<StoredObject> {
        self.store.object(reference).await?.ok_or_else(|| {
            graph_inconsistency!(
                format!("{} points at missing {}", link.id, reference),
                "chgrp"
            )
        })
    }

    async fn plan(
        &self,
        invoker: &Principal,
        root: &ObjectRef,
        destination: GroupId,
        permission: Permission,
        policy: MovePolicy,
        version: u64,
    ) -> TenantryResult<MovePlan> {
        let root_object = self.load(root).await?;
        if !invoker.is_administrator() && root_object.details.owner != invoker.user_id {
            return Err(security_violation!(
                format!("{} is neither owner of {} nor an administrator", invoker, root),
                "chgrp"
            ));
        }

        let source = root_object.details.group;
        if source == destination {
            return Ok(MovePlan {
                report: MoveReport::unchanged(root.clone(), source, version),
                mutations: Vec::new(),
            });
        }

        let nodes = self
            .walk(invoker, root_object, source, policy.include_containers)
            .await?;

        let retag = |details: &Details| Details::new(details.owner, destination, permission);
        let mut mutations = Vec::new();
        let mut report = MoveReport {
            root: root.clone(),
            from: source,
            to: destination,
            moved: nodes.keys().cloned().collect(),
            moved_links: Vec::new(),
            copied_annotations: Vec::new(),
            unlinked: Vec::new(),
            version,
        };

        for node in nodes.values() {
            mutations.push(Mutation::SetDetails {
                target: node.reference.clone(),
                details: retag(&node.details),
            });
        }

        let mut moved_links = BTreeSet::new();
        let mut unlinked = BTreeSet::new();
        let mut annotations: BTreeMap<ObjectRef, Vec<StoredLink>> = BTreeMap::new();

        for reference in nodes.keys() {
            for link in self.store.links_from(reference).await? {
                if nodes.contains_key(&link.child) {
                    moved_links.insert(link.id);
                    continue;
                }
                match link.kind {
                    LinkKind::Annotation => {
                        annotations.entry(link.child.clone()).or_default().push(link);
                    }
                    LinkKind::ProfilePhoto => {
                        // Photos live in the user group, so this edge stays
                        // sanctioned wherever its parent goes
                        moved_links.insert(link.id);
                    }
                    LinkKind::Part | LinkKind::Containment => {
                        return Err(graph_inconsistency!(
                            format!("{} escaped the dependency walk from {}", link.child, root),
                            "chgrp"
                        ));
                    }
                }
            }

            for link in self.store.links_to(reference).await? {
                if nodes.contains_key(&link.parent) {
                    continue;
                }
                match link.kind {
                    LinkKind::Containment => {
                        unlinked.insert(link.id);
                    }
                    LinkKind::Annotation if policy.unlink_annotations => {
                        unlinked.insert(link.id);
                    }
                    LinkKind::Annotation => {
                        return Err(security_violation!(
                            format!(
                                "{} is annotating {} outside the move; enable unlinking",
                                reference, link.parent
                            ),
                            "chgrp"
                        ));
                    }
                    LinkKind::ProfilePhoto if destination == self.registry.reserved().user => {}
                    LinkKind::ProfilePhoto => {
                        unlinked.insert(link.id);
                    }
                    LinkKind::Part => {
                        return Err(security_violation!(
                            format!(
                                "{} is an owned part of {}; move the parent instead",
                                reference, link.parent
                            ),
                            "chgrp"
                        ));
                    }
                }
            }
        }

        for (annotation, links) in annotations {
            let object = self.load_linked(&links[0], &annotation).await?;
            if object.details.group != source {
                return Err(graph_inconsistency!(
                    format!(
                        "{} is in {} but annotates objects in {}",
                        annotation, object.details.group, source
                    ),
                    "chgrp"
                ));
            }

            match self.annotation_fate(invoker, &object, &nodes, policy).await? {
                AnnotationFate::Move => {
                    mutations.push(Mutation::SetDetails {
                        target: annotation.clone(),
                        details: retag(&object.details),
                    });
                    moved_links.extend(links.iter().map(|l| l.id));
                    report.moved.push(annotation);
                }
                AnnotationFate::Copy => {
                    let copy = ObjectRef::new(annotation.kind.clone(), self.store.reserve_id().await?);
                    mutations.push(Mutation::InsertObject(StoredObject {
                        reference: copy.clone(),
                        name: object.name.clone(),
                        details: retag(&object.details),
                    }));
                    for link in &links {
                        mutations.push(Mutation::RemoveLink(link.id));
                        mutations.push(Mutation::InsertLink(StoredLink {
                            id: LinkId(self.store.reserve_id().await?),
                            parent: link.parent.clone(),
                            child: copy.clone(),
                            kind: LinkKind::Annotation,
                            details: retag(&link.details),
                        }));
                    }
                    report.copied_annotations.push(CopiedAnnotation {
                        original: annotation,
                        copy,
                    });
                }
                AnnotationFate::Unlink => {
                    unlinked.extend(links.iter().map(|l| l.id));
                }
            }
        }

        for id in &moved_links {
            let link = self
                .store
                .link(*id)
                .await?
                .ok_or_else(|| graph_inconsistency!(format!("{} vanished during the walk", id), "chgrp"))?;
            mutations.push(Mutation::SetLinkDetails {
                link: *id,
                details: retag(&link.details),
            });
        }
        for id in &unlinked {
            mutations.push(Mutation::RemoveLink(*id));
        }

        report.moved_links = moved_links.into_iter().collect();
        report.unlinked = unlinked.into_iter().collect();

        debug!(
            nodes = report.moved.len(),
            links = report.moved_links.len(),
            mutations = mutations.len(),
            "Move planned"
        );
        Ok(MovePlan { report, mutations })
    }

    /// Collect the nodes that travel with `root`: its parts, the content of
    /// moved containers and, when requested, the containers holding them.
    async fn walk(
        &self,
        invoker: &Principal,
        root: StoredObject,
        source: GroupId,
        include_containers: bool,
    ) -> TenantryResult<BTreeMap<ObjectRef, StoredObject>> {
        let mut nodes = BTreeMap::new();
        let mut queue = VecDeque::from([root]);

        while let Some(node) = queue.pop_front() {
            if nodes.contains_key(&node.reference) {
                continue;
            }
            if node.details.group != source {
                return Err(graph_inconsistency!(
                    format!(
                        "{} is in {} while its graph is rooted in {}",
                        node.reference, node.details.group, source
                    ),
                    "chgrp"
                ));
            }
            if !invoker.is_administrator() && node.details.owner != invoker.user_id {
                return Err(security_violation!(
                    format!("{} does not own {}", invoker, node.reference),
                    "chgrp"
                ));
            }

            for link in self.store.links_from(&node.reference).await? {
                if !matches!(link.kind, LinkKind::Part | LinkKind::Containment) {
                    continue;
                }
                if link.details.group != source {
                    return Err(graph_inconsistency!(
                        format!("{} is in {} while {} is in {}", link.id, link.details.group, node.reference, source),
                        "chgrp"
                    ));
                }
                if !nodes.contains_key(&link.child) {
                    queue.push_back(self.load_linked(&link, &link.child).await?);
                }
            }

            if include_containers {
                for link in self.store.links_to(&node.reference).await? {
                    if link.kind == LinkKind::Containment && !nodes.contains_key(&link.parent) {
                        queue.push_back(self.load_linked(&link, &link.parent).await?);
                    }
                }
            }

            nodes.insert(node.reference.clone(), node);
        }

        Ok(nodes)
    }

    async fn annotation_fate(
        &self,
        invoker: &Principal,
        annotation: &StoredObject,
        nodes: &BTreeMap<ObjectRef, StoredObject>,
        policy: MovePolicy,
    ) -> TenantryResult<AnnotationFate> {
        let incoming = self.store.links_to(&annotation.reference).await?;
        let shared = incoming.iter().any(|l| !nodes.contains_key(&l.parent));
        let has_children = !self.store.links_from(&annotation.reference).await?.is_empty();
        let may_move = invoker.is_administrator() || annotation.details.owner == invoker.user_id;

        if policy.move_annotations && !shared && !has_children && may_move {
            return Ok(AnnotationFate::Move);
        }
        if policy.copy_annotations {
            return Ok(AnnotationFate::Copy);
        }
        if policy.unlink_annotations {
            return Ok(AnnotationFate::Unlink);
        }

        Err(security_violation!(
            format!(
                "{} would be left linked across groups; allow copying or unlinking",
                annotation.reference
            ),
            "chgrp"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use tenantry_core::{ReservedConfig, UserId};

    struct Fixture {
        store: Arc<MemoryObjectStore>,
        registry: Arc<GroupRegistry>,
        enforcer: GraphConsistencyEnforcer,
        lab: GroupId,
        other: GroupId,
        ana: UserId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryObjectStore::new());
        let registry = Arc::new(GroupRegistry::new(&ReservedConfig::default()));
        let (lab, other, ana) = {
            let mut state = registry.write().await;
            let lab = state.insert_group("lab", Permission::PRIVATE, false).unwrap();
            let other = state.insert_group("other", Permission::GROUP_READABLE, false).unwrap();
            let ana = state.insert_experimenter("ana", None).unwrap();
            state.set_membership(ana, lab, false);
            state.set_membership(ana, other, false);
            (lab, other, ana)
        };
        let enforcer = GraphConsistencyEnforcer::new(store.clone(), registry.clone());
        Fixture {
            store,
            registry,
            enforcer,
            lab,
            other,
            ana,
        }
    }

    fn object(kind: &str, id: i64, owner: UserId, group: GroupId) -> Mutation {
        Mutation::InsertObject(StoredObject {
            reference: ObjectRef::new(kind, id),
            name: format!("{}-{}", kind.to_lowercase(), id),
            details: Details::new(owner, group, Permission::PRIVATE),
        })
    }

    fn link(id: i64, parent: (&str, i64), child: (&str, i64), kind: LinkKind, owner: UserId, group: GroupId) -> Mutation {
        Mutation::InsertLink(StoredLink {
            id: LinkId(id),
            parent: ObjectRef::new(parent.0, parent.1),
            child: ObjectRef::new(child.0, child.1),
            kind,
            details: Details::new(owner, group, Permission::PRIVATE),
        })
    }

    async fn seed(store: &MemoryObjectStore, mutations: Vec<Mutation>) {
        let version = store.version().await.unwrap();
        store.commit(version, mutations).await.unwrap();
    }

    async fn group_of(store: &MemoryObjectStore, kind: &str, id: i64) -> GroupId {
        store
            .object(&ObjectRef::new(kind, id))
            .await
            .unwrap()
            .unwrap()
            .details
            .group
    }

    #[test]
    fn links_must_stay_inside_one_group() {
        let store = Arc::new(MemoryObjectStore::new());
        let registry = Arc::new(GroupRegistry::new(&ReservedConfig::default()));
        let enforcer = GraphConsistencyEnforcer::new(store, registry);

        assert!(enforcer.validate_link(GroupId(5), GroupId(5), LinkKind::Part).is_ok());
        assert!(enforcer
            .validate_link(GroupId(5), GroupId(1), LinkKind::ProfilePhoto)
            .is_ok());

        let err = enforcer
            .validate_link(GroupId(5), GroupId(6), LinkKind::Annotation)
            .unwrap_err();
        assert!(matches!(err, TenantryError::SecurityViolation { .. }));
        assert!(enforcer
            .validate_link(GroupId(5), GroupId(1), LinkKind::Annotation)
            .is_err());
        assert!(enforcer
            .validate_link(GroupId(5), GroupId(0), LinkKind::ProfilePhoto)
            .is_err());
    }

    #[tokio::test]
    async fn chgrp_moves_owned_parts_together() {
        let f = fixture().await;
        seed(
            &f.store,
            vec![
                object("Image", 1, f.ana, f.lab),
                object("Pixels", 2, f.ana, f.lab),
                link(3, ("Image", 1), ("Pixels", 2), LinkKind::Part, f.ana, f.lab),
            ],
        )
        .await;

        let ana = f.registry.principal(f.ana).await.unwrap();
        let report = f
            .enforcer
            .chgrp(
                &ana,
                &ObjectRef::new("Image", 1),
                f.other,
                MovePolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.from, f.lab);
        assert_eq!(report.to, f.other);
        assert_eq!(report.moved.len(), 2);
        assert_eq!(report.moved_links, vec![LinkId(3)]);
        assert_eq!(group_of(&f.store, "Image", 1).await, f.other);
        assert_eq!(group_of(&f.store, "Pixels", 2).await, f.other);

        let pixels = f.store.object(&ObjectRef::new("Pixels", 2)).await.unwrap().unwrap();
        assert_eq!(pixels.details.permission, Permission::GROUP_READABLE);
        let part = f.store.link(LinkId(3)).await.unwrap().unwrap();
        assert_eq!(part.details.group, f.other);
    }

    #[tokio::test]
    async fn chgrp_of_a_part_alone_is_refused() {
        let f = fixture().await;
        seed(
            &f.store,
            vec![
                object("Image", 1, f.ana, f.lab),
                object("Pixels", 2, f.ana, f.lab),
                link(3, ("Image", 1), ("Pixels", 2), LinkKind::Part, f.ana, f.lab),
            ],
        )
        .await;

        let ana = f.registry.principal(f.ana).await.unwrap();
        let err = f
            .enforcer
            .chgrp(
                &ana,
                &ObjectRef::new("Pixels", 2),
                f.other,
                MovePolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TenantryError::SecurityViolation { .. }));
        assert_eq!(group_of(&f.store, "Pixels", 2).await, f.lab);
    }

    #[tokio::test]
    async fn split_graph_is_a_graph_inconsistency() {
        let f = fixture().await;
        seed(
            &f.store,
            vec![
                object("Image", 1, f.ana, f.lab),
                object("Pixels", 2, f.ana, f.other),
                link(3, ("Image", 1), ("Pixels", 2), LinkKind::Part, f.ana, f.lab),
            ],
        )
        .await;

        let ana = f.registry.principal(f.ana).await.unwrap();
        let err = f
            .enforcer
            .chgrp(
                &ana,
                &ObjectRef::new("Image", 1),
                f.other,
                MovePolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(group_of(&f.store, "Image", 1).await, f.lab);
    }

    #[tokio::test]
    async fn cancelled_move_writes_nothing() {
        let f = fixture().await;
        seed(&f.store, vec![object("Image", 1, f.ana, f.lab)]).await;
        let version = f.store.version().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let ana = f.registry.principal(f.ana).await.unwrap();
        let err = f
            .enforcer
            .chgrp(&ana, &ObjectRef::new("Image", 1), f.other, MovePolicy::default(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, TenantryError::Cancelled { .. }));
        assert_eq!(f.store.version().await.unwrap(), version);
        assert_eq!(group_of(&f.store, "Image", 1).await, f.lab);
    }

    #[tokio::test]
    async fn shared_annotation_is_copied_or_unlinked() {
        let f = fixture().await;
        seed(
            &f.store,
            vec![
                object("Image", 1, f.ana, f.lab),
                object("Image", 2, f.ana, f.lab),
                object("TagAnnotation", 3, f.ana, f.lab),
                link(4, ("Image", 1), ("TagAnnotation", 3), LinkKind::Annotation, f.ana, f.lab),
                link(5, ("Image", 2), ("TagAnnotation", 3), LinkKind::Annotation, f.ana, f.lab),
            ],
        )
        .await;
        let ana = f.registry.principal(f.ana).await.unwrap();

        let refused = f
            .enforcer
            .chgrp(
                &ana,
                &ObjectRef::new("Image", 1),
                f.other,
                MovePolicy {
                    move_annotations: true,
                    copy_annotations: false,
                    unlink_annotations: false,
                    include_containers: false,
                },
                &CancellationToken::new(),
            )
            .await;
        assert!(refused.is_err());

        let report = f
            .enforcer
            .chgrp(
                &ana,
                &ObjectRef::new("Image", 1),
                f.other,
                MovePolicy {
                    copy_annotations: true,
                    ..MovePolicy::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.copied_annotations.len(), 1);
        let copy = &report.copied_annotations[0].copy;
        let copied = f.store.object(copy).await.unwrap().unwrap();
        assert_eq!(copied.details.group, f.other);
        assert_eq!(group_of(&f.store, "TagAnnotation", 3).await, f.lab);
        assert!(f.store.link(LinkId(4)).await.unwrap().is_none());
        assert!(f.store.link(LinkId(5)).await.unwrap().is_some());
        assert_eq!(f.store.links_to(copy).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn containers_are_unlinked_unless_included() {
        let f = fixture().await;
        seed(
            &f.store,
            vec![
                object("Dataset", 1, f.ana, f.lab),
                object("Image", 2, f.ana, f.lab),
                link(3, ("Dataset", 1), ("Image", 2), LinkKind::Containment, f.ana, f.lab),
            ],
        )
        .await;
        let ana = f.registry.principal(f.ana).await.unwrap();

        let report = f
            .enforcer
            .chgrp(
                &ana,
                &ObjectRef::new("Image", 2),
                f.other,
                MovePolicy::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.unlinked, vec![LinkId(3)]);
        assert_eq!(group_of(&f.store, "Dataset", 1).await, f.lab);

        seed(
            &f.store,
            vec![
                object("Dataset", 10, f.ana, f.lab),
                object("Image", 11, f.ana, f.lab),
                link(12, ("Dataset", 10), ("Image", 11), LinkKind::Containment, f.ana, f.lab),
            ],
        )
        .await;
        let report = f
            .enforcer
            .chgrp(
                &ana,
                &ObjectRef::new("Image", 11),
                f.other,
                MovePolicy {
                    include_containers: true,
                    ..MovePolicy::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(report.unlinked.is_empty());
        assert_eq!(group_of(&f.store, "Dataset", 10).await, f.other);
    }

    #[tokio::test]
    async fn destination_rules() {
        let f = fixture().await;
        seed(&f.store, vec![object("Image", 1, f.ana, f.lab)]).await;
        let ana = f.registry.principal(f.ana).await.unwrap();
        let stranger = {
            let mut state = f.registry.write().await;
            state.insert_group("stranger", Permission::PRIVATE, false).unwrap()
        };
        let cancel = CancellationToken::new();
        let image = ObjectRef::new("Image", 1);

        let err = f
            .enforcer
            .chgrp(&ana, &image, stranger, MovePolicy::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantryError::GroupSecurityViolation { .. }));

        let reserved = f.registry.reserved();
        assert!(f
            .enforcer
            .chgrp(&ana, &image, reserved.user, MovePolicy::default(), &cancel)
            .await
            .is_err());
        assert!(f.enforcer.move_to_common_space(&ana, &image, &cancel).await.is_err());

        let root = f.registry.principal(f.registry.root()).await.unwrap();
        let report = f.enforcer.move_to_common_space(&root, &image, &cancel).await.unwrap();
        assert_eq!(report.to, reserved.user);
        assert_eq!(group_of(&f.store, "Image", 1).await, reserved.user);
    }
}
