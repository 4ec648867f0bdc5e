//! Sessions driving the object service

mod common;

use common::{Fixture, PASSWORD};
use tenantry_kernel::tenantry_core::{Permission, Right, TenantryError};
use tenantry_kernel::{ContextGroup, NewGroup};

#[tokio::test]
async fn context_group_header_widens_a_single_call() {
    let f = Fixture::new();
    let lab = f.group("lab", Permission::GROUP_READABLE).await;
    let other = f.group("other", Permission::GROUP_READABLE).await;
    let ana = f.user("ana", lab).await;
    f.join(ana, other).await;
    let sessions = f.kernel.sessions();
    let objects = f.kernel.objects();

    let login = sessions.login("ana", PASSWORD).await.unwrap();
    assert_eq!(login.user, ana);
    assert_eq!(login.group, ContextGroup::Group(lab));

    let in_other = sessions
        .use_group(login.session, ContextGroup::Group(other))
        .await
        .unwrap();
    objects.create_object(&in_other, "Image", "b").await.unwrap();
    sessions
        .use_group(login.session, ContextGroup::Group(lab))
        .await
        .unwrap();
    let current = sessions.context_for(login.session, None).await.unwrap();
    objects.create_object(&current, "Image", "a").await.unwrap();

    assert_eq!(objects.list(&current, Some("Image")).await.unwrap().len(), 1);

    let wide = sessions.context_for(login.session, Some("-1")).await.unwrap();
    assert!(wide.group.is_wildcard());
    assert_eq!(objects.list(&wide, Some("Image")).await.unwrap().len(), 2);

    // Wildcard contexts cannot create data
    let err = objects.create_object(&wide, "Image", "c").await.unwrap_err();
    assert!(matches!(err, TenantryError::Validation { .. }));
}

#[tokio::test]
async fn sudo_carries_only_the_target_memberships() {
    let f = Fixture::new();
    let lab = f.group("lab", Permission::PRIVATE).await;
    let other = f.group("other", Permission::PRIVATE).await;
    let ana = f.user("ana", lab).await;
    let ben = f.user("ben", other).await;
    let sessions = f.kernel.sessions();
    let objects = f.kernel.objects();

    let bens_image = objects
        .create_object(&f.context(ben, other).await, "Image", "b")
        .await
        .unwrap();

    let root = sessions.login("root", PASSWORD).await.unwrap();
    let as_ana = sessions.sudo(root.session, "ana").await.unwrap();
    assert_eq!(as_ana.user, ana);

    let err = objects.get(&as_ana, &bens_image).await.unwrap_err();
    assert!(err.is_security_violation());
    assert!(sessions
        .use_group(as_ana.session, ContextGroup::Group(other))
        .await
        .is_err());

    let ana_session = sessions.login("ana", PASSWORD).await.unwrap();
    assert!(sessions.sudo(ana_session.session, "ben").await.is_err());
}

#[tokio::test]
async fn closed_sessions_are_refused_everywhere() {
    let f = Fixture::new();
    let lab = f.group("lab", Permission::PRIVATE).await;
    f.user("ana", lab).await;
    let sessions = f.kernel.sessions();
    let objects = f.kernel.objects();

    let root = sessions.login("root", PASSWORD).await.unwrap();
    let as_ana = sessions.sudo(root.session, "ana").await.unwrap();
    let image = objects.create_object(&as_ana, "Image", "a").await.unwrap();

    sessions.logout(as_ana.session).await.unwrap();

    let err = objects.create_object(&as_ana, "Image", "b").await.unwrap_err();
    assert!(err.is_security_violation());
    assert!(objects.get(&as_ana, &image).await.is_err());
    assert!(objects.rename(&as_ana, &image, "c").await.is_err());
    assert!(f.kernel.authorize(&as_ana, &image, Right::Read).await.is_err());

    // Closing the admin session revokes administration too
    sessions.logout(root.session).await.unwrap();
    let err = f
        .kernel
        .lifecycle()
        .create_group(&root, NewGroup::new("late", Permission::PRIVATE))
        .await
        .unwrap_err();
    assert!(err.is_security_violation());

    // The bootstrap root context stays usable
    f.kernel
        .lifecycle()
        .create_group(&f.root, NewGroup::new("late", Permission::PRIVATE))
        .await
        .unwrap();
}

#[tokio::test]
async fn experimenters_with_data_cannot_be_deleted() {
    let f = Fixture::new();
    let lab = f.group("lab", Permission::PRIVATE).await;
    let ana = f.user("ana", lab).await;
    let lifecycle = f.kernel.lifecycle();

    let image = f
        .kernel
        .objects()
        .create_object(&f.context(ana, lab).await, "Image", "a")
        .await
        .unwrap();

    let err = lifecycle.delete_experimenter(&f.root, ana).await.unwrap_err();
    assert!(matches!(err, TenantryError::Validation { .. }));

    f.kernel.objects().delete(&f.root, &image).await.unwrap();
    lifecycle.delete_experimenter(&f.root, ana).await.unwrap();
    assert!(f.kernel.sessions().login("ana", PASSWORD).await.is_err());

    lifecycle.delete_group(&f.root, lab).await.unwrap();
    assert!(lifecycle.members(lab).await.is_err());
}
