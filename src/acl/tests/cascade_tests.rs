//! Eager and reactive cascading, idempotence, resource deletion

mod common;

use common::*;
use cretoai_acl::{
    AccessFilter, AclError, Actions, AuthorizationQuery, AuthorizationStore, EngineConfig,
    EntityId, IdentityId, Resource, ResourceRole, Role, StaticRole,
};

#[tokio::test]
async fn test_eager_cascade_materializes_existing_instances() {
    let (engine, store) = setup(test_config()).await;
    for id in ["1", "2", "3"] {
        store.register_instance("Article", id).await;
    }
    let admin = IdentityId::new(ADMIN);

    let outcome = engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();

    assert_eq!(outcome.roots().count(), 2);
    assert_eq!(outcome.derived().count(), 3);

    let root = outcome
        .roots()
        .find(|a| a.resource == Resource::class("Article").unwrap())
        .unwrap();
    for child in outcome.derived() {
        assert_eq!(child.parent, Some(root.id));
        assert_eq!(child.actions, Actions::all());
        assert_eq!(child.role, root.role);
    }

    // Roots precede their children in the returned order
    let root_pos = outcome
        .authorizations
        .iter()
        .position(|a| a.id == root.id)
        .unwrap();
    assert!(outcome
        .authorizations
        .iter()
        .skip(root_pos + 1)
        .any(|a| a.parent == Some(root.id)));
    assert!(outcome.authorizations[..root_pos]
        .iter()
        .all(|a| a.parent != Some(root.id)));
}

#[tokio::test]
async fn test_reactive_only_configuration() {
    let config = EngineConfig {
        eager_cascade: false,
        ..test_config()
    };
    let (engine, store) = setup(config).await;
    store.register_instance("Article", "1").await;
    let admin = IdentityId::new(ADMIN);

    let outcome = engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();
    assert_eq!(outcome.derived().count(), 0);

    let stats = engine.resource_created(&article("1")).await.unwrap();
    assert_eq!(stats.planned, 1);
    assert_eq!(store.authorization_count().await, 3);
}

#[tokio::test]
async fn test_resource_created_is_idempotent() {
    let (engine, store) = setup(test_config()).await;
    let admin = IdentityId::new(ADMIN);
    engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();

    store.register_instance("Article", "99").await;
    let first = engine.resource_created(&article("99")).await.unwrap();
    let snapshot = store.authorizations().await;

    let second = engine.resource_created(&article("99")).await.unwrap();
    assert_eq!(first.planned, 1);
    assert_eq!(second.planned, 0);
    assert_eq!(second.skipped, 1);
    assert_eq!(snapshot, store.authorizations().await);
}

#[tokio::test]
async fn test_eager_then_reactive_does_not_duplicate() {
    let (engine, store) = setup(test_config()).await;
    store.register_instance("Article", "5").await;
    let admin = IdentityId::new(ADMIN);
    engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();
    let count = store.authorization_count().await;

    let stats = engine.resource_created(&article("5")).await.unwrap();
    assert_eq!(stats.planned, 0);
    assert_eq!(store.authorization_count().await, count);
}

#[tokio::test]
async fn test_resource_created_reaches_every_holder() {
    let (engine, store) = setup(test_config()).await;
    let admin = IdentityId::new(ADMIN);
    let alice = IdentityId::new(ALICE);

    engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();
    engine
        .grant(
            &alice,
            &Role::new(
                ALICE,
                ResourceRole::new("reader", Resource::class("Article").unwrap(), Actions::VIEW),
            ),
        )
        .await
        .unwrap();

    store.register_instance("Article", "8").await;
    let stats = engine.resource_created(&article("8")).await.unwrap();
    assert_eq!(stats.planned, 2);

    let on_entity = store
        .find(&cretoai_acl::AuthorizationQuery::for_resource(None, &article("8")))
        .await
        .unwrap();
    assert_eq!(on_entity.len(), 2);
    assert!(on_entity.iter().all(|a| a.is_derived()));
}

#[tokio::test]
async fn test_class_field_cascades_to_entity_fields() {
    let (engine, store) = setup(test_config()).await;
    store.register_instance("Article", "1").await;
    let alice = IdentityId::new(ALICE);

    let role = Role::new(
        ALICE,
        StaticRole::new("title_editor").allow(
            Resource::class_field("Article", "title").unwrap(),
            Actions::VIEW | Actions::EDIT,
        ),
    );
    let outcome = engine.grant(&alice, &role).await.unwrap();
    assert_eq!(outcome.derived().count(), 1);

    let title_1 = Resource::entity_field("Article", "1", "title").unwrap();
    let body_1 = Resource::entity_field("Article", "1", "body").unwrap();
    assert!(engine.is_allowed(&alice, Actions::EDIT, &title_1).await.unwrap());
    assert!(!engine.is_allowed(&alice, Actions::EDIT, &body_1).await.unwrap());

    // Field grants never reach the entity itself
    assert!(!engine.is_allowed(&alice, Actions::VIEW, &article("1")).await.unwrap());

    // A new entity gets the field cascade, so does a new field of it
    store.register_instance("Article", "2").await;
    let stats = engine.resource_created(&article("2")).await.unwrap();
    assert_eq!(stats.planned, 1);
    let title_2 = Resource::entity_field("Article", "2", "title").unwrap();
    let again = engine.resource_created(&title_2).await.unwrap();
    assert_eq!(again.planned, 0);
    assert!(engine.is_allowed(&alice, Actions::VIEW, &title_2).await.unwrap());
}

#[tokio::test]
async fn test_broad_resource_created_is_rejected() {
    let (engine, _) = setup(test_config()).await;
    let err = engine
        .resource_created(&Resource::class("Article").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, cretoai_acl::AclError::InvalidInput(_)));
}

#[tokio::test]
async fn test_resource_deleted_removes_entity_and_fields() {
    let (engine, store) = setup(test_config()).await;
    store.register_instance("Article", "1").await;
    store.register_instance("Article", "2").await;
    let alice = IdentityId::new(ALICE);
    let admin = IdentityId::new(ADMIN);

    engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();
    engine
        .grant(
            &alice,
            &Role::new(
                ALICE,
                StaticRole::new("writer")
                    .allow(article("1"), Actions::EDIT)
                    .allow(
                        Resource::entity_field("Article", "1", "title").unwrap(),
                        Actions::EDIT,
                    ),
            ),
        )
        .await
        .unwrap();

    // Admin cascade on 1, alice's entity and field authorizations
    let removed = engine.resource_deleted(&article("1")).await.unwrap();
    assert_eq!(removed, 3);

    assert!(!engine.is_allowed(&alice, Actions::EDIT, &article("1")).await.unwrap());
    assert!(store
        .authorizations()
        .await
        .iter()
        .all(|a| a.resource.entity_id() != Some(&EntityId::new("1"))));

    // Class-level access and other instances survive
    assert!(engine.is_allowed(&admin, Actions::DELETE, &article("2")).await.unwrap());
    assert_eq!(
        store
            .find_children(
                &store
                    .find_root_authorizations_for_resource(&Resource::class("Article").unwrap())
                    .await
                    .unwrap()
                    .iter()
                    .map(|a| a.id)
                    .collect::<Vec<_>>()
            )
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_deleting_class_removes_cascaded_subtree() {
    let (engine, store) = setup(test_config()).await;
    for id in ["1", "2"] {
        store.register_instance("Article", id).await;
    }
    let admin = IdentityId::new(ADMIN);
    engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();

    let removed = engine
        .resource_deleted(&Resource::class("Article").unwrap())
        .await
        .unwrap();
    assert_eq!(removed, 3);

    // Only the Comment root remains
    let left = store.authorizations().await;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].resource, Resource::class("Comment").unwrap());
}

#[tokio::test]
async fn test_access_filter() {
    let (engine, _) = setup(test_config()).await;
    let alice = IdentityId::new(ALICE);
    let admin = IdentityId::new(ADMIN);

    engine
        .grant(
            &alice,
            &Role::new(
                ALICE,
                StaticRole::new("writer")
                    .allow(article("1"), Actions::VIEW | Actions::EDIT)
                    .allow(article("2"), Actions::VIEW),
            ),
        )
        .await
        .unwrap();
    engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();

    let view = engine
        .access_filter(&alice, "Article", Actions::VIEW)
        .await
        .unwrap();
    assert_eq!(
        view,
        AccessFilter::Only([EntityId::new("1"), EntityId::new("2")].into_iter().collect())
    );

    let edit = engine
        .access_filter(&alice, "Article", Actions::EDIT)
        .await
        .unwrap();
    assert!(edit.permits(&EntityId::new("1")));
    assert!(!edit.permits(&EntityId::new("2")));

    assert!(engine
        .access_filter(&alice, "Comment", Actions::VIEW)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        engine
            .access_filter(&admin, "Article", Actions::DELETE)
            .await
            .unwrap(),
        AccessFilter::All
    );
}

#[tokio::test]
async fn test_cache_is_invalidated_by_writes() {
    let (engine, store) = setup(EngineConfig::default()).await;
    let admin = IdentityId::new(ADMIN);
    let a1 = article("1");

    assert!(!engine.is_allowed(&admin, Actions::VIEW, &a1).await.unwrap());

    let role = Role::new(ADMIN, AdministratorRole);
    engine.grant(&admin, &role).await.unwrap();
    assert!(engine.is_allowed(&admin, Actions::VIEW, &a1).await.unwrap());
    assert!(engine.is_allowed(&admin, Actions::VIEW, &a1).await.unwrap());

    store.register_instance("Article", "1").await;
    engine.resource_created(&a1).await.unwrap();
    engine.revoke(&admin, role.id()).await.unwrap();
    assert!(!engine.is_allowed(&admin, Actions::VIEW, &a1).await.unwrap());

    let stats = engine.cache_stats().unwrap();
    assert!(stats.hits >= 1);

    let metrics = engine.get_metrics().await.unwrap();
    assert_eq!(metrics.grants, 1);
    assert_eq!(metrics.revokes, 1);
    assert_eq!(metrics.total_checks, 4);
    assert!(engine
        .export_metrics()
        .await
        .unwrap()
        .contains("acl_revokes_total 1"));
}

#[tokio::test]
async fn test_small_batches_keep_parent_first() {
    let (engine, store) = setup_with_store(
        test_config(),
        cretoai_acl::StoreConfig { batch_size: 2 },
    )
    .await;
    for id in 0..7i64 {
        store.register_instance("Article", id).await;
    }
    let admin = IdentityId::new(ADMIN);

    let outcome = engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();
    assert_eq!(outcome.authorizations.len(), 9);
    assert_eq!(store.authorization_count().await, 9);
    assert!(engine
        .is_allowed(&admin, Actions::EDIT, &Resource::entity("Article", 6i64).unwrap())
        .await
        .unwrap());
}

/// Class and class-field grants, so a new entity gets two cascades
fn article_and_title_role() -> Role {
    Role::new(
        ALICE,
        StaticRole::new("article_reader")
            .allow(Resource::class("Article").unwrap(), Actions::VIEW)
            .allow(
                Resource::class_field("Article", "title").unwrap(),
                Actions::EDIT,
            ),
    )
}

#[tokio::test]
async fn test_grant_skips_cascade_materialized_concurrently() {
    let (engine, store, faulty) = setup_faulty(test_config()).await;
    for id in ["1", "2", "3"] {
        store.register_instance("Article", id).await;
    }
    let admin = IdentityId::new(ADMIN);

    faulty.inject(Fault::ConcurrentCascade);
    let outcome = engine
        .grant(&admin, &Role::new(ADMIN, AdministratorRole))
        .await
        .unwrap();

    assert!(faulty.fault_consumed());
    assert_eq!(outcome.roots().count(), 2);
    assert_eq!(outcome.derived().count(), 3);
    assert_eq!(store.authorization_count().await, 5);
    for id in ["1", "2", "3"] {
        let on_entity = store
            .find(&AuthorizationQuery::for_resource(Some(&admin), &article(id)))
            .await
            .unwrap();
        assert_eq!(on_entity.len(), 1);
    }
}

#[tokio::test]
async fn test_failed_resource_created_rolls_back_partial_cascade() {
    let (engine, store, faulty) = setup_faulty(test_config()).await;
    let alice = IdentityId::new(ALICE);
    engine.grant(&alice, &article_and_title_role()).await.unwrap();
    let before = store.authorizations().await;

    store.register_instance("Article", "9").await;
    faulty.inject(Fault::FailAfter(1));
    let err = engine.resource_created(&article("9")).await.unwrap_err();

    assert!(faulty.fault_consumed());
    assert!(matches!(err, AclError::DatabaseError(_)));
    assert_eq!(store.authorizations().await, before);
    assert!(store
        .find(&AuthorizationQuery::for_resource(Some(&alice), &article("9")))
        .await
        .unwrap()
        .is_empty());

    // The hook can simply be called again
    let stats = engine.resource_created(&article("9")).await.unwrap();
    assert_eq!(stats.planned, 2);
    assert_eq!(store.authorization_count().await, before.len() + 2);
}

#[tokio::test]
async fn test_resource_created_replans_after_concurrent_cascade() {
    let (engine, store, faulty) = setup_faulty(test_config()).await;
    let alice = IdentityId::new(ALICE);
    engine.grant(&alice, &article_and_title_role()).await.unwrap();
    let count = store.authorization_count().await;

    store.register_instance("Article", "9").await;
    faulty.inject(Fault::ConcurrentCascade);
    let stats = engine.resource_created(&article("9")).await.unwrap();

    assert!(faulty.fault_consumed());
    assert_eq!(stats.planned, 1);
    assert_eq!(stats.skipped, 1);
    assert_eq!(store.authorization_count().await, count + 2);

    let title_9 = Resource::entity_field("Article", "9", "title").unwrap();
    for resource in [article("9"), title_9.clone()] {
        let rows = store
            .find(&AuthorizationQuery::for_resource(Some(&alice), &resource))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_derived());
    }
    assert!(engine.is_allowed(&alice, Actions::VIEW, &article("9")).await.unwrap());
    assert!(engine.is_allowed(&alice, Actions::EDIT, &title_9).await.unwrap());
}
