//! Privacy context pool: partitions, rotation and the preemption barrier.

mod common;

use common::CountingFactory;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use veilcrawl::{PrivacyContextId, PrivacyContextManager};

fn manager() -> (PrivacyContextManager, Arc<CountingFactory>) {
    let factory = CountingFactory::new();
    (PrivacyContextManager::new(factory.clone()), factory)
}

#[tokio::test]
async fn next_active_context_creates_on_demand_then_reuses() {
    let (manager, factory) = manager();

    let first = manager.next_active_context();
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    assert_eq!(manager.active_count(), 1);

    let second = manager.next_active_context();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn compute_if_absent_is_atomic_per_id() {
    let (manager, factory) = manager();
    let manager = Arc::new(manager);
    let id = PrivacyContextId::from_raw("shared");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { manager.compute_if_absent(id) }));
    }
    let contexts: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("join"))
        .collect();

    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    for context in &contexts[1..] {
        assert!(Arc::ptr_eq(&contexts[0], context));
    }
}

#[tokio::test]
async fn healthy_context_passes_through_without_rotation() {
    let (manager, factory) = manager();
    let context = manager.next_active_context();

    let result = manager
        .compute_if_leaked(context.clone(), || {
            panic!("fallback must not run for a healthy context")
        })
        .await;

    assert!(Arc::ptr_eq(&context, &result));
    assert_eq!(manager.zombie_count(), 0);
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn leaked_context_is_retired_and_replaced() {
    let (manager, factory) = manager();
    let context = manager.next_active_context();
    context.mark_leaked();

    let factory_for_fallback = factory.clone();
    let replacement = manager
        .compute_if_leaked(context.clone(), || {
            factory_for_fallback.create(PrivacyContextId::generate())
        })
        .await;

    assert_ne!(context.id(), replacement.id());
    assert!(manager.is_zombie(&context));
    assert_eq!(manager.active_count(), 1);
    assert_eq!(manager.zombie_count(), 1);

    // The replacement is reachable as the next active context.
    let next = manager.next_active_context();
    assert!(Arc::ptr_eq(&replacement, &next));

    // The retired context closes asynchronously.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(context.is_closed());
}

#[tokio::test]
async fn concurrent_leak_detection_rotates_exactly_once() {
    let (manager, factory) = manager();
    let manager = Arc::new(manager);
    let context = manager.next_active_context();
    context.mark_leaked();
    let created_before = factory.created.load(Ordering::SeqCst);

    let replacements = AtomicUsize::new(0);
    let replacements = Arc::new(replacements);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let manager = manager.clone();
        let context = context.clone();
        let factory = factory.clone();
        let replacements = replacements.clone();
        handles.push(tokio::spawn(async move {
            manager
                .compute_if_leaked(context, move || {
                    replacements.fetch_add(1, Ordering::SeqCst);
                    factory.create(PrivacyContextId::generate())
                })
                .await
        }));
    }
    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("join"))
        .collect();

    // Exactly one retirement, exactly one replacement creation.
    assert_eq!(replacements.load(Ordering::SeqCst), 1);
    assert_eq!(factory.created.load(Ordering::SeqCst), created_before + 1);
    assert_eq!(manager.zombie_count(), 1);
    assert_eq!(manager.active_count(), 1);

    // Every caller ended up on the same replacement identity.
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
    assert_ne!(results[0].id(), context.id());
}

#[tokio::test]
async fn healthy_check_drains_zombies() {
    let (manager, factory) = manager();
    let context = manager.next_active_context();
    context.mark_leaked();

    let factory_for_fallback = factory.clone();
    manager
        .compute_if_leaked(context.clone(), || {
            factory_for_fallback.create(PrivacyContextId::generate())
        })
        .await;
    assert_eq!(manager.zombie_count(), 1);

    manager.healthy_check().await;
    assert_eq!(manager.zombie_count(), 0);
    assert!(context.is_closed());
}

#[tokio::test]
async fn manager_close_retires_everything() {
    let (manager, _factory) = manager();
    let a = manager.compute_if_absent(PrivacyContextId::from_raw("a"));
    let b = manager.compute_if_absent(PrivacyContextId::from_raw("b"));
    assert_eq!(manager.active_count(), 2);

    manager.close().await;

    assert!(!manager.is_active());
    assert_eq!(manager.active_count(), 0);
    assert_eq!(manager.zombie_count(), 0);
    assert!(a.is_closed());
    assert!(b.is_closed());
}

#[tokio::test]
async fn ordinary_work_pauses_while_rotation_runs() {
    let (manager, factory) = manager();
    let manager = Arc::new(manager);
    let context = manager.next_active_context();
    context.mark_leaked();

    // Rotation first; an ordinary section submitted afterwards must observe
    // the rotated pool, not the leaked context.
    let m = manager.clone();
    let f = factory.clone();
    let rotation = tokio::spawn(async move {
        m.compute_if_leaked(context, move || f.create(PrivacyContextId::generate()))
            .await
    });

    let replacement = rotation.await.expect("rotation");
    let observed = manager
        .when_normal(async { manager.next_active_context() })
        .await;
    assert!(Arc::ptr_eq(&replacement, &observed));
}
