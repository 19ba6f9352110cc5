//! Integration tests: catalog events → ProjectionHandler → store → QueryHandler.

use std::sync::Arc;

use catalog::{BrandEvent, BrandName, TypeEvent, TypeName};
use common::{AggregateId, DomainEvent, Sequence};
use projections::{
    CatalogBrandView, CatalogTypeView, Outcome, ProjectionHandler, ProjectionRegistry,
    QueryHandler, QueryRequest,
};
use read_model::{
    CommitFault, InMemoryReadModelStore, ReadModelEntity, ReadModelStore, ReadModelStoreExt,
};

/// Helper to set up a handler and a query handler over one store.
fn setup() -> (
    ProjectionHandler<InMemoryReadModelStore>,
    QueryHandler<InMemoryReadModelStore>,
    InMemoryReadModelStore,
) {
    let store = InMemoryReadModelStore::new();
    let handler = ProjectionHandler::new(store.clone(), Arc::new(ProjectionRegistry::catalog()));
    let queries = QueryHandler::new(store.clone());
    (handler, queries, store)
}

fn defined(id: AggregateId, sequence: u64, name: &str) -> DomainEvent {
    BrandEvent::defined(BrandName::new(name).unwrap())
        .into_domain_event(id, Sequence::new(sequence))
        .unwrap()
}

fn destroyed(id: AggregateId, sequence: u64) -> DomainEvent {
    BrandEvent::Destroyed
        .into_domain_event(id, Sequence::new(sequence))
        .unwrap()
}

async fn brand(store: &InMemoryReadModelStore, id: AggregateId) -> Option<CatalogBrandView> {
    store.get_entity::<CatalogBrandView>(id).await.unwrap()
}

#[tokio::test]
async fn test_define_destroy_and_stale_redelivery() {
    let (handler, _, store) = setup();
    let b1 = AggregateId::new();

    handler.handle(&defined(b1, 1, "Acme")).await.unwrap();
    assert_eq!(
        brand(&store, b1).await,
        Some(CatalogBrandView {
            id: b1,
            name: "Acme".to_string()
        })
    );

    handler.handle(&destroyed(b1, 2)).await.unwrap();
    assert!(brand(&store, b1).await.is_none());

    let outcome = handler.handle(&defined(b1, 1, "Acme")).await.unwrap();
    assert_eq!(outcome, Outcome::Stale);
    assert!(brand(&store, b1).await.is_none());
}

#[tokio::test]
async fn test_idempotent_projection() {
    let (once, _, once_store) = setup();
    let (twice, _, twice_store) = setup();
    let id = AggregateId::new();
    let event = defined(id, 1, "Acme");

    once.handle(&event).await.unwrap();
    twice.handle(&event).await.unwrap();
    twice.handle(&event).await.unwrap();

    assert_eq!(brand(&once_store, id).await, brand(&twice_store, id).await);
    assert_eq!(
        once_store
            .high_water_mark(CatalogBrandView::COLLECTION, id)
            .await
            .unwrap(),
        twice_store
            .high_water_mark(CatalogBrandView::COLLECTION, id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_order_independence() {
    let (forward, _, forward_store) = setup();
    let (backward, _, backward_store) = setup();
    let id = AggregateId::new();
    let e1 = defined(id, 1, "Acme");
    let e2 = defined(id, 2, "Acme Corp");

    forward.handle(&e1).await.unwrap();
    forward.handle(&e2).await.unwrap();
    backward.handle(&e2).await.unwrap();
    assert_eq!(backward.handle(&e1).await.unwrap(), Outcome::Stale);

    let expected = Some(CatalogBrandView {
        id,
        name: "Acme Corp".to_string(),
    });
    assert_eq!(brand(&forward_store, id).await, expected);
    assert_eq!(brand(&backward_store, id).await, expected);
}

#[tokio::test]
async fn test_destroy_dominance() {
    let (handler, _, store) = setup();
    let id = AggregateId::new();

    handler.handle(&defined(id, 1, "Acme")).await.unwrap();
    handler.handle(&destroyed(id, 5)).await.unwrap();

    assert_eq!(
        handler.handle(&defined(id, 3, "Acme")).await.unwrap(),
        Outcome::Stale
    );
    assert!(brand(&store, id).await.is_none());

    assert_eq!(
        handler.handle(&defined(id, 6, "Acme Reborn")).await.unwrap(),
        Outcome::Applied
    );
    assert_eq!(brand(&store, id).await.unwrap().name, "Acme Reborn");
}

#[tokio::test]
async fn test_destroy_before_define_is_remembered() {
    let (handler, _, store) = setup();
    let id = AggregateId::new();

    assert_eq!(
        handler.handle(&destroyed(id, 2)).await.unwrap(),
        Outcome::Deleted
    );
    assert_eq!(
        handler.handle(&defined(id, 1, "Acme")).await.unwrap(),
        Outcome::Stale
    );
    assert!(brand(&store, id).await.is_none());
}

#[tokio::test]
async fn test_pagination_over_projected_brands() {
    let (handler, queries, _) = setup();
    for i in 0..25 {
        handler
            .handle(&defined(AggregateId::new(), 1, &format!("Brand {i:02}")))
            .await
            .unwrap();
    }

    let first = queries
        .handle::<CatalogBrandView>(&QueryRequest::page(0, 10))
        .await
        .unwrap();
    assert_eq!(first.records.len(), 10);
    assert_eq!(first.total, 25);

    let last = queries
        .handle::<CatalogBrandView>(&QueryRequest::page(20, 10))
        .await
        .unwrap();
    assert_eq!(last.records.len(), 5);
    assert_eq!(last.total, 25);

    let wire = serde_json::to_value(&last).unwrap();
    assert!(wire.get("elapsedMs").is_some());
    assert_eq!(wire["total"], 25);
}

#[tokio::test]
async fn test_atomic_commit_under_injected_fault() {
    let (handler, _, store) = setup();
    let id = AggregateId::new();
    handler.handle(&defined(id, 1, "Acme")).await.unwrap();

    for fault in [CommitFault::AfterMutations, CommitFault::BeforeCompletion] {
        store.inject_fault(fault);
        assert!(handler.handle(&destroyed(id, 2)).await.is_err());

        assert_eq!(brand(&store, id).await.unwrap().name, "Acme");
        assert_eq!(
            store
                .high_water_mark(CatalogBrandView::COLLECTION, id)
                .await
                .unwrap(),
            Some(Sequence::first())
        );
    }

    assert_eq!(
        handler.handle(&destroyed(id, 2)).await.unwrap(),
        Outcome::Deleted
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_aggregate_converges() {
    let store = InMemoryReadModelStore::new();
    let handler = Arc::new(
        ProjectionHandler::new(store.clone(), Arc::new(ProjectionRegistry::catalog()))
            .with_max_conflict_retries(64),
    );
    let id = AggregateId::new();

    let mut tasks = Vec::new();
    for sequence in 1..=20u64 {
        let handler = Arc::clone(&handler);
        tasks.push(tokio::spawn(async move {
            let event = defined(id, sequence, &format!("Acme {sequence}"));
            handler.handle(&event).await.unwrap()
        }));
    }

    let mut applied = 0;
    for task in tasks {
        if task.await.unwrap() == Outcome::Applied {
            applied += 1;
        }
    }

    assert!(applied >= 1);
    assert_eq!(brand(&store, id).await.unwrap().name, "Acme 20");
    assert_eq!(
        store
            .high_water_mark(CatalogBrandView::COLLECTION, id)
            .await
            .unwrap(),
        Some(Sequence::new(20))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_distinct_aggregates() {
    let store = InMemoryReadModelStore::new();
    let handler = Arc::new(ProjectionHandler::new(
        store.clone(),
        Arc::new(ProjectionRegistry::catalog()),
    ));

    let mut tasks = Vec::new();
    for i in 0..100 {
        let handler = Arc::clone(&handler);
        tasks.push(tokio::spawn(async move {
            handler
                .handle(&defined(AggregateId::new(), 1, &format!("Brand {i}")))
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), Outcome::Applied);
    }

    assert_eq!(store.count(CatalogBrandView::COLLECTION).await, 100);
}

#[tokio::test]
async fn test_brands_and_types_are_separate_collections() {
    let (handler, queries, _) = setup();
    let id = AggregateId::new();

    handler.handle(&defined(id, 1, "Acme")).await.unwrap();
    handler
        .handle(
            &TypeEvent::defined(TypeName::new("Shoes").unwrap())
                .into_domain_event(id, Sequence::first())
                .unwrap(),
        )
        .await
        .unwrap();

    let brands = queries
        .handle::<CatalogBrandView>(&QueryRequest::by_id(id))
        .await
        .unwrap();
    let types = queries
        .handle::<CatalogTypeView>(&QueryRequest::by_id(id))
        .await
        .unwrap();
    assert_eq!(brands.records[0].name, "Acme");
    assert_eq!(types.records[0].name, "Shoes");
    assert_eq!(CatalogTypeView::COLLECTION, "catalog_types");
}
