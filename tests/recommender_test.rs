mod common;

use async_trait::async_trait;
use common::{insert_product, spawn_app};
use pastyshop_api::errors::ServiceError;
use pastyshop_api::services::recommender::{
    InMemoryScoreStore, Recommender, ScoreStore, ScoreStoreError,
};
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

fn store_down() -> ScoreStoreError {
    ScoreStoreError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "connection refused",
    )))
}

/// Score store with no backend at all: every operation fails.
struct UnreachableScoreStore;

#[async_trait]
impl ScoreStore for UnreachableScoreStore {
    async fn incr(&self, _key: &str, _member: &str, _delta: f64) -> Result<(), ScoreStoreError> {
        Err(store_down())
    }
    async fn range_desc(&self, _key: &str, _limit: usize) -> Result<Vec<String>, ScoreStoreError> {
        Err(store_down())
    }
    async fn union_into(&self, _dest: &str, _keys: &[String]) -> Result<(), ScoreStoreError> {
        Err(store_down())
    }
    async fn remove_members(&self, _key: &str, _members: &[String]) -> Result<(), ScoreStoreError> {
        Err(store_down())
    }
    async fn delete(&self, _key: &str) -> Result<(), ScoreStoreError> {
        Err(store_down())
    }
}

/// Accepts writes but fails every read of a temporary union key, recording
/// which keys get deleted along the way.
#[derive(Default)]
struct FailingRangeStore {
    inner: InMemoryScoreStore,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl ScoreStore for FailingRangeStore {
    async fn incr(&self, key: &str, member: &str, delta: f64) -> Result<(), ScoreStoreError> {
        self.inner.incr(key, member, delta).await
    }
    async fn range_desc(&self, key: &str, limit: usize) -> Result<Vec<String>, ScoreStoreError> {
        if key.starts_with("tmp:") {
            return Err(store_down());
        }
        self.inner.range_desc(key, limit).await
    }
    async fn union_into(&self, dest: &str, keys: &[String]) -> Result<(), ScoreStoreError> {
        self.inner.union_into(dest, keys).await
    }
    async fn remove_members(&self, key: &str, members: &[String]) -> Result<(), ScoreStoreError> {
        self.inner.remove_members(key, members).await
    }
    async fn delete(&self, key: &str) -> Result<(), ScoreStoreError> {
        self.deleted.lock().unwrap().push(key.to_string());
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn suggestions_rank_by_co_purchase_score() {
    let app = spawn_app().await;
    let a = insert_product(&app, "Pasty A", dec!(1.00)).await;
    let b = insert_product(&app, "Pasty B", dec!(1.00)).await;
    let c = insert_product(&app, "Pasty C", dec!(1.00)).await;

    let rec = &app.state.services.recommender;
    rec.record_purchase(&[a.id, b.id, c.id]).await.unwrap();
    // A and B bought together again: B outranks C for A.
    rec.record_purchase(&[a.id, b.id]).await.unwrap();

    let suggested = rec.suggest_ids(&[a.id], 2).await.unwrap();
    assert_eq!(suggested.len(), 2);
    assert_eq!(suggested[0], b.id);
    assert_eq!(suggested[1], c.id);

    let top = rec.suggest_ids(&[a.id], 1).await.unwrap();
    assert_eq!(top, vec![b.id]);
}

#[tokio::test]
async fn multi_product_suggestions_exclude_the_inputs() {
    let app = spawn_app().await;
    let a = insert_product(&app, "Pasty A", dec!(1.00)).await;
    let b = insert_product(&app, "Pasty B", dec!(1.00)).await;
    let c = insert_product(&app, "Pasty C", dec!(1.00)).await;
    let d = insert_product(&app, "Pasty D", dec!(1.00)).await;

    let rec = &app.state.services.recommender;
    rec.record_purchase(&[a.id, b.id, c.id]).await.unwrap();
    rec.record_purchase(&[b.id, d.id]).await.unwrap();

    let suggested = rec.suggest_ids(&[a.id, b.id], 5).await.unwrap();
    assert!(!suggested.contains(&a.id));
    assert!(!suggested.contains(&b.id));
    assert!(suggested.contains(&c.id));
    assert!(suggested.contains(&d.id));
    // C gains weight from both inputs, D only from B.
    assert_eq!(suggested[0], c.id);
}

#[tokio::test]
async fn suggestions_resolve_to_available_products_in_rank_order() {
    let app = spawn_app().await;
    let a = insert_product(&app, "Pasty A", dec!(1.00)).await;
    let b = insert_product(&app, "Pasty B", dec!(1.00)).await;
    let c = insert_product(&app, "Pasty C", dec!(1.00)).await;

    let rec = &app.state.services.recommender;
    rec.record_purchase(&[a.id, b.id, c.id]).await.unwrap();
    rec.record_purchase(&[a.id, b.id]).await.unwrap();

    // Take B off the shelf; it must drop out of resolved suggestions.
    use sea_orm::{ActiveModelTrait, Set};
    let mut active: pastyshop_api::entities::product::ActiveModel = b.into();
    active.available = Set(false);
    active.update(&*app.state.db).await.unwrap();

    let products = rec.suggest_products(&[a.id], 5).await.unwrap();
    let names: Vec<&str> = products.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Pasty C"]);
}

#[tokio::test]
async fn unknown_product_has_no_suggestions() {
    let app = spawn_app().await;
    let suggested = app
        .state
        .services
        .recommender
        .suggest_ids(&[Uuid::new_v4()], 4)
        .await
        .unwrap();
    assert!(suggested.is_empty());
}

#[tokio::test]
async fn clear_purchases_resets_the_graph() {
    let app = spawn_app().await;
    let a = insert_product(&app, "Pasty A", dec!(1.00)).await;
    let b = insert_product(&app, "Pasty B", dec!(1.00)).await;

    let rec = &app.state.services.recommender;
    rec.record_purchase(&[a.id, b.id]).await.unwrap();
    assert!(!rec.suggest_ids(&[a.id], 4).await.unwrap().is_empty());

    rec.clear_purchases().await.unwrap();
    assert!(rec.suggest_ids(&[a.id], 4).await.unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_store_surfaces_errors_not_empty_suggestions() {
    let app = spawn_app().await;
    let rec = Recommender::new(Arc::new(UnreachableScoreStore), app.state.db.clone());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let err = rec.suggest_ids(&[a], 4).await.unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));

    let err = rec.suggest_ids(&[a, b], 4).await.unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));

    let err = rec.record_purchase(&[a, b]).await.unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));
}

#[tokio::test]
async fn failed_union_read_still_deletes_the_temp_key() {
    let app = spawn_app().await;
    let store = Arc::new(FailingRangeStore::default());
    let rec = Recommender::new(store.clone(), app.state.db.clone());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    rec.record_purchase(&[a, b, c]).await.unwrap();

    let err = rec.suggest_ids(&[a, b], 4).await.unwrap_err();
    assert!(matches!(err, ServiceError::ExternalServiceError(_)));

    let deleted = store.deleted.lock().unwrap();
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].starts_with("tmp:"));
}

#[tokio::test]
async fn random_fallback_fills_in_for_an_empty_graph() {
    let app = spawn_app().await;
    let a = insert_product(&app, "Pasty A", dec!(1.00)).await;
    for name in ["Pasty B", "Pasty C", "Pasty D", "Pasty E", "Pasty F"] {
        insert_product(&app, name, dec!(1.00)).await;
    }

    let fallback = app
        .state
        .services
        .products
        .random_available(4, &[a.id])
        .await
        .unwrap();
    assert_eq!(fallback.len(), 4);
    assert!(fallback.iter().all(|p| p.id != a.id));
}
