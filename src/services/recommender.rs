/*!
 * # Co-purchase Recommender
 *
 * "Bought together" scores kept in sorted sets, one per product, keyed
 * `product:<id>:purchased_with`. Every completed purchase bumps the weight
 * of each ordered pair of its products by one.
 */

use crate::{
    entities::product,
    errors::ServiceError,
};
use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

/// Score store errors
#[derive(Debug, Error)]
pub enum ScoreStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl From<ScoreStoreError> for ServiceError {
    fn from(err: ScoreStoreError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

/// Sorted-set operations the recommender needs. Redis in production, a map
/// in tests.
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Increment `member`'s score under `key` by `delta`.
    async fn incr(&self, key: &str, member: &str, delta: f64) -> Result<(), ScoreStoreError>;
    /// Members of `key` ordered by score descending (redis tie order),
    /// truncated to `limit`.
    async fn range_desc(&self, key: &str, limit: usize) -> Result<Vec<String>, ScoreStoreError>;
    /// Union (summing scores) of `keys` stored under `dest`.
    async fn union_into(&self, dest: &str, keys: &[String]) -> Result<(), ScoreStoreError>;
    /// Remove `members` from `key`.
    async fn remove_members(&self, key: &str, members: &[String]) -> Result<(), ScoreStoreError>;
    /// Delete `key` entirely.
    async fn delete(&self, key: &str) -> Result<(), ScoreStoreError>;
}

/// Redis sorted-set score store.
#[derive(Clone)]
pub struct RedisScoreStore {
    redis: Arc<Client>,
}

impl RedisScoreStore {
    pub fn new(redis: Arc<Client>) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ScoreStore for RedisScoreStore {
    async fn incr(&self, key: &str, member: &str, delta: f64) -> Result<(), ScoreStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let _: f64 = conn.zincr(key, member, delta).await?;
        Ok(())
    }

    async fn range_desc(&self, key: &str, limit: usize) -> Result<Vec<String>, ScoreStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let members: Vec<String> = conn.zrevrange(key, 0, limit as isize - 1).await?;
        Ok(members)
    }

    async fn union_into(&self, dest: &str, keys: &[String]) -> Result<(), ScoreStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let _: i64 = conn.zunionstore(dest, &key_refs).await?;
        Ok(())
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> Result<(), ScoreStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let _: i64 = conn.zrem(key, members).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ScoreStoreError> {
        let mut conn = self.redis.get_async_connection().await?;
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

/// In-memory score store used by tests. Ordering matches redis ZREVRANGE:
/// score descending, ties broken by member descending.
#[derive(Debug, Default)]
pub struct InMemoryScoreStore {
    sets: Mutex<HashMap<String, HashMap<String, f64>>>,
}

impl InMemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current score of a member, if any. Test helper.
    pub fn score(&self, key: &str, member: &str) -> Option<f64> {
        let sets = self.sets.lock().unwrap();
        sets.get(key).and_then(|s| s.get(member)).copied()
    }
}

#[async_trait]
impl ScoreStore for InMemoryScoreStore {
    async fn incr(&self, key: &str, member: &str, delta: f64) -> Result<(), ScoreStoreError> {
        let mut sets = self.sets.lock().unwrap();
        *sets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0) += delta;
        Ok(())
    }

    async fn range_desc(&self, key: &str, limit: usize) -> Result<Vec<String>, ScoreStoreError> {
        let sets = self.sets.lock().unwrap();
        let Some(set) = sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<(&String, &f64)> = set.iter().collect();
        members.sort_by(|a, b| {
            b.1.partial_cmp(a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.cmp(a.0))
        });
        Ok(members.into_iter().take(limit).map(|(m, _)| m.clone()).collect())
    }

    async fn union_into(&self, dest: &str, keys: &[String]) -> Result<(), ScoreStoreError> {
        let mut sets = self.sets.lock().unwrap();
        let mut union: HashMap<String, f64> = HashMap::new();
        for key in keys {
            if let Some(set) = sets.get(key) {
                for (member, score) in set {
                    *union.entry(member.clone()).or_insert(0.0) += score;
                }
            }
        }
        sets.insert(dest.to_string(), union);
        Ok(())
    }

    async fn remove_members(&self, key: &str, members: &[String]) -> Result<(), ScoreStoreError> {
        let mut sets = self.sets.lock().unwrap();
        if let Some(set) = sets.get_mut(key) {
            for member in members {
                set.remove(member);
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ScoreStoreError> {
        let mut sets = self.sets.lock().unwrap();
        sets.remove(key);
        Ok(())
    }
}

/// Co-purchase recommender over an injected score store.
///
/// Store failures propagate as errors; suggestions are never silently
/// reported as empty when the store is unreachable.
#[derive(Clone)]
pub struct Recommender {
    store: Arc<dyn ScoreStore>,
    db: Arc<DatabaseConnection>,
}

impl Recommender {
    pub fn new(store: Arc<dyn ScoreStore>, db: Arc<DatabaseConnection>) -> Self {
        Self { store, db }
    }

    fn product_key(product_id: Uuid) -> String {
        format!("product:{}:purchased_with", product_id)
    }

    /// Deterministic temporary key for a multi-product union, derived from
    /// the sorted input ids.
    fn tmp_key(product_ids: &[Uuid]) -> String {
        let mut ids: Vec<String> = product_ids.iter().map(Uuid::to_string).collect();
        ids.sort();
        format!("tmp:{}", ids.join("-"))
    }

    /// Records one completed purchase: every ordered pair of distinct
    /// products gains one point in both directions.
    #[instrument(skip(self, product_ids), fields(count = product_ids.len()))]
    pub async fn record_purchase(&self, product_ids: &[Uuid]) -> Result<(), ServiceError> {
        for &a in product_ids {
            for &b in product_ids {
                if a == b {
                    continue;
                }
                self.store
                    .incr(&Self::product_key(a), &b.to_string(), 1.0)
                    .await?;
            }
        }
        info!(products = product_ids.len(), "Recorded co-purchase scores");
        Ok(())
    }

    /// Ranked suggestion ids for the given products, excluding the inputs.
    #[instrument(skip(self, product_ids), fields(count = product_ids.len()))]
    pub async fn suggest_ids(
        &self,
        product_ids: &[Uuid],
        max_results: usize,
    ) -> Result<Vec<Uuid>, ServiceError> {
        if product_ids.is_empty() || max_results == 0 {
            return Ok(Vec::new());
        }

        let members = if product_ids.len() == 1 {
            self.store
                .range_desc(&Self::product_key(product_ids[0]), max_results)
                .await?
        } else {
            let keys: Vec<String> = product_ids.iter().map(|id| Self::product_key(*id)).collect();
            let inputs: Vec<String> = product_ids.iter().map(Uuid::to_string).collect();
            let tmp = Self::tmp_key(product_ids);

            self.store.union_into(&tmp, &keys).await?;
            // The temp key must not outlive the read, failed reads included.
            let ranged = match self.store.remove_members(&tmp, &inputs).await {
                Ok(()) => self.store.range_desc(&tmp, max_results).await,
                Err(e) => Err(e),
            };
            self.store.delete(&tmp).await?;
            ranged?
        };

        Ok(members
            .into_iter()
            .filter_map(|m| Uuid::parse_str(&m).ok())
            .collect())
    }

    /// Suggestions resolved to available product rows, preserving rank
    /// order. Ids that no longer resolve are dropped.
    pub async fn suggest_products(
        &self,
        product_ids: &[Uuid],
        max_results: usize,
    ) -> Result<Vec<product::Model>, ServiceError> {
        let ids = self.suggest_ids(product_ids, max_results).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = product::Entity::find()
            .filter(product::Column::Id.is_in(ids.clone()))
            .filter(product::Column::Available.eq(true))
            .all(&*self.db)
            .await?;

        Ok(ids
            .into_iter()
            .filter_map(|id| rows.iter().find(|p| p.id == id).cloned())
            .collect())
    }

    /// Deletes the score key of every known product. Full reset.
    #[instrument(skip(self))]
    pub async fn clear_purchases(&self) -> Result<(), ServiceError> {
        let products = product::Entity::find().all(&*self.db).await?;
        for p in products {
            self.store.delete(&Self::product_key(p.id)).await?;
        }
        info!("Cleared all co-purchase scores");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_range_orders_by_score_then_member_desc() {
        let store = InMemoryScoreStore::new();
        store.incr("k", "a", 1.0).await.unwrap();
        store.incr("k", "b", 2.0).await.unwrap();
        store.incr("k", "c", 1.0).await.unwrap();

        let members = store.range_desc("k", 10).await.unwrap();
        // b leads by score; the 1.0 tie breaks to descending member order.
        assert_eq!(members, vec!["b", "c", "a"]);

        let top = store.range_desc("k", 1).await.unwrap();
        assert_eq!(top, vec!["b"]);
    }

    #[tokio::test]
    async fn union_sums_scores_across_keys() {
        let store = InMemoryScoreStore::new();
        store.incr("k1", "x", 1.0).await.unwrap();
        store.incr("k2", "x", 2.0).await.unwrap();
        store.incr("k2", "y", 1.0).await.unwrap();

        store
            .union_into("dest", &["k1".to_string(), "k2".to_string()])
            .await
            .unwrap();
        assert_eq!(store.score("dest", "x"), Some(3.0));
        assert_eq!(store.score("dest", "y"), Some(1.0));

        store.delete("dest").await.unwrap();
        assert_eq!(store.score("dest", "x"), None);
    }

    #[test]
    fn tmp_key_is_deterministic_regardless_of_input_order() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(Recommender::tmp_key(&[a, b]), Recommender::tmp_key(&[b, a]));
        assert!(Recommender::tmp_key(&[a, b]).starts_with("tmp:"));
    }
}
