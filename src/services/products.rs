use crate::{entities::product, errors::ServiceError};
use rand::seq::SliceRandom;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read-side product catalog.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// All available products, name-ordered.
    #[instrument(skip(self))]
    pub async fn list_available(&self) -> Result<Vec<product::Model>, ServiceError> {
        Ok(product::Entity::find()
            .filter(product::Column::Available.eq(true))
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// Random sample of available products, excluding the given ids. Used as
    /// the recommendation fallback when the co-purchase graph has nothing to
    /// say yet.
    #[instrument(skip(self, exclude))]
    pub async fn random_available(
        &self,
        count: usize,
        exclude: &[Uuid],
    ) -> Result<Vec<product::Model>, ServiceError> {
        let mut candidates: Vec<product::Model> = product::Entity::find()
            .filter(product::Column::Available.eq(true))
            .all(&*self.db)
            .await?
            .into_iter()
            .filter(|p| !exclude.contains(&p.id))
            .collect();

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(count);
        Ok(candidates)
    }
}
