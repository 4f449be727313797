use crate::{
    entities::commerce::{Product, ProductModel},
    errors::ServiceError,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Read access to per-product availability.
///
/// Stock is owned by the catalog. Every check here is read-then-decide;
/// nothing is reserved.
#[derive(Clone)]
pub struct StockLedger {
    db: Arc<DatabaseConnection>,
}

impl StockLedger {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Units currently available for `product_id`, never negative.
    #[instrument(skip(self))]
    pub async fn get_available(&self, product_id: Uuid) -> Result<i32, ServiceError> {
        let product = self.get_product(product_id).await?;
        Ok(product.stock.max(0))
    }

    /// Catalog snapshot (name, price, stock, active flag) for `product_id`.
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        Self::product_on(&*self.db, product_id).await
    }

    /// Same lookup on an arbitrary connection, so cart mutations can read
    /// inside their own transaction.
    pub(crate) async fn product_on<C: ConnectionTrait>(
        conn: &C,
        product_id: Uuid,
    ) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(product_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }
}
