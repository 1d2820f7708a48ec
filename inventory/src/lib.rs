use std::sync::Arc;

use shared::{ProductStore, Stock, StoreError};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("product {0} not found")]
    ProductNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    /// One unit was taken.
    Decremented,
    /// Unlimited stock, nothing to write.
    Unlimited,
    /// Already at zero, nothing to write.
    Exhausted,
}

/// Takes one unit of stock per call. Callers decide how often to call it; there
/// is no de-duplication here.
#[derive(Clone)]
pub struct InventoryAdjuster {
    products: Arc<dyn ProductStore>,
}

impl InventoryAdjuster {
    pub fn new(products: Arc<dyn ProductStore>) -> Self {
        Self { products }
    }

    pub async fn adjust(&self, product_id: Uuid) -> Result<Adjustment, InventoryError> {
        let product = self
            .products
            .find_product(product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound(product_id))?;

        match product.stock {
            Stock::Infinite => {
                debug!(%product_id, "Unlimited stock, skipping adjustment");
                Ok(Adjustment::Unlimited)
            }
            Stock::Finite(0) => {
                debug!(%product_id, "Stock already exhausted");
                Ok(Adjustment::Exhausted)
            }
            Stock::Finite(units) => {
                // The store re-checks stock > 0, so a concurrent drain cannot go negative.
                if self.products.decrement_stock(product_id).await? {
                    info!(%product_id, remaining = units - 1, "Stock decremented for {}", product.name);
                    Ok(Adjustment::Decremented)
                } else {
                    Ok(Adjustment::Exhausted)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use shared::memory::MemoryStore;
    use shared::{Payload, Product, ReviewStats};

    async fn setup(stock: Stock) -> (Arc<MemoryStore>, InventoryAdjuster, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let id = Uuid::new_v4();
        store
            .add_product(Product {
                id,
                tenant_id: Uuid::new_v4(),
                name: "Game account".to_string(),
                price: BigDecimal::from(50_000),
                stock,
                payload: Payload::Text(Some("user:pass".to_string())),
                reviews: ReviewStats::default(),
            })
            .await;
        let adjuster = InventoryAdjuster::new(store.clone());
        (store, adjuster, id)
    }

    #[tokio::test]
    async fn decrements_finite_stock() {
        let (store, adjuster, id) = setup(Stock::Finite(3)).await;

        assert_eq!(adjuster.adjust(id).await.unwrap(), Adjustment::Decremented);
        assert_eq!(store.product(id).await.unwrap().stock, Stock::Finite(2));
    }

    #[tokio::test]
    async fn repeated_calls_stop_at_zero() {
        let (store, adjuster, id) = setup(Stock::Finite(2)).await;

        for _ in 0..5 {
            adjuster.adjust(id).await.unwrap();
        }
        assert_eq!(store.product(id).await.unwrap().stock, Stock::Finite(0));
        assert_eq!(adjuster.adjust(id).await.unwrap(), Adjustment::Exhausted);
    }

    #[tokio::test]
    async fn concurrent_calls_never_oversell() {
        let (store, adjuster, id) = setup(Stock::Finite(3)).await;

        let results = futures::future::join_all((0..10).map(|_| adjuster.adjust(id))).await;
        let taken = results
            .into_iter()
            .filter(|r| matches!(r, Ok(Adjustment::Decremented)))
            .count();

        assert_eq!(taken, 3);
        assert_eq!(store.product(id).await.unwrap().stock, Stock::Finite(0));
    }

    #[tokio::test]
    async fn infinite_stock_is_untouched() {
        let (store, adjuster, id) = setup(Stock::Infinite).await;

        assert_eq!(adjuster.adjust(id).await.unwrap(), Adjustment::Unlimited);
        assert_eq!(store.product(id).await.unwrap().stock, Stock::Infinite);
    }

    #[tokio::test]
    async fn missing_product_is_an_error() {
        let (_, adjuster, _) = setup(Stock::Infinite).await;
        let missing = Uuid::new_v4();

        assert!(matches!(
            adjuster.adjust(missing).await,
            Err(InventoryError::ProductNotFound(id)) if id == missing
        ));
    }
}
