use std::sync::Arc;

use shared::{Order, OrderStore, StoreResult, Viewer};
use uuid::Uuid;

/// Answers "does this viewer own this product". A viewer owns a product when
/// one of their paid orders has a line for it.
#[derive(Clone)]
pub struct Entitlements {
    orders: Arc<dyn OrderStore>,
}

impl Entitlements {
    pub fn new(orders: Arc<dyn OrderStore>) -> Self {
        Self { orders }
    }

    pub async fn is_owned(&self, viewer: Option<&Viewer>, product_id: Uuid) -> StoreResult<bool> {
        Ok(self.paid_order_for(viewer, product_id).await?.is_some())
    }

    pub async fn paid_order_for(&self, viewer: Option<&Viewer>, product_id: Uuid) -> StoreResult<Option<Order>> {
        match viewer {
            Some(viewer) => self.orders.find_paid_order_with_product(viewer.id, product_id).await,
            None => Ok(None),
        }
    }
}
