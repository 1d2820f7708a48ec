//! In-memory store used by tests and local runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::*;
use crate::{NewOrder, Order, OrderStatus, Page, PaymentReference, Product, Review, Stock, Tenant, Viewer};

#[derive(Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    products: RwLock<HashMap<Uuid, Product>>,
    tenants: RwLock<HashMap<Uuid, Tenant>>,
    reviews: RwLock<Vec<Review>>,
    sessions: RwLock<HashMap<String, Viewer>>,
    failing_products: RwLock<HashSet<Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_tenant(&self, tenant: Tenant) {
        self.tenants.write().await.insert(tenant.id, tenant);
    }

    pub async fn add_product(&self, product: Product) {
        self.products.write().await.insert(product.id, product);
    }

    pub async fn add_order(&self, order: Order) {
        self.orders.write().await.insert(order.id, order);
    }

    pub async fn add_session(&self, token: &str, viewer: Viewer) {
        self.sessions.write().await.insert(token.to_string(), viewer);
    }

    /// Makes every stock write for `product` fail with a backend error.
    pub async fn fail_stock_writes(&self, product: Uuid) {
        self.failing_products.write().await.insert(product);
    }

    pub async fn product(&self, id: Uuid) -> Option<Product> {
        self.products.read().await.get(&id).cloned()
    }

    pub async fn order(&self, id: Uuid) -> Option<Order> {
        self.orders.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &NewOrder) -> StoreResult<Order> {
        let mut orders = self.orders.write().await;
        if orders
            .values()
            .any(|existing| existing.payment_reference == order.payment_reference)
        {
            return Err(StoreError::Conflict(format!(
                "payment reference {} already used",
                order.payment_reference
            )));
        }

        let now = Utc::now();
        let stored = Order {
            id: order.id,
            tenant_id: order.tenant_id,
            buyer_id: order.buyer_id,
            items: order.items.clone(),
            total: order.total.clone(),
            status: OrderStatus::Pending,
            payment_reference: order.payment_reference,
            payment_link_id: None,
            created_at: now,
            updated_at: now,
        };
        orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_order_by_reference(&self, reference: PaymentReference) -> StoreResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|order| order.payment_reference == reference)
            .cloned())
    }

    async fn transition_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_payment_link(&self, id: Uuid, payment_link_id: &str) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        order.payment_link_id = Some(payment_link_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn find_paid_order_with_product(&self, buyer: Uuid, product: Uuid) -> StoreResult<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|order| {
                order.buyer_id == buyer && order.status == OrderStatus::Paid && order.contains_product(product)
            })
            .max_by_key(|order| order.created_at)
            .cloned())
    }

    async fn list_paid_orders(&self, buyer: Uuid) -> StoreResult<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|order| order.buyer_id == buyer && order.status == OrderStatus::Paid)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn find_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.products.read().await.get(&id).cloned())
    }

    async fn find_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let products = self.products.read().await;
        Ok(ids.iter().filter_map(|id| products.get(id).cloned()).collect())
    }

    async fn decrement_stock(&self, id: Uuid) -> StoreResult<bool> {
        if self.failing_products.read().await.contains(&id) {
            return Err(StoreError::backend(format!("stock write rejected for {id}")));
        }

        let mut products = self.products.write().await;
        let product = products
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        match product.stock {
            Stock::Finite(units) if units > 0 => {
                product.stock = Stock::Finite(units - 1);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_rating(&self, id: Uuid, rating: i16) -> StoreResult<()> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("product {id}")))?;
        product.reviews.record(rating);
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn find_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        Ok(self.tenants.read().await.get(&id).cloned())
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        Ok(self
            .tenants
            .read()
            .await
            .values()
            .find(|tenant| tenant.slug == slug)
            .cloned())
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn insert_review(&self, review: &Review) -> StoreResult<()> {
        let mut reviews = self.reviews.write().await;
        if reviews
            .iter()
            .any(|r| r.product_id == review.product_id && r.user_id == review.user_id)
        {
            return Err(StoreError::Conflict(format!(
                "review by {} for {}",
                review.user_id, review.product_id
            )));
        }
        reviews.push(review.clone());
        Ok(())
    }

    async fn find_review_by_author(&self, product: Uuid, user: Uuid) -> StoreResult<Option<Review>> {
        Ok(self
            .reviews
            .read()
            .await
            .iter()
            .find(|r| r.product_id == product && r.user_id == user)
            .cloned())
    }

    async fn list_reviews(&self, product: Uuid, page: i64, limit: i64) -> StoreResult<Page<Review>> {
        let mut matching: Vec<Review> = self
            .reviews
            .read()
            .await
            .iter()
            .filter(|r| r.product_id == product)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let offset = (page.max(1) - 1).saturating_mul(limit.max(0));
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let docs = matching.into_iter().skip(offset).take(limit.max(0) as usize).collect();
        Ok(Page::new(docs, total, page.max(1), limit))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn resolve_session(&self, token: &str) -> StoreResult<Option<Viewer>> {
        Ok(self.sessions.read().await.get(token).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OrderLine, Payload, ReviewStats};
    use bigdecimal::BigDecimal;

    fn product(stock: Stock) -> Product {
        Product {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "Field guide".to_string(),
            price: BigDecimal::from(120),
            stock,
            payload: Payload::Text(Some("KEY-1".to_string())),
            reviews: ReviewStats::default(),
        }
    }

    fn new_order(product_id: Uuid) -> NewOrder {
        NewOrder::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![OrderLine {
                product_id,
                quantity: 1,
                price: BigDecimal::from(120),
            }],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transition_only_applies_from_expected_status() {
        let store = MemoryStore::new();
        let order = store.insert_order(&new_order(Uuid::new_v4())).await.unwrap();

        assert!(store
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Paid)
            .await
            .unwrap());
        assert!(!store
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap());
        assert_eq!(store.order(order.id).await.unwrap().status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn duplicate_payment_reference_is_a_conflict() {
        let store = MemoryStore::new();
        let first = new_order(Uuid::new_v4());
        let mut second = new_order(Uuid::new_v4());
        second.payment_reference = first.payment_reference;

        store.insert_order(&first).await.unwrap();
        assert!(matches!(
            store.insert_order(&second).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn decrement_never_goes_below_zero() {
        let store = MemoryStore::new();
        let item = product(Stock::Finite(1));
        store.add_product(item.clone()).await;

        assert!(store.decrement_stock(item.id).await.unwrap());
        assert!(!store.decrement_stock(item.id).await.unwrap());
        assert_eq!(store.product(item.id).await.unwrap().stock, Stock::Finite(0));
    }

    #[tokio::test]
    async fn reviews_page_newest_first() {
        let store = MemoryStore::new();
        let product_id = Uuid::new_v4();
        for minutes in 0..3 {
            store
                .insert_review(&Review {
                    id: Uuid::new_v4(),
                    product_id,
                    user_id: Uuid::new_v4(),
                    rating: 4,
                    comment: format!("review {minutes}"),
                    created_at: Utc::now() + chrono::Duration::minutes(minutes),
                })
                .await
                .unwrap();
        }

        let page = store.list_reviews(product_id, 1, 2).await.unwrap();
        assert_eq!(page.total_docs, 3);
        assert_eq!(page.total_pages, 2);
        assert!(page.has_next_page);
        assert_eq!(page.docs[0].comment, "review 2");
    }
}
