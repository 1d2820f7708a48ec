//! Persistence seams. The service ships a Postgres implementation; the
//! in-memory one in [`crate::memory`] backs tests and local runs.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{NewOrder, Order, OrderStatus, Page, PaymentReference, Product, Review, Tenant, Viewer};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("stored record is invalid: {0}")]
    Corrupt(String),
    #[error("store backend failure")]
    Backend(#[source] BoxError),
}

impl StoreError {
    pub fn backend<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        StoreError::Backend(error.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the payment reference is already taken.
    async fn insert_order(&self, order: &NewOrder) -> StoreResult<Order>;

    async fn find_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn find_order_by_reference(&self, reference: PaymentReference) -> StoreResult<Option<Order>>;

    /// Atomically moves `id` from `from` to `to`. Returns false, without writing,
    /// when the stored status is no longer `from` or the order does not exist.
    async fn transition_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool>;

    async fn set_payment_link(&self, id: Uuid, payment_link_id: &str) -> StoreResult<()>;

    /// Most recent paid order of `buyer` with a line for `product`.
    async fn find_paid_order_with_product(&self, buyer: Uuid, product: Uuid) -> StoreResult<Option<Order>>;

    /// Paid orders of `buyer`, newest first.
    async fn list_paid_orders(&self, buyer: Uuid) -> StoreResult<Vec<Order>>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn find_product(&self, id: Uuid) -> StoreResult<Option<Product>>;

    async fn find_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>>;

    /// Decrements finite stock by one if it is above zero. Returns whether a
    /// unit was taken.
    async fn decrement_stock(&self, id: Uuid) -> StoreResult<bool>;

    /// Folds one new rating into the running review aggregates.
    async fn record_rating(&self, id: Uuid, rating: i16) -> StoreResult<()>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>>;

    async fn find_tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>>;
}

#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the user already reviewed the product.
    async fn insert_review(&self, review: &Review) -> StoreResult<()>;

    async fn find_review_by_author(&self, product: Uuid, user: Uuid) -> StoreResult<Option<Review>>;

    /// Newest first. `page` is 1-based.
    async fn list_reviews(&self, product: Uuid, page: i64, limit: i64) -> StoreResult<Page<Review>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn resolve_session(&self, token: &str) -> StoreResult<Option<Viewer>>;
}
