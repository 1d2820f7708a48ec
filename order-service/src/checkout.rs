use std::sync::Arc;

use num_traits::ToPrimitive;
use payment_gateway::{GatewayCredentials, PaymentGateway, PaymentLinkRequest};
use serde::Deserialize;
use shared::*;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

const INSERT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub tenant_slug: String,
    pub product_ids: Vec<Uuid>,
}

pub struct Checkout {
    orders: Arc<dyn OrderStore>,
    products: Arc<dyn ProductStore>,
    tenants: Arc<dyn TenantStore>,
    gateway: Arc<dyn PaymentGateway>,
    public_url: String,
}

impl Checkout {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        products: Arc<dyn ProductStore>,
        tenants: Arc<dyn TenantStore>,
        gateway: Arc<dyn PaymentGateway>,
        public_url: &str,
    ) -> Self {
        Self {
            orders,
            products,
            tenants,
            gateway,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Creates a pending order with one line per product at its current price.
    pub async fn create_order(&self, buyer: &Viewer, request: CreateOrderRequest) -> AppResult<Order> {
        let mut product_ids = request.product_ids;
        let mut seen = std::collections::HashSet::new();
        product_ids.retain(|id| seen.insert(*id));
        if product_ids.is_empty() {
            return Err(AppError::BadRequest("Cart is empty".to_string()));
        }

        let tenant = self
            .tenants
            .find_tenant_by_slug(&request.tenant_slug)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Store {} not found", request.tenant_slug)))?;

        let products = self.products.find_products(&product_ids).await?;
        let mut lines = Vec::with_capacity(product_ids.len());
        for id in &product_ids {
            let product = products
                .iter()
                .find(|p| p.id == *id && p.tenant_id == tenant.id)
                .ok_or_else(|| AppError::NotFound(format!("Product {id} not found")))?;
            if !product.stock.is_available() {
                return Err(AppError::Conflict(format!("{} is sold out", product.name)));
            }
            lines.push(OrderLine {
                product_id: product.id,
                quantity: 1,
                price: product.price.clone(),
            });
        }

        let mut order = NewOrder::new(tenant.id, buyer.id, lines)?;
        let mut attempt = 1;
        loop {
            match self.orders.insert_order(&order).await {
                Ok(stored) => {
                    info!(order_id = %stored.id, reference = %stored.payment_reference, buyer = %buyer.id, "Order created");
                    return Ok(stored);
                }
                Err(StoreError::Conflict(reason)) if attempt < INSERT_ATTEMPTS => {
                    warn!(attempt, %reason, "Payment reference collision, regenerating");
                    order.regenerate_reference();
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Asks the store's gateway for a checkout link and returns its URL.
    pub async fn create_payment_link(&self, order_id: Uuid, product_id: Option<Uuid>) -> AppResult<String> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;

        if order.status.is_terminal() {
            return Err(AppError::Conflict(format!("Order is already {}", order.status)));
        }
        if let Some(product_id) = product_id {
            if !order.contains_product(product_id) {
                return Err(AppError::BadRequest(format!("Product {product_id} is not part of this order")));
            }
        }

        let tenant = self
            .tenants
            .find_tenant(order.tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Store for order {order_id} not found")))?;
        let credentials = GatewayCredentials::for_tenant(&tenant)?;

        let amount = order
            .total
            .round(0)
            .to_i64()
            .filter(|amount| *amount > 0)
            .ok_or_else(|| AppError::BadRequest(format!("Order total {} cannot be charged", order.total)))?;

        let request = PaymentLinkRequest::new(
            order.payment_reference,
            amount,
            &format!("Don {}", order.payment_reference),
            format!("{}/checkout/success?orderId={}", self.public_url, order.id),
            format!("{}/cart?canceled=true", self.public_url),
        );

        let link = self.gateway.create_link(&credentials, &request).await?;
        if let Some(link_id) = &link.payment_link_id {
            self.orders.set_payment_link(order.id, link_id).await?;
        }

        info!(order_id = %order.id, reference = %order.payment_reference, "Payment link issued");
        Ok(link.checkout_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use shared::memory::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        gateway: Arc<FakeGateway>,
        checkout: Checkout,
        tenant: Tenant,
        buyer: Viewer,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = FakeGateway::new(FakeStatus::Fail);
        let tenant = tenant();
        store.add_tenant(tenant.clone()).await;
        let checkout = Checkout::new(
            store.clone(),
            store.clone(),
            store.clone(),
            gateway.clone(),
            "https://shop.example/",
        );
        Harness {
            store,
            gateway,
            checkout,
            tenant,
            buyer: viewer("a@x.com"),
        }
    }

    #[tokio::test]
    async fn order_totals_current_prices() {
        let h = harness().await;
        let a = product(&h.tenant, "A", Stock::Infinite, Payload::Text(None));
        let b = product(&h.tenant, "B", Stock::Finite(1), Payload::Text(None));
        h.store.add_product(a.clone()).await;
        h.store.add_product(b.clone()).await;

        let order = h
            .checkout
            .create_order(
                &h.buyer,
                CreateOrderRequest {
                    tenant_slug: h.tenant.slug.clone(),
                    product_ids: vec![a.id, b.id, a.id],
                },
            )
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.total, &a.price + &b.price);
        assert_eq!(order.buyer_id, h.buyer.id);
    }

    #[tokio::test]
    async fn sold_out_and_foreign_products_are_rejected() {
        let h = harness().await;
        let gone = product(&h.tenant, "Gone", Stock::Finite(0), Payload::Text(None));
        let foreign = product(&tenant(), "Elsewhere", Stock::Infinite, Payload::Text(None));
        h.store.add_product(gone.clone()).await;
        h.store.add_product(foreign.clone()).await;

        let request = |id| CreateOrderRequest {
            tenant_slug: h.tenant.slug.clone(),
            product_ids: vec![id],
        };
        assert!(matches!(
            h.checkout.create_order(&h.buyer, request(gone.id)).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            h.checkout.create_order(&h.buyer, request(foreign.id)).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            h.checkout
                .create_order(
                    &h.buyer,
                    CreateOrderRequest {
                        tenant_slug: h.tenant.slug.clone(),
                        product_ids: vec![],
                    }
                )
                .await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn payment_link_uses_store_credentials_and_public_url() {
        let h = harness().await;
        let p = product(&h.tenant, "Ebook", Stock::Infinite, Payload::Text(None));
        let order = pending_order(&h.store, &h.tenant, &h.buyer, &[&p]).await;

        let url = h.checkout.create_payment_link(order.id, Some(p.id)).await.unwrap();
        assert_eq!(url, format!("https://pay.example/{}", order.payment_reference));

        let links = h.gateway.links();
        let (credentials, request) = &links[0];
        assert_eq!(credentials.client_id, "client-1");
        assert_eq!(request.amount, 50_000);
        assert_eq!(
            request.return_url,
            format!("https://shop.example/checkout/success?orderId={}", order.id)
        );
        assert_eq!(request.cancel_url, "https://shop.example/cart?canceled=true");
        assert!(request.description.chars().count() <= 25);

        let stored = h.store.order(order.id).await.unwrap();
        assert_eq!(stored.payment_link_id, Some(format!("link-{}", order.payment_reference)));
    }

    #[tokio::test]
    async fn settled_orders_and_stray_products_get_no_link() {
        let h = harness().await;
        let p = product(&h.tenant, "Ebook", Stock::Infinite, Payload::Text(None));
        let paid = paid_order(&h.store, &h.tenant, &h.buyer, &[&p]).await;
        let open = pending_order(&h.store, &h.tenant, &h.buyer, &[&p]).await;

        assert!(matches!(
            h.checkout.create_payment_link(paid.id, None).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            h.checkout.create_payment_link(open.id, Some(Uuid::new_v4())).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(h.gateway.links().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_store_cannot_take_payment() {
        let h = harness().await;
        let mut bare = tenant();
        bare.payos_checksum_key = None;
        h.store.add_tenant(bare.clone()).await;
        let p = product(&bare, "Ebook", Stock::Infinite, Payload::Text(None));
        let order = pending_order(&h.store, &bare, &h.buyer, &[&p]).await;

        assert!(matches!(
            h.checkout.create_payment_link(order.id, None).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
