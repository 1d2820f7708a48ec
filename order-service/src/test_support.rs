//! Fixtures shared by the unit tests of this crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use payment_gateway::{
    GatewayCredentials, GatewayError, GatewayStatus, PaymentGateway, PaymentLink, PaymentLinkRequest,
};
use shared::memory::MemoryStore;
use shared::*;
use uuid::Uuid;

use crate::delivery::AssetStore;

/// What the fake gateway answers to status queries.
#[derive(Debug, Clone)]
pub enum FakeStatus {
    Status(GatewayStatus),
    Fail,
    Hang,
}

pub struct FakeGateway {
    status: Mutex<FakeStatus>,
    status_calls: AtomicUsize,
    links: Mutex<Vec<(GatewayCredentials, PaymentLinkRequest)>>,
}

impl FakeGateway {
    pub fn new(status: FakeStatus) -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(status),
            status_calls: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, status: FakeStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn links(&self) -> Vec<(GatewayCredentials, PaymentLinkRequest)> {
        self.links.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_link(
        &self,
        credentials: &GatewayCredentials,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        self.links
            .lock()
            .unwrap()
            .push((credentials.clone(), request.clone()));
        Ok(PaymentLink {
            checkout_url: format!("https://pay.example/{}", request.reference),
            payment_link_id: Some(format!("link-{}", request.reference)),
        })
    }

    async fn get_status(
        &self,
        _credentials: &GatewayCredentials,
        _reference: PaymentReference,
    ) -> Result<GatewayStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let status = self.status.lock().unwrap().clone();
        match status {
            FakeStatus::Status(status) => Ok(status),
            FakeStatus::Fail => Err(GatewayError::Malformed("gateway unavailable".to_string())),
            FakeStatus::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(GatewayStatus::Paid)
            }
        }
    }
}

pub const CHECKSUM_KEY: &str = "checksum-key";

pub fn tenant() -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: "Sach Hay".to_string(),
        slug: "sach-hay".to_string(),
        payos_client_id: Some("client-1".to_string()),
        payos_api_key: Some("api-1".to_string()),
        payos_checksum_key: Some(CHECKSUM_KEY.to_string()),
    }
}

pub fn product(tenant: &Tenant, name: &str, stock: Stock, payload: Payload) -> Product {
    Product {
        id: Uuid::new_v4(),
        tenant_id: tenant.id,
        name: name.to_string(),
        price: BigDecimal::from(50_000),
        stock,
        payload,
        reviews: ReviewStats::default(),
    }
}

pub fn viewer(email: &str) -> Viewer {
    Viewer {
        id: Uuid::new_v4(),
        email: email.to_string(),
    }
}

/// Inserts a pending order for `buyer` with one line per product.
pub async fn pending_order(store: &MemoryStore, tenant: &Tenant, buyer: &Viewer, products: &[&Product]) -> Order {
    let lines = products
        .iter()
        .map(|p| OrderLine {
            product_id: p.id,
            quantity: 1,
            price: p.price.clone(),
        })
        .collect();
    let mut order = NewOrder::new(tenant.id, buyer.id, lines).unwrap();
    loop {
        match store.insert_order(&order).await {
            Ok(stored) => return stored,
            Err(StoreError::Conflict(_)) => order.regenerate_reference(),
            Err(e) => panic!("insert failed: {e}"),
        }
    }
}

/// Inserts an order for `buyer` and marks it paid without touching stock.
pub async fn paid_order(store: &MemoryStore, tenant: &Tenant, buyer: &Viewer, products: &[&Product]) -> Order {
    let order = pending_order(store, tenant, buyer, products).await;
    store
        .transition_status(order.id, OrderStatus::Pending, OrderStatus::Paid)
        .await
        .unwrap();
    store.order(order.id).await.unwrap()
}

/// Asset store keyed by file name.
pub struct MemoryAssets(pub HashMap<String, Vec<u8>>);

#[async_trait]
impl AssetStore for MemoryAssets {
    async fn load(&self, asset: &FileAsset) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.0.get(&asset.filename).cloned())
    }
}
