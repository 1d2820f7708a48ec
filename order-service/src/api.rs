use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Path, Query, Request, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::{get, patch, post},
    Router,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use payment_gateway::PaymentGateway;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use shared::*;
use uuid::Uuid;

use crate::auth::{Admin, CurrentViewer, MaybeViewer};
use crate::checkout::{Checkout, CreateOrderRequest};
use crate::delivery::{AssetStore, ContentPackager, ContentPayload, FontAsset};
use crate::entitlement::Entitlements;
use crate::error::{AppError, AppResult};
use crate::reconciliation::{Reconciler, ReconcilerConfig, WebhookNotice};
use crate::reviews::{NewReview, Reviews};

/// Every store the service reads or writes.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub products: Arc<dyn ProductStore>,
    pub tenants: Arc<dyn TenantStore>,
    pub reviews: Arc<dyn ReviewStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: OrderStore + ProductStore + TenantStore + ReviewStore + SessionStore + 'static,
    {
        Self {
            orders: store.clone(),
            products: store.clone(),
            tenants: store.clone(),
            reviews: store.clone(),
            sessions: store,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub public_url: String,
    pub reconciler: ReconcilerConfig,
    pub admin_token: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderStore>,
    pub products: Arc<dyn ProductStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub reconciler: Arc<Reconciler>,
    pub checkout: Arc<Checkout>,
    pub entitlements: Entitlements,
    pub packager: Arc<ContentPackager>,
    pub reviews: Arc<Reviews>,
    pub admin_token: Option<String>,
}

impl AppState {
    pub fn new(
        stores: Stores,
        gateway: Arc<dyn PaymentGateway>,
        assets: Arc<dyn AssetStore>,
        font: Arc<FontAsset>,
        settings: Settings,
    ) -> Self {
        let entitlements = Entitlements::new(stores.orders.clone());
        let reconciler = Reconciler::new(
            stores.orders.clone(),
            stores.tenants.clone(),
            gateway.clone(),
            inventory::InventoryAdjuster::new(stores.products.clone()),
            settings.reconciler,
        );
        let checkout = Checkout::new(
            stores.orders.clone(),
            stores.products.clone(),
            stores.tenants.clone(),
            gateway,
            &settings.public_url,
        );
        let packager = ContentPackager::new(stores.products.clone(), entitlements.clone(), assets, font);
        let reviews = Reviews::new(stores.reviews.clone(), stores.products.clone(), entitlements.clone());

        Self {
            orders: stores.orders,
            products: stores.products,
            sessions: stores.sessions,
            reconciler: Arc::new(reconciler),
            checkout: Arc::new(checkout),
            entitlements,
            packager: Arc::new(packager),
            reviews: Arc::new(reviews),
            admin_token: settings.admin_token.filter(|token| !token.is_empty()),
        }
    }
}

/// JSON body whose rejections use the service's error shape.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;
        Ok(JsonBody(value))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkRequest {
    pub order_id: Uuid,
    #[serde(default)]
    pub product_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub tenant_id: Uuid,
}

impl Identified for ProductSummary {
    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineView {
    pub product: Relation<ProductSummary>,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub status: OrderStatus,
    pub total: BigDecimal,
    pub payment_reference: PaymentReference,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderLineView>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/payment/webhook", post(payment_webhook))
        .route("/api/payment/link", post(create_payment_link))
        .route("/api/payment/status", post(check_payment_status))
        .route("/api/checkout/orders", post(create_order))
        .route("/api/products/:id/ownership", get(ownership))
        .route("/api/products/:id/content", get(product_content))
        .route("/api/products/:id/reviews", get(list_reviews).post(create_review))
        .route("/api/download/ebook/:id", get(download_ebook))
        .route("/api/me/orders", get(my_orders))
        .route("/api/admin/orders/:id/status", patch(set_order_status))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn payment_webhook(State(state): State<AppState>, body: Bytes) -> AppResult<Json<serde_json::Value>> {
    let notice: WebhookNotice = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Malformed webhook payload: {e}")))?;

    let status = state.reconciler.handle_webhook(&notice).await?;
    tracing::info!(code = %notice.code, %status, "Webhook processed");
    Ok(Json(json!({ "success": true })))
}

pub async fn create_payment_link(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<PaymentLinkRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let url = state
        .checkout
        .create_payment_link(request.order_id, request.product_id)
        .await?;
    Ok(Json(json!({ "url": url })))
}

pub async fn check_payment_status(
    State(state): State<AppState>,
    JsonBody(request): JsonBody<OrderStatusRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let status = state.reconciler.check_order_status(request.order_id).await?;
    Ok(Json(json!({ "status": status })))
}

pub async fn create_order(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    JsonBody(request): JsonBody<CreateOrderRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let order = state.checkout.create_order(&viewer, request).await?;
    Ok(Json(json!({
        "orderId": order.id,
        "paymentReference": order.payment_reference,
    })))
}

pub async fn ownership(
    State(state): State<AppState>,
    MaybeViewer(viewer): MaybeViewer,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let owned = state.entitlements.is_owned(viewer.as_ref(), product_id).await?;
    Ok(Json(json!({ "isOwned": owned })))
}

pub async fn product_content(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<ContentPayload>> {
    Ok(Json(state.packager.get_content(&viewer, product_id).await?))
}

pub async fn download_ebook(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Path(product_id): Path<Uuid>,
) -> AppResult<Response> {
    let file = state.packager.download(&viewer, product_id).await?;
    let disposition = format!("attachment; filename=\"{}\"", file.filename);
    Ok((
        [
            (header::CONTENT_TYPE, file.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, file.bytes.len().to_string()),
        ],
        file.bytes,
    )
        .into_response())
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<Page<Review>>> {
    Ok(Json(state.reviews.list_reviews(product_id, query.page, query.limit).await?))
}

pub async fn create_review(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
    Path(product_id): Path<Uuid>,
    JsonBody(review): JsonBody<NewReview>,
) -> AppResult<Json<serde_json::Value>> {
    state.reviews.create_review(&viewer, product_id, review).await?;
    Ok(Json(json!({ "success": true })))
}

/// Paid orders of the caller with their products expanded. Lines whose
/// product was deleted keep the bare id.
pub async fn my_orders(
    State(state): State<AppState>,
    CurrentViewer(viewer): CurrentViewer,
) -> AppResult<Json<Vec<OrderView>>> {
    let orders = state.orders.list_paid_orders(viewer.id).await?;

    let mut ids: Vec<Uuid> = orders
        .iter()
        .flat_map(|order| order.items.iter().map(|line| line.product_id))
        .collect();
    ids.sort();
    ids.dedup();
    let products: HashMap<Uuid, ProductSummary> = state
        .products
        .find_products(&ids)
        .await?
        .into_iter()
        .map(|p| {
            let summary = ProductSummary {
                id: p.id,
                name: p.name,
                price: p.price,
                tenant_id: p.tenant_id,
            };
            (summary.id, summary)
        })
        .collect();

    let views = orders
        .into_iter()
        .map(|order| OrderView {
            id: order.id,
            status: order.status,
            total: order.total,
            payment_reference: order.payment_reference,
            created_at: order.created_at,
            items: order
                .items
                .into_iter()
                .map(|line| OrderLineView {
                    product: match products.get(&line.product_id) {
                        Some(summary) => Relation::Expanded(summary.clone()),
                        None => Relation::Reference(line.product_id),
                    },
                    quantity: line.quantity,
                    price: line.price,
                })
                .collect(),
        })
        .collect();

    Ok(Json(views))
}

pub async fn set_order_status(
    State(state): State<AppState>,
    _admin: Admin,
    Path(order_id): Path<Uuid>,
    JsonBody(change): JsonBody<StatusChange>,
) -> AppResult<Json<serde_json::Value>> {
    let status = state.reconciler.apply_manual(order_id, change.status).await?;
    Ok(Json(json!({ "status": status })))
}

pub async fn health_check() -> &'static str {
    "OK"
}
