//! Moves orders out of `pending`.
//!
//! Webhooks, status polls and admin edits all funnel into [`Reconciler::settle`],
//! which performs a compare-and-swap on the order status. Only the caller that
//! wins the swap adjusts inventory, so a payment observed twice never sells
//! twice.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use inventory::{Adjustment, InventoryAdjuster};
use payment_gateway::{verify_data, GatewayCredentials, GatewayStatus, PaymentGateway, SUCCESS_CODE};
use serde::Deserialize;
use serde_json::{Map, Value};
use shared::*;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Webhook,
    Poll,
    Admin,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Webhook => "webhook",
            Trigger::Poll => "poll",
            Trigger::Admin => "admin",
        })
    }
}

/// Body PayOS posts to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookNotice {
    pub code: String,
    #[serde(default)]
    pub desc: String,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl WebhookNotice {
    pub fn order_code(&self) -> AppResult<PaymentReference> {
        let raw = match self.data.get("orderCode") {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        let raw = raw.ok_or_else(|| AppError::BadRequest("Webhook data carries no orderCode".to_string()))?;
        Ok(PaymentReference::new(raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub gateway_timeout: Duration,
    /// Reject webhooks that arrive unsigned.
    pub require_webhook_signature: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: Duration::from_secs(10),
            require_webhook_signature: false,
        }
    }
}

pub struct Reconciler {
    orders: Arc<dyn OrderStore>,
    tenants: Arc<dyn TenantStore>,
    gateway: Arc<dyn PaymentGateway>,
    inventory: InventoryAdjuster,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        tenants: Arc<dyn TenantStore>,
        gateway: Arc<dyn PaymentGateway>,
        inventory: InventoryAdjuster,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            orders,
            tenants,
            gateway,
            inventory,
            config,
        }
    }

    pub async fn handle_webhook(&self, notice: &WebhookNotice) -> AppResult<OrderStatus> {
        let reference = notice.order_code()?;
        let order = self
            .orders
            .find_order_by_reference(reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No order for payment reference {reference}")))?;

        self.verify_signature(notice, &order).await?;

        if notice.code != SUCCESS_CODE {
            info!(
                trigger = %Trigger::Webhook,
                order_id = %order.id,
                code = %notice.code,
                "Ignoring unsuccessful payment notice"
            );
            return Ok(order.status);
        }

        self.settle(&order, OrderStatus::Paid, Trigger::Webhook).await
    }

    async fn verify_signature(&self, notice: &WebhookNotice, order: &Order) -> AppResult<()> {
        let Some(signature) = notice.signature.as_deref() else {
            if self.config.require_webhook_signature {
                warn!(order_id = %order.id, "Rejected unsigned webhook");
                return Err(AppError::BadRequest("Webhook signature is required".to_string()));
            }
            return Ok(());
        };

        let tenant = self.tenants.find_tenant(order.tenant_id).await?;
        let verified = tenant
            .and_then(|t| t.payos_checksum_key)
            .map(|key| verify_data(&notice.data, signature, key.trim()))
            .unwrap_or(false);

        if !verified {
            warn!(order_id = %order.id, "Rejected webhook with invalid signature");
            return Err(AppError::BadRequest("Invalid webhook signature".to_string()));
        }
        Ok(())
    }

    /// Asks the gateway for the payment state of a pending order. Gateway
    /// failures and timeouts leave the order pending.
    pub async fn check_order_status(&self, order_id: Uuid) -> AppResult<OrderStatus> {
        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;

        if order.status.is_terminal() {
            return Ok(order.status);
        }

        let tenant = self
            .tenants
            .find_tenant(order.tenant_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Store for order {order_id} not found")))?;
        let credentials = GatewayCredentials::for_tenant(&tenant)?;

        let lookup = tokio::time::timeout(
            self.config.gateway_timeout,
            self.gateway.get_status(&credentials, order.payment_reference),
        )
        .await;

        match lookup {
            Ok(Ok(GatewayStatus::Paid)) => self.settle(&order, OrderStatus::Paid, Trigger::Poll).await,
            Ok(Ok(GatewayStatus::Cancelled)) => self.settle(&order, OrderStatus::Cancelled, Trigger::Poll).await,
            Ok(Ok(GatewayStatus::Other(raw))) => {
                debug!(trigger = %Trigger::Poll, %order_id, gateway_status = %raw, "Payment still open");
                Ok(OrderStatus::Pending)
            }
            Ok(Err(e)) => {
                warn!(trigger = %Trigger::Poll, %order_id, error = %e, "Gateway status lookup failed");
                Ok(OrderStatus::Pending)
            }
            Err(_) => {
                warn!(
                    trigger = %Trigger::Poll,
                    %order_id,
                    timeout_ms = self.config.gateway_timeout.as_millis() as u64,
                    "Gateway status lookup timed out"
                );
                Ok(OrderStatus::Pending)
            }
        }
    }

    /// Admin edit of an order status. Only `paid` and `cancelled` are valid
    /// targets and terminal orders stay as they are.
    pub async fn apply_manual(&self, order_id: Uuid, target: OrderStatus) -> AppResult<OrderStatus> {
        if !target.is_terminal() {
            return Err(AppError::BadRequest(format!("Cannot move an order to {target}")));
        }

        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))?;

        let status = self.settle(&order, target, Trigger::Admin).await?;
        if status != target {
            return Err(AppError::Conflict(format!("Order is already {status}")));
        }
        Ok(status)
    }

    /// Compare-and-swap `pending -> target`. The winner adjusts inventory when
    /// the target is `paid`; everyone else gets the status that is now stored.
    pub async fn settle(&self, order: &Order, target: OrderStatus, trigger: Trigger) -> AppResult<OrderStatus> {
        if !OrderStatus::Pending.can_transition_to(target) {
            return Err(AppError::BadRequest(format!("Cannot move an order to {target}")));
        }

        if order.status.is_terminal() {
            debug!(%trigger, order_id = %order.id, status = %order.status, "Order already settled");
            return Ok(order.status);
        }

        let won = self
            .orders
            .transition_status(order.id, OrderStatus::Pending, target)
            .await?;

        if !won {
            let current = self
                .orders
                .find_order(order.id)
                .await?
                .map(|o| o.status)
                .unwrap_or(order.status);
            info!(%trigger, order_id = %order.id, status = %current, "Order was settled concurrently");
            return Ok(current);
        }

        info!(%trigger, order_id = %order.id, "Order {} is now {}", order.payment_reference, target);

        if target == OrderStatus::Paid {
            self.adjust_inventory(order, trigger).await;
        }
        Ok(target)
    }

    // Failures are logged per line; the status change stands.
    async fn adjust_inventory(&self, order: &Order, trigger: Trigger) {
        for line in &order.items {
            match self.inventory.adjust(line.product_id).await {
                Ok(Adjustment::Exhausted) => {
                    warn!(%trigger, order_id = %order.id, product_id = %line.product_id, "Paid for a product with no stock left");
                }
                Ok(adjustment) => {
                    debug!(%trigger, order_id = %order.id, product_id = %line.product_id, ?adjustment, "Inventory adjusted");
                }
                Err(e) => {
                    error!(%trigger, order_id = %order.id, product_id = %line.product_id, error = %e, "Inventory adjustment failed");
                }
            }
        }
    }
}
