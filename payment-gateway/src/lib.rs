//! Client for the PayOS payment gateway.
//!
//! Credentials belong to a single tenant and are handed to every call. The
//! client itself holds none.

mod models;
mod payos;
mod signature;

use std::fmt;

use async_trait::async_trait;
use shared::{PaymentReference, Tenant};
use thiserror::Error;

pub use models::SUCCESS_CODE;
pub use payos::{PayOsGateway, DEFAULT_BASE_URL};
pub use signature::{sign_data, sign_payment_request, verify_data};

/// PayOS rejects descriptions longer than this.
pub const DESCRIPTION_LIMIT: usize = 25;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("storefront has not configured its payment credentials")]
    Unconfigured,
    #[error("gateway request failed")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected the request ({code}): {desc}")]
    Rejected { code: String, desc: String },
    #[error("unexpected gateway response: {0}")]
    Malformed(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct GatewayCredentials {
    pub client_id: String,
    pub api_key: String,
    pub checksum_key: String,
}

impl GatewayCredentials {
    /// Trims every field; a missing or blank one fails closed.
    pub fn resolve(
        client_id: Option<&str>,
        api_key: Option<&str>,
        checksum_key: Option<&str>,
    ) -> Result<Self, GatewayError> {
        let field = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or(GatewayError::Unconfigured)
        };

        Ok(Self {
            client_id: field(client_id)?,
            api_key: field(api_key)?,
            checksum_key: field(checksum_key)?,
        })
    }

    pub fn for_tenant(tenant: &Tenant) -> Result<Self, GatewayError> {
        Self::resolve(
            tenant.payos_client_id.as_deref(),
            tenant.payos_api_key.as_deref(),
            tenant.payos_checksum_key.as_deref(),
        )
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("client_id", &self.client_id)
            .field("api_key", &"<redacted>")
            .field("checksum_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLinkRequest {
    pub reference: PaymentReference,
    pub amount: i64,
    pub description: String,
    pub return_url: String,
    pub cancel_url: String,
}

impl PaymentLinkRequest {
    pub fn new(
        reference: PaymentReference,
        amount: i64,
        description: &str,
        return_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            reference,
            amount,
            description: truncate_description(description),
            return_url,
            cancel_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentLink {
    pub checkout_url: String,
    pub payment_link_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Paid,
    Cancelled,
    /// Pending, processing, expired or anything the gateway adds later.
    Other(String),
}

impl GatewayStatus {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("paid") {
            GatewayStatus::Paid
        } else if raw.eq_ignore_ascii_case("cancelled") {
            GatewayStatus::Cancelled
        } else {
            GatewayStatus::Other(raw.to_string())
        }
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_link(
        &self,
        credentials: &GatewayCredentials,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError>;

    async fn get_status(
        &self,
        credentials: &GatewayCredentials,
        reference: PaymentReference,
    ) -> Result<GatewayStatus, GatewayError>;
}

pub fn truncate_description(description: &str) -> String {
    description.chars().take(DESCRIPTION_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_fail_closed_when_any_field_is_missing() {
        assert!(matches!(
            GatewayCredentials::resolve(Some("id"), None, Some("sum")),
            Err(GatewayError::Unconfigured)
        ));
        assert!(matches!(
            GatewayCredentials::resolve(Some("id"), Some("   "), Some("sum")),
            Err(GatewayError::Unconfigured)
        ));
    }

    #[test]
    fn credentials_are_trimmed() {
        let creds = GatewayCredentials::resolve(Some(" id "), Some("key\n"), Some("\tsum")).unwrap();
        assert_eq!(creds.client_id, "id");
        assert_eq!(creds.api_key, "key");
        assert_eq!(creds.checksum_key, "sum");
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = GatewayCredentials::resolve(Some("id"), Some("secret-key"), Some("secret-sum")).unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret-key"));
        assert!(!debug.contains("secret-sum"));
    }

    #[test]
    fn description_is_cut_at_char_boundary() {
        let long = "Thanh toán đơn hàng số 1234567890";
        let cut = truncate_description(long);
        assert_eq!(cut.chars().count(), DESCRIPTION_LIMIT);
        assert!(long.starts_with(&cut));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(GatewayStatus::parse("PAID"), GatewayStatus::Paid);
        assert_eq!(GatewayStatus::parse("Paid"), GatewayStatus::Paid);
        assert_eq!(GatewayStatus::parse("CANCELLED"), GatewayStatus::Cancelled);
        assert_eq!(
            GatewayStatus::parse("PROCESSING"),
            GatewayStatus::Other("PROCESSING".to_string())
        );
    }
}
