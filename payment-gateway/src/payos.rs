use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::PaymentReference;
use tracing::{debug, info, warn};

use crate::models::*;
use crate::signature::sign_payment_request;
use crate::{GatewayCredentials, GatewayError, GatewayStatus, PaymentGateway, PaymentLink, PaymentLinkRequest};

pub const DEFAULT_BASE_URL: &str = "https://api-merchant.payos.vn";

/// Shared HTTP plumbing. Holds no tenant state; see [`PayOsSession`].
#[derive(Clone)]
pub struct PayOsGateway {
    http: Client,
    base_url: String,
}

impl PayOsGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn session<'a>(&'a self, credentials: &'a GatewayCredentials) -> PayOsSession<'a> {
        PayOsSession {
            http: &self.http,
            base_url: &self.base_url,
            credentials,
        }
    }
}

/// A client bound to one tenant's credentials for the duration of one call.
struct PayOsSession<'a> {
    http: &'a Client,
    base_url: &'a str,
    credentials: &'a GatewayCredentials,
}

impl PayOsSession<'_> {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-client-id", &self.credentials.client_id)
            .header("x-api-key", &self.credentials.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.send().await?;
        let status = response.status();
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(format!("HTTP {status}: {e}")))?;

        if envelope.code != SUCCESS_CODE {
            return Err(GatewayError::Rejected {
                code: envelope.code,
                desc: envelope.desc,
            });
        }
        envelope
            .data
            .ok_or_else(|| GatewayError::Malformed("response carried no data".to_string()))
    }

    async fn create_link(&self, request: &PaymentLinkRequest) -> Result<PaymentLink, GatewayError> {
        let body = CreatePaymentBody {
            order_code: request.reference.get(),
            amount: request.amount,
            description: &request.description,
            cancel_url: &request.cancel_url,
            return_url: &request.return_url,
            signature: sign_payment_request(request, &self.credentials.checksum_key),
        };

        debug!(order_code = %request.reference, "Calling PayOS create payment link");
        let data: CreatePaymentData = self
            .send(self.request(Method::POST, "/v2/payment-requests").json(&body))
            .await?;

        info!(order_code = %request.reference, "PayOS payment link created");
        Ok(PaymentLink {
            checkout_url: data.checkout_url,
            payment_link_id: data.payment_link_id,
        })
    }

    async fn get_status(&self, reference: PaymentReference) -> Result<GatewayStatus, GatewayError> {
        let data: PaymentInfoData = self
            .send(self.request(Method::GET, &format!("/v2/payment-requests/{reference}")))
            .await?;

        if let Some(code) = data.order_code {
            if code != reference.get() {
                warn!(expected = %reference, got = code, "PayOS answered for a different order code");
                return Err(GatewayError::Malformed(format!(
                    "status for order code {code}, expected {reference}"
                )));
            }
        }
        Ok(GatewayStatus::parse(&data.status))
    }
}

#[async_trait]
impl PaymentGateway for PayOsGateway {
    async fn create_link(
        &self,
        credentials: &GatewayCredentials,
        request: &PaymentLinkRequest,
    ) -> Result<PaymentLink, GatewayError> {
        self.session(credentials).create_link(request).await
    }

    async fn get_status(
        &self,
        credentials: &GatewayCredentials,
        reference: PaymentReference,
    ) -> Result<GatewayStatus, GatewayError> {
        self.session(credentials).get_status(reference).await
    }
}
