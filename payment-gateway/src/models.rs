use serde::{Deserialize, Serialize};

/// Every PayOS response is wrapped in this envelope; `code == "00"` means success.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub desc: String,
    pub data: Option<T>,
}

pub const SUCCESS_CODE: &str = "00";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody<'a> {
    pub order_code: i64,
    pub amount: i64,
    pub description: &'a str,
    pub cancel_url: &'a str,
    pub return_url: &'a str,
    pub signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentData {
    pub checkout_url: String,
    pub payment_link_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfoData {
    pub order_code: Option<i64>,
    pub status: String,
}
