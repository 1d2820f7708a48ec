use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

use crate::PaymentLinkRequest;

type HmacSha256 = Hmac<Sha256>;

fn hmac_hex(message: &str, key: &str) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = HmacSha256::new_from_slice(key.as_bytes()).expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Signature PayOS expects on a create-payment-link call.
pub fn sign_payment_request(request: &PaymentLinkRequest, checksum_key: &str) -> String {
    let message = format!(
        "amount={}&cancelUrl={}&description={}&orderCode={}&returnUrl={}",
        request.amount, request.cancel_url, request.description, request.reference, request.return_url
    );
    hmac_hex(&message, checksum_key)
}

fn canonical(data: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|key| {
            let value = match &data[key] {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{key}={value}")
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Signs a webhook `data` object: keys sorted, `k=v` joined with `&`, nulls empty.
pub fn sign_data(data: &Map<String, Value>, checksum_key: &str) -> String {
    hmac_hex(&canonical(data), checksum_key)
}

pub fn verify_data(data: &Map<String, Value>, signature: &str, checksum_key: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(checksum_key.as_bytes()) else {
        return false;
    };
    mac.update(canonical(data).as_bytes());
    mac.verify_slice(&expected).is_ok()
}
