use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod store;

pub use store::*;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("an order needs at least one line")]
    EmptyOrder,
    #[error("order line quantity must be at least 1, got {0}")]
    InvalidQuantity(i32),
    #[error("payment reference {0} is outside 1..=2^53-1")]
    InvalidPaymentReference(i64),
    #[error("unknown order status: {0}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Paid and cancelled orders never change again.
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        self == OrderStatus::Pending && next.is_terminal()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Numeric order code shared with the payment gateway.
///
/// The gateway only accepts positive integers that survive a round trip through
/// an IEEE double, so values are capped at 2^53 - 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct PaymentReference(i64);

impl PaymentReference {
    pub const MAX: i64 = 9_007_199_254_740_991;

    pub fn new(value: i64) -> Result<Self, DomainError> {
        if (1..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DomainError::InvalidPaymentReference(value))
        }
    }

    pub fn generate() -> Self {
        Self::generate_at(Utc::now(), &mut rand::thread_rng())
    }

    /// Low nine digits of the millisecond clock followed by a three digit random suffix.
    pub fn generate_at<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> Self {
        let millis = now.timestamp_millis().rem_euclid(1_000_000_000);
        let suffix: i64 = rng.gen_range(0..1000);
        // Keep it positive even when the clock digits are all zero.
        Self((millis * 1000 + suffix).max(1))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for PaymentReference {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PaymentReference> for i64 {
    fn from(reference: PaymentReference) -> Self {
        reference.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
}

impl OrderLine {
    pub fn subtotal(&self) -> BigDecimal {
        &self.price * BigDecimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub buyer_id: Uuid,
    pub items: Vec<OrderLine>,
    pub total: BigDecimal,
    pub status: OrderStatus,
    pub payment_reference: PaymentReference,
    pub payment_link_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn contains_product(&self, product_id: Uuid) -> bool {
        self.items.iter().any(|line| line.product_id == product_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub buyer_id: Uuid,
    pub items: Vec<OrderLine>,
    pub total: BigDecimal,
    pub payment_reference: PaymentReference,
}

impl NewOrder {
    /// Builds a pending order. The total is fixed here and never recomputed.
    pub fn new(tenant_id: Uuid, buyer_id: Uuid, items: Vec<OrderLine>) -> Result<Self, DomainError> {
        if items.is_empty() {
            return Err(DomainError::EmptyOrder);
        }
        if let Some(line) = items.iter().find(|line| line.quantity < 1) {
            return Err(DomainError::InvalidQuantity(line.quantity));
        }

        let total = items
            .iter()
            .map(OrderLine::subtotal)
            .fold(BigDecimal::from(0), |acc, subtotal| acc + subtotal);

        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id,
            buyer_id,
            items,
            total,
            payment_reference: PaymentReference::generate(),
        })
    }

    pub fn regenerate_reference(&mut self) {
        self.payment_reference = PaymentReference::generate();
    }
}

/// Stock after default resolution. Rows that never set the flags are treated as
/// unlimited, a finite product without a count holds a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "units", rename_all = "lowercase")]
pub enum Stock {
    Infinite,
    Finite(u32),
}

impl Stock {
    pub fn normalize(is_infinite_stock: Option<bool>, stock: Option<i32>) -> Self {
        if is_infinite_stock.unwrap_or(true) {
            Stock::Infinite
        } else {
            Stock::Finite(stock.unwrap_or(1).max(0) as u32)
        }
    }

    pub fn is_available(self) -> bool {
        match self {
            Stock::Infinite => true,
            Stock::Finite(units) => units > 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAsset {
    pub filename: String,
    pub filesize: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(Option<String>),
    File(Option<FileAsset>),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub review_count: i32,
    pub rating_total: i64,
    pub star_counts: [i32; 5],
}

impl ReviewStats {
    pub fn average(&self) -> f64 {
        if self.review_count == 0 {
            return 0.0;
        }
        let avg = self.rating_total as f64 / self.review_count as f64;
        (avg * 10.0).round() / 10.0
    }

    pub fn record(&mut self, rating: i16) {
        self.review_count += 1;
        self.rating_total += i64::from(rating);
        if let Some(bucket) = self.star_counts.get_mut((rating as usize).wrapping_sub(1)) {
            *bucket += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub stock: Stock,
    pub payload: Payload,
    pub reviews: ReviewStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub payos_client_id: Option<String>,
    pub payos_api_key: Option<String>,
    pub payos_checksum_key: Option<String>,
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: Uuid,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub docs: Vec<T>,
    pub total_docs: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    pub fn new(docs: Vec<T>, total_docs: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 { (total_docs + limit - 1) / limit } else { 0 };
        Self {
            docs,
            total_docs,
            page,
            limit,
            total_pages,
            has_next_page: page < total_pages,
        }
    }
}

pub trait Identified {
    fn id(&self) -> Uuid;
}

/// A relationship field that is either a bare id or the expanded record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Relation<T> {
    Reference(Uuid),
    Expanded(T),
}

impl<T: Identified> Relation<T> {
    pub fn id(&self) -> Uuid {
        match self {
            Relation::Reference(id) => *id,
            Relation::Expanded(record) => record.id(),
        }
    }

    pub fn expanded(&self) -> Option<&T> {
        match self {
            Relation::Reference(_) => None,
            Relation::Expanded(record) => Some(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::mock::StepRng;

    fn line(price: i64, quantity: i32) -> OrderLine {
        OrderLine {
            product_id: Uuid::new_v4(),
            quantity,
            price: BigDecimal::from(price),
        }
    }

    #[test]
    fn terminal_statuses_do_not_transition() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn status_parses_store_strings() {
        assert_eq!("paid".parse::<OrderStatus>().unwrap(), OrderStatus::Paid);
        assert!("refunded".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn payment_reference_stays_within_safe_integer_range() {
        let now = Utc.with_ymd_and_hms(2286, 11, 20, 17, 46, 39).unwrap();
        let mut rng = StepRng::new(0, 1);
        let reference = PaymentReference::generate_at(now, &mut rng);
        assert!(reference.get() > 0);
        assert!(reference.get() <= PaymentReference::MAX);
        assert!(reference.get() < 1_000_000_000_000);
    }

    #[test]
    fn payment_reference_rejects_out_of_range_values() {
        assert!(PaymentReference::new(0).is_err());
        assert!(PaymentReference::new(PaymentReference::MAX + 1).is_err());
        assert!(serde_json::from_str::<PaymentReference>("-5").is_err());
        assert_eq!(serde_json::from_str::<PaymentReference>("42").unwrap().get(), 42);
    }

    #[test]
    fn new_order_fixes_total_from_lines() {
        let order = NewOrder::new(Uuid::new_v4(), Uuid::new_v4(), vec![line(100, 2), line(50, 1)]).unwrap();
        assert_eq!(order.total, BigDecimal::from(250));
    }

    #[test]
    fn new_order_requires_lines() {
        assert_eq!(
            NewOrder::new(Uuid::new_v4(), Uuid::new_v4(), vec![]),
            Err(DomainError::EmptyOrder)
        );
        assert_eq!(
            NewOrder::new(Uuid::new_v4(), Uuid::new_v4(), vec![line(10, 0)]),
            Err(DomainError::InvalidQuantity(0))
        );
    }

    #[test]
    fn stock_defaults_resolve_once() {
        assert_eq!(Stock::normalize(None, None), Stock::Infinite);
        assert_eq!(Stock::normalize(Some(false), None), Stock::Finite(1));
        assert_eq!(Stock::normalize(Some(false), Some(-3)), Stock::Finite(0));
        assert!(!Stock::Finite(0).is_available());
    }

    #[test]
    fn review_stats_round_average_to_one_decimal() {
        let mut stats = ReviewStats::default();
        stats.record(5);
        stats.record(4);
        stats.record(4);
        assert_eq!(stats.average(), 4.3);
        assert_eq!(stats.star_counts, [0, 0, 0, 2, 1]);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Summary {
        id: Uuid,
        name: String,
    }

    impl Identified for Summary {
        fn id(&self) -> Uuid {
            self.id
        }
    }

    #[test]
    fn relation_resolves_id_from_either_shape() {
        let id = Uuid::new_v4();
        let reference: Relation<Summary> = serde_json::from_value(serde_json::json!(id)).unwrap();
        let expanded: Relation<Summary> =
            serde_json::from_value(serde_json::json!({"id": id, "name": "Guide"})).unwrap();

        assert_eq!(reference.id(), id);
        assert_eq!(expanded.id(), id);
        assert!(reference.expanded().is_none());
        assert_eq!(expanded.expanded().map(|s| s.name.as_str()), Some("Guide"));
    }
}
