use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = crate::schema::orders)]
pub struct DbOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub buyer_id: Uuid,
    pub total: BigDecimal,
    pub status: String,
    pub payment_reference: i64,
    pub payment_link_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::orders)]
pub struct NewDbOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub buyer_id: Uuid,
    pub total: BigDecimal,
    pub status: String,
    pub payment_reference: i64,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Identifiable, Associations)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(primary_key(order_id, position))]
#[diesel(belongs_to(DbOrder, foreign_key = order_id))]
pub struct DbOrderItem {
    pub order_id: Uuid,
    pub position: i32,
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::products)]
pub struct DbProduct {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub price: BigDecimal,
    pub is_infinite_stock: Option<bool>,
    pub stock: Option<i32>,
    pub product_type: String,
    pub payload_text: Option<String>,
    pub payload_filename: Option<String>,
    pub payload_filesize: Option<i64>,
    pub review_count: i32,
    pub rating_total: i64,
    pub star_1: i32,
    pub star_2: i32,
    pub star_3: i32,
    pub star_4: i32,
    pub star_5: i32,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::tenants)]
pub struct DbTenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub payos_client_id: Option<String>,
    pub payos_api_key: Option<String>,
    pub payos_checksum_key: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::reviews)]
pub struct DbReview {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: i16,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl NewDbOrder {
    pub fn from_new_order(order: &NewOrder) -> (Self, Vec<DbOrderItem>) {
        let row = Self {
            id: order.id,
            tenant_id: order.tenant_id,
            buyer_id: order.buyer_id,
            total: order.total.clone(),
            status: OrderStatus::Pending.as_str().to_string(),
            payment_reference: order.payment_reference.get(),
        };
        let items = order
            .items
            .iter()
            .enumerate()
            .map(|(position, line)| DbOrderItem {
                order_id: order.id,
                position: position as i32,
                product_id: line.product_id,
                quantity: line.quantity,
                price: line.price.clone(),
            })
            .collect();
        (row, items)
    }
}

impl DbOrder {
    /// `items` must already be sorted by position.
    pub fn into_order(self, items: Vec<DbOrderItem>) -> Result<Order, StoreError> {
        let status = self
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", self.id)))?;
        let payment_reference = PaymentReference::new(self.payment_reference)
            .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", self.id)))?;

        Ok(Order {
            id: self.id,
            tenant_id: self.tenant_id,
            buyer_id: self.buyer_id,
            items: items
                .into_iter()
                .map(|item| OrderLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            total: self.total,
            status,
            payment_reference,
            payment_link_id: self.payment_link_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<DbProduct> for Product {
    fn from(row: DbProduct) -> Self {
        let payload = match row.product_type.as_str() {
            "file" => Payload::File(row.payload_filename.map(|filename| FileAsset {
                filename,
                filesize: row.payload_filesize,
            })),
            _ => Payload::Text(row.payload_text),
        };

        Product {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            price: row.price,
            stock: Stock::normalize(row.is_infinite_stock, row.stock),
            payload,
            reviews: ReviewStats {
                review_count: row.review_count,
                rating_total: row.rating_total,
                star_counts: [row.star_1, row.star_2, row.star_3, row.star_4, row.star_5],
            },
        }
    }
}

impl From<DbTenant> for Tenant {
    fn from(row: DbTenant) -> Self {
        Tenant {
            id: row.id,
            name: row.name,
            slug: row.slug,
            payos_client_id: row.payos_client_id,
            payos_api_key: row.payos_api_key,
            payos_checksum_key: row.payos_checksum_key,
        }
    }
}

impl From<DbReview> for Review {
    fn from(row: DbReview) -> Self {
        Review {
            id: row.id,
            product_id: row.product_id,
            user_id: row.user_id,
            rating: row.rating,
            comment: row.comment,
            created_at: row.created_at,
        }
    }
}

impl From<&Review> for DbReview {
    fn from(review: &Review) -> Self {
        DbReview {
            id: review.id,
            product_id: review.product_id,
            user_id: review.user_id,
            rating: review.rating,
            comment: review.comment.clone(),
            created_at: review.created_at,
        }
    }
}
