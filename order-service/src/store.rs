//! Postgres implementation of the store traits.

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_types::{Bool, Int4, Nullable};
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use uuid::Uuid;

use crate::models::*;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn db_error(error: DieselError) -> StoreError {
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            StoreError::Conflict(info.message().to_string())
        }
        other => StoreError::backend(other),
    }
}

macro_rules! conn {
    ($store:expr) => {
        $store.pool.get().await.map_err(StoreError::backend)?
    };
}

/// Attaches items to each order row, keeping the rows' order.
async fn with_items(conn: &mut AsyncPgConnection, rows: Vec<DbOrder>) -> StoreResult<Vec<Order>> {
    let items = DbOrderItem::belonging_to(&rows)
        .select(DbOrderItem::as_select())
        .order(order_items::position.asc())
        .load::<DbOrderItem>(conn)
        .await
        .map_err(db_error)?
        .grouped_by(&rows);

    rows.into_iter()
        .zip(items)
        .map(|(row, items)| row.into_order(items))
        .collect()
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &NewOrder) -> StoreResult<Order> {
        let mut conn = conn!(self);
        let (row, items) = NewDbOrder::from_new_order(order);

        let (stored, items) = conn
            .transaction::<_, DieselError, _>(|conn| {
                Box::pin(async move {
                    let stored = diesel::insert_into(orders::table)
                        .values(&row)
                        .returning(DbOrder::as_returning())
                        .get_result::<DbOrder>(conn)
                        .await?;

                    diesel::insert_into(order_items::table)
                        .values(&items)
                        .execute(conn)
                        .await?;

                    Ok((stored, items))
                })
            })
            .await
            .map_err(db_error)?;

        stored.into_order(items)
    }

    async fn find_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let mut conn = conn!(self);
        let row = orders::table
            .find(id)
            .select(DbOrder::as_select())
            .first::<DbOrder>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        match row {
            Some(row) => Ok(with_items(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn find_order_by_reference(&self, reference: PaymentReference) -> StoreResult<Option<Order>> {
        let mut conn = conn!(self);
        let row = orders::table
            .filter(orders::payment_reference.eq(reference.get()))
            .select(DbOrder::as_select())
            .first::<DbOrder>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        match row {
            Some(row) => Ok(with_items(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn transition_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> StoreResult<bool> {
        let mut conn = conn!(self);
        let updated = diesel::update(
            orders::table
                .filter(orders::id.eq(id))
                .filter(orders::status.eq(from.as_str())),
        )
        .set((orders::status.eq(to.as_str()), orders::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await
        .map_err(db_error)?;

        Ok(updated == 1)
    }

    async fn set_payment_link(&self, id: Uuid, payment_link_id: &str) -> StoreResult<()> {
        let mut conn = conn!(self);
        let updated = diesel::update(orders::table.filter(orders::id.eq(id)))
            .set((
                orders::payment_link_id.eq(payment_link_id),
                orders::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_error)?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("order {id}")));
        }
        Ok(())
    }

    async fn find_paid_order_with_product(&self, buyer: Uuid, product: Uuid) -> StoreResult<Option<Order>> {
        let mut conn = conn!(self);
        let row = orders::table
            .inner_join(order_items::table)
            .filter(orders::buyer_id.eq(buyer))
            .filter(orders::status.eq(OrderStatus::Paid.as_str()))
            .filter(order_items::product_id.eq(product))
            .order(orders::created_at.desc())
            .select(DbOrder::as_select())
            .first::<DbOrder>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        match row {
            Some(row) => Ok(with_items(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_paid_orders(&self, buyer: Uuid) -> StoreResult<Vec<Order>> {
        let mut conn = conn!(self);
        let rows = orders::table
            .filter(orders::buyer_id.eq(buyer))
            .filter(orders::status.eq(OrderStatus::Paid.as_str()))
            .order(orders::created_at.desc())
            .select(DbOrder::as_select())
            .load::<DbOrder>(&mut conn)
            .await
            .map_err(db_error)?;

        with_items(&mut conn, rows).await
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn find_product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let mut conn = conn!(self);
        let row = products::table
            .find(id)
            .select(DbProduct::as_select())
            .first::<DbProduct>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        Ok(row.map(Product::from))
    }

    async fn find_products(&self, ids: &[Uuid]) -> StoreResult<Vec<Product>> {
        let mut conn = conn!(self);
        let rows = products::table
            .filter(products::id.eq_any(ids))
            .select(DbProduct::as_select())
            .load::<DbProduct>(&mut conn)
            .await
            .map_err(db_error)?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn decrement_stock(&self, id: Uuid) -> StoreResult<bool> {
        let mut conn = conn!(self);
        // A NULL count on a finite product means one unit, matching Stock::normalize.
        let updated = diesel::update(
            products::table
                .filter(products::id.eq(id))
                .filter(products::is_infinite_stock.eq(false))
                .filter(sql::<Bool>("COALESCE(stock, 1) > 0")),
        )
        .set((
            products::stock.eq(sql::<Nullable<Int4>>("COALESCE(stock, 1) - 1")),
            products::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_error)?;

        Ok(updated == 1)
    }

    async fn record_rating(&self, id: Uuid, rating: i16) -> StoreResult<()> {
        let mut conn = conn!(self);
        let target = products::table.filter(products::id.eq(id));

        macro_rules! bump {
            ($star:ident) => {
                diesel::update(target)
                    .set((
                        products::review_count.eq(products::review_count + 1),
                        products::rating_total.eq(products::rating_total + i64::from(rating)),
                        products::$star.eq(products::$star + 1),
                    ))
                    .execute(&mut conn)
                    .await
            };
        }

        let updated = match rating {
            1 => bump!(star_1),
            2 => bump!(star_2),
            3 => bump!(star_3),
            4 => bump!(star_4),
            5 => bump!(star_5),
            other => return Err(StoreError::Corrupt(format!("rating {other} outside 1..=5"))),
        }
        .map_err(db_error)?;

        if updated == 0 {
            return Err(StoreError::NotFound(format!("product {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for PgStore {
    async fn find_tenant(&self, id: Uuid) -> StoreResult<Option<Tenant>> {
        let mut conn = conn!(self);
        let row = tenants::table
            .find(id)
            .select(DbTenant::as_select())
            .first::<DbTenant>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        Ok(row.map(Tenant::from))
    }

    async fn find_tenant_by_slug(&self, slug: &str) -> StoreResult<Option<Tenant>> {
        let mut conn = conn!(self);
        let row = tenants::table
            .filter(tenants::slug.eq(slug))
            .select(DbTenant::as_select())
            .first::<DbTenant>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        Ok(row.map(Tenant::from))
    }
}

#[async_trait]
impl ReviewStore for PgStore {
    async fn insert_review(&self, review: &Review) -> StoreResult<()> {
        let mut conn = conn!(self);
        diesel::insert_into(reviews::table)
            .values(DbReview::from(review))
            .execute(&mut conn)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn find_review_by_author(&self, product: Uuid, user: Uuid) -> StoreResult<Option<Review>> {
        let mut conn = conn!(self);
        let row = reviews::table
            .filter(reviews::product_id.eq(product))
            .filter(reviews::user_id.eq(user))
            .select(DbReview::as_select())
            .first::<DbReview>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        Ok(row.map(Review::from))
    }

    async fn list_reviews(&self, product: Uuid, page: i64, limit: i64) -> StoreResult<Page<Review>> {
        let mut conn = conn!(self);
        let page = page.max(1);
        let limit = limit.max(0);

        let total = reviews::table
            .filter(reviews::product_id.eq(product))
            .count()
            .get_result::<i64>(&mut conn)
            .await
            .map_err(db_error)?;

        let rows = reviews::table
            .filter(reviews::product_id.eq(product))
            .order(reviews::created_at.desc())
            .offset((page - 1).saturating_mul(limit))
            .limit(limit)
            .select(DbReview::as_select())
            .load::<DbReview>(&mut conn)
            .await
            .map_err(db_error)?;

        Ok(Page::new(rows.into_iter().map(Review::from).collect(), total, page, limit))
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn resolve_session(&self, token: &str) -> StoreResult<Option<Viewer>> {
        let mut conn = conn!(self);
        let row = sessions::table
            .inner_join(users::table)
            .filter(sessions::token.eq(token))
            .filter(sessions::expires_at.gt(Utc::now()))
            .select((users::id, users::email))
            .first::<(Uuid, String)>(&mut conn)
            .await
            .optional()
            .map_err(db_error)?;

        Ok(row.map(|(id, email)| Viewer { id, email }))
    }
}
