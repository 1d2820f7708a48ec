use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use shared::*;
use tracing::{error, info};
use uuid::Uuid;

use crate::entitlement::Entitlements;
use crate::error::{AppError, AppResult};

pub const DEFAULT_PAGE_SIZE: i64 = 5;
const MAX_PAGE_SIZE: i64 = 50;
const MIN_COMMENT_CHARS: usize = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct NewReview {
    pub rating: i16,
    pub comment: String,
}

/// Buyers review what they paid for, once per product.
pub struct Reviews {
    reviews: Arc<dyn ReviewStore>,
    products: Arc<dyn ProductStore>,
    entitlements: Entitlements,
}

impl Reviews {
    pub fn new(reviews: Arc<dyn ReviewStore>, products: Arc<dyn ProductStore>, entitlements: Entitlements) -> Self {
        Self {
            reviews,
            products,
            entitlements,
        }
    }

    pub async fn create_review(&self, viewer: &Viewer, product_id: Uuid, input: NewReview) -> AppResult<Review> {
        if !(1..=5).contains(&input.rating) {
            return Err(AppError::BadRequest("Rating must be between 1 and 5".to_string()));
        }
        let comment = input.comment.trim();
        if comment.chars().count() < MIN_COMMENT_CHARS {
            return Err(AppError::BadRequest(format!(
                "Comment must be at least {MIN_COMMENT_CHARS} characters"
            )));
        }

        if !self.entitlements.is_owned(Some(viewer), product_id).await? {
            return Err(AppError::Forbidden("Buy this product before reviewing it".to_string()));
        }
        if self.reviews.find_review_by_author(product_id, viewer.id).await?.is_some() {
            return Err(AppError::Conflict("You already reviewed this product".to_string()));
        }

        let review = Review {
            id: Uuid::new_v4(),
            product_id,
            user_id: viewer.id,
            rating: input.rating,
            comment: comment.to_string(),
            created_at: Utc::now(),
        };
        // The unique (product, user) index catches a concurrent duplicate.
        self.reviews.insert_review(&review).await.map_err(|e| match e {
            StoreError::Conflict(_) => AppError::Conflict("You already reviewed this product".to_string()),
            other => other.into(),
        })?;

        if let Err(e) = self.products.record_rating(product_id, review.rating).await {
            error!(%product_id, review_id = %review.id, error = %e, "Review saved but rating aggregate not updated");
        }

        info!(%product_id, user_id = %viewer.id, rating = review.rating, "Review created");
        Ok(review)
    }

    pub async fn list_reviews(&self, product_id: Uuid, page: Option<i64>, limit: Option<i64>) -> AppResult<Page<Review>> {
        let page = page.unwrap_or(1).max(1);
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        Ok(self.reviews.list_reviews(product_id, page, limit).await?)
    }
}
