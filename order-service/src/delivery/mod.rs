//! Protected delivery of purchased content.

mod assets;
mod font;
mod watermark;

#[cfg(test)]
pub(crate) use font::test_font;
#[cfg(test)]
pub(crate) use watermark::tests::sample_pdf;

use std::sync::Arc;

use serde::Serialize;
use shared::*;
use tracing::{error, info};
use uuid::Uuid;

pub use assets::{AssetStore, FsAssetStore};
pub use font::FontAsset;
pub use watermark::{Licensee, Watermarker};

use crate::entitlement::Entitlements;
use crate::error::{AppError, AppResult};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// What an owner sees of a product. File payloads expose metadata only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPayload {
    Text { text: Option<String> },
    File { file: Option<FileAsset> },
}

#[derive(Debug, Clone)]
pub struct ProtectedFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub struct ContentPackager {
    products: Arc<dyn ProductStore>,
    entitlements: Entitlements,
    assets: Arc<dyn AssetStore>,
    font: Arc<FontAsset>,
}

impl ContentPackager {
    pub fn new(
        products: Arc<dyn ProductStore>,
        entitlements: Entitlements,
        assets: Arc<dyn AssetStore>,
        font: Arc<FontAsset>,
    ) -> Self {
        Self {
            products,
            entitlements,
            assets,
            font,
        }
    }

    pub async fn get_content(&self, viewer: &Viewer, product_id: Uuid) -> AppResult<ContentPayload> {
        if !self.entitlements.is_owned(Some(viewer), product_id).await? {
            return Err(AppError::Forbidden("You have not purchased this product".to_string()));
        }
        let product = self.product(product_id).await?;

        Ok(match product.payload {
            Payload::Text(text) => ContentPayload::Text { text },
            Payload::File(file) => ContentPayload::File { file },
        })
    }

    /// Stamps a fresh copy of the product file for `viewer`.
    pub async fn download(&self, viewer: &Viewer, product_id: Uuid) -> AppResult<ProtectedFile> {
        let order = self
            .entitlements
            .paid_order_for(Some(viewer), product_id)
            .await?
            .ok_or_else(|| AppError::Forbidden("You have not purchased this product".to_string()))?;
        let product = self.product(product_id).await?;

        let Payload::File(Some(asset)) = &product.payload else {
            return Err(AppError::NotFound("This product has no downloadable file".to_string()));
        };
        let original = self
            .assets
            .load(asset)
            .await
            .map_err(AppError::internal)?
            .ok_or_else(|| AppError::NotFound("Product file not found".to_string()))?;

        let licensee = Licensee {
            email: viewer.email.clone(),
            order_reference: order.payment_reference,
            title: product.name.clone(),
        };
        let font = self.font.clone();
        let stamped = tokio::task::spawn_blocking(move || {
            Watermarker::new(&font).stamp(&original, &licensee, &mut rand::thread_rng())
        })
        .await
        .map_err(AppError::internal)?
        .map_err(|e| {
            error!(%product_id, error = %e, "Watermarking failed");
            AppError::internal(e)
        })?;

        info!(%product_id, order_id = %order.id, bytes = stamped.len(), "Protected copy issued");
        Ok(ProtectedFile {
            filename: protected_filename(&product),
            content_type: PDF_CONTENT_TYPE,
            bytes: stamped,
        })
    }

    async fn product(&self, product_id: Uuid) -> AppResult<Product> {
        self.products
            .find_product(product_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {product_id} not found")))
    }
}

/// `[Protected]_<name>.pdf` with every character outside `[a-z0-9]` replaced.
pub fn protected_filename(product: &Product) -> String {
    let stem = if product.name.is_empty() {
        product.id.to_string()
    } else {
        product
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect()
    };
    format!("[Protected]_{stem}.pdf")
}
