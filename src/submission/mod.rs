use std::collections::HashMap;

use chrono::{Local, NaiveDateTime};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    db,
    error::{AppError, AppResult},
    models::{format_timestamp, NewReturn, ReturnRecord},
    storage::BlobStore,
};

/// Multipart field name carrying the evidence files.
pub const IMAGES_FIELD: &str = "images";

pub const REQUIRED_FIELDS: [&str; 7] = [
    "order_id",
    "item_barcode",
    "sku",
    "condition",
    "warehouse_location",
    "staff_name",
    "platform",
];

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub bytes: Vec<u8>,
}

/// A return as submitted by the form: raw text fields plus the uploaded files
/// in upload order.
#[derive(Debug, Clone, Default)]
pub struct ReturnSubmission {
    fields: HashMap<String, String>,
    files: Vec<UploadedFile>,
}

impl ReturnSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a form field. A repeated name keeps its first value.
    pub fn push_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(name.into()).or_insert_with(|| value.into());
    }

    pub fn push_file(&mut self, original_name: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.files.push(UploadedFile {
            original_name: original_name.into(),
            bytes: bytes.into(),
        });
    }

    /// Files that actually carry a name; browsers send an empty, unnamed part
    /// when no file was picked.
    pub fn evidence(&self) -> impl Iterator<Item = &UploadedFile> {
        self.files.iter().filter(|f| !f.original_name.is_empty())
    }

    fn text(&self, name: &str) -> String {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    fn price(&self) -> AppResult<f64> {
        let raw = match self.fields.get("price").map(|p| p.trim()) {
            None | Some("") => return Ok(0.0),
            Some(raw) => raw,
        };

        match raw.parse::<f64>() {
            Ok(price) if price.is_finite() => Ok(price),
            _ => Err(AppError::invalid("price", format!("{raw:?} is not a number"))),
        }
    }

    /// Checks the text fields and assembles the row payload. A required field
    /// must be present; its value is taken as submitted.
    pub fn validate(&self) -> AppResult<NewReturn> {
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !self.fields.contains_key(**f)) {
            return Err(AppError::MissingField(missing.to_string()));
        }

        Ok(NewReturn {
            order_id: self.text("order_id"),
            item_barcode: self.text("item_barcode"),
            sku: self.text("sku"),
            condition: self.text("condition"),
            damage_description: self.text("damage_description"),
            return_reason: self.text("return_reason"),
            order_date: self.text("order_date"),
            price: self.price()?,
            lpn: self.text("lpn"),
            box_label: self.text("box_label"),
            warehouse_location: self.text("warehouse_location"),
            staff_name: self.text("staff_name"),
            platform: self.text("platform"),
        })
    }
}

#[cfg(test)]
impl ReturnSubmission {
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_field(name, value);
        self
    }

    pub fn with_file(mut self, original_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.push_file(original_name, bytes);
        self
    }
}

pub async fn submit(pool: &SqlitePool, blobs: &BlobStore, submission: &ReturnSubmission) -> AppResult<ReturnRecord> {
    submit_at(pool, blobs, submission, Local::now().naive_local()).await
}

/// Validates `submission`, stores its evidence files and inserts the return,
/// all stamped with `now`.
///
/// Nothing is written unless validation passes. If a blob write or the insert
/// fails, the blobs already written for this submission are removed again.
pub async fn submit_at(
    pool: &SqlitePool,
    blobs: &BlobStore,
    submission: &ReturnSubmission,
    now: NaiveDateTime,
) -> AppResult<ReturnRecord> {
    let evidence: Vec<&UploadedFile> = submission.evidence().collect();
    if evidence.is_empty() {
        return Err(AppError::MissingImages);
    }
    let payload = submission.validate()?;

    let mut stored = Vec::with_capacity(evidence.len());
    for file in evidence {
        match blobs.store(&file.original_name, &file.bytes, now).await {
            Ok(name) => stored.push(name),
            Err(e) => {
                discard(blobs, &stored).await;
                return Err(e);
            }
        }
    }

    let timestamp = format_timestamp(now);
    match db::insert_return(pool, &payload, &stored, &timestamp).await {
        Ok(record) => {
            info!(
                id = record.id,
                order_id = %record.order_id,
                images = record.images.len(),
                "Created return"
            );
            Ok(record)
        }
        Err(e) => {
            discard(blobs, &stored).await;
            Err(e)
        }
    }
}

async fn discard(blobs: &BlobStore, names: &[String]) {
    for name in names {
        if let Err(e) = blobs.remove(name).await {
            warn!(name = %name, error = %e, "Failed to discard blob of rejected return");
        }
    }
}
