use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Format of `returns.timestamp`. Sorts lexicographically, and its first
/// ten characters are the `YYYY-MM-DD` date prefix used for range filters.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// A row of the `returns` table exactly as stored, `images` still in its
/// JSON-array encoding.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReturnRow {
    pub id: i64,
    pub order_id: String,
    pub item_barcode: String,
    pub sku: String,
    pub condition: String,
    pub damage_description: String,
    pub return_reason: String,
    pub order_date: String,
    pub price: f64,
    pub lpn: String,
    pub box_label: String,
    pub warehouse_location: String,
    pub staff_name: String,
    pub platform: String,
    pub images: String,
    pub timestamp: String,
}

/// A logged return with its evidence images resolved from `return_images`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnRecord {
    pub id: i64,
    pub order_id: String,
    pub item_barcode: String,
    pub sku: String,
    pub condition: String,
    pub damage_description: String,
    pub return_reason: String,
    pub order_date: String,
    pub price: f64,
    pub lpn: String,
    pub box_label: String,
    pub warehouse_location: String,
    pub staff_name: String,
    pub platform: String,
    /// Storage names in upload order.
    pub images: Vec<String>,
    pub timestamp: String,
}

impl ReturnRecord {
    pub fn from_row(row: ReturnRow, images: Vec<String>) -> Self {
        Self {
            id: row.id,
            order_id: row.order_id,
            item_barcode: row.item_barcode,
            sku: row.sku,
            condition: row.condition,
            damage_description: row.damage_description,
            return_reason: row.return_reason,
            order_date: row.order_date,
            price: row.price,
            lpn: row.lpn,
            box_label: row.box_label,
            warehouse_location: row.warehouse_location,
            staff_name: row.staff_name,
            platform: row.platform,
            images,
            timestamp: row.timestamp,
        }
    }
}

/// Validated field values for a return about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReturn {
    pub order_id: String,
    pub item_barcode: String,
    pub sku: String,
    pub condition: String,
    pub damage_description: String,
    pub return_reason: String,
    pub order_date: String,
    pub price: f64,
    pub lpn: String,
    pub box_label: String,
    pub warehouse_location: String,
    pub staff_name: String,
    pub platform: String,
}

// ── Query parameters ──────────────────────────────────────────────────────────

/// Inclusive date range over the timestamp's date prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn start_key(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    pub fn end_key(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ReturnFilters {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ReturnFilters {
    /// Both bounds are needed to filter; a missing or blank bound means
    /// "everything".
    pub fn date_range(&self) -> AppResult<Option<DateRange>> {
        let start = non_blank(self.start_date.as_deref());
        let end = non_blank(self.end_date.as_deref());

        match (start, end) {
            (Some(start), Some(end)) => Ok(Some(DateRange::new(
                parse_date("start_date", start)?,
                parse_date("end_date", end)?,
            ))),
            _ => Ok(None),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_date(field: &str, raw: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| AppError::invalid(field, format!("expected YYYY-MM-DD, got {raw:?} ({e})")))
}
