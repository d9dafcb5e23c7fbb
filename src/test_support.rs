//! Shared fixtures for the unit tests: an in-memory database with the schema
//! applied and a blob store rooted in a temporary directory.

use std::io::{Cursor, Read};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::{db, models::NewReturn, storage::BlobStore, submission::ReturnSubmission};

pub async fn test_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory url")
        .foreign_keys(true);

    // One connection that never expires: the in-memory database lives and
    // dies with it.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .expect("failed to create in-memory pool");

    db::run_migrations(&pool).await.expect("failed to run migrations");
    pool
}

/// The `TempDir` must outlive the store.
pub async fn test_blobs() -> (TempDir, BlobStore) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let blobs = BlobStore::open(dir.path()).await.expect("failed to open blob store");
    (dir, blobs)
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, min, sec))
        .expect("valid test datetime")
}

pub fn new_return(order_id: &str) -> NewReturn {
    NewReturn {
        order_id: order_id.to_string(),
        item_barcode: "0123456789012".to_string(),
        sku: "S1".to_string(),
        condition: "Damaged".to_string(),
        damage_description: "Cracked lid".to_string(),
        return_reason: "Arrived broken".to_string(),
        order_date: "2024-05-28".to_string(),
        price: 19.99,
        lpn: "LPN0001".to_string(),
        box_label: "BOX-12".to_string(),
        warehouse_location: "A1".to_string(),
        staff_name: "Bob".to_string(),
        platform: "Amazon".to_string(),
    }
}

/// Every required field filled in, no files attached.
pub fn sample_submission() -> ReturnSubmission {
    ReturnSubmission::new()
        .with_field("order_id", "O1")
        .with_field("item_barcode", "")
        .with_field("sku", "S1")
        .with_field("condition", "Damaged")
        .with_field("warehouse_location", "A1")
        .with_field("staff_name", "Bob")
        .with_field("platform", "Amazon")
}

/// Text of one part (`xl/worksheets/sheet1.xml`, ...) of an xlsx package.
pub fn xlsx_part(bytes: &[u8], part: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("xlsx is a zip package");
    let mut file = archive
        .by_name(part)
        .unwrap_or_else(|e| panic!("missing part {part}: {e}"));
    let mut xml = String::new();
    file.read_to_string(&mut xml).expect("part is utf-8 xml");
    xml
}
