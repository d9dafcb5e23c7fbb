use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::{AppError, AppResult};
use crate::models::*;

// ── Pool ──────────────────────────────────────────────────────────────────────

/// Opens (creating if needed) the SQLite database behind `database_url`.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let opts = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30))
        .foreign_keys(true)
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

// ── Returns ───────────────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    return_id: i64,
    storage_name: String,
}

/// Groups image rows (already ordered by return and position) per return.
fn group_images(rows: Vec<ImageRow>) -> HashMap<i64, Vec<String>> {
    let mut grouped: HashMap<i64, Vec<String>> = HashMap::new();
    for row in rows {
        grouped.entry(row.return_id).or_default().push(row.storage_name);
    }
    grouped
}

fn attach_images(rows: Vec<ReturnRow>, images: Vec<ImageRow>) -> Vec<ReturnRecord> {
    let mut images = group_images(images);
    rows.into_iter()
        .map(|row| {
            let names = images.remove(&row.id).unwrap_or_default();
            ReturnRecord::from_row(row, names)
        })
        .collect()
}

/// Lists returns in ascending id order, optionally limited to those whose
/// timestamp date prefix lies inside `range` (both ends inclusive).
pub async fn fetch_returns(pool: &SqlitePool, range: Option<DateRange>) -> AppResult<Vec<ReturnRecord>> {
    // Rows and their images are read in one transaction so a concurrent
    // insert cannot show up half-attached.
    let mut tx = pool.begin().await?;

    let (rows, images) = match range {
        Some(range) => {
            let rows = sqlx::query_as::<_, ReturnRow>(
                r#"
                SELECT id, order_id, item_barcode, sku, condition, damage_description,
                       return_reason, order_date, price, lpn, box_label,
                       warehouse_location, staff_name, platform, images, timestamp
                FROM returns
                WHERE substr(timestamp, 1, 10) BETWEEN ? AND ?
                ORDER BY id ASC
                "#,
            )
            .bind(range.start_key())
            .bind(range.end_key())
            .fetch_all(&mut *tx)
            .await?;

            let images = sqlx::query_as::<_, ImageRow>(
                r#"
                SELECT ri.return_id, ri.storage_name
                FROM return_images ri
                JOIN returns r ON r.id = ri.return_id
                WHERE substr(r.timestamp, 1, 10) BETWEEN ? AND ?
                ORDER BY ri.return_id ASC, ri.position ASC
                "#,
            )
            .bind(range.start_key())
            .bind(range.end_key())
            .fetch_all(&mut *tx)
            .await?;

            (rows, images)
        }
        None => {
            let rows = sqlx::query_as::<_, ReturnRow>(
                r#"
                SELECT id, order_id, item_barcode, sku, condition, damage_description,
                       return_reason, order_date, price, lpn, box_label,
                       warehouse_location, staff_name, platform, images, timestamp
                FROM returns
                ORDER BY id ASC
                "#,
            )
            .fetch_all(&mut *tx)
            .await?;

            let images = sqlx::query_as::<_, ImageRow>(
                "SELECT return_id, storage_name FROM return_images ORDER BY return_id ASC, position ASC",
            )
            .fetch_all(&mut *tx)
            .await?;

            (rows, images)
        }
    };

    tx.commit().await?;

    Ok(attach_images(rows, images))
}

pub async fn fetch_return_by_id(pool: &SqlitePool, id: i64) -> AppResult<ReturnRecord> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ReturnRow>(
        r#"
        SELECT id, order_id, item_barcode, sku, condition, damage_description,
               return_reason, order_date, price, lpn, box_label,
               warehouse_location, staff_name, platform, images, timestamp
        FROM returns WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Return {} not found", id)))?;

    let images: Vec<String> = sqlx::query_scalar(
        "SELECT storage_name FROM return_images WHERE return_id = ? ORDER BY position ASC",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(ReturnRecord::from_row(row, images))
}

/// Inserts the return row and one `return_images` row per storage name in a
/// single transaction. `images` also lands in the row's JSON `images` column.
pub async fn insert_return(
    pool: &SqlitePool,
    payload: &NewReturn,
    images: &[String],
    timestamp: &str,
) -> AppResult<ReturnRecord> {
    let images_json = serde_json::to_string(images).map_err(anyhow::Error::from)?;

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, ReturnRow>(
        r#"
        INSERT INTO returns (
            order_id, item_barcode, sku, condition, damage_description,
            return_reason, order_date, price, lpn, box_label,
            warehouse_location, staff_name, platform, images, timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id, order_id, item_barcode, sku, condition, damage_description,
                  return_reason, order_date, price, lpn, box_label,
                  warehouse_location, staff_name, platform, images, timestamp
        "#,
    )
    .bind(&payload.order_id)
    .bind(&payload.item_barcode)
    .bind(&payload.sku)
    .bind(&payload.condition)
    .bind(&payload.damage_description)
    .bind(&payload.return_reason)
    .bind(&payload.order_date)
    .bind(payload.price)
    .bind(&payload.lpn)
    .bind(&payload.box_label)
    .bind(&payload.warehouse_location)
    .bind(&payload.staff_name)
    .bind(&payload.platform)
    .bind(&images_json)
    .bind(timestamp)
    .fetch_one(&mut *tx)
    .await?;

    for (position, name) in images.iter().enumerate() {
        sqlx::query("INSERT INTO return_images (return_id, position, storage_name) VALUES (?, ?, ?)")
            .bind(row.id)
            .bind(position as i64)
            .bind(name)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(ReturnRecord::from_row(row, images.to_vec()))
}

/// Deletes a return and (by cascade) its image rows. Returns the number of
/// returns removed; an unknown id is not an error.
pub async fn delete_return(pool: &SqlitePool, id: i64) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM returns WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Raw rows for the spreadsheet export, in storage order.
pub async fn fetch_all_return_rows(pool: &SqlitePool) -> AppResult<Vec<ReturnRow>> {
    let rows = sqlx::query_as::<_, ReturnRow>(
        r#"
        SELECT id, order_id, item_barcode, sku, condition, damage_description,
               return_reason, order_date, price, lpn, box_label,
               warehouse_location, staff_name, platform, images, timestamp
        FROM returns
        ORDER BY id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Every storage name still referenced by some return.
pub async fn fetch_referenced_images(pool: &SqlitePool) -> AppResult<HashSet<String>> {
    let names: Vec<String> = sqlx::query_scalar("SELECT DISTINCT storage_name FROM return_images")
        .fetch_all(pool)
        .await?;

    Ok(names.into_iter().collect())
}
