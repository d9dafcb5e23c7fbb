//! Spreadsheet export of the whole return log.
//!
//! Rows are first laid out as [`Cell`]s, then handed to a writer (`.xlsx` or
//! `.csv`). Each return becomes exactly one row. The Images column links the
//! first evidence file; every further image of the same return gets its own
//! link cell after Timestamp, so the fifteen headed columns never shift.

use rust_xlsxwriter::Workbook;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    db,
    error::AppResult,
    models::ReturnRow,
    storage::{is_drive_segment, BlobStore},
};

pub const HEADERS: [&str; 15] = [
    "Order ID",
    "Barcode",
    "SKU",
    "Condition",
    "Damage Desc",
    "Return Reason",
    "Order Date",
    "Price",
    "LPN",
    "Box Label",
    "Warehouse",
    "Staff",
    "Platform",
    "Images",
    "Timestamp",
];

pub const XLSX_FILENAME: &str = "returns_export.xlsx";
pub const CSV_FILENAME: &str = "returns_export.csv";

const SHEET_NAME: &str = "Returns";

/// Excel's per-cell text limit, in characters.
const XLSX_MAX_CELL_CHARS: usize = 32_767;

/// Leading characters that make a spreadsheet evaluate a CSV field.
const CSV_FORMULA_TRIGGERS: [char; 6] = ['=', '+', '-', '@', '\t', '\r'];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    /// Hyperlink to `url` displayed as `text`.
    Link { url: String, text: String },
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// Data rows of the export; the header is always [`HEADERS`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReturnSheet {
    pub rows: Vec<Vec<Cell>>,
}

/// Builds the sheet for every stored return, ignoring any browse filter.
pub async fn export_all(pool: &SqlitePool, blobs: &BlobStore) -> AppResult<ReturnSheet> {
    let rows = db::fetch_all_return_rows(pool).await?;
    let sheet = build_sheet(&rows, blobs);
    info!(rows = sheet.rows.len(), "Built return export");
    Ok(sheet)
}

pub fn build_sheet(rows: &[ReturnRow], blobs: &BlobStore) -> ReturnSheet {
    ReturnSheet {
        rows: rows.iter().map(|row| build_row(row, blobs)).collect(),
    }
}

fn build_row(row: &ReturnRow, blobs: &BlobStore) -> Vec<Cell> {
    let (images, extra_links) = image_cells(row, blobs);

    let mut cells = vec![
        Cell::text(&row.order_id),
        Cell::text(&row.item_barcode),
        Cell::text(&row.sku),
        Cell::text(&row.condition),
        Cell::text(&row.damage_description),
        Cell::text(&row.return_reason),
        Cell::text(&row.order_date),
        Cell::text(row.price.to_string()),
        Cell::text(&row.lpn),
        Cell::text(&row.box_label),
        Cell::text(&row.warehouse_location),
        Cell::text(&row.staff_name),
        Cell::text(&row.platform),
        images,
        Cell::text(&row.timestamp),
    ];
    cells.extend(extra_links);
    cells
}

/// The Images cell plus link cells for any further images. A stored value
/// that isn't a JSON list of names is exported verbatim as text.
fn image_cells(row: &ReturnRow, blobs: &BlobStore) -> (Cell, Vec<Cell>) {
    match serde_json::from_str::<Vec<String>>(&row.images) {
        Ok(names) => {
            let mut links = names.into_iter().map(|name| Cell::Link {
                url: blobs.resolve_uri(&name),
                text: name,
            });
            let first = links.next().unwrap_or_else(|| Cell::text(""));
            (first, links.collect())
        }
        Err(e) => {
            warn!(id = row.id, error = %e, "Malformed image list, exporting raw value");
            (Cell::text(&row.images), Vec::new())
        }
    }
}

// ── Writers ───────────────────────────────────────────────────────────────────

pub fn to_xlsx(sheet: &ReturnSheet) -> anyhow::Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(SHEET_NAME)?;

    for (col, title) in HEADERS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *title)?;
    }

    for (r, cells) in sheet.rows.iter().enumerate() {
        let row = r as u32 + 1;
        for (c, cell) in cells.iter().enumerate() {
            let col = c as u16;
            match cell {
                Cell::Text(value) if value.is_empty() => {}
                Cell::Text(value) => {
                    worksheet.write_string(row, col, clip_for_xlsx(value, row, col))?;
                }
                Cell::Link { url, text } => {
                    let target = xlsx_link_target(url);
                    worksheet.write_url_with_text(row, col, target.as_str(), text.as_str())?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

fn clip_for_xlsx(value: &str, row: u32, col: u16) -> &str {
    match value.char_indices().nth(XLSX_MAX_CELL_CHARS) {
        Some((cut, _)) => {
            warn!(
                row,
                col,
                chars = value.chars().count(),
                "Cell text exceeds the xlsx limit, clipping"
            );
            &value[..cut]
        }
        None => value,
    }
}

/// rust_xlsxwriter keeps `file:///` only in front of drive-letter paths and
/// stores anything else relative to the workbook. An extra `/` makes it keep
/// a Unix path absolute.
fn xlsx_link_target(url: &str) -> String {
    match url.strip_prefix("file:///") {
        Some(rest) if !rest.split('/').next().is_some_and(is_drive_segment) => {
            format!("file:////{rest}")
        }
        _ => url.to_string(),
    }
}

/// CSV rendition; links become `HYPERLINK` formulas, which spreadsheet
/// applications turn back into clickable cells on import.
pub fn to_csv(sheet: &ReturnSheet) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(vec![]);

    wtr.write_record(HEADERS)?;
    for cells in &sheet.rows {
        wtr.write_record(cells.iter().map(csv_field))?;
    }

    Ok(wtr.into_inner()?)
}

fn csv_field(cell: &Cell) -> String {
    match cell {
        Cell::Text(value) if value.starts_with(CSV_FORMULA_TRIGGERS) => format!("'{value}"),
        Cell::Text(value) => value.clone(),
        Cell::Link { url, text } => format!(
            "=HYPERLINK(\"{}\",\"{}\")",
            url.replace('"', "\"\""),
            text.replace('"', "\"\"")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{new_return, test_blobs, test_pool, xlsx_part};

    const IMAGES_COLUMN: usize = 13;

    fn row(id: i64, images: &str) -> ReturnRow {
        ReturnRow {
            id,
            order_id: format!("O{id}"),
            item_barcode: String::new(),
            sku: "S1".into(),
            condition: "Damaged".into(),
            damage_description: "Dented corner".into(),
            return_reason: "Changed mind".into(),
            order_date: "2024-05-30".into(),
            price: 12.5,
            lpn: "LPN1".into(),
            box_label: "BX".into(),
            warehouse_location: "A1".into(),
            staff_name: "Bob".into(),
            platform: "Amazon".into(),
            images: images.into(),
            timestamp: "2024-06-01 14:03:09".into(),
        }
    }

    #[tokio::test]
    async fn one_row_per_return_with_fields_in_header_order() {
        let (_dir, blobs) = test_blobs().await;
        let sheet = build_sheet(&[row(1, r#"["photo1.jpg"]"#)], &blobs);

        assert_eq!(sheet.rows.len(), 1);
        let cells = &sheet.rows[0];
        assert_eq!(cells.len(), HEADERS.len());

        let texts: Vec<&str> = cells
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != IMAGES_COLUMN)
            .map(|(_, c)| match c {
                Cell::Text(v) => v.as_str(),
                Cell::Link { .. } => panic!("unexpected link"),
            })
            .collect();
        assert_eq!(
            texts,
            vec![
                "O1", "", "S1", "Damaged", "Dented corner", "Changed mind", "2024-05-30", "12.5",
                "LPN1", "BX", "A1", "Bob", "Amazon", "2024-06-01 14:03:09",
            ]
        );

        assert_eq!(
            cells[IMAGES_COLUMN],
            Cell::Link {
                url: blobs.resolve_uri("photo1.jpg"),
                text: "photo1.jpg".into(),
            }
        );
    }

    #[tokio::test]
    async fn further_images_follow_timestamp_as_links() {
        let (_dir, blobs) = test_blobs().await;
        let sheet = build_sheet(&[row(1, r#"["a.jpg","b.jpg","c.jpg"]"#)], &blobs);
        let cells = &sheet.rows[0];

        assert_eq!(cells.len(), HEADERS.len() + 2);
        assert!(matches!(&cells[IMAGES_COLUMN], Cell::Link { text, .. } if text == "a.jpg"));
        assert_eq!(cells[14], Cell::text("2024-06-01 14:03:09"));
        assert!(matches!(&cells[15], Cell::Link { text, .. } if text == "b.jpg"));
        assert!(matches!(&cells[16], Cell::Link { url, text } if text == "c.jpg" && url.ends_with("/c.jpg")));
    }

    #[tokio::test]
    async fn malformed_images_degrade_to_text_for_that_row_only() {
        let (_dir, blobs) = test_blobs().await;
        let rows = [
            row(1, r#"["ok1.jpg"]"#),
            row(2, "not json ["),
            row(3, ""),
            row(4, r#"["ok4.jpg"]"#),
        ];
        let sheet = build_sheet(&rows, &blobs);

        assert_eq!(sheet.rows.len(), 4);
        assert!(matches!(&sheet.rows[0][IMAGES_COLUMN], Cell::Link { text, .. } if text == "ok1.jpg"));
        assert_eq!(sheet.rows[1][IMAGES_COLUMN], Cell::text("not json ["));
        assert_eq!(sheet.rows[2][IMAGES_COLUMN], Cell::text(""));
        assert!(matches!(&sheet.rows[3][IMAGES_COLUMN], Cell::Link { text, .. } if text == "ok4.jpg"));
        assert_eq!(sheet.rows[1][0], Cell::text("O2"));
        assert!(sheet.rows.iter().all(|r| r.len() == HEADERS.len()));
    }

    #[tokio::test]
    async fn empty_image_list_leaves_the_cell_blank() {
        let (_dir, blobs) = test_blobs().await;
        let sheet = build_sheet(&[row(1, "[]")], &blobs);
        assert_eq!(sheet.rows[0][IMAGES_COLUMN], Cell::text(""));
    }

    #[tokio::test]
    async fn price_uses_shortest_form() {
        let (_dir, blobs) = test_blobs().await;
        let mut r = row(1, "[]");
        r.price = 0.0;
        assert_eq!(build_row(&r, &blobs)[7], Cell::text("0"));
        r.price = 19.99;
        assert_eq!(build_row(&r, &blobs)[7], Cell::text("19.99"));
    }

    #[test]
    fn xlsx_output_is_a_zip_package() {
        let sheet = ReturnSheet {
            rows: vec![vec![
                Cell::text("O1"),
                Cell::text(""),
                Cell::Link {
                    url: "file:///srv/uploads/photo1.jpg".into(),
                    text: "photo1.jpg".into(),
                },
            ]],
        };
        let bytes = to_xlsx(&sheet).unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn xlsx_has_headers_in_order_and_links_the_images_cell() {
        let (_dir, blobs) = test_blobs().await;
        let image = "20240601140309_photo1.jpg";
        let sheet = build_sheet(&[row(1, &format!(r#"["{image}"]"#))], &blobs);
        let bytes = to_xlsx(&sheet).unwrap();

        // Text cells go through the shared string table in first-use order.
        let strings = xlsx_part(&bytes, "xl/sharedStrings.xml");
        let mut from = 0;
        for title in HEADERS {
            let needle = format!("<t>{title}</t>");
            let found = strings[from..]
                .find(&needle)
                .unwrap_or_else(|| panic!("{title} missing or out of order"));
            from += found + needle.len();
        }

        let worksheet = xlsx_part(&bytes, "xl/worksheets/sheet1.xml");
        for col in 'A'..='O' {
            assert!(worksheet.contains(&format!("<c r=\"{col}1\"")), "header cell {col}1");
        }
        assert!(worksheet.contains(r#"<hyperlink ref="N2" r:id="rId1"/>"#), "{worksheet}");

        let rels = xlsx_part(&bytes, "xl/worksheets/_rels/sheet1.xml.rels");
        let target = blobs.path_of(image).display().to_string();
        assert!(target.starts_with('/'), "{target}");
        assert!(rels.contains(&format!(r#"Target="{target}""#)), "{rels}");
        assert!(rels.contains(r#"TargetMode="External""#), "{rels}");
    }

    #[test]
    fn xlsx_link_targets_stay_absolute() {
        assert_eq!(
            xlsx_link_target("file:///srv/uploads/a.jpg"),
            "file:////srv/uploads/a.jpg"
        );
        assert_eq!(
            xlsx_link_target("file:///C:/returns/uploads/a.jpg"),
            "file:///C:/returns/uploads/a.jpg"
        );
    }

    #[tokio::test]
    async fn oversized_text_is_clipped_instead_of_failing_the_workbook() {
        let (_dir, blobs) = test_blobs().await;
        let mut long = row(2, "[]");
        long.damage_description = "x".repeat(40_000);
        let sheet = build_sheet(&[row(1, "[]"), long], &blobs);

        let bytes = to_xlsx(&sheet).unwrap();

        let strings = xlsx_part(&bytes, "xl/sharedStrings.xml");
        assert!(strings.contains("<t>O1</t>"));
        assert!(strings.contains("<t>O2</t>"));
        assert!(strings.contains(&"x".repeat(XLSX_MAX_CELL_CHARS)));
        assert!(!strings.contains(&"x".repeat(XLSX_MAX_CELL_CHARS + 1)));
    }

    #[test]
    fn csv_neutralizes_formula_like_text() {
        let sheet = ReturnSheet {
            rows: vec![vec![
                Cell::text("=cmd|' /C calc'!A0"),
                Cell::text("+1"),
                Cell::text("-2"),
                Cell::text("@SUM(A1)"),
                Cell::text("\tx"),
                Cell::text("plain"),
                Cell::Link {
                    url: "file:///srv/uploads/p.jpg".into(),
                    text: "p.jpg".into(),
                },
            ]],
        };
        let bytes = to_csv(&sheet).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes.as_slice());
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "'=cmd|' /C calc'!A0");
        assert_eq!(&record[1], "'+1");
        assert_eq!(&record[2], "'-2");
        assert_eq!(&record[3], "'@SUM(A1)");
        assert_eq!(&record[4], "'\tx");
        assert_eq!(&record[5], "plain");
        assert!(record[6].starts_with("=HYPERLINK("));
    }

    #[test]
    fn csv_output_has_header_and_hyperlink_formulas() {
        let sheet = ReturnSheet {
            rows: vec![vec![
                Cell::text("O1"),
                Cell::text("a, \"quoted\" value"),
                Cell::Link {
                    url: "file:///srv/uploads/p.jpg".into(),
                    text: "p.jpg".into(),
                },
            ]],
        };
        let bytes = to_csv(&sheet).unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes.as_slice());
        let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(header, HEADERS);

        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[0], "O1");
        assert_eq!(&record[1], "a, \"quoted\" value");
        assert_eq!(&record[2], "=HYPERLINK(\"file:///srv/uploads/p.jpg\",\"p.jpg\")");
    }

    #[tokio::test]
    async fn export_all_covers_every_stored_return() {
        let pool = test_pool().await;
        let (_dir, blobs) = test_blobs().await;
        for order in ["O1", "O2", "O3"] {
            db::insert_return(&pool, &new_return(order), &[format!("{order}.jpg")], "2024-06-01 09:00:00")
                .await
                .unwrap();
        }

        let sheet = export_all(&pool, &blobs).await.unwrap();

        let orders: Vec<&Cell> = sheet.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(orders, vec![&Cell::text("O1"), &Cell::text("O2"), &Cell::text("O3")]);
        assert!(matches!(&sheet.rows[2][IMAGES_COLUMN], Cell::Link { text, .. } if text == "O3.jpg"));
    }
}
