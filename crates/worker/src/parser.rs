//! Spreadsheet parsing.
//!
//! Layout is positional on the first worksheet: the first used row is the
//! header, then B = product code, C = product name, D = price, E = quantity,
//! F = period. Column A is ignored. Files named `*.csv` use the same layout.

use std::io::Cursor;
use std::str::FromStr;

use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use pipeline_core::limits::DEFAULT_PRODUCT_NAME;
use pipeline_core::{Error, Result};
use rust_decimal::Decimal;
use tracing::debug;

/// Zero-based column of the product code (B).
const FIRST_COLUMN: u32 = 1;
/// Number of columns read, B through F.
const COLUMNS: usize = 5;

/// One normalized data row.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    /// 1-based row number in the source sheet.
    pub row_number: u32,
    pub product_code: String,
    pub product_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub period: String,
}

impl SheetRow {
    /// Normalize raw cell text. Returns `None` for a row with no content.
    fn from_cells(row_number: u32, cells: [String; COLUMNS], default_period: &str) -> Option<Self> {
        if cells.iter().all(|c| c.is_empty()) {
            return None;
        }
        let [code, name, price, quantity, period] = cells;

        let product_name = if name.is_empty() {
            DEFAULT_PRODUCT_NAME.to_string()
        } else {
            name
        };
        let period = if period.is_empty() {
            default_period.trim().to_string()
        } else {
            period
        };

        Some(Self {
            row_number,
            product_code: code,
            product_name,
            price: parse_price(&price),
            quantity: quantity.parse().unwrap_or(0),
            period,
        })
    }

    /// Product code and period are both present.
    pub fn is_valid(&self) -> bool {
        !self.product_code.is_empty() && !self.period.is_empty()
    }
}

/// Unparsable prices degrade to zero.
fn parse_price(text: &str) -> Decimal {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .unwrap_or(Decimal::ZERO)
}

/// Parse an uploaded file into data rows, header excluded.
///
/// Blank periods fall back to `default_period`.
pub fn parse_upload(file_name: &str, content: &[u8], default_period: &str) -> Result<Vec<SheetRow>> {
    let rows = if file_name.to_ascii_lowercase().ends_with(".csv") {
        parse_csv(content, default_period)?
    } else {
        parse_xlsx(content, default_period)?
    };
    debug!(file_name = %file_name, rows = rows.len(), "Spreadsheet parsed");
    Ok(rows)
}

fn cell_text(cell: Option<&Data>) -> String {
    match cell {
        None | Some(Data::Empty) => String::new(),
        Some(Data::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string().trim().to_string(),
    }
}

fn parse_xlsx(content: &[u8], default_period: &str) -> Result<Vec<SheetRow>> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(content))
        .map_err(|e| Error::parse(format!("open workbook: {e}")))?;

    let range: Range<Data> = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| Error::parse("workbook has no worksheets"))?
        .map_err(|e| Error::parse(format!("read first worksheet: {e}")))?;

    let (Some((header_row, _)), Some((last_row, _))) = (range.start(), range.end()) else {
        return Ok(Vec::new());
    };

    let rows = (header_row + 1..=last_row)
        .filter_map(|row| {
            let cells: [String; COLUMNS] = std::array::from_fn(|offset| {
                cell_text(range.get_value((row, FIRST_COLUMN + offset as u32)))
            });
            SheetRow::from_cells(row + 1, cells, default_period)
        })
        .collect();
    Ok(rows)
}

fn parse_csv(content: &[u8], default_period: &str) -> Result<Vec<SheetRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content);

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| Error::parse(format!("read csv: {e}")))?;
        if index == 0 {
            continue;
        }
        let row_number = record
            .position()
            .and_then(|p| u32::try_from(p.line()).ok())
            .unwrap_or(index as u32 + 1);
        let cells: [String; COLUMNS] = std::array::from_fn(|offset| {
            record
                .get(FIRST_COLUMN as usize + offset)
                .unwrap_or_default()
                .to_string()
        });
        rows.extend(SheetRow::from_cells(row_number, cells, default_period));
    }
    Ok(rows)
}
