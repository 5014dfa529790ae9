// Signal ledger access and row decoding
pub mod csv_file;

pub use csv_file::CsvLedger;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::models::{Row, RowAction};

const COL_TIMESTAMP: usize = 0;
const COL_ACTION: usize = 1;
const COL_QUANTITY: usize = 2;
const COL_PRICE: usize = 3;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("ledger returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to read ledger file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ledger file: {0}")]
    Csv(#[from] csv::Error),
}

/// Read-only access to the append-only ledger
///
/// Returns every row as raw cells, header included.
#[async_trait]
pub trait SignalLedger: Send + Sync {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, LedgerError>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}

/// A ledger row that could not be decoded
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RowError {
    #[error("line {line}: missing {field}")]
    MissingField { line: usize, field: &'static str },
    #[error("line {line}: {field} '{value}' is not a number")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: unparseable timestamp '{value}'")]
    InvalidTimestamp { line: usize, value: String },
    #[error("line {line}: buy row has no price")]
    MissingEntryPrice { line: usize },
}

/// Decoded rows plus every row that was skipped
///
/// `warnings` holds bad cells on signal rows that were still kept.
#[derive(Debug, Clone, Default)]
pub struct DecodedLedger {
    pub rows: Vec<Row>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<RowError>,
}

/// Decode raw ledger cells into rows, skipping the header at index 0
///
/// The Sheets API trims trailing empty cells, so short rows are padded with
/// empty values rather than rejected.
pub fn decode_rows(raw: &[Vec<String>]) -> DecodedLedger {
    let mut decoded = DecodedLedger::default();

    for (index, cells) in raw.iter().enumerate().skip(1) {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }

        match decode_row(index + 1, cells) {
            Ok((row, warning)) => {
                decoded.rows.push(row);
                decoded.warnings.extend(warning);
            }
            Err(e) => decoded.errors.push(e),
        }
    }

    decoded
}

fn decode_row(line: usize, cells: &[String]) -> Result<(Row, Option<RowError>), RowError> {
    let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or("");

    let action_raw = cell(COL_ACTION);
    if action_raw.is_empty() {
        return Err(RowError::MissingField {
            line,
            field: "action",
        });
    }
    let action = RowAction::parse(action_raw);
    let timestamp = cell(COL_TIMESTAMP).to_string();

    // Signal rows are never dropped: the newest one is always the alert
    if action.is_signal() {
        let (price, warning) = match parse_decimal(line, "price", cell(COL_PRICE)) {
            Ok(price) => (price, None),
            Err(e) => (None, Some(e)),
        };
        let row = Row {
            line,
            timestamp,
            action,
            quantity: None,
            price,
        };
        return Ok((row, warning));
    }

    let quantity = parse_decimal(line, "quantity", cell(COL_QUANTITY))?;
    let price = parse_decimal(line, "price", cell(COL_PRICE))?;

    if matches!(action, RowAction::Buy | RowAction::Sell) && quantity.is_none() {
        return Err(RowError::MissingField {
            line,
            field: "quantity",
        });
    }

    let row = Row {
        line,
        timestamp,
        action,
        quantity,
        price,
    };
    Ok((row, None))
}

fn parse_decimal(
    line: usize,
    field: &'static str,
    value: &str,
) -> Result<Option<Decimal>, RowError> {
    if value.is_empty() {
        return Ok(None);
    }

    // Sheets may render prices with a currency symbol or thousands separators
    let cleaned: String = value.chars().filter(|c| *c != '$' && *c != ',').collect();

    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .map(Some)
        .map_err(|_| RowError::InvalidNumber {
            line,
            field,
            value: value.to_string(),
        })
}
