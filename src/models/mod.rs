use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a ledger row records
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    /// Executed purchase
    Buy,
    /// Executed sale
    Sell,
    /// Advisory: consider buying
    BuySignal,
    /// Advisory: consider selling
    SellSignal,
    Other,
}

impl RowAction {
    /// Parse the action cell (trimmed, case-insensitive). Unknown text maps to `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "buy" => RowAction::Buy,
            "sell" => RowAction::Sell,
            "buy_signal" => RowAction::BuySignal,
            "sell_signal" => RowAction::SellSignal,
            _ => RowAction::Other,
        }
    }

    pub fn is_signal(&self) -> bool {
        matches!(self, RowAction::BuySignal | RowAction::SellSignal)
    }
}

/// One decoded ledger record
///
/// The timestamp stays raw: only the rows that need it (buys, the latest alert)
/// try to parse it, and a bad timestamp must not hide the rest of the row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Row {
    pub line: usize, // 1-based line in the sheet (header is line 1)
    pub timestamp: String,
    pub action: RowAction,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
}

/// Open position derived from ledger history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub line: usize,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub opened_at: DateTime<Utc>,
}

impl Position {
    /// Profit if the position were closed at `current_price`
    pub fn profit_at(&self, current_price: Decimal) -> Decimal {
        self.quantity * (current_price - self.entry_price)
    }
}

/// Advisory signal kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalKind {
    Buy,
    Sell,
}

/// The newest advisory row in the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub line: usize,
    pub kind: SignalKind,
    pub timestamp: String,
    pub price: Option<Decimal>,
}

impl Alert {
    /// Build an alert from a row, if the row is a signal
    pub fn from_row(row: &Row) -> Option<Self> {
        let kind = match row.action {
            RowAction::BuySignal => SignalKind::Buy,
            RowAction::SellSignal => SignalKind::Sell,
            _ => return None,
        };

        Some(Self {
            line: row.line,
            kind,
            timestamp: row.timestamp.clone(),
            price: row.price,
        })
    }

    /// Price recorded on the alert row, zero when the cell was empty
    pub fn recorded_price(&self) -> Decimal {
        self.price.unwrap_or(Decimal::ZERO)
    }
}

/// Select the most recent alert: last signal row in ledger order
pub fn latest_alert(rows: &[Row]) -> Option<Alert> {
    rows.iter().rev().find_map(Alert::from_row)
}

/// Where the price used for a decision came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PriceSource {
    Feed,
    AlertFallback,
}

/// Unrealized P&L for one open position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSnapshot {
    pub position: Position,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
}
