use rust_decimal::Decimal;
use std::collections::HashSet;

use super::scheduler::parse_signal_time;
use crate::ledger::RowError;
use crate::models::{Position, Row, RowAction};

/// Open positions derived from one pass over the ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// In ledger order; the last entry is the position a sell signal closes
    pub positions: Vec<Position>,
    pub errors: Vec<RowError>,
}

impl Reconciliation {
    pub fn last_position(&self) -> Option<&Position> {
        self.positions.last()
    }
}

/// Derive open positions from raw ledger history
///
/// A `buy` row is open unless some `sell` row anywhere in the history carries
/// the same quantity. Quantities compare numerically, so `0.5` closes `0.50`.
/// Nothing is cached between calls: every cycle rebuilds the view.
pub fn reconcile(rows: &[Row]) -> Reconciliation {
    let sold: HashSet<Decimal> = rows
        .iter()
        .filter(|r| r.action == RowAction::Sell)
        .filter_map(|r| r.quantity.map(|q| q.normalize()))
        .collect();

    let mut result = Reconciliation::default();

    for row in rows.iter().filter(|r| r.action == RowAction::Buy) {
        // Decoding guarantees buy rows carry a quantity
        let Some(quantity) = row.quantity else {
            continue;
        };

        if sold.contains(&quantity.normalize()) {
            continue;
        }

        match open_position(row, quantity) {
            Ok(position) => {
                let duplicate = result.positions.iter().any(|p| {
                    p.quantity == position.quantity
                        && p.entry_price == position.entry_price
                        && p.opened_at == position.opened_at
                });
                if duplicate {
                    tracing::debug!("Ignoring duplicate buy row at line {}", row.line);
                } else {
                    result.positions.push(position);
                }
            }
            Err(e) => result.errors.push(e),
        }
    }

    result
}

fn open_position(row: &Row, quantity: Decimal) -> Result<Position, RowError> {
    let entry_price = row
        .price
        .ok_or(RowError::MissingEntryPrice { line: row.line })?;

    let opened_at = parse_signal_time(&row.timestamp).map_err(|_| RowError::InvalidTimestamp {
        line: row.line,
        value: row.timestamp.clone(),
    })?;

    Ok(Position {
        line: row.line,
        entry_price,
        quantity,
        opened_at,
    })
}
