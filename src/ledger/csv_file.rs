use async_trait::async_trait;
use std::path::PathBuf;

use super::{LedgerError, SignalLedger};

/// Ledger backed by a local CSV export of the sheet
///
/// Re-read on every fetch, so rows appended between cycles are picked up.
/// Useful for dry runs without spreadsheet credentials.
pub struct CsvLedger {
    path: PathBuf,
    name: String,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("csv:{}", path.display());
        Self { path, name }
    }
}

/// Parse CSV bytes into raw cells. Rows may have differing lengths.
pub fn parse_csv(bytes: &[u8]) -> Result<Vec<Vec<String>>, LedgerError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(rows)
}

#[async_trait]
impl SignalLedger for CsvLedger {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, LedgerError> {
        let bytes = tokio::fs::read(&self.path).await?;
        let rows = parse_csv(&bytes)?;

        tracing::debug!("Read {} rows from {}", rows.len(), self.path.display());

        Ok(rows)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
