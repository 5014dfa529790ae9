use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::ledger::{LedgerError, SignalLedger};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How requests to the Sheets API are authorized
#[derive(Debug, Clone)]
pub enum SheetsAuth {
    /// `key=` query parameter (sheet must be link-readable)
    ApiKey(String),
    /// OAuth bearer token obtained out of band
    BearerToken(String),
    None,
}

/// Response from /values/{range}
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Read-only client for a Google Sheets range
pub struct SheetsLedger {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    range: String,
    auth: SheetsAuth,
    name: String,
}

impl SheetsLedger {
    pub fn new(spreadsheet_id: &str, range: &str, auth: SheetsAuth) -> Self {
        Self::with_base_url(SHEETS_API_BASE, spreadsheet_id, range, auth)
    }

    pub fn with_base_url(base_url: &str, spreadsheet_id: &str, range: &str, auth: SheetsAuth) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            range: range.to_string(),
            auth,
            name: format!("sheets:{}!{}", spreadsheet_id, range),
        }
    }
}

/// Render a cell the way the sheet displays it
fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SignalLedger for SheetsLedger {
    async fn fetch_rows(&self) -> Result<Vec<Vec<String>>, LedgerError> {
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}",
            self.base_url, self.spreadsheet_id, self.range
        );

        let mut request = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));

        request = match &self.auth {
            SheetsAuth::ApiKey(key) => request.query(&[("key", key.as_str())]),
            SheetsAuth::BearerToken(token) => request.bearer_auth(token),
            SheetsAuth::None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LedgerError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let range: ValueRange = response.json().await?;

        Ok(range
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
