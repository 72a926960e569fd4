//! Survey spreadsheet extraction.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::error::ExtractError;
use crate::models::{AddressRecord, RawTable};

/// Extraction capability, injectable so the pipeline can be driven from a
/// canned table in tests.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self) -> Result<RawTable, ExtractError>;
}

/// Fetches the survey sheet as CSV text, stages the raw body on disk, and
/// parses it into a table. All-or-nothing: a parse failure produces no
/// table, and the staged file lets a re-run skip the fetch.
pub struct SheetExtractor {
    client: Client,
    remote_url: String,
    staging_path: PathBuf,
    address_field: String,
    /// Re-parse the staged file instead of fetching.
    offline: bool,
}

impl SheetExtractor {
    pub fn new(remote_url: &str, staging_path: PathBuf, address_field: &str) -> Self {
        Self {
            client: Client::builder()
                .user_agent("Culex/0.1 (wnv-notify)")
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("Failed to create HTTP client"),
            remote_url: remote_url.to_string(),
            staging_path,
            address_field: address_field.to_string(),
            offline: false,
        }
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    async fn fetch(&self) -> Result<String, ExtractError> {
        info!("Fetching survey addresses from {}", self.remote_url);
        let response = self
            .client
            .get(&self.remote_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())?;
        let body = response.text().await?;

        fs::write(&self.staging_path, &body).map_err(|e| ExtractError::Staging {
            path: self.staging_path.clone(),
            source: e,
        })?;
        debug!("Staged raw table at {}", self.staging_path.display());
        Ok(body)
    }

    fn read_staged(&self) -> Result<String, ExtractError> {
        info!("Reading staged table from {}", self.staging_path.display());
        fs::read_to_string(&self.staging_path).map_err(|e| ExtractError::ReadStaging {
            path: self.staging_path.clone(),
            source: e,
        })
    }
}

/// Parse CSV text into a raw table, locating the street-address column.
pub(crate) fn parse_table(text: &str, address_field: &str) -> Result<RawTable, ExtractError> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();

    let address_idx = headers
        .iter()
        .position(|h| h == address_field)
        .ok_or_else(|| ExtractError::MissingAddressColumn(address_field.to_string()))?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(AddressRecord::new(
            record.iter().map(|v| v.to_string()).collect(),
        ));
    }

    Ok(RawTable {
        headers,
        address_idx,
        records,
    })
}

#[async_trait]
impl Extract for SheetExtractor {
    async fn extract(&self) -> Result<RawTable, ExtractError> {
        let body = if self.offline {
            self.read_staged()?
        } else {
            self.fetch().await?
        };
        let table = parse_table(&body, &self.address_field)?;
        info!("Extracted {} survey rows", table.len());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "Timestamp,Street Address:,Comments\n\
                         1/1/2024,123 Main St,none\n\
                         1/2/2024,456 Oak Ave,call first\n";

    #[test]
    fn test_parse_table() {
        let table = parse_table(SHEET, "Street Address:").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.address_idx, 1);
        assert_eq!(table.records[0].values[1], "123 Main St");
        assert!(table.records[0].x.is_none());
    }

    #[test]
    fn test_parse_table_missing_address_column() {
        let err = parse_table(SHEET, "Street Address").unwrap_err();
        assert!(matches!(err, ExtractError::MissingAddressColumn(_)));
    }

    #[tokio::test]
    async fn test_offline_extract_reads_staging() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("addresses_raw.csv");
        fs::write(&staged, SHEET).unwrap();

        let extractor =
            SheetExtractor::new("https://unused.test/sheet", staged, "Street Address:")
                .offline(true);
        let table = extractor.extract().await.unwrap();
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_offline_extract_without_staging_fails() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("missing.csv");
        let extractor =
            SheetExtractor::new("https://unused.test/sheet", staged, "Street Address:")
                .offline(true);
        assert!(matches!(
            extractor.extract().await,
            Err(ExtractError::ReadStaging { .. })
        ));
    }
}
