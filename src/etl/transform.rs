//! Geocoding transform over the raw survey table.

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::geocode::Geocode;
use crate::models::{AddressRecord, EnrichedTable, RawTable, RESIDENTIAL};

/// Default number of in-flight geocode lookups. Kept low to stay friendly
/// with the remote geocoder's rate limits.
const DEFAULT_CONCURRENCY: usize = 4;

/// Per-batch diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub geocoded: usize,
    pub no_match: usize,
    pub failed: usize,
}

/// Drives the geocoder over every extracted row.
///
/// Rows with no match are dropped; rows whose lookup fails outright are
/// dropped and logged. A single bad address never aborts the batch — the
/// rest of the dataset still reaches the overlay stages. Surviving rows
/// keep their input order.
pub struct GeocodeTransformer<'a, G: Geocode> {
    geocoder: &'a G,
    address_suffix: String,
    concurrency: usize,
}

impl<'a, G: Geocode> GeocodeTransformer<'a, G> {
    pub fn new(geocoder: &'a G, address_suffix: &str) -> Self {
        Self {
            geocoder,
            address_suffix: address_suffix.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    /// One-line lookup address for a row: the street-address column plus
    /// the fixed municipality suffix, whitespace squashed.
    fn lookup_address(&self, record: &AddressRecord, address_idx: usize) -> String {
        let street = record.values.get(address_idx).map(String::as_str).unwrap_or("");
        let full = format!("{} {}", street.trim(), self.address_suffix);
        full.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    async fn geocode_row(
        &self,
        mut record: AddressRecord,
        address_idx: usize,
    ) -> (Option<AddressRecord>, bool) {
        let address = self.lookup_address(&record, address_idx);
        match self.geocoder.geocode(&address).await {
            Ok(Some(coords)) => {
                record.x = Some(coords.x);
                record.y = Some(coords.y);
                record.category = Some(RESIDENTIAL.to_string());
                (Some(record), false)
            }
            Ok(None) => {
                debug!("No coordinates found for address: {}", address);
                (None, false)
            }
            Err(e) => {
                warn!("Skipping row: {}", e);
                (None, true)
            }
        }
    }

    pub async fn transform(&self, raw: &RawTable) -> (EnrichedTable, TransformStats) {
        let address_idx = raw.address_idx;

        // buffered() preserves input order, so feature IDs downstream are
        // deterministic regardless of which lookups finish first.
        let outcomes: Vec<(Option<AddressRecord>, bool)> = stream::iter(raw.records.iter().cloned())
            .map(|record| self.geocode_row(record, address_idx))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut stats = TransformStats::default();
        let mut records = Vec::with_capacity(outcomes.len());
        for (record, errored) in outcomes {
            match record {
                Some(rec) => {
                    stats.geocoded += 1;
                    records.push(rec);
                }
                None if errored => stats.failed += 1,
                None => stats.no_match += 1,
            }
        }

        let mut headers = raw.headers.clone();
        headers.push("X".to_string());
        headers.push("Y".to_string());
        headers.push("Type".to_string());

        info!(
            "Geocoded {} of {} rows ({} no match, {} failed)",
            stats.geocoded,
            raw.len(),
            stats.no_match,
            stats.failed
        );

        (EnrichedTable { headers, records }, stats)
    }
}
