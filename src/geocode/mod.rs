//! Address geocoding against the Census one-line-address endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::{GeocodeFailure, GeocodeServiceError};
use crate::models::Coordinates;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    result: GeocodeResult,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(rename = "addressMatches")]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    coordinates: MatchCoordinates,
}

#[derive(Debug, Deserialize)]
struct MatchCoordinates {
    x: f64,
    y: f64,
}

/// Geocoding capability, injectable so the transformer can be driven by a
/// stub in tests.
///
/// `Ok(None)` is a legitimate no-match for a bad or incomplete address;
/// `Err` means the service itself failed for this address.
#[async_trait]
pub trait Geocode: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>, GeocodeServiceError>;
}

/// Stateless geocoder client. Safe to invoke concurrently per address.
#[derive(Clone)]
pub struct CensusGeocoder {
    client: Client,
    prefix_url: String,
    suffix_url: String,
}

impl CensusGeocoder {
    pub fn new(prefix_url: &str, suffix_url: &str) -> Self {
        Self {
            client: Client::builder()
                .user_agent("Culex/0.1 (wnv-notify)")
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to create HTTP client"),
            prefix_url: prefix_url.to_string(),
            suffix_url: suffix_url.to_string(),
        }
    }

    fn lookup_url(&self, address: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(address.as_bytes()).collect();
        format!("{}{}{}", self.prefix_url, encoded, self.suffix_url)
    }
}

/// Pull the first match's coordinates out of a geocoder response body.
fn first_match(body: &str) -> Result<Option<Coordinates>, serde_json::Error> {
    let resp: GeocodeResponse = serde_json::from_str(body)?;
    Ok(resp.result.address_matches.first().map(|m| Coordinates {
        x: m.coordinates.x,
        y: m.coordinates.y,
    }))
}

#[async_trait]
impl Geocode for CensusGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>, GeocodeServiceError> {
        let fail = |kind: GeocodeFailure| GeocodeServiceError {
            address: address.to_string(),
            kind,
        };

        let url = self.lookup_url(address);
        debug!("Geocoding: {}", address);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| fail(e.into()))?;

        let body = response.text().await.map_err(|e| fail(e.into()))?;
        first_match(&body).map_err(|e| fail(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_with_coordinates() {
        let body = r#"{"result": {"addressMatches": [
            {"coordinates": {"x": -105.2705, "y": 40.015}},
            {"coordinates": {"x": -105.3, "y": 40.1}}
        ]}}"#;
        let coords = first_match(body).unwrap().unwrap();
        assert_eq!(coords.x, -105.2705);
        assert_eq!(coords.y, 40.015);
    }

    #[test]
    fn test_empty_match_list_is_no_match() {
        let body = r#"{"result": {"addressMatches": []}}"#;
        assert!(first_match(body).unwrap().is_none());
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        assert!(first_match("not json").is_err());
        assert!(first_match(r#"{"result": {}}"#).is_err());
    }

    #[test]
    fn test_lookup_url_encodes_address() {
        let geocoder = CensusGeocoder::new("https://geo.test/lookup?address=", "&format=json");
        let url = geocoder.lookup_url("123 Main St Boulder CO");
        assert_eq!(
            url,
            "https://geo.test/lookup?address=123+Main+St+Boulder+CO&format=json"
        );
    }
}
