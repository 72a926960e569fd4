//! TOML configuration for the outbreak pipeline.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

fn default_address_layer() -> String {
    "addresses".to_string()
}

fn default_avoid_layer() -> String {
    "avoid_points".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// CSV export URL of the survey spreadsheet.
    pub remote_url: String,

    /// Workspace root; staged tables and layer files live underneath it.
    pub proj_dir: PathBuf,

    /// Geocoder URL pieces; the one-line address goes between them.
    pub geocoder_prefix_url: String,
    pub geocoder_suffix_url: String,

    /// Header of the street-address column in the survey sheet.
    pub address_field: String,

    /// Fixed municipality/state suffix appended to every lookup address.
    pub address_suffix: String,

    /// Layer name the geocoded survey addresses are loaded into.
    #[serde(default = "default_address_layer")]
    pub address_layer: String,

    /// Pre-existing point layer of user-designated avoidance locations.
    #[serde(default = "default_avoid_layer")]
    pub avoid_layer: String,

    /// Hazard-source layers to buffer, in overlay order.
    pub hazard_layers: Vec<String>,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.hazard_layers.is_empty() {
            bail!("config lists no hazard layers to buffer");
        }
        url::Url::parse(&self.remote_url).context("remote_url is not a valid URL")?;
        url::Url::parse(&format!("{}x{}", self.geocoder_prefix_url, self.geocoder_suffix_url))
            .context("geocoder prefix/suffix do not form a valid URL")?;
        Ok(())
    }

    /// Staging path for the raw spreadsheet body.
    pub fn raw_staging_path(&self) -> PathBuf {
        self.proj_dir.join("addresses_raw.csv")
    }

    /// Staging path for the geocoded table.
    pub fn enriched_staging_path(&self) -> PathBuf {
        self.proj_dir.join("addresses_geocoded.csv")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
remote_url = "https://example.com/sheet/export?format=csv"
proj_dir = "/tmp/outbreak"
geocoder_prefix_url = "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress?address="
geocoder_suffix_url = "&benchmark=Public_AR_Current&format=json"
address_field = "Street Address:"
address_suffix = "Boulder CO"
hazard_layers = ["Mosquito_Larval_Sites", "Wetlands"]
"#
    }

    #[test]
    fn test_parse_sample() {
        let config: Config = toml::from_str(sample()).unwrap();
        assert_eq!(config.hazard_layers.len(), 2);
        assert_eq!(config.address_layer, "addresses");
        assert_eq!(config.avoid_layer, "avoid_points");
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_hazard_list_rejected() {
        let mut config: Config = toml::from_str(sample()).unwrap();
        config.hazard_layers.clear();
        assert!(config.validate().is_err());
    }
}
