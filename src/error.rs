//! Error taxonomy for the notification pipeline.
//!
//! Per-row geocoding failures are isolated inside the transformer and never
//! abort a batch; everything else propagates and fails the run at the stage
//! where it happened. A geocode that simply finds no match is `Ok(None)` on
//! the geocoder, not an error.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::Stage;

/// Failure fetching or staging the remote survey spreadsheet.
///
/// Extraction is all-or-nothing: any of these means no raw table was
/// produced.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("spreadsheet request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to stage raw table at {path}: {source}")]
    Staging {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read staged table at {path}: {source}")]
    ReadStaging {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse spreadsheet rows: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet has no `{0}` column")]
    MissingAddressColumn(String),
}

/// The remote geocoder failed for one address.
///
/// Carries the address so batch diagnostics can name the offending row.
#[derive(Error, Debug)]
#[error("geocoding `{address}` failed: {kind}")]
pub struct GeocodeServiceError {
    pub address: String,
    #[source]
    pub kind: GeocodeFailure,
}

#[derive(Error, Debug)]
pub enum GeocodeFailure {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response was not valid geocoder JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Contract violation while materializing point features.
///
/// The transformer never emits rows without numeric coordinates, so hitting
/// `MissingCoordinates` means an upstream bug, not bad input data. It is
/// fatal, never a skip.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("row {row} is missing numeric coordinates after transform")]
    MissingCoordinates { row: usize },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A geometry-engine call failed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("layer `{0}` does not exist in the workspace")]
    MissingLayer(String),

    #[error("layer `{layer}` has the wrong geometry for {op}")]
    WrongGeometry { layer: String, op: &'static str },

    #[error("{op} is not supported by this engine: {detail}")]
    Unsupported { op: &'static str, detail: String },

    #[error("feature in layer `{layer}` has no `{field}` field")]
    MissingField { layer: String, field: String },

    #[error("failed to read workspace file {path}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("bad layer file {path}: {detail}")]
    BadLayerFile { path: PathBuf, detail: String },
}

/// A pipeline run failed. The stage at which it failed is part of the error
/// so the caller can report a clean, single top-level failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("extract failed: {0}")]
    Extract(#[from] ExtractError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),

    #[error("no distance configured for hazard layer `{0}`")]
    MissingDistance(String),

    #[error("invalid buffer distance {distance} for `{layer}`: must be a positive finite number")]
    InvalidDistance { layer: String, distance: f64 },

    #[error("no hazard buffers were produced this run; nothing to intersect")]
    EmptyBufferSet,

    #[error("geometry engine failed during {stage}: {source}")]
    Engine {
        stage: Stage,
        #[source]
        source: EngineError,
    },

    #[error("failed to stage enriched table: {0}")]
    StageEnriched(#[from] csv::Error),
}
