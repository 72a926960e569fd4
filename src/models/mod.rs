//! Core data models for the risk-zone pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Category tag attached to every geocoded survey address.
pub const RESIDENTIAL: &str = "Residential";

/// Projected coordinate pair returned by the geocoder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// One survey row.
///
/// Created by the extractor with `x`/`y`/`category` unset, enriched exactly
/// once by the transformer (or dropped if the address has no geocode match),
/// and immutable from there on.
#[derive(Debug, Clone)]
pub struct AddressRecord {
    /// Original column values, in header order.
    pub values: Vec<String>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub category: Option<String>,
}

impl AddressRecord {
    pub fn new(values: Vec<String>) -> Self {
        Self {
            values,
            x: None,
            y: None,
            category: None,
        }
    }
}

/// Raw survey table as fetched from the spreadsheet host.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub headers: Vec<String>,
    /// Index of the street-address column within `headers`.
    pub address_idx: usize,
    pub records: Vec<AddressRecord>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Geocoded survey table: original columns plus `X`, `Y`, `Type`.
///
/// Every record is guaranteed to carry numeric coordinates; unmatched rows
/// never make it in.
#[derive(Debug, Clone)]
pub struct EnrichedTable {
    pub headers: Vec<String>,
    pub records: Vec<AddressRecord>,
}

impl EnrichedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the enriched rows out as CSV, for diagnostics and re-load
    /// without re-geocoding.
    pub fn write_csv(&self, path: &std::path::Path) -> Result<(), csv::Error> {
        let mut wtr = csv::Writer::from_path(path)?;
        wtr.write_record(&self.headers)?;
        for rec in &self.records {
            let mut row = rec.values.clone();
            row.push(rec.x.map(|v| v.to_string()).unwrap_or_default());
            row.push(rec.y.map(|v| v.to_string()).unwrap_or_default());
            row.push(rec.category.clone().unwrap_or_default());
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Geometry kind of a workspace layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Polygon,
}

/// Named handle to a feature collection in the workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    pub name: String,
    pub kind: GeometryKind,
    /// Pipeline stage that produced the layer; `Init` for layers that were
    /// already in the workspace.
    pub source_stage: Stage,
}

/// Buffer request: input layer plus a validated positive distance in the
/// workspace's linear unit. The dissolve policy is fixed for this pipeline:
/// all buffer features are merged into one region.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSpec {
    pub input: String,
    pub distance: f64,
}

impl BufferSpec {
    pub fn new(input: &str, distance: f64) -> Result<Self, PipelineError> {
        if !distance.is_finite() || distance <= 0.0 {
            return Err(PipelineError::InvalidDistance {
                layer: input.to_string(),
                distance,
            });
        }
        Ok(Self {
            input: input.to_string(),
            distance,
        })
    }

    /// Output layer name, derived deterministically from the input.
    pub fn output_name(&self) -> String {
        format!("buf_{}", self.input)
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Etl,
    BufferHazards,
    BufferAvoidance,
    Intersect,
    Erase,
    SpatialJoin,
    Select,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::Etl => "etl",
            Stage::BufferHazards => "buffer_hazards",
            Stage::BufferAvoidance => "buffer_avoidance",
            Stage::Intersect => "intersect",
            Stage::Erase => "erase",
            Stage::SpatialJoin => "spatial_join",
            Stage::Select => "select",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Per-run state owned by the orchestrator.
///
/// `hazard_buffers` holds exactly the buffer layers produced this run, in
/// creation order. The intersect stage consumes this list and nothing else,
/// so leftover layers from an earlier run can never leak into the overlay.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub id: Uuid,
    pub stage: Stage,
    pub hazard_buffers: Vec<String>,
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            stage: Stage::Init,
            hazard_buffers: Vec::new(),
        }
    }
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a completed run: the notify layer and its feature count,
/// recomputed from the layer itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyResult {
    pub layer: LayerInfo,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_spec_output_name() {
        let spec = BufferSpec::new("Wetlands", 1500.0).unwrap();
        assert_eq!(spec.output_name(), "buf_Wetlands");
    }

    #[test]
    fn test_buffer_spec_rejects_bad_distances() {
        assert!(BufferSpec::new("A", 0.0).is_err());
        assert!(BufferSpec::new("A", -10.0).is_err());
        assert!(BufferSpec::new("A", f64::NAN).is_err());
        assert!(BufferSpec::new("A", f64::INFINITY).is_err());
        assert!(BufferSpec::new("A", 0.5).is_ok());
    }

    #[test]
    fn test_new_run_starts_empty() {
        let run = PipelineRun::new();
        assert_eq!(run.stage, Stage::Init);
        assert!(run.hazard_buffers.is_empty());
    }
}
