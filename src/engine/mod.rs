//! Geometry-engine interface.
//!
//! The overlay pipeline drives whatever GIS backs the workspace through this
//! trait. Calls are blocking and non-reentrant against a single shared
//! workspace; the orchestrator holds the engine `&mut` for the duration of a
//! run, so two runs can never interleave on one workspace.

mod memory;

pub use memory::MemoryEngine;

use crate::error::EngineError;
use crate::models::{BufferSpec, EnrichedTable};

/// Spatial relationship for location-based selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialRelation {
    Within,
}

/// Attribute field added by the spatial join: 1 when the feature fell inside
/// the join layer, 0 otherwise.
pub const JOIN_COUNT_FIELD: &str = "Join_Count";

pub trait GeometryEngine {
    fn layer_exists(&self, name: &str) -> bool;

    /// Remove a layer if present. A no-op for absent layers; every producing
    /// operation calls this on its output name first so re-runs never append
    /// to stale layers.
    fn delete_if_exists(&mut self, name: &str) -> Result<(), EngineError>;

    /// Materialize a point layer from a geocoded table, one feature per row,
    /// carrying all row attributes. The coordinate values are also written
    /// into the attribute map under `x_field`/`y_field`.
    fn make_points_from_table(
        &mut self,
        table: &EnrichedTable,
        x_field: &str,
        y_field: &str,
        out: &str,
    ) -> Result<String, EngineError>;

    /// Buffer a layer into a single dissolved polygon region named
    /// `buf_<input>`.
    fn buffer(&mut self, spec: &BufferSpec) -> Result<String, EngineError>;

    /// Geometric intersection of the given polygon layers.
    fn intersect(&mut self, inputs: &[String], out: &str) -> Result<String, EngineError>;

    /// Subtract `eraser`'s region from `target`.
    fn erase(&mut self, target: &str, eraser: &str, out: &str) -> Result<String, EngineError>;

    /// Join `join`'s region onto `target`'s points, writing a
    /// `Join_Count` attribute on every output feature.
    fn spatial_join(&mut self, target: &str, join: &str, out: &str) -> Result<String, EngineError>;

    /// Copy the features of `layer` whose integer `field` equals `value`
    /// into a new layer.
    fn select_by_attribute(
        &mut self,
        layer: &str,
        field: &str,
        value: i64,
        out: &str,
    ) -> Result<String, EngineError>;

    /// Count the features of `target` bearing the given spatial relation to
    /// `reference`, without materializing a layer.
    fn select_by_location(
        &self,
        target: &str,
        relation: SpatialRelation,
        reference: &str,
    ) -> Result<usize, EngineError>;

    /// Feature count, recomputed from the stored layer on every call.
    fn feature_count(&self, layer: &str) -> Result<usize, EngineError>;
}
