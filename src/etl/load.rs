//! Loading the geocoded table into the workspace.

use tracing::{debug, info};

use crate::engine::GeometryEngine;
use crate::error::LoadError;
use crate::models::{EnrichedTable, GeometryKind, LayerInfo, Stage};

/// Materializes enriched rows as point features.
pub struct PointLoader;

impl PointLoader {
    /// Delete any stale layer of the same name, then build one point per
    /// row. A row without numeric coordinates here means the transformer
    /// broke its contract, which is fatal.
    pub fn load<E: GeometryEngine>(
        engine: &mut E,
        table: &EnrichedTable,
        target: &str,
    ) -> Result<LayerInfo, LoadError> {
        for (row, record) in table.records.iter().enumerate() {
            let ok = matches!(
                (record.x, record.y),
                (Some(x), Some(y)) if x.is_finite() && y.is_finite()
            );
            if !ok {
                return Err(LoadError::MissingCoordinates { row });
            }
        }

        engine.delete_if_exists(target)?;
        debug!("Loading {} features into `{}`", table.len(), target);
        engine.make_points_from_table(table, "X", "Y", target)?;

        let count = engine.feature_count(target)?;
        info!("Loaded layer `{}` with {} features", target, count);

        Ok(LayerInfo {
            name: target.to_string(),
            kind: GeometryKind::Point,
            source_stage: Stage::Etl,
        })
    }
}
