//! In-memory geometry engine.
//!
//! Good enough to run the overlay end-to-end without a full GIS: point
//! layers are seeded from CSV files under `<workspace>/layers/`, buffers are
//! discs unioned with polygon boolean ops, and the spatial join goes through
//! an R-tree point index. Buffering polygon layers is left to a real GIS
//! backend and reported as unsupported.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use geo::{BooleanOps, BoundingRect, Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use tracing::{debug, info};

use super::{GeometryEngine, SpatialRelation, JOIN_COUNT_FIELD};
use crate::error::EngineError;
use crate::models::{BufferSpec, EnrichedTable, GeometryKind};

/// Segments per buffer disc.
const DISC_SEGMENTS: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Int(i64),
    Real(f64),
}

impl AttrValue {
    fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Real(v) if v.fract() == 0.0 => Some(*v as i64),
            AttrValue::Real(_) => None,
            AttrValue::Text(s) => s.parse().ok(),
        }
    }
}

#[derive(Debug, Clone)]
struct PointFeature {
    point: Point<f64>,
    attrs: BTreeMap<String, AttrValue>,
}

#[derive(Debug, Clone)]
enum LayerData {
    Points(Vec<PointFeature>),
    Region(MultiPolygon<f64>),
}

impl LayerData {
    fn kind(&self) -> GeometryKind {
        match self {
            LayerData::Points(_) => GeometryKind::Point,
            LayerData::Region(_) => GeometryKind::Polygon,
        }
    }
}

/// Workspace of named layers held in memory.
#[derive(Debug)]
pub struct MemoryEngine {
    layers: HashMap<String, LayerData>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            layers: HashMap::new(),
        }
    }

    /// Open a workspace directory, seeding one point layer per CSV file
    /// under `<dir>/layers/` (file stem becomes the layer name; `X`/`Y`
    /// columns are the coordinates, every other column an attribute).
    pub fn open(dir: &Path) -> Result<Self, EngineError> {
        let mut engine = Self::new();
        let layers_dir = dir.join("layers");
        if !layers_dir.is_dir() {
            info!("No layers/ directory under {}; starting with an empty workspace", dir.display());
            return Ok(engine);
        }

        let entries = fs::read_dir(&layers_dir).map_err(|e| EngineError::Workspace {
            path: layers_dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Workspace {
                path: layers_dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("csv") {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let features = load_point_csv(&path)?;
            info!("Seeded layer `{}` with {} features", name, features.len());
            engine.layers.insert(name, LayerData::Points(features));
        }
        Ok(engine)
    }

    /// Seed a bare point layer. Used by workspace loading and tests.
    pub fn insert_point_layer(&mut self, name: &str, points: &[(f64, f64)]) {
        let features = points
            .iter()
            .map(|&(x, y)| PointFeature {
                point: Point::new(x, y),
                attrs: BTreeMap::new(),
            })
            .collect();
        self.layers.insert(name.to_string(), LayerData::Points(features));
    }

    pub fn layer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.layers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn layer_kind(&self, name: &str) -> Option<GeometryKind> {
        self.layers.get(name).map(|l| l.kind())
    }

    fn points(&self, name: &str, op: &'static str) -> Result<&[PointFeature], EngineError> {
        match self.layers.get(name) {
            None => Err(EngineError::MissingLayer(name.to_string())),
            Some(LayerData::Points(features)) => Ok(features),
            Some(LayerData::Region(_)) => Err(EngineError::WrongGeometry {
                layer: name.to_string(),
                op,
            }),
        }
    }

    fn region(&self, name: &str, op: &'static str) -> Result<&MultiPolygon<f64>, EngineError> {
        match self.layers.get(name) {
            None => Err(EngineError::MissingLayer(name.to_string())),
            Some(LayerData::Region(mp)) => Ok(mp),
            Some(LayerData::Points(_)) => Err(EngineError::WrongGeometry {
                layer: name.to_string(),
                op,
            }),
        }
    }

    /// Indices of `features` that fall inside `region`, via an R-tree
    /// envelope query followed by an exact containment check.
    fn contained_indices(features: &[PointFeature], region: &MultiPolygon<f64>) -> HashSet<usize> {
        let mut inside = HashSet::new();
        let bbox = match region.bounding_rect() {
            Some(rect) => rect,
            None => return inside,
        };

        let indexed: Vec<GeomWithData<[f64; 2], usize>> = features
            .iter()
            .enumerate()
            .map(|(i, f)| GeomWithData::new([f.point.x(), f.point.y()], i))
            .collect();
        let tree = RTree::bulk_load(indexed);

        let envelope = AABB::from_corners(
            [bbox.min().x, bbox.min().y],
            [bbox.max().x, bbox.max().y],
        );
        for candidate in tree.locate_in_envelope(&envelope) {
            let idx = candidate.data;
            if region.contains(&features[idx].point) {
                inside.insert(idx);
            }
        }
        inside
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Closed disc polygon around a center point.
fn disc(center: Point<f64>, radius: f64) -> Polygon<f64> {
    let mut coords = Vec::with_capacity(DISC_SEGMENTS + 1);
    for i in 0..DISC_SEGMENTS {
        let theta = 2.0 * std::f64::consts::PI * (i as f64) / (DISC_SEGMENTS as f64);
        coords.push(Coord {
            x: center.x() + radius * theta.cos(),
            y: center.y() + radius * theta.sin(),
        });
    }
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}

fn load_point_csv(path: &Path) -> Result<Vec<PointFeature>, EngineError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| EngineError::BadLayerFile {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| EngineError::BadLayerFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let find = |field: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(field));
    let (x_idx, y_idx) = match (find("x"), find("y")) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(EngineError::BadLayerFile {
                path: path.to_path_buf(),
                detail: "missing X/Y columns".to_string(),
            })
        }
    };

    let mut features = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| EngineError::BadLayerFile {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let parse = |idx: usize| -> Result<f64, EngineError> {
            record
                .get(idx)
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| EngineError::BadLayerFile {
                    path: path.to_path_buf(),
                    detail: format!("row {} has a non-numeric coordinate", row + 1),
                })
        };
        let (x, y) = (parse(x_idx)?, parse(y_idx)?);

        let mut attrs = BTreeMap::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == x_idx || idx == y_idx {
                continue;
            }
            if let Some(value) = record.get(idx) {
                attrs.insert(header.clone(), AttrValue::Text(value.to_string()));
            }
        }
        features.push(PointFeature {
            point: Point::new(x, y),
            attrs,
        });
    }
    Ok(features)
}

impl GeometryEngine for MemoryEngine {
    fn layer_exists(&self, name: &str) -> bool {
        self.layers.contains_key(name)
    }

    fn delete_if_exists(&mut self, name: &str) -> Result<(), EngineError> {
        if self.layers.remove(name).is_some() {
            debug!("Deleted layer `{}`", name);
        }
        Ok(())
    }

    fn make_points_from_table(
        &mut self,
        table: &EnrichedTable,
        x_field: &str,
        y_field: &str,
        out: &str,
    ) -> Result<String, EngineError> {
        self.delete_if_exists(out)?;

        let attr_count = table.headers.len().saturating_sub(3);
        let mut features = Vec::with_capacity(table.len());
        for record in &table.records {
            let (x, y) = match (record.x, record.y) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    return Err(EngineError::MissingField {
                        layer: out.to_string(),
                        field: x_field.to_string(),
                    })
                }
            };
            let mut attrs = BTreeMap::new();
            for (header, value) in table.headers.iter().take(attr_count).zip(&record.values) {
                attrs.insert(header.clone(), AttrValue::Text(value.clone()));
            }
            attrs.insert(x_field.to_string(), AttrValue::Real(x));
            attrs.insert(y_field.to_string(), AttrValue::Real(y));
            if let Some(category) = &record.category {
                attrs.insert("Type".to_string(), AttrValue::Text(category.clone()));
            }
            features.push(PointFeature {
                point: Point::new(x, y),
                attrs,
            });
        }

        debug!("Created point layer `{}` with {} features", out, features.len());
        self.layers.insert(out.to_string(), LayerData::Points(features));
        Ok(out.to_string())
    }

    fn buffer(&mut self, spec: &BufferSpec) -> Result<String, EngineError> {
        let out = spec.output_name();
        let region = match self.layers.get(&spec.input) {
            None => return Err(EngineError::MissingLayer(spec.input.clone())),
            Some(LayerData::Region(_)) => {
                return Err(EngineError::Unsupported {
                    op: "buffer",
                    detail: format!(
                        "`{}` is a polygon layer; only point layers can be buffered in-memory",
                        spec.input
                    ),
                })
            }
            Some(LayerData::Points(features)) => {
                // Dissolve-ALL: one merged region for the whole layer.
                let mut merged: Option<MultiPolygon<f64>> = None;
                for feature in features {
                    let d = MultiPolygon::new(vec![disc(feature.point, spec.distance)]);
                    merged = Some(match merged {
                        None => d,
                        Some(acc) => acc.union(&d),
                    });
                }
                merged.unwrap_or_else(|| MultiPolygon::new(vec![]))
            }
        };

        self.delete_if_exists(&out)?;
        debug!("Buffered `{}` by {} into `{}`", spec.input, spec.distance, out);
        self.layers.insert(out.clone(), LayerData::Region(region));
        Ok(out)
    }

    fn intersect(&mut self, inputs: &[String], out: &str) -> Result<String, EngineError> {
        let mut iter = inputs.iter();
        let first = iter.next().ok_or_else(|| EngineError::Unsupported {
            op: "intersect",
            detail: "no input layers".to_string(),
        })?;

        let mut acc = self.region(first, "intersect")?.clone();
        for name in iter {
            let region = self.region(name, "intersect")?;
            acc = acc.intersection(region);
        }

        self.delete_if_exists(out)?;
        debug!("Intersected {:?} into `{}`", inputs, out);
        self.layers.insert(out.to_string(), LayerData::Region(acc));
        Ok(out.to_string())
    }

    fn erase(&mut self, target: &str, eraser: &str, out: &str) -> Result<String, EngineError> {
        let result = {
            let target_region = self.region(target, "erase")?;
            let eraser_region = self.region(eraser, "erase")?;
            target_region.difference(eraser_region)
        };

        self.delete_if_exists(out)?;
        debug!("Erased `{}` from `{}` into `{}`", eraser, target, out);
        self.layers.insert(out.to_string(), LayerData::Region(result));
        Ok(out.to_string())
    }

    fn spatial_join(&mut self, target: &str, join: &str, out: &str) -> Result<String, EngineError> {
        let joined = {
            let features = self.points(target, "spatial_join")?;
            let region = self.region(join, "spatial_join")?;
            let inside = Self::contained_indices(features, region);

            features
                .iter()
                .enumerate()
                .map(|(idx, feature)| {
                    let mut attrs = feature.attrs.clone();
                    let count = if inside.contains(&idx) { 1 } else { 0 };
                    attrs.insert(JOIN_COUNT_FIELD.to_string(), AttrValue::Int(count));
                    PointFeature {
                        point: feature.point,
                        attrs,
                    }
                })
                .collect::<Vec<_>>()
        };

        self.delete_if_exists(out)?;
        debug!("Joined `{}` against `{}` into `{}`", target, join, out);
        self.layers.insert(out.to_string(), LayerData::Points(joined));
        Ok(out.to_string())
    }

    fn select_by_attribute(
        &mut self,
        layer: &str,
        field: &str,
        value: i64,
        out: &str,
    ) -> Result<String, EngineError> {
        let selected = {
            let features = self.points(layer, "select_by_attribute")?;
            let mut selected = Vec::new();
            for feature in features {
                let attr = feature.attrs.get(field).ok_or_else(|| EngineError::MissingField {
                    layer: layer.to_string(),
                    field: field.to_string(),
                })?;
                if attr.as_int() == Some(value) {
                    selected.push(feature.clone());
                }
            }
            selected
        };

        self.delete_if_exists(out)?;
        debug!(
            "Selected {} features from `{}` where {} = {} into `{}`",
            selected.len(),
            layer,
            field,
            value,
            out
        );
        self.layers.insert(out.to_string(), LayerData::Points(selected));
        Ok(out.to_string())
    }

    fn select_by_location(
        &self,
        target: &str,
        relation: SpatialRelation,
        reference: &str,
    ) -> Result<usize, EngineError> {
        let SpatialRelation::Within = relation;
        let features = self.points(target, "select_by_location")?;
        let region = self.region(reference, "select_by_location")?;
        Ok(Self::contained_indices(features, region).len())
    }

    fn feature_count(&self, layer: &str) -> Result<usize, EngineError> {
        match self.layers.get(layer) {
            None => Err(EngineError::MissingLayer(layer.to_string())),
            Some(LayerData::Points(features)) => Ok(features.len()),
            Some(LayerData::Region(mp)) => Ok(mp.0.len()),
        }
    }
}
