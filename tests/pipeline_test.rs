//! End-to-end pipeline tests against the in-memory engine.
//!
//! Workspace layout for most tests: hazard point layers `A` (origin) and
//! `B` (30, 0), avoidance point at (60, 0). With distances A=100, B=50 and
//! avoid=10 the joint risk region spans roughly x in [-20, 80] around the
//! x axis, minus a small hole around (60, 0).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use culex::config::Config;
use culex::engine::{GeometryEngine, MemoryEngine, SpatialRelation, JOIN_COUNT_FIELD};
use culex::error::{
    EngineError, ExtractError, GeocodeFailure, GeocodeServiceError, PipelineError,
};
use culex::etl::Extract;
use culex::geocode::Geocode;
use culex::models::{AddressRecord, BufferSpec, Coordinates, EnrichedTable, RawTable, Stage};
use culex::pipeline::{RiskPipeline, RunOptions, INTERSECT_LAYER, JOINED_LAYER, TARGET_LAYER};

/// Engine wrapper recording the exact input list of every intersect call.
struct RecordingEngine {
    inner: MemoryEngine,
    intersect_inputs: Vec<Vec<String>>,
}

impl RecordingEngine {
    fn new(inner: MemoryEngine) -> Self {
        Self {
            inner,
            intersect_inputs: Vec::new(),
        }
    }
}

impl GeometryEngine for RecordingEngine {
    fn layer_exists(&self, name: &str) -> bool {
        self.inner.layer_exists(name)
    }

    fn delete_if_exists(&mut self, name: &str) -> Result<(), EngineError> {
        self.inner.delete_if_exists(name)
    }

    fn make_points_from_table(
        &mut self,
        table: &EnrichedTable,
        x_field: &str,
        y_field: &str,
        out: &str,
    ) -> Result<String, EngineError> {
        self.inner.make_points_from_table(table, x_field, y_field, out)
    }

    fn buffer(&mut self, spec: &BufferSpec) -> Result<String, EngineError> {
        self.inner.buffer(spec)
    }

    fn intersect(&mut self, inputs: &[String], out: &str) -> Result<String, EngineError> {
        self.intersect_inputs.push(inputs.to_vec());
        self.inner.intersect(inputs, out)
    }

    fn erase(&mut self, target: &str, eraser: &str, out: &str) -> Result<String, EngineError> {
        self.inner.erase(target, eraser, out)
    }

    fn spatial_join(&mut self, target: &str, join: &str, out: &str) -> Result<String, EngineError> {
        self.inner.spatial_join(target, join, out)
    }

    fn select_by_attribute(
        &mut self,
        layer: &str,
        field: &str,
        value: i64,
        out: &str,
    ) -> Result<String, EngineError> {
        self.inner.select_by_attribute(layer, field, value, out)
    }

    fn select_by_location(
        &self,
        target: &str,
        relation: SpatialRelation,
        reference: &str,
    ) -> Result<usize, EngineError> {
        self.inner.select_by_location(target, relation, reference)
    }

    fn feature_count(&self, layer: &str) -> Result<usize, EngineError> {
        self.inner.feature_count(layer)
    }
}

/// Canned survey sheet.
struct FixedExtract {
    streets: Vec<String>,
}

impl FixedExtract {
    fn new(streets: &[&str]) -> Self {
        Self {
            streets: streets.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Extract for FixedExtract {
    async fn extract(&self) -> Result<RawTable, ExtractError> {
        Ok(RawTable {
            headers: vec!["Timestamp".to_string(), "Street Address:".to_string()],
            address_idx: 1,
            records: self
                .streets
                .iter()
                .map(|s| AddressRecord::new(vec!["t".to_string(), s.clone()]))
                .collect(),
        })
    }
}

/// Canned geocoder: known one-line addresses resolve, addresses containing
/// "FAIL" error out, anything else is a no-match.
struct FixedGeocoder {
    known: HashMap<String, Coordinates>,
}

impl FixedGeocoder {
    fn new(entries: &[(&str, f64, f64)]) -> Self {
        Self {
            known: entries
                .iter()
                .map(|(addr, x, y)| (addr.to_string(), Coordinates { x: *x, y: *y }))
                .collect(),
        }
    }
}

#[async_trait]
impl Geocode for FixedGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>, GeocodeServiceError> {
        if address.contains("FAIL") {
            return Err(GeocodeServiceError {
                address: address.to_string(),
                kind: GeocodeFailure::Decode(serde_json::from_str::<i32>("x").unwrap_err()),
            });
        }
        Ok(self.known.get(address).copied())
    }
}

fn test_config(hazards: &[&str]) -> Config {
    Config {
        remote_url: "https://example.com/sheet".to_string(),
        proj_dir: PathBuf::from("/tmp/outbreak-test"),
        geocoder_prefix_url: "https://geo.test/lookup?address=".to_string(),
        geocoder_suffix_url: "&format=json".to_string(),
        address_field: "Street Address:".to_string(),
        address_suffix: "Boulder CO".to_string(),
        address_layer: "addresses".to_string(),
        avoid_layer: "avoid_points".to_string(),
        hazard_layers: hazards.iter().map(|h| h.to_string()).collect(),
    }
}

fn seeded_engine() -> RecordingEngine {
    let mut inner = MemoryEngine::new();
    inner.insert_point_layer("A", &[(0.0, 0.0)]);
    inner.insert_point_layer("B", &[(30.0, 0.0)]);
    inner.insert_point_layer("avoid_points", &[(60.0, 0.0)]);
    RecordingEngine::new(inner)
}

fn distances() -> HashMap<String, f64> {
    let mut map = HashMap::new();
    map.insert("A".to_string(), 100.0);
    map.insert("B".to_string(), 50.0);
    map
}

fn survey_geocoder() -> FixedGeocoder {
    FixedGeocoder::new(&[
        // Inside the joint risk region, clear of the avoidance hole.
        ("10 Inside St Boulder CO", 10.0, 0.0),
        // Inside the buffers but within the avoidance hole.
        ("60 Hole Ave Boulder CO", 60.0, 0.0),
        // Far outside every buffer.
        ("900 Far Rd Boulder CO", 200.0, 0.0),
    ])
}

#[tokio::test]
async fn test_full_run_counts_notify_addresses() {
    let config = test_config(&["A", "B"]);
    let mut engine = seeded_engine();
    let extractor = FixedExtract::new(&["10 Inside St", "60 Hole Ave", "900 Far Rd", "1 Unknown"]);
    let geocoder = survey_geocoder();

    let mut pipeline = RiskPipeline::new(&config, &mut engine, &extractor, &geocoder);
    let opts = RunOptions::new(distances(), 10.0);
    let result = pipeline.run(&opts).await.unwrap();

    assert_eq!(result.count, 1);
    assert_eq!(result.layer.name, TARGET_LAYER);
    assert_eq!(pipeline.run_state().stage, Stage::Done);
    assert_eq!(
        pipeline.run_state().hazard_buffers,
        vec!["buf_A".to_string(), "buf_B".to_string()]
    );

    // Intersect saw exactly the buffers produced this run.
    assert_eq!(engine.intersect_inputs.len(), 1);
    assert_eq!(
        engine.intersect_inputs[0],
        vec!["buf_A".to_string(), "buf_B".to_string()]
    );

    // The no-match row was dropped before loading: 3 joined features.
    assert_eq!(engine.feature_count(JOINED_LAYER).unwrap(), 3);

    // The reported count matches a recount of the materialized layer and
    // the number of joined rows with Join_Count = 1.
    assert_eq!(engine.feature_count(TARGET_LAYER).unwrap(), result.count);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let config = test_config(&["A", "B"]);
    let mut engine = seeded_engine();
    let extractor = FixedExtract::new(&["10 Inside St", "60 Hole Ave", "900 Far Rd"]);
    let geocoder = survey_geocoder();

    let mut pipeline = RiskPipeline::new(&config, &mut engine, &extractor, &geocoder);
    let opts = RunOptions::new(distances(), 10.0);

    let first = pipeline.run(&opts).await.unwrap();
    let second = pipeline.run(&opts).await.unwrap();

    assert_eq!(first.count, second.count);
    // The second run's buffer set is rebuilt from scratch, not inherited.
    assert_eq!(engine.intersect_inputs.len(), 2);
    assert_eq!(engine.intersect_inputs[0], engine.intersect_inputs[1]);
}

#[tokio::test]
async fn test_geocode_failure_skips_row_and_run_completes() {
    let config = test_config(&["A", "B"]);
    let mut engine = seeded_engine();
    let extractor = FixedExtract::new(&["10 Inside St", "FAIL Blvd", "900 Far Rd"]);
    let geocoder = survey_geocoder();

    let mut pipeline = RiskPipeline::new(&config, &mut engine, &extractor, &geocoder);
    let opts = RunOptions::new(distances(), 10.0);
    let result = pipeline.run(&opts).await.unwrap();

    assert_eq!(result.count, 1);
    assert_eq!(engine.feature_count(JOINED_LAYER).unwrap(), 2);
}

#[tokio::test]
async fn test_empty_hazard_list_fails_at_intersect() {
    let config = test_config(&[]);
    let mut engine = seeded_engine();
    let extractor = FixedExtract::new(&["10 Inside St"]);
    let geocoder = survey_geocoder();

    let mut pipeline = RiskPipeline::new(&config, &mut engine, &extractor, &geocoder);
    let opts = RunOptions::new(HashMap::new(), 10.0);
    let err = pipeline.run(&opts).await.unwrap_err();

    assert!(matches!(err, PipelineError::EmptyBufferSet));
    assert_eq!(pipeline.run_state().stage, Stage::Failed);
    assert!(!engine.layer_exists(INTERSECT_LAYER));
}

#[tokio::test]
async fn test_missing_hazard_layer_aborts_remaining_stages() {
    let config = test_config(&["A", "Missing"]);
    let mut engine = seeded_engine();
    let extractor = FixedExtract::new(&["10 Inside St"]);
    let geocoder = survey_geocoder();

    let mut pipeline = RiskPipeline::new(&config, &mut engine, &extractor, &geocoder);
    let mut dist = distances();
    dist.insert("Missing".to_string(), 40.0);
    let opts = RunOptions::new(dist, 10.0);

    let err = pipeline.run(&opts).await.unwrap_err();
    match err {
        PipelineError::Engine { stage, source } => {
            assert_eq!(stage, Stage::BufferHazards);
            assert!(matches!(source, EngineError::MissingLayer(layer) if layer == "Missing"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(pipeline.run_state().stage, Stage::Failed);

    // The first buffer was created before the failure, but nothing after
    // the failing stage ran.
    assert!(engine.layer_exists("buf_A"));
    assert!(!engine.layer_exists(INTERSECT_LAYER));
    assert!(!engine.layer_exists(TARGET_LAYER));
}

#[tokio::test]
async fn test_select_count_matches_location_check() {
    let config = test_config(&["A", "B"]);
    let mut engine = seeded_engine();
    let extractor = FixedExtract::new(&["10 Inside St", "60 Hole Ave", "900 Far Rd"]);
    let geocoder = survey_geocoder();

    let mut pipeline = RiskPipeline::new(&config, &mut engine, &extractor, &geocoder);
    let opts = RunOptions::new(distances(), 10.0);
    let result = pipeline.run(&opts).await.unwrap();

    let within = engine
        .select_by_location(
            TARGET_LAYER,
            SpatialRelation::Within,
            "intersect_minus_avoidPoints",
        )
        .unwrap();
    assert_eq!(within, result.count);

    // Every selected feature carries Join_Count = 1.
    let reselected = engine
        .select_by_attribute(TARGET_LAYER, JOIN_COUNT_FIELD, 1, "recheck")
        .unwrap();
    assert_eq!(engine.feature_count(&reselected).unwrap(), result.count);
}
