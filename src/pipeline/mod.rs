//! Risk-zone pipeline orchestration.
//!
//! Runs Etl → BufferHazards → BufferAvoidance → Intersect → Erase →
//! SpatialJoin → Select as a strict sequence over the shared workspace.
//! Every stage deletes its output name before writing, so a re-run against
//! a stale workspace can never append to or reuse a previous run's layers.
//! The first failing stage marks the run failed and nothing after it
//! executes.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{GeometryEngine, SpatialRelation, JOIN_COUNT_FIELD};
use crate::error::PipelineError;
use crate::etl::{Extract, GeocodeTransformer, PointLoader};
use crate::geocode::Geocode;
use crate::models::{
    BufferSpec, GeometryKind, LayerInfo, NotifyResult, PipelineRun, Stage,
};

pub const INTERSECT_LAYER: &str = "intersect";
pub const ERASE_LAYER: &str = "intersect_minus_avoidPoints";
pub const JOINED_LAYER: &str = "joined_addresses";
pub const TARGET_LAYER: &str = "target_addresses";

/// Caller-supplied run parameters. Buffer distances are validated before
/// any stage executes; the pipeline never blocks on input mid-run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Hazard layer name → buffer distance in workspace units.
    pub distances: HashMap<String, f64>,
    pub avoid_distance: f64,
    pub geocode_concurrency: usize,
    /// Persist the geocoded table next to the raw staging file.
    pub stage_enriched: bool,
}

impl RunOptions {
    pub fn new(distances: HashMap<String, f64>, avoid_distance: f64) -> Self {
        Self {
            distances,
            avoid_distance,
            geocode_concurrency: 4,
            stage_enriched: false,
        }
    }
}

/// The orchestrator. Borrows the engine exclusively for its lifetime, so at
/// most one run can be active against a workspace at a time.
pub struct RiskPipeline<'a, E, X, G> {
    config: &'a Config,
    engine: &'a mut E,
    extractor: &'a X,
    geocoder: &'a G,
    run: PipelineRun,
}

impl<'a, E, X, G> RiskPipeline<'a, E, X, G>
where
    E: GeometryEngine,
    X: Extract,
    G: Geocode,
{
    pub fn new(config: &'a Config, engine: &'a mut E, extractor: &'a X, geocoder: &'a G) -> Self {
        Self {
            config,
            engine,
            extractor,
            geocoder,
            run: PipelineRun::new(),
        }
    }

    pub fn run_state(&self) -> &PipelineRun {
        &self.run
    }

    pub async fn run(&mut self, opts: &RunOptions) -> Result<NotifyResult, PipelineError> {
        // Fresh state per run; buffer names never carry over.
        self.run = PipelineRun::new();
        info!("Starting pipeline run {}", self.run.id);

        match self.execute(opts).await {
            Ok(result) => {
                self.run.stage = Stage::Done;
                info!(
                    "Run {} complete: {} addresses to notify",
                    self.run.id, result.count
                );
                Ok(result)
            }
            Err(e) => {
                let failed_at = self.run.stage;
                self.run.stage = Stage::Failed;
                warn!("Run {} failed during {}: {}", self.run.id, failed_at, e);
                Err(e)
            }
        }
    }

    async fn execute(&mut self, opts: &RunOptions) -> Result<NotifyResult, PipelineError> {
        // Validate every buffer request up front, before any stage touches
        // the workspace.
        let mut hazard_specs = Vec::with_capacity(self.config.hazard_layers.len());
        for layer in &self.config.hazard_layers {
            let distance = *opts
                .distances
                .get(layer)
                .ok_or_else(|| PipelineError::MissingDistance(layer.clone()))?;
            hazard_specs.push(BufferSpec::new(layer, distance)?);
        }
        let avoid_spec = BufferSpec::new(&self.config.avoid_layer, opts.avoid_distance)?;

        // Etl
        self.enter(Stage::Etl);
        let raw = self.extractor.extract().await?;
        let transformer = GeocodeTransformer::new(self.geocoder, &self.config.address_suffix)
            .concurrency(opts.geocode_concurrency);
        let (enriched, stats) = transformer.transform(&raw).await;
        debug!(
            "Transform stats: {} geocoded, {} no match, {} failed",
            stats.geocoded, stats.no_match, stats.failed
        );
        if opts.stage_enriched {
            enriched.write_csv(&self.config.enriched_staging_path())?;
        }
        PointLoader::load(self.engine, &enriched, &self.config.address_layer)?;
        self.exit(Stage::Etl);

        // BufferHazards
        self.enter(Stage::BufferHazards);
        for spec in &hazard_specs {
            let out = spec.output_name();
            info!(
                "Buffering {} to generate {} layer...",
                spec.input, out
            );
            self.engine_call(Stage::BufferHazards, |e| e.delete_if_exists(&out))?;
            self.engine_call(Stage::BufferHazards, |e| e.buffer(spec))?;
            self.run.hazard_buffers.push(out);
        }
        self.exit(Stage::BufferHazards);

        // BufferAvoidance
        self.enter(Stage::BufferAvoidance);
        let avoid_out = avoid_spec.output_name();
        self.engine_call(Stage::BufferAvoidance, |e| e.delete_if_exists(&avoid_out))?;
        self.engine_call(Stage::BufferAvoidance, |e| e.buffer(&avoid_spec))?;
        self.exit(Stage::BufferAvoidance);

        // Intersect: exactly the buffers produced this run, nothing else.
        self.enter(Stage::Intersect);
        if self.run.hazard_buffers.is_empty() {
            return Err(PipelineError::EmptyBufferSet);
        }
        let buffers = self.run.hazard_buffers.clone();
        self.engine_call(Stage::Intersect, |e| e.delete_if_exists(INTERSECT_LAYER))?;
        self.engine_call(Stage::Intersect, |e| e.intersect(&buffers, INTERSECT_LAYER))?;
        self.exit(Stage::Intersect);

        // Erase
        self.enter(Stage::Erase);
        self.engine_call(Stage::Erase, |e| e.delete_if_exists(ERASE_LAYER))?;
        self.engine_call(Stage::Erase, |e| {
            e.erase(INTERSECT_LAYER, &avoid_out, ERASE_LAYER)
        })?;
        self.exit(Stage::Erase);

        // SpatialJoin
        self.enter(Stage::SpatialJoin);
        self.engine_call(Stage::SpatialJoin, |e| e.delete_if_exists(JOINED_LAYER))?;
        let address_layer = self.config.address_layer.clone();
        self.engine_call(Stage::SpatialJoin, |e| {
            e.spatial_join(&address_layer, ERASE_LAYER, JOINED_LAYER)
        })?;
        self.exit(Stage::SpatialJoin);

        // Select
        self.enter(Stage::Select);
        self.engine_call(Stage::Select, |e| e.delete_if_exists(TARGET_LAYER))?;
        self.engine_call(Stage::Select, |e| {
            e.select_by_attribute(JOINED_LAYER, JOIN_COUNT_FIELD, 1, TARGET_LAYER)
        })?;
        // The authoritative count comes from the materialized layer, never
        // from anything cached along the way.
        let count =
            self.engine_call(Stage::Select, |e| e.feature_count(TARGET_LAYER))?;

        let within = self.engine_call(Stage::Select, |e| {
            e.select_by_location(TARGET_LAYER, SpatialRelation::Within, ERASE_LAYER)
        })?;
        if within != count {
            warn!(
                "Location check found {} addresses within the risk region, layer has {}",
                within, count
            );
        }
        self.exit(Stage::Select);

        Ok(NotifyResult {
            layer: LayerInfo {
                name: TARGET_LAYER.to_string(),
                kind: GeometryKind::Point,
                source_stage: Stage::Select,
            },
            count,
        })
    }

    fn engine_call<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce(&mut E) -> Result<T, crate::error::EngineError>,
    ) -> Result<T, PipelineError> {
        f(self.engine).map_err(|source| PipelineError::Engine { stage, source })
    }

    fn enter(&mut self, stage: Stage) {
        self.run.stage = stage;
        debug!("Entering {} stage", stage);
    }

    fn exit(&self, stage: Stage) {
        debug!("Exiting {} stage", stage);
    }
}
