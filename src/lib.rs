//! Culex - West Nile Virus risk-zone notification pipeline
//!
//! Geocodes survey addresses, overlays buffered hazard layers against
//! user-designated avoidance points, and produces the list of addresses to
//! notify. This library provides the shared types and stages for the
//! `outbreak` binary.

pub mod config;
pub mod engine;
pub mod error;
pub mod etl;
pub mod geocode;
pub mod models;
pub mod pipeline;
pub mod report;

pub use config::Config;
pub use models::{NotifyResult, PipelineRun, Stage};
pub use pipeline::{RiskPipeline, RunOptions};
