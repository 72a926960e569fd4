//! Extract → transform → load for the survey addresses.
//!
//! The three stages are separate capabilities wired together by the
//! pipeline: fetch the remote sheet into a staged raw table, geocode every
//! row (dropping unmatched ones), and materialize the survivors as a point
//! layer.

mod extract;
mod load;
mod transform;

pub use extract::{Extract, SheetExtractor};
pub use load::PointLoader;
pub use transform::{GeocodeTransformer, TransformStats};
