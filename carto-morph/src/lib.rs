//! Morphs a regular geography into a cartogram of the same regions.

pub mod cartogram;
pub mod delimited;
pub mod easing;
pub mod engine;
pub mod enrich;
pub mod error;
pub mod geometry;
pub mod interpolate;
pub mod pairing;
pub mod plan;
pub mod projection;

pub use engine::{DataSource, MorphConfig, MorphEngine, RegionSummary};
pub use error::{MorphError, Result};
pub use geometry::{Feature, FeatureCollection, Geometry};
