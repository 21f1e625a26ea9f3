use thiserror::Error;

pub type Result<T> = std::result::Result<T, MorphError>;

/// Boxed error returned by an external data loader.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum MorphError {
    #[error("regular geography must contain at least one feature")]
    MissingGeometry,

    #[error("unsupported cartogram input: {0}")]
    UnsupportedCartogramInput(String),

    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(#[from] serde_json::Error),

    #[error("delimited text, line {line}: {reason}")]
    DelimitedText { line: usize, reason: String },

    #[error("grid cartogram has no records")]
    EmptyGrid,

    #[error("grid record {index}: field `{field}` is not numeric")]
    NonNumericGridIndex { index: usize, field: String },

    #[error("grid record {index}: missing key field `{field}`")]
    MissingGridKey { index: usize, field: String },

    #[error("grid {axis} range is degenerate")]
    DegenerateGrid { axis: &'static str },

    #[error("grid extent is neither given nor derivable from the regular geography")]
    UnresolvableExtent,

    #[error("max segment length must be a positive finite number, got {0}")]
    InvalidSegmentLength(f64),

    #[error("feature {index} carries no `{property}` property and no id")]
    MissingJoinProperty { index: usize, property: String },

    #[error("external data could not be loaded: {0}")]
    DataLoad(#[source] LoadError),

    #[error("engine has not been prepared")]
    NotPrepared,
}
