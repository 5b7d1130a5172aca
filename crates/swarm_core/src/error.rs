use thiserror::Error;

/// Errors produced while decoding a line received from the operator.
///
/// None of these are fatal: the transport logs them and drops the line.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("line is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("message has no string `type` field")]
    MissingType,
    #[error("unknown message type `{0}`")]
    UnknownType(String),
    #[error("invalid fields for `{kind}` message: {source}")]
    InvalidFields {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("`{field}` value {value} is not a valid index")]
    IdOutOfRange { field: &'static str, value: i64 },
}

/// Reasons the tessellation could not be built from the current generators.
#[derive(Debug, Error, PartialEq)]
pub enum PartitionError {
    #[error("tessellation needs at least {required} generators, got {actual}")]
    TooFewGenerators { required: usize, actual: usize },
    #[error("generator for drone {0} has a non-finite position")]
    NonFiniteGenerator(u32),
    #[error("generators are collinear or coincident")]
    Degenerate,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment size must be at least {min}, got {actual}")]
    EnvTooSmall { min: f64, actual: f64 },
    #[error("at least one POI is required")]
    NoPois,
    #[error("at least one drone is required")]
    NoDrones,
    #[error("region_div must be positive")]
    NoRegions,
    #[error("`{0}` must be positive and finite")]
    NotPositive(&'static str),
    #[error("`{0}` must be finite and not negative")]
    Negative(&'static str),
}
