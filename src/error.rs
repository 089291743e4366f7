use crate::types::Field;
use std::path::PathBuf;

/// Errors raised while loading one municipality. Nothing in the loader
/// recovers from these; `view` is the only place that swallows them.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Statistical data error: {0}")]
    StatisticalData(#[from] StatisticalDataError),

    #[error("No boundary file named {municipality}.(shp|geojson|json) in {dir:?}")]
    GeometryNotFound { municipality: String, dir: PathBuf },

    #[error("Several boundary files match {municipality}: {candidates:?}")]
    AmbiguousGeometry {
        municipality: String,
        candidates: Vec<PathBuf>,
    },

    #[error("No join column ({candidates:?}) in {path:?}; available columns: {available:?}")]
    JoinKeyNotFound {
        path: PathBuf,
        candidates: Vec<String>,
        available: Vec<String>,
    },

    #[error(transparent)]
    MissingColumn(#[from] MissingColumnError),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum StatisticalDataError {
    #[error("invalid municipality id {0:?}")]
    InvalidId(String),

    #[error("population file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no town_name column in {path:?} after normalization; columns: {columns:?}")]
    MissingTownName { path: PathBuf, columns: Vec<String> },

    #[error("row {row} ends before column {column:?}")]
    TruncatedRow { row: usize, column: String },

    #[error("row {row}: {field} does not fit in a 64-bit count")]
    Overflow { row: usize, field: Field },

    #[error("row {row}, column {column:?}: {value:?} is not a population count")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
}

/// An aggregate references a base column the input file does not have.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("column {column:?} required by {field} is missing from the population table")]
pub struct MissingColumnError {
    pub field: Field,
    pub column: String,
}

pub type Result<T> = std::result::Result<T, Error>;
