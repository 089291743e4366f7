pub mod aggregate;
pub mod catalog;
pub mod columns;
pub mod config;
pub mod crs;
pub mod data;
pub mod dbf;
pub mod error;
pub mod geometry;
pub mod server;
pub mod stats;
pub mod types;
pub mod view;

pub use data::load_municipality_data;
pub use error::{Error, MissingColumnError, Result, StatisticalDataError};
pub use types::{Field, JoinedRecord, JoinedTable, StatisticalRecord};
