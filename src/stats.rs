use crate::aggregate::{parse_count, AggregatePlan};
use crate::columns::{canonical_column, normalize_key, TOWN_NAME};
use crate::error::{Error, Result, StatisticalDataError};
use crate::types::{Field, StatisticalRecord};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

const TOTALS: &[Field] = &[Field::PopulationTotal, Field::MaleTotal, Field::FemaleTotal];

/// Reads `<id>_population.csv`, normalizes its headers and computes every
/// aggregate. Rows with an empty town name are skipped.
pub fn load_population_table(path: &Path) -> Result<Vec<StatisticalRecord>> {
    let file = File::open(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => StatisticalDataError::NotFound(path.to_path_buf()),
        _ => StatisticalDataError::Io {
            path: path.to_path_buf(),
            source,
        },
    })?;
    let csv_error = |source: csv::Error| StatisticalDataError::Csv {
        path: path.to_path_buf(),
        source,
    };

    // Rows shorter or longer than the header are rejected by the reader
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let raw_headers = rdr.headers().map_err(csv_error)?.clone();
    debug!("Population columns before normalization: {:?}", raw_headers);

    // First occurrence wins when two raw headers normalize to the same name
    let mut columns: HashMap<String, usize> = HashMap::new();
    let mut names = Vec::with_capacity(raw_headers.len());
    for (idx, raw) in raw_headers.iter().enumerate() {
        let name = canonical_column(raw);
        columns.entry(name.clone()).or_insert(idx);
        names.push(name);
    }
    debug!("Population columns after normalization: {:?}", names);

    let town_idx = *columns
        .get(TOWN_NAME)
        .ok_or_else(|| StatisticalDataError::MissingTownName {
            path: path.to_path_buf(),
            columns: names.clone(),
        })?;

    let plan = AggregatePlan::resolve(&columns).map_err(Error::MissingColumn)?;
    let totals: Vec<(Field, usize)> = TOTALS
        .iter()
        .filter_map(|field| columns.get(field.as_str()).map(|idx| (*field, *idx)))
        .collect();
    if totals.len() < TOTALS.len() {
        warn!("{:?} lacks some total columns; only {:?} will be set", path, totals);
    }

    let mut records = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let row = i + 1;
        let record = result.map_err(csv_error)?;
        let town = normalize_key(record.get(town_idx).unwrap_or(""));
        if town.is_empty() {
            continue;
        }

        let mut stats = StatisticalRecord::new(town);
        for (field, idx) in &totals {
            let cell = record.get(*idx).ok_or_else(|| StatisticalDataError::TruncatedRow {
                row,
                column: field.as_str().to_string(),
            })?;
            stats.set(*field, parse_count(cell, row, field.as_str())?);
        }
        for (field, value) in plan.apply(&record, row)? {
            stats.set(field, value);
        }
        records.push(stats);
    }

    Ok(records)
}
