use crate::columns::normalize_key;
use crate::config::DataConfig;
use crate::error::{Result, StatisticalDataError};
use crate::geometry::{load_geometry, GeometryRecord};
use crate::stats::load_population_table;
use crate::types::{JoinedRecord, JoinedTable, StatisticalRecord};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Loads one municipality and left-joins its boundaries to its population
/// table on normalized town name. Every boundary row is kept, in file order;
/// rows without a matching town carry no statistics.
///
/// Nothing is cached: each call reads both files again.
pub fn load_municipality_data(config: &DataConfig, municipality_id: &str) -> Result<JoinedTable> {
    validate_id(municipality_id)?;
    info!("Loading data for municipality: {}", municipality_id);

    // 1. Population table
    let stats = load_population_table(&population_path(config, municipality_id))?;
    info!("Loaded population data for {} towns", stats.len());

    // 2. Boundaries
    let geometry = load_geometry(config, municipality_id)?;
    info!(
        "Loaded {} boundaries keyed on {:?}",
        geometry.records.len(),
        geometry.key_column
    );

    // 3. Join
    let records = join(municipality_id, geometry.records, stats);
    let matched = records.iter().filter(|r| r.stats.is_some()).count();
    info!(
        "Joined {}: {} of {} boundaries matched a town",
        municipality_id,
        matched,
        records.len()
    );

    Ok(JoinedTable {
        municipalities: vec![municipality_id.to_string()],
        crs: geometry.crs,
        records,
    })
}

pub fn population_path(config: &DataConfig, municipality_id: &str) -> PathBuf {
    config
        .municipality_dir(municipality_id)
        .join(format!("{}_population.csv", municipality_id))
}

/// Left join, geometry side preserved. When two population rows share a
/// town name the first one is used.
pub fn join(
    municipality: &str,
    geometry: Vec<GeometryRecord>,
    stats: Vec<StatisticalRecord>,
) -> Vec<JoinedRecord> {
    let mut by_town: HashMap<String, StatisticalRecord> = HashMap::with_capacity(stats.len());
    for record in stats {
        match by_town.entry(normalize_key(&record.town_name)) {
            Entry::Occupied(entry) => {
                warn!("{}: duplicate town {:?} in population table; keeping the first", municipality, entry.key());
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }
    }

    geometry
        .into_iter()
        .map(|record| {
            let name = record.name.as_deref().map(str::trim).unwrap_or("").to_string();
            let town_key = normalize_key(&name);
            let stats = if town_key.is_empty() {
                None
            } else {
                by_town.get(&town_key).cloned()
            };
            JoinedRecord {
                municipality: municipality.to_string(),
                town_key,
                name,
                geometry: record.geometry,
                stats,
            }
        })
        .collect()
}

/// Ids become directory and file names, so they must be one plain path
/// component.
fn validate_id(municipality_id: &str) -> Result<()> {
    let mut components = Path::new(municipality_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !municipality_id.contains(['/', '\\']) => Ok(()),
        _ => Err(StatisticalDataError::InvalidId(municipality_id.to_string()).into()),
    }
}
