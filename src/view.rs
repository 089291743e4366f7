//! What the map and bar chart consume. Loader errors stop here: every
//! function in this module logs them and hands back empty output.

use crate::catalog::{self, Variable};
use crate::config::AppConfig;
use crate::crs::Crs;
use crate::data::load_municipality_data;
use crate::error::Result;
use crate::types::{Field, JoinedRecord, JoinedTable, StatisticalRecord};
use geo::{BoundingRect, Centroid, Contains, Point};
use geojson::{Feature, FeatureCollection, JsonObject};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Bars of the age chart. 75+ is left out, as it spans an open range.
pub const AGE_BANDS: &[(Field, &str)] = &[
    (Field::Age0To4, "0-4"),
    (Field::Age5To9, "5-9"),
    (Field::Age10To14, "10-14"),
    (Field::Age15To19, "15-19"),
    (Field::Age20To24, "20-24"),
    (Field::Age25To29, "25-29"),
    (Field::Age30To34, "30-34"),
    (Field::Age35To39, "35-39"),
    (Field::Age40To44, "40-44"),
    (Field::Age45To49, "45-49"),
    (Field::Age50To54, "50-54"),
    (Field::Age55To59, "55-59"),
    (Field::Age60To64, "60-64"),
    (Field::Age65To69, "65-69"),
    (Field::Age70To74, "70-74"),
];

#[derive(Debug, Serialize)]
pub struct MapView {
    pub city: String,
    pub variable: Option<Field>,
    pub label: Option<&'static str>,
    /// `[lon, lat]`, mean of the boundary centroids.
    pub center: Option<[f64; 2]>,
    pub crs: Crs,
    pub features: FeatureCollection,
}

impl MapView {
    pub fn empty(city: &str) -> Self {
        Self {
            city: city.to_string(),
            variable: None,
            label: None,
            center: None,
            crs: Crs::WGS84,
            features: feature_collection(Vec::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.features.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgeBar {
    pub label: &'static str,
    pub population: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgeBreakdown {
    pub town: String,
    pub municipality: String,
    pub title: String,
    pub bars: Vec<AgeBar>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TownHit {
    pub town: String,
    pub municipality: String,
    pub stats: Option<StatisticalRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct City {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Options {
    pub cities: Vec<City>,
    pub variables: &'static [Variable],
    pub default_city: Option<String>,
    pub default_variable: String,
}

pub fn options(config: &AppConfig) -> Options {
    Options {
        cities: config
            .municipalities
            .iter()
            .map(|m| City {
                id: m.id.clone(),
                label: m.label.clone(),
            })
            .collect(),
        variables: catalog::variables(),
        default_city: config.presentation.default_city.clone(),
        default_variable: config.presentation.default_variable.clone(),
    }
}

/// Municipalities behind a city selection: the members of a configured
/// combined view, otherwise the id itself.
pub fn resolve_members(config: &AppConfig, city: &str) -> Vec<String> {
    match config.view(city) {
        Some(view) if !view.members.is_empty() => view.members.clone(),
        _ => vec![city.to_string()],
    }
}

/// Loads every member of `city` and concatenates them in member order.
pub fn load_view(config: &AppConfig, city: &str) -> Result<JoinedTable> {
    let tables = resolve_members(config, city)
        .iter()
        .map(|id| load_municipality_data(&config.data, id))
        .collect::<Result<Vec<_>>>()?;
    Ok(JoinedTable::concat(tables))
}

pub fn choropleth(config: &AppConfig, city: &str, variable: &str) -> MapView {
    debug!("Map requested for city {:?}, variable {:?}", city, variable);
    if city.is_empty() || variable.is_empty() {
        info!("City or variable not selected. Returning empty map.");
        return MapView::empty(city);
    }
    let field = match variable.parse::<Field>() {
        Ok(field) => field,
        Err(e) => {
            error!("{}", e);
            return MapView::empty(city);
        }
    };

    match load_view(config, city) {
        Ok(table) => map_view(city, field, &table),
        Err(e) => {
            error!("Failed to load {}: {}", city, e);
            MapView::empty(city)
        }
    }
}

pub fn map_view(city: &str, field: Field, table: &JoinedTable) -> MapView {
    if table.records.iter().all(|r| r.geometry.is_none()) {
        error!("{}: geometry data is missing", city);
        return MapView::empty(city);
    }
    let label = catalog::label_for(field).unwrap_or(field.as_str());

    let features = table
        .records
        .iter()
        .map(|record| {
            let mut properties = base_properties(record);
            properties.insert("value".into(), record.value(field).into());
            properties.insert("label".into(), label.into());
            feature(record, properties)
        })
        .collect();

    MapView {
        city: city.to_string(),
        variable: Some(field),
        label: Some(label),
        center: center(table),
        crs: table.crs,
        features: feature_collection(features),
    }
}

/// Whole table as GeoJSON, every statistic as a property.
pub fn to_feature_collection(table: &JoinedTable) -> FeatureCollection {
    let features = table
        .records
        .iter()
        .map(|record| {
            let mut properties = base_properties(record);
            if let Some(stats) = &record.stats {
                for (field, value) in stats.values() {
                    properties.insert(field.as_str().into(), value.into());
                }
            }
            feature(record, properties)
        })
        .collect();
    feature_collection(features)
}

/// Age chart bars for one joined row. A value that is absent, because the
/// town had no population row, is drawn as zero.
pub fn age_bars(record: &JoinedRecord) -> Vec<AgeBar> {
    AGE_BANDS
        .iter()
        .map(|(field, label)| AgeBar {
            label: *label,
            population: record.value(*field).unwrap_or(0),
        })
        .collect()
}

pub fn age_breakdown(config: &AppConfig, city: &str, town: &str) -> Option<AgeBreakdown> {
    if city.is_empty() || town.is_empty() {
        info!("Insufficient data for bar chart.");
        return None;
    }
    let table = match load_view(config, city) {
        Ok(table) => table,
        Err(e) => {
            error!("Failed to load {} for bar chart: {}", city, e);
            return None;
        }
    };
    let Some(record) = table.find_town(town) else {
        warn!("No data found for town: {}", town);
        return None;
    };
    info!("Bar chart for town: {}", record.name);
    Some(AgeBreakdown {
        town: record.name.clone(),
        municipality: record.municipality.clone(),
        title: format!("{}の年齢層別人口", record.name),
        bars: age_bars(record),
    })
}

struct TownEnvelope {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for TownEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// The row whose boundary contains `(lon, lat)`.
pub fn town_at(table: &JoinedTable, lon: f64, lat: f64) -> Option<&JoinedRecord> {
    let items: Vec<TownEnvelope> = table
        .records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let rect = record.geometry.as_ref()?.bounding_rect()?;
            Some(TownEnvelope {
                index,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            })
        })
        .collect();
    let tree = RTree::bulk_load(items);
    let point = Point::new(lon, lat);

    let hit = tree
        .locate_in_envelope_intersecting(&AABB::from_point([lon, lat]))
        .map(|candidate| &table.records[candidate.index])
        .find(|record| {
            record
                .geometry
                .as_ref()
                .map(|g| g.contains(&point))
                .unwrap_or(false)
        });
    hit
}

pub fn query_town(config: &AppConfig, city: &str, lon: f64, lat: f64) -> Option<TownHit> {
    let table = match load_view(config, city) {
        Ok(table) => table,
        Err(e) => {
            error!("Failed to load {} for point query: {}", city, e);
            return None;
        }
    };
    town_at(&table, lon, lat).map(|record| TownHit {
        town: record.name.clone(),
        municipality: record.municipality.clone(),
        stats: record.stats.clone(),
    })
}

fn base_properties(record: &JoinedRecord) -> JsonObject {
    let mut properties = JsonObject::new();
    properties.insert("town_name".into(), Value::from(record.name.clone()));
    properties.insert("town_key".into(), Value::from(record.town_key.clone()));
    properties.insert("municipality".into(), Value::from(record.municipality.clone()));
    properties
}

fn feature(record: &JoinedRecord, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: record
            .geometry
            .as_ref()
            .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn feature_collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn center(table: &JoinedTable) -> Option<[f64; 2]> {
    let centroids: Vec<Point<f64>> = table
        .records
        .iter()
        .filter_map(|r| r.geometry.as_ref()?.centroid())
        .collect();
    if centroids.is_empty() {
        return None;
    }
    let n = centroids.len() as f64;
    let (x, y) = centroids
        .iter()
        .fold((0.0, 0.0), |(x, y), p| (x + p.x(), y + p.y()));
    Some([x / n, y / n])
}
