use popmap::config::{AppConfig, DataConfig};
use popmap::crs::Crs;
use popmap::{load_municipality_data, view, Error, Field, StatisticalDataError};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const BANDS: &[&str] = &[
    "０～４", "５～９", "１０～１４", "１５～１９", "２０～２４", "２５～２９", "３０～３４",
    "３５～３９", "４０～４４", "４５～４９", "５０～５４", "５５～５９", "６０～６４",
    "６５～６９", "７０～７４",
];

/// Census-style headers: `歳` suffixes, a line break in the male/female
/// headers and `NAME` for the town column. Band `i` of a town holds
/// `base + i`; `skip` drops one header entirely.
fn write_population(root: &Path, id: &str, towns: &[(&str, u64)], skip: Option<&str>) {
    let mut headers = vec!["NAME".to_string(), "人口総数".into(), "男性総数".into(), "女性総数".into()];
    for prefix in ["", "男\n", "女\n"] {
        for band in BANDS {
            headers.push(format!("{prefix}{band}歳"));
        }
        headers.push(format!("{prefix}７５歳以上"));
    }
    let keep: Vec<bool> = headers.iter().map(|h| Some(h.as_str()) != skip).collect();

    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    let mut writer = csv::Writer::from_path(dir.join(format!("{id}_population.csv"))).unwrap();
    writer
        .write_record(headers.iter().zip(&keep).filter(|(_, k)| **k).map(|(h, _)| h))
        .unwrap();
    for (town, base) in towns {
        let mut row = vec![town.to_string(), "100".into(), "48".into(), "52".into()];
        for _ in 0..3 {
            for i in 0..=BANDS.len() as u64 {
                row.push((base + i).to_string());
            }
        }
        writer
            .write_record(row.iter().zip(&keep).filter(|(_, k)| **k).map(|(v, _)| v))
            .unwrap();
    }
    writer.flush().unwrap();
}

/// One unit square per town, side by side along x starting at `x0`.
fn write_boundaries(root: &Path, id: &str, key: &str, towns: &[&str], x0: f64, crs: Option<&str>) {
    let features: Vec<serde_json::Value> = towns
        .iter()
        .enumerate()
        .map(|(i, town)| {
            let x = x0 + i as f64;
            serde_json::json!({
                "type": "Feature",
                "properties": { key: town, "code": i },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[x, 0.0], [x + 1.0, 0.0], [x + 1.0, 1.0], [x, 1.0], [x, 0.0]]]
                }
            })
        })
        .collect();
    let mut collection = serde_json::json!({ "type": "FeatureCollection", "features": features });
    if let Some(name) = crs {
        collection["crs"] = serde_json::json!({ "type": "name", "properties": { "name": name } });
    }
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(format!("{id}.geojson")), collection.to_string()).unwrap();
}

fn app_config(root: &TempDir) -> AppConfig {
    let toml = format!(
        r#"
[data]
root = {:?}

[[municipalities]]
id = "higashiosaka"
label = "東大阪市"

[[municipalities]]
id = "daitou"
label = "大東市"

[[municipalities]]
id = "both"
label = "東大阪市・大東市"
members = ["higashiosaka", "daitou"]
"#,
        root.path()
    );
    let path = root.path().join("config.toml");
    fs::write(&path, toml).unwrap();
    AppConfig::load_from_file(&path).unwrap()
}

#[test]
fn left_join_keeps_every_boundary() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "S_NAME", &["X", "Y", "Z"], 0.0, None);
    write_population(root.path(), "daitou", &[(" x ", 10), ("w", 20)], None);

    let table = load_municipality_data(&DataConfig::new(root.path()), "daitou").unwrap();
    assert_eq!(table.len(), 3);
    assert_eq!(table.matched(), 1);
    assert_eq!(table.crs, Crs::WGS84);

    let names: Vec<_> = table.records.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["X", "Y", "Z"]);
    let x = &table.records[0];
    assert_eq!(x.value(Field::PopulationTotal), Some(100));
    // bands 20-24..35-39 are indices 4..=7
    assert_eq!(x.value(Field::Age20To39), Some(10 + 4 + 10 + 5 + 10 + 6 + 10 + 7));
    assert_eq!(x.value(Field::MaleAgeOver75), Some(10 + 15));
    assert!(table.records[1].stats.is_none());
    assert!(table.records[2].stats.is_none());
}

#[test]
fn missing_population_file() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "S_NAME", &["X"], 0.0, None);

    match load_municipality_data(&DataConfig::new(root.path()), "daitou") {
        Err(Error::StatisticalData(StatisticalDataError::NotFound(path))) => {
            assert!(path.ends_with("daitou/daitou_population.csv"), "{path:?}");
        }
        other => panic!("expected missing population file, got {other:?}"),
    }
}

#[test]
fn missing_boundary_file() {
    let root = tempdir().unwrap();
    write_population(root.path(), "daitou", &[("x", 1)], None);
    fs::write(root.path().join("daitou").join("~$daitou.shp"), b"lock").unwrap();

    match load_municipality_data(&DataConfig::new(root.path()), "daitou") {
        Err(Error::GeometryNotFound { municipality, .. }) => assert_eq!(municipality, "daitou"),
        other => panic!("expected missing boundary file, got {other:?}"),
    }
}

#[test]
fn missing_base_column() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "S_NAME", &["X"], 0.0, None);
    write_population(root.path(), "daitou", &[("x", 1)], Some("女\n２５～２９歳"));

    match load_municipality_data(&DataConfig::new(root.path()), "daitou") {
        Err(Error::MissingColumn(e)) => assert_eq!(e.column, "女２５～２９"),
        other => panic!("expected missing column, got {other:?}"),
    }
}

#[test]
fn missing_town_column() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "S_NAME", &["X"], 0.0, None);
    write_population(root.path(), "daitou", &[("x", 1)], Some("NAME"));

    let err = load_municipality_data(&DataConfig::new(root.path()), "daitou").unwrap_err();
    assert!(
        matches!(err, Error::StatisticalData(StatisticalDataError::MissingTownName { .. })),
        "{err:?}"
    );
}

#[test]
fn boundary_without_join_key() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "KEY_CODE", &["X"], 0.0, None);
    write_population(root.path(), "daitou", &[("x", 1)], None);

    match load_municipality_data(&DataConfig::new(root.path()), "daitou") {
        Err(Error::JoinKeyNotFound { available, .. }) => {
            assert!(available.contains(&"key_code".to_string()), "{available:?}");
        }
        other => panic!("expected missing join key, got {other:?}"),
    }
}

#[test]
fn projected_boundaries_come_back_in_wgs84() {
    let root = tempdir().unwrap();
    // Metres in JGD2011 plane rectangular zone VI, around the zone origin
    write_boundaries(
        root.path(),
        "daitou",
        "S_NAME",
        &["X"],
        0.0,
        Some("urn:ogc:def:crs:EPSG::6674"),
    );
    write_population(root.path(), "daitou", &[("x", 1)], None);

    let table = load_municipality_data(&DataConfig::new(root.path()), "daitou").unwrap();
    assert_eq!(table.crs, Crs::WGS84);

    use geo::BoundingRect;
    let rect = table.records[0].geometry.as_ref().unwrap().bounding_rect().unwrap();
    assert!((rect.min().x - 136.0).abs() < 1e-3, "{rect:?}");
    assert!((rect.min().y - 36.0).abs() < 1e-3, "{rect:?}");
}

#[test]
fn combined_view_concatenates_members_in_order() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "higashiosaka", "S_NAME", &["A", "B"], 0.0, None);
    write_population(root.path(), "higashiosaka", &[("a", 1), ("b", 2)], None);
    write_boundaries(root.path(), "daitou", "MOJI", &["C"], 2.0, None);
    write_population(root.path(), "daitou", &[("c", 3)], None);
    let config = app_config(&root);

    let table = view::load_view(&config, "both").unwrap();
    let rows: Vec<_> = table
        .records
        .iter()
        .map(|r| (r.municipality.as_str(), r.name.as_str()))
        .collect();
    assert_eq!(rows, vec![("higashiosaka", "A"), ("higashiosaka", "B"), ("daitou", "C")]);
    assert_eq!(table.municipalities, vec!["higashiosaka", "daitou"]);

    let map = view::choropleth(&config, "both", "age_20_39");
    assert_eq!(map.features.features.len(), 3);

    let hit = view::query_town(&config, "both", 2.5, 0.5).unwrap();
    assert_eq!(hit.town, "C");
    assert_eq!(hit.municipality, "daitou");
}

#[test]
fn presentation_absorbs_load_failures() {
    let root = tempdir().unwrap();
    let config = app_config(&root);

    let map = view::choropleth(&config, "daitou", "age_20_39");
    assert!(map.is_empty());
    assert!(view::age_breakdown(&config, "daitou", "x").is_none());
    assert!(view::query_town(&config, "daitou", 0.5, 0.5).is_none());
}

#[test]
fn age_chart_for_unmatched_town_is_all_zero() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "S_NAME", &["X", "Y"], 0.0, None);
    write_population(root.path(), "daitou", &[("x", 10)], None);
    let config = app_config(&root);

    let matched = view::age_breakdown(&config, "daitou", "X").unwrap();
    assert_eq!(matched.bars.len(), 15);
    assert_eq!(matched.bars[0].population, 10);

    let unmatched = view::age_breakdown(&config, "daitou", "y").unwrap();
    assert_eq!(unmatched.title, "Yの年齢層別人口");
    assert!(unmatched.bars.iter().all(|bar| bar.population == 0));
}

#[test]
fn truncated_population_row_is_an_error() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "S_NAME", &["X"], 0.0, None);
    write_population(root.path(), "daitou", &[("x", 10)], None);
    let path = root.path().join("daitou").join("daitou_population.csv");
    let mut content = fs::read_to_string(&path).unwrap();
    content.push_str("y,1,2,3,4,5,6,7,8,9\n");
    fs::write(&path, content).unwrap();

    let err = load_municipality_data(&DataConfig::new(root.path()), "daitou").unwrap_err();
    assert!(
        matches!(err, Error::StatisticalData(StatisticalDataError::Csv { .. })),
        "{err:?}"
    );
}

#[test]
fn oversized_counts_are_an_error() {
    let root = tempdir().unwrap();
    write_boundaries(root.path(), "daitou", "S_NAME", &["X"], 0.0, None);
    write_population(root.path(), "daitou", &[("x", u64::MAX - 20)], None);

    let err = load_municipality_data(&DataConfig::new(root.path()), "daitou").unwrap_err();
    assert!(
        matches!(err, Error::StatisticalData(StatisticalDataError::Overflow { .. })),
        "{err:?}"
    );
}
