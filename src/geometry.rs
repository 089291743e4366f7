use crate::config::DataConfig;
use crate::crs::{Crs, Reprojector};
use crate::dbf::{encoding_from_cpg, read_attribute_table};
use crate::error::{Error, Result};
use anyhow::{anyhow, bail, ensure, Context};
use geo::MultiPolygon;
use geojson::GeoJson;
use shapefile::{Shape, ShapeReader};
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Office suites leave `~$name` lock files next to the files they open.
pub const LOCK_PREFIX: &str = "~$";

const EXTENSIONS: &[&str] = &["shp", "geojson", "json"];

#[derive(Debug, Clone)]
pub struct GeometryRecord {
    /// `None` for null shapes and features without geometry.
    pub geometry: Option<MultiPolygon<f64>>,
    /// Raw value of the join-key column.
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeometryTable {
    pub path: PathBuf,
    /// CRS declared by the file before reprojection.
    pub source_crs: Crs,
    /// Always WGS 84 once loaded.
    pub crs: Crs,
    /// Attribute columns, lower-cased.
    pub columns: Vec<String>,
    pub key_column: String,
    pub records: Vec<GeometryRecord>,
}

struct RawGeometry {
    crs: Crs,
    columns: Vec<String>,
    rows: Vec<(Option<MultiPolygon<f64>>, Vec<Option<String>>)>,
}

/// Loads `<id>.<shp|geojson|json>` from the municipality's directory, in
/// WGS 84, with its join-key column resolved.
pub fn load_geometry(config: &DataConfig, municipality: &str) -> Result<GeometryTable> {
    let dir = config.municipality_dir(municipality);
    let path = locate_boundary_file(&dir, municipality)?;
    info!("Loading boundaries from {:?}", path);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let raw = match extension.as_str() {
        "shp" => read_shapefile(&path, config)?,
        _ => read_geojson(&path)?,
    };

    let columns: Vec<String> = raw.columns.iter().map(|c| c.to_lowercase()).collect();
    debug!("Boundary columns: {:?}", columns);
    let (key_idx, key_column) = detect_key_column(&columns, &config.join_key_candidates)
        .ok_or_else(|| Error::JoinKeyNotFound {
            path: path.clone(),
            candidates: config.join_key_candidates.clone(),
            available: columns.clone(),
        })?;

    let reprojector = if raw.crs == Crs::WGS84 {
        None
    } else {
        info!("Reprojecting {:?} from {} to {}", path, raw.crs, Crs::WGS84);
        Some(Reprojector::new(raw.crs, Crs::WGS84)?)
    };

    let mut records = Vec::with_capacity(raw.rows.len());
    for (geometry, mut values) in raw.rows {
        let geometry = match (geometry, &reprojector) {
            (Some(g), Some(r)) => Some(r.reproject(&g)?),
            (g, _) => g,
        };
        let name = values.get_mut(key_idx).and_then(Option::take);
        records.push(GeometryRecord { geometry, name });
    }

    Ok(GeometryTable {
        path,
        source_crs: raw.crs,
        crs: Crs::WGS84,
        columns,
        key_column,
        records,
    })
}

/// Finds the one boundary file for `municipality`, matching names
/// case-insensitively. Several matches are an error rather than a pick.
pub fn locate_boundary_file(dir: &Path, municipality: &str) -> Result<PathBuf> {
    let not_found = || Error::GeometryNotFound {
        municipality: municipality.to_string(),
        dir: dir.to_path_buf(),
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("Failed to list {:?}", dir))
                .into())
        }
    };

    let expected: Vec<String> = EXTENSIONS
        .iter()
        .map(|ext| format!("{}.{}", municipality, ext).to_lowercase())
        .collect();
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| !n.starts_with(LOCK_PREFIX) && expected.contains(&n.to_lowercase()))
                .unwrap_or(false)
        })
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(not_found()),
        1 => Ok(candidates.remove(0)),
        _ => Err(Error::AmbiguousGeometry {
            municipality: municipality.to_string(),
            candidates,
        }),
    }
}

/// First candidate present among `columns`, compared case-insensitively.
pub fn detect_key_column(columns: &[String], candidates: &[String]) -> Option<(usize, String)> {
    candidates.iter().find_map(|candidate| {
        let candidate = candidate.to_lowercase();
        columns
            .iter()
            .position(|c| c.to_lowercase() == candidate)
            .map(|idx| (idx, candidate))
    })
}

/// Same-stem file with another extension, e.g. the `.dbf` of a `.shp`.
fn sidecar(path: &Path, extension: &str) -> Option<PathBuf> {
    let stem = path.file_stem()?.to_str()?.to_lowercase();
    let mut found: Vec<PathBuf> = fs::read_dir(path.parent()?)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            let same_stem = p
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_lowercase() == stem)
                .unwrap_or(false);
            let same_ext = p
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(extension))
                .unwrap_or(false);
            same_stem && same_ext
        })
        .collect();
    found.sort();
    found.into_iter().next()
}

fn read_shapefile(path: &Path, config: &DataConfig) -> anyhow::Result<RawGeometry> {
    let shapes = ShapeReader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?
        .read()
        .with_context(|| format!("Failed to read shapes from {:?}", path))?;

    let dbf_path = sidecar(path, "dbf").ok_or_else(|| anyhow!("Shapefile {:?} has no .dbf", path))?;
    let (mut primary, fallback) = config.encodings()?;
    if let Some(cpg) = sidecar(path, "cpg") {
        match fs::read_to_string(&cpg).ok().as_deref().and_then(encoding_from_cpg) {
            Some(encoding) => primary = encoding,
            None => warn!("Ignoring unreadable code page file {:?}", cpg),
        }
    }
    let table = read_attribute_table(&dbf_path, primary, fallback)?;
    info!("Read {} attribute rows from {:?} as {}", table.rows.len(), dbf_path, table.encoding.name());
    ensure!(
        shapes.len() == table.rows.len(),
        "{:?} has {} shapes but {:?} has {} records",
        path,
        shapes.len(),
        dbf_path,
        table.rows.len()
    );

    let crs = match sidecar(path, "prj") {
        Some(prj) => {
            let bytes = fs::read(&prj).with_context(|| format!("Failed to read {:?}", prj))?;
            let wkt = String::from_utf8_lossy(&bytes);
            Crs::from_wkt(&wkt)
                .ok_or_else(|| anyhow!("Unrecognized coordinate reference system in {:?}: {}", prj, wkt))?
        }
        None => {
            warn!("{:?} has no .prj; assuming {}", path, Crs::WGS84);
            Crs::WGS84
        }
    };

    let mut rows = Vec::with_capacity(shapes.len());
    for (shape, values) in shapes.into_iter().zip(table.rows) {
        rows.push((shape_to_multipolygon(shape)?, values));
    }

    Ok(RawGeometry {
        crs,
        columns: table.columns,
        rows,
    })
}

fn shape_to_multipolygon(shape: Shape) -> anyhow::Result<Option<MultiPolygon<f64>>> {
    let geometry = match shape {
        Shape::NullShape => return Ok(None),
        Shape::Polygon(polygon) => {
            let geo_polygon: MultiPolygon<f64> = polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?;
            geo_polygon
        }
        Shape::PolygonM(polygon) => {
            let geo_polygon: MultiPolygon<f64> = polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?;
            geo_polygon
        }
        Shape::PolygonZ(polygon) => {
            let geo_polygon: MultiPolygon<f64> = polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?;
            geo_polygon
        }
        other => bail!("Unsupported shape type {:?}; boundaries must be polygons", other.shapetype()),
    };
    Ok(Some(geometry))
}

fn read_geojson(path: &Path) -> anyhow::Result<RawGeometry> {
    let file = File::open(path).with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => bail!("GeoJSON must be a FeatureCollection"),
    };
    let crs = declared_crs(collection.foreign_members.as_ref())?;

    let mut columns: Vec<String> = Vec::new();
    for props in collection.features.iter().filter_map(|f| f.properties.as_ref()) {
        for key in props.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut rows = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let geometry = match feature.geometry {
            Some(geom) => {
                let geometry: geo::Geometry<f64> = geom
                    .value
                    .try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
                match geometry {
                    geo::Geometry::MultiPolygon(mp) => Some(mp),
                    geo::Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
                    _ => bail!("Boundary features must be polygons"),
                }
            }
            None => None,
        };
        let values: Vec<Option<String>> = columns
            .iter()
            .map(|c| {
                feature
                    .properties
                    .as_ref()
                    .and_then(|props| props.get(c))
                    .and_then(property_text)
            })
            .collect();
        rows.push((geometry, values));
    }

    Ok(RawGeometry { crs, columns, rows })
}

/// Legacy `"crs": {"type": "name", "properties": {"name": ...}}` member.
/// RFC 7946 files have none and are WGS 84.
fn declared_crs(foreign_members: Option<&geojson::JsonObject>) -> anyhow::Result<Crs> {
    let Some(crs) = foreign_members.and_then(|m| m.get("crs")) else {
        return Ok(Crs::WGS84);
    };
    let name = crs
        .pointer("/properties/name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| anyhow!("Unsupported GeoJSON crs member: {}", crs))?;
    Crs::from_name(name).ok_or_else(|| anyhow!("Unrecognized GeoJSON crs {:?}", name))
}

fn property_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn key_column_follows_candidate_order() {
        let candidates = strings(&["s_name", "moji", "name", "町名", "town_name"]);
        let columns = strings(&["key_code", "name", "moji"]);
        assert_eq!(detect_key_column(&columns, &candidates), Some((2, "moji".to_string())));

        let columns = strings(&["町名", "area"]);
        assert_eq!(detect_key_column(&columns, &candidates), Some((0, "町名".to_string())));

        assert_eq!(detect_key_column(&strings(&["area"]), &candidates), None);
    }

    #[test]
    fn locates_file_case_insensitively_and_skips_lock_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Daitou.SHP"), b"").unwrap();
        fs::write(dir.path().join("~$daitou.shp"), b"").unwrap();
        fs::write(dir.path().join("daitou.dbf"), b"").unwrap();
        fs::write(dir.path().join("daitou_population.csv"), b"").unwrap();

        let path = locate_boundary_file(dir.path(), "daitou").unwrap();
        assert_eq!(path.file_name().unwrap(), "Daitou.SHP");
    }

    #[test]
    fn missing_and_ambiguous_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            locate_boundary_file(dir.path(), "daitou"),
            Err(Error::GeometryNotFound { .. })
        ));
        assert!(matches!(
            locate_boundary_file(&dir.path().join("nowhere"), "daitou"),
            Err(Error::GeometryNotFound { .. })
        ));

        fs::write(dir.path().join("daitou.shp"), b"").unwrap();
        fs::write(dir.path().join("daitou.geojson"), b"").unwrap();
        match locate_boundary_file(dir.path(), "daitou") {
            Err(Error::AmbiguousGeometry { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn sidecar_matches_stem_and_extension_case_insensitively() {
        let dir = tempdir().unwrap();
        let shp = dir.path().join("daitou.shp");
        fs::write(&shp, b"").unwrap();
        fs::write(dir.path().join("DAITOU.PRJ"), b"").unwrap();
        assert_eq!(sidecar(&shp, "prj"), Some(dir.path().join("DAITOU.PRJ")));
        assert_eq!(sidecar(&shp, "cpg"), None);
    }

    /// Polygon shapefile of axis-aligned squares, outer rings clockwise.
    fn write_squares_shp(path: &Path, squares: &[(f64, f64, f64)]) {
        const CONTENT_LEN: usize = 4 + 32 + 4 + 4 + 4 + 5 * 16;
        let mut records = Vec::new();
        let (mut xmin, mut ymin, mut xmax, mut ymax) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for (i, &(x, y, size)) in squares.iter().enumerate() {
            xmin = xmin.min(x);
            ymin = ymin.min(y);
            xmax = xmax.max(x + size);
            ymax = ymax.max(y + size);
            records.extend_from_slice(&(i as i32 + 1).to_be_bytes());
            records.extend_from_slice(&((CONTENT_LEN / 2) as i32).to_be_bytes());
            records.extend_from_slice(&5i32.to_le_bytes());
            for v in [x, y, x + size, y + size] {
                records.extend_from_slice(&v.to_le_bytes());
            }
            records.extend_from_slice(&1i32.to_le_bytes());
            records.extend_from_slice(&5i32.to_le_bytes());
            records.extend_from_slice(&0i32.to_le_bytes());
            let ring = [(x, y), (x, y + size), (x + size, y + size), (x + size, y), (x, y)];
            for (px, py) in ring {
                records.extend_from_slice(&px.to_le_bytes());
                records.extend_from_slice(&py.to_le_bytes());
            }
        }

        let mut out = Vec::new();
        out.extend_from_slice(&9994i32.to_be_bytes());
        out.extend_from_slice(&[0u8; 20]);
        out.extend_from_slice(&(((100 + records.len()) / 2) as i32).to_be_bytes());
        out.extend_from_slice(&1000i32.to_le_bytes());
        out.extend_from_slice(&5i32.to_le_bytes());
        for v in [xmin, ymin, xmax, ymax, 0.0, 0.0, 0.0, 0.0] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&records);
        fs::write(path, out).unwrap();
    }

    #[test]
    fn shift_jis_shapefile_in_plane_coordinates() {
        let root = tempdir().unwrap();
        let dir = root.path().join("daitou");
        fs::create_dir(&dir).unwrap();

        write_squares_shp(
            &dir.join("daitou.shp"),
            &[(-40_000.0, -150_000.0, 500.0), (-39_000.0, -150_000.0, 500.0)],
        );
        let (column, _, _) = encoding_rs::SHIFT_JIS.encode("町名");
        let (hojo, _, _) = encoding_rs::SHIFT_JIS.encode("北条");
        let (nozaki, _, _) = encoding_rs::SHIFT_JIS.encode("野崎");
        fs::write(
            dir.join("daitou.dbf"),
            crate::dbf::build_dbf(&[(&column[..], 20)], &[vec![&hojo[..]], vec![&nozaki[..]]]),
        )
        .unwrap();
        fs::write(
            dir.join("daitou.prj"),
            r#"PROJCS["JGD2011 / Japan Plane Rectangular CS VI",GEOGCS["JGD2011"],AUTHORITY["EPSG","6674"]]"#,
        )
        .unwrap();

        let table = load_geometry(&DataConfig::new(root.path()), "daitou").unwrap();
        assert_eq!(table.source_crs, Crs::epsg(6674));
        assert_eq!(table.crs, Crs::WGS84);
        assert_eq!(table.key_column, "町名");
        let names: Vec<_> = table.records.iter().map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec![Some("北条"), Some("野崎")]);

        use geo::BoundingRect;
        let rect = table.records[0].geometry.as_ref().unwrap().bounding_rect().unwrap();
        assert!(rect.min().x > 135.0 && rect.max().x < 136.0, "{rect:?}");
        assert!(rect.min().y > 34.0 && rect.max().y < 36.0, "{rect:?}");
    }

    #[test]
    fn code_page_file_sets_the_primary_encoding() {
        let root = tempdir().unwrap();
        let dir = root.path().join("daitou");
        fs::create_dir(&dir).unwrap();

        write_squares_shp(&dir.join("daitou.shp"), &[(135.6, 34.7, 0.01)]);
        let (column, _, _) = encoding_rs::SHIFT_JIS.encode("町名");
        let (town, _, _) = encoding_rs::SHIFT_JIS.encode("住道町");
        fs::write(
            dir.join("daitou.dbf"),
            crate::dbf::build_dbf(&[(&column[..], 20)], &[vec![&town[..]]]),
        )
        .unwrap();
        fs::write(dir.join("daitou.cpg"), "932\n").unwrap();

        // Without the .cpg this table would be decoded as EUC-JP
        let mut config = DataConfig::new(root.path());
        config.fallback_encoding = "euc-jp".to_string();
        let table = load_geometry(&config, "daitou").unwrap();
        assert_eq!(table.key_column, "町名");
        assert_eq!(table.records[0].name.as_deref(), Some("住道町"));
        assert_eq!(table.source_crs, Crs::WGS84);

        fs::remove_file(dir.join("daitou.cpg")).unwrap();
        let garbled = load_geometry(&config, "daitou");
        assert!(
            !matches!(&garbled, Ok(t) if t.records[0].name.as_deref() == Some("住道町")),
            "{garbled:?}"
        );
    }

    #[test]
    fn boundary_file_without_name_column() {
        let root = tempdir().unwrap();
        let dir = root.path().join("daitou");
        fs::create_dir(&dir).unwrap();
        fs::write(
            dir.join("daitou.geojson"),
            r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{"code":1},"geometry":null}]}"#,
        )
        .unwrap();

        match load_geometry(&DataConfig::new(root.path()), "daitou") {
            Err(Error::JoinKeyNotFound { available, .. }) => assert_eq!(available, vec!["code"]),
            other => panic!("expected missing join key, got {other:?}"),
        }
    }

    #[test]
    fn geojson_crs_member() {
        let members: geojson::JsonObject = serde_json::from_str(
            r#"{"crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::6674"}}}"#,
        )
        .unwrap();
        assert_eq!(declared_crs(Some(&members)).unwrap(), Crs::epsg(6674));
        assert_eq!(declared_crs(None).unwrap(), Crs::WGS84);
    }
}
