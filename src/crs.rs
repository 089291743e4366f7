//! Coordinate reference systems found in municipal boundary files, and
//! reprojection of their geometries to WGS 84.
//!
//! Only the systems these files actually use are recognized: WGS 84, the
//! Japanese geodetic datums (JGD2000, JGD2011 and the old Tokyo datum) in
//! geographic form and on the nineteen plane rectangular zones, UTM on WGS 84
//! and JGD2011, and Web Mercator.

use anyhow::{anyhow, Context, Result};
use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::proj::Proj;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Datum {
    Wgs84,
    Jgd2000,
    Jgd2011,
    Tokyo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Geographic(Datum),
    PlaneRectangular(Datum, u32),
    Utm(Datum, u32),
    WebMercator,
}

/// Origin (lat_0, lon_0) of Japan Plane Rectangular CS zones I to XIX.
const PLANE_ORIGINS: [(f64, f64); 19] = [
    (33.0, 129.5),
    (33.0, 131.0),
    (36.0, 132.166_666_666_666_7),
    (33.0, 133.5),
    (36.0, 134.333_333_333_333_3),
    (36.0, 136.0),
    (36.0, 137.166_666_666_666_7),
    (36.0, 138.5),
    (36.0, 139.833_333_333_333_3),
    (40.0, 140.833_333_333_333_3),
    (44.0, 140.25),
    (44.0, 142.25),
    (44.0, 144.25),
    (26.0, 142.0),
    (26.0, 127.5),
    (26.0, 124.0),
    (26.0, 131.0),
    (20.0, 136.0),
    (26.0, 154.0),
];

impl Datum {
    fn params(self) -> &'static str {
        match self {
            Datum::Wgs84 => "+datum=WGS84",
            Datum::Jgd2000 | Datum::Jgd2011 => "+ellps=GRS80 +towgs84=0,0,0,0,0,0,0",
            Datum::Tokyo => "+ellps=bessel +towgs84=-146.414,507.337,680.507,0,0,0,0",
        }
    }

    fn geographic_code(self) -> u32 {
        match self {
            Datum::Wgs84 => 4326,
            Datum::Jgd2000 => 4612,
            Datum::Jgd2011 => 6668,
            Datum::Tokyo => 4301,
        }
    }

    /// EPSG code of plane rectangular zone I; zones are consecutive.
    fn plane_base(self) -> Option<u32> {
        match self {
            Datum::Wgs84 => None,
            Datum::Jgd2000 => Some(2443),
            Datum::Jgd2011 => Some(6669),
            Datum::Tokyo => Some(30161),
        }
    }

    fn from_name(name: &str) -> Option<Datum> {
        if name.contains("JGD2011") || name.contains("JGD_2011") {
            Some(Datum::Jgd2011)
        } else if name.contains("JGD2000") || name.contains("JGD_2000") {
            Some(Datum::Jgd2000)
        } else if name.contains("TOKYO") {
            Some(Datum::Tokyo)
        } else if name.contains("WGS84") || name.contains("WGS_1984") || name.contains("WGS_84") {
            Some(Datum::Wgs84)
        } else {
            None
        }
    }
}

impl Kind {
    fn from_code(code: u32) -> Option<Kind> {
        let kind = match code {
            4326 => Kind::Geographic(Datum::Wgs84),
            4612 => Kind::Geographic(Datum::Jgd2000),
            6668 => Kind::Geographic(Datum::Jgd2011),
            4301 => Kind::Geographic(Datum::Tokyo),
            2443..=2461 => Kind::PlaneRectangular(Datum::Jgd2000, code - 2442),
            6669..=6687 => Kind::PlaneRectangular(Datum::Jgd2011, code - 6668),
            30161..=30179 => Kind::PlaneRectangular(Datum::Tokyo, code - 30160),
            32601..=32660 => Kind::Utm(Datum::Wgs84, code - 32600),
            6688..=6692 => Kind::Utm(Datum::Jgd2011, code - 6637),
            3857 => Kind::WebMercator,
            _ => return None,
        };
        Some(kind)
    }

    fn code(self) -> Option<u32> {
        match self {
            Kind::Geographic(datum) => Some(datum.geographic_code()),
            Kind::PlaneRectangular(datum, zone) if (1..=19).contains(&zone) => {
                datum.plane_base().map(|base| base + zone - 1)
            }
            Kind::Utm(Datum::Wgs84, zone) if (1..=60).contains(&zone) => Some(32600 + zone),
            Kind::Utm(Datum::Jgd2011, zone) if (51..=55).contains(&zone) => Some(6637 + zone),
            Kind::WebMercator => Some(3857),
            _ => None,
        }
    }

    fn definition(self) -> String {
        match self {
            Kind::Geographic(datum) => format!("+proj=longlat {} +no_defs", datum.params()),
            Kind::PlaneRectangular(datum, zone) => {
                let (lat_0, lon_0) = PLANE_ORIGINS[(zone - 1) as usize];
                format!(
                    "+proj=tmerc +lat_0={lat_0} +lon_0={lon_0} +k=0.9999 +x_0=0 +y_0=0 {} +units=m +no_defs",
                    datum.params()
                )
            }
            Kind::Utm(datum, zone) => format!(
                "+proj=tmerc +lat_0=0 +lon_0={} +k=0.9996 +x_0=500000 +y_0=0 {} +units=m +no_defs",
                zone as i32 * 6 - 183,
                datum.params()
            ),
            Kind::WebMercator => {
                "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs"
                    .to_string()
            }
        }
    }
}

impl Crs {
    pub const WGS84: Crs = Crs(4326);

    pub fn epsg(code: u32) -> Crs {
        Crs(code)
    }

    pub fn is_supported(self) -> bool {
        Kind::from_code(self.0).is_some()
    }

    pub fn is_geographic(self) -> bool {
        matches!(Kind::from_code(self.0), Some(Kind::Geographic(_)))
    }

    /// PROJ.4 definition used for reprojection.
    pub fn definition(self) -> Option<String> {
        Kind::from_code(self.0).map(Kind::definition)
    }

    /// Reads the CRS out of a `.prj` file. OGC WKT carries an EPSG authority
    /// on its root; ESRI WKT only has names, which are matched against the
    /// known systems. Authorities on inner nodes (GEOGCS, SPHEROID, UNIT)
    /// never name the file's CRS.
    pub fn from_wkt(wkt: &str) -> Option<Crs> {
        if let Some(crs) = root_authority_code(wkt).map(Crs).filter(|crs| crs.is_supported()) {
            return Some(crs);
        }

        let wkt = wkt.trim_start();
        let projected = wkt.starts_with("PROJCS") || wkt.starts_with("PROJCRS");
        let name = root_name(wkt)?;
        let name = simplify(name);

        if name.contains("WEB_MERCATOR") || name.contains("PSEUDO_MERCATOR") {
            return Some(Crs(3857));
        }
        let datum = Datum::from_name(&name)?;
        let kind = if !projected {
            Kind::Geographic(datum)
        } else if let Some(zone) = zone_after(&name, "JAPAN_ZONE_").or_else(|| roman_zone(&name)) {
            Kind::PlaneRectangular(datum, zone)
        } else if let Some(zone) = zone_after(&name, "UTM_ZONE_") {
            Kind::Utm(datum, zone)
        } else {
            return None;
        };
        kind.code().map(Crs)
    }

    /// Parses `EPSG:6674`, `urn:ogc:def:crs:EPSG::6674` and the CRS84 URN
    /// used by the legacy GeoJSON `crs` member.
    pub fn from_name(name: &str) -> Option<Crs> {
        let name = name.trim();
        if name.to_ascii_uppercase().ends_with("CRS84") {
            return Some(Crs::WGS84);
        }
        let (authority, code) = name.rsplit_once(':')?;
        if !authority.to_ascii_uppercase().contains("EPSG") {
            return None;
        }
        code.parse().ok().map(Crs::epsg).filter(|crs| crs.is_supported())
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl Serialize for Crs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// EPSG code of an `AUTHORITY[...]` or `ID[...]` that is a direct child of
/// the root node.
fn root_authority_code(wkt: &str) -> Option<u32> {
    let upper = wkt.to_ascii_uppercase();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut found = None;
    for (i, b) in upper.bytes().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b'[' | b'(' if !quoted => {
                if depth == 1 {
                    let keyword = upper[..i]
                        .trim_end()
                        .rsplit(|c: char| !c.is_ascii_alphabetic())
                        .next()
                        .unwrap_or("");
                    if keyword == "AUTHORITY" || keyword == "ID" {
                        found = epsg_code(&upper[i + 1..]).or(found);
                    }
                }
                depth += 1;
            }
            b']' | b')' if !quoted => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    found
}

/// `"EPSG","6674"` or `"EPSG",6674` at the start of an authority's body.
fn epsg_code(body: &str) -> Option<u32> {
    let rest = body.trim_start().strip_prefix("\"EPSG\"")?;
    let digits: String = rest
        .trim_start()
        .strip_prefix(',')?
        .chars()
        .skip_while(|c| *c == '"' || c.is_whitespace())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn root_name(wkt: &str) -> Option<&str> {
    let start = wkt.find("[\"")? + 2;
    let len = wkt[start..].find('"')?;
    Some(&wkt[start..start + len])
}

/// Upper-cases and turns every run of separators into one `_`, so OGC and
/// ESRI spellings compare equal.
fn simplify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn zone_after(name: &str, marker: &str) -> Option<u32> {
    let start = name.find(marker)? + marker.len();
    let digits: String = name[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn roman_zone(name: &str) -> Option<u32> {
    const NUMERALS: [&str; 19] = [
        "I", "II", "III", "IV", "V", "VI", "VII", "VIII", "IX", "X", "XI", "XII", "XIII", "XIV",
        "XV", "XVI", "XVII", "XVIII", "XIX",
    ];
    let marker = "PLANE_RECTANGULAR_CS_";
    let start = name.find(marker)? + marker.len();
    let numeral = name[start..].split('_').next()?;
    NUMERALS
        .iter()
        .position(|n| *n == numeral)
        .map(|i| i as u32 + 1)
}

/// Transforms coordinates from one supported CRS to another.
pub struct Reprojector {
    from: Proj,
    to: Proj,
    from_geographic: bool,
    to_geographic: bool,
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> Result<Self> {
        let build = |crs: Crs| -> Result<Proj> {
            let definition = crs
                .definition()
                .ok_or_else(|| anyhow!("Unsupported coordinate reference system {}", crs))?;
            Proj::from_proj_string(&definition)
                .map_err(|e| anyhow!("Failed to build projection for {}: {:?}", crs, e))
        };
        Ok(Self {
            from: build(from)?,
            to: build(to)?,
            from_geographic: from.is_geographic(),
            to_geographic: to.is_geographic(),
        })
    }

    /// Geographic coordinates are degrees on both sides.
    pub fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        let mut point = if self.from_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        proj4rs::transform::transform(&self.from, &self.to, &mut point)
            .map_err(|e| anyhow!("Failed to reproject ({}, {}): {:?}", coord.x, coord.y, e))?;
        Ok(if self.to_geographic {
            Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
        } else {
            Coord { x: point.0, y: point.1 }
        })
    }

    pub fn reproject(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        geometry
            .try_map_coords(|coord| self.transform(coord))
            .context("Failed to reproject geometry")
    }
}
