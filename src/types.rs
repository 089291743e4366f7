use crate::crs::Crs;
use geo::MultiPolygon;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

macro_rules! fields {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Every numeric column a statistical record can carry.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum Field {
            $($variant),+
        }

        impl Field {
            pub const ALL: &'static [Field] = &[$(Field::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Field::$variant => $name),+
                }
            }
        }
    };
}

fields! {
    PopulationTotal => "population_total",
    MaleTotal => "male_total",
    FemaleTotal => "female_total",

    Age0To4 => "age_0_4",
    Age5To9 => "age_5_9",
    Age10To14 => "age_10_14",
    Age15To19 => "age_15_19",
    Age20To24 => "age_20_24",
    Age25To29 => "age_25_29",
    Age30To34 => "age_30_34",
    Age35To39 => "age_35_39",
    Age40To44 => "age_40_44",
    Age45To49 => "age_45_49",
    Age50To54 => "age_50_54",
    Age55To59 => "age_55_59",
    Age60To64 => "age_60_64",
    Age65To69 => "age_65_69",
    Age70To74 => "age_70_74",
    AgeOver75 => "age_over_75",

    AgeUnder10 => "age_under_10",
    Age10To19 => "age_10_19",
    Age20To29 => "age_20_29",
    Age20To39 => "age_20_39",
    Age30To39 => "age_30_39",
    Age40To49 => "age_40_49",
    Age50To59 => "age_50_59",
    Age60To69 => "age_60_69",

    MaleAgeUnder10 => "male_age_under_10",
    MaleAge10To14 => "male_age_10_14",
    MaleAge10To19 => "male_age_10_19",
    MaleAge20To29 => "male_age_20_29",
    MaleAge20To39 => "male_age_20_39",
    MaleAge30To39 => "male_age_30_39",
    MaleAge40To49 => "male_age_40_49",
    MaleAge50To59 => "male_age_50_59",
    MaleAge60To69 => "male_age_60_69",
    MaleAge70To74 => "male_age_70_74",
    MaleAgeOver75 => "male_age_over_75",

    FemaleAgeUnder10 => "female_age_under_10",
    FemaleAge10To14 => "female_age_10_14",
    FemaleAge10To19 => "female_age_10_19",
    FemaleAge20To29 => "female_age_20_29",
    FemaleAge20To39 => "female_age_20_39",
    FemaleAge30To39 => "female_age_30_39",
    FemaleAge40To49 => "female_age_40_49",
    FemaleAge50To59 => "female_age_50_59",
    FemaleAge60To69 => "female_age_60_69",
    FemaleAge70To74 => "female_age_70_74",
    FemaleAgeOver75 => "female_age_over_75",
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField(pub String);

impl fmt::Display for UnknownField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown field {:?}", self.0)
    }
}

impl std::error::Error for UnknownField {}

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One row of a municipality's population table, keyed by normalized town name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticalRecord {
    pub town_name: String,
    values: BTreeMap<Field, u64>,
}

impl StatisticalRecord {
    pub fn new(town_name: impl Into<String>) -> Self {
        Self {
            town_name: town_name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: Field) -> Option<u64> {
        self.values.get(&field).copied()
    }

    pub fn set(&mut self, field: Field, value: u64) {
        self.values.insert(field, value);
    }

    pub fn values(&self) -> impl Iterator<Item = (Field, u64)> + '_ {
        self.values.iter().map(|(field, value)| (*field, *value))
    }
}

/// A boundary row joined with the statistics of the town it names, if any.
#[derive(Debug, Clone)]
pub struct JoinedRecord {
    /// Municipality the row was loaded from.
    pub municipality: String,
    /// Normalized join key; empty when the boundary row had no name.
    pub town_key: String,
    /// Name as written in the boundary file, trimmed.
    pub name: String,
    pub geometry: Option<MultiPolygon<f64>>,
    pub stats: Option<StatisticalRecord>,
}

impl JoinedRecord {
    pub fn value(&self, field: Field) -> Option<u64> {
        self.stats.as_ref().and_then(|s| s.get(field))
    }
}

#[derive(Debug, Clone)]
pub struct JoinedTable {
    pub municipalities: Vec<String>,
    pub crs: Crs,
    pub records: Vec<JoinedRecord>,
}

impl JoinedTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn matched(&self) -> usize {
        self.records.iter().filter(|r| r.stats.is_some()).count()
    }

    /// Concatenates tables that share a CRS, keeping every row's origin.
    pub fn concat(tables: Vec<JoinedTable>) -> JoinedTable {
        let mut combined = JoinedTable {
            municipalities: Vec::new(),
            crs: Crs::WGS84,
            records: Vec::new(),
        };
        for table in tables {
            combined.crs = table.crs;
            combined.municipalities.extend(table.municipalities);
            combined.records.extend(table.records);
        }
        combined
    }

    /// First row whose join key matches `town` after key normalization.
    pub fn find_town(&self, town: &str) -> Option<&JoinedRecord> {
        let key = crate::columns::normalize_key(town);
        self.records.iter().find(|r| !key.is_empty() && r.town_key == key)
    }
}
