//! Display labels for the variables a map can be coloured by.

use crate::types::Field;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Variable {
    pub label: &'static str,
    pub field: Field,
}

const fn var(label: &'static str, field: Field) -> Variable {
    Variable { label, field }
}

static VARIABLES: &[Variable] = &[
    // Target cohorts
    var("男女20-39歳", Field::Age20To39),
    var("男女小4-中3_10-14歳", Field::Age10To14),
    var("男20-39歳", Field::MaleAge20To39),
    var("女20-39歳", Field::FemaleAge20To39),
    var("男小4-中3_10-14歳", Field::MaleAge10To14),
    var("女小4-中3_10-14歳", Field::FemaleAge10To14),
    // Totals
    var("総人口", Field::PopulationTotal),
    var("男性", Field::MaleTotal),
    var("女性", Field::FemaleTotal),
    // By age
    var("10歳未満", Field::AgeUnder10),
    var("10-19歳", Field::Age10To19),
    var("20-29歳", Field::Age20To29),
    var("30-39歳", Field::Age30To39),
    var("40-49歳", Field::Age40To49),
    var("50-59歳", Field::Age50To59),
    var("60-69歳", Field::Age60To69),
    var("70-74歳", Field::Age70To74),
    var("75歳以上", Field::AgeOver75),
    // Male by age
    var("男性 10歳未満", Field::MaleAgeUnder10),
    var("男性 10-19歳", Field::MaleAge10To19),
    var("男性 20-29歳", Field::MaleAge20To29),
    var("男性 30-39歳", Field::MaleAge30To39),
    var("男性 40-49歳", Field::MaleAge40To49),
    var("男性 50-59歳", Field::MaleAge50To59),
    var("男性 60-69歳", Field::MaleAge60To69),
    var("男性 70-74歳", Field::MaleAge70To74),
    var("男性 75歳以上", Field::MaleAgeOver75),
    // Female by age
    var("女性 10歳未満", Field::FemaleAgeUnder10),
    var("女性 10-19歳", Field::FemaleAge10To19),
    var("女性 20-29歳", Field::FemaleAge20To29),
    var("女性 30-39歳", Field::FemaleAge30To39),
    var("女性 40-49歳", Field::FemaleAge40To49),
    var("女性 50-59歳", Field::FemaleAge50To59),
    var("女性 60-69歳", Field::FemaleAge60To69),
    var("女性 70-74歳", Field::FemaleAge70To74),
    var("女性 75歳以上", Field::FemaleAgeOver75),
];

/// Variables in menu order.
pub fn variables() -> &'static [Variable] {
    VARIABLES
}

pub fn label_for(field: Field) -> Option<&'static str> {
    VARIABLES.iter().find(|v| v.field == field).map(|v| v.label)
}

pub fn field_for_label(label: &str) -> Option<Field> {
    VARIABLES.iter().find(|v| v.label == label).map(|v| v.field)
}
