use crate::error::{MissingColumnError, StatisticalDataError};
use crate::types::Field;
use std::collections::HashMap;

/// An aggregate field and the normalized base columns it is the sum of.
#[derive(Debug, Clone, Copy)]
pub struct Derivation {
    pub field: Field,
    pub sources: &'static [&'static str],
}

const fn sum(field: Field, sources: &'static [&'static str]) -> Derivation {
    Derivation { field, sources }
}

/// Base columns use the normalized header spelling (full-width digits,
/// `～`, no `歳`).
pub const DERIVATIONS: &[Derivation] = &[
    sum(Field::Age0To4, &["０～４"]),
    sum(Field::Age5To9, &["５～９"]),
    sum(Field::Age10To14, &["１０～１４"]),
    sum(Field::Age15To19, &["１５～１９"]),
    sum(Field::Age20To24, &["２０～２４"]),
    sum(Field::Age25To29, &["２５～２９"]),
    sum(Field::Age30To34, &["３０～３４"]),
    sum(Field::Age35To39, &["３５～３９"]),
    sum(Field::Age40To44, &["４０～４４"]),
    sum(Field::Age45To49, &["４５～４９"]),
    sum(Field::Age50To54, &["５０～５４"]),
    sum(Field::Age55To59, &["５５～５９"]),
    sum(Field::Age60To64, &["６０～６４"]),
    sum(Field::Age65To69, &["６５～６９"]),
    sum(Field::Age70To74, &["７０～７４"]),
    sum(Field::AgeOver75, &["７５以上"]),
    //
    sum(Field::MaleAgeUnder10, &["男０～４", "男５～９"]),
    sum(Field::MaleAge10To14, &["男１０～１４"]),
    sum(Field::MaleAge10To19, &["男１０～１４", "男１５～１９"]),
    sum(Field::MaleAge20To29, &["男２０～２４", "男２５～２９"]),
    sum(Field::MaleAge20To39, &["男２０～２４", "男２５～２９", "男３０～３４", "男３５～３９"]),
    sum(Field::MaleAge30To39, &["男３０～３４", "男３５～３９"]),
    sum(Field::MaleAge40To49, &["男４０～４４", "男４５～４９"]),
    sum(Field::MaleAge50To59, &["男５０～５４", "男５５～５９"]),
    sum(Field::MaleAge60To69, &["男６０～６４", "男６５～６９"]),
    sum(Field::MaleAge70To74, &["男７０～７４"]),
    sum(Field::MaleAgeOver75, &["男７５以上"]),
    //
    sum(Field::FemaleAgeUnder10, &["女０～４", "女５～９"]),
    sum(Field::FemaleAge10To14, &["女１０～１４"]),
    sum(Field::FemaleAge10To19, &["女１０～１４", "女１５～１９"]),
    sum(Field::FemaleAge20To29, &["女２０～２４", "女２５～２９"]),
    sum(Field::FemaleAge20To39, &["女２０～２４", "女２５～２９", "女３０～３４", "女３５～３９"]),
    sum(Field::FemaleAge30To39, &["女３０～３４", "女３５～３９"]),
    sum(Field::FemaleAge40To49, &["女４０～４４", "女４５～４９"]),
    sum(Field::FemaleAge50To59, &["女５０～５４", "女５５～５９"]),
    sum(Field::FemaleAge60To69, &["女６０～６４", "女６５～６９"]),
    sum(Field::FemaleAge70To74, &["女７０～７４"]),
    sum(Field::FemaleAgeOver75, &["女７５以上"]),
    //
    sum(Field::AgeUnder10, &["０～４", "５～９"]),
    sum(Field::Age10To19, &["１０～１４", "１５～１９"]),
    sum(Field::Age20To29, &["２０～２４", "２５～２９"]),
    sum(Field::Age20To39, &["２０～２４", "２５～２９", "３０～３４", "３５～３９"]),
    sum(Field::Age30To39, &["３０～３４", "３５～３９"]),
    sum(Field::Age40To49, &["４０～４４", "４５～４９"]),
    sum(Field::Age50To59, &["５０～５４", "５５～５９"]),
    sum(Field::Age60To69, &["６０～６４", "６５～６９"]),
];

/// Every derivation with its source columns resolved to positions in one
/// file's header row.
#[derive(Debug, Clone)]
pub struct AggregatePlan {
    steps: Vec<(Field, Vec<(usize, &'static str)>)>,
}

impl AggregatePlan {
    /// `columns` maps normalized header names to their position.
    pub fn resolve(columns: &HashMap<String, usize>) -> Result<Self, MissingColumnError> {
        let mut steps = Vec::with_capacity(DERIVATIONS.len());
        for derivation in DERIVATIONS {
            let mut sources = Vec::with_capacity(derivation.sources.len());
            for &column in derivation.sources {
                let idx = columns.get(column).ok_or_else(|| MissingColumnError {
                    field: derivation.field,
                    column: column.to_string(),
                })?;
                sources.push((*idx, column));
            }
            steps.push((derivation.field, sources));
        }
        Ok(Self { steps })
    }

    /// Sums the base cells of one row. `row` is the 1-based data row used in
    /// error messages.
    pub fn apply(
        &self,
        record: &csv::StringRecord,
        row: usize,
    ) -> Result<Vec<(Field, u64)>, StatisticalDataError> {
        self.steps
            .iter()
            .map(|(field, sources)| {
                let mut total = 0u64;
                for (idx, column) in sources {
                    let cell = record.get(*idx).ok_or_else(|| StatisticalDataError::TruncatedRow {
                        row,
                        column: column.to_string(),
                    })?;
                    total = total
                        .checked_add(parse_count(cell, row, column)?)
                        .ok_or(StatisticalDataError::Overflow { row, field: *field })?;
                }
                Ok((*field, total))
            })
            .collect()
    }
}

/// Parses a population cell. Blank cells and dash placeholders count as zero;
/// full-width digits and thousands separators are accepted.
pub fn parse_count(raw: &str, row: usize, column: &str) -> Result<u64, StatisticalDataError> {
    let cell = raw.trim();
    if cell.is_empty() || matches!(cell, "-" | "－" | "―" | "‐") {
        return Ok(0);
    }
    let digits: String = cell
        .chars()
        .filter(|c| *c != ',' && *c != '，')
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            _ => c,
        })
        .collect();
    digits
        .parse::<u64>()
        .map_err(|_| StatisticalDataError::InvalidNumber {
            row,
            column: column.to_string(),
            value: raw.to_string(),
        })
}
