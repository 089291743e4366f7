//! Column-name and join-key normalization for the population tables.
//!
//! Government exports differ in how they lay out headers: line breaks inside
//! cells, full-width spaces, an `歳` suffix on age bands, and a wave dash
//! instead of a full-width tilde depending on the code page the file passed
//! through. Everything is folded to one spelling before lookup.

pub const TOWN_NAME: &str = "town_name";

/// Stripped from age headers (`０～４歳` becomes `０～４`).
const AGE_MARKER: char = '歳';

/// Renames applied after normalization.
const RENAMES: &[(&str, &str)] = &[
    ("name", TOWN_NAME),
    ("人口総数", "population_total"),
    ("男性総数", "male_total"),
    ("女性総数", "female_total"),
];

/// Canonical form of a raw header: no whitespace, lower-case, no age marker.
pub fn normalize_column(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{feff}')
        .flat_map(char::to_lowercase)
        .filter(|c| *c != AGE_MARKER)
        .map(|c| if c == '\u{301c}' { '\u{ff5e}' } else { c })
        .collect()
}

/// `normalize_column` plus the fixed renames, so `NAME` and `人口 総数` land
/// on the internal names. `town_name` maps to itself.
pub fn canonical_column(raw: &str) -> String {
    let normalized = normalize_column(raw);
    RENAMES
        .iter()
        .find(|(from, _)| *from == normalized)
        .map(|(_, to)| (*to).to_string())
        .unwrap_or(normalized)
}

/// Join-key form of a town name: trimmed and lower-cased.
pub fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}
