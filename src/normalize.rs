//! Station label normalization.
//!
//! Ridership datasets and the GTFS feed spell the same station differently
//! ("Cicero-Lake Station", "Cicero (Green)", "O'Hare Airport"). [`normalize`]
//! reduces a label to a key that can be compared with plain string equality.

use regex::Regex;
use std::sync::LazyLock;

// ASCII classes only: a Unicode `\w` would keep accented letters.
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z_[:space:]]").expect("Invalid non-word regex"));

static STATION_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bstation\b").expect("Invalid station regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[[:space:]]+").expect("Invalid whitespace regex"));

/// Canonicalizes a free-text station label into a comparable key.
///
/// The pipeline, applied in order:
///
/// 1. lower-case (ASCII only, so the result never depends on locale)
/// 2. `&` becomes the word `and`
/// 3. `/` and `-` become a space
/// 4. anything that is not `[0-9a-z_]` or whitespace is dropped
/// 5. the standalone word `station` is removed
/// 6. whitespace runs collapse to a single space, ends are trimmed
///
/// ```
/// use ghost_stops::normalize::normalize;
///
/// assert_eq!(normalize("Cicero-Lake Station"), "cicero lake");
/// assert_eq!(normalize("O'Hare Airport"), normalize("OHare Airport"));
/// ```
pub fn normalize(raw: &str) -> String {
    let lowered = raw
        .to_ascii_lowercase()
        .replace('&', "and")
        .replace(['/', '-'], " ");

    let cleaned = NON_WORD.replace_all(&lowered, "");
    let without_station = STATION_WORD.replace_all(&cleaned, " ");
    WHITESPACE
        .replace_all(&without_station, " ")
        .trim()
        .to_string()
}
