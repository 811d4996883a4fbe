use super::parser::ChunkMetadata;
use std::collections::HashSet;

const TITLE_OVERLAP_WEIGHT: f64 = 2.0;
const MAX_RECENCY_BONUS: f64 = 3.0;
const RECENCY_DECAY_PER_YEAR: f64 = 0.5;

/// Lowercase ASCII alphanumeric runs
#[must_use]
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Title keyword overlap plus a recency bonus that decays by half a point per year
#[must_use]
pub fn score(query: &str, meta: &ChunkMetadata, current_year: i32) -> f64 {
    let overlap = tokenize(query).intersection(&tokenize(&meta.title)).count();
    let mut score = overlap as f64 * TITLE_OVERLAP_WEIGHT;

    if let Ok(year) = meta.year.trim().parse::<i32>() {
        let age = i64::from(current_year).saturating_sub(i64::from(year)).max(0) as f64;
        score += (MAX_RECENCY_BONUS - age * RECENCY_DECAY_PER_YEAR).max(0.0);
    }

    score
}
