use serde::Serialize;

/// Lightweight metadata recovered from a rendered record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkMetadata {
    pub title: String,
    pub year: String,
    pub url: String,
}

/// Split a source's raw text into records and recover title, year and URL from each.
///
/// Never fails: text that does not look like a record still yields a chunk whose
/// title is its first line.
#[must_use]
pub fn parse_chunks(raw_text: &str) -> Vec<(String, ChunkMetadata)> {
    raw_text
        .trim()
        .split("\n\n")
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| (chunk.to_string(), chunk_metadata(chunk)))
        .collect()
}

fn chunk_metadata(chunk: &str) -> ChunkMetadata {
    let title_line = chunk.split('\n').next().unwrap_or(chunk);
    let title = title_line.split(" (").next().unwrap_or(title_line).to_string();

    let year = title_line
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map_or_else(|| "N/A".to_string(), |(inner, _)| inner.to_string());

    let url = chunk
        .split_once("URL:")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .unwrap_or_default()
        .to_string();

    ChunkMetadata { title, year, url }
}
