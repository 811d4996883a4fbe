use super::parser::{parse_chunks, ChunkMetadata};
use super::scorer::score;
use super::RankingPolicy;
use crate::client::providers::SourceResult;
use crate::client::{is_usable_content, PaperRecord, SourceName};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Per-source outcomes of one run, in source order
pub type SourceResults = BTreeMap<SourceName, SourceResult>;

#[derive(Debug, Clone)]
struct Candidate {
    source: SourceName,
    text: String,
    meta: ChunkMetadata,
    record: Option<PaperRecord>,
    score: f64,
}

impl Candidate {
    fn dedup_key(&self) -> &str {
        if self.meta.url.is_empty() {
            self.text.lines().next().unwrap_or_default()
        } else {
            &self.meta.url
        }
    }
}

fn candidates(result: &SourceResult, query: &str, current_year: i32) -> Result<Vec<Candidate>> {
    if !is_usable_content(&result.raw_text) {
        return Ok(Vec::new());
    }

    let chunks: Vec<(String, ChunkMetadata, Option<PaperRecord>)> = if result.records.is_empty() {
        parse_chunks(&result.raw_text)
            .into_iter()
            .map(|(text, meta)| (text, meta, None))
            .collect()
    } else {
        result
            .records
            .iter()
            .map(|record| {
                let meta = ChunkMetadata {
                    title: record.title.clone(),
                    year: record.year.clone(),
                    url: record.url.clone(),
                };
                (record.render(), meta, Some(record.clone()))
            })
            .collect()
    };

    chunks
        .into_iter()
        .map(|(text, meta, record)| {
            let score = score(query, &meta, current_year);
            if !score.is_finite() {
                return Err(Error::Service(format!(
                    "Non-finite relevance score for '{}'",
                    meta.title
                )));
            }
            Ok(Candidate {
                source: result.source,
                text,
                meta,
                record,
                score,
            })
        })
        .collect()
}

fn sort_by_score(candidates: &mut [Candidate]) {
    // stable: equal scores keep arrival order
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn rebuild(original: &SourceResult, kept: Vec<Candidate>) -> SourceResult {
    if kept.is_empty() {
        return SourceResult::not_queried(original.source);
    }

    let records: Option<Vec<PaperRecord>> = kept.iter().map(|c| c.record.clone()).collect();
    match records {
        Some(records) => SourceResult::from_records(original.source, records),
        None => SourceResult {
            source: original.source,
            raw_text: kept
                .into_iter()
                .map(|c| c.text)
                .collect::<Vec<_>>()
                .join("\n\n"),
            records: Vec::new(),
            error: original.error.clone(),
        },
    }
}

/// Rank and trim, reporting any failure
pub fn try_rank_and_trim(
    results: &SourceResults,
    query: &str,
    policy: RankingPolicy,
    max_results: usize,
    current_year: i32,
) -> Result<SourceResults> {
    let mut out = results.clone();

    match policy {
        RankingPolicy::PerSource => {
            for (source, result) in results {
                let mut scored = candidates(result, query, current_year)?;
                if scored.is_empty() {
                    continue;
                }
                sort_by_score(&mut scored);
                scored.truncate(max_results);
                out.insert(*source, rebuild(result, scored));
            }
        }
        RankingPolicy::Global => {
            let mut pool = Vec::new();
            let mut ranked_sources = Vec::new();
            for (source, result) in results {
                let scored = candidates(result, query, current_year)?;
                if !scored.is_empty() {
                    ranked_sources.push(*source);
                    pool.extend(scored);
                }
            }

            sort_by_score(&mut pool);
            let mut seen = HashSet::new();
            let mut kept: Vec<Candidate> = pool
                .into_iter()
                .filter(|c| seen.insert(c.dedup_key().to_string()))
                .collect();
            debug!("Global ranking kept {} unique of pooled candidates", kept.len());
            kept.truncate(max_results);

            for source in ranked_sources {
                let (mine, rest): (Vec<Candidate>, Vec<Candidate>) =
                    kept.into_iter().partition(|c| c.source == source);
                kept = rest;
                if let Some(original) = results.get(&source) {
                    out.insert(source, rebuild(original, mine));
                }
            }
        }
    }

    Ok(out)
}

/// Rank and trim; on any failure the input is returned unchanged
#[must_use]
pub fn rank_and_trim(
    results: SourceResults,
    query: &str,
    policy: RankingPolicy,
    max_results: usize,
    current_year: i32,
) -> SourceResults {
    match try_rank_and_trim(&results, query, policy, max_results, current_year) {
        Ok(ranked) => ranked,
        Err(e) => {
            warn!("Ranking failed, keeping unranked results: {}", e);
            results
        }
    }
}

/// Number of records a source's text holds, counted by its `URL:` lines
#[must_use]
pub fn count_records(text: &str) -> usize {
    let text = text.trim();
    if !is_usable_content(text) {
        return 0;
    }
    match text.matches("\nURL: ").count() {
        0 => match text.matches("URL: ").count() {
            0 => usize::from(text.len() > 100),
            n => n,
        },
        n => n,
    }
}
