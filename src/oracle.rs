//! Oracle: ranking behind the "Search Texts" and "Search Images" folders.
//!
//! The graph engine only consumes ordered `(path, score)` hits. Where they come
//! from is decided once at startup by [`select_ranker`]: an embedding service
//! reachable over HTTP, or the store-backed [`LocalRanker`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::config::Config;
use crate::core::file_groups;
use crate::error::{Result, TagError};
use crate::state::SearchResult;
use crate::storage::{extract_text_from_file, text_extraction, Store};

const REMOTE_TIMEOUT: Duration = Duration::from_secs(30);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Text,
    Image,
}

impl SearchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchKind::Text => "text",
            SearchKind::Image => "image",
        }
    }
}

pub trait Ranker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best `top_k` hits for `query`, highest score first.
    fn search(&self, query: &str, kind: SearchKind, top_k: usize) -> Result<Vec<SearchResult>>;

    /// Makes `paths` searchable. Returns how many were accepted.
    fn index(&self, paths: &[PathBuf], kind: SearchKind) -> Result<usize>;
}

/// Picks the ranker for this process. Falls back to [`LocalRanker`] when the
/// configured service cannot be reached.
pub fn select_ranker(config: &Config, store: &Store) -> Arc<dyn Ranker> {
    if let Some(url) = &config.ranker_url {
        match RemoteRanker::new(url) {
            Ok(remote) if remote.is_healthy() => {
                tracing::info!("[Oracle] Using remote ranker at {}", url);
                return Arc::new(remote);
            }
            Ok(_) => tracing::warn!("[Oracle] Ranker at {} is not answering, using local ranker", url),
            Err(e) => tracing::warn!("[Oracle] Failed to build client for {}: {}", url, e),
        }
    }
    tracing::info!("[Oracle] Using local ranker");
    Arc::new(LocalRanker::new(store.clone()))
}

// ------------------------------------------------------------------- local

/// Bag-of-words ranking over text stored in the graph database.
pub struct LocalRanker {
    store: Store,
}

impl LocalRanker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn search_texts(&self, query: &[String], top_k: usize) -> Result<Vec<SearchResult>> {
        let query_counts = term_counts(query.iter().cloned());
        let docs = self.store.read(|repo| repo.indexed_texts())?;
        let hits = docs.into_iter()
            .map(|(path, text)| {
                let score = cosine(&query_counts, &term_counts(text_extraction::words(&text)));
                (path, score)
            })
            .collect();
        Ok(rank(hits, top_k))
    }

    fn search_images(&self, query: &[String], top_k: usize) -> Result<Vec<SearchResult>> {
        let query_counts = term_counts(query.iter().cloned());
        let paths = self.store.read(|repo| repo.all_files(true))?;
        let hits = paths.into_iter()
            .filter(|p| file_groups::is_image(Path::new(p)))
            .map(|path| {
                let stem = Path::new(&path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let score = cosine(&query_counts, &term_counts(text_extraction::words(&stem)));
                (path, score)
            })
            .collect();
        Ok(rank(hits, top_k))
    }
}

impl Ranker for LocalRanker {
    fn name(&self) -> &'static str {
        "local"
    }

    fn search(&self, query: &str, kind: SearchKind, top_k: usize) -> Result<Vec<SearchResult>> {
        let words: Vec<String> = text_extraction::words(query).collect();
        if words.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        match kind {
            SearchKind::Text => self.search_texts(&words, top_k),
            SearchKind::Image => self.search_images(&words, top_k),
        }
    }

    fn index(&self, paths: &[PathBuf], kind: SearchKind) -> Result<usize> {
        self.store.transact(|repo| {
            let mut indexed = 0;
            for path in paths {
                let text = match kind {
                    // Image hits are ranked by file name; the flag is all that is stored
                    SearchKind::Image => String::new(),
                    SearchKind::Text => match extract_text_from_file(path) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!("[Oracle] Failed to extract {}: {}", path.display(), e);
                            continue;
                        }
                    },
                };
                if repo.set_extracted_text(path, &text)? {
                    indexed += 1;
                }
            }
            Ok(indexed)
        })
    }
}

fn term_counts(words: impl Iterator<Item = String>) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for w in words {
        *counts.entry(w).or_insert(0.0) += 1.0;
    }
    counts
}

fn cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    let dot: f32 = a.iter().filter_map(|(w, x)| b.get(w).map(|y| x * y)).sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm = |m: &HashMap<String, f32>| m.values().map(|v| v * v).sum::<f32>().sqrt();
    dot / (norm(a) * norm(b))
}

/// Drops zero scores, sorts by score (ties by path) and keeps `top_k`.
fn rank(hits: Vec<(String, f32)>, top_k: usize) -> Vec<SearchResult> {
    let mut hits: Vec<(String, f32)> = hits.into_iter().filter(|(_, s)| *s > 0.0).collect();
    hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    hits.truncate(top_k);
    hits.into_iter().map(|(path, score)| SearchResult::new(path, score)).collect()
}

// ------------------------------------------------------------------- remote

#[derive(Debug, Deserialize)]
struct RemoteHit {
    path: String,
    score: f32,
}

#[derive(Debug, Serialize)]
struct IndexRequest<'a> {
    paths: Vec<String>,
    kind: &'a str,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    indexed: usize,
}

/// Client for an embedding service speaking JSON over HTTP.
pub struct RemoteRanker {
    base: String,
    client: reqwest::blocking::Client,
}

impl RemoteRanker {
    pub fn new(base: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()?;
        Ok(Self { base: base.trim_end_matches('/').to_string(), client })
    }

    pub fn is_healthy(&self) -> bool {
        self.client
            .get(format!("{}/health", self.base))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn check(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().unwrap_or_default();
        Err(TagError::Ranker(format!("{}: {}", status, body)))
    }
}

impl Ranker for RemoteRanker {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn search(&self, query: &str, kind: SearchKind, top_k: usize) -> Result<Vec<SearchResult>> {
        let top_k_param = top_k.to_string();
        let response = self.client
            .get(format!("{}/search", self.base))
            .query(&[("query", query), ("top_k", top_k_param.as_str()), ("kind", kind.as_str())])
            .send()?;
        let hits: Vec<RemoteHit> = Self::check(response)?.json()?;
        Ok(hits.into_iter()
            .take(top_k)
            .map(|h| SearchResult::new(h.path, h.score))
            .collect())
    }

    fn index(&self, paths: &[PathBuf], kind: SearchKind) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        let request = IndexRequest {
            paths: paths.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
            kind: kind.as_str(),
        };
        let response = self.client
            .post(format!("{}/index", self.base))
            .json(&request)
            .send()?;
        let body: IndexResponse = Self::check(response)?.json()?;
        Ok(body.indexed)
    }
}
