use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sift_core::{crawl, search, CorpusAccessor, CrawlStats, Index, UrlGraph};
use sift_corpus::FsCorpus;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize {
    10
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHitBody>,
}

#[derive(Serialize)]
pub struct SearchHitBody {
    pub doc_id: String,
    pub score: f64,
    pub anchor_texts: Vec<String>,
    pub snippet: Option<String>,
}

#[derive(Serialize)]
pub struct DocResponse {
    pub doc_id: String,
    pub text: String,
    pub anchor_texts: Vec<String>,
    pub outbound_links: Vec<String>,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub num_docs: usize,
    pub vocabulary_size: usize,
    pub crawl: Option<CrawlStats>,
    pub average_out_degree: Option<f64>,
}

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<Index>,
    pub url_graph: Arc<UrlGraph>,
    pub crawl_stats: Arc<Option<CrawlStats>>,
}

/// Crawl (or bulk-load) the corpus, build the index, and wire up the HTTP
/// routes around the finished snapshot. Queries never take a lock; the index
/// is immutable once built.
pub fn build_app(corpus_dir: &str, seed: Option<&str>, max_pages: Option<usize>) -> Result<Router> {
    let corpus = FsCorpus::new(corpus_dir);
    let (documents, anchor_map, url_graph, crawl_stats) = match seed {
        Some(seed) => {
            let outcome = crawl(&corpus, seed, max_pages)?;
            (
                outcome.documents,
                Some(outcome.anchor_map),
                outcome.url_graph,
                Some(outcome.stats),
            )
        }
        None => {
            let mut documents = BTreeMap::new();
            for id in corpus.list_documents() {
                match corpus.fetch(&id) {
                    Ok(raw) => {
                        documents.insert(id, raw);
                    }
                    Err(err) => tracing::warn!(%id, %err, "skipping unreadable document"),
                }
            }
            (documents, None, UrlGraph::new(), None)
        }
    };
    let index = Index::build(documents, anchor_map.as_ref())?;
    tracing::info!(
        num_docs = index.document_count(),
        num_terms = index.vocabulary_size(),
        "index ready"
    );

    let state = AppState {
        index: Arc::new(index),
        url_graph: Arc::new(url_graph),
        crawl_stats: Arc::new(crawl_stats),
    };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/*doc_id", get(doc_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
        .layer(cors);
    Ok(app)
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let hits = search(&state.index, &params.q);
    let total_hits = hits.len();
    let k = params.k.max(1).min(100);

    // Raw whitespace terms, stripped of query syntax, for highlighting.
    let raw_terms: Vec<String> = params
        .q
        .split_whitespace()
        .map(|s| s.trim_matches(|c: char| !c.is_ascii_alphabetic()).to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let results = hits
        .into_iter()
        .take(k)
        .map(|hit| {
            let snippet = state
                .index
                .document(&hit.doc_id)
                .and_then(|doc| snippet_from_text(&doc.plain_text, &raw_terms));
            SearchHitBody {
                doc_id: hit.doc_id,
                score: hit.score,
                anchor_texts: hit.anchor_texts,
                snippet,
            }
        })
        .collect();

    Json(SearchResponse {
        query: params.q,
        took_s: start.elapsed().as_secs_f64(),
        total_hits,
        results,
    })
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<DocResponse>, StatusCode> {
    let doc = state.index.document(&doc_id).ok_or(StatusCode::NOT_FOUND)?;
    let outbound_links = state.url_graph.get(&doc_id).cloned().unwrap_or_default();
    Ok(Json(DocResponse {
        doc_id: doc.id.clone(),
        text: doc.plain_text.clone(),
        anchor_texts: doc.anchor_texts.clone(),
        outbound_links,
    }))
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let crawl = (*state.crawl_stats).clone();
    let average_out_degree = crawl.as_ref().map(|stats| {
        if stats.pages_crawled == 0 {
            0.0
        } else {
            let edges: usize = state.url_graph.values().map(Vec::len).sum();
            edges as f64 / stats.pages_crawled as f64
        }
    });
    Json(StatsResponse {
        num_docs: state.index.document_count(),
        vocabulary_size: state.index.vocabulary_size(),
        crawl,
        average_out_degree,
    })
}

fn snippet_from_text(text: &str, raw_terms: &[String]) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let mut first_idx: Option<usize> = None;
    for term in raw_terms {
        if let Some(pos) = find_case_insensitive(text, term) {
            first_idx = Some(pos);
            break;
        }
    }
    let snippet = match first_idx {
        Some(idx) => {
            let start = floor_char_boundary(text, idx.saturating_sub(100));
            let end = floor_char_boundary(text, (idx + 200).min(text.len()));
            text[start..end].to_string()
        }
        None => text.chars().take(200).collect(),
    };
    Some(highlight_terms(&snippet, raw_terms))
}

fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let h = haystack.to_lowercase();
    let n = needle.to_lowercase();
    h.find(&n)
}

// Lowercasing can shift byte offsets in non-ASCII text, so clamp every slice
// bound to a char boundary before cutting.
fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut out = snippet.to_string();
    for term in terms {
        let pattern = regex::RegexBuilder::new(&regex::escape(term))
            .case_insensitive(true)
            .build()
            .unwrap();
        out = pattern
            .replace_all(&out, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0]))
            .to_string();
    }
    out
}
