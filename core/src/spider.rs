use std::collections::{BTreeMap, HashSet, VecDeque};
use std::thread;

use serde::Serialize;

use crate::error::EngineError;

/// Outbound-link graph: document id to the ordered set of ids it links to.
pub type UrlGraph = BTreeMap<String, Vec<String>>;

/// Anchor texts contributed by inbound links, keyed by target document id.
pub type AnchorMap = BTreeMap<String, Vec<String>>;

/// One hyperlink found in a document: a normalized target id plus the visible
/// text of the link.
#[derive(Debug, Clone)]
pub struct Link {
    pub target: String,
    pub anchor: String,
}

/// Read-only access to a pre-supplied document corpus.
///
/// Implementations decide where documents live (filesystem, archive, memory);
/// the spider only sees ids and raw markup. `extract_links` must return
/// targets already normalized against `current` (relative paths resolved,
/// fragments stripped).
pub trait CorpusAccessor: Sync {
    fn list_documents(&self) -> Vec<String>;
    fn fetch(&self, id: &str) -> Result<String, EngineError>;
    fn extract_links(&self, raw: &str, current: &str) -> Vec<Link>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    pub pages_crawled: usize,
    pub links_found: usize,
    pub documents_discovered: usize,
    pub urls_with_anchors: usize,
}

/// Everything a finished crawl hands to the index builder.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    /// Fetched documents, id to raw markup.
    pub documents: BTreeMap<String, String>,
    pub url_graph: UrlGraph,
    pub anchor_map: AnchorMap,
    pub stats: CrawlStats,
}

impl CrawlOutcome {
    /// Mean number of distinct outbound edges per crawled page.
    pub fn average_out_degree(&self) -> f64 {
        if self.stats.pages_crawled == 0 {
            return 0.0;
        }
        let edges: usize = self.url_graph.values().map(Vec::len).sum();
        edges as f64 / self.stats.pages_crawled as f64
    }
}

/// Breadth-first crawl of the corpus reachable from `seed`.
///
/// Fetch and link extraction for a whole BFS level run on worker threads;
/// results are merged back in dequeue order, so discovery order, anchor
/// attribution, and statistics are deterministic. A document id enters the
/// frontier at most once; rediscovering it only appends anchor text. The
/// optional `max_pages` budget stops expansion early and yields a partial
/// (still valid) outcome.
pub fn crawl<A: CorpusAccessor>(
    accessor: &A,
    seed: &str,
    max_pages: Option<usize>,
) -> Result<CrawlOutcome, EngineError> {
    accessor.fetch(seed).map_err(|_| EngineError::SeedNotFound {
        seed: seed.to_string(),
    })?;

    let mut frontier: VecDeque<String> = VecDeque::new();
    let mut discovered: HashSet<String> = HashSet::new();
    let mut outcome = CrawlOutcome::default();

    frontier.push_back(seed.to_string());
    discovered.insert(seed.to_string());

    while !frontier.is_empty() {
        let budget = match max_pages {
            Some(max) => max.saturating_sub(outcome.stats.pages_crawled),
            None => frontier.len(),
        };
        if budget == 0 {
            tracing::info!(?max_pages, "page budget exhausted, stopping crawl");
            break;
        }

        // Everything queued right now sits at the same BFS depth; links merged
        // below land in the next level's batch.
        let take = frontier.len().min(budget);
        let level: Vec<String> = frontier.drain(..take).collect();

        for (id, page) in fetch_level(accessor, &level) {
            let (raw, links) = match page {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(%id, %err, "skipping unfetchable document");
                    continue;
                }
            };
            outcome.stats.pages_crawled += 1;

            let outgoing = outcome.url_graph.entry(id.clone()).or_default();
            for link in links {
                outcome.stats.links_found += 1;
                if !outgoing.contains(&link.target) {
                    outgoing.push(link.target.clone());
                }
                if !link.anchor.is_empty() {
                    outcome
                        .anchor_map
                        .entry(link.target.clone())
                        .or_default()
                        .push(link.anchor);
                }
                if discovered.insert(link.target.clone()) && is_html_target(&link.target) {
                    frontier.push_back(link.target);
                }
            }
            outcome.documents.insert(id, raw);
        }
    }

    outcome.stats.documents_discovered = discovered.len();
    outcome.stats.urls_with_anchors = outcome.anchor_map.len();
    tracing::info!(
        pages_crawled = outcome.stats.pages_crawled,
        links_found = outcome.stats.links_found,
        documents_discovered = outcome.stats.documents_discovered,
        "crawl complete"
    );
    Ok(outcome)
}

type FetchedPage = (String, Result<(String, Vec<Link>), EngineError>);

fn fetch_level<A: CorpusAccessor>(accessor: &A, level: &[String]) -> Vec<FetchedPage> {
    let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let chunk = level.len().div_ceil(workers).max(1);
    let mut pages = Vec::with_capacity(level.len());
    thread::scope(|scope| {
        let handles: Vec<_> = level
            .chunks(chunk)
            .map(|ids| {
                scope.spawn(move || {
                    ids.iter()
                        .map(|id| {
                            let page = accessor.fetch(id).map(|raw| {
                                let links = accessor.extract_links(&raw, id);
                                (raw, links)
                            });
                            (id.clone(), page)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        for handle in handles {
            pages.extend(handle.join().expect("crawl worker panicked"));
        }
    });
    pages
}

fn is_html_target(id: &str) -> bool {
    let lower = id.to_ascii_lowercase();
    lower.ends_with(".html") || lower.ends_with(".htm") || lower.ends_with('/')
}
