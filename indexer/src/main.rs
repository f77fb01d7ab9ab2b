use anyhow::Result;
use clap::Parser;
use sift_core::{crawl, search, CorpusAccessor, Index};
use sift_corpus::FsCorpus;
use tracing_subscriber::{fmt, EnvFilter};

use std::collections::BTreeMap;

#[derive(Parser)]
#[command(name = "sift-indexer")]
#[command(about = "Crawl and index an HTML corpus, then run queries against it", long_about = None)]
struct Cli {
    /// Corpus root directory
    #[arg(long)]
    corpus: String,
    /// Seed document id to crawl from; omit to index every file in the corpus
    #[arg(long)]
    seed: Option<String>,
    /// Maximum number of pages the crawl may visit
    #[arg(long)]
    max_pages: Option<usize>,
    /// Query to evaluate against the built index (repeatable)
    #[arg(long = "query")]
    queries: Vec<String>,
    /// Number of results to print per query
    #[arg(long, default_value_t = 10)]
    top: usize,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    let corpus = FsCorpus::new(&cli.corpus);
    let index = match &cli.seed {
        Some(seed) => {
            let outcome = crawl(&corpus, seed, cli.max_pages)?;
            tracing::info!(
                pages_crawled = outcome.stats.pages_crawled,
                links_found = outcome.stats.links_found,
                documents_discovered = outcome.stats.documents_discovered,
                urls_with_anchors = outcome.stats.urls_with_anchors,
                average_out_degree = outcome.average_out_degree(),
                "crawl finished"
            );
            Index::build(outcome.documents, Some(&outcome.anchor_map))?
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
            Index::build(documents, None)?
        }
    };
    tracing::info!(
        num_docs = index.document_count(),
        num_terms = index.vocabulary_size(),
        "index built"
    );

    for query in &cli.queries {
        let hits = search(&index, query);
        println!("query: {query} ({} hits)", hits.len());
        for hit in hits.iter().take(cli.top) {
            println!("  {:>8.4}  {}", hit.score, hit.doc_id);
        }
    }
    Ok(())
}
