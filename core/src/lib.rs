pub mod error;
pub mod index;
pub mod query;
pub mod spider;
pub mod tokenizer;

pub use error::EngineError;
pub use index::{Document, Index, Occurrences, TermEntry};
pub use query::{classify, search, BoolExpr, Query, SearchHit, LEGACY_MARKER};
pub use spider::{crawl, AnchorMap, CorpusAccessor, CrawlOutcome, CrawlStats, Link, UrlGraph};
