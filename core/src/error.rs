use thiserror::Error;

/// Failures surfaced by the crawl and index-build phases.
///
/// Structural failures (`CorpusEmpty`, `SeedNotFound`) abort the phase that
/// raised them. `Unfetchable` is recoverable during a crawl: the offending
/// document is skipped and the crawl continues.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("corpus contains no documents")]
    CorpusEmpty,
    #[error("seed document not found: {seed}")]
    SeedNotFound { seed: String },
    #[error("cannot fetch document {id}: {reason}")]
    Unfetchable { id: String, reason: String },
}
