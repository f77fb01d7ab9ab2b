use std::collections::BTreeMap;
use std::thread;

use parking_lot::Mutex;

use crate::error::EngineError;
use crate::spider::AnchorMap;
use crate::tokenizer::{strip_markup, tokenize};

/// Occurrences of one term within one document: the weighted frequency used
/// for scoring plus every position the term appears at, ascending.
///
/// Anchor-text occurrences count twice toward `tf` but are recorded once in
/// `positions`, so `tf == positions.len()` only for documents without anchor
/// contributions.
#[derive(Debug, Clone)]
pub struct Occurrences {
    pub tf: u32,
    pub positions: Vec<usize>,
}

/// One indexed document. Built once during `Index::build`, immutable after.
#[derive(Debug)]
pub struct Document {
    pub id: String,
    pub plain_text: String,
    /// Forward index entry: term to its occurrences in this document.
    pub terms: BTreeMap<String, Occurrences>,
    pub anchor_texts: Vec<String>,
    /// Number of body tokens, before anchor merging.
    pub token_count: usize,
}

/// One term's slice of the inverted index: postings keyed by document id,
/// with the document frequency cached for IDF.
#[derive(Debug, Default)]
pub struct TermEntry {
    pub df: u32,
    pub postings: BTreeMap<String, Occurrences>,
}

/// Immutable snapshot of a built corpus index: forward index, inverted index,
/// and TF-IDF document vectors. Queries borrow it read-only; concurrent
/// readers need no locking.
#[derive(Debug)]
pub struct Index {
    documents: BTreeMap<String, Document>,
    inverted: BTreeMap<String, TermEntry>,
    vectors: BTreeMap<String, BTreeMap<String, f64>>,
    norms: BTreeMap<String, f64>,
}

impl Index {
    /// Build an index over `documents` (id to raw markup), optionally merging
    /// anchor texts from a crawl.
    ///
    /// Phase 1 tokenizes every document on worker threads, merging anchor
    /// terms into the same per-document table at double weight. Phase 2 is a
    /// barrier: document frequencies and TF-IDF weights need all of phase 1,
    /// so it runs sequentially once the table is complete. Anchors merge
    /// before df is computed.
    pub fn build(
        documents: BTreeMap<String, String>,
        anchor_map: Option<&AnchorMap>,
    ) -> Result<Self, EngineError> {
        if documents.is_empty() {
            return Err(EngineError::CorpusEmpty);
        }

        let inputs: Vec<(String, String)> = documents.into_iter().collect();
        let table: Mutex<BTreeMap<String, Document>> = Mutex::new(BTreeMap::new());

        let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let chunk = inputs.len().div_ceil(workers).max(1);
        let table_ref = &table;
        thread::scope(|scope| {
            for batch in inputs.chunks(chunk) {
                scope.spawn(move || {
                    for (id, raw) in batch {
                        let anchors = anchor_map
                            .and_then(|map| map.get(id))
                            .map(|texts| texts.as_slice())
                            .unwrap_or(&[]);
                        let doc = analyze_document(id, raw, anchors);
                        table_ref.lock().insert(id.clone(), doc);
                    }
                });
            }
        });
        let documents = table.into_inner();
        tracing::debug!(num_docs = documents.len(), "document analysis complete");

        let mut inverted: BTreeMap<String, TermEntry> = BTreeMap::new();
        for doc in documents.values() {
            for (term, occ) in &doc.terms {
                inverted
                    .entry(term.clone())
                    .or_default()
                    .postings
                    .insert(doc.id.clone(), occ.clone());
            }
        }
        for entry in inverted.values_mut() {
            entry.df = entry.postings.len() as u32;
        }

        let n = documents.len() as f64;
        let mut vectors = BTreeMap::new();
        let mut norms = BTreeMap::new();
        for doc in documents.values() {
            let mut vector = BTreeMap::new();
            let mut norm_sq = 0.0f64;
            for (term, occ) in &doc.terms {
                let df = f64::from(inverted[term].df);
                let weight = f64::from(occ.tf) * (n / df).ln();
                if weight > 0.0 {
                    norm_sq += weight * weight;
                    vector.insert(term.clone(), weight);
                }
            }
            norms.insert(doc.id.clone(), norm_sq.sqrt());
            vectors.insert(doc.id.clone(), vector);
        }
        tracing::debug!(num_terms = inverted.len(), "inverted index complete");

        Ok(Self {
            documents,
            inverted,
            vectors,
            norms,
        })
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.inverted.len()
    }

    pub fn document(&self, id: &str) -> Option<&Document> {
        self.documents.get(id)
    }

    /// All documents in ascending id order.
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn term(&self, term: &str) -> Option<&TermEntry> {
        self.inverted.get(term)
    }

    /// TF-IDF vector of a document; zero weights are never stored.
    pub fn vector(&self, id: &str) -> Option<&BTreeMap<String, f64>> {
        self.vectors.get(id)
    }

    /// Euclidean norm of a document's vector, 0.0 for unknown documents.
    pub fn norm(&self, id: &str) -> f64 {
        self.norms.get(id).copied().unwrap_or(0.0)
    }

    /// `ln(N / df)` for an indexed term, 0.0 for unknown terms.
    pub fn idf(&self, term: &str) -> f64 {
        match self.inverted.get(term) {
            Some(entry) => (self.documents.len() as f64 / f64::from(entry.df)).ln(),
            None => 0.0,
        }
    }

    pub fn anchor_texts(&self, id: &str) -> &[String] {
        self.documents
            .get(id)
            .map(|doc| doc.anchor_texts.as_slice())
            .unwrap_or(&[])
    }
}

fn analyze_document(id: &str, raw: &str, anchors: &[String]) -> Document {
    let plain_text = strip_markup(raw);
    let mut terms: BTreeMap<String, Occurrences> = BTreeMap::new();

    let body = tokenize(&plain_text);
    let token_count = body.len();
    for (term, pos) in body {
        let occ = terms.entry(term).or_insert_with(|| Occurrences {
            tf: 0,
            positions: Vec::new(),
        });
        occ.tf += 1;
        occ.positions.push(pos);
    }

    // Anchor positions continue the body's ordinal sequence with a one-slot
    // gap between text units, so a phrase can never straddle a boundary.
    let mut offset = token_count + 1;
    for anchor in anchors {
        let anchor_terms = tokenize(anchor);
        let emitted = anchor_terms.len();
        for (term, pos) in anchor_terms {
            let occ = terms.entry(term).or_insert_with(|| Occurrences {
                tf: 0,
                positions: Vec::new(),
            });
            occ.tf += 2;
            occ.positions.push(offset + pos);
        }
        offset += emitted + 1;
    }

    Document {
        id: id.to_string(),
        plain_text,
        terms,
        anchor_texts: anchors.to_vec(),
        token_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(docs: &[(&str, &str)]) -> BTreeMap<String, String> {
        docs.iter()
            .map(|(id, text)| (id.to_string(), text.to_string()))
            .collect()
    }

    #[test]
    fn empty_corpus_is_rejected() {
        let err = Index::build(BTreeMap::new(), None).unwrap_err();
        assert!(matches!(err, EngineError::CorpusEmpty));
    }

    #[test]
    fn empty_document_contributes_no_postings() {
        let index = Index::build(corpus(&[("a.html", ""), ("b.html", "cat")]), None).unwrap();
        assert_eq!(index.document_count(), 2);
        assert!(index.document("a.html").unwrap().terms.is_empty());
        assert_eq!(index.term("cat").unwrap().df, 1);
    }

    #[test]
    fn frequency_accounting_matches_token_counts() {
        let mut anchors = AnchorMap::new();
        anchors.insert("a.html".to_string(), vec!["cat fish".to_string()]);
        let index = Index::build(
            corpus(&[("a.html", "cat dog cat")]),
            Some(&anchors),
        )
        .unwrap();

        let doc = index.document("a.html").unwrap();
        let total_tf: u32 = doc.terms.values().map(|occ| occ.tf).sum();
        // 3 body tokens plus 2x the 2 anchor tokens.
        assert_eq!(total_tf, 7);
        assert_eq!(doc.terms["cat"].tf, 4);
        assert_eq!(doc.terms["cat"].positions.len(), 3);
        assert_eq!(doc.terms["fish"].tf, 2);
        assert_eq!(doc.terms["fish"].positions.len(), 1);
    }

    #[test]
    fn anchor_positions_never_touch_body_positions() {
        let mut anchors = AnchorMap::new();
        anchors.insert("a.html".to_string(), vec!["dog".to_string()]);
        let index = Index::build(corpus(&[("a.html", "cat")]), Some(&anchors)).unwrap();

        let doc = index.document("a.html").unwrap();
        // Body "cat" sits at 0; the anchor token must skip position 1.
        assert_eq!(doc.terms["cat"].positions, vec![0]);
        assert_eq!(doc.terms["dog"].positions, vec![2]);
    }

    #[test]
    fn document_frequency_is_bounded() {
        let index = Index::build(
            corpus(&[("a.html", "cat dog"), ("b.html", "dog rat"), ("c.html", "rat cat cat")]),
            None,
        )
        .unwrap();
        let n = index.document_count() as u32;
        for term in ["cat", "dog", "rat"] {
            let df = index.term(term).unwrap().df;
            assert!(df >= 1 && df <= n);
        }
        assert!(index.term("zebra").is_none());
    }

    #[test]
    fn ubiquitous_terms_carry_zero_weight() {
        let index = Index::build(
            corpus(&[("a.html", "cat dog"), ("b.html", "cat rat")]),
            None,
        )
        .unwrap();
        // df(cat) == N, so ln(N/df) == 0 and the weight is not stored.
        assert!(!index.vector("a.html").unwrap().contains_key("cat"));
        assert!(index.vector("a.html").unwrap().contains_key("dog"));
    }

    #[test]
    fn anchors_create_postings_before_df() {
        let mut anchors = AnchorMap::new();
        anchors.insert("a.html".to_string(), vec!["zebra".to_string()]);
        let index = Index::build(
            corpus(&[("a.html", "cat"), ("b.html", "cat zebra")]),
            Some(&anchors),
        )
        .unwrap();
        // The anchor-only occurrence joins the inverted index, so df counts it.
        assert_eq!(index.term("zebra").unwrap().df, 2);
    }
}
