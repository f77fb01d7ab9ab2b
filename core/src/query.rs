use std::collections::{BTreeMap, BTreeSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::index::{Index, TermEntry};
use crate::tokenizer::tokenize;

/// Prefix selecting the original exact-lookup mode, kept for backward
/// compatibility.
pub const LEGACY_MARKER: char = '!';

lazy_static! {
    static ref PHRASE_RE: Regex = Regex::new(r#""([^"]+)""#).expect("valid regex");
}

/// A classified query, dispatched by pattern match after a single
/// classification step.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Phrase(Vec<String>),
    Boolean(BoolExpr),
    Legacy(Vec<String>),
    Vector(Vec<String>),
}

/// Boolean connective tree. `or` binds loosest; `and` and `but` fold
/// left-to-right at equal precedence.
#[derive(Debug, Clone, PartialEq)]
pub enum BoolExpr {
    Term(String),
    And(Box<BoolExpr>, Box<BoolExpr>),
    Or(Box<BoolExpr>, Box<BoolExpr>),
    /// `a but b`: documents containing `a` and not `b`.
    Not(Box<BoolExpr>, Box<BoolExpr>),
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    /// Cosine similarity for vector queries, 0.0 for unranked modes.
    pub score: f64,
    pub anchor_texts: Vec<String>,
}

/// Classify a raw query string into one of the four query modes.
///
/// Priority order: quoted phrase, boolean connectors, the legacy marker,
/// then free-text vector retrieval.
pub fn classify(text: &str) -> Query {
    let text = text.trim();

    if let Some(captures) = PHRASE_RE.captures(text) {
        let terms = tokenize(&captures[1]).into_iter().map(|(t, _)| t).collect();
        return Query::Phrase(terms);
    }

    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if words.iter().any(|w| matches!(*w, "and" | "or" | "but")) {
        if let Some(expr) = parse_boolean(&words) {
            return Query::Boolean(expr);
        }
    }

    if let Some(rest) = text.strip_prefix(LEGACY_MARKER) {
        let terms = rest.split_whitespace().map(str::to_lowercase).collect();
        return Query::Legacy(terms);
    }

    Query::Vector(tokenize(text).into_iter().map(|(t, _)| t).collect())
}

/// Evaluate a query string against a built index.
///
/// Unranked modes (phrase, boolean, legacy) order hits by ascending document
/// id with score 0.0; vector queries rank by descending cosine similarity,
/// ties broken by ascending id. An empty query yields an empty result, and an
/// unknown term is an empty set, never an error.
pub fn search(index: &Index, text: &str) -> Vec<SearchHit> {
    match classify(text) {
        Query::Phrase(terms) => eval_phrase(index, &terms),
        Query::Boolean(expr) => docs_to_hits(index, eval_boolean(index, &expr)),
        Query::Legacy(terms) => eval_legacy(index, &terms),
        Query::Vector(terms) => eval_vector(index, &terms),
    }
}

fn parse_boolean(words: &[&str]) -> Option<BoolExpr> {
    // Split on "or" first so it binds loosest, then fold each side over
    // and/but left-to-right.
    let mut disjuncts = Vec::new();
    for group in words.split(|w| *w == "or") {
        if let Some(conj) = parse_conjunction(group) {
            disjuncts.push(conj);
        }
    }
    disjuncts
        .into_iter()
        .reduce(|lhs, rhs| BoolExpr::Or(Box::new(lhs), Box::new(rhs)))
}

fn parse_conjunction(words: &[&str]) -> Option<BoolExpr> {
    let mut expr: Option<BoolExpr> = None;
    let mut pending = "and";
    for &word in words {
        match word {
            "and" | "but" => pending = word,
            term => {
                let rhs = BoolExpr::Term(term.to_string());
                expr = Some(match expr.take() {
                    None => rhs,
                    Some(lhs) if pending == "but" => BoolExpr::Not(Box::new(lhs), Box::new(rhs)),
                    Some(lhs) => BoolExpr::And(Box::new(lhs), Box::new(rhs)),
                });
                pending = "and";
            }
        }
    }
    expr
}

fn eval_boolean<'a>(index: &'a Index, expr: &BoolExpr) -> BTreeSet<&'a str> {
    match expr {
        BoolExpr::Term(term) => term_docs(index, term),
        BoolExpr::And(lhs, rhs) => {
            let left = eval_boolean(index, lhs);
            let right = eval_boolean(index, rhs);
            left.intersection(&right).copied().collect()
        }
        BoolExpr::Or(lhs, rhs) => {
            let left = eval_boolean(index, lhs);
            let right = eval_boolean(index, rhs);
            left.union(&right).copied().collect()
        }
        BoolExpr::Not(lhs, rhs) => {
            let left = eval_boolean(index, lhs);
            let right = eval_boolean(index, rhs);
            left.difference(&right).copied().collect()
        }
    }
}

fn term_docs<'a>(index: &'a Index, term: &str) -> BTreeSet<&'a str> {
    index
        .term(term)
        .map(|entry| entry.postings.keys().map(String::as_str).collect())
        .unwrap_or_default()
}

fn docs_to_hits(index: &Index, docs: BTreeSet<&str>) -> Vec<SearchHit> {
    docs.into_iter()
        .map(|id| SearchHit {
            doc_id: id.to_string(),
            score: 0.0,
            anchor_texts: index.anchor_texts(id).to_vec(),
        })
        .collect()
}

fn eval_phrase(index: &Index, terms: &[String]) -> Vec<SearchHit> {
    if terms.is_empty() {
        return Vec::new();
    }
    let entries: Option<Vec<&TermEntry>> = terms.iter().map(|t| index.term(t)).collect();
    let Some(entries) = entries else {
        return Vec::new();
    };

    let mut candidates: BTreeSet<&str> = entries[0].postings.keys().map(String::as_str).collect();
    for entry in &entries[1..] {
        let docs: BTreeSet<&str> = entry.postings.keys().map(String::as_str).collect();
        candidates = candidates.intersection(&docs).copied().collect();
    }

    let mut hits = Vec::new();
    for doc in candidates {
        let positions: Vec<&[usize]> = entries
            .iter()
            .map(|entry| entry.postings[doc].positions.as_slice())
            .collect();
        let matched = positions[0].iter().any(|&start| {
            positions[1..]
                .iter()
                .enumerate()
                .all(|(i, list)| list.binary_search(&(start + i + 1)).is_ok())
        });
        if matched {
            hits.push(SearchHit {
                doc_id: doc.to_string(),
                score: 0.0,
                anchor_texts: index.anchor_texts(doc).to_vec(),
            });
        }
    }
    hits
}

fn eval_legacy(index: &Index, terms: &[String]) -> Vec<SearchHit> {
    if terms.is_empty() {
        return Vec::new();
    }
    index
        .documents()
        .filter(|doc| terms.iter().all(|term| doc.terms.contains_key(term)))
        .map(|doc| SearchHit {
            doc_id: doc.id.clone(),
            score: 0.0,
            anchor_texts: doc.anchor_texts.clone(),
        })
        .collect()
}

fn eval_vector(index: &Index, terms: &[String]) -> Vec<SearchHit> {
    if terms.is_empty() {
        return Vec::new();
    }

    let mut query_tf: BTreeMap<&str, u32> = BTreeMap::new();
    for term in terms {
        *query_tf.entry(term.as_str()).or_insert(0) += 1;
    }

    // Query weight is query-term frequency times the index's IDF; terms the
    // index has never seen carry zero weight everywhere.
    let mut query_weights: BTreeMap<&str, f64> = BTreeMap::new();
    let mut query_norm_sq = 0.0f64;
    for (&term, &tf) in &query_tf {
        let weight = f64::from(tf) * index.idf(term);
        if weight > 0.0 {
            query_norm_sq += weight * weight;
            query_weights.insert(term, weight);
        }
    }
    if query_weights.is_empty() {
        return Vec::new();
    }
    let query_norm = query_norm_sq.sqrt();

    let mut candidates: BTreeSet<&str> = BTreeSet::new();
    for term in query_weights.keys() {
        if let Some(entry) = index.term(term) {
            candidates.extend(entry.postings.keys().map(String::as_str));
        }
    }

    let mut hits = Vec::new();
    for doc in candidates {
        let norm = index.norm(doc);
        if norm == 0.0 {
            continue;
        }
        let Some(vector) = index.vector(doc) else {
            continue;
        };
        let dot: f64 = query_weights
            .iter()
            .filter_map(|(term, qw)| vector.get(*term).map(|dw| qw * dw))
            .sum();
        if dot > 0.0 {
            hits.push(SearchHit {
                doc_id: doc.to_string(),
                score: dot / (query_norm * norm),
                anchor_texts: index.anchor_texts(doc).to_vec(),
            });
        }
    }
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn tiny_index() -> Index {
        let docs: Map<String, String> = [
            ("a.html", "cat dog"),
            ("b.html", "dog rat"),
            ("c.html", "rat cat cat"),
        ]
        .into_iter()
        .map(|(id, text)| (id.to_string(), text.to_string()))
        .collect();
        Index::build(docs, None).unwrap()
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.doc_id.as_str()).collect()
    }

    #[test]
    fn classification_priority() {
        assert!(matches!(classify("\"cat dog\""), Query::Phrase(_)));
        assert!(matches!(classify("cat and dog"), Query::Boolean(_)));
        assert!(matches!(classify("!cat"), Query::Legacy(_)));
        assert!(matches!(classify("cat dog"), Query::Vector(_)));
        // A quoted span wins even when connectors are present.
        assert!(matches!(classify("\"cat and dog\""), Query::Phrase(_)));
    }

    #[test]
    fn empty_query_is_empty_result() {
        let index = tiny_index();
        assert!(search(&index, "").is_empty());
        assert!(search(&index, "   ").is_empty());
    }

    #[test]
    fn boolean_and_intersects() {
        let index = tiny_index();
        assert_eq!(ids(&search(&index, "cat and dog")), vec!["a.html"]);
    }

    #[test]
    fn boolean_or_unions() {
        let index = tiny_index();
        assert_eq!(
            ids(&search(&index, "cat or dog")),
            vec!["a.html", "b.html", "c.html"]
        );
    }

    #[test]
    fn boolean_but_subtracts() {
        let index = tiny_index();
        assert_eq!(ids(&search(&index, "cat but dog")), vec!["c.html"]);
    }

    #[test]
    fn or_binds_loosest() {
        // rat or rat and dog == rat OR (rat AND dog), not (rat OR rat) AND dog.
        let index = tiny_index();
        assert_eq!(
            ids(&search(&index, "rat or rat and dog")),
            vec!["b.html", "c.html"]
        );
    }

    #[test]
    fn unknown_boolean_term_is_empty_set() {
        let index = tiny_index();
        assert!(search(&index, "zebra and cat").is_empty());
        assert_eq!(
            ids(&search(&index, "zebra or cat")),
            vec!["a.html", "c.html"]
        );
    }

    #[test]
    fn phrase_requires_adjacency() {
        let index = tiny_index();
        assert!(search(&index, "\"rat cat\"").is_empty());
        assert_eq!(ids(&search(&index, "\"cat cat\"")), vec!["c.html"]);
        assert_eq!(ids(&search(&index, "\"cat dog\"")), vec!["a.html"]);
    }

    #[test]
    fn phrase_with_unknown_term_is_empty() {
        let index = tiny_index();
        assert!(search(&index, "\"cat zebra\"").is_empty());
    }

    #[test]
    fn legacy_matches_all_terms_unranked() {
        let index = tiny_index();
        let hits = search(&index, "!cat rat");
        assert_eq!(ids(&hits), vec!["c.html"]);
        assert_eq!(hits[0].score, 0.0);
        assert_eq!(ids(&search(&index, "!DOG")), vec!["a.html", "b.html"]);
    }

    #[test]
    fn vector_ranks_by_similarity() {
        let index = tiny_index();
        let hits = search(&index, "rat");
        assert_eq!(ids(&hits), vec!["b.html", "c.html"]);
        assert!(hits[0].score >= hits[1].score);
        assert!(hits.iter().all(|h| h.score > 0.0));
    }

    #[test]
    fn vector_excludes_zero_similarity() {
        let index = tiny_index();
        let hits = search(&index, "zebra");
        assert!(hits.is_empty());
    }
}
