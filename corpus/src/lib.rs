//! Corpus-loader collaborators for the search core: a filesystem accessor
//! over a directory of pre-extracted HTML files, plus hyperlink extraction
//! and target normalization shared by every accessor.

use std::fs;
use std::path::{Path, PathBuf};

use scraper::{Html, Selector};
use sift_core::{CorpusAccessor, EngineError, Link};
use url::Url;
use walkdir::WalkDir;

const SKIP_SCHEMES: [&str; 4] = ["mailto", "javascript", "tel", "ftp"];

/// Corpus accessor over a directory of HTML files. Document ids are
/// root-relative paths with `/` separators, so they double as link targets.
pub struct FsCorpus {
    root: PathBuf,
}

impl FsCorpus {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl CorpusAccessor for FsCorpus {
    fn list_documents(&self) -> Vec<String> {
        let mut ids: Vec<String> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file() && has_html_extension(entry.path()))
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                let segments: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                Some(segments.join("/"))
            })
            .collect();
        ids.sort();
        ids
    }

    fn fetch(&self, id: &str) -> Result<String, EngineError> {
        if Path::new(id).is_absolute() || id.split('/').any(|segment| segment == "..") {
            return Err(EngineError::Unfetchable {
                id: id.to_string(),
                reason: "path escapes corpus root".to_string(),
            });
        }
        let bytes = fs::read(self.root.join(id)).map_err(|err| EngineError::Unfetchable {
            id: id.to_string(),
            reason: err.to_string(),
        })?;
        // Corpora in the wild mix encodings; decode lossily rather than fail.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn extract_links(&self, raw: &str, current: &str) -> Vec<Link> {
        extract_links(raw, current)
    }
}

/// Pull every `<a href>` out of `raw`, pairing the normalized target id with
/// the link's visible text (whitespace-collapsed).
pub fn extract_links(raw: &str, current: &str) -> Vec<Link> {
    let selector = Selector::parse("a").expect("valid selector");
    let dom = Html::parse_document(raw);
    let mut links = Vec::new();
    for a in dom.select(&selector) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Some(target) = normalize_target(href, current) else {
            continue;
        };
        let anchor = a
            .text()
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        links.push(Link { target, anchor });
    }
    links
}

/// Normalize a raw `href` into a document id: strip the fragment, resolve
/// relative references against the referring document, percent-decode, and
/// canonicalize separators. Returns `None` for empty references and
/// non-document schemes. Absolute links out of the corpus keep their full URL
/// and become opaque graph targets.
pub fn normalize_target(href: &str, current: &str) -> Option<String> {
    let href = href.split('#').next().unwrap_or_default();
    if href.is_empty() {
        return None;
    }
    let href = href.replace('\\', "/");

    let base = Url::parse("corpus:///").ok()?.join(current).ok()?;
    let resolved = base.join(&href).ok()?;
    if SKIP_SCHEMES.contains(&resolved.scheme()) {
        return None;
    }
    if resolved.scheme() != "corpus" {
        return Some(resolved.to_string());
    }
    let decoded = urlencoding::decode(resolved.path()).ok()?;
    Some(decoded.trim_start_matches('/').to_string())
}

fn has_html_extension(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref(),
        Some("html") | Some("htm")
    )
}
