use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Node};

lazy_static! {
    static ref TERM_RE: Regex = Regex::new(r"[A-Za-z]+").expect("valid regex");
}

/// Extract the rendered text of an HTML document, dropping tags, attributes,
/// comments, and the bodies of `script`/`style` elements. Malformed markup is
/// recovered by the parser and treated as text, never an error.
pub fn strip_markup(html: &str) -> String {
    let dom = Html::parse_document(html);
    let mut out = String::new();
    let mut stack = vec![dom.tree.root()];
    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Text(text) => {
                out.push_str(&text.text);
                out.push(' ');
            }
            Node::Element(el) if matches!(el.name(), "script" | "style") => continue,
            _ => {}
        }
        let children: Vec<_> = node.children().collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    out
}

/// Split text into lowercase alphabetic terms with their ordinal positions.
///
/// Every maximal run of ASCII letters becomes one term; digits and
/// punctuation only separate runs and are never part of a term. Positions
/// are 0-based and advance once per emitted term.
pub fn tokenize(text: &str) -> Vec<(String, usize)> {
    TERM_RE
        .find_iter(text)
        .enumerate()
        .map(|(pos, m)| (m.as_str().to_lowercase(), pos))
        .collect()
}

/// Tokenize the rendered text of an HTML document.
pub fn tokenize_html(html: &str) -> Vec<(String, usize)> {
    tokenize(&strip_markup(html))
}
