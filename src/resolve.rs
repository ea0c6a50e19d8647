use std::sync::OnceLock;

use scraper::{Html, Selector};

use crate::config::PRODUCT_LINK_MARKER;
use crate::download::absolute_url;

/// Phrases the vendor shows on an empty search. Lower-case.
const NO_RESULT_PHRASES: &[&str] = &[
    "no products found",
    "no product found",
    "no results found",
    "nothing found",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResult {
    Found(String),
    /// Page says the search matched nothing.
    NoResults,
    /// No product link and no empty-search notice: markup may have drifted.
    Unrecognized,
}

fn anchor_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").expect("static selector"))
}

fn body_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("body").expect("static selector"))
}

/// Find the first anchor pointing at a product detail page.
pub fn resolve_product_link(rendered: &str) -> SearchResult {
    let doc = Html::parse_document(rendered);

    let href = doc
        .select(anchor_selector())
        .filter_map(|a| a.value().attr("href"))
        .find(|href| href.contains(PRODUCT_LINK_MARKER));

    if let Some(href) = href {
        return SearchResult::Found(absolute_url(href));
    }

    if says_no_results(&doc) {
        SearchResult::NoResults
    } else {
        SearchResult::Unrecognized
    }
}

fn says_no_results(doc: &Html) -> bool {
    let text = match doc.select(body_selector()).next() {
        Some(body) => body.text().collect::<Vec<_>>().join(" "),
        None => return false,
    };
    let text = text.to_lowercase();
    NO_RESULT_PHRASES.iter().any(|p| text.contains(p))
}

/// JS predicate the renderer polls before capturing the page.
pub fn readiness_script() -> String {
    let phrases = NO_RESULT_PHRASES
        .iter()
        .map(|p| format!("'{p}'"))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        r#"(() => {{
            if (document.readyState !== 'complete') return false;
            if (document.querySelector('a[href*="{PRODUCT_LINK_MARKER}"]')) return true;
            const text = (document.body ? document.body.innerText : '').toLowerCase();
            return [{phrases}].some(p => text.includes(p));
        }})()"#
    )
}
