use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};

use crate::config::BRAND_PREFIX;

// -------------------------
// Heuristic tuning
// -------------------------

/// Icons, logos and spinners. Product photos are jpg/webp.
const EXCLUDED_EXTENSIONS: &[&str] = &[".svg", ".png", ".gif"];
const MIN_ALT_LEN: usize = 5;
const MIN_HEADING_LEN: usize = 10;
/// Site navigation headings that are never a product name.
const HEADING_STOPLIST: &[&str] = &[
    "About Us",
    "Products",
    "News",
    "Distributions",
    "Contact",
    "Home",
    "Search",
    "Welcome",
    "Brands",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Raw `src` of the chosen image, not yet absolutized.
    pub image_src: String,
    pub display_name: String,
    pub name_source: NameSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    ImageAlt,
    Heading,
    Generated,
}

fn img_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("img").expect("static selector"))
}

fn heading_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("h1, h2, h3, h4").expect("static selector"))
}

/// Pick the product image and a display name from a detail page.
///
/// `None` when no image survives the extension filter, even if a heading
/// would have given a usable name.
pub fn extract(html: &str, product_code: &str) -> Option<Extraction> {
    let doc = Html::parse_document(html);
    let img = select_image(&doc)?;
    let image_src = img.value().attr("src").unwrap_or_default().to_string();
    let (display_name, name_source) = derive_name(&doc, &img, product_code);

    Some(Extraction {
        image_src,
        display_name,
        name_source,
    })
}

/// Longest `src` wins; earlier images win ties.
fn select_image<'a>(doc: &'a Html) -> Option<ElementRef<'a>> {
    let mut best: Option<(usize, ElementRef<'a>)> = None;
    for img in doc.select(img_selector()) {
        let src = img.value().attr("src").unwrap_or_default();
        if src.is_empty() || has_excluded_extension(src) {
            continue;
        }
        let len = src.chars().count();
        if best.as_ref().is_none_or(|(l, _)| len > *l) {
            best = Some((len, img));
        }
    }
    best.map(|(_, img)| img)
}

fn has_excluded_extension(src: &str) -> bool {
    let lower = src.to_ascii_lowercase();
    EXCLUDED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn derive_name(doc: &Html, img: &ElementRef<'_>, product_code: &str) -> (String, NameSource) {
    let alt = img.value().attr("alt").unwrap_or_default().trim();
    if alt.chars().count() > MIN_ALT_LEN {
        return (alt.to_string(), NameSource::ImageAlt);
    }

    let mut longest = String::new();
    for h in doc.select(heading_selector()) {
        let text = heading_text(&h);
        let len = text.chars().count();
        if len > MIN_HEADING_LEN && len > longest.chars().count() && !is_stoplisted(&text) {
            longest = text;
        }
    }
    if !longest.is_empty() {
        return (longest, NameSource::Heading);
    }

    (format!("{BRAND_PREFIX} {product_code}"), NameSource::Generated)
}

fn heading_text(h: &ElementRef<'_>) -> String {
    h.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_stoplisted(text: &str) -> bool {
    HEADING_STOPLIST
        .iter()
        .any(|term| term.eq_ignore_ascii_case(text))
}
