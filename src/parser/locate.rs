use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::rules::Locator;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ANY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("*").unwrap());

/// Resolve a locator against a document. Missing elements, empty text and
/// unparsable selectors all come back as `None`.
pub fn locate(doc: &Html, locator: &Locator) -> Option<String> {
    match locator {
        Locator::Select { css } => {
            let sel = parse(css)?;
            doc.select(&sel).next().and_then(text_of)
        }
        Locator::After { anchor, target } => {
            let anchor = doc.select(&parse(anchor)?).next()?;
            let target = parse(target)?;
            following(doc, anchor)
                .find(|el| target.matches(el))
                .and_then(text_of)
        }
        Locator::Section {
            heading,
            contains,
            container,
            inner,
        } => {
            let heading = doc
                .select(&parse(heading)?)
                .find(|h| h.text().any(|t| t.contains(contains.as_str())))?;
            let container = parse(container)?;
            let inner = parse(inner)?;
            following(doc, heading)
                .find(|el| container.matches(el))?
                .select(&inner)
                .next()
                .and_then(text_of)
        }
    }
}

fn parse(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Elements after `start` in document order (its descendants included).
fn following<'a>(doc: &'a Html, start: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    doc.select(&ANY).skip_while(move |el| el.id() != start.id()).skip(1)
}

/// Trimmed text nodes joined by single spaces; `None` when nothing is left.
pub fn text_of(el: ElementRef) -> Option<String> {
    let joined = el
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let text = WS_RE.replace_all(&joined, " ").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
