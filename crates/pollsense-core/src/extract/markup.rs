//! CSS selector lookup over HTML documents.
//!
//! Uses the scraper crate. Only the first matching element (in document
//! order) is considered.

use scraper::{ElementRef, Html, Selector};

use super::LocatorError;
use crate::config::ValueKind;

/// What was read from the first element matching a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupMatch {
    /// Value selected by the [`ValueKind`]; `None` when the attribute is absent
    pub value: Option<String>,
    /// Complete serialized element, including its own tag
    pub outer_html: String,
}

/// Parse a selector, mapping scraper's error into a locator error.
pub fn parse_selector(selector: &str) -> Result<Selector, LocatorError> {
    Selector::parse(selector)
        .map_err(|e| LocatorError::InvalidSelector(selector.to_string(), e.to_string()))
}

/// Read a value from an element.
pub fn element_value(element: &ElementRef<'_>, kind: &ValueKind) -> Option<String> {
    match kind {
        ValueKind::Text => Some(element.text().collect::<String>().trim().to_string()),
        ValueKind::Attribute(name) => element.value().attr(name).map(String::from),
        ValueKind::InnerMarkup => Some(element.inner_html()),
    }
}

/// Select the first element matching `selector` in an already parsed document.
///
/// Returns `Ok(None)` when nothing matches.
pub fn select_first(
    document: &Html,
    selector: &str,
    kind: &ValueKind,
) -> Result<Option<MarkupMatch>, LocatorError> {
    let selector = parse_selector(selector)?;

    Ok(document.select(&selector).next().map(|element| MarkupMatch {
        value: element_value(&element, kind),
        outer_html: element.html(),
    }))
}

/// Parse `html` and select the first element matching `selector`.
pub fn extract_markup(
    html: &str,
    selector: &str,
    kind: &ValueKind,
) -> Result<Option<MarkupMatch>, LocatorError> {
    let document = Html::parse_document(html);
    select_first(&document, selector, kind)
}
