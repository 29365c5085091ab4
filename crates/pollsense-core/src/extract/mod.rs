//! Value extraction from raw responses.
//!
//! A [`Locator`] is compiled once into a [`CompiledLocator`] and then applied
//! to every response through a [`ResponseView`]. Extraction never fails from
//! the caller's point of view: a broken locator or a missing value yields
//! `Null`, with the cause logged.

pub mod markup;
pub mod path;
pub mod pattern;

use std::cell::OnceCell;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::{Locator, MatchSelection, ValueKind};
use crate::response::{decode_json, RawResponse};

pub use path::{extract_path, parse_path, Segment};
pub use pattern::{all_matches, first_match};

/// Why a locator could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid selector '{0}': {1}")]
    InvalidSelector(String, String),

    #[error("invalid pattern '{0}': {1}")]
    InvalidPattern(String, String),
}

/// Extracted value plus diagnostic attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// `Null` when nothing was found
    pub value: Value,
    /// Extra attributes describing the match, such as `outer_html`
    pub diagnostics: Map<String, Value>,
}

impl Extraction {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            diagnostics: Map::new(),
        }
    }

    pub fn null() -> Self {
        Self::default()
    }
}

/// A response with lazily built interpretations.
///
/// The HTML document and the fallback JSON decode are produced on first use
/// and shared by every rule applied to the same view.
pub struct ResponseView<'a> {
    response: &'a RawResponse,
    document: OnceCell<Html>,
    decoded: OnceCell<Option<Value>>,
}

impl<'a> ResponseView<'a> {
    pub fn new(response: &'a RawResponse) -> Self {
        Self {
            response,
            document: OnceCell::new(),
            decoded: OnceCell::new(),
        }
    }

    pub fn response(&self) -> &'a RawResponse {
        self.response
    }

    pub fn text(&self) -> &str {
        &self.response.text
    }

    /// The decoded body. Decoded on demand when the response itself was not
    /// fetched in structured mode.
    pub fn json(&self) -> Option<&Value> {
        if let Some(json) = &self.response.json {
            return Some(json);
        }
        self.decoded
            .get_or_init(|| decode_json(&self.response.text))
            .as_ref()
    }

    pub fn document(&self) -> &Html {
        self.document
            .get_or_init(|| Html::parse_document(&self.response.text))
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Structured(Vec<Segment>),
    /// `None` selects the raw body
    Markup(Option<Selector>, ValueKind),
    /// `None` selects the raw body
    Text(Option<Regex>, usize, MatchSelection),
}

/// A locator with its path, selector or pattern parsed ahead of time.
#[derive(Debug, Clone)]
pub struct CompiledLocator {
    compiled: std::result::Result<Compiled, LocatorError>,
}

impl CompiledLocator {
    pub fn compile(locator: &Locator) -> Self {
        let compiled = match locator {
            Locator::Structured { path } => parse_path(path).map(Compiled::Structured),
            Locator::Markup { selector, kind } => {
                if selector.trim().is_empty() {
                    Ok(Compiled::Markup(None, kind.clone()))
                } else {
                    markup::parse_selector(selector)
                        .map(|s| Compiled::Markup(Some(s), kind.clone()))
                }
            }
            Locator::Text {
                pattern,
                group,
                select,
            } => {
                if pattern.is_empty() {
                    Ok(Compiled::Text(None, *group, *select))
                } else {
                    pattern::compile(pattern).map(|re| Compiled::Text(Some(re), *group, *select))
                }
            }
        };
        Self { compiled }
    }

    /// The compile error, if the locator is unusable.
    pub fn error(&self) -> Option<&LocatorError> {
        self.compiled.as_ref().err()
    }

    pub fn extract(&self, view: &ResponseView<'_>) -> Extraction {
        let compiled = match &self.compiled {
            Ok(compiled) => compiled,
            Err(e) => {
                debug!("skipping unusable locator: {}", e);
                return Extraction::null();
            }
        };

        match compiled {
            Compiled::Structured(segments) => match view.json() {
                Some(root) => {
                    let value = path::lookup(root, segments).cloned();
                    if value.is_none() {
                        trace!("path matched nothing");
                    }
                    Extraction::value(value.unwrap_or(Value::Null))
                }
                None => {
                    debug!("no decoded body for structured lookup");
                    Extraction::null()
                }
            },
            Compiled::Markup(None, _) | Compiled::Text(None, _, _) => {
                Extraction::value(Value::String(view.text().to_string()))
            }
            Compiled::Markup(Some(selector), kind) => {
                match view.document().select(selector).next() {
                    Some(element) => {
                        let mut extraction = Extraction::value(
                            markup::element_value(&element, kind)
                                .map(Value::String)
                                .unwrap_or(Value::Null),
                        );
                        extraction
                            .diagnostics
                            .insert("outer_html".to_string(), Value::String(element.html()));
                        extraction
                    }
                    None => {
                        trace!("selector matched nothing");
                        Extraction::null()
                    }
                }
            }
            Compiled::Text(Some(regex), group, select) => {
                Extraction::value(pattern::select_matches(regex, view.text(), *group, *select))
            }
        }
    }
}

/// Apply `locator` to `response` in one step.
pub fn extract(locator: &Locator, response: &RawResponse) -> Extraction {
    CompiledLocator::compile(locator).extract(&ResponseView::new(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResponseMode;
    use serde_json::json;

    fn structured(body: &str) -> RawResponse {
        RawResponse::new(200, body).decoded_for(ResponseMode::Structured)
    }

    #[test]
    fn test_structured_extraction() {
        let response = structured(r#"{"data":{"temp":21.5}}"#);
        assert_eq!(
            extract(&Locator::structured("data.temp"), &response).value,
            json!(21.5)
        );
        assert_eq!(
            extract(&Locator::structured("data.humidity"), &response).value,
            Value::Null
        );
    }

    #[test]
    fn test_structured_undecodable_body_is_null() {
        let response = structured("not json");
        assert_eq!(extract(&Locator::structured(""), &response).value, Value::Null);
    }

    #[test]
    fn test_invalid_locators_are_null() {
        let response = structured(r#"{"a":1}"#);
        assert_eq!(extract(&Locator::structured("a..b"), &response).value, Value::Null);

        let compiled = CompiledLocator::compile(&Locator::text("(", 1));
        assert!(compiled.error().is_some());
        let raw = RawResponse::new(200, "(");
        assert_eq!(compiled.extract(&ResponseView::new(&raw)).value, Value::Null);

        let response = RawResponse::new(200, "<p>x</p>");
        assert_eq!(
            extract(&Locator::markup("p[[", ValueKind::Text), &response).value,
            Value::Null
        );
    }

    #[test]
    fn test_markup_attribute_with_outer_html() {
        let response = RawResponse::new(200, r#"<span class="price" data-value="9.99">$9.99</span>"#);
        let extraction = extract(
            &Locator::markup("span.price", ValueKind::Attribute("data-value".into())),
            &response,
        );
        assert_eq!(extraction.value, json!("9.99"));
        assert_eq!(
            extraction.diagnostics["outer_html"],
            json!(r#"<span class="price" data-value="9.99">$9.99</span>"#)
        );
    }

    #[test]
    fn test_markup_no_match_has_no_diagnostics() {
        let response = RawResponse::new(200, "<p>x</p>");
        let extraction = extract(&Locator::markup("div", ValueKind::Text), &response);
        assert_eq!(extraction, Extraction::null());
    }

    #[test]
    fn test_empty_selector_and_pattern_return_raw_text() {
        let response = RawResponse::new(200, "  raw body\n");
        assert_eq!(
            extract(&Locator::markup("", ValueKind::Text), &response).value,
            json!("  raw body\n")
        );
        assert_eq!(
            extract(&Locator::text("", 1), &response).value,
            json!("  raw body\n")
        );
    }

    #[test]
    fn test_text_selection() {
        let response = RawResponse::new(200, "price: 42 price: 43");
        let locator = Locator::Text {
            pattern: r"price:\s*(\d+)".to_string(),
            group: 1,
            select: MatchSelection::All,
        };
        assert_eq!(extract(&locator, &response).value, json!(["42", "43"]));
        assert_eq!(
            extract(&Locator::text(r"price:\s*(\d+)", 1), &response).value,
            json!("42")
        );
    }

    #[test]
    fn test_view_decodes_json_on_demand() {
        let response = RawResponse::new(200, r#"{"ok":true}"#);
        assert!(response.json.is_none());
        let view = ResponseView::new(&response);
        let extraction = CompiledLocator::compile(&Locator::structured("ok")).extract(&view);
        assert_eq!(extraction.value, json!(true));
    }
}
