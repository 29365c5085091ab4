//! Serde records mirroring the TOML file, before validation.
//!
//! Locator fields are flat in the file (`path`, `selector`, `pattern`, ...)
//! and are resolved against the effective mode into a typed [`Locator`].
//! Field names of the original flow (`json_path`, `html_selector`,
//! `html_attr`, `text_regex`, `text_group`) are accepted as aliases.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::defaults;
use super::{
    AttributeRule, FetchConfig, FetchTarget, HttpMethod, Locator, MatchSelection, PollsenseConfig,
    RequestBody, ResponseMode, SensorRule, ValueKind,
};
use crate::error::{PollError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    #[serde(default)]
    pub targets: Vec<RawTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTarget {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default, alias = "response_type")]
    pub mode: Option<ResponseMode>,
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub body: Option<Value>,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub verify_ssl: Option<bool>,
    /// Seconds
    #[serde(default)]
    pub scan_interval: Option<u64>,
    #[serde(default)]
    pub sensors: Vec<RawSensor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSensor {
    pub name: String,
    #[serde(flatten)]
    pub locator: RawLocator,
    #[serde(default)]
    pub value_template: Option<String>,
    #[serde(default)]
    pub attr_template: Option<Value>,
    #[serde(default)]
    pub attributes: Vec<RawAttribute>,
    #[serde(default, alias = "unit_of_measurement")]
    pub unit: Option<String>,
    #[serde(default)]
    pub keep_last_value: bool,
    #[serde(default)]
    pub keep_last_attributes: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAttribute {
    pub key: String,
    /// Overrides the target mode for this attribute only
    #[serde(default, alias = "response_type")]
    pub mode: Option<ResponseMode>,
    #[serde(flatten)]
    pub locator: RawLocator,
    #[serde(default)]
    pub value_template: Option<String>,
}

/// `select = "first" | "all" | <index>`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawSelect {
    Index(usize),
    Keyword(String),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawLocator {
    #[serde(default, alias = "json_path")]
    pub path: Option<String>,
    #[serde(default, alias = "html_selector")]
    pub selector: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default, alias = "html_attr")]
    pub attr: Option<String>,
    #[serde(default, alias = "text_regex")]
    pub pattern: Option<String>,
    #[serde(default, alias = "text_group")]
    pub group: Option<usize>,
    #[serde(default)]
    pub select: Option<RawSelect>,
}

impl RawLocator {
    /// Resolve into a typed locator for `mode`, rejecting fields of other modes.
    pub fn resolve(self, mode: ResponseMode, owner: &str) -> Result<Locator> {
        let foreign = |field: &str| {
            PollError::Configuration(format!(
                "{}: field '{}' does not apply to {} mode",
                owner, field, mode
            ))
        };

        match mode {
            ResponseMode::Structured => {
                if self.selector.is_some() {
                    return Err(foreign("selector"));
                }
                if self.pattern.is_some() {
                    return Err(foreign("pattern"));
                }
                Ok(Locator::Structured {
                    path: self.path.unwrap_or_default(),
                })
            }
            ResponseMode::Markup => {
                if self.path.is_some() {
                    return Err(foreign("path"));
                }
                if self.pattern.is_some() {
                    return Err(foreign("pattern"));
                }
                let kind = resolve_kind(self.kind.as_deref(), self.attr, owner)?;
                Ok(Locator::Markup {
                    selector: self.selector.unwrap_or_default(),
                    kind,
                })
            }
            ResponseMode::Text => {
                if self.path.is_some() {
                    return Err(foreign("path"));
                }
                if self.selector.is_some() {
                    return Err(foreign("selector"));
                }
                let select = match self.select {
                    None => MatchSelection::First,
                    Some(RawSelect::Index(n)) => MatchSelection::Nth(n),
                    Some(RawSelect::Keyword(k)) => match k.trim().to_ascii_lowercase().as_str() {
                        "first" => MatchSelection::First,
                        "all" => MatchSelection::All,
                        other => {
                            return Err(PollError::Configuration(format!(
                                "{}: unknown select '{}', expected first, all or an index",
                                owner, other
                            )));
                        }
                    },
                };
                Ok(Locator::Text {
                    pattern: self.pattern.unwrap_or_default(),
                    group: self.group.unwrap_or(defaults::DEFAULT_TEXT_GROUP),
                    select,
                })
            }
        }
    }
}

/// `kind` wins when present; otherwise `attr = "text"` (or nothing) means
/// text content and any other `attr` names an attribute.
fn resolve_kind(kind: Option<&str>, attr: Option<String>, owner: &str) -> Result<ValueKind> {
    match kind.map(|k| k.trim().to_ascii_lowercase()) {
        None => Ok(match attr {
            None => ValueKind::Text,
            Some(a) if a.trim().is_empty() || a.eq_ignore_ascii_case("text") => ValueKind::Text,
            Some(a) => ValueKind::Attribute(a),
        }),
        Some(k) => match k.as_str() {
            "text" => Ok(ValueKind::Text),
            "html" | "inner_html" | "inner" => Ok(ValueKind::InnerMarkup),
            "attribute" | "attr" => match attr {
                Some(a) if !a.trim().is_empty() => Ok(ValueKind::Attribute(a)),
                _ => Err(PollError::Configuration(format!(
                    "{}: kind 'attribute' needs an 'attr' name",
                    owner
                ))),
            },
            other => Err(PollError::Configuration(format!(
                "{}: unknown kind '{}', expected text, attribute or html",
                owner, other
            ))),
        },
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_map(map: BTreeMap<String, Value>, what: &str, owner: &str) -> Result<BTreeMap<String, String>> {
    map.into_iter()
        .map(|(key, value)| match scalar_to_string(&value) {
            Some(s) => Ok((key, s)),
            None => Err(PollError::Configuration(format!(
                "{}: {} '{}' must be a string, number or boolean",
                owner, what, key
            ))),
        })
        .collect()
}

fn attr_template(value: Value, owner: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::String(source) => match serde_json::from_str::<Value>(&source) {
            Ok(Value::Object(map)) => Ok(map),
            _ => Err(PollError::Configuration(format!(
                "{}: attr_template must be a table or a JSON object",
                owner
            ))),
        },
        _ => Err(PollError::Configuration(format!(
            "{}: attr_template must be a table or a JSON object",
            owner
        ))),
    }
}

impl RawSensor {
    fn into_rule(self, mode: ResponseMode, target: &str) -> Result<SensorRule> {
        let owner = format!("target '{}' sensor '{}'", target, self.name);
        let locator = self.locator.resolve(mode, &owner)?;

        let attributes = self
            .attributes
            .into_iter()
            .map(|attribute| {
                let owner = format!("{} attribute '{}'", owner, attribute.key);
                // Attributes inherit the target mode unless they override it.
                let mode = attribute.mode.unwrap_or(mode);
                Ok(AttributeRule {
                    locator: attribute.locator.resolve(mode, &owner)?,
                    key: attribute.key,
                    value_template: attribute.value_template.filter(|t| !t.trim().is_empty()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let attr_template = self
            .attr_template
            .map(|value| attr_template(value, &owner))
            .transpose()?;

        Ok(SensorRule {
            name: self.name,
            locator,
            value_template: self.value_template.filter(|t| !t.trim().is_empty()),
            attr_template,
            attributes,
            unit: self.unit.filter(|u| !u.trim().is_empty()),
            keep_last_value: self.keep_last_value,
            keep_last_attributes: self.keep_last_attributes,
        })
    }
}

impl RawTarget {
    pub fn into_target(self) -> Result<FetchTarget> {
        let owner = format!("target '{}'", self.name);
        let mode = self.mode.unwrap_or_default();
        let method = match &self.method {
            Some(m) => m.parse::<HttpMethod>()?,
            None => HttpMethod::default(),
        };

        let body = match self.body {
            None => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(RequestBody::Raw(s)),
            Some(other) => Some(RequestBody::Json(other)),
        };

        let mut config = FetchConfig::new(self.name.clone(), self.url)
            .with_method(method)
            .with_mode(mode)
            .with_timeout(Duration::from_secs(
                self.timeout.unwrap_or(defaults::DEFAULT_TIMEOUT_SECS),
            ))
            .with_verify_ssl(self.verify_ssl.unwrap_or(defaults::DEFAULT_VERIFY_SSL))
            .with_scan_interval(Duration::from_secs(
                self.scan_interval.unwrap_or(defaults::DEFAULT_SCAN_INTERVAL_SECS),
            ));
        config.headers = string_map(self.headers, "header", &owner)?;
        config.params = string_map(self.params, "param", &owner)?;
        config.body = body;

        let sensors = self
            .sensors
            .into_iter()
            .map(|sensor| sensor.into_rule(mode, &self.name))
            .collect::<Result<Vec<_>>>()?;

        Ok(FetchTarget { config, sensors })
    }
}

impl RawConfig {
    pub fn into_config(self) -> Result<PollsenseConfig> {
        let targets = self
            .targets
            .into_iter()
            .map(RawTarget::into_target)
            .collect::<Result<Vec<_>>>()?;
        Ok(PollsenseConfig { targets })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use serde_json::json;

    #[test]
    fn test_parse_structured_target() {
        let config = parse_config(
            r#"
            [[targets]]
            name = "weather"
            url = "http://localhost:8080/api"
            method = "post"
            scan_interval = 30
            headers = { Authorization = "Bearer abc" }
            params = { units = "metric", limit = 5 }
            body = { query = "now" }

            [[targets.sensors]]
            name = "temperature"
            path = "data.temp"
            unit = "°C"
            keep_last_value = true
            attr_template = { source = "{{ status }}", fixed = 3 }
            "#,
        )
        .unwrap();

        let target = &config.targets[0];
        assert_eq!(target.config.method, HttpMethod::Post);
        assert_eq!(target.config.scan_interval, Duration::from_secs(30));
        assert_eq!(target.config.params.get("limit").unwrap(), "5");
        assert_eq!(
            target.config.body,
            Some(RequestBody::Json(json!({"query": "now"})))
        );

        let sensor = &target.sensors[0];
        assert_eq!(sensor.locator, Locator::structured("data.temp"));
        assert_eq!(sensor.unit.as_deref(), Some("°C"));
        assert!(sensor.keep_last_value);
        assert!(!sensor.keep_last_attributes);
        let template = sensor.attr_template.as_ref().unwrap();
        assert_eq!(template.get("fixed"), Some(&json!(3)));
    }

    #[test]
    fn test_parse_original_field_names() {
        let config = parse_config(
            r#"
            [[targets]]
            name = "shop"
            url = "https://shop.example.com/item"
            response_type = "html"

            [[targets.sensors]]
            name = "price"
            html_selector = "span.price"
            html_attr = "data-value"
            "#,
        )
        .unwrap();

        let sensor = &config.targets[0].sensors[0];
        assert_eq!(config.targets[0].config.mode, ResponseMode::Markup);
        assert_eq!(
            sensor.locator,
            Locator::markup("span.price", ValueKind::Attribute("data-value".to_string()))
        );
    }

    #[test]
    fn test_text_defaults_and_selection() {
        let config = parse_config(
            r#"
            [[targets]]
            name = "status"
            url = "http://localhost/status"
            mode = "text"

            [[targets.sensors]]
            name = "first"
            pattern = 'price:\s*(\d+)'

            [[targets.sensors]]
            name = "all"
            pattern = 'price:\s*(\d+)'
            select = "all"

            [[targets.sensors]]
            name = "second"
            pattern = 'price:\s*(\d+)'
            group = 1
            select = 1
            "#,
        )
        .unwrap();

        let sensors = &config.targets[0].sensors;
        assert_eq!(
            sensors[0].locator,
            Locator::Text {
                pattern: r"price:\s*(\d+)".to_string(),
                group: 1,
                select: MatchSelection::First,
            }
        );
        assert!(matches!(
            sensors[1].locator,
            Locator::Text { select: MatchSelection::All, .. }
        ));
        assert!(matches!(
            sensors[2].locator,
            Locator::Text { select: MatchSelection::Nth(1), .. }
        ));
    }

    #[test]
    fn test_attribute_inherits_parent_mode_by_default() {
        let config = parse_config(
            r#"
            [[targets]]
            name = "page"
            url = "http://localhost/page"
            mode = "markup"

            [[targets.sensors]]
            name = "title"
            selector = "h1"

            [[targets.sensors.attributes]]
            key = "link"
            selector = "a.more"
            attr = "href"

            [[targets.sensors.attributes]]
            key = "build"
            mode = "text"
            pattern = 'build (\d+)'
            "#,
        )
        .unwrap();

        let attributes = &config.targets[0].sensors[0].attributes;
        assert_eq!(attributes[0].locator.mode(), ResponseMode::Markup);
        assert_eq!(attributes[1].locator.mode(), ResponseMode::Text);
    }

    #[test]
    fn test_foreign_field_rejected() {
        let err = parse_config(
            r#"
            [[targets]]
            name = "api"
            url = "http://localhost/api"

            [[targets.sensors]]
            name = "temp"
            selector = "div"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("selector"));
    }

    #[test]
    fn test_attribute_kind_requires_name() {
        let err = parse_config(
            r#"
            [[targets]]
            name = "page"
            url = "http://localhost/page"
            mode = "markup"

            [[targets.sensors]]
            name = "link"
            selector = "a"
            kind = "attribute"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, PollError::Configuration(_)));
    }

    #[test]
    fn test_raw_body_and_inner_markup() {
        let config = parse_config(
            r#"
            [[targets]]
            name = "page"
            url = "http://localhost/page"
            mode = "markup"
            method = "POST"
            body = "a=1&b=2"

            [[targets.sensors]]
            name = "table"
            selector = "table"
            kind = "html"
            "#,
        )
        .unwrap();

        let target = &config.targets[0];
        assert_eq!(target.config.body, Some(RequestBody::Raw("a=1&b=2".to_string())));
        assert_eq!(
            target.sensors[0].locator,
            Locator::markup("table", ValueKind::InnerMarkup)
        );
    }

    #[test]
    fn test_attr_template_from_json_string() {
        let config = parse_config(
            r#"
            [[targets]]
            name = "api"
            url = "http://localhost/api"

            [[targets.sensors]]
            name = "temp"
            path = "t"
            attr_template = '{"code": "{{ status }}"}'
            "#,
        )
        .unwrap();
        let template = config.targets[0].sensors[0].attr_template.as_ref().unwrap();
        assert_eq!(template.get("code"), Some(&json!("{{ status }}")));
    }
}
