//! Polling target configuration.
//!
//! A [`FetchTarget`] pairs one [`FetchConfig`] (where and how often to poll)
//! with the ordered [`SensorRule`]s that pull values out of each response.
//! Configurations are immutable snapshots: reconfiguring a target replaces it
//! wholesale.
//!
//! ## TOML format
//!
//! ```toml
//! [[targets]]
//! name = "weather"
//! url = "http://192.168.1.100/api/weather"
//! mode = "structured"          # structured | markup | text
//! scan_interval = 60           # seconds, minimum 10
//! timeout = 15                 # seconds
//! headers = { Authorization = "Bearer token123" }
//!
//! [[targets.sensors]]
//! name = "temperature"
//! path = "data.temp"
//! unit = "°C"
//! keep_last_value = true
//! value_template = "{{ value * 1.0 }}"
//!
//! [[targets.sensors.attributes]]
//! key = "station"
//! path = "data.station.name"
//! ```

pub mod defaults;
pub mod raw;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{PollError, Result};

pub use defaults::env_vars;

/// HTTP method used for polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            other => Err(PollError::Configuration(format!(
                "Unsupported HTTP method: {}",
                other
            ))),
        }
    }
}

/// How a response body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Decoded as a JSON tree, queried with a dotted path
    #[default]
    #[serde(alias = "json")]
    Structured,
    /// Parsed as HTML, queried with a CSS selector
    #[serde(alias = "html")]
    Markup,
    /// Raw text, queried with a regular expression
    Text,
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::Markup => write!(f, "markup"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Request body sent with each poll.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON with a JSON content type
    Json(Value),
    /// Sent verbatim
    Raw(String),
}

/// Connection parameters and schedule of one polling target.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Target name, unique within a service
    pub name: String,
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Query parameters appended to the URL
    pub params: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
    pub verify_ssl: bool,
    /// Poll interval, never below [`defaults::MIN_SCAN_INTERVAL_SECS`]
    pub scan_interval: Duration,
    pub mode: ResponseMode,
}

impl FetchConfig {
    /// Create a GET target with default timeout and interval.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: HttpMethod::Get,
            url: url.into(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            body: None,
            timeout: defaults::default_timeout(),
            verify_ssl: defaults::DEFAULT_VERIFY_SSL,
            scan_interval: defaults::default_scan_interval(),
            mode: ResponseMode::Structured,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    /// Set the poll interval, raising it to the minimum if needed.
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        let min = defaults::min_scan_interval();
        if interval < min {
            warn!(
                target_name = %self.name,
                "scan interval {:?} is below the minimum, using {:?}",
                interval,
                min
            );
            self.scan_interval = min;
        } else {
            self.scan_interval = interval;
        }
        self
    }

    /// Check the fields that cannot be fixed up silently.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PollError::Configuration(
                "target name must not be empty".to_string(),
            ));
        }

        let url = url::Url::parse(&self.url).map_err(|e| {
            PollError::Configuration(format!("target '{}': invalid url '{}': {}", self.name, self.url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PollError::Configuration(format!(
                "target '{}': unsupported url scheme '{}'",
                self.name,
                url.scheme()
            )));
        }

        let secs = self.timeout.as_secs_f64();
        if secs < 1.0 || secs > defaults::MAX_TIMEOUT_SECS as f64 {
            return Err(PollError::Configuration(format!(
                "target '{}': timeout must be between 1 and {} seconds",
                self.name,
                defaults::MAX_TIMEOUT_SECS
            )));
        }

        if self.scan_interval < defaults::min_scan_interval() {
            return Err(PollError::Configuration(format!(
                "target '{}': scan interval must be at least {} seconds",
                self.name,
                defaults::MIN_SCAN_INTERVAL_SECS
            )));
        }

        Ok(())
    }
}

/// What a markup rule reads from the matched element.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValueKind {
    /// Text content with surrounding whitespace trimmed
    #[default]
    Text,
    /// Value of the named attribute
    Attribute(String),
    /// Serialized children of the element
    InnerMarkup,
}

/// Which regex match(es) a text rule returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchSelection {
    #[default]
    First,
    /// Zero-based index into all matches
    Nth(usize),
    /// Every match, as an array
    All,
}

/// Mode-specific locator of a value within a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    Structured {
        /// Dotted/bracketed path; empty selects the whole tree
        path: String,
    },
    Markup {
        /// CSS selector; empty selects the whole body text
        selector: String,
        kind: ValueKind,
    },
    Text {
        /// Regular expression; empty selects the whole body text
        pattern: String,
        /// Capture group, 0 for the whole match
        group: usize,
        select: MatchSelection,
    },
}

impl Locator {
    pub fn structured(path: impl Into<String>) -> Self {
        Self::Structured { path: path.into() }
    }

    pub fn markup(selector: impl Into<String>, kind: ValueKind) -> Self {
        Self::Markup {
            selector: selector.into(),
            kind,
        }
    }

    pub fn text(pattern: impl Into<String>, group: usize) -> Self {
        Self::Text {
            pattern: pattern.into(),
            group,
            select: MatchSelection::First,
        }
    }

    /// The response mode this locator needs.
    pub fn mode(&self) -> ResponseMode {
        match self {
            Self::Structured { .. } => ResponseMode::Structured,
            Self::Markup { .. } => ResponseMode::Markup,
            Self::Text { .. } => ResponseMode::Text,
        }
    }
}

/// Extraction rule whose result becomes a named attribute of a sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRule {
    pub key: String,
    pub locator: Locator,
    pub value_template: Option<String>,
}

impl AttributeRule {
    pub fn new(key: impl Into<String>, locator: Locator) -> Self {
        Self {
            key: key.into(),
            locator,
            value_template: None,
        }
    }

    pub fn with_value_template(mut self, template: impl Into<String>) -> Self {
        self.value_template = Some(template.into());
        self
    }
}

/// One declared value to pull out of every response of a target.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRule {
    /// Stable identifier, unique within the target
    pub name: String,
    pub locator: Locator,
    pub value_template: Option<String>,
    /// Map literal whose string leaves are templates
    pub attr_template: Option<Map<String, Value>>,
    pub attributes: Vec<AttributeRule>,
    pub unit: Option<String>,
    /// Replay the last good value when a tick fails or renders invalid
    pub keep_last_value: bool,
    /// Also replay the last good attribute map in that case
    pub keep_last_attributes: bool,
}

impl SensorRule {
    pub fn new(name: impl Into<String>, locator: Locator) -> Self {
        Self {
            name: name.into(),
            locator,
            value_template: None,
            attr_template: None,
            attributes: Vec::new(),
            unit: None,
            keep_last_value: false,
            keep_last_attributes: false,
        }
    }

    pub fn with_value_template(mut self, template: impl Into<String>) -> Self {
        self.value_template = Some(template.into());
        self
    }

    pub fn with_attr_template(mut self, template: Map<String, Value>) -> Self {
        self.attr_template = Some(template);
        self
    }

    pub fn with_attribute(mut self, attribute: AttributeRule) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn keep_last_value(mut self, keep: bool) -> Self {
        self.keep_last_value = keep;
        self
    }

    pub fn keep_last_attributes(mut self, keep: bool) -> Self {
        self.keep_last_attributes = keep;
        self
    }
}

/// A polling target together with its sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTarget {
    pub config: FetchConfig,
    pub sensors: Vec<SensorRule>,
}

impl FetchTarget {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            sensors: Vec::new(),
        }
    }

    pub fn with_sensor(mut self, sensor: SensorRule) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Validate the connection parameters and every sensor.
    ///
    /// A sensor's own locator must match the target mode; attribute rules
    /// may use any mode.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;

        let mut names = HashSet::new();
        for sensor in &self.sensors {
            if sensor.name.trim().is_empty() {
                return Err(PollError::Configuration(format!(
                    "target '{}': sensor name must not be empty",
                    self.config.name
                )));
            }
            if !names.insert(sensor.name.as_str()) {
                return Err(PollError::Configuration(format!(
                    "target '{}': duplicate sensor name '{}'",
                    self.config.name, sensor.name
                )));
            }
            if sensor.locator.mode() != self.config.mode {
                return Err(PollError::Configuration(format!(
                    "target '{}': sensor '{}' uses a {} locator but the target mode is {}",
                    self.config.name,
                    sensor.name,
                    sensor.locator.mode(),
                    self.config.mode
                )));
            }

            let mut keys = HashSet::new();
            for attribute in &sensor.attributes {
                if attribute.key.trim().is_empty() {
                    return Err(PollError::Configuration(format!(
                        "target '{}': sensor '{}' has an attribute without a key",
                        self.config.name, sensor.name
                    )));
                }
                if !keys.insert(attribute.key.as_str()) {
                    return Err(PollError::Configuration(format!(
                        "target '{}': sensor '{}' declares attribute '{}' twice",
                        self.config.name, sensor.name, attribute.key
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Top-level configuration: every target the service polls.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollsenseConfig {
    pub targets: Vec<FetchTarget>,
}

impl PollsenseConfig {
    /// Validate every target and check that target names are unique.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !names.insert(target.name()) {
                return Err(PollError::Configuration(format!(
                    "duplicate target name '{}'",
                    target.name()
                )));
            }
        }
        Ok(())
    }

    pub fn target(&self, name: &str) -> Option<&FetchTarget> {
        self.targets.iter().find(|t| t.name() == name)
    }
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(source: &str) -> Result<PollsenseConfig> {
    let raw: raw::RawConfig = toml::from_str(source)?;
    let config = raw.into_config()?;
    config.validate()?;
    Ok(config)
}

/// Load and validate a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<PollsenseConfig> {
    let source = std::fs::read_to_string(path.as_ref())?;
    parse_config(&source)
}
