//! Template evaluation for sensor values and attributes.
//!
//! Templates are text containing `{{ expression }}` blocks. Expressions use
//! the evalexpr language (arithmetic, comparisons, boolean logic, string
//! functions) over the variables described in [`TemplateVariables`].
//!
//! - A template that is exactly one block, ignoring surrounding whitespace,
//!   yields the expression's typed value (`"{{ value * 2 }}"` → `42`).
//! - Literal text or several blocks yield a string (`"T={{ value }}"` → `"T=21"`).
//! - No blocks yields the literal text.
//!
//! Attribute templates are JSON maps whose string leaves are rendered
//! independently; other leaves pass through unchanged.

pub mod context;
mod segments;

use evalexpr::Node;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use segments::{parse_segments, single_expression, Segment};

pub use context::TemplateVariables;

/// Template error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Malformed template or expression
    #[error("Template syntax error: {0}")]
    Syntax(String),

    /// Expression failed at runtime, e.g. an undefined variable
    #[error("Template evaluation error: {0}")]
    Evaluation(String),

    /// Variables could not be bound
    #[error("Template context error: {0}")]
    Context(String),

    /// A leaf of an attribute template failed
    #[error("Attribute '{key}': {error}")]
    Attribute {
        key: String,
        error: Box<TemplateError>,
    },
}

#[derive(Debug, Clone)]
enum Body {
    Literal(String),
    Single(Node),
    Mixed(Vec<Segment>),
}

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    body: Body,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let segments = parse_segments(source)?;

        let body = if !segments
            .iter()
            .any(|s| matches!(s, Segment::Expression { .. }))
        {
            Body::Literal(source.to_string())
        } else if let Some(node) = single_expression(&segments) {
            Body::Single(node.clone())
        } else {
            Body::Mixed(segments)
        };

        Ok(Self {
            source: source.to_string(),
            body,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, variables: &TemplateVariables) -> Result<Value, TemplateError> {
        match &self.body {
            Body::Literal(text) => Ok(Value::String(text.clone())),
            Body::Single(node) => {
                let context = context::build_context(variables)?;
                let result = node
                    .eval_with_context(&context)
                    .map_err(|e| TemplateError::Evaluation(e.to_string()))?;
                Ok(context::from_expr(result))
            }
            Body::Mixed(segments) => {
                let context = context::build_context(variables)?;
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => out.push_str(text),
                        Segment::Expression { source, node } => {
                            let result = node.eval_with_context(&context).map_err(|e| {
                                TemplateError::Evaluation(format!("'{}': {}", source, e))
                            })?;
                            out.push_str(&context::expr_to_text(&result));
                        }
                    }
                }
                Ok(Value::String(out))
            }
        }
    }
}

/// An optional value template, compiled once.
///
/// An absent or blank template renders as the extracted value itself.
#[derive(Debug, Clone, Default)]
pub struct ValueTemplate {
    compiled: Option<Result<Template, TemplateError>>,
}

impl ValueTemplate {
    pub fn compile(source: Option<&str>) -> Self {
        let compiled = source
            .filter(|s| !s.trim().is_empty())
            .map(Template::parse);
        Self { compiled }
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_none()
    }

    pub fn error(&self) -> Option<&TemplateError> {
        self.compiled.as_ref().and_then(|c| c.as_ref().err())
    }

    pub fn render(&self, variables: &TemplateVariables) -> Result<Value, TemplateError> {
        match &self.compiled {
            None => Ok(variables.value.as_ref().clone()),
            Some(Ok(template)) => template.render(variables),
            Some(Err(e)) => Err(e.clone()),
        }
    }
}

#[derive(Debug, Clone)]
enum AttrNode {
    Template(Result<Template, TemplateError>),
    Literal(Value),
    Object(Vec<(String, AttrNode)>),
    Array(Vec<AttrNode>),
}

impl AttrNode {
    fn compile(value: &Value) -> Self {
        match value {
            Value::String(source) => Self::Template(Template::parse(source)),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::compile(v)))
                    .collect(),
            ),
            Value::Array(items) => Self::Array(items.iter().map(Self::compile).collect()),
            other => Self::Literal(other.clone()),
        }
    }

    fn render(&self, variables: &TemplateVariables) -> Result<Value, TemplateError> {
        match self {
            Self::Template(Ok(template)) => template.render(variables),
            Self::Template(Err(e)) => Err(e.clone()),
            Self::Literal(value) => Ok(value.clone()),
            Self::Object(entries) => {
                let mut map = Map::new();
                for (key, node) in entries {
                    map.insert(key.clone(), node.render(variables)?);
                }
                Ok(Value::Object(map))
            }
            Self::Array(items) => items
                .iter()
                .map(|node| node.render(variables))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }

    fn collect_errors(&self, path: &str, errors: &mut Vec<TemplateError>) {
        match self {
            Self::Template(Err(e)) => errors.push(TemplateError::Attribute {
                key: path.to_string(),
                error: Box::new(e.clone()),
            }),
            Self::Object(entries) => {
                for (key, node) in entries {
                    node.collect_errors(&format!("{}.{}", path, key), errors);
                }
            }
            Self::Array(items) => {
                for (i, node) in items.iter().enumerate() {
                    node.collect_errors(&format!("{}[{}]", path, i), errors);
                }
            }
            _ => {}
        }
    }
}

/// A compiled attributes template.
#[derive(Debug, Clone, Default)]
pub struct AttributeTemplate {
    entries: Vec<(String, AttrNode)>,
}

impl AttributeTemplate {
    pub fn compile(template: Option<&Map<String, Value>>) -> Self {
        let entries = template
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), AttrNode::compile(v)))
                    .collect()
            })
            .unwrap_or_default();
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every leaf that failed to compile.
    pub fn errors(&self) -> Vec<TemplateError> {
        let mut errors = Vec::new();
        for (key, node) in &self.entries {
            node.collect_errors(key, &mut errors);
        }
        errors
    }

    /// Render every leaf. The first failing leaf fails the whole map.
    pub fn render(&self, variables: &TemplateVariables) -> Result<Map<String, Value>, TemplateError> {
        let mut map = Map::new();
        for (key, node) in &self.entries {
            let value = node.render(variables).map_err(|e| TemplateError::Attribute {
                key: key.clone(),
                error: Box::new(e),
            })?;
            map.insert(key.clone(), value);
        }
        Ok(map)
    }
}

/// Render `template`, falling back to the extracted value on failure.
pub fn render(template: &str, variables: &TemplateVariables) -> Value {
    match ValueTemplate::compile(Some(template)).render(variables) {
        Ok(value) => value,
        Err(e) => {
            warn!(template = %template, "template render failed, using extracted value: {}", e);
            variables.value.as_ref().clone()
        }
    }
}

/// Render an attributes template, falling back to an empty map on failure.
pub fn render_attributes(
    template: &Map<String, Value>,
    variables: &TemplateVariables,
) -> Map<String, Value> {
    match AttributeTemplate::compile(Some(template)).render(variables) {
        Ok(map) => map,
        Err(e) => {
            warn!("attributes template render failed: {}", e);
            Map::new()
        }
    }
}
