//! Conversion between JSON values and expression values, and the evaluation
//! context every template sees.

use std::sync::Arc;

use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Value as ExprValue,
};
use serde_json::{Number, Value};

use super::TemplateError;
use crate::extract::extract_path;

/// Inputs available to a template.
///
/// | variable | content |
/// |---|---|
/// | `value` | the extracted value |
/// | `text` | the raw response body |
/// | `json` | the decoded body serialized as JSON, empty when absent |
/// | `status` | the HTTP status code |
///
/// Functions `json_path(path)` and `value_path(path)` walk the decoded body
/// and the extracted value.
#[derive(Debug, Clone, Default)]
pub struct TemplateVariables {
    pub value: Arc<Value>,
    pub text: Option<Arc<str>>,
    pub json: Option<Arc<Value>>,
    pub status: Option<u16>,
}

impl TemplateVariables {
    /// Variables holding only an extracted value.
    pub fn from_value(value: Value) -> Self {
        Self {
            value: Arc::new(value),
            ..Default::default()
        }
    }

    /// The same response data with a different extracted value.
    pub fn with_value(&self, value: Value) -> Self {
        Self {
            value: Arc::new(value),
            text: self.text.clone(),
            json: self.json.clone(),
            status: self.status,
        }
    }
}

/// JSON to expression value. Objects become their JSON text.
pub fn to_expr(value: &Value) -> ExprValue {
    match value {
        Value::Null => ExprValue::Empty,
        Value::Bool(b) => ExprValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ExprValue::Int(i),
            None => ExprValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => ExprValue::String(s.clone()),
        Value::Array(items) => ExprValue::Tuple(items.iter().map(to_expr).collect()),
        Value::Object(_) => ExprValue::String(value.to_string()),
    }
}

/// Expression value to JSON. Non-finite floats become null.
pub fn from_expr(value: ExprValue) -> Value {
    match value {
        ExprValue::Empty => Value::Null,
        ExprValue::Boolean(b) => Value::Bool(b),
        ExprValue::Int(i) => Value::from(i),
        ExprValue::Float(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ExprValue::String(s) => Value::String(s),
        ExprValue::Tuple(items) => Value::Array(items.into_iter().map(from_expr).collect()),
    }
}

/// Textual form used when an expression is spliced into surrounding text.
pub fn expr_to_text(value: &ExprValue) -> String {
    match value {
        ExprValue::Empty => String::new(),
        ExprValue::String(s) => s.clone(),
        ExprValue::Tuple(_) => from_expr(value.clone()).to_string(),
        other => other.to_string(),
    }
}

fn path_function(root: Option<Arc<Value>>) -> Function {
    Function::new(move |argument| {
        let path = argument.as_string()?;
        let Some(root) = &root else {
            return Ok(ExprValue::Empty);
        };
        let found = extract_path(root, &path)
            .map_err(|e| EvalexprError::CustomMessage(e.to_string()))?;
        Ok(found.as_ref().map(to_expr).unwrap_or(ExprValue::Empty))
    })
}

/// Build the evaluation context for one render.
pub fn build_context(variables: &TemplateVariables) -> Result<HashMapContext, TemplateError> {
    let mut context = HashMapContext::new();

    let json_text = variables
        .json
        .as_ref()
        .map(|json| ExprValue::String(json.to_string()))
        .unwrap_or(ExprValue::Empty);
    let text = variables
        .text
        .as_ref()
        .map(|text| ExprValue::String(text.to_string()))
        .unwrap_or(ExprValue::Empty);
    let status = variables
        .status
        .map(|status| ExprValue::Int(i64::from(status)))
        .unwrap_or(ExprValue::Empty);

    let bindings = [
        ("value", to_expr(&variables.value)),
        ("text", text),
        ("json", json_text),
        ("status", status),
    ];
    for (name, value) in bindings {
        context
            .set_value(name.to_string(), value)
            .map_err(|e| TemplateError::Context(e.to_string()))?;
    }

    context
        .set_function(
            "json_path".to_string(),
            path_function(variables.json.clone()),
        )
        .map_err(|e| TemplateError::Context(e.to_string()))?;
    context
        .set_function(
            "value_path".to_string(),
            path_function(Some(variables.value.clone())),
        )
        .map_err(|e| TemplateError::Context(e.to_string()))?;

    Ok(context)
}
