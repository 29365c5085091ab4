//! Splitting template source into literal text and `{{ expression }}` blocks.

use evalexpr::{build_operator_tree, Node};

use super::TemplateError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone)]
pub enum Segment {
    Literal(String),
    Expression { source: String, node: Node },
}

impl Segment {
    fn is_blank(&self) -> bool {
        matches!(self, Segment::Literal(text) if text.trim().is_empty())
    }
}

/// Split and compile `source`.
pub fn parse_segments(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut rest = source;

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            segments.push(Segment::Literal(rest[..start].to_string()));
        }
        let after_open = &rest[start + OPEN.len()..];
        let end = find_close(after_open).ok_or_else(|| {
            TemplateError::Syntax(format!("unclosed '{{{{' in template '{}'", source))
        })?;

        let expression = after_open[..end].trim();
        if expression.is_empty() {
            return Err(TemplateError::Syntax(format!(
                "empty expression in template '{}'",
                source
            )));
        }
        let node = build_operator_tree(expression)
            .map_err(|e| TemplateError::Syntax(format!("'{}': {}", expression, e)))?;
        segments.push(Segment::Expression {
            source: expression.to_string(),
            node,
        });

        rest = &after_open[end + CLOSE.len()..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// Byte offset of the first `}}` outside a string literal.
fn find_close(expression: &str) -> Option<usize> {
    let bytes = expression.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// The lone expression of a template made of one block and whitespace.
pub fn single_expression(segments: &[Segment]) -> Option<&Node> {
    let mut found = None;
    for segment in segments {
        match segment {
            Segment::Expression { node, .. } => {
                if found.is_some() {
                    return None;
                }
                found = Some(node);
            }
            literal if literal.is_blank() => {}
            _ => return None,
        }
    }
    found
}
