//! Structured-path lookup over JSON trees.
//!
//! Supports:
//! - Nested objects: `data.temp`
//! - Array indices: `data.items[0].value`
//! - Quoted keys: `data["key.with.dots"]`, `data['name']`
//! - Optional root marker: `$.data.temp`
//! - Numeric keys on arrays: `items.0` behaves like `items[0]`
//!
//! An empty path (or a bare `$`) selects the whole tree.

use serde_json::Value;

use super::LocatorError;

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parse a dotted/bracketed path into segments.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, LocatorError> {
    let invalid = |reason: &str| LocatorError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = path.trim();
    if let Some(stripped) = rest.strip_prefix('$') {
        rest = stripped;
        if let Some(stripped) = rest.strip_prefix('.') {
            if stripped.is_empty() {
                return Err(invalid("trailing '.'"));
            }
            rest = stripped;
        }
    }

    let chars: Vec<char> = rest.chars().collect();
    let mut segments = Vec::new();
    let mut i = 0;
    // A key is expected at the start and after every '.'
    let mut expect_key = !chars.is_empty() && chars[0] != '[';

    while i < chars.len() {
        match chars[i] {
            '[' => {
                i += 1;
                match chars.get(i) {
                    Some(&quote) if quote == '"' || quote == '\'' => {
                        i += 1;
                        let mut key = String::new();
                        loop {
                            match chars.get(i) {
                                None => return Err(invalid("unterminated quoted key")),
                                Some('\\') if chars.get(i + 1) == Some(&quote) => {
                                    key.push(quote);
                                    i += 2;
                                }
                                Some(&c) if c == quote => {
                                    i += 1;
                                    break;
                                }
                                Some(&c) => {
                                    key.push(c);
                                    i += 1;
                                }
                            }
                        }
                        if chars.get(i) != Some(&']') {
                            return Err(invalid("expected ']' after quoted key"));
                        }
                        i += 1;
                        segments.push(Segment::Key(key));
                    }
                    _ => {
                        let start = i;
                        while i < chars.len() && chars[i] != ']' {
                            i += 1;
                        }
                        if i >= chars.len() {
                            return Err(invalid("unterminated '['"));
                        }
                        let index: String = chars[start..i].iter().collect();
                        let index = index.trim();
                        let index = index.parse::<usize>().map_err(|_| {
                            invalid(&format!("'{}' is not a non-negative array index", index))
                        })?;
                        i += 1;
                        segments.push(Segment::Index(index));
                    }
                }
                expect_key = false;
            }
            '.' => {
                if segments.is_empty() {
                    return Err(invalid("leading '.'"));
                }
                if expect_key {
                    return Err(invalid("empty key"));
                }
                i += 1;
                if i >= chars.len() {
                    return Err(invalid("trailing '.'"));
                }
                expect_key = chars[i] != '[';
            }
            _ if expect_key => {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                let key: String = chars[start..i].iter().collect();
                let key = key.trim();
                if key.is_empty() {
                    return Err(invalid("empty key"));
                }
                segments.push(Segment::Key(key.to_string()));
                expect_key = false;
            }
            c => {
                return Err(invalid(&format!("unexpected '{}'", c)));
            }
        }
    }

    Ok(segments)
}

/// Walk `root` along `segments`.
///
/// Returns `None` for a missing key, an out-of-range index, or a step into a
/// scalar. A JSON `null` stored at the path is returned as `Some(&Null)`.
pub fn lookup<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Key(key), Value::Array(arr)) => arr.get(key.parse::<usize>().ok()?)?,
            (Segment::Index(index), Value::Array(arr)) => arr.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Parse `path` and look it up in `root`, cloning the subtree found.
pub fn extract_path(root: &Value, path: &str) -> Result<Option<Value>, LocatorError> {
    let segments = parse_path(path)?;
    Ok(lookup(root, &segments).cloned())
}
