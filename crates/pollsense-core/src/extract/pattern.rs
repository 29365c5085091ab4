//! Regular-expression lookup over raw text.
//!
//! Patterns are compiled with multi-line and dot-matches-newline enabled, so
//! `^`/`$` anchor at line boundaries and `.` spans lines.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use super::LocatorError;
use crate::config::MatchSelection;

/// Compile a text pattern with the flags text rules use.
pub fn compile(pattern: &str) -> Result<Regex, LocatorError> {
    RegexBuilder::new(pattern)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| LocatorError::InvalidPattern(pattern.to_string(), e.to_string()))
}

/// Group `group` of the first match, if any.
///
/// `None` when nothing matches, when the group does not exist, or when it did
/// not participate in the match.
pub fn first_match(regex: &Regex, text: &str, group: usize) -> Option<String> {
    regex
        .captures(text)
        .and_then(|caps| caps.get(group))
        .map(|m| m.as_str().to_string())
}

/// Group `group` of every non-overlapping match, left to right.
pub fn all_matches(regex: &Regex, text: &str, group: usize) -> Vec<Option<String>> {
    regex
        .captures_iter(text)
        .map(|caps| caps.get(group).map(|m| m.as_str().to_string()))
        .collect()
}

/// Apply a [`MatchSelection`], producing `Null` for a missing match.
pub fn select_matches(
    regex: &Regex,
    text: &str,
    group: usize,
    selection: MatchSelection,
) -> Value {
    let to_value = |m: Option<String>| m.map(Value::String).unwrap_or(Value::Null);

    match selection {
        MatchSelection::First => to_value(first_match(regex, text, group)),
        MatchSelection::Nth(n) => {
            to_value(all_matches(regex, text, group).into_iter().nth(n).flatten())
        }
        MatchSelection::All => Value::Array(
            all_matches(regex, text, group)
                .into_iter()
                .map(to_value)
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_and_all_matches() {
        let re = compile(r"price:\s*(\d+)").unwrap();
        let body = "price: 42 price: 43";

        assert_eq!(first_match(&re, body, 1).as_deref(), Some("42"));
        assert_eq!(
            all_matches(&re, body, 1),
            vec![Some("42".to_string()), Some("43".to_string())]
        );
        assert_eq!(first_match(&re, body, 0).as_deref(), Some("price: 42"));
    }

    #[test]
    fn test_first_equals_head_of_all() {
        let re = compile(r"(\w+)=(\d+)?").unwrap();
        for body in ["a=1 b= c=3", "x= y=2", "nothing here"] {
            let all = all_matches(&re, body, 2);
            let first = first_match(&re, body, 2);
            if all.is_empty() {
                assert_eq!(first, None);
            } else {
                assert_eq!(first, all[0]);
            }
        }
    }

    #[test]
    fn test_missing_group_is_none() {
        let re = compile(r"(\d+)").unwrap();
        assert_eq!(first_match(&re, "id 7", 3), None);
        assert_eq!(all_matches(&re, "1 2", 3), vec![None, None]);
        assert_eq!(first_match(&re, "no digits", 1), None);
    }

    #[test]
    fn test_multiline_flags() {
        let re = compile(r"^status: (\w+)$").unwrap();
        let body = "header\nstatus: ok\nfooter";
        assert_eq!(first_match(&re, body, 1).as_deref(), Some("ok"));

        let re = compile(r"<pre>(.*)</pre>").unwrap();
        assert_eq!(
            first_match(&re, "<pre>line1\nline2</pre>", 1).as_deref(),
            Some("line1\nline2")
        );
    }

    #[test]
    fn test_select_matches() {
        let re = compile(r"price:\s*(\d+)").unwrap();
        let body = "price: 42 price: 43";

        assert_eq!(select_matches(&re, body, 1, MatchSelection::First), json!("42"));
        assert_eq!(select_matches(&re, body, 1, MatchSelection::Nth(1)), json!("43"));
        assert_eq!(select_matches(&re, body, 1, MatchSelection::Nth(2)), Value::Null);
        assert_eq!(
            select_matches(&re, body, 1, MatchSelection::All),
            json!(["42", "43"])
        );
        assert_eq!(select_matches(&re, "none", 1, MatchSelection::All), json!([]));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            compile(r"(unclosed"),
            Err(LocatorError::InvalidPattern(_, _))
        ));
    }
}
