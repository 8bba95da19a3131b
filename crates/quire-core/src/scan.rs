//! Tolerant scanning over almost-JSON text.
//!
//! Backend responses are usually JSON, but not always valid JSON: raw
//! newlines inside strings, truncated output, stray prose around the object.
//! The helpers here find values by key without a full parse. They track
//! string and escape state so brackets, braces and quotes inside string
//! values never confuse them.
//!
//! Nothing in this module panics on arbitrary input.

/// Remove a byte-order mark and control characters other than `\n`, `\r`
/// and `\t`.
///
/// Returns the cleaned text and the number of characters removed.
pub fn sanitize(raw: &str) -> (String, usize) {
    let mut removed = 0;
    let cleaned = raw
        .chars()
        .filter(|c| {
            let strip = *c == '\u{feff}' || (c.is_control() && !matches!(*c, '\n' | '\r' | '\t'));
            if strip {
                removed += 1;
            }
            !strip
        })
        .collect();
    (cleaned, removed)
}

/// Slice from the first `{` to the last `}`, inclusive.
pub fn json_object_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Find a string value for the first key that has one.
///
/// Unterminated strings (truncated output) yield whatever was read before
/// the end of the text.
pub fn scan_string(text: &str, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let start = value_start(text, key)?;
        let rest = text[start..].strip_prefix('"')?;
        Some(read_string_body(rest))
    })
}

/// Find an array value for the first key that has one.
///
/// Returns the raw slice including brackets. When the closing bracket is
/// missing the slice runs to the end of the text.
pub fn scan_array<'a>(text: &'a str, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        let start = value_start(text, key)?;
        let rest = &text[start..];
        rest.starts_with('[')
            .then(|| &rest[..balanced_len(rest, '[', ']')])
    })
}

/// Split a raw array slice into its top-level elements.
///
/// Commas inside nested arrays, objects and strings are not split points.
/// Empty elements are dropped.
pub fn split_elements(array: &str) -> Vec<&str> {
    let inner = array.trim();
    let inner = inner.strip_prefix('[').unwrap_or(inner);
    let inner = inner.strip_suffix(']').unwrap_or(inner);

    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                elements.push(&inner[start..i]);
                start = i + 1;
            },
            _ => {},
        }
    }
    elements.push(&inner[start..]);

    elements
        .into_iter()
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .collect()
}

/// Copy of `text` with every `[...]` region removed.
///
/// Lets top-level keys be scanned without hitting same-named keys inside
/// nested arrays. An unclosed array swallows the rest of the text.
pub fn without_arrays(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        let inside = depth > 0;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else {
            match c {
                '"' => in_string = true,
                '[' => {
                    depth += 1;
                    continue;
                },
                ']' if depth > 0 => {
                    depth -= 1;
                    continue;
                },
                _ => {},
            }
        }
        if !inside {
            out.push(c);
        }
    }
    out
}

/// Decode a raw string literal element such as `"Chapter \"One\""`.
pub fn string_literal(element: &str) -> Option<String> {
    element.trim().strip_prefix('"').map(read_string_body)
}

/// Byte offset of the value that follows `"key"` and a colon.
///
/// A key occurrence not followed by a colon (for example the same word used
/// as a string value) is skipped.
fn value_start(text: &str, key: &str) -> Option<usize> {
    let needle = format!("\"{key}\"");
    let mut from = 0;
    while let Some(rel) = text[from..].find(&needle) {
        let after_key = from + rel + needle.len();
        if let Some(value) = text[after_key..].trim_start().strip_prefix(':') {
            return Some(text.len() - value.trim_start().len());
        }
        from = after_key;
    }
    None
}

/// Read a string body up to the first unescaped quote, then decode it.
fn read_string_body(rest: &str) -> String {
    let mut escaped = false;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => {
                end = i;
                break;
            },
            _ => {},
        }
    }
    decode_body(&rest[..end])
}

/// Decode JSON escapes, tolerating raw control characters and bad escapes.
fn decode_body(body: &str) -> String {
    let mut quoted = String::with_capacity(body.len() + 2);
    quoted.push('"');
    for c in body.chars() {
        match c {
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c if c.is_control() => {},
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    serde_json::from_str::<String>(&quoted).unwrap_or_else(|_| lenient_unescape(body))
}

fn lenient_unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other @ ('"' | '\\' | '/')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            },
            None => {},
        }
    }
    out
}

/// Length of the bracketed region at the start of `text`, or the whole text
/// when it never closes.
fn balanced_len(text: &str, open: char, close: char) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return i + c.len_utf8();
            }
        }
    }
    text.len()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_strips_bom_and_controls() {
        let (clean, removed) = sanitize("\u{feff}{\"a\":\u{0}\"b\u{7}\"}\n\t\r");
        assert_eq!(clean, "{\"a\":\"b\"}\n\t\r");
        assert_eq!(removed, 3);
    }

    #[test]
    fn test_json_object_slice_ignores_surrounding_prose() {
        let text = "Sure! Here you go:\n```json\n{\"title\": \"X\"}\n```\nEnjoy.";
        assert_eq!(json_object_slice(text), Some("{\"title\": \"X\"}"));
        assert_eq!(json_object_slice("no braces"), None);
        assert_eq!(json_object_slice("} backwards {"), None);
    }

    #[test]
    fn test_scan_string_requires_colon_after_key() {
        let text = r#"{"note": "title", "title": "Real Title"}"#;
        assert_eq!(scan_string(text, &["title"]).as_deref(), Some("Real Title"));
    }

    #[test]
    fn test_scan_string_handles_escapes_and_raw_newlines() {
        let text = "{\"body\": \"Line one\nLine \\\"two\\\" \\u00e9\"}";
        assert_eq!(
            scan_string(text, &["body"]).as_deref(),
            Some("Line one\nLine \"two\" é")
        );
    }

    #[test]
    fn test_scan_string_keeps_truncated_value() {
        let text = r#"{"firstChapterContent": "The story begins and then"#;
        assert_eq!(
            scan_string(text, &["first_chapter_content", "firstChapterContent"]).as_deref(),
            Some("The story begins and then")
        );
    }

    #[test]
    fn test_scan_string_bad_escape_is_kept_literally() {
        let text = r#"{"title": "C:\path\x"}"#;
        assert_eq!(scan_string(text, &["title"]).as_deref(), Some("C:\\path\\x"));
    }

    #[test]
    fn test_scan_array_ignores_brackets_in_strings() {
        let text = r#"{"toc": [{"title": "Arrays [and] {braces}"}, "x"], "after": 1}"#;
        let slice = scan_array(text, &["toc"]).unwrap();
        assert_eq!(slice, r#"[{"title": "Arrays [and] {braces}"}, "x"]"#);
    }

    #[test]
    fn test_scan_array_truncated_runs_to_end() {
        let text = r#"{"toc": [{"title": "One"}, {"title": "Tw"#;
        let slice = scan_array(text, &["toc"]).unwrap();
        assert_eq!(slice, r#"[{"title": "One"}, {"title": "Tw"#);
        assert_eq!(split_elements(slice).len(), 2);
    }

    #[test]
    fn test_split_elements_respects_nesting() {
        let elements = split_elements(r#"[ "a, b", {"x": [1, 2]}, , "c" ]"#);
        assert_eq!(elements, vec![r#""a, b""#, r#"{"x": [1, 2]}"#, r#""c""#]);
    }

    #[test]
    fn test_without_arrays_hides_nested_keys() {
        let text = r#"{"toc": [{"title": "Chapter [1]"}], "title": "Doc"}"#;
        let top = without_arrays(text);
        assert_eq!(top, r#"{"toc": , "title": "Doc"}"#);
        assert_eq!(scan_string(&top, &["title"]).as_deref(), Some("Doc"));
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(string_literal(r#" "Chapter \"One\"" "#).as_deref(), Some("Chapter \"One\""));
        assert_eq!(string_literal("42"), None);
    }

    proptest! {
        #[test]
        fn test_scanners_never_panic(input in ".{0,300}") {
            let (clean, _) = sanitize(&input);
            let _ = json_object_slice(&clean);
            let _ = scan_string(&clean, &["title", "toc"]);
            if let Some(slice) = scan_array(&clean, &["toc"]) {
                let _ = split_elements(slice);
            }
        }

        #[test]
        fn test_sanitize_leaves_no_stray_controls(input in "\\PC*[\\x00-\\x1f]*\\PC*") {
            let (clean, _) = sanitize(&input);
            prop_assert!(clean
                .chars()
                .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t')));
        }

        #[test]
        fn test_scan_string_recovers_serialized_values(value in "[^\\p{Cc}]{0,80}") {
            let text = format!("{{\"title\": {}}}", serde_json::to_string(&value).unwrap());
            prop_assert_eq!(scan_string(&text, &["title"]), Some(value));
        }
    }
}
