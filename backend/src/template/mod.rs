//! Placeholder template engine.
//!
//! Templates carry `{{name}}` placeholders in their subject and body. Names
//! are case-sensitive, may contain spaces and punctuation (anything but `{`
//! and `}`), and are trimmed before lookup, so `{{ First Name }}` and
//! `{{First Name}}` refer to the same column.
//!
//! ```text
//! "Hi {{First Name}}"  +  { "First Name": "Ann" }  →  "Hi Ann"
//! "Hi {{Company}}"     +  { "First Name": "Ann" }  →  "Hi {{Company}}"
//! ```
//!
//! Substitution is a single pass: a value that itself contains `{{...}}`
//! is inserted verbatim and never expanded.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

/// `{{` ... next `}}` with no brace inside.
static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid placeholder regex"));

/// Subject and body of a message template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub subject: String,
    pub body: String,
}

impl Template {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

/// A placeholder found in template text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    /// Trimmed interior, used for lookup
    pub name: String,
    /// Exact token as it appears in the source text
    pub literal: String,
}

/// Template field that receives an inserted placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionTarget {
    Subject,
    Body,
}

/// Extract placeholders from text, left to right, deduplicated by name.
pub fn extract_placeholders(text: &str) -> Vec<Placeholder> {
    let mut seen = HashSet::new();

    PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let name = caps[1].trim();
            if name.is_empty() || !seen.insert(name.to_string()) {
                return None;
            }
            Some(Placeholder {
                name: name.to_string(),
                literal: caps[0].to_string(),
            })
        })
        .collect()
}

/// Placeholders of subject then body, deduplicated by name.
pub fn extract_from_template(template: &Template) -> Vec<Placeholder> {
    let mut seen = HashSet::new();

    extract_placeholders(&template.subject)
        .into_iter()
        .chain(extract_placeholders(&template.body))
        .filter(|p| seen.insert(p.name.clone()))
        .collect()
}

/// Replace every `{{name}}` whose name is a key of `values`.
///
/// Unknown names are left as-is. A key mapped to `""` still substitutes.
pub fn substitute(text: &str, values: &BTreeMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures| {
            let name = caps[1].trim();
            match values.get(name) {
                Some(value) if !name.is_empty() => value.clone(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Insert `{{column}}` into one field of a template.
///
/// `selection` is a character range in the target field; it is replaced by
/// the token. Without a selection the token is appended. Returns the new
/// template and the character offset just after the inserted token.
pub fn insert_placeholder(
    template: &Template,
    target: InsertionTarget,
    column: &str,
    selection: Option<Range<usize>>,
) -> (Template, usize) {
    let token = format!("{{{{{}}}}}", column);
    let mut updated = template.clone();

    let field = match target {
        InsertionTarget::Subject => &mut updated.subject,
        InsertionTarget::Body => &mut updated.body,
    };

    let len = field.chars().count();
    let (start, end) = match selection {
        Some(range) => {
            let start = range.start.min(len);
            (start, range.end.clamp(start, len))
        }
        None => (len, len),
    };

    let start_byte = char_to_byte(field, start);
    let end_byte = char_to_byte(field, end);
    field.replace_range(start_byte..end_byte, &token);

    (updated, start + token.chars().count())
}

fn char_to_byte(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// Escape HTML entities and turn line breaks into `<br>`.
pub fn text_to_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace("\r\n", "<br>")
        .replace('\n', "<br>")
}

/// Wrap HTML content in the default mail document (Gmail's "Sans Serif",
/// "Normal" size, off-black text).
pub fn wrap_in_html_document(content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="margin: 0; padding: 0;">
  <div class="gmail_default" style="font-family: arial, sans-serif; font-size: small; color: #222222;">
    {}
  </div>
</body>
</html>"#,
        content
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_with_spaces_and_punctuation() {
        let vars = extract_placeholders("Hi {{First Name}}, re: {{ order-id }} / {{Co. (HQ)}}");
        let names: Vec<_> = vars.iter().map(|p| p.name.as_str()).collect();

        assert_eq!(names, vec!["First Name", "order-id", "Co. (HQ)"]);
        assert_eq!(vars[1].literal, "{{ order-id }}");
    }

    #[test]
    fn test_extract_dedup_first_wins() {
        let vars = extract_placeholders("{{ name }} {{b}} {{name}}");

        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].name, "name");
        assert_eq!(vars[0].literal, "{{ name }}");
        assert_eq!(vars[1].name, "b");
    }

    #[test]
    fn test_extract_case_sensitive() {
        let vars = extract_placeholders("{{Name}} {{name}}");
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_extract_ignores_blank_and_nested() {
        assert!(extract_placeholders("{{   }} {{}} { {x} }").is_empty());

        let vars = extract_placeholders("{{a{{b}}c}}");
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].name, "b");
    }

    #[test]
    fn test_extract_from_template_subject_first() {
        let template = Template::new("{{B}} and {{A}}", "{{A}} {{C}} {{B}}");
        let names: Vec<_> = extract_from_template(&template)
            .into_iter()
            .map(|p| p.name)
            .collect();

        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_substitute_known_and_unknown() {
        let row = values(&[("First Name", "Ann")]);

        assert_eq!(
            substitute("Dear {{First Name}}, from {{Company}}", &row),
            "Dear Ann, from {{Company}}"
        );
        assert_eq!(substitute("Hi {{  First Name }}!", &row), "Hi Ann!");
    }

    #[test]
    fn test_substitute_empty_value_replaces() {
        let row = values(&[("Title", "")]);
        assert_eq!(substitute("Hi {{Title}} Ann", &row), "Hi  Ann");
    }

    #[test]
    fn test_substitute_single_pass() {
        let row = values(&[("a", "{{b}}"), ("b", "nope")]);
        assert_eq!(substitute("x {{a}} y", &row), "x {{b}} y");
    }

    #[test]
    fn test_insert_without_selection_appends() {
        let template = Template::new("Hello", "Body");
        let (updated, cursor) =
            insert_placeholder(&template, InsertionTarget::Subject, "First Name", None);

        assert_eq!(updated.subject, "Hello{{First Name}}");
        assert_eq!(updated.body, "Body");
        assert_eq!(cursor, 19);
    }

    #[test]
    fn test_insert_replaces_selection() {
        let template = Template::new("", "Dear XXX, hi");
        let (updated, cursor) =
            insert_placeholder(&template, InsertionTarget::Body, "Name", Some(5..8));

        assert_eq!(updated.body, "Dear {{Name}}, hi");
        assert_eq!(cursor, 13);
    }

    #[test]
    fn test_insert_uses_char_offsets() {
        let template = Template::new("Café ok", "");
        let (updated, _) =
            insert_placeholder(&template, InsertionTarget::Subject, "x", Some(4..4));

        assert_eq!(updated.subject, "Café{{x}} ok");
    }

    #[test]
    fn test_insert_clamps_out_of_range() {
        let template = Template::new("ab", "");
        let (updated, cursor) =
            insert_placeholder(&template, InsertionTarget::Subject, "x", Some(10..3));

        assert_eq!(updated.subject, "ab{{x}}");
        assert_eq!(cursor, 7);
    }

    #[test]
    fn test_text_to_html() {
        assert_eq!(
            text_to_html("a < b & c > d\nnext"),
            "a &lt; b &amp; c &gt; d<br>next"
        );
    }

    #[test]
    fn test_wrap_in_html_document() {
        let html = wrap_in_html_document("Hello<br>there");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("gmail_default"));
        assert!(html.contains("Hello<br>there"));
    }
}
