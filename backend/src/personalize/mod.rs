//! Personalization: one message per recipient row.
//!
//! Pure functions over a [`Template`] and parsed rows; no I/O.

use serde::{Deserialize, Serialize};

use crate::parser::{Row, Table};
use crate::template::{extract_from_template, substitute, Template};

/// A template rendered for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedMessage {
    /// Address taken from the address column (may be empty)
    pub recipient_address: String,
    pub subject: String,
    pub body: String,
    /// Row the message was rendered from
    pub source_row: Row,
}

/// Render `template` for a single row.
pub fn personalize(template: &Template, row: &Row, address_column: &str) -> PersonalizedMessage {
    PersonalizedMessage {
        recipient_address: row.get(address_column).cloned().unwrap_or_default(),
        subject: substitute(&template.subject, row),
        body: substitute(&template.body, row),
        source_row: row.clone(),
    }
}

/// Render `template` for every row, in row order.
pub fn personalize_all(
    template: &Template,
    rows: &[Row],
    address_column: &str,
) -> Vec<PersonalizedMessage> {
    rows.iter()
        .map(|row| personalize(template, row, address_column))
        .collect()
}

/// Placeholder names used by the template that no column provides.
///
/// Meant for an operator warning; never blocks dispatch.
pub fn find_unbound_placeholders(template: &Template, available_columns: &[String]) -> Vec<String> {
    extract_from_template(template)
        .into_iter()
        .filter(|p| !available_columns.contains(&p.name))
        .map(|p| p.name)
        .collect()
}

/// Columns not referenced by any placeholder, in header order.
pub fn unused_columns(template: &Template, available_columns: &[String]) -> Vec<String> {
    let used = extract_from_template(template);
    available_columns
        .iter()
        .filter(|column| !used.iter().any(|p| &p.name == *column))
        .cloned()
        .collect()
}

/// Render the message for the recipient at `index` (0-based), if any.
pub fn preview(
    template: &Template,
    table: &Table,
    address_column: &str,
    index: usize,
) -> Option<PersonalizedMessage> {
    table
        .rows
        .get(index)
        .map(|row| personalize(template, row, address_column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn greeting() -> Template {
        Template::new("Hi {{First Name}}", "Dear {{First Name}}, bye")
    }

    #[test]
    fn test_personalize_example() {
        let table = parse("Email,First Name\nann@x.com,Ann");
        let message = personalize(&greeting(), &table.rows[0], "Email");

        assert_eq!(message.recipient_address, "ann@x.com");
        assert_eq!(message.subject, "Hi Ann");
        assert_eq!(message.body, "Dear Ann, bye");
        assert_eq!(message.source_row, table.rows[0]);
    }

    #[test]
    fn test_missing_address_column_gives_empty_address() {
        let table = parse("First Name\nAnn");
        let message = personalize(&greeting(), &table.rows[0], "Email");

        assert_eq!(message.recipient_address, "");
        assert_eq!(message.subject, "Hi Ann");
    }

    #[test]
    fn test_personalize_all_preserves_order_and_count() {
        let table = parse("Email,First Name\na@x.com,Ann\nb@x.com,Bob\nc@x.com,Cid\na@x.com,Dup");
        let messages = personalize_all(&greeting(), &table.rows, "Email");

        assert_eq!(messages.len(), 4);
        let subjects: Vec<_> = messages.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Hi Ann", "Hi Bob", "Hi Cid", "Hi Dup"]);
        assert_eq!(messages[3].recipient_address, "a@x.com");
    }

    #[test]
    fn test_personalize_all_empty() {
        assert!(personalize_all(&greeting(), &[], "Email").is_empty());
    }

    #[test]
    fn test_unbound_placeholder_left_literal() {
        let template = Template::new("Hello from {{Company}}", "{{First Name}} at {{Company}}");
        let table = parse("Email,First Name\nann@x.com,Ann");

        assert_eq!(
            find_unbound_placeholders(&template, &table.headers),
            vec!["Company"]
        );

        let message = personalize(&template, &table.rows[0], "Email");
        assert_eq!(message.subject, "Hello from {{Company}}");
        assert_eq!(message.body, "Ann at {{Company}}");
    }

    #[test]
    fn test_unused_columns() {
        let table = parse("Email,First Name,Company");
        assert_eq!(
            unused_columns(&greeting(), &table.headers),
            vec!["Email", "Company"]
        );
    }

    #[test]
    fn test_preview_by_index() {
        let table = parse("Email,First Name\na@x.com,Ann\nb@x.com,Bob");

        let second = preview(&greeting(), &table, "Email", 1).unwrap();
        assert_eq!(second.subject, "Hi Bob");
        assert!(preview(&greeting(), &table, "Email", 2).is_none());
    }
}
