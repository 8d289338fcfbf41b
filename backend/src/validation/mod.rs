//! Recipient validation for a parsed [`Table`].
//!
//! Checks that every row carries a usable email address in the chosen
//! column before anything is sent.
//!
//! # Findings
//!
//! | Finding                    | Kind    | Blocks dispatch |
//! |----------------------------|---------|-----------------|
//! | Column not in headers      | error   | yes             |
//! | Empty address              | error   | yes             |
//! | Malformed address          | error   | yes             |
//! | Duplicate (case-insensitive) | warning | no            |
//! | No data rows               | error   | yes             |
//!
//! # Example
//!
//! ```rust,ignore
//! use mailmerge::{parse, validate};
//!
//! let table = parse("Email,First Name\na@x.com,Ann\na@x.com,Bob\n");
//! let report = validate(&table, "Email");
//!
//! assert!(report.is_valid);
//! assert_eq!(report.warnings, vec!["Row 2: Duplicate email \"a@x.com\""]);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::parser::Table;

/// `localpart@domain.tld`, no whitespace or extra `@`.
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

/// Outcome of validating a recipient table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// True iff `errors` is empty
    pub is_valid: bool,
    /// Blocking problems
    pub errors: Vec<String>,
    /// Non-blocking problems (duplicates)
    pub warnings: Vec<String>,
}

/// Check a single address against the accepted grammar.
pub fn is_valid_address(address: &str) -> bool {
    EMAIL_RE.is_match(address)
}

/// Guess the address column: first header containing "email" or equal to
/// "e-mail", case-insensitively.
pub fn guess_address_column(headers: &[String]) -> Option<&str> {
    headers
        .iter()
        .find(|h| {
            let lower = h.to_lowercase();
            lower.contains("email") || lower == "e-mail"
        })
        .map(String::as_str)
}

/// Validate that `address_column` holds a well-formed address on every row.
pub fn validate(table: &Table, address_column: &str) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if !table.headers.iter().any(|h| h == address_column) {
        errors.push(format!(
            "Email field \"{}\" not found in CSV headers",
            address_column
        ));
        return ValidationReport {
            is_valid: false,
            errors,
            warnings,
        };
    }

    let mut seen: HashSet<String> = HashSet::new();

    for (i, row) in table.rows.iter().enumerate() {
        let index = i + 1;
        let email = row.get(address_column).map(|v| v.trim()).unwrap_or("");

        if email.is_empty() {
            errors.push(format!("Row {}: Missing email address", index));
        } else if !is_valid_address(email) {
            errors.push(format!("Row {}: Invalid email format \"{}\"", index, email));
        } else if !seen.insert(email.to_lowercase()) {
            warnings.push(format!("Row {}: Duplicate email \"{}\"", index, email));
        }
    }

    if table.rows.is_empty() {
        errors.push("CSV file contains no data rows".to_string());
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}
