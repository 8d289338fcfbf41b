//! Recipient table loader with encoding and delimiter auto-detection.
//!
//! Turns raw delimited text into a [`Table`]: trimmed, unique headers and one
//! string map per data row. Loading is best-effort and total: structural
//! problems are collected in [`Table::parse_errors`] and never abort parsing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{CsvError, CsvResult};

/// One data row: column name -> cell value.
pub type Row = BTreeMap<String, String>;

/// Parsed recipient table.
///
/// Every row holds exactly the table's headers as keys. Row order is source
/// order; the row index is the recipient's identity downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    /// Column names, unique, in source order
    pub headers: Vec<String>,
    /// Data rows in source order
    pub rows: Vec<Row>,
    /// Structural diagnostics (`"Row <n>: <message>"`)
    pub parse_errors: Vec<String>,
}

impl Table {
    /// Unique non-empty values of a column, in first-seen order.
    pub fn column_values(&self, column: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_empty())
            .filter(|v| seen.insert(v.as_str()))
            .cloned()
            .collect()
    }

    /// Rows matching a predicate, order preserved.
    pub fn filter_rows<F>(&self, predicate: F) -> Vec<Row>
    where
        F: Fn(&Row) -> bool,
    {
        self.rows.iter().filter(|row| predicate(row)).cloned().collect()
    }

    /// Serialize back to comma-separated text.
    pub fn to_csv_text(&self) -> CsvResult<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        writer
            .write_record(&self.headers)
            .map_err(|e| CsvError::WriteError(e.to_string()))?;

        for row in &self.rows {
            let record: Vec<&str> = self
                .headers
                .iter()
                .map(|h| row.get(h).map(String::as_str).unwrap_or(""))
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| CsvError::WriteError(e.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| CsvError::WriteError(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| CsvError::EncodingError(e.to_string()))
    }
}

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Parsed table
    pub table: Table,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding.
///
/// Unknown encodings fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    // A UTF-8 BOM would otherwise stick to the first header
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);

    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Detect the delimiter by counting occurrences in the header line.
///
/// Defaults to `,` when none of the candidates appear.
pub fn detect_delimiter(content: &str) -> char {
    let header_line = content
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = header_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse delimited text, auto-detecting the delimiter.
///
/// # Example
/// ```ignore
/// use mailmerge::parse;
///
/// let table = parse("Email,First Name\nann@example.com,Ann\n");
///
/// assert_eq!(table.headers, vec!["Email", "First Name"]);
/// assert_eq!(table.rows[0]["First Name"], "Ann");
/// assert!(table.parse_errors.is_empty());
/// ```
pub fn parse(raw_text: &str) -> Table {
    parse_with_delimiter(raw_text, detect_delimiter(raw_text))
}

/// Byte form of a delimiter; only ASCII characters can split fields.
pub fn delimiter_byte(delimiter: char) -> Option<u8> {
    delimiter.is_ascii().then_some(delimiter as u8)
}

/// Parse delimited text with an explicit delimiter.
///
/// The first non-empty line is the header row. Blank lines are skipped and
/// do not count as rows. Short rows are padded with empty strings, long rows
/// are truncated; both are reported as `"Row <n>: ..."` with `n` the 1-based
/// data row index. A non-ASCII delimiter falls back to `,`.
pub fn parse_with_delimiter(content: &str, delimiter: char) -> Table {
    let mut table = Table::default();

    let delimiter = delimiter_byte(delimiter).unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(content.as_bytes());

    let mut header_seen = false;

    for result in reader.records() {
        let row_num = table.rows.len() + 1;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                table.parse_errors.push(format!("Row {}: {}", row_num, e));
                continue;
            }
        };

        if is_blank(&record) {
            continue;
        }

        if !header_seen {
            table.headers = unique_headers(&record, &mut table.parse_errors);
            header_seen = true;
            continue;
        }

        let expected = table.headers.len();
        let parsed = record.len();
        if parsed < expected {
            table.parse_errors.push(format!(
                "Row {}: Too few fields: expected {} fields but parsed {}",
                row_num, expected, parsed
            ));
        } else if parsed > expected {
            table.parse_errors.push(format!(
                "Row {}: Too many fields: expected {} fields but parsed {}",
                row_num, expected, parsed
            ));
        }

        let row: Row = table
            .headers
            .iter()
            .enumerate()
            .map(|(i, header)| (header.clone(), record.get(i).unwrap_or("").to_string()))
            .collect();

        table.rows.push(row);
    }

    if !header_seen {
        table.parse_errors.push("CSV file is empty".to_string());
    }

    table
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> ParseResult {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);

    ParseResult {
        table: parse_with_delimiter(&content, delimiter),
        encoding,
        delimiter,
    }
}

/// Parse a CSV file with auto-detection of encoding and delimiter.
///
/// # Example
/// ```ignore
/// let result = parse_file_auto("/path/to/recipients.csv")?;
/// println!("Encoding: {}, Delimiter: '{}'", result.encoding, result.delimiter);
/// println!("Recipients: {}", result.table.rows.len());
/// ```
pub fn parse_file_auto<P: AsRef<Path>>(path: P) -> CsvResult<ParseResult> {
    let bytes = std::fs::read(path.as_ref())?;
    Ok(parse_bytes_auto(&bytes))
}

fn is_blank(record: &csv::StringRecord) -> bool {
    match record.len() {
        0 => true,
        1 => record[0].trim().is_empty(),
        _ => false,
    }
}

/// Trim header cells and rename duplicates (`Name`, `Name_1`, `Name_2`, ...).
fn unique_headers(record: &csv::StringRecord, errors: &mut Vec<String>) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut headers = Vec::with_capacity(record.len());

    for raw in record.iter() {
        let name = raw.trim().to_string();

        if seen.insert(name.clone()) {
            headers.push(name);
            continue;
        }

        let mut suffix = 1;
        let renamed = loop {
            let candidate = format!("{}_{}", name, suffix);
            if !seen.contains(&candidate) {
                break candidate;
            }
            suffix += 1;
        };

        errors.push(format!(
            "Header: duplicate column \"{}\" renamed to \"{}\"",
            name, renamed
        ));
        seen.insert(renamed.clone());
        headers.push(renamed);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_csv() {
        let table = parse("Email,First Name\nann@x.com,Ann\nbob@x.com,Bob");

        assert_eq!(table.headers, vec!["Email", "First Name"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0]["Email"], "ann@x.com");
        assert_eq!(table.rows[1]["First Name"], "Bob");
        assert!(table.parse_errors.is_empty());
    }

    #[test]
    fn test_headers_trimmed() {
        let table = parse("  Email , Company \nann@x.com,Acme");

        assert_eq!(table.headers, vec!["Email", "Company"]);
        assert_eq!(table.rows[0]["Company"], "Acme");
    }

    #[test]
    fn test_quoted_values() {
        let csv = "Email,Note\nann@x.com,\"Hello, World\"";
        let table = parse(csv);

        assert_eq!(table.rows[0]["Note"], "Hello, World");
    }

    #[test]
    fn test_empty_lines_skipped() {
        let table = parse("\n\nEmail;Name\nann@x.com;Ann\n\n   \nbob@x.com;Bob\n");

        assert_eq!(table.headers, vec!["Email", "Name"]);
        assert_eq!(table.rows.len(), 2);
        assert!(table.parse_errors.is_empty());
    }

    #[test]
    fn test_missing_trailing_fields_are_empty() {
        let table = parse("a,b,c\n1,2");

        assert_eq!(table.rows[0]["a"], "1");
        assert_eq!(table.rows[0]["b"], "2");
        assert_eq!(table.rows[0]["c"], "");
        assert_eq!(
            table.parse_errors,
            vec!["Row 1: Too few fields: expected 3 fields but parsed 2"]
        );
    }

    #[test]
    fn test_extra_columns_dropped_and_reported() {
        let table = parse("a,b\n1,2\n1,2,3,4\n5,6");

        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[1].len(), 2);
        assert_eq!(table.rows[2]["a"], "5");
        assert_eq!(
            table.parse_errors,
            vec!["Row 2: Too many fields: expected 2 fields but parsed 4"]
        );
    }

    #[test]
    fn test_duplicate_headers_renamed() {
        let table = parse("Name,Email,Name,Name\nA,a@x.com,B,C");

        assert_eq!(table.headers, vec!["Name", "Email", "Name_1", "Name_2"]);
        assert_eq!(table.rows[0]["Name_1"], "B");
        assert_eq!(table.parse_errors.len(), 2);
        assert!(table.parse_errors[0].contains("Name_1"));
    }

    #[test]
    fn test_empty_input() {
        let table = parse("");

        assert!(table.headers.is_empty());
        assert!(table.rows.is_empty());
        assert_eq!(table.parse_errors, vec!["CSV file is empty"]);
    }

    #[test]
    fn test_header_only() {
        let table = parse("Email,Name\n");

        assert_eq!(table.headers.len(), 2);
        assert!(table.rows.is_empty());
        assert!(table.parse_errors.is_empty());
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(detect_delimiter("a;b;c\n1;2;3"), ';');
        assert_eq!(detect_delimiter("a,b,c\n1,2,3"), ',');
        assert_eq!(detect_delimiter("a\tb\tc\n1\t2\t3"), '\t');
        assert_eq!(detect_delimiter("a|b|c\n1|2|3"), '|');
        assert_eq!(detect_delimiter("Email\nann@x.com"), ',');
    }

    #[test]
    fn test_auto_parse_bytes() {
        let result = parse_bytes_auto(b"Email;Name\nann@x.com;Ann\n");

        assert_eq!(result.delimiter, ';');
        assert_eq!(result.table.rows.len(), 1);
        assert_eq!(result.table.headers, vec!["Email", "Name"]);
    }

    #[test]
    fn test_bom_stripped() {
        let result = parse_bytes_auto(b"\xEF\xBB\xBFEmail,Name\nann@x.com,Ann\n");
        assert_eq!(result.table.headers[0], "Email");
    }

    #[test]
    fn test_latin1_decoding() {
        // "Société" in ISO-8859-1
        let bytes: &[u8] = &[0x53, 0x6F, 0x63, 0x69, 0xE9, 0x74, 0xE9];
        let decoded = decode_content(bytes, "iso-8859-1");
        assert_eq!(decoded, "Société");
    }

    #[test]
    fn test_column_values_unique_non_empty() {
        let table = parse("Email,Company\na@x.com,Acme\nb@x.com,\nc@x.com,Acme\nd@x.com,Globex");

        assert_eq!(table.column_values("Company"), vec!["Acme", "Globex"]);
        assert!(table.column_values("Missing").is_empty());
    }

    #[test]
    fn test_filter_rows() {
        let table = parse("Email,Plan\na@x.com,pro\nb@x.com,free\nc@x.com,pro");
        let pro = table.filter_rows(|row| row.get("Plan").map(String::as_str) == Some("pro"));

        assert_eq!(pro.len(), 2);
        assert_eq!(pro[1]["Email"], "c@x.com");
    }

    #[test]
    fn test_to_csv_text_quotes_when_needed() {
        let table = parse("Email,Note\na@x.com,\"Hi, there\"");
        let text = table.to_csv_text().unwrap();

        assert_eq!(text, "Email,Note\na@x.com,\"Hi, there\"\n");
        assert_eq!(parse(&text), table);
    }

    #[test]
    fn test_delimiter_byte() {
        assert_eq!(delimiter_byte(';'), Some(b';'));
        assert_eq!(delimiter_byte('\t'), Some(b'\t'));
        assert_eq!(delimiter_byte('§'), None);
        assert_eq!(delimiter_byte('→'), None);
    }
}
