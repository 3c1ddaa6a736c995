//! Member-row parsing and date normalization
//!
//! Invoice detail screens render covered members as
//! `"Surname, Given Names (MemberNumber)"` rows, mixed in with header and
//! placeholder rows. Rows that miss the full pattern are kept only when a
//! parenthesized member number is still present; anything else is noise.

use lazy_static::lazy_static;
use regex::Regex;

/// A member row extracted from an invoice
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRecord {
    pub surname: String,
    pub given_names: String,
    pub member_number: Option<String>,
    /// The normalized source text, kept for the audit trail
    pub raw: String,
}

lazy_static! {
    static ref MEMBER_RE: Regex =
        Regex::new(r"^(?P<surname>[^,()]+),\s*(?P<given>[^()]+?)\s*\((?P<number>\d+)\)$").unwrap();
    static ref PAREN_NUMBER_RE: Regex = Regex::new(r"\((\d+)\)").unwrap();
    static ref DATE_RE: Regex =
        Regex::new(r"\b(\d{1,2})[/-](\d{1,2})[/-](\d{4}|\d{2})\b").unwrap();
}

/// Text fragments that mark a row as a header or placeholder, not a member
const PLACEHOLDER_FRAGMENTS: &[&str] = &[
    "no data",
    "no records",
    "loading",
    "member name",
    "surname",
    "total",
    "amount",
    "invoice",
    "description",
];

/// Collapses all whitespace runs into single spaces and trims
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when a row is a header/placeholder rather than member data
pub fn is_placeholder_row(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lower = trimmed.to_lowercase();
    PLACEHOLDER_FRAGMENTS
        .iter()
        .any(|fragment| lower == *fragment || (lower.starts_with(fragment) && !lower.contains('(')))
}

/// Parses one row of member text.
///
/// Returns `None` when the row carries no parenthesized member number at
/// all; such rows are dropped from the member set.
pub fn parse_member_line(line: &str) -> Option<MemberRecord> {
    let normalized = normalize_whitespace(line);

    if let Some(captures) = MEMBER_RE.captures(&normalized) {
        return Some(MemberRecord {
            surname: captures["surname"].trim().to_string(),
            given_names: captures["given"].trim().to_string(),
            member_number: Some(captures["number"].to_string()),
            raw: normalized,
        });
    }

    // Partial rows still count if a member number is present
    let number = PAREN_NUMBER_RE.captures(&normalized)?[1].to_string();
    let name_part = normalized
        .split('(')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    let (surname, given_names) = match name_part.split_once(',') {
        Some((surname, given)) => (surname.trim().to_string(), given.trim().to_string()),
        None => (name_part, String::new()),
    };

    if surname.is_empty() {
        return None;
    }

    Some(MemberRecord {
        surname,
        given_names,
        member_number: Some(number),
        raw: normalized,
    })
}

/// Normalizes a portal date to ISO `YYYY-MM-DD`.
///
/// Accepts `DD/MM/YYYY`, `DD-MM-YYYY` and 2-digit-year variants; 2-digit
/// years pivot at 50 (< 50 means 20xx, otherwise 19xx). Returns `None` for
/// impossible dates.
pub fn normalize_invoice_date(text: &str) -> Option<String> {
    let captures = DATE_RE.captures(text.trim())?;

    let day: u32 = captures[1].parse().ok()?;
    let month: u32 = captures[2].parse().ok()?;
    let year_raw: i32 = captures[3].parse().ok()?;

    let year = if captures[3].len() == 2 {
        if year_raw < 50 {
            2000 + year_raw
        } else {
            1900 + year_raw
        }
    } else {
        year_raw
    };

    let date = chrono::NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Finds and normalizes the first date-looking token in a block of text
pub fn find_invoice_date(text: &str) -> Option<String> {
    DATE_RE
        .find(text)
        .and_then(|m| normalize_invoice_date(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_member_line() {
        let member = parse_member_line("Smith, John (12345)").unwrap();
        assert_eq!(member.surname, "Smith");
        assert_eq!(member.given_names, "John");
        assert_eq!(member.member_number.as_deref(), Some("12345"));
    }

    #[test]
    fn test_parse_multiple_given_names() {
        let member = parse_member_line("Nguyen, Thi Kim Anh (987654)").unwrap();
        assert_eq!(member.surname, "Nguyen");
        assert_eq!(member.given_names, "Thi Kim Anh");
        assert_eq!(member.member_number.as_deref(), Some("987654"));
    }

    #[test]
    fn test_parse_normalizes_whitespace() {
        let member = parse_member_line("  Smith,   John\u{a0} (12345) ").unwrap();
        assert_eq!(member.raw, "Smith, John (12345)");
    }

    #[test]
    fn test_line_without_parenthesized_number_is_dropped() {
        assert_eq!(parse_member_line("Smith, John"), None);
        assert_eq!(parse_member_line("Smith, John (abc)"), None);
    }

    #[test]
    fn test_partial_line_with_number_is_kept() {
        let member = parse_member_line("Smith John (12345)").unwrap();
        assert_eq!(member.surname, "Smith John");
        assert_eq!(member.given_names, "");
        assert_eq!(member.member_number.as_deref(), Some("12345"));
    }

    #[test]
    fn test_placeholder_rows() {
        assert!(is_placeholder_row(""));
        assert!(is_placeholder_row("   "));
        assert!(is_placeholder_row("No data"));
        assert!(is_placeholder_row("Loading"));
        assert!(is_placeholder_row("Member Name"));
        assert!(!is_placeholder_row("Smith, John (12345)"));
    }

    #[test]
    fn test_date_normalization_two_digit_year() {
        assert_eq!(
            normalize_invoice_date("05/03/24").as_deref(),
            Some("2024-03-05")
        );
    }

    #[test]
    fn test_date_normalization_dashes() {
        assert_eq!(
            normalize_invoice_date("05-03-2024").as_deref(),
            Some("2024-03-05")
        );
    }

    #[test]
    fn test_date_pivot_at_fifty() {
        assert_eq!(
            normalize_invoice_date("01/01/49").as_deref(),
            Some("2049-01-01")
        );
        assert_eq!(
            normalize_invoice_date("01/01/50").as_deref(),
            Some("1950-01-01")
        );
    }

    #[test]
    fn test_impossible_date_rejected() {
        assert_eq!(normalize_invoice_date("32/13/2024"), None);
    }

    #[test]
    fn test_find_invoice_date_in_text() {
        let text = "Invoice 123456\nIssued 07/08/2025\nTotal $1,234.00";
        assert_eq!(find_invoice_date(text).as_deref(), Some("2025-08-07"));
    }
}
