//! Search query candidate construction
//!
//! Company names as entered by organisers rarely match how an agreement is
//! titled, so each employer gets an ordered ladder of query candidates:
//! explicit override first, then a simplified form of the company name,
//! then the raw name, each both prefixed with a fixed domain phrase and
//! unprefixed.

/// Corporate designators stripped during name simplification
const CORPORATE_DESIGNATORS: &[&str] = &[
    "pty",
    "ltd",
    "limited",
    "proprietary",
    "co",
    "inc",
    "incorporated",
    "corp",
    "corporation",
    "holdings",
    "group",
    "australia",
    "aust",
];

/// Simplifies a company name for searching.
///
/// Removes parenthetical qualifiers and corporate designators, strips
/// punctuation, and keeps the first 3 remaining words longer than 2
/// characters. `"ABC Pty Ltd (NSW)"` simplifies to `"ABC"`.
pub fn simplify_company_name(name: &str) -> String {
    // Drop parenthetical qualifiers like "(NSW)" or "(in liquidation)"
    let mut cleaned = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => cleaned.push(c),
            _ => {}
        }
    }

    cleaned
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|word| word.len() > 2)
        .filter(|word| {
            let lower = word.to_lowercase();
            !CORPORATE_DESIGNATORS.contains(&lower.as_str())
        })
        .take(3)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds the ordered, deduplicated list of query candidates for an
/// employer.
///
/// # Arguments
///
/// * `name` - The employer's display name
/// * `override_term` - Optional explicit search-term override for this
///   employer
/// * `prefix` - The fixed domain phrase used for prefixed candidates
pub fn build_query_candidates(
    name: &str,
    override_term: Option<&str>,
    prefix: &str,
) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    let mut push = |candidate: String| {
        let trimmed = candidate.trim().to_string();
        if !trimmed.is_empty() && !candidates.contains(&trimmed) {
            candidates.push(trimmed);
        }
    };

    if let Some(term) = override_term {
        push(term.to_string());
        push(format!("{} {}", prefix, term));
    }

    let simplified = simplify_company_name(name);
    if !simplified.is_empty() {
        push(format!("{} {}", prefix, simplified));
        push(simplified.clone());
    }

    push(format!("{} {}", prefix, name));
    push(name.to_string());

    // The raw name alone is the last resort when everything else was empty
    if candidates.is_empty() {
        candidates.push(name.trim().to_string());
    }

    candidates
}
