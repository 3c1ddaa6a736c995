//! Search result parsing
//!
//! The document-search page embeds a JSON view model that the site's
//! client-side framework would normally render. Parsing that payload
//! directly is the primary strategy; when it is absent or yields nothing
//! (older cached pages, error pages), the legacy HTML structure is parsed
//! instead: heading anchors with adjacent metadata text mined by regex.

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Marker that identifies the embedded results view model in a script tag
const VIEW_MODEL_MARKER: &str = "documentSearchViewModel";

/// One agreement search result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub agreement_type: Option<String>,
    pub status: Option<String>,
    pub approved_date: Option<String>,
    pub expiry_date: Option<String>,
    pub lodgement_number: Option<String>,
    pub document_url: Option<String>,
    pub summary_url: Option<String>,
    pub download_token: Option<String>,
}

/// Wire shape of one entry in the embedded view model
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewModelResult {
    #[serde(default)]
    document_title: Option<String>,
    #[serde(default)]
    agreement_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    approved_date: Option<String>,
    #[serde(default)]
    nominal_expiry_date: Option<String>,
    #[serde(default)]
    publication_id: Option<String>,
    #[serde(default)]
    document_url: Option<String>,
    #[serde(default)]
    summary_url: Option<String>,
    #[serde(default)]
    download_token: Option<String>,
}

/// Parses search results from a response page.
///
/// Primary: the embedded view-model payload. Fallback: the legacy DOM,
/// used when the view model is absent or maps to zero results.
pub fn parse_search_results(html: &str) -> Vec<SearchResult> {
    let from_view_model = extract_view_model(html)
        .map(parse_view_model)
        .unwrap_or_default();

    if !from_view_model.is_empty() {
        return from_view_model;
    }

    parse_legacy_dom(html)
}

/// Locates and extracts the embedded view-model JSON from the page HTML.
///
/// The payload sits inside a script tag, assigned to a framework variable,
/// so the JSON has to be carved out by balanced-brace scanning rather than
/// parsing the whole script text.
fn extract_view_model(html: &str) -> Option<serde_json::Value> {
    let document = Html::parse_document(html);
    let script_selector = Selector::parse("script").ok()?;

    for script in document.select(&script_selector) {
        let text: String = script.text().collect();
        if let Some(marker_pos) = text.find(VIEW_MODEL_MARKER) {
            if let Some(json_text) = extract_balanced_json(&text[marker_pos..]) {
                if let Ok(value) = serde_json::from_str(json_text) {
                    return Some(value);
                }
            }
        }
    }

    None
}

/// Extracts the first balanced JSON object or array following the start of
/// the given text, string-literal aware
fn extract_balanced_json(text: &str) -> Option<&str> {
    let start = text.find(|c| c == '{' || c == '[')?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Maps the view-model payload into search results.
///
/// The result array lives under a `results` key (object form) or is the
/// payload itself (array form). Entries without a title are dropped.
fn parse_view_model(value: serde_json::Value) -> Vec<SearchResult> {
    let entries = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => match map.get("results") {
            Some(serde_json::Value::Array(items)) => items.clone(),
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let parsed: ViewModelResult = serde_json::from_value(entry).ok()?;
            let title = parsed.document_title?;
            if title.trim().is_empty() {
                return None;
            }
            Some(SearchResult {
                title,
                agreement_type: parsed.agreement_type,
                status: parsed.status,
                approved_date: parsed.approved_date,
                expiry_date: parsed.nominal_expiry_date,
                lodgement_number: parsed.publication_id,
                document_url: parsed.document_url,
                summary_url: parsed.summary_url,
                download_token: parsed.download_token,
            })
        })
        .collect()
}

lazy_static! {
    static ref STATUS_RE: Regex = Regex::new(r"(?i)status:\s*([A-Za-z][A-Za-z ]*[A-Za-z])").unwrap();
    static ref LODGEMENT_RE: Regex = Regex::new(r"\b(AE?G?\d{4,6}(?:/\d+)?)\b").unwrap();
    static ref DATE_RE: Regex = Regex::new(r"\b(\d{1,2}/\d{1,2}/\d{2,4})\b").unwrap();
}

/// Parses the legacy HTML result structure: heading anchors paired with
/// adjacent metadata text
fn parse_legacy_dom(html: &str) -> Vec<SearchResult> {
    let document = Html::parse_document(html);

    let Ok(result_selector) = Selector::parse(".search-result, .document-result, li.result")
    else {
        return Vec::new();
    };
    let Ok(anchor_selector) = Selector::parse("h3 a, h4 a, a.document-title") else {
        return Vec::new();
    };

    let mut results = Vec::new();

    for container in document.select(&result_selector) {
        let Some(anchor) = container.select(&anchor_selector).next() else {
            continue;
        };

        let title: String = anchor.text().collect::<String>().trim().to_string();
        if title.is_empty() {
            continue;
        }

        let document_url = anchor.value().attr("href").map(|s| s.to_string());

        // Everything else in the container is metadata text
        let metadata: String = container.text().collect::<Vec<_>>().join(" ");

        let status = STATUS_RE
            .captures(&metadata)
            .map(|c| c[1].trim().to_string());
        let lodgement_number = LODGEMENT_RE
            .captures(&metadata)
            .map(|c| c[1].to_string());

        let mut dates = DATE_RE.find_iter(&metadata).map(|m| m.as_str().to_string());
        let approved_date = dates.next();
        let expiry_date = dates.next();

        results.push(SearchResult {
            title,
            agreement_type: None,
            status,
            approved_date,
            expiry_date,
            lodgement_number,
            document_url,
            summary_url: None,
            download_token: None,
        });
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const VIEW_MODEL_PAGE: &str = r#"<html><body>
        <script>
            var documentSearchViewModel = {"results": [
                {"documentTitle": "ABC Enterprise Agreement 2024",
                 "status": "Approved",
                 "approvedDate": "05/03/2024",
                 "nominalExpiryDate": "30/06/2027",
                 "publicationId": "AE524123",
                 "documentUrl": "https://example.com/doc/1"},
                {"status": "Approved"},
                {"documentTitle": "XYZ Agreement", "downloadToken": "tok-9"}
            ]};
            render(documentSearchViewModel);
        </script>
        </body></html>"#;

    #[test]
    fn test_view_model_parse() {
        let results = parse_search_results(VIEW_MODEL_PAGE);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "ABC Enterprise Agreement 2024");
        assert_eq!(results[0].status.as_deref(), Some("Approved"));
        assert_eq!(results[0].lodgement_number.as_deref(), Some("AE524123"));
        assert_eq!(results[1].download_token.as_deref(), Some("tok-9"));
    }

    #[test]
    fn test_view_model_entry_without_title_is_dropped() {
        let results = parse_search_results(VIEW_MODEL_PAGE);
        assert!(results.iter().all(|r| !r.title.is_empty()));
    }

    #[test]
    fn test_balanced_extraction_survives_trailing_script() {
        let text = r#"documentSearchViewModel = {"results": []}; doSomething();"#;
        let json = extract_balanced_json(text).unwrap();
        assert_eq!(json, r#"{"results": []}"#);
    }

    #[test]
    fn test_balanced_extraction_handles_braces_in_strings() {
        let text = r#"= {"a": "curly } inside", "b": 1} tail"#;
        let json = extract_balanced_json(text).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(json).is_ok());
    }

    const LEGACY_PAGE: &str = r#"<html><body>
        <div class="search-result">
            <h3><a href="/document/AE501234">ABC Enterprise Agreement 2021</a></h3>
            <p>Status: Approved &mdash; AE501234 &mdash; 12/11/2021 &mdash; 30/06/2025</p>
        </div>
        <div class="search-result">
            <h3><a href="/document/AE501235">Another Agreement</a></h3>
            <p>No metadata here</p>
        </div>
        </body></html>"#;

    #[test]
    fn test_legacy_dom_fallback() {
        let results = parse_search_results(LEGACY_PAGE);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "ABC Enterprise Agreement 2021");
        assert_eq!(results[0].status.as_deref(), Some("Approved"));
        assert_eq!(results[0].lodgement_number.as_deref(), Some("AE501234"));
        assert_eq!(results[0].approved_date.as_deref(), Some("12/11/2021"));
        assert_eq!(results[0].expiry_date.as_deref(), Some("30/06/2025"));
        assert_eq!(
            results[0].document_url.as_deref(),
            Some("/document/AE501234")
        );
    }

    #[test]
    fn test_empty_view_model_falls_back_to_dom() {
        let page = format!(
            r#"<html><body>
            <script>var documentSearchViewModel = {{"results": []}};</script>
            {}
            </body></html>"#,
            r#"<div class="search-result"><h3><a href="/d/1">Fallback Agreement</a></h3></div>"#
        );
        let results = parse_search_results(&page);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Fallback Agreement");
    }

    #[test]
    fn test_no_results_anywhere() {
        assert!(parse_search_results("<html><body>nothing</body></html>").is_empty());
    }
}
