//! Frame traversal helpers
//!
//! The Incolink portal embeds its content in nested frames, and which frame
//! holds the search input or the invoice table varies between screens. These
//! helpers implement the "walk every frame, apply selector, collect
//! first/all matches" pattern once; the login flow, the employer search and
//! the member-table extractor all go through them.

use crate::browser::traits::{BrowserError, Frame, Page, TableRow};

/// Finds the first frame in which any of the selector candidates matches.
///
/// Candidates are tried in order; within one candidate, frames are visited
/// main-frame first. Returns the matching frame together with the selector
/// that hit.
pub async fn find_frame_with(
    page: &dyn Page,
    selectors: &[String],
) -> Result<Option<(Box<dyn Frame>, String)>, BrowserError> {
    for selector in selectors {
        for frame in page.frames().await? {
            if frame.exists(selector).await? {
                return Ok(Some((frame, selector.clone())));
            }
        }
    }
    Ok(None)
}

/// Collects table/grid rows from every frame, in frame order
pub async fn collect_table_rows(
    page: &dyn Page,
    selector: &str,
) -> Result<Vec<TableRow>, BrowserError> {
    let mut all = Vec::new();
    for frame in page.frames().await? {
        all.extend(frame.table_rows(selector).await?);
    }
    Ok(all)
}

/// Concatenates all visible text across every frame
pub async fn all_text(page: &dyn Page) -> Result<String, BrowserError> {
    let mut combined = String::new();
    for frame in page.frames().await? {
        let text = frame.all_text().await?;
        if !text.is_empty() {
            combined.push_str(&text);
            combined.push('\n');
        }
    }
    Ok(combined)
}

/// Clicks the first anchor matching `text` in any frame
pub async fn click_link_by_text(page: &dyn Page, text: &str) -> Result<bool, BrowserError> {
    for frame in page.frames().await? {
        if frame.click_link_by_text(text).await? {
            return Ok(true);
        }
    }
    Ok(false)
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeFrame, FakePage};
    use super::*;
    use std::collections::HashMap;

    fn two_frame_page() -> FakePage {
        let main = FakeFrame {
            body_text: "Welcome".to_string(),
            ..Default::default()
        };
        let nested = FakeFrame {
            elements: vec!["input[type='search']".to_string()],
            links: vec!["123456".to_string()],
            texts: HashMap::from([(
                "table tr td".to_string(),
                vec!["Smith, John (12345)".to_string()],
            )]),
            body_text: "Invoice 123456".to_string(),
            ..Default::default()
        };
        FakePage::new(vec![main, nested])
    }

    #[tokio::test]
    async fn test_find_frame_with_tries_candidates_in_order() {
        let page = two_frame_page();
        let candidates = vec![
            "#employer-search".to_string(),
            "input[type='search']".to_string(),
        ];

        let found = find_frame_with(&page, &candidates).await.unwrap();
        let (_, selector) = found.expect("selector should match in nested frame");
        assert_eq!(selector, "input[type='search']");
    }

    #[tokio::test]
    async fn test_find_frame_with_none_when_nothing_matches() {
        let page = two_frame_page();
        let candidates = vec!["#missing".to_string()];
        assert!(find_frame_with(&page, &candidates).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_click_link_by_text_across_frames() {
        let page = two_frame_page();
        assert!(click_link_by_text(&page, "123456").await.unwrap());
        assert!(!click_link_by_text(&page, "999999").await.unwrap());
    }

    #[tokio::test]
    async fn test_all_text_concatenates_frames() {
        let page = two_frame_page();
        let text = all_text(&page).await.unwrap();
        assert!(text.contains("Welcome"));
        assert!(text.contains("Invoice 123456"));
    }
}
