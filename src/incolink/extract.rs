//! Portal interaction flows
//!
//! Login, employer lookup, invoice selection and member extraction, all
//! written against the browser traits so they can be exercised with
//! scripted pages. The portal markup shifts between releases, so every
//! element is located by trying a ladder of selector candidates across
//! every frame; the ladders are ordered most-specific first.

use crate::browser::{frames, Page};
use crate::config::{BrowserConfig, IncolinkConfig};
use crate::incolink::members::{
    find_invoice_date, is_placeholder_row, parse_member_line, MemberRecord,
};
use crate::{Result, ScrapeContext, ScrapeError, ScrapeStage};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;

const EMAIL_SELECTORS: &[&str] = &[
    "input[type='email']",
    "input[name='email']",
    "input[placeholder*='mail']",
    "#email",
];

const PASSWORD_SELECTORS: &[&str] = &["input[type='password']", "input[name='password']"];

const TERMS_SELECTORS: &[&str] = &[
    "input[type='checkbox'][name*='terms']",
    "input[type='checkbox'][id*='terms']",
    "input[type='checkbox']",
];

const SUBMIT_SELECTORS: &[&str] = &[
    "#login-button",
    "button[type='submit']",
    "input[type='submit']",
];

const SEARCH_SELECTORS: &[&str] = &[
    "#employer-search",
    "input[type='search']",
    "input[placeholder*='Search']",
    "input[name='search']",
    "input[aria-label*='search']",
];

const TABLE_SELECTORS: &[&str] = &["table", "[role='grid']"];

const ROW_SELECTORS: &[&str] = &["table tr", "[role='row']"];

lazy_static! {
    static ref MONEY_RE: Regex = Regex::new(r"\$\s*([\d,]+(?:\.\d+)?)").unwrap();
    static ref INVOICE_NUMBER_RE: Regex = Regex::new(r"^\d{5,}$").unwrap();
}

fn candidates(selectors: &[&str]) -> Vec<String> {
    selectors.iter().map(|s| s.to_string()).collect()
}

/// Builds an error context from the page's current location
async fn page_context(page: &dyn Page) -> ScrapeContext {
    ScrapeContext {
        page_url: Some(page.current_url().await),
        page_title: Some(page.title().await),
        ..Default::default()
    }
}

/// Extracted invoice contents
#[derive(Debug, Clone)]
pub struct InvoiceExtract {
    pub invoice_date: Option<String>,
    pub members: Vec<MemberRecord>,
}

/// Logs into the portal.
///
/// Fails when no login form is found or when the URL does not change
/// after submitting, which is how the portal signals rejected credentials.
pub async fn login(
    page: &dyn Page,
    incolink: &IncolinkConfig,
    browser: &BrowserConfig,
) -> Result<()> {
    page.goto(&incolink.portal_url, browser.navigation_timeout())
        .await
        .map_err(|e| {
            ScrapeError::new(ScrapeStage::Login, format!("portal unreachable: {}", e))
        })?;

    page.wait_for_any(&candidates(EMAIL_SELECTORS), browser.dom_wait_timeout())
        .await;

    let Some((login_frame, email_selector)) =
        frames::find_frame_with(page, &candidates(EMAIL_SELECTORS)).await?
    else {
        return Err(ScrapeError::new(ScrapeStage::Login, "no email input found")
            .with_context(page_context(page).await)
            .into());
    };

    login_frame.fill(&email_selector, &incolink.email).await?;

    let mut password_filled = false;
    for selector in PASSWORD_SELECTORS {
        if login_frame.fill(selector, &incolink.password).await? {
            password_filled = true;
            break;
        }
    }
    if !password_filled {
        return Err(
            ScrapeError::new(ScrapeStage::Login, "no password input found")
                .with_context(page_context(page).await)
                .into(),
        );
    }

    // The terms checkbox only appears on first login of a session
    for selector in TERMS_SELECTORS {
        if let Some(false) = login_frame.is_checked(selector).await? {
            login_frame.click(selector).await?;
            break;
        }
    }

    let url_before = page.current_url().await;

    let mut submitted = false;
    for selector in SUBMIT_SELECTORS {
        if login_frame.click(selector).await? {
            submitted = true;
            break;
        }
    }
    if !submitted {
        return Err(
            ScrapeError::new(ScrapeStage::Login, "no submit control found")
                .with_context(page_context(page).await)
                .into(),
        );
    }

    if let Err(e) = page.wait_for_navigation(browser.navigation_timeout()).await {
        tracing::debug!("post-login navigation wait returned: {}", e);
    }

    if page.current_url().await == url_before {
        return Err(ScrapeError::new(
            ScrapeStage::Login,
            "page did not change after submitting credentials",
        )
        .with_context(page_context(page).await)
        .into());
    }

    tracing::info!("Logged into Incolink portal");
    Ok(())
}

/// Searches for an employer by Incolink account number and waits for the
/// results to settle
pub async fn lookup_employer(
    page: &dyn Page,
    incolink_id: &str,
    browser: &BrowserConfig,
) -> Result<()> {
    page.wait_for_any(&candidates(SEARCH_SELECTORS), browser.dom_wait_timeout())
        .await;

    let Some((frame, selector)) =
        frames::find_frame_with(page, &candidates(SEARCH_SELECTORS)).await?
    else {
        return Err(ScrapeError::new(
            ScrapeStage::EmployerLookup,
            "no employer search input found",
        )
        .with_context(page_context(page).await)
        .into());
    };

    frame.fill(&selector, incolink_id).await?;
    frame.press_enter(&selector).await?;

    // The results list renders in place without a navigation
    tokio::time::sleep(Duration::from_millis(1500)).await;
    page.wait_for_any(&candidates(TABLE_SELECTORS), browser.dom_wait_timeout())
        .await;

    Ok(())
}

/// Opens an invoice from the employer's invoice list.
///
/// With an explicit number, that invoice's link is clicked directly.
/// Otherwise the first row carrying a nonzero dollar amount and a link is
/// chosen; an empty invoice has nothing to reconcile.
pub async fn select_invoice(
    page: &dyn Page,
    invoice_number: Option<&str>,
    browser: &BrowserConfig,
) -> Result<String> {
    page.wait_for_any(&candidates(TABLE_SELECTORS), browser.dom_wait_timeout())
        .await;

    let target = match invoice_number {
        Some(number) => number.to_string(),
        None => match auto_detect_invoice(page).await? {
            Some(number) => number,
            None => {
                return Err(ScrapeError::new(
                    ScrapeStage::InvoiceSelection,
                    "no invoice with a nonzero amount found",
                )
                .with_context(page_context(page).await)
                .into())
            }
        },
    };

    if !frames::click_link_by_text(page, &target).await? {
        return Err(ScrapeError::new(
            ScrapeStage::InvoiceSelection,
            format!("invoice link '{}' not found", target),
        )
        .with_context(page_context(page).await)
        .into());
    }

    if let Err(e) = page.wait_for_navigation(browser.navigation_timeout()).await {
        tracing::debug!("invoice navigation wait returned: {}", e);
    }

    Ok(target)
}

/// Picks the first linked invoice row with a nonzero amount; falls back to
/// the first link that looks like an invoice number
async fn auto_detect_invoice(page: &dyn Page) -> Result<Option<String>> {
    for selector in ROW_SELECTORS {
        for row in frames::collect_table_rows(page, selector).await? {
            if row.link_texts.is_empty() {
                continue;
            }
            if !has_nonzero_amount(&row.text) {
                continue;
            }
            if let Some(link) = row
                .link_texts
                .iter()
                .find(|l| INVOICE_NUMBER_RE.is_match(l.trim()))
            {
                return Ok(Some(link.trim().to_string()));
            }
        }
    }

    // No amounts recognized; take any link shaped like an invoice number
    for selector in ROW_SELECTORS {
        for row in frames::collect_table_rows(page, selector).await? {
            if let Some(link) = row
                .link_texts
                .iter()
                .find(|l| INVOICE_NUMBER_RE.is_match(l.trim()))
            {
                return Ok(Some(link.trim().to_string()));
            }
        }
    }

    Ok(None)
}

fn has_nonzero_amount(text: &str) -> bool {
    MONEY_RE.captures_iter(text).any(|c| {
        let digits: String = c[1].chars().filter(|ch| ch.is_ascii_digit()).collect();
        digits.chars().any(|ch| ch != '0')
    })
}

/// Extracts the invoice date and member rows from the open invoice
pub async fn extract_members(page: &dyn Page, browser: &BrowserConfig) -> Result<InvoiceExtract> {
    page.wait_for_any(&candidates(TABLE_SELECTORS), browser.dom_wait_timeout())
        .await;

    let page_text = frames::all_text(page).await?;
    let invoice_date = find_invoice_date(&page_text);

    let mut members: Vec<MemberRecord> = Vec::new();
    let mut seen_raw: Vec<String> = Vec::new();

    for selector in ROW_SELECTORS {
        for row in frames::collect_table_rows(page, selector).await? {
            if is_placeholder_row(&row.text) {
                continue;
            }
            let Some(member) = parse_member_line(&row.text) else {
                continue;
            };
            if seen_raw.contains(&member.raw) {
                continue;
            }
            seen_raw.push(member.raw.clone());
            members.push(member);
        }
    }

    if members.is_empty() {
        return Err(ScrapeError::new(
            ScrapeStage::Extraction,
            "no member rows recognized on invoice page",
        )
        .with_context(ScrapeContext {
            page_url: Some(page.current_url().await),
            page_title: Some(page.title().await),
            ..Default::default()
        }
        .with_html_sample(&page_text))
        .into());
    }

    Ok(InvoiceExtract {
        invoice_date,
        members,
    })
}
