//! FWC document-search HTTP client
//!
//! One GET per query candidate against the public search endpoint. No
//! browser involved: the embedded view-model payload is scraped straight
//! out of the response HTML.

use crate::config::FwcConfig;
use crate::fwc::parse::{parse_search_results, SearchResult};
use crate::{ScrapeContext, ScrapeError, ScrapeStage, WorkerError};
use reqwest::Client;
use url::Url;

/// User agent sent to the search endpoint
const USER_AGENT: &str = concat!("organiser-worker/", env!("CARGO_PKG_VERSION"));

/// Outcome of one search request, including the diagnostics needed if a
/// later stage fails
#[derive(Debug)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub final_url: String,
    pub html: String,
}

/// Client for the document-search endpoint
pub struct FwcSearchClient {
    client: Client,
    base_url: Url,
    page_size: u32,
}

impl FwcSearchClient {
    /// Builds a search client from the FWC configuration
    pub fn new(config: &FwcConfig) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .gzip(true)
            .build()?;

        let base_url = Url::parse(&config.search_base_url)?;

        Ok(Self {
            client,
            base_url,
            page_size: config.page_size,
        })
    }

    /// Builds the search URL for a query
    ///
    /// Carries the free-text query, the agreement result-type and sort
    /// options, the page size, and the approved-status facet.
    pub fn build_search_url(&self, query: &str) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("options", "SearchType_3,SortOrder_agreement-relevance")
            .append_pair("pagesize", &self.page_size.to_string())
            .append_pair("facets", "AgreementStatusDesc_Approved");
        url
    }

    /// Executes one search and parses the response page.
    ///
    /// An empty result list is not an error; callers advance to the next
    /// query candidate. Network and HTTP failures surface as scrape errors
    /// carrying the query and final URL for the audit trail.
    pub async fn search(&self, query: &str) -> Result<SearchPage, WorkerError> {
        let url = self.build_search_url(query);

        let response = self.client.get(url.clone()).send().await.map_err(|e| {
            ScrapeError::new(ScrapeStage::Search, format!("request failed: {}", e))
                .with_context(ScrapeContext {
                    query: Some(query.to_string()),
                    page_url: Some(url.to_string()),
                    ..Default::default()
                })
        })?;

        let final_url = response.url().to_string();
        let status = response.status();

        if !status.is_success() {
            // Error pages still carry useful diagnostics
            let body = response.text().await.unwrap_or_default();
            let mut context = ScrapeContext {
                query: Some(query.to_string()),
                page_url: Some(final_url),
                ..Default::default()
            };
            if !body.is_empty() {
                context = context.with_html_sample(&body);
            }
            return Err(ScrapeError::new(
                ScrapeStage::Search,
                format!("HTTP {} from search endpoint", status.as_u16()),
            )
            .with_context(context)
            .into());
        }

        let html = response.text().await.map_err(|e| {
            ScrapeError::new(ScrapeStage::Search, format!("failed to read body: {}", e))
                .with_context(ScrapeContext {
                    query: Some(query.to_string()),
                    page_url: Some(final_url.clone()),
                    ..Default::default()
                })
        })?;

        let results = parse_search_results(&html);

        Ok(SearchPage {
            results,
            final_url,
            html,
        })
    }
}
