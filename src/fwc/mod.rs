//! FWC document-search pipeline
//!
//! Looks up enterprise agreements for employers against the public FWC
//! document-search endpoint, parses the results (embedded view-model JSON
//! first, legacy DOM as fallback), and upserts the best match into the
//! EBA-record table.

mod parse;
mod pipeline;
mod query;
mod search;

pub use parse::{parse_search_results, SearchResult};
pub use pipeline::{FwcLookupPipeline, FwcOutcome};
pub use query::{build_query_candidates, simplify_company_name};
pub use search::FwcSearchClient;
