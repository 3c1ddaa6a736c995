//! Incolink invoice sync pipeline
//!
//! Logs into the Incolink portal with a headless browser, looks up each
//! employer by account number, opens an invoice, extracts the members it
//! covers, and reconciles them against the workers and placements tables.

mod extract;
mod members;
mod pipeline;

pub use members::{normalize_invoice_date, parse_member_line, MemberRecord};
pub use pipeline::{IncolinkOutcome, IncolinkSyncPipeline};
