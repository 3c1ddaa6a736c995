//! Browser automation seam
//!
//! The Incolink portal has no documented API; interaction is DOM-driven and
//! brittle by nature. This module isolates that brittleness behind object-safe
//! traits so the pipeline logic can be exercised against scripted pages, with
//! a chromiumoxide adapter for production.

pub mod chromium;
pub mod frames;
mod traits;

pub use chromium::ChromiumBrowser;
pub use traits::{Browser, BrowserError, Frame, Page, TableRow};
