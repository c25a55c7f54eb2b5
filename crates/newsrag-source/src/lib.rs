//! Document sources feeding the ingestion pipeline.
//!
//! - [`WebSource`]: search results page, link extraction, page fetch and
//!   HTML-to-text conversion
//! - [`DirectorySource`]: `.txt` files under a local directory, for offline use

pub mod directory;
pub mod links;
pub mod web;

pub use directory::DirectorySource;
pub use links::select_links;
pub use web::WebSource;
