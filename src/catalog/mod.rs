//! Collection catalog: definition parsing, indexing and dependency discovery.

pub mod definition;
pub mod extractor;
pub mod loader;

pub use definition::{CollectionDefinition, Source};
pub use extractor::{enrich, extract_tool_names};
pub use loader::Catalog;
