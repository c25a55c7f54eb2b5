//! Vector index: exact cosine retrieval in memory, persisted as LanceDB
//! tables inside versioned generation directories.

pub mod index;
pub mod schema;
pub mod store;

pub use index::{IndexEntry, IndexHandle, VectorIndex};
pub use store::{IndexManifest, IndexStore, FORMAT_VERSION};
