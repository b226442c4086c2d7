pub mod memory;
pub mod opensearch;

pub use memory::{MemoryChunkStore, MemoryLexicalIndex};
pub use opensearch::OpenSearchIndex;
