pub mod fs;
pub mod memory;
pub mod qdrant;

pub use fs::FsDocumentStore;
pub use memory::{InMemoryQueue, InMemoryVectorStore};
pub use qdrant::QdrantVectorStore;
