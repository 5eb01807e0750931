//! Retrieval-augmented generation.
//!
//! - `splitter`: recursive character chunking
//! - `store` / `sqlite`: owner-scoped chunk storage with cosine search
//! - `prompt`: system prompt and context formatting
//! - `chain`: the question answering pipeline over all of the above

pub mod chain;
pub mod prompt;
pub mod splitter;
pub mod sqlite;
pub mod store;

pub use chain::{AskEvent, AskResponse, ChainOptions, RagChain};
pub use prompt::SourceRef;
pub use splitter::{RecursiveSplitter, TextChunk};
pub use sqlite::SqliteRagStore;
pub use store::{ChunkSearchResult, RagStore, SourceSummary, StoredChunk};
