pub mod auth;
pub mod core;
pub mod documents;
pub mod history;
pub mod llm;
pub mod rag;
pub mod server;
pub mod state;
