//! Prompt assembly for question answering over retrieved chunks.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::store::ChunkSearchResult;
use crate::history::{ChatRole, HistoryMessage};
use crate::llm::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer questions based on the provided context. \
If you don't know the answer, just say that you don't know, don't try to make up an answer. \
Answer in a concise manner.";

/// A retrieved chunk as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// 1-based rank within the retrieval result.
    pub id: usize,
    pub source: String,
    pub chunk_index: Option<u64>,
    pub score: f32,
    pub page_content: String,
}

/// System prompt, then the history window, then the question with its context.
pub fn build_messages(history: &[HistoryMessage], context: &str, question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));

    for message in history {
        messages.push(match message.role {
            ChatRole::Human => ChatMessage::user(message.content.clone()),
            ChatRole::Ai => ChatMessage::assistant(message.content.clone()),
        });
    }

    messages.push(ChatMessage::user(format!(
        "Context: {}, question: {}",
        context, question
    )));
    messages
}

pub fn format_docs(results: &[ChunkSearchResult]) -> String {
    results
        .iter()
        .map(|result| result.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn source_refs(results: &[ChunkSearchResult]) -> Vec<SourceRef> {
    results
        .iter()
        .enumerate()
        .map(|(i, result)| SourceRef {
            id: i + 1,
            source: result.chunk.source.clone(),
            chunk_index: result.chunk.chunk_index(),
            score: result.score,
            page_content: result.chunk.content.clone(),
        })
        .collect()
}

/// `{"chunks": [...]}` view of the retrieval result for clients that cite.
pub fn format_docs_structured(results: &[ChunkSearchResult]) -> Value {
    json!({ "chunks": source_refs(results) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::store::StoredChunk;

    fn result(content: &str, source: &str, index: u64, score: f32) -> ChunkSearchResult {
        ChunkSearchResult {
            chunk: StoredChunk {
                chunk_id: format!("{}-{}", source, index),
                content: content.to_string(),
                source: source.to_string(),
                owner: "alice".to_string(),
                metadata: Some(json!({ "chunk_index": index })),
            },
            score,
        }
    }

    fn history(role: ChatRole, content: &str) -> HistoryMessage {
        HistoryMessage {
            id: 1,
            session_id: "s1".to_string(),
            content: content.to_string(),
            role,
            created_at: String::new(),
        }
    }

    #[test]
    fn messages_follow_system_history_question_order() {
        let messages = build_messages(
            &[history(ChatRole::Human, "earlier q"), history(ChatRole::Ai, "earlier a")],
            "ctx",
            "what now?",
        );

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(messages[1], ChatMessage::user("earlier q"));
        assert_eq!(messages[2], ChatMessage::assistant("earlier a"));
        assert_eq!(messages[3], ChatMessage::user("Context: ctx, question: what now?"));
    }

    #[test]
    fn docs_are_joined_by_blank_lines() {
        let docs = [result("first", "a.pdf", 0, 0.9), result("second", "a.pdf", 1, 0.5)];
        assert_eq!(format_docs(&docs), "first\n\nsecond");
        assert_eq!(format_docs(&[]), "");
    }

    #[test]
    fn structured_docs_are_ranked_from_one() {
        let docs = [result("first", "a.pdf", 3, 0.75), result("second", "b.pdf", 0, 0.5)];
        let value = format_docs_structured(&docs);

        assert_eq!(value["chunks"][0]["id"], 1);
        assert_eq!(value["chunks"][0]["source"], "a.pdf");
        assert_eq!(value["chunks"][0]["chunk_index"], 3);
        assert_eq!(value["chunks"][0]["score"], 0.75);
        assert_eq!(value["chunks"][1]["id"], 2);
        assert_eq!(value["chunks"][1]["page_content"], "second");
    }
}
