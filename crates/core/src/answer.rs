use crate::chat::ChatModel;
use crate::embeddings::Embedder;
use crate::models::SearchHit;
use crate::traits::VectorStore;
use tracing::{error, warn};

pub const RELEVANCE_THRESHOLD: f64 = 0.7;
pub const CONTEXT_TOP_K: usize = 3;
pub const SNIPPET_MAX_CHARS: usize = 500;

/// Returned whenever answer generation itself fails. The composer never
/// surfaces an error or an empty response to its caller.
pub const FALLBACK_ANSWER: &str =
    "I could not process your question right now. Please try again in a moment.";

const PERSONA_PROMPT: &str = "You are a helpful assistant answering questions about a private \
document collection. Answer clearly and concisely, and say so when the available information \
is not sufficient.";

/// The ordered subset of search hits that qualify as grounding context.
pub struct RetrievalContext {
    snippets: Vec<SearchHit>,
}

impl RetrievalContext {
    /// Keeps hits scoring strictly above the threshold, best first, truncated
    /// to `max_snippets`.
    pub fn select(hits: Vec<SearchHit>, threshold: f64, max_snippets: usize) -> Self {
        let mut qualifying: Vec<SearchHit> = hits
            .into_iter()
            .filter(|hit| hit.score > threshold)
            .collect();
        qualifying.sort_by(|left, right| right.score.total_cmp(&left.score));
        qualifying.truncate(max_snippets);
        Self {
            snippets: qualifying,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    pub fn snippets(&self) -> &[SearchHit] {
        &self.snippets
    }

    /// Numbered context block handed to the chat model as system context.
    pub fn render(&self) -> String {
        let mut block = String::from("Relevant information from the knowledge base:\n");
        for (position, hit) in self.snippets.iter().enumerate() {
            block.push_str(&format!(
                "Document {} ({}): {}\n",
                position + 1,
                hit.filename,
                truncate_chars(&hit.text, SNIPPET_MAX_CHARS)
            ));
        }
        block.push_str(
            "\nAnswer using the information above. If it is not sufficient, say so clearly.",
        );
        block
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

/// Embeds a question, retrieves grounding context above the relevance
/// threshold, and generates either a grounded or a generic answer.
pub struct AnswerComposer<E, V, C> {
    embedder: E,
    vectors: V,
    chat: C,
}

impl<E, V, C> AnswerComposer<E, V, C>
where
    E: Embedder,
    V: VectorStore,
    C: ChatModel,
{
    pub fn new(embedder: E, vectors: V, chat: C) -> Self {
        Self {
            embedder,
            vectors,
            chat,
        }
    }

    /// Never fails: retrieval problems degrade to a context-free answer, and
    /// a generation failure produces the fixed fallback sentence.
    pub async fn answer(&self, question: &str) -> String {
        let context = self.retrieve_context(question).await;

        let system_prompt = match &context {
            Some(found) if !found.is_empty() => {
                format!("{PERSONA_PROMPT}\n\n{}", found.render())
            }
            _ => PERSONA_PROMPT.to_string(),
        };

        match self.chat.generate(&system_prompt, question).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("chat model returned an empty answer");
                FALLBACK_ANSWER.to_string()
            }
            Err(generation_error) => {
                error!(%generation_error, "answer generation failed");
                FALLBACK_ANSWER.to_string()
            }
        }
    }

    async fn retrieve_context(&self, question: &str) -> Option<RetrievalContext> {
        let query_vector = match self.embedder.embed(question).await {
            Ok(vector) => vector,
            Err(embed_error) => {
                warn!(%embed_error, "question embedding failed, answering without context");
                return None;
            }
        };

        match self.vectors.search(&query_vector, CONTEXT_TOP_K).await {
            Ok(hits) => Some(RetrievalContext::select(
                hits,
                RELEVANCE_THRESHOLD,
                CONTEXT_TOP_K,
            )),
            Err(search_error) => {
                warn!(%search_error, "vector search failed, answering without context");
                None
            }
        }
    }
}
