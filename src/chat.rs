//! Conversation orchestrator.
//!
//! Owns the chat-session lifecycle and drives one full ask-and-answer
//! exchange per incoming user message: persist the question, assemble
//! conversational memory and retrieved grounding, invoke the model, persist
//! the reply, and re-index the exchange for future retrieval.
//!
//! Mandatory steps (message persistence, model invocation) propagate their
//! errors. Retrieval and post-reply indexing are best-effort: wrapped in
//! [`best_effort`], logged at warn, never surfaced to the caller.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use crate::config::RetrievalConfig;
use crate::error::{AppError, Result};
use crate::llm::{ChatOptions, LanguageModel, ModelMessage};
use crate::models::{
    new_id, ChatMessage, ChatSession, MessageMetadata, MessageRole, SourceReference,
};
use crate::search_index::{
    HybridOptions, SearchHit, SearchIndex, CONTEXT_INDEX, KNOWLEDGE_INDEX,
};
use crate::store::{Page, QueryPage, Store};

/// Excerpt cap when injecting retrieved context into the model prompt.
const CONTEXT_EXCERPT_CHARS: usize = 500;
/// Excerpt cap for source references returned to the caller.
const SOURCE_EXCERPT_CHARS: usize = 200;

const CHAT_TEMPERATURE: f32 = 0.7;
const CHAT_MAX_TOKENS: u32 = 2000;

/// What `send_message` returns to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: String,
    pub session_id: String,
    pub sources: Vec<SourceReference>,
    pub metadata: SendMessageMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageMetadata {
    pub tokens_used: u32,
    pub processing_time_ms: u64,
}

/// Run a fallible sub-task whose failure must not abort the caller.
///
/// The error is logged at warn level and replaced with `None`, making every
/// suppression site visible and testable.
pub async fn best_effort<T, F>(operation: &'static str, fut: F) -> Option<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(operation, error = %err, "best-effort step failed");
            None
        }
    }
}

pub struct ChatService {
    store: Store,
    search: SearchIndex,
    model: Arc<dyn LanguageModel>,
    retrieval: RetrievalConfig,
}

impl ChatService {
    pub fn new(
        store: Store,
        search: SearchIndex,
        model: Arc<dyn LanguageModel>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            search,
            model,
            retrieval,
        }
    }

    /// Create a fresh, active session. Always succeeds for a non-empty user.
    pub async fn create_session(
        &self,
        user_id: &str,
        title: &str,
        metadata: serde_json::Value,
    ) -> Result<ChatSession> {
        if user_id.is_empty() {
            return Err(AppError::Validation("user_id must not be empty".into()));
        }

        let now = Utc::now();
        let session = ChatSession {
            id: new_id("sess"),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
            is_active: true,
            metadata,
        };
        self.store.put_session(&session).await?;
        Ok(session)
    }

    /// Fetch a session, enforcing existence and ownership. No side effects.
    pub async fn get_session(&self, session_id: &str, user_id: &str) -> Result<ChatSession> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "session",
                id: session_id.to_string(),
            })?;

        if session.user_id != user_id {
            // Deliberately content-free: the caller learns nothing about
            // the session they don't own.
            return Err(AppError::Forbidden);
        }
        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: &str, page: Page) -> Result<QueryPage<ChatSession>> {
        self.store.list_sessions(user_id, page).await
    }

    /// Soft delete. Idempotent: deleting an inactive session succeeds
    /// silently.
    pub async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<()> {
        let session = self.get_session(session_id, user_id).await?;
        if !session.is_active {
            return Ok(());
        }
        self.store.deactivate_session(session_id, Utc::now()).await
    }

    pub async fn get_messages(
        &self,
        session_id: &str,
        user_id: &str,
        page: Page,
    ) -> Result<QueryPage<ChatMessage>> {
        self.get_session(session_id, user_id).await?;
        self.store.list_messages(session_id, page).await
    }

    /// One full exchange: persist the question, ground it, answer it,
    /// persist and re-index the reply.
    pub async fn send_message(
        &self,
        session_id: &str,
        user_id: &str,
        text: &str,
    ) -> Result<SendMessageResponse> {
        let started = std::time::Instant::now();

        let session = self.get_session(session_id, user_id).await?;
        if !session.is_active {
            return Err(AppError::InvalidSession(session_id.to_string()));
        }

        // 1. Persist the user's message before any model call so a later
        //    failure cannot lose their input. Timestamps are the per-session
        //    sort key and must stay strictly increasing, even when sends
        //    land within one clock tick.
        let user_ts = match self.store.last_message_timestamp(session_id).await? {
            Some(previous) => next_timestamp(previous),
            None => Utc::now(),
        };
        let user_message = ChatMessage {
            id: new_id("msg"),
            session_id: session_id.to_string(),
            role: MessageRole::User,
            content: text.to_string(),
            timestamp: user_ts,
            metadata: None,
        };
        self.store.put_message(&user_message).await?;

        // 2. Conversational memory: fetch double the limit, keep the most
        //    recent half. Tolerates uneven user/assistant pairing.
        let limit = self.retrieval.history_limit;
        let mut history = self
            .store
            .recent_messages(session_id, limit * 2)
            .await?;
        if history.len() > limit {
            history.drain(..history.len() - limit);
        }
        // The just-written message is appended separately below.
        history.retain(|m| m.id != user_message.id);

        // 3. Retrieval is non-fatal: embedding or search failure degrades
        //    to an empty grounding set.
        let hits = best_effort("knowledge_retrieval", async {
            let vector = self.model.generate_embedding(text).await?;
            let response = self
                .search
                .hybrid_search(
                    KNOWLEDGE_INDEX,
                    text,
                    Some(&vector),
                    HybridOptions {
                        text_weight: self.retrieval.text_weight,
                        vector_weight: self.retrieval.vector_weight,
                        k: self.retrieval.top_k,
                    },
                )
                .await?;
            Ok(response.hits)
        })
        .await
        .unwrap_or_default();

        // 4. Assemble the model context.
        let messages = build_model_messages(
            &hits,
            &history,
            text,
            self.retrieval.context_messages,
        );

        // 5. Model invocation is mandatory; its failure surfaces.
        let completion = self
            .model
            .invoke_chat(
                &messages,
                ChatOptions {
                    temperature: CHAT_TEMPERATURE,
                    max_tokens: CHAT_MAX_TOKENS,
                },
            )
            .await?;

        let sources: Vec<SourceReference> = hits
            .iter()
            .map(|hit| SourceReference {
                id: hit.id.clone(),
                title: hit.title.clone(),
                excerpt: truncate_chars(&hit.excerpt, SOURCE_EXCERPT_CHARS),
                relevance_score: hit.score,
                origin: hit.origin.clone(),
            })
            .collect();

        let processing_time_ms = started.elapsed().as_millis() as u64;
        let tokens_used = completion.usage.total();

        // 6. Persist the reply. Timestamps stay strictly increasing per
        //    session even when the exchange completes within one tick.
        let assistant_ts = next_timestamp(user_ts);
        let assistant_message = ChatMessage {
            id: new_id("msg"),
            session_id: session_id.to_string(),
            role: MessageRole::Assistant,
            content: completion.content.clone(),
            timestamp: assistant_ts,
            metadata: Some(MessageMetadata {
                tokens_used: Some(tokens_used),
                processing_time_ms: Some(processing_time_ms),
                sources: (!sources.is_empty()).then(|| sources.clone()),
            }),
        };
        self.store.put_message(&assistant_message).await?;

        // 7. The session surfaces in recency-ordered listings as of this
        //    reply.
        self.store.touch_session(session_id, assistant_ts).await?;

        // 8. Re-index the exchange for future retrieval. Failures are
        //    logged and swallowed.
        best_effort("context_indexing", async {
            self.index_exchange(&user_message, &assistant_message).await
        })
        .await;

        Ok(SendMessageResponse {
            message: completion.content,
            session_id: session_id.to_string(),
            sources,
            metadata: SendMessageMetadata {
                tokens_used,
                processing_time_ms,
            },
        })
    }

    async fn index_exchange(
        &self,
        user_message: &ChatMessage,
        assistant_message: &ChatMessage,
    ) -> Result<()> {
        for message in [user_message, assistant_message] {
            let embedding = self.model.generate_embedding(&message.content).await?;
            self.search
                .index_entry(
                    CONTEXT_INDEX,
                    &message.id,
                    &format!("{} message", message.role.as_str()),
                    &message.content,
                    "conversation",
                    Some(&embedding),
                )
                .await?;
        }
        Ok(())
    }
}

/// Assemble the message list for the model.
///
/// When retrieval produced hits, a synthetic user/assistant turn pair
/// injects the concatenated excerpts as grounding, then the most recent
/// `context_messages` history turns, then the new user message.
fn build_model_messages(
    hits: &[SearchHit],
    history: &[ChatMessage],
    text: &str,
    context_messages: usize,
) -> Vec<ModelMessage> {
    let mut messages = Vec::new();

    if !hits.is_empty() {
        let mut context = String::from(
            "Relevant guidance from the knowledge base for this conversation:\n",
        );
        for hit in hits {
            context.push_str("\n[");
            context.push_str(&hit.title);
            context.push_str("]\n");
            context.push_str(&truncate_chars(&hit.excerpt, CONTEXT_EXCERPT_CHARS));
            context.push('\n');
        }
        messages.push(ModelMessage::user(context));
        messages.push(ModelMessage::assistant(
            "Understood. I will use this guidance when answering.",
        ));
    }

    let start = history.len().saturating_sub(context_messages);
    for message in &history[start..] {
        messages.push(ModelMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        });
    }

    messages.push(ModelMessage::user(text));
    messages
}

/// Strictly-after timestamp: `now`, bumped by one millisecond if the clock
/// has not advanced past `previous`.
///
/// The store truncates timestamps to whole milliseconds, so the comparison
/// happens in that domain; sub-millisecond progress is not enough.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now.timestamp_millis() > previous.timestamp_millis() {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

/// Character-safe truncation.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, title: &str, excerpt: &str) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            title: title.to_string(),
            excerpt: excerpt.to_string(),
            score: 0.8,
            origin: "knowledge_base".to_string(),
        }
    }

    fn message(role: MessageRole, content: &str) -> ChatMessage {
        ChatMessage {
            id: new_id("msg"),
            session_id: "sess_test".to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    #[test]
    fn test_context_without_hits_is_history_plus_text() {
        let history = vec![
            message(MessageRole::User, "first"),
            message(MessageRole::Assistant, "reply"),
        ];
        let messages = build_model_messages(&[], &history, "second", 8);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].content, "second");
    }

    #[test]
    fn test_context_with_hits_prepends_grounding_pair() {
        let hits = vec![hit("k1", "Curfew policy", "Curfew violations require...")];
        let messages = build_model_messages(&hits, &[], "I missed curfew", 8);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert!(messages[0].content.contains("Curfew policy"));
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].content, "I missed curfew");
    }

    #[test]
    fn test_context_keeps_only_recent_history() {
        let history: Vec<ChatMessage> = (0..12)
            .map(|i| message(MessageRole::User, &format!("turn {}", i)))
            .collect();
        let messages = build_model_messages(&[], &history, "latest", 8);
        // 8 history turns + the new message
        assert_eq!(messages.len(), 9);
        assert_eq!(messages[0].content, "turn 4");
        assert_eq!(messages[7].content, "turn 11");
    }

    #[test]
    fn test_grounding_excerpts_are_capped() {
        let long = "x".repeat(2000);
        let hits = vec![hit("k1", "Long", &long)];
        let messages = build_model_messages(&hits, &[], "q", 8);
        assert!(messages[0].content.len() < 700);
    }

    #[test]
    fn test_send_response_serializes_camel_case() {
        let response = SendMessageResponse {
            message: "Noted.".to_string(),
            session_id: "sess_1".to_string(),
            sources: Vec::new(),
            metadata: SendMessageMetadata {
                tokens_used: 20,
                processing_time_ms: 35,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["sessionId"], "sess_1");
        assert_eq!(json["metadata"]["tokensUsed"], 20);
        assert_eq!(json["metadata"]["processingTimeMs"], 35);
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 3), "hél");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn test_next_timestamp_strictly_increases() {
        let now = Utc::now();
        let later = next_timestamp(now);
        assert!(later > now);
        let far_future = now + Duration::seconds(60);
        assert!(next_timestamp(far_future) > far_future);
    }

    #[test]
    fn test_next_timestamp_advances_a_whole_millisecond() {
        // Sub-millisecond clock progress must still yield distinct stored
        // values, which are truncated to whole milliseconds.
        let now = Utc::now();
        let later = next_timestamp(now);
        assert!(later.timestamp_millis() > now.timestamp_millis());

        let far_future = now + Duration::seconds(60);
        assert!(
            next_timestamp(far_future).timestamp_millis() > far_future.timestamp_millis()
        );
    }
}
