//! Hybrid search tests against a real SQLite database, covering the FTS5
//! lexical channel, the vector channel, and their weighted merge.

mod common;

use common::{setup, StubModel};

use caseline::search_index::{HybridOptions, CONTEXT_INDEX, KNOWLEDGE_INDEX};

fn options() -> HybridOptions {
    HybridOptions {
        text_weight: 0.7,
        vector_weight: 0.3,
        k: 5,
    }
}

#[tokio::test]
async fn text_search_matches_indexed_guidance() {
    let env = setup(StubModel::replying("ok")).await;

    env.search
        .index_entry(
            KNOWLEDGE_INDEX,
            "kb_appt",
            "Missed appointment policy",
            "A missed supervision appointment is a technical violation.",
            "knowledge_base",
            None,
        )
        .await
        .unwrap();
    env.search
        .index_entry(
            KNOWLEDGE_INDEX,
            "kb_travel",
            "Travel permit requirements",
            "Written approval is required before leaving the district.",
            "knowledge_base",
            None,
        )
        .await
        .unwrap();

    // Lexical-only query, no embedding available.
    let response = env
        .search
        .hybrid_search(KNOWLEDGE_INDEX, "missed appointment", None, options())
        .await
        .unwrap();

    assert!(!response.hits.is_empty());
    assert_eq!(response.hits[0].id, "kb_appt");
    assert_eq!(response.hits[0].title, "Missed appointment policy");
}

#[tokio::test]
async fn hybrid_search_combines_text_and_vector_channels() {
    let env = setup(StubModel::replying("ok")).await;

    env.search
        .index_entry(
            KNOWLEDGE_INDEX,
            "kb_drug",
            "Drug and alcohol testing",
            "A positive confirmed drug test is a high-severity violation.",
            "knowledge_base",
            Some(&[1.0, 0.0, 0.0, 0.0]),
        )
        .await
        .unwrap();
    env.search
        .index_entry(
            KNOWLEDGE_INDEX,
            "kb_curfew",
            "Curfew compliance",
            "Electronic monitoring alerts should be verified first.",
            "knowledge_base",
            Some(&[0.0, 1.0, 0.0, 0.0]),
        )
        .await
        .unwrap();

    let response = env
        .search
        .hybrid_search(
            KNOWLEDGE_INDEX,
            "positive drug test",
            Some(&[1.0, 0.0, 0.0, 0.0]),
            options(),
        )
        .await
        .unwrap();

    assert_eq!(response.hits[0].id, "kb_drug");
    assert!(response.hits[0].score > 0.0);
    assert!(response.hits[0].score <= 1.0 + 1e-9);
}

#[tokio::test]
async fn indexes_are_isolated_by_name() {
    let env = setup(StubModel::replying("ok")).await;

    env.search
        .index_entry(
            CONTEXT_INDEX,
            "msg_1",
            "user message",
            "I missed my appointment yesterday.",
            "conversation",
            None,
        )
        .await
        .unwrap();

    // The knowledge index must not surface conversation entries.
    let response = env
        .search
        .hybrid_search(KNOWLEDGE_INDEX, "missed appointment", None, options())
        .await
        .unwrap();
    assert!(response.hits.is_empty());

    let response = env
        .search
        .hybrid_search(CONTEXT_INDEX, "missed appointment", None, options())
        .await
        .unwrap();
    assert_eq!(response.hits.len(), 1);
}

#[tokio::test]
async fn punctuated_query_does_not_break_the_match() {
    let env = setup(StubModel::replying("ok")).await;

    env.search
        .index_entry(
            KNOWLEDGE_INDEX,
            "kb_appt",
            "Missed appointment policy",
            "A missed supervision appointment is a technical violation.",
            "knowledge_base",
            None,
        )
        .await
        .unwrap();

    let response = env
        .search
        .hybrid_search(
            KNOWLEDGE_INDEX,
            "what's the \"policy\" for a missed appointment?",
            None,
            options(),
        )
        .await
        .unwrap();
    assert!(!response.hits.is_empty());
}
