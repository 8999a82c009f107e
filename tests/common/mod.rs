//! Shared test harness: temp-file SQLite database plus a scripted stub
//! language model behind the same trait seam the real adapter uses.

use async_trait::async_trait;
use std::sync::Arc;
use tempfile::TempDir;

use caseline::analysis::AnalysisService;
use caseline::chat::ChatService;
use caseline::config::RetrievalConfig;
use caseline::db;
use caseline::error::{AppError, Result};
use caseline::llm::{ChatCompletion, ChatOptions, LanguageModel, ModelMessage, TokenUsage};
use caseline::migrate;
use caseline::search_index::SearchIndex;
use caseline::store::Store;

/// A language model whose chat and embedding behavior is fixed per test.
pub struct StubModel {
    pub chat_reply: std::result::Result<String, String>,
    pub embedding: std::result::Result<Vec<f32>, String>,
}

impl StubModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            chat_reply: Ok(reply.to_string()),
            embedding: Ok(vec![0.1; 8]),
        }
    }

    pub fn chat_failing() -> Self {
        Self {
            chat_reply: Err("model unavailable".to_string()),
            embedding: Ok(vec![0.1; 8]),
        }
    }

    pub fn embedding_failing(reply: &str) -> Self {
        Self {
            chat_reply: Ok(reply.to_string()),
            embedding: Err("embedding service down".to_string()),
        }
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn invoke_chat(
        &self,
        _messages: &[ModelMessage],
        _opts: ChatOptions,
    ) -> Result<ChatCompletion> {
        match &self.chat_reply {
            Ok(content) => Ok(ChatCompletion {
                content: content.clone(),
                usage: TokenUsage {
                    input_tokens: 12,
                    output_tokens: 8,
                },
            }),
            Err(msg) => Err(AppError::upstream("model", msg)),
        }
    }

    async fn generate_embedding(&self, _text: &str) -> Result<Vec<f32>> {
        match &self.embedding {
            Ok(vec) => Ok(vec.clone()),
            Err(msg) => Err(AppError::upstream("model", msg)),
        }
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

pub struct TestEnv {
    // Held so the database file outlives the services.
    pub _tmp: TempDir,
    pub store: Store,
    pub search: SearchIndex,
    pub chat: ChatService,
    pub analysis: AnalysisService,
}

pub async fn setup(model: StubModel) -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("caseline-test.sqlite"))
        .await
        .unwrap();
    migrate::apply_schema(&pool).await.unwrap();

    let model: Arc<dyn LanguageModel> = Arc::new(model);
    let store = Store::new(pool.clone());
    let search = SearchIndex::new(pool);

    TestEnv {
        _tmp: tmp,
        store: store.clone(),
        search: search.clone(),
        chat: ChatService::new(
            store.clone(),
            search.clone(),
            model.clone(),
            RetrievalConfig::default(),
        ),
        analysis: AnalysisService::new(store, model),
    }
}
