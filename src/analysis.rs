//! Violation analysis service.
//!
//! One-shot analysis of free text for probation/parole violation
//! indicators. Builds a single structured prompt, invokes the model at low
//! temperature to bias toward deterministic output, and decodes the reply
//! strictly as the documented JSON contract. A malformed reply is the typed,
//! fatal [`AppError::ModelOutputMalformed`] — no retry, no repair.
//!
//! Document-context enrichment and the result back-write are best-effort
//! and can never fail the analysis itself.

use serde::Deserialize;
use std::sync::Arc;

use crate::chat::best_effort;
use crate::error::{AppError, Result};
use crate::llm::{ChatOptions, LanguageModel, ModelMessage};
use crate::models::AnalysisResult;
use crate::store::Store;

const ANALYSIS_TEMPERATURE: f32 = 0.3;
const ANALYSIS_MAX_TOKENS: u32 = 3000;

/// Optional caller-supplied context for one analysis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisContext {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub previous_violations: Vec<String>,
    #[serde(default)]
    pub guidelines: Vec<String>,
}

pub struct AnalysisService {
    store: Store,
    model: Arc<dyn LanguageModel>,
}

impl AnalysisService {
    pub fn new(store: Store, model: Arc<dyn LanguageModel>) -> Self {
        Self { store, model }
    }

    /// Analyze text for violation indicators.
    ///
    /// Length bounds on `text` are enforced by the HTTP layer, not here.
    /// Numeric ranges in the result come from the model and are trusted as
    /// produced.
    pub async fn analyze_text(
        &self,
        text: &str,
        document_id: Option<&str>,
        context: Option<&AnalysisContext>,
    ) -> Result<AnalysisResult> {
        let started = std::time::Instant::now();

        // Context building never fails the analysis.
        let document_context = match document_id {
            Some(id) => best_effort("document_context", self.describe_document(id)).await,
            None => None,
        };

        let prompt = build_analysis_prompt(text, document_context.as_deref(), context);

        let completion = self
            .model
            .invoke_chat(
                &[ModelMessage::user(prompt)],
                ChatOptions {
                    temperature: ANALYSIS_TEMPERATURE,
                    max_tokens: ANALYSIS_MAX_TOKENS,
                },
            )
            .await?;

        let mut result = decode_analysis(&completion.content)?;
        result.processing_time_ms = started.elapsed().as_millis() as u64;

        if let Some(id) = document_id {
            let payload = serde_json::to_value(&result)
                .unwrap_or(serde_json::Value::Null);
            best_effort("analysis_backwrite", async {
                self.store
                    .record_document_analysis(id, &payload, chrono::Utc::now())
                    .await
            })
            .await;
        }

        Ok(result)
    }

    async fn describe_document(&self, document_id: &str) -> Result<String> {
        let doc = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound {
                entity: "document",
                id: document_id.to_string(),
            })?;

        let mut desc = format!("Document: {} ({})", doc.title, doc.content_type);
        if !doc.tags.is_empty() {
            desc.push_str(&format!("; tags: {}", doc.tags.join(", ")));
        }
        Ok(desc)
    }
}

/// Build the single structured analysis prompt.
fn build_analysis_prompt(
    text: &str,
    document_context: Option<&str>,
    context: Option<&AnalysisContext>,
) -> String {
    let mut prompt = String::from(
        "You are an analyst reviewing probation and parole records for \
         violation indicators.\n\n",
    );

    if let Some(doc) = document_context {
        prompt.push_str("Source context:\n");
        prompt.push_str(doc);
        prompt.push_str("\n\n");
    }

    if let Some(ctx) = context {
        if let Some(subject) = &ctx.subject {
            prompt.push_str(&format!("Subject: {}\n", subject));
        }
        if !ctx.previous_violations.is_empty() {
            prompt.push_str("Previous violations:\n");
            for v in &ctx.previous_violations {
                prompt.push_str(&format!("- {}\n", v));
            }
        }
        if !ctx.guidelines.is_empty() {
            prompt.push_str("Applicable guidelines:\n");
            for g in &ctx.guidelines {
                prompt.push_str(&format!("- {}\n", g));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str("Analyze the following text for violation indicators:\n\n");
    prompt.push_str(text);
    prompt.push_str(
        "\n\nRespond with a single JSON object and nothing else, using \
         exactly this shape:\n\
         {\n\
         \x20 \"violations\": [{\n\
         \x20   \"type\": \"<violation category>\",\n\
         \x20   \"severity\": \"low|medium|high|critical\",\n\
         \x20   \"confidence\": <0.0-1.0>,\n\
         \x20   \"location\": {\"start\": <int>, \"end\": <int>, \"text\": \"<matched span>\"},\n\
         \x20   \"description\": \"<what was found>\",\n\
         \x20   \"suggestedActions\": [\"<action>\"]\n\
         \x20 }],\n\
         \x20 \"summary\": \"<one-paragraph summary>\",\n\
         \x20 \"riskScore\": <integer 0-100>,\n\
         \x20 \"recommendations\": [\"<recommendation>\"]\n\
         }\n",
    );

    prompt
}

/// Strict decode of the model's reply into the analysis contract.
///
/// A single surrounding Markdown code fence is stripped first; models
/// habitually fence their JSON even when told not to. Anything else
/// malformed is fatal.
fn decode_analysis(raw: &str) -> Result<AnalysisResult> {
    let body = strip_code_fence(raw);
    serde_json::from_str(body).map_err(|e| AppError::ModelOutputMalformed(e.to_string()))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence line, then the closing fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
