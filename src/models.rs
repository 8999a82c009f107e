//! Core data models used throughout Caseline.
//!
//! These types represent the chat sessions and messages that flow through
//! the conversation pipeline, the documents and reference records seeded
//! into the store, and the structured contract the analysis service expects
//! back from the language model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chat session owned by a single user.
///
/// Sessions are never physically deleted; `is_active = false` marks a
/// soft-deleted session that remains readable but rejects new messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// One message in a session. Append-only; immutable once stored.
///
/// `timestamp` doubles as the store's per-session sort key and must be
/// monotonically increasing within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Usage and provenance metadata attached to an assistant message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceReference>>,
}

/// A retrieved knowledge excerpt embedded in an assistant message.
///
/// Produced transiently by the retrieval step; never stored standalone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    /// Relevance score in `[0, 1]`.
    pub relevance_score: f64,
    pub origin: String,
}

/// Lifecycle state of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "uploading",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(DocumentStatus::Uploading),
            "processing" => Some(DocumentStatus::Processing),
            "indexed" => Some(DocumentStatus::Indexed),
            "failed" => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// Stored document metadata.
///
/// The embedding vector, when present, lives in the search index tables
/// rather than on the document row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub content_type: String,
    pub size: i64,
    pub status: DocumentStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Back-written by the analysis service, best-effort.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_analysis: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
}

// ============ Reference entities ============
//
// Passive records created by the seeder (or an out-of-scope case-management
// surface). The core only reads them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    UnderReview,
    Resolved,
    Dismissed,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::UnderReview => "under_review",
            CaseStatus::Resolved => "resolved",
            CaseStatus::Dismissed => "dismissed",
        }
    }
}

/// A person under probation/parole supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSubject {
    pub id: String,
    pub name: String,
    pub supervision_level: String,
    pub conditions: Vec<String>,
    pub officer: String,
    pub created_at: DateTime<Utc>,
}

/// A violation case opened against a monitoring subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationCase {
    pub id: String,
    pub subject_id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: CaseStatus,
    /// Composite risk score in `[0, 100]`.
    pub risk_score: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A piece of evidence attached to a case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: String,
    pub case_id: String,
    pub kind: String,
    pub description: String,
    pub collected_at: DateTime<Utc>,
}

/// A weighted risk factor contributing to a case's risk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub id: String,
    pub case_id: String,
    pub name: String,
    /// Contribution weight in `[0, 1]`.
    pub weight: f64,
}

/// A dated event in a subject's supervision history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationEvent {
    pub id: String,
    pub subject_id: String,
    pub event_type: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

// ============ Analysis contract ============

/// Character span of a detected violation within the analyzed text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextLocation {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A single violation indicator found by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedViolation {
    #[serde(rename = "type")]
    pub violation_type: String,
    pub severity: Severity,
    /// Model-reported confidence in `[0, 1]`. Trusted, not re-validated.
    pub confidence: f64,
    pub location: TextLocation,
    pub description: String,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
}

/// The structured response contract the analysis prompt instructs the model
/// to produce. Decoded strictly; a malformed response is a typed error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub violations: Vec<DetectedViolation>,
    pub summary: String,
    /// Integer-valued score on `[0, 100]`, produced by the model.
    pub risk_score: i32,
    pub recommendations: Vec<String>,
    /// Filled in by the service, not the model.
    #[serde(default)]
    pub processing_time_ms: u64,
}

/// Mint a fresh opaque identifier with the given prefix.
///
/// Identifiers are never reused; the random suffix makes collisions
/// practically impossible.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_roundtrip() {
        assert_eq!(MessageRole::parse("user"), Some(MessageRole::User));
        assert_eq!(MessageRole::parse("assistant"), Some(MessageRole::Assistant));
        assert_eq!(MessageRole::parse("system"), None);
        assert_eq!(MessageRole::User.as_str(), "user");
    }

    #[test]
    fn test_new_id_unique_and_prefixed() {
        let a = new_id("sess");
        let b = new_id("sess");
        assert!(a.starts_with("sess_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_analysis_result_decodes_model_shape() {
        // The shape the prompt instructs the model to emit, camelCase keys
        // included.
        let raw = r#"{
            "violations": [{
                "type": "drug_violation",
                "severity": "high",
                "confidence": 0.9,
                "location": {"start": 0, "end": 10, "text": "Positive"},
                "description": "Positive drug test",
                "suggestedActions": ["Schedule hearing"]
            }],
            "summary": "One violation found",
            "riskScore": 85,
            "recommendations": ["Schedule hearing"]
        }"#;
        let parsed: AnalysisResult = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.violations.len(), 1);
        assert_eq!(parsed.risk_score, 85);
        assert_eq!(parsed.violations[0].severity, Severity::High);
        assert_eq!(parsed.violations[0].suggested_actions.len(), 1);
        assert_eq!(parsed.processing_time_ms, 0);
    }

    #[test]
    fn test_wire_types_serialize_camel_case() {
        let session = ChatSession {
            id: "sess_1".to_string(),
            user_id: "officer_1".to_string(),
            title: "Intake".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            is_active: true,
            metadata: serde_json::json!({}),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("userId").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("isActive").is_some());
        assert!(json.get("user_id").is_none());

        let metadata = MessageMetadata {
            tokens_used: Some(20),
            processing_time_ms: Some(35),
            sources: None,
        };
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["tokensUsed"], 20);
        assert_eq!(json["processingTimeMs"], 35);
    }

    #[test]
    fn test_analysis_result_serializes_camel_case() {
        let raw = r#"{
            "violations": [],
            "summary": "Nothing found",
            "riskScore": 5,
            "recommendations": []
        }"#;
        let parsed: AnalysisResult = serde_json::from_str(raw).unwrap();
        let json = serde_json::to_value(&parsed).unwrap();
        assert_eq!(json["riskScore"], 5);
        assert!(json.get("processingTimeMs").is_some());
        assert!(json.get("risk_score").is_none());
    }

    #[test]
    fn test_analysis_result_rejects_missing_fields() {
        let raw = r#"{"summary": "no violations key", "risk_score": 10, "recommendations": []}"#;
        assert!(serde_json::from_str::<AnalysisResult>(raw).is_err());
    }
}
