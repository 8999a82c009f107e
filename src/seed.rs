//! Seed data: sample supervision records and knowledge-base guidance.
//!
//! Populates reference entities (subjects, cases, evidence, events), a few
//! documents, and the knowledge-base search index so the RAG path answers
//! meaningfully on a fresh database. Embeddings are generated when a model
//! provider is configured; otherwise entries are indexed for lexical search
//! only.

use anyhow::Result;
use chrono::{Duration, Utc};

use crate::config::Config;
use crate::db;
use crate::llm;
use crate::migrate;
use crate::models::{
    new_id, CaseStatus, Document, DocumentStatus, Evidence, MonitoringSubject, RiskFactor,
    Severity, ViolationCase, ViolationEvent,
};
use crate::search_index::{SearchIndex, KNOWLEDGE_INDEX};
use crate::store::Store;

const GUIDANCE: &[(&str, &str)] = &[
    (
        "Missed appointment policy",
        "A missed supervision appointment is a technical violation. First \
         occurrences warrant a documented warning and a rescheduled \
         appointment within 72 hours. Repeated occurrences within 90 days \
         escalate to a formal violation report and may trigger a case review.",
    ),
    (
        "Curfew compliance",
        "Curfew conditions require the subject to be at their approved \
         residence during the ordered hours. Electronic monitoring alerts \
         should be verified against equipment faults before filing a \
         violation. Verified curfew violations are medium severity unless \
         combined with other factors.",
    ),
    (
        "Drug and alcohol testing",
        "A positive, confirmed drug test is a high-severity violation of \
         standard conditions. Diluted or missed tests are treated as \
         presumptive positives pending review. Officers should document the \
         substance, test type, and confirmation method, and schedule a \
         review hearing within ten business days.",
    ),
    (
        "Travel permit requirements",
        "Subjects must obtain written approval before leaving the \
         supervision district. Unauthorized travel is a technical violation; \
         severity depends on distance, duration, and whether contact was \
         maintained. Out-of-state unauthorized travel should be reported to \
         the court promptly.",
    ),
    (
        "Graduated sanctions",
        "Responses to violations should be proportionate: verbal warning, \
         written warning, increased reporting, curfew restriction, community \
         service, and finally revocation proceedings. Sanctions should \
         consider the subject's overall compliance history and risk score.",
    ),
];

pub async fn run_seed(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;

    let store = Store::new(pool.clone());
    let search = SearchIndex::new(pool.clone());

    let subjects = seed_subjects(&store).await?;
    let cases = seed_cases(&store, &subjects).await?;
    seed_documents(&store).await?;
    let indexed = seed_knowledge(&search, config).await?;

    println!("Seed complete:");
    println!("  monitoring subjects: {}", subjects.len());
    println!("  violation cases:     {}", cases);
    println!("  knowledge entries:   {}", indexed);

    pool.close().await;
    Ok(())
}

async fn seed_subjects(store: &Store) -> Result<Vec<String>> {
    let now = Utc::now();
    let samples = [
        ("Jordan Avery", "standard", "Officer Reyes"),
        ("Casey Morgan", "intensive", "Officer Blake"),
    ];

    let mut ids = Vec::new();
    for (name, level, officer) in samples {
        let subject = MonitoringSubject {
            id: new_id("subj"),
            name: name.to_string(),
            supervision_level: level.to_string(),
            conditions: vec![
                "weekly reporting".to_string(),
                "no controlled substances".to_string(),
                "curfew 21:00-06:00".to_string(),
            ],
            officer: officer.to_string(),
            created_at: now,
        };
        store.put_subject(&subject).await?;
        ids.push(subject.id);
    }
    Ok(ids)
}

async fn seed_cases(store: &Store, subjects: &[String]) -> Result<usize> {
    let now = Utc::now();
    let samples = [
        (
            "Missed two consecutive appointments",
            "Subject failed to report on scheduled dates without contact.",
            Severity::Medium,
            CaseStatus::Open,
            55,
        ),
        (
            "Positive drug screen",
            "Confirmed positive test for a controlled substance.",
            Severity::High,
            CaseStatus::UnderReview,
            82,
        ),
    ];

    let mut count = 0;
    for (i, (title, description, severity, status, risk_score)) in
        samples.iter().copied().enumerate()
    {
        let subject_id = subjects[i % subjects.len()].clone();
        let case = ViolationCase {
            id: new_id("case"),
            subject_id: subject_id.clone(),
            title: title.to_string(),
            description: description.to_string(),
            severity,
            status,
            risk_score,
            created_at: now,
            updated_at: now,
        };
        store.put_case(&case).await?;

        store
            .put_evidence(&Evidence {
                id: new_id("evid"),
                case_id: case.id.clone(),
                kind: "report".to_string(),
                description: "Officer field notes filed at intake.".to_string(),
                collected_at: now,
            })
            .await?;

        store
            .put_risk_factor(&RiskFactor {
                id: new_id("risk"),
                case_id: case.id.clone(),
                name: "prior technical violations".to_string(),
                weight: 0.4,
            })
            .await?;

        store
            .put_event(&ViolationEvent {
                id: new_id("evt"),
                subject_id,
                event_type: "violation_reported".to_string(),
                description: title.to_string(),
                occurred_at: now - Duration::days(3),
            })
            .await?;

        count += 1;
    }
    Ok(count)
}

async fn seed_documents(store: &Store) -> Result<()> {
    let now = Utc::now();
    let doc = Document {
        id: "doc_intake_guidelines".to_string(),
        title: "Intake assessment guidelines".to_string(),
        content: "Standard intake procedure for new supervision cases, \
                  including condition review, risk assessment, and contact \
                  scheduling."
            .to_string(),
        content_type: "text/plain".to_string(),
        size: 120,
        status: DocumentStatus::Indexed,
        tags: vec!["intake".to_string(), "guidelines".to_string()],
        created_at: now,
        updated_at: now,
        last_analysis: None,
        analyzed_at: None,
    };
    store.put_document(&doc).await.map_err(anyhow::Error::new)?;
    Ok(())
}

async fn seed_knowledge(search: &SearchIndex, config: &Config) -> Result<usize> {
    let model = if config.llm.is_enabled() {
        Some(llm::create_model(&config.llm)?)
    } else {
        None
    };

    let mut indexed = 0;
    for (title, text) in GUIDANCE.iter().copied() {
        let embedding = match &model {
            Some(m) => m.generate_embedding(text).await.ok(),
            None => None,
        };
        search
            .index_entry(
                KNOWLEDGE_INDEX,
                &new_id("kb"),
                title,
                text,
                "knowledge_base",
                embedding.as_deref(),
            )
            .await
            .map_err(anyhow::Error::new)?;
        indexed += 1;
    }
    Ok(indexed)
}
