//! Typed reference-record storage and the seeder that populates it.

mod common;

use chrono::Utc;
use common::{setup, StubModel};
use tempfile::TempDir;

use caseline::config::Config;
use caseline::db;
use caseline::models::{new_id, MonitoringSubject};
use caseline::seed;

fn seed_config(tmp: &TempDir) -> Config {
    let db_path = tmp.path().join("seed.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:0"
"#,
        db_path.display()
    );
    toml::from_str(&config_content).unwrap()
}

#[tokio::test]
async fn subject_round_trips_through_the_typed_store() {
    let env = setup(StubModel::replying("ok")).await;

    let subject = MonitoringSubject {
        id: new_id("subj"),
        name: "Jordan Avery".to_string(),
        supervision_level: "standard".to_string(),
        conditions: vec![
            "weekly reporting".to_string(),
            "no controlled substances".to_string(),
        ],
        officer: "Officer Reyes".to_string(),
        created_at: Utc::now(),
    };
    env.store.put_subject(&subject).await.unwrap();

    let loaded = env.store.get_subject(&subject.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "Jordan Avery");
    assert_eq!(loaded.conditions, subject.conditions);
    assert_eq!(loaded.officer, "Officer Reyes");

    assert!(env.store.get_subject("subj_missing").await.unwrap().is_none());
}

#[tokio::test]
async fn seeder_populates_reference_records() {
    let tmp = TempDir::new().unwrap();
    let config = seed_config(&tmp);

    seed::run_seed(&config).await.unwrap();

    let pool = db::connect_path(&config.db.path).await.unwrap();
    let counts: Vec<(&str, i64)> = {
        let mut out = Vec::new();
        for table in [
            "monitoring_subjects",
            "violation_cases",
            "evidence",
            "risk_factors",
            "violation_events",
            "documents",
            "search_entries",
        ] {
            let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            out.push((table, n));
        }
        out
    };

    for (table, n) in &counts {
        assert!(*n > 0, "expected seeded rows in {}", table);
    }

    // Two sample subjects, each with an open case trail.
    assert_eq!(counts[0].1, 2);
    assert_eq!(counts[1].1, 2);
}
