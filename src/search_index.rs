//! Search index adapter: lexical (FTS5) + vector similarity over SQLite.
//!
//! Two logical indexes share the same tables, discriminated by `idx_name`:
//! - [`KNOWLEDGE_INDEX`] — seeded guidance documents used to ground replies
//! - [`CONTEXT_INDEX`] — past chat exchanges, re-indexed after each reply
//!
//! Hybrid search collects candidates from each channel, min-max normalizes
//! the scores per channel, then merges as
//! `text_weight * t + vector_weight * v` and keeps the top k.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::error::Result;

pub const KNOWLEDGE_INDEX: &str = "knowledge";
pub const CONTEXT_INDEX: &str = "conversation_context";

/// One hybrid search hit. `score` is in `[0, 1]` after the weighted merge
/// (given weights that sum to at most 1).
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    pub score: f64,
    pub origin: String,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total: usize,
}

/// Knobs for one hybrid query.
#[derive(Debug, Clone, Copy)]
pub struct HybridOptions {
    pub text_weight: f64,
    pub vector_weight: f64,
    pub k: usize,
}

#[derive(Clone)]
pub struct SearchIndex {
    pool: SqlitePool,
}

impl SearchIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Index one entry: FTS row plus optional vector BLOB.
    pub async fn index_entry(
        &self,
        index: &str,
        id: &str,
        title: &str,
        text: &str,
        origin: &str,
        embedding: Option<&[f32]>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO search_entries (idx_name, entry_id, title, text, origin, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(index)
        .bind(id)
        .bind(title)
        .bind(text)
        .bind(origin)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        // FTS has no upsert; delete the old row first
        sqlx::query("DELETE FROM search_entries_fts WHERE entry_id = ? AND idx_name = ?")
            .bind(id)
            .bind(index)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "INSERT INTO search_entries_fts (entry_id, idx_name, title, text) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(index)
        .bind(title)
        .bind(text)
        .execute(&self.pool)
        .await?;

        if let Some(vec) = embedding {
            sqlx::query(
                "INSERT OR REPLACE INTO search_vectors (idx_name, entry_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(index)
            .bind(id)
            .bind(vec_to_blob(vec))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Weighted union of lexical and vector similarity.
    ///
    /// Degrades to text-only when `query_vector` is absent.
    pub async fn hybrid_search(
        &self,
        index: &str,
        query_text: &str,
        query_vector: Option<&[f32]>,
        opts: HybridOptions,
    ) -> Result<SearchResponse> {
        let text_candidates = self.fetch_text_candidates(index, query_text, opts.k * 4).await?;
        let vector_candidates = match query_vector {
            Some(vec) => self.fetch_vector_candidates(index, vec, opts.k * 4).await?,
            None => Vec::new(),
        };

        if text_candidates.is_empty() && vector_candidates.is_empty() {
            return Ok(SearchResponse {
                hits: Vec::new(),
                total: 0,
            });
        }

        let norm_text = normalize_scores(&text_candidates);
        let norm_vector = normalize_scores(&vector_candidates);

        let text_map: HashMap<&str, f64> = norm_text
            .iter()
            .map(|(c, s)| (c.entry_id.as_str(), *s))
            .collect();
        let vec_map: HashMap<&str, f64> = norm_vector
            .iter()
            .map(|(c, s)| (c.entry_id.as_str(), *s))
            .collect();

        let mut all: HashMap<&str, &EntryCandidate> = HashMap::new();
        for c in &text_candidates {
            all.entry(c.entry_id.as_str()).or_insert(c);
        }
        for c in &vector_candidates {
            all.entry(c.entry_id.as_str()).or_insert(c);
        }

        let mut hits: Vec<SearchHit> = all
            .values()
            .map(|cand| {
                let t = text_map.get(cand.entry_id.as_str()).copied().unwrap_or(0.0);
                let v = vec_map.get(cand.entry_id.as_str()).copied().unwrap_or(0.0);
                SearchHit {
                    id: cand.entry_id.clone(),
                    title: cand.title.clone(),
                    excerpt: cand.text.clone(),
                    score: opts.text_weight * t + opts.vector_weight * v,
                    origin: cand.origin.clone(),
                }
            })
            .collect();

        // score desc, id asc (deterministic)
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        let total = hits.len();
        hits.truncate(opts.k);

        Ok(SearchResponse { hits, total })
    }

    async fn fetch_text_candidates(
        &self,
        index: &str,
        query: &str,
        candidate_k: usize,
    ) -> Result<Vec<EntryCandidate>> {
        let match_query = fts_match_query(query);
        if match_query.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT f.entry_id, f.rank, e.title, e.text, e.origin
            FROM search_entries_fts f
            JOIN search_entries e
              ON e.entry_id = f.entry_id AND e.idx_name = f.idx_name
            WHERE f.search_entries_fts MATCH ? AND f.idx_name = ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(&match_query)
        .bind(index)
        .bind(candidate_k as i64)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                EntryCandidate {
                    entry_id: row.get("entry_id"),
                    title: row.get("title"),
                    text: row.get("text"),
                    origin: row.get("origin"),
                    raw_score: -rank, // negate so higher = better
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn fetch_vector_candidates(
        &self,
        index: &str,
        query_vec: &[f32],
        candidate_k: usize,
    ) -> Result<Vec<EntryCandidate>> {
        // Fetch all vectors for this index and score in Rust
        let rows = sqlx::query(
            r#"
            SELECT v.entry_id, v.embedding, e.title, e.text, e.origin
            FROM search_vectors v
            JOIN search_entries e
              ON e.entry_id = v.entry_id AND e.idx_name = v.idx_name
            WHERE v.idx_name = ?
            "#,
        )
        .bind(index)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<EntryCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                EntryCandidate {
                    entry_id: row.get("entry_id"),
                    title: row.get("title"),
                    text: row.get("text"),
                    origin: row.get("origin"),
                    raw_score: cosine_similarity(query_vec, &vec) as f64,
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(candidate_k);

        Ok(candidates)
    }
}

#[derive(Debug, Clone)]
struct EntryCandidate {
    entry_id: String,
    title: String,
    text: String,
    origin: String,
    raw_score: f64,
}

/// Reduce free text to an FTS5 OR-query of its alphanumeric tokens.
///
/// FTS5 treats quotes, colons, and operators specially; raw user input
/// routinely contains them and would fail the MATCH with a syntax error.
fn fts_match_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Min-max normalize raw scores to [0, 1] per channel.
fn normalize_scores(candidates: &[EntryCandidate]) -> Vec<(&EntryCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; 0 for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(id: &str, score: f64) -> EntryCandidate {
        EntryCandidate {
            entry_id: id.to_string(),
            title: String::new(),
            text: String::new(),
            origin: "knowledge_base".to_string(),
            raw_score: score,
        }
    }

    #[test]
    fn test_normalize_empty() {
        let result = normalize_scores(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("a", 10.0),
            make_candidate("b", 5.0),
            make_candidate("c", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let candidates = vec![make_candidate("a", 3.0), make_candidate("b", 3.0)];
        for (_, score) in normalize_scores(&candidates) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_merged_score_stays_in_unit_with_default_weights() {
        // text 0.7 + vector 0.3, both channels normalized to [0,1]
        let t = 1.0;
        let v = 1.0;
        let merged = 0.7 * t + 0.3 * v;
        assert!(merged <= 1.0 + 1e-9);
    }

    #[test]
    fn test_fts_match_query_strips_operators() {
        let q = fts_match_query("missed appointment: \"curfew\" AND drug-test");
        assert!(!q.contains(':'));
        assert!(q.contains("\"missed\""));
        assert!(q.contains(" OR "));
        assert!(fts_match_query("!!!").is_empty());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
