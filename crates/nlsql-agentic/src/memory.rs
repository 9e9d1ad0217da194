//! Learning memory
//!
//! A bounded, append-only store of past question/SQL pairs. Before
//! classifying a new question the pipeline looks up similar past
//! questions and feeds them to the classifier as reference material.
//!
//! The store is persisted wholesale to a JSON file on every update and
//! evicts oldest-first once it exceeds the pattern cap.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::classification::{ClassificationMetadata, QueryDomain, QueryFilter};

/// Hard cap on stored patterns; oldest entries are evicted beyond it.
pub const MAX_PATTERNS: usize = 1000;
/// Maximum number of patterns a lookup returns.
pub const MAX_LOOKUP_RESULTS: usize = 3;
/// Character-level similarity ratio a pattern must exceed to qualify.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;
/// Keyword-overlap fraction that qualifies a pattern on its own.
pub const KEYWORD_OVERLAP_THRESHOLD: f64 = 0.7;

const DEFAULT_MEMORY_PATH: &str = "learning_memory.json";

/// One recorded question/SQL pair. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningPattern {
    pub question: String,
    pub domain: QueryDomain,
    pub metrics: Vec<String>,
    pub filters: Vec<QueryFilter>,
    pub sql_pattern: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// On-disk shape of the memory file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    patterns: Vec<LearningPattern>,
}

/// Process-wide learning memory. All access goes through one lock so
/// concurrent record calls cannot race the read-modify-write-persist
/// cycle.
pub struct LearningMemory {
    path: Option<PathBuf>,
    patterns: Mutex<Vec<LearningPattern>>,
}

impl LearningMemory {
    /// Open (or create) a memory backed by the given file. A missing
    /// file starts empty; a corrupt file is logged and starts empty
    /// rather than blocking startup.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut patterns = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<MemoryFile>(&content) {
                Ok(file) => file.patterns,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "learning memory file is corrupt, starting empty"
                    );
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read learning memory file, starting empty"
                );
                Vec::new()
            }
        };

        // Enforce the cap even on hand-edited files.
        if patterns.len() > MAX_PATTERNS {
            let excess = patterns.len() - MAX_PATTERNS;
            patterns.drain(..excess);
        }

        Self {
            path: Some(path),
            patterns: Mutex::new(patterns),
        }
    }

    /// An in-process memory with no backing file.
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            patterns: Mutex::new(Vec::new()),
        }
    }

    /// Open the memory at `LEARNING_MEMORY_PATH`, defaulting to
    /// `learning_memory.json` in the working directory.
    pub fn from_env() -> Self {
        let path =
            std::env::var("LEARNING_MEMORY_PATH").unwrap_or_else(|_| DEFAULT_MEMORY_PATH.into());
        Self::new(path)
    }

    /// Find stored patterns similar to the question.
    ///
    /// A pattern qualifies when its character-level similarity exceeds
    /// the threshold or enough of the question's keywords appear in it.
    /// Qualifying patterns come back in storage order (not ranked),
    /// truncated to the first three.
    pub async fn lookup(&self, question: &str) -> Vec<LearningPattern> {
        let input_lower = question.to_lowercase();
        let input_keywords: HashSet<&str> = input_lower.split_whitespace().collect();

        let patterns = self.patterns.lock().await;
        let mut results: Vec<LearningPattern> = patterns
            .iter()
            .filter(|p| {
                let stored_lower = p.question.to_lowercase();
                let similarity = strsim::normalized_levenshtein(&input_lower, &stored_lower);
                similarity > SIMILARITY_THRESHOLD
                    || keyword_overlap(&input_keywords, &stored_lower) > KEYWORD_OVERLAP_THRESHOLD
            })
            .cloned()
            .collect();
        results.truncate(MAX_LOOKUP_RESULTS);
        results
    }

    /// Append a pattern and persist the whole store. Failures are
    /// recorded too, so the memory reflects what was attempted.
    pub async fn record(
        &self,
        question: &str,
        metadata: &ClassificationMetadata,
        sql: &str,
        success: bool,
    ) -> Result<()> {
        let pattern = LearningPattern {
            question: question.to_string(),
            domain: metadata.domain,
            metrics: metadata.metrics.clone(),
            filters: metadata.filters.clone(),
            sql_pattern: sql.to_string(),
            success,
            timestamp: Utc::now(),
        };

        let mut patterns = self.patterns.lock().await;
        patterns.push(pattern);
        while patterns.len() > MAX_PATTERNS {
            patterns.remove(0);
        }

        if let Some(path) = &self.path {
            persist(path, &patterns)?;
        }
        Ok(())
    }

    /// Number of stored patterns.
    pub async fn pattern_count(&self) -> usize {
        self.patterns.lock().await.len()
    }
}

fn persist(path: &Path, patterns: &[LearningPattern]) -> Result<()> {
    let file = MemoryFile {
        patterns: patterns.to_vec(),
    };
    let json = serde_json::to_string_pretty(&file)
        .context("failed to serialize learning memory")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write learning memory to '{}'", path.display()))?;
    Ok(())
}

/// Fraction of the input's keywords that appear in the stored question.
/// The denominator is the input keyword-set size; an empty input
/// never qualifies.
fn keyword_overlap(input_keywords: &HashSet<&str>, stored_lower: &str) -> f64 {
    if input_keywords.is_empty() {
        return 0.0;
    }
    let stored_keywords: HashSet<&str> = stored_lower.split_whitespace().collect();
    let shared = input_keywords.intersection(&stored_keywords).count();
    shared as f64 / input_keywords.len() as f64
}
