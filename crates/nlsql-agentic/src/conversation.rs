//! Conversation state for the refinement loop
//!
//! Conversations live only for the process lifetime. The store maps
//! conversation id to a per-conversation lock so refinements on the
//! same conversation serialize while different conversations proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::classification::ClassificationMetadata;

/// A conversation stops accepting refinements at this many iterations.
pub const MAX_ITERATIONS: usize = 3;

/// One generated query within a conversation. The first iteration has
/// no feedback; refinements carry the feedback that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub explanation: String,
    pub sql_query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub original_question: String,

    /// Present when the primary pipeline classified the question.
    /// Fallback conversations have none and refine via the raw-prompt
    /// path instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ClassificationMetadata>,

    pub iterations: Vec<Iteration>,

    /// True when the initial query came from the degraded single-shot
    /// fallback rather than the staged pipeline.
    #[serde(default)]
    pub fallback_used: bool,
}

impl Conversation {
    pub fn new(id: impl Into<String>, original_question: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            original_question: original_question.into(),
            metadata: None,
            iterations: Vec::new(),
            fallback_used: false,
        }
    }

    pub fn iteration_count(&self) -> usize {
        self.iterations.len()
    }

    pub fn at_iteration_limit(&self) -> bool {
        self.iterations.len() >= MAX_ITERATIONS
    }

    /// SQL of the most recent iteration, used as the base for refinement.
    pub fn latest_sql(&self) -> Option<&str> {
        self.iterations.last().map(|i| i.sql_query.as_str())
    }

    pub fn push_iteration(&mut self, iteration: Iteration) {
        self.iterations.push(iteration);
    }
}

/// Shared conversation store. The outer lock guards the map shape;
/// each conversation carries its own lock for the check-then-append
/// window during refinement.
pub type ConversationStore = Arc<RwLock<HashMap<String, Arc<Mutex<Conversation>>>>>;

pub fn create_conversation_store() -> ConversationStore {
    Arc::new(RwLock::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_limit() {
        let mut conv = Conversation::new("c1", "total revenue?");
        assert!(!conv.at_iteration_limit());
        for i in 0..MAX_ITERATIONS {
            conv.push_iteration(Iteration {
                feedback: None,
                explanation: format!("explanation {}", i),
                sql_query: format!("SELECT {};", i),
            });
        }
        assert!(conv.at_iteration_limit());
        assert_eq!(conv.iteration_count(), 3);
    }

    #[test]
    fn test_latest_sql() {
        let mut conv = Conversation::new("c1", "total revenue?");
        assert!(conv.latest_sql().is_none());
        conv.push_iteration(Iteration {
            feedback: None,
            explanation: "first".to_string(),
            sql_query: "SELECT 1;".to_string(),
        });
        conv.push_iteration(Iteration {
            feedback: Some("add region".to_string()),
            explanation: "second".to_string(),
            sql_query: "SELECT 2;".to_string(),
        });
        assert_eq!(conv.latest_sql(), Some("SELECT 2;"));
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = create_conversation_store();
        let conv = Conversation::new("c1", "total revenue?");
        store
            .write()
            .await
            .insert(conv.id.clone(), Arc::new(Mutex::new(conv)));

        let handle = store.read().await.get("c1").cloned();
        let handle = handle.unwrap();
        let guard = handle.lock().await;
        assert_eq!(guard.original_question, "total revenue?");
    }
}
