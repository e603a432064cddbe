//! Top-k similarity queries over the knowledge store.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::collaborators::Embedder;
use crate::config::RetrievalConfig;
use crate::errors::KbResult;
use crate::policy::CallPolicy;
use crate::store::KnowledgeStore;
use crate::types::{DocumentId, SearchFilter};

/// What to search for.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryInput {
    /// Free text, embedded with the store's embedder.
    Text(String),
    /// A vector of the store's dimension.
    Vector(Vec<f32>),
}

impl From<&str> for QueryInput {
    fn from(text: &str) -> Self {
        QueryInput::Text(text.to_string())
    }
}

impl From<Vec<f32>> for QueryInput {
    fn from(vector: Vec<f32>) -> Self {
        QueryInput::Vector(vector)
    }
}

/// A ranked result with the summary needed to build context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalHit {
    pub id: DocumentId,
    pub distance: f32,
    pub summary: String,
}

impl RetrievalHit {
    /// One line of generator context: `path: summary`.
    pub fn context_line(&self) -> String {
        format!("{}: {}", self.id.path(), self.summary)
    }
}

/// Answers nearest-neighbor queries against a [`KnowledgeStore`].
#[derive(Debug, Clone)]
pub struct RetrievalEngine {
    store: Arc<KnowledgeStore>,
    policy: CallPolicy,
    top_k: usize,
}

impl RetrievalEngine {
    /// Create an engine that embeds text with the store's embedder and call policy.
    pub fn new(store: Arc<KnowledgeStore>, config: &RetrievalConfig) -> Self {
        let policy = store.policy().clone();
        Self {
            store,
            policy,
            top_k: config.top_k,
        }
    }

    /// `retrieval.topK`.
    pub fn default_k(&self) -> usize {
        self.top_k
    }

    /// Up to `k` live documents nearest to `input`.
    ///
    /// Ascending distance, ties by [`DocumentId`]; the filter is applied
    /// before truncation.
    ///
    /// # Errors
    ///
    /// - Embedder failures for text input
    /// - [`KbError::DimensionMismatch`](crate::errors::KbError::DimensionMismatch) for a wrong-sized vector
    pub fn query(
        &self,
        input: &QueryInput,
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> KbResult<Vec<RetrievalHit>> {
        let vector = match input {
            QueryInput::Vector(v) => v.clone(),
            QueryInput::Text(text) => self.embed(text)?,
        };

        let hits: Vec<RetrievalHit> = self
            .store
            .search_records(&vector, k, filter)?
            .into_iter()
            .map(|(record, distance)| RetrievalHit {
                id: record.id.clone(),
                distance,
                summary: record.summary.clone(),
            })
            .collect();

        debug!("Query returned {} hits (k={})", hits.len(), k);
        Ok(hits)
    }

    /// [`query`](Self::query) with text and the configured `k`.
    pub fn query_text(&self, text: &str) -> KbResult<Vec<RetrievalHit>> {
        self.query(&QueryInput::from(text), self.top_k, None)
    }

    fn embed(&self, text: &str) -> KbResult<Vec<f32>> {
        let embedder: Arc<dyn Embedder> = self.store.embedder();
        let text = text.to_string();
        self.policy.call("embedder", move || embedder.embed(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KbError;
    use crate::testing::{EchoSummarizer, TableEmbedder};

    fn engine() -> (Arc<KnowledgeStore>, RetrievalEngine) {
        let embedder = TableEmbedder::new(2)
            .with("hello", vec![0.0, 0.0])
            .with("world", vec![3.0, 4.0])
            .with("help", vec![1.0, 0.0]);
        let store = Arc::new(
            KnowledgeStore::in_memory(2, Arc::new(EchoSummarizer::new()), Arc::new(embedder))
                .unwrap(),
        );
        store
            .upsert(DocumentId::new("a.txt", "r1").unwrap(), "hello")
            .unwrap();
        store
            .upsert(DocumentId::new("docs/b.txt", "r1").unwrap(), "world")
            .unwrap();
        let engine = RetrievalEngine::new(Arc::clone(&store), &RetrievalConfig::default());
        (store, engine)
    }

    #[test]
    fn test_text_query() {
        let (_, engine) = engine();
        let hits = engine.query(&"hello".into(), 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.path(), "a.txt");
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[0].summary, "hello");
        assert_eq!(hits[0].context_line(), "a.txt: hello");
    }

    #[test]
    fn test_vector_query_and_order() {
        let (_, engine) = engine();
        let hits = engine
            .query(&QueryInput::Vector(vec![3.0, 4.0]), 5, None)
            .unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.id.path()).collect();
        assert_eq!(paths, vec!["docs/b.txt", "a.txt"]);
        assert_eq!(hits[1].distance, 5.0);
    }

    #[test]
    fn test_filter() {
        let (_, engine) = engine();
        let filter = SearchFilter::new().with_path_prefix("docs/");
        let hits = engine.query(&"help".into(), 1, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.path(), "docs/b.txt");
    }

    #[test]
    fn test_dimension_mismatch() {
        let (_, engine) = engine();
        let err = engine
            .query(&QueryInput::Vector(vec![1.0]), 1, None)
            .unwrap_err();
        assert!(matches!(err, KbError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_query_text_uses_default_k() {
        let (_, engine) = engine();
        assert_eq!(engine.default_k(), 5);
        assert_eq!(engine.query_text("hello").unwrap().len(), 2);
    }
}
