use crate::{
    config::Config,
    documents::{Document, DocumentCreate, DocumentStore, SqliteDocuments},
    eid::Eid,
    lock::FileLock,
    semantic::{
        client_for, rrf_fusion, BatchHandle, BatchOptions, BatchOrchestrator, BatchReport,
        BatchStatus, EmbeddingClient, IndexStats, LexicalHit, LexicalIndex, ProgressObserver,
        SearchHit, SemanticQueryService, SyncReport, VectorIndex,
    },
    store::Database,
};
use anyhow::Context;
use homedir::my_home;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

mod errors;

pub use errors::AppError;

const DATABASE_FILE: &str = "vocab.sqlite3";

/// Data directory: `VOCAB_BASE_PATH`, or `~/.local/share/vocab`.
pub fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(base_path) = std::env::var("VOCAB_BASE_PATH") {
        return Ok(PathBuf::from(base_path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/vocab"))
}

fn parse_id(id: &str) -> Result<Eid, AppError> {
    id.parse()
        .map_err(|err| AppError::BadRequest(format!("invalid document id {id:?}: {err}")))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Lexical,
    #[default]
    Hybrid,
}

/// A document ranked by fusing both searches.
#[derive(Debug, Clone, Serialize)]
pub struct HybridHit {
    pub document: Document,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub semantic_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SearchResults {
    Semantic(Vec<SearchHit>),
    Lexical(Vec<LexicalHit>),
    Hybrid(Vec<HybridHit>),
}

impl SearchResults {
    pub fn len(&self) -> usize {
        match self {
            SearchResults::Semantic(hits) => hits.len(),
            SearchResults::Lexical(hits) => hits.len(),
            SearchResults::Hybrid(hits) => hits.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub documents: usize,
    pub lexical_rows: usize,
    pub embeddings: IndexStats,
    pub semantic_enabled: bool,
    pub model: String,
    pub canonical_width: usize,
}

pub struct App {
    config: Config,
    db: Arc<Database>,
    documents: SqliteDocuments,
    index: Arc<VectorIndex>,
    semantic: SemanticQueryService,
    batch: BatchOrchestrator,
}

impl App {
    /// Open the database under the configured base path with the
    /// configured embedding provider.
    pub fn open(config: Config) -> Result<Self, AppError> {
        let db = {
            let _lock = FileLock::acquire(config.base_path(), true)?;
            Database::open(config.base_path().join(DATABASE_FILE))?
        };
        log::info!("opened {}", db.path().display());

        let client: Arc<dyn EmbeddingClient> =
            Arc::from(client_for(config.semantic_search.provider));
        Ok(Self::new(config, Arc::new(db), client))
    }

    pub fn new(config: Config, db: Arc<Database>, client: Arc<dyn EmbeddingClient>) -> Self {
        let documents = SqliteDocuments::new(db.clone());
        let index = Arc::new(VectorIndex::new(
            db.clone(),
            config.semantic_search.canonical_width,
        ));

        let semantic = SemanticQueryService::new(
            index.clone(),
            client.clone(),
            config.semantic_search.clone(),
            config.base_path().to_path_buf(),
        );
        let batch = BatchOrchestrator::new(
            Arc::new(documents.clone()),
            index.clone(),
            client,
            config.semantic_search.clone(),
            config.base_path().to_path_buf(),
        );

        Self {
            config,
            db,
            documents,
            index,
            semantic,
            batch,
        }
    }

    pub fn add(&self, create: DocumentCreate) -> Result<Document, AppError> {
        if create.word.trim().is_empty() {
            return Err(AppError::BadRequest("word must not be empty".to_string()));
        }
        Ok(self.documents.create(create)?)
    }

    pub fn get(&self, id: &str) -> Result<Document, AppError> {
        let id = parse_id(id)?;
        self.documents.get_by_id(&id)?.ok_or(AppError::NotFound)
    }

    /// Delete a document; its vectors go with it.
    pub fn delete(&self, id: &str) -> Result<(), AppError> {
        let id = parse_id(id)?;
        if self.documents.delete(&id)? {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    pub fn search(
        &self,
        mode: SearchMode,
        query: &str,
        limit: Option<usize>,
        threshold: Option<f64>,
    ) -> SearchResults {
        let limit = limit.unwrap_or(self.config.search_limit);
        match mode {
            SearchMode::Semantic => {
                SearchResults::Semantic(self.semantic.search(query, limit, threshold))
            }
            SearchMode::Lexical => {
                SearchResults::Lexical(LexicalIndex::new(&self.db).search(query, limit))
            }
            SearchMode::Hybrid => SearchResults::Hybrid(self.hybrid_search(query, limit, threshold)),
        }
    }

    /// Fuse semantic and lexical rankings. Falls back to lexical ranking
    /// alone when semantic search is disabled or finds nothing.
    pub fn hybrid_search(&self, query: &str, limit: usize, threshold: Option<f64>) -> Vec<HybridHit> {
        let semantic_hits = self.semantic.search(query, limit, threshold);
        let lexical_hits = LexicalIndex::new(&self.db).search(query, limit);

        let semantic_ids: Vec<_> = semantic_hits.iter().map(|h| h.document.id.clone()).collect();
        let lexical_ids: Vec<_> = lexical_hits.iter().map(|h| h.document.id.clone()).collect();

        let mut similarities = HashMap::new();
        let mut documents = HashMap::new();
        for hit in semantic_hits {
            similarities.insert(hit.document.id.clone(), hit.similarity);
            documents.insert(hit.document.id.clone(), hit.document);
        }
        for hit in lexical_hits {
            documents.entry(hit.document.id.clone()).or_insert(hit.document);
        }

        rrf_fusion(&semantic_ids, &lexical_ids, self.config.semantic_weight)
            .into_iter()
            .take(limit)
            .filter_map(|fused| {
                let document = documents.remove(&fused.id)?;
                Some(HybridHit {
                    similarity: similarities.get(&fused.id).copied(),
                    document,
                    score: fused.score,
                    semantic_rank: fused.semantic_rank,
                    lexical_rank: fused.lexical_rank,
                })
            })
            .collect()
    }

    pub fn start_embeddings(
        &self,
        options: BatchOptions,
        observer: Option<ProgressObserver>,
    ) -> Result<BatchHandle, AppError> {
        Ok(self.batch.start_batch(options, observer)?)
    }

    pub fn run_embeddings(
        &self,
        options: BatchOptions,
        observer: Option<ProgressObserver>,
    ) -> Result<BatchReport, AppError> {
        Ok(self.batch.run_batch(options, observer)?)
    }

    pub fn cancel_embeddings(&self) -> bool {
        self.batch.cancel_batch()
    }

    pub fn embedding_status(&self) -> BatchStatus {
        self.batch.status()
    }

    /// Drop and rebuild the lexical index from the documents table.
    pub fn reindex_lexical(&self) -> Result<SyncReport, AppError> {
        Ok(LexicalIndex::new(&self.db).rebuild()?)
    }

    pub fn stats(&self) -> Result<Stats, AppError> {
        let sem = &self.config.semantic_search;
        Ok(Stats {
            documents: self.documents.count()?,
            lexical_rows: LexicalIndex::new(&self.db).len()?,
            embeddings: self.index.stats(),
            semantic_enabled: sem.enabled,
            model: sem.model.clone(),
            canonical_width: sem.canonical_width,
        })
    }
}
