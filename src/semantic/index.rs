//! Persistent vector index with cosine similarity search.
//!
//! Stores one canonical vector per (document, model) in the `embeddings`
//! table. Ranking happens inside SQLite through the `vec_distance_cosine`
//! function, which works in cosine *distance* (0.0 to 2.0). Callers think in
//! *similarity*; [`max_distance`] and [`similarity_from_distance`] are the
//! only places the two meet.
//!
//! Reads never fail: an unavailable store yields `false`, empty results or
//! zeroed stats. Writes propagate errors.

use std::sync::Arc;

use rusqlite::params;
use serde::Serialize;

use crate::documents::{Document, DOCUMENT_COLUMNS};
use crate::store::{encode_vector, now_millis, Database, StoreError, DISTANCE_FN};

/// A document matched by similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub document: Document,
    /// Cosine similarity, always `1 - distance`
    pub similarity: f64,
    /// Cosine distance as ranked by the store (0.0 to 2.0)
    pub distance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub count: usize,
    pub average_dimension: f64,
}

/// Errors that can occur during index writes.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector contains non-finite values")]
    NonFiniteVector,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Largest cosine distance a hit may have to reach `threshold` similarity.
#[inline]
pub fn max_distance(threshold: f64) -> f64 {
    1.0 - threshold
}

/// Cosine similarity for a stored cosine distance.
#[inline]
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 - distance
}

pub struct VectorIndex {
    db: Arc<Database>,
    /// Canonical width every stored vector must have
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(db: Arc<Database>, dimensions: usize) -> Self {
        Self { db, dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_available(&self) -> bool {
        self.db.is_available()
    }

    /// Insert or replace the vector for (`document_id`, `model`).
    ///
    /// The vector must already be canonical (see `normalize::to_canonical`).
    pub fn upsert(&self, document_id: &str, vector: &[f32], model: &str) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteVector);
        }

        let blob = encode_vector(vector);
        let now = now_millis();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO embeddings (
                    document_id, model_used, dimensions, vector, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(document_id, model_used) DO UPDATE SET
                    dimensions = excluded.dimensions,
                    vector = excluded.vector,
                    updated_at = excluded.updated_at",
                params![document_id, model, vector.len() as i64, blob, now],
            )?;
            Ok(())
        })?;

        Ok(())
    }

    /// Check whether (`document_id`, `model`) has a stored vector.
    ///
    /// Returns `false` when the store is unavailable.
    pub fn exists(&self, document_id: &str, model: &str) -> bool {
        let result = self.db.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM embeddings WHERE document_id = ?1 AND model_used = ?2
                 )",
                params![document_id, model],
                |row| row.get(0),
            )?;
            Ok(found != 0)
        });

        match result {
            Ok(found) => found,
            Err(err) => {
                log::warn!("embedding lookup for {document_id} ({model}) failed: {err}");
                false
            }
        }
    }

    /// Remove every vector stored for a document, across all models.
    pub fn delete(&self, document_id: &str) -> Result<usize, IndexError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM embeddings WHERE document_id = ?1",
                params![document_id],
            )?)
        })?;
        Ok(removed)
    }

    /// Search across all models.
    ///
    /// See [`VectorIndex::search_model`].
    pub fn search(&self, query: &[f32], limit: usize, threshold: f64) -> Vec<SearchHit> {
        self.search_inner(query, None, limit, threshold)
    }

    /// Search for documents similar to `query`.
    ///
    /// # Arguments
    /// * `query` - Canonical query vector
    /// * `model` - Only compare against vectors produced by this model
    /// * `limit` - Maximum number of hits
    /// * `threshold` - Minimum similarity; hits below it are dropped
    ///
    /// # Returns
    /// Hits sorted by similarity, highest first. Empty when the store is
    /// unavailable.
    pub fn search_model(
        &self,
        query: &[f32],
        model: &str,
        limit: usize,
        threshold: f64,
    ) -> Vec<SearchHit> {
        self.search_inner(query, Some(model), limit, threshold)
    }

    fn search_inner(
        &self,
        query: &[f32],
        model: Option<&str>,
        limit: usize,
        threshold: f64,
    ) -> Vec<SearchHit> {
        if limit == 0 || query.is_empty() {
            return vec![];
        }

        let blob = encode_vector(query);
        let max_distance = max_distance(threshold);

        let result = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS}, x.distance
                 FROM (
                    SELECT e.document_id, MIN({DISTANCE_FN}(e.vector, ?1)) AS distance
                    FROM embeddings e
                    WHERE ?2 IS NULL OR e.model_used = ?2
                    GROUP BY e.document_id
                 ) x
                 JOIN documents d ON d.id = x.document_id
                 WHERE x.distance <= ?3
                 ORDER BY x.distance ASC, d.id ASC
                 LIMIT ?4"
            ))?;

            let hits = stmt
                .query_map(params![blob, model, max_distance, limit as i64], |row| {
                    let document = Document::from_row(row)?;
                    let distance: f64 = row.get(11)?;
                    Ok(SearchHit {
                        document,
                        similarity: similarity_from_distance(distance),
                        distance,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        });

        match result {
            // guard against rounding at the threshold boundary
            Ok(hits) => hits
                .into_iter()
                .filter(|hit| hit.similarity >= threshold)
                .collect(),
            Err(err) => {
                log::warn!("vector search failed: {err}");
                vec![]
            }
        }
    }

    /// Number of stored vectors and their average width.
    pub fn stats(&self) -> IndexStats {
        let result = self.db.with_conn(|conn| {
            let (count, average): (i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(*), AVG(dimensions) FROM embeddings",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(IndexStats {
                count: count as usize,
                average_dimension: average.unwrap_or(0.0),
            })
        });

        result.unwrap_or_else(|err| {
            log::warn!("embedding stats unavailable: {err}");
            IndexStats::default()
        })
    }
}
