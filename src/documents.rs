use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::{
    eid::Eid,
    store::{now_millis, Database, StoreResult},
};

/// Discriminator of vocabulary entries. Only these are mirrored into the
/// lexical index.
pub const WORD_KIND: &str = "word";

/// Column list used by every query returning whole documents. Queries must
/// alias the documents table as `d`.
pub const DOCUMENT_COLUMNS: &str = "d.id, d.kind, d.word, d.description, d.explanation, \
     d.tags, d.synonyms, d.antonyms, d.remark, d.created_at, d.updated_at";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Eid,
    pub kind: String,

    pub word: String,
    pub description: String,
    pub explanation: String,
    pub tags: Vec<String>,
    pub synonyms: Vec<String>,
    pub antonyms: Vec<String>,
    pub remark: String,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// Read a document from the first eleven columns of `row`,
    /// in `DOCUMENT_COLUMNS` order.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Document {
            id: Eid::from(row.get::<_, String>(0)?),
            kind: row.get(1)?,
            word: row.get(2)?,
            description: row.get(3)?,
            explanation: row.get(4)?,
            tags: split_list(&row.get::<_, String>(5)?),
            synonyms: split_list(&row.get::<_, String>(6)?),
            antonyms: split_list(&row.get::<_, String>(7)?),
            remark: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentCreate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub antonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synonyms: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub antonyms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

/// Read side of the document store consumed by the embedding pipeline.
pub trait DocumentStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> StoreResult<Option<Document>>;
    /// Documents in stable creation order.
    fn get_page(&self, offset: usize, limit: usize) -> StoreResult<Vec<Document>>;
    fn count(&self) -> StoreResult<usize>;
}

/// SQLite-backed document store.
///
/// Writes only touch the `documents` table; the lexical index follows through
/// triggers and embeddings are removed by cascade.
#[derive(Clone)]
pub struct SqliteDocuments {
    db: Arc<Database>,
}

impl SqliteDocuments {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn create(&self, create: DocumentCreate) -> StoreResult<Document> {
        let now = now_millis();
        let doc = Document {
            id: Eid::new(),
            kind: create.kind.unwrap_or_else(|| WORD_KIND.to_string()),
            word: create.word.trim().to_string(),
            description: create.description.unwrap_or_default(),
            explanation: create.explanation.unwrap_or_default(),
            tags: normalize_list(create.tags),
            synonyms: normalize_list(create.synonyms),
            antonyms: normalize_list(create.antonyms),
            remark: create.remark.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (
                    id, kind, word, description, explanation,
                    tags, synonyms, antonyms, remark, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    doc.id.as_str(),
                    doc.kind,
                    doc.word,
                    doc.description,
                    doc.explanation,
                    join_list(&doc.tags),
                    join_list(&doc.synonyms),
                    join_list(&doc.antonyms),
                    doc.remark,
                    doc.created_at,
                    doc.updated_at,
                ],
            )?;
            Ok(())
        })?;

        log::debug!("created document {} ({})", doc.id, doc.word);
        Ok(doc)
    }

    pub fn update(&self, id: &str, update: DocumentUpdate) -> StoreResult<Option<Document>> {
        let Some(mut doc) = self.get_by_id(id)? else {
            return Ok(None);
        };

        if let Some(word) = update.word {
            doc.word = word.trim().to_string();
        }
        if let Some(description) = update.description {
            doc.description = description;
        }
        if let Some(explanation) = update.explanation {
            doc.explanation = explanation;
        }
        if let Some(tags) = update.tags {
            doc.tags = normalize_list(tags);
        }
        if let Some(synonyms) = update.synonyms {
            doc.synonyms = normalize_list(synonyms);
        }
        if let Some(antonyms) = update.antonyms {
            doc.antonyms = normalize_list(antonyms);
        }
        if let Some(remark) = update.remark {
            doc.remark = remark;
        }
        doc.updated_at = now_millis().max(doc.updated_at + 1);

        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE documents SET
                    word = ?2, description = ?3, explanation = ?4, tags = ?5,
                    synonyms = ?6, antonyms = ?7, remark = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    doc.id.as_str(),
                    doc.word,
                    doc.description,
                    doc.explanation,
                    join_list(&doc.tags),
                    join_list(&doc.synonyms),
                    join_list(&doc.antonyms),
                    doc.remark,
                    doc.updated_at,
                ],
            )?;
            Ok(())
        })?;

        Ok(Some(doc))
    }

    /// Delete a document. Returns `false` when it did not exist.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?)
        })?;
        Ok(removed > 0)
    }
}

impl DocumentStore for SqliteDocuments {
    fn get_by_id(&self, id: &str) -> StoreResult<Option<Document>> {
        self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {DOCUMENT_COLUMNS} FROM documents d WHERE d.id = ?1"),
                    params![id],
                    Document::from_row,
                )
                .optional()?)
        })
    }

    fn get_page(&self, offset: usize, limit: usize) -> StoreResult<Vec<Document>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents d
                 ORDER BY d.created_at ASC, d.id ASC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let docs = stmt
                .query_map(params![limit as i64, offset as i64], Document::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(docs)
        })
    }

    fn count(&self) -> StoreResult<usize> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

/// Stored list separator. Entries are trimmed and never contain it.
const LIST_SEPARATOR: char = ',';

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(LIST_SEPARATOR)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn join_list(values: &[String]) -> String {
    values.join(&LIST_SEPARATOR.to_string())
}

fn normalize_list(values: Vec<String>) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| split_list(value))
        .collect()
}
