//! SQLite connection shared by the document store, the vector index and the
//! lexical index.
//!
//! The connection lives behind `Mutex<Option<_>>` so it can be closed and
//! reopened at runtime. While closed, [`Database::with_conn`] fails with
//! [`StoreError::Unavailable`] and read paths degrade to empty results.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

use crate::semantic::lexical::LexicalIndex;

/// Name of the scalar SQL function computing cosine distance of two vector blobs.
pub const DISTANCE_FN: &str = "vec_distance_cosine";

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL DEFAULT 'word',
    word TEXT NOT NULL DEFAULT '',
    description TEXT NOT NULL DEFAULT '',
    explanation TEXT NOT NULL DEFAULT '',
    tags TEXT NOT NULL DEFAULT '',
    synonyms TEXT NOT NULL DEFAULT '',
    antonyms TEXT NOT NULL DEFAULT '',
    remark TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_created ON documents (created_at, id);

CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id TEXT NOT NULL,
    model_used TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (document_id, model_used),
    FOREIGN KEY (document_id) REFERENCES documents (id) ON DELETE CASCADE
);
"#;

/// Errors raised by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store is unavailable")]
    Unavailable,

    #[error("invalid vector blob: {0}")]
    InvalidVector(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct Database {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl Database {
    /// Open (or create) the database and bring the derived indexes up to date.
    ///
    /// The lexical index migration runs here, before the handle is returned,
    /// so no query can observe a half-rebuilt index.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Self::connect(&path)?;
        let db = Self {
            path,
            conn: Mutex::new(Some(conn)),
        };

        let report = LexicalIndex::new(&db).synchronize()?;
        log::debug!("lexical index startup check: {report:?}");

        Ok(db)
    }

    /// Open an in-memory database. Used by tests.
    #[cfg(test)]
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::prepare(&conn)?;
        let db = Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(Some(conn)),
        };
        LexicalIndex::new(&db).synchronize()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the live connection.
    pub fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Unavailable)?;
        let conn = guard.as_mut().ok_or(StoreError::Unavailable)?;
        f(conn)
    }

    pub fn is_available(&self) -> bool {
        self.conn
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Drop the connection. Subsequent calls fail with `Unavailable`
    /// until [`Database::reconnect`] succeeds.
    pub fn close(&self) {
        if let Ok(mut guard) = self.conn.lock() {
            if guard.take().is_some() {
                log::info!("closed database {}", self.path.display());
            }
        }
    }

    /// Reopen the connection to the same file.
    pub fn reconnect(&self) -> StoreResult<()> {
        let conn = Self::connect(&self.path)?;
        let mut guard = self.conn.lock().map_err(|_| StoreError::Unavailable)?;
        *guard = Some(conn);
        log::info!("reconnected database {}", self.path.display());
        Ok(())
    }

    fn connect(path: &Path) -> StoreResult<Connection> {
        let conn = Connection::open(path)?;
        Self::prepare(&conn)?;
        Ok(conn)
    }

    fn prepare(conn: &Connection) -> StoreResult<()> {
        conn.pragma_update(None, "foreign_keys", 1)?;
        register_distance_fn(conn)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }
}

fn register_distance_fn(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        DISTANCE_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a = ctx
                .get_raw(0)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            let b = ctx
                .get_raw(1)
                .as_blob()
                .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;

            let a = decode_vector(a).map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
            let b = decode_vector(b).map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;

            Ok(cosine_distance(&a, &b))
        },
    )
}

/// Cosine distance in [0, 2]. Zero-norm or width-mismatched input is
/// treated as orthogonal (distance 1).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }

    let similarity = (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0);
    1.0 - similarity
}

pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidVector(format!(
            "blob length {} is not a multiple of 4",
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
