//! Lexical (keyword) index over vocabulary entries.
//!
//! `words_fts` is an FTS5 mirror of the searchable fields of every
//! `word`-type document. Three triggers on `documents` keep it current on
//! insert, update and delete.
//!
//! The definitions below belong to the running build, while the catalog
//! reflects whichever build last wrote the database file. [`LexicalIndex::synchronize`]
//! diffs the two on startup and repairs only what drifted:
//! - table missing or different: drop everything, recreate, repopulate
//! - only triggers different: recreate the triggers, keep the rows
//! - nothing different: populate only if the index is empty

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::Serialize;

use crate::documents::{Document, DOCUMENT_COLUMNS, WORD_KIND};
use crate::store::{Database, StoreResult};

pub const INDEX_TABLE: &str = "words_fts";

const TABLE_SQL: &str = "CREATE VIRTUAL TABLE words_fts USING fts5(
    id UNINDEXED,
    word,
    description,
    explanation,
    tags,
    synonyms,
    antonyms,
    remark,
    tokenize = 'unicode61 remove_diacritics 2'
)";

const INSERT_TRIGGER_SQL: &str = "CREATE TRIGGER words_fts_ai AFTER INSERT ON documents
WHEN new.kind = 'word'
BEGIN
    INSERT INTO words_fts (id, word, description, explanation, tags, synonyms, antonyms, remark)
    VALUES (new.id, new.word, new.description, new.explanation, new.tags, new.synonyms, new.antonyms, new.remark);
END";

const UPDATE_TRIGGER_SQL: &str = "CREATE TRIGGER words_fts_au AFTER UPDATE ON documents
BEGIN
    DELETE FROM words_fts WHERE id = old.id;
    INSERT INTO words_fts (id, word, description, explanation, tags, synonyms, antonyms, remark)
    SELECT new.id, new.word, new.description, new.explanation, new.tags, new.synonyms, new.antonyms, new.remark
    WHERE new.kind = 'word';
END";

const DELETE_TRIGGER_SQL: &str = "CREATE TRIGGER words_fts_ad AFTER DELETE ON documents
BEGIN
    DELETE FROM words_fts WHERE id = old.id;
END";

/// Trigger names paired with their expected definitions.
const TRIGGERS: [(&str, &str); 3] = [
    ("words_fts_ai", INSERT_TRIGGER_SQL),
    ("words_fts_au", UPDATE_TRIGGER_SQL),
    ("words_fts_ad", DELETE_TRIGGER_SQL),
];

/// Column weights for bm25: id, word, description, explanation, tags,
/// synonyms, antonyms, remark.
const BM25_WEIGHTS: &str = "0.0, 10.0, 4.0, 2.0, 3.0, 3.0, 1.0, 1.0";

/// What the startup check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Definitions matched and the index already had rows
    Unchanged,
    /// Definitions matched but the index was empty
    Populated,
    /// Triggers were recreated; rows were kept
    TriggersRecreated,
    /// Table and triggers were recreated and the index repopulated
    Rebuilt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub action: SyncAction,
    /// Rows written to the index by this run
    pub indexed: usize,
}

/// On-disk definitions of the index objects, as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDefinitions {
    pub table: Option<String>,
    pub triggers: Vec<(String, Option<String>)>,
}

/// A document matched by keyword search.
#[derive(Debug, Clone, Serialize)]
pub struct LexicalHit {
    pub document: Document,
    /// Relevance (negated bm25, higher is better)
    pub score: f64,
}

pub struct LexicalIndex<'a> {
    db: &'a Database,
}

impl<'a> LexicalIndex<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Bring the on-disk index in line with this build's definitions.
    ///
    /// Idempotent. Must run before any query touches the index.
    pub fn synchronize(&self) -> StoreResult<SyncReport> {
        self.db.with_conn(|conn| {
            let actual = read_definitions(conn)?;

            let table_ok = actual
                .table
                .as_deref()
                .map(|sql| same_definition(sql, TABLE_SQL))
                .unwrap_or(false);

            let triggers_ok = TRIGGERS.iter().all(|(name, expected)| {
                actual
                    .triggers
                    .iter()
                    .find(|(actual_name, _)| actual_name.as_str() == *name)
                    .and_then(|(_, sql)| sql.as_deref())
                    .map(|sql| same_definition(sql, expected))
                    .unwrap_or(false)
            });

            let tx = conn.transaction()?;
            let report = if !table_ok {
                if actual.table.is_some() {
                    log::info!("lexical index definition changed, rebuilding");
                } else {
                    log::info!("lexical index missing, creating");
                }
                let indexed = rebuild(&tx)?;
                SyncReport {
                    action: SyncAction::Rebuilt,
                    indexed,
                }
            } else if !triggers_ok {
                log::info!("lexical index triggers changed, recreating triggers");
                drop_triggers(&tx)?;
                create_triggers(&tx)?;
                SyncReport {
                    action: SyncAction::TriggersRecreated,
                    indexed: 0,
                }
            } else {
                let indexed = populate_if_empty(&tx)?;
                SyncReport {
                    action: if indexed > 0 {
                        SyncAction::Populated
                    } else {
                        SyncAction::Unchanged
                    },
                    indexed,
                }
            };
            tx.commit()?;

            if report.indexed > 0 {
                log::info!("lexical index: {} entries written", report.indexed);
            }
            Ok(report)
        })
    }

    /// Unconditionally drop, recreate and repopulate the index.
    pub fn rebuild(&self) -> StoreResult<SyncReport> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let indexed = rebuild(&tx)?;
            tx.commit()?;
            log::info!("lexical index rebuilt with {indexed} entries");
            Ok(SyncReport {
                action: SyncAction::Rebuilt,
                indexed,
            })
        })
    }

    /// Read the current catalog definitions of the index objects.
    pub fn definitions(&self) -> StoreResult<CatalogDefinitions> {
        self.db.with_conn(|conn| read_definitions(conn))
    }

    /// Number of rows in the index.
    pub fn len(&self) -> StoreResult<usize> {
        self.db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM words_fts", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }

    /// Keyword search over word entries, best match first.
    ///
    /// Returns an empty list for an empty query or an unavailable store.
    pub fn search(&self, query: &str, limit: usize) -> Vec<LexicalHit> {
        let Some(expr) = match_expression(query) else {
            return vec![];
        };
        if limit == 0 {
            return vec![];
        }

        let result = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS}, bm25(words_fts, {BM25_WEIGHTS}) AS relevance
                 FROM words_fts
                 JOIN documents d ON d.id = words_fts.id
                 WHERE words_fts MATCH ?1
                 ORDER BY relevance ASC, d.id ASC
                 LIMIT ?2"
            ))?;
            let hits = stmt
                .query_map(params![expr, limit as i64], |row| {
                    let document = Document::from_row(row)?;
                    let relevance: f64 = row.get(11)?;
                    Ok(LexicalHit {
                        document,
                        score: -relevance,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(hits)
        });

        result.unwrap_or_else(|err| {
            log::warn!("lexical search failed: {err}");
            vec![]
        })
    }
}

fn read_definitions(conn: &Connection) -> StoreResult<CatalogDefinitions> {
    let table = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![INDEX_TABLE],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();

    let mut triggers = Vec::with_capacity(TRIGGERS.len());
    for (name, _) in TRIGGERS {
        let sql = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'trigger' AND name = ?1",
                params![name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        triggers.push((name.to_string(), sql));
    }

    Ok(CatalogDefinitions { table, triggers })
}

fn rebuild(tx: &Transaction<'_>) -> StoreResult<usize> {
    drop_triggers(tx)?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {INDEX_TABLE};"))?;
    tx.execute_batch(TABLE_SQL)?;
    create_triggers(tx)?;
    populate(tx)
}

fn drop_triggers(tx: &Transaction<'_>) -> StoreResult<()> {
    for (name, _) in TRIGGERS {
        tx.execute_batch(&format!("DROP TRIGGER IF EXISTS {name};"))?;
    }
    Ok(())
}

fn create_triggers(tx: &Transaction<'_>) -> StoreResult<()> {
    for (_, sql) in TRIGGERS {
        tx.execute_batch(sql)?;
    }
    Ok(())
}

fn populate(tx: &Transaction<'_>) -> StoreResult<usize> {
    let inserted = tx.execute(
        "INSERT INTO words_fts (id, word, description, explanation, tags, synonyms, antonyms, remark)
         SELECT id, word, description, explanation, tags, synonyms, antonyms, remark
         FROM documents WHERE kind = ?1",
        params![WORD_KIND],
    )?;
    Ok(inserted)
}

fn populate_if_empty(tx: &Transaction<'_>) -> StoreResult<usize> {
    let has_rows: i64 = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM words_fts)",
        [],
        |row| row.get(0),
    )?;
    if has_rows != 0 {
        return Ok(0);
    }
    populate(tx)
}

/// Canonical form of a schema statement for comparison: lowercase, single
/// spaces, no spaces around punctuation, no trailing semicolon.
pub fn normalize_definition(sql: &str) -> String {
    let collapsed = sql
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut out = String::with_capacity(collapsed.len());
    let mut chars = collapsed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ' ' {
            let prev_punct = out.chars().last().map(is_tight_punct).unwrap_or(true);
            let next_punct = chars.peek().copied().map(is_tight_punct).unwrap_or(true);
            if prev_punct || next_punct {
                continue;
            }
        }
        out.push(c);
    }

    out.trim_end_matches(';').to_string()
}

fn is_tight_punct(c: char) -> bool {
    matches!(c, '(' | ')' | ',' | ';' | '=')
}

fn same_definition(actual: &str, expected: &str) -> bool {
    normalize_definition(actual) == normalize_definition(expected)
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "in", "on", "at", "to",
    "for", "of", "with", "by", "from", "as", "and", "or", "but", "not", "no", "so", "if", "then",
];

/// Tokenize query into lowercase terms.
/// Stop words and 1-char terms are dropped unless nothing else is left.
fn tokenize(query: &str) -> Vec<String> {
    let raw: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect();

    let filtered: Vec<String> = raw
        .iter()
        .filter(|s| s.chars().count() > 1 && !STOP_WORDS.contains(&s.as_str()))
        .cloned()
        .collect();

    if filtered.is_empty() {
        raw
    } else {
        filtered
    }
}

/// Build an FTS5 query matching any term by prefix.
fn match_expression(query: &str) -> Option<String> {
    let terms = tokenize(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|term| format!("\"{term}\"*"))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{DocumentCreate, DocumentUpdate, SqliteDocuments};
    use std::sync::Arc;

    fn setup() -> (Arc<Database>, SqliteDocuments) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let docs = SqliteDocuments::new(db.clone());
        (db, docs)
    }

    fn word(word: &str, description: &str) -> DocumentCreate {
        DocumentCreate {
            word: word.to_string(),
            description: Some(description.to_string()),
            ..Default::default()
        }
    }

    fn fts_ids(db: &Database) -> Vec<String> {
        db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM words_fts ORDER BY id")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(ids)
        })
        .unwrap()
    }

    #[test]
    fn test_normalize_definition_ignores_formatting() {
        let a = "CREATE TRIGGER  x AFTER DELETE ON documents\nBEGIN\n   DELETE FROM t WHERE id = old.id;\nEND";
        let b = "create trigger x after delete on documents begin delete from t where id=old.id; end;";
        assert_eq!(normalize_definition(a), normalize_definition(b));
    }

    #[test]
    fn test_normalize_definition_detects_real_changes() {
        assert_ne!(
            normalize_definition(TABLE_SQL),
            normalize_definition(&TABLE_SQL.replace("remark,", ""))
        );
    }

    #[test]
    fn test_fresh_database_has_index_and_triggers() {
        let (db, _) = setup();
        let defs = LexicalIndex::new(&db).definitions().unwrap();
        assert!(same_definition(defs.table.as_deref().unwrap(), TABLE_SQL));
        for ((_, sql), (_, expected)) in defs.triggers.iter().zip(TRIGGERS.iter()) {
            assert!(same_definition(sql.as_deref().unwrap(), expected));
        }
    }

    #[test]
    fn test_triggers_follow_document_writes() {
        let (db, docs) = setup();
        let index = LexicalIndex::new(&db);

        let doc = docs.create(word("serendipity", "a happy accident")).unwrap();
        assert_eq!(index.search("accident", 10).len(), 1);

        docs.update(
            &doc.id,
            DocumentUpdate {
                description: Some("fortunate discovery".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(index.search("accident", 10).is_empty());
        assert_eq!(index.search("discovery", 10).len(), 1);
        assert_eq!(index.len().unwrap(), 1);

        docs.delete(&doc.id).unwrap();
        assert!(index.search("discovery", 10).is_empty());
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_non_word_documents_are_not_indexed() {
        let (db, docs) = setup();
        docs.create(DocumentCreate {
            kind: Some("note".to_string()),
            ..word("memo", "grocery list")
        })
        .unwrap();
        assert_eq!(LexicalIndex::new(&db).len().unwrap(), 0);
    }

    #[test]
    fn test_synchronize_is_idempotent() {
        let (db, docs) = setup();
        docs.create(word("ephemeral", "lasting a very short time")).unwrap();
        let index = LexicalIndex::new(&db);

        let before = index.definitions().unwrap();
        let first = index.synchronize().unwrap();
        let second = index.synchronize().unwrap();
        let after = index.definitions().unwrap();

        assert_eq!(first.action, SyncAction::Unchanged);
        assert_eq!(second.action, SyncAction::Unchanged);
        assert_eq!(before, after);
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn test_missing_table_is_rebuilt_from_documents() {
        let (db, docs) = setup();
        let a = docs.create(word("laconic", "using few words")).unwrap();
        let b = docs.create(word("verbose", "using too many words")).unwrap();

        db.with_conn(|conn| {
            conn.execute_batch(
                "DROP TRIGGER words_fts_ai; DROP TRIGGER words_fts_au;
                 DROP TRIGGER words_fts_ad; DROP TABLE words_fts;",
            )?;
            Ok(())
        })
        .unwrap();

        let report = LexicalIndex::new(&db).synchronize().unwrap();
        assert_eq!(report.action, SyncAction::Rebuilt);
        assert_eq!(report.indexed, 2);

        let mut expected = vec![a.id.to_string(), b.id.to_string()];
        expected.sort();
        assert_eq!(fts_ids(&db), expected);
    }

    #[test]
    fn test_outdated_table_definition_is_rebuilt() {
        let (db, docs) = setup();
        docs.create(word("quixotic", "exceedingly idealistic")).unwrap();

        // simulate an older build with fewer columns
        db.with_conn(|conn| {
            conn.execute_batch(
                "DROP TRIGGER words_fts_ai; DROP TRIGGER words_fts_au;
                 DROP TRIGGER words_fts_ad; DROP TABLE words_fts;
                 CREATE VIRTUAL TABLE words_fts USING fts5(id UNINDEXED, word);
                 INSERT INTO words_fts (id, word) VALUES ('stale', 'stale');",
            )?;
            Ok(())
        })
        .unwrap();

        let index = LexicalIndex::new(&db);
        let report = index.synchronize().unwrap();
        assert_eq!(report.action, SyncAction::Rebuilt);
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.search("idealistic", 10).len(), 1);
        assert_eq!(index.synchronize().unwrap().action, SyncAction::Unchanged);
    }

    #[test]
    fn test_changed_trigger_recreates_triggers_only() {
        let (db, docs) = setup();
        docs.create(word("petrichor", "smell of rain")).unwrap();

        // an older delete trigger, plus a marker row a rebuild would wipe
        db.with_conn(|conn| {
            conn.execute_batch(
                "DROP TRIGGER words_fts_ad;
                 CREATE TRIGGER words_fts_ad AFTER DELETE ON documents BEGIN SELECT 1; END;
                 INSERT INTO words_fts (id, word) VALUES ('marker', 'marker');",
            )?;
            Ok(())
        })
        .unwrap();

        let index = LexicalIndex::new(&db);
        let report = index.synchronize().unwrap();
        assert_eq!(report.action, SyncAction::TriggersRecreated);
        assert!(fts_ids(&db).contains(&"marker".to_string()));

        let defs = index.definitions().unwrap();
        let (_, ad) = &defs.triggers[2];
        assert!(same_definition(ad.as_deref().unwrap(), DELETE_TRIGGER_SQL));
    }

    #[test]
    fn test_empty_index_with_correct_schema_is_populated() {
        let (db, docs) = setup();
        docs.create(word("halcyon", "calm and peaceful")).unwrap();
        db.with_conn(|conn| {
            conn.execute_batch("DELETE FROM words_fts;")?;
            Ok(())
        })
        .unwrap();

        let index = LexicalIndex::new(&db);
        let report = index.synchronize().unwrap();
        assert_eq!(report.action, SyncAction::Populated);
        assert_eq!(report.indexed, 1);
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn test_search_ranks_word_matches_first() {
        let (db, docs) = setup();
        docs.create(word("gregarious", "fond of company")).unwrap();
        docs.create(word("hermit", "avoids gregarious people")).unwrap();

        let hits = LexicalIndex::new(&db).search("gregarious", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.word, "gregarious");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_search_matches_prefixes_and_tags() {
        let (db, docs) = setup();
        docs.create(DocumentCreate {
            tags: vec!["literature".to_string()],
            ..word("allegory", "a story with hidden meaning")
        })
        .unwrap();

        let index = LexicalIndex::new(&db);
        assert_eq!(index.search("alleg", 10).len(), 1);
        assert_eq!(index.search("literature", 10).len(), 1);
    }

    #[test]
    fn test_search_empty_query() {
        let (db, docs) = setup();
        docs.create(word("zephyr", "a gentle breeze")).unwrap();
        let index = LexicalIndex::new(&db);
        assert!(index.search("", 10).is_empty());
        assert!(index.search("   ", 10).is_empty());
        assert!(index.search("\"*()", 10).is_empty());
    }

    #[test]
    fn test_search_unavailable_store_is_empty() {
        let (db, docs) = setup();
        docs.create(word("zephyr", "a gentle breeze")).unwrap();
        db.close();
        assert!(LexicalIndex::new(&db).search("zephyr", 10).is_empty());
    }

    #[test]
    fn test_tokenize_filters_stop_words() {
        assert_eq!(tokenize("the quick brown fox"), vec!["quick", "brown", "fox"]);
        assert_eq!(tokenize("rust-lang, python/django"), vec!["rust", "lang", "python", "django"]);
        // nothing but stop words: keep them
        assert_eq!(tokenize("to be"), vec!["to", "be"]);
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(match_expression("Quick fox").unwrap(), "\"quick\"* OR \"fox\"*");
        assert!(match_expression("  ").is_none());
    }
}
