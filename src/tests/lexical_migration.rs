//! Startup migration of the lexical index against database files written by
//! other builds.

use std::sync::Arc;

use crate::documents::{DocumentCreate, DocumentStore, DocumentUpdate, SqliteDocuments};
use crate::semantic::{LexicalIndex, SyncAction};
use crate::store::Database;

fn open(path: &std::path::Path) -> (Arc<Database>, SqliteDocuments) {
    let db = Arc::new(Database::open(path).expect("failed to open database"));
    let docs = SqliteDocuments::new(db.clone());
    (db, docs)
}

fn add(docs: &SqliteDocuments, word: &str, description: &str, kind: Option<&str>) {
    docs.create(DocumentCreate {
        kind: kind.map(|k| k.to_string()),
        word: word.to_string(),
        description: Some(description.to_string()),
        ..Default::default()
    })
    .unwrap();
}

fn tamper(db: &Database, sql: &str) {
    db.with_conn(|conn| {
        conn.execute_batch(sql)?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_reopen_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vocab.sqlite3");

    let (db, docs) = open(&path);
    add(&docs, "lucid", "clear and easy to understand", None);
    let before = LexicalIndex::new(&db).definitions().unwrap();
    drop(docs);
    drop(db);

    let (db, _) = open(&path);
    let index = LexicalIndex::new(&db);
    assert_eq!(index.definitions().unwrap(), before);
    assert_eq!(index.synchronize().unwrap().action, SyncAction::Unchanged);
    assert_eq!(index.len().unwrap(), 1);
}

#[test]
fn test_outdated_trigger_is_replaced_without_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vocab.sqlite3");

    let (db, docs) = open(&path);
    add(&docs, "lucid", "clear", None);
    let expected = LexicalIndex::new(&db).definitions().unwrap();

    // an older build only mirrored the word column on update
    tamper(
        &db,
        "DROP TRIGGER words_fts_au;
         CREATE TRIGGER words_fts_au AFTER UPDATE ON documents
         BEGIN
             DELETE FROM words_fts WHERE id = old.id;
             INSERT INTO words_fts (id, word) VALUES (new.id, new.word);
         END;",
    );
    drop(docs);
    drop(db);

    let (db, docs) = open(&path);
    assert_eq!(LexicalIndex::new(&db).definitions().unwrap(), expected);

    let id = docs.get_page(0, 1).unwrap()[0].id.clone();
    docs.update(
        &id,
        DocumentUpdate {
            description: Some("transparent and luminous".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    let hits = LexicalIndex::new(&db).search("luminous", 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document.id, id);
}

#[test]
fn test_outdated_table_is_rebuilt_from_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vocab.sqlite3");

    let (db, docs) = open(&path);
    add(&docs, "lucid", "clear", None);
    add(&docs, "opaque", "not transparent", None);
    add(&docs, "grammar note", "not a word entry", Some("note"));

    tamper(
        &db,
        "DROP TRIGGER words_fts_ai;
         DROP TRIGGER words_fts_au;
         DROP TRIGGER words_fts_ad;
         DROP TABLE words_fts;
         CREATE VIRTUAL TABLE words_fts USING fts5(id UNINDEXED, word);",
    );
    drop(docs);
    drop(db);

    let (db, docs) = open(&path);
    let index = LexicalIndex::new(&db);
    assert_eq!(docs.count().unwrap(), 3);
    assert_eq!(index.len().unwrap(), 2);
    assert_eq!(index.search("transparent", 10).len(), 1);
    assert!(index.search("entry", 10).is_empty());
    assert_eq!(index.synchronize().unwrap().action, SyncAction::Unchanged);
}

#[test]
fn test_cosmetic_differences_are_ignored() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("vocab.sqlite3");

    let (db, docs) = open(&path);
    add(&docs, "lucid", "clear", None);

    // same trigger, different whitespace and keyword case
    tamper(
        &db,
        "DROP TRIGGER words_fts_ad;
         create trigger words_fts_ad after delete on documents begin
         delete from words_fts where id=old.id; end;",
    );
    drop(docs);
    drop(db);

    // opening runs the migration; the hand-written trigger must survive it
    let (db, docs) = open(&path);
    let index = LexicalIndex::new(&db);
    let triggers = index.definitions().unwrap().triggers;
    let (_, sql) = triggers
        .iter()
        .find(|(name, _)| name == "words_fts_ad")
        .unwrap();
    let sql = sql.as_deref().unwrap();
    assert!(sql.contains("after delete on documents begin"));
    assert!(sql.contains("id=old.id"));
    assert_eq!(index.synchronize().unwrap().action, SyncAction::Unchanged);

    // and it still does its job
    let id = docs.get_page(0, 1).unwrap()[0].id.clone();
    assert!(docs.delete(&id).unwrap());
    assert_eq!(index.len().unwrap(), 0);
}
