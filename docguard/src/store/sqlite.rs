use super::{apply_modifier, AccessRules, DocumentStore, Selector, UpdateOptions};
use crate::document::{Document, ID_FIELD};
use crate::error::{DocGuardError, Result};
use crate::schema::AutoIdStrategy;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;

/// A document collection stored as JSON rows in SQLite.
/// Several collections may share one database file; rows are keyed by (collection, id).
pub struct SqliteStore {
    conn: Connection,
    name: String,
    id_strategy: AutoIdStrategy,
    allow_rules: Vec<AccessRules>,
    deny_rules: Vec<AccessRules>,
}

impl SqliteStore {
    /// Open or create the collection `name` in the database at `path`.
    pub fn open(path: &Path, name: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, name)
    }

    /// Open an in-memory collection (for testing).
    pub fn open_in_memory(name: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, name)
    }

    fn with_connection(conn: Connection, name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(DocGuardError::Argument("Collection name must not be empty".into()));
        }
        let store = SqliteStore {
            conn,
            name: name.to_string(),
            id_strategy: AutoIdStrategy::default(),
            allow_rules: Vec::new(),
            deny_rules: Vec::new(),
        };
        store.initialize_tables()?;
        Ok(store)
    }

    /// Id generation strategy for documents inserted without an `_id`
    pub fn with_id_strategy(mut self, strategy: AutoIdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            ",
        )?;
        Ok(())
    }

    /// Recorded allow rules, in registration order
    pub fn allow_rules(&self) -> &[AccessRules] {
        &self.allow_rules
    }

    /// Recorded deny rules, in registration order
    pub fn deny_rules(&self) -> &[AccessRules] {
        &self.deny_rules
    }

    /// Number of documents in the collection
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn generate_id(&self) -> String {
        match self.id_strategy {
            AutoIdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            AutoIdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            AutoIdStrategy::Nanoid => nanoid::nanoid!(),
        }
    }

    fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT data_json FROM documents WHERE collection = ?1 AND id = ?2",
                params![self.name, id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| decode(&j)).transpose()
    }

    fn list_documents(&self) -> Result<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT data_json FROM documents WHERE collection = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![self.name], |row| row.get::<_, String>(0))?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(decode(&row?)?);
        }
        Ok(docs)
    }

    fn matching(&self, selector: &Selector) -> Result<Vec<Document>> {
        if let Some(id) = selector.target_id() {
            return Ok(self
                .get_document(id)?
                .filter(|doc| selector.matches(doc))
                .into_iter()
                .collect());
        }
        Ok(self
            .list_documents()?
            .into_iter()
            .filter(|doc| selector.matches(doc))
            .collect())
    }
}

impl DocumentStore for SqliteStore {
    fn open_named(name: &str) -> Result<Self> {
        SqliteStore::open_in_memory(name)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn insert(&mut self, mut doc: Document) -> Result<String> {
        let id = match doc.get(ID_FIELD) {
            Some(Value::String(id)) => id.clone(),
            None | Some(Value::Null) => self.generate_id(),
            Some(other) => {
                return Err(DocGuardError::Store(format!(
                    "Document {ID_FIELD} must be a string, got {other}"
                )))
            }
        };
        doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        if self.get_document(&id)?.is_some() {
            return Err(DocGuardError::Store(format!(
                "Duplicate id '{id}' in collection '{}'",
                self.name
            )));
        }

        let data_json = serde_json::to_string(&doc)?;
        self.conn.execute(
            "INSERT INTO documents (collection, id, data_json) VALUES (?1, ?2, ?3)",
            params![self.name, id, data_json],
        )?;
        Ok(id)
    }

    fn update(
        &mut self,
        selector: &Selector,
        modifier: &Document,
        options: &UpdateOptions,
    ) -> Result<u64> {
        let mut targets = self.matching(selector)?;
        if !options.multi {
            targets.truncate(1);
        }

        if targets.is_empty() {
            if !options.upsert {
                return Ok(0);
            }
            let mut doc = selector.criteria().clone();
            apply_modifier(&mut doc, modifier)?;
            self.insert(doc)?;
            return Ok(1);
        }

        // Apply every change before writing any, so a bad modifier leaves the
        // collection untouched
        let mut updated = Vec::with_capacity(targets.len());
        for mut doc in targets {
            apply_modifier(&mut doc, modifier)?;
            let id = doc
                .get(ID_FIELD)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| DocGuardError::Store("Stored document has no id".into()))?;
            updated.push((id, serde_json::to_string(&doc)?));
        }

        let tx = self.conn.transaction()?;
        for (id, data_json) in &updated {
            tx.execute(
                "UPDATE documents SET data_json = ?3 WHERE collection = ?1 AND id = ?2",
                params![self.name, id, data_json],
            )?;
        }
        tx.commit()?;

        Ok(updated.len() as u64)
    }

    fn remove(&mut self, selector: &Selector) -> Result<u64> {
        let ids: Vec<String> = self
            .matching(selector)?
            .iter()
            .filter_map(|doc| doc.get(ID_FIELD).and_then(Value::as_str).map(str::to_string))
            .collect();

        let tx = self.conn.transaction()?;
        for id in &ids {
            tx.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![self.name, id],
            )?;
        }
        tx.commit()?;

        Ok(ids.len() as u64)
    }

    fn find(&self, selector: &Selector) -> Result<Vec<Document>> {
        self.matching(selector)
    }

    fn allow(&mut self, rules: AccessRules) {
        self.allow_rules.push(rules);
    }

    fn deny(&mut self, rules: AccessRules) {
        self.deny_rules.push(rules);
    }
}

fn decode(json: &str) -> Result<Document> {
    match serde_json::from_str::<Value>(json)? {
        Value::Object(doc) => Ok(doc),
        other => Err(DocGuardError::Store(format!(
            "Stored document is not an object: {other}"
        ))),
    }
}
