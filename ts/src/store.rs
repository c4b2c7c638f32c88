//! SQLite-backed generic record store.
//!
//! Each `Record` type gets its own table, named after `collection_name()`,
//! with the full record kept as a JSON blob alongside its indexed fields (also
//! JSON) so `query` can filter without a per-type schema.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::filter::Filter;
use crate::record::{IndexValue, Record};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        debug!(?path, "Store::open: called");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn ensure_table(&self, table: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{table}\" (
                    id TEXT PRIMARY KEY,
                    data TEXT NOT NULL,
                    index_fields TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ),
            [],
        )?;
        Ok(())
    }

    /// Insert or replace a record.
    pub fn put<T: Record>(&self, record: &T) -> Result<()> {
        let table = T::collection_name();
        debug!(table, id = record.id(), "Store::put: called");
        self.ensure_table(table)?;

        let data = serde_json::to_string(record)?;
        let index_fields = serde_json::to_string(&record.indexed_fields())?;

        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            &format!(
                "INSERT INTO \"{table}\" (id, data, index_fields, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data, index_fields = excluded.index_fields, updated_at = excluded.updated_at"
            ),
            params![record.id(), data, index_fields, record.updated_at()],
        )?;
        Ok(())
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let table = T::collection_name();
        debug!(table, id, "Store::get: called");
        self.ensure_table(table)?;

        let conn = self.conn.lock().expect("store mutex poisoned");
        let data: Option<String> = conn
            .query_row(&format!("SELECT data FROM \"{table}\" WHERE id = ?1"), params![id], |row| row.get(0))
            .optional()?;

        match data {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub fn delete<T: Record>(&self, id: &str) -> Result<()> {
        let table = T::collection_name();
        debug!(table, id, "Store::delete: called");
        self.ensure_table(table)?;
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(&format!("DELETE FROM \"{table}\" WHERE id = ?1"), params![id])?;
        Ok(())
    }

    pub fn list<T: Record>(&self) -> Result<Vec<T>> {
        let table = T::collection_name();
        debug!(table, "Store::list: called");
        self.ensure_table(table)?;

        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(&format!("SELECT data FROM \"{table}\" ORDER BY updated_at DESC"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    /// List records whose indexed fields satisfy every given filter.
    pub fn query<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        let table = T::collection_name();
        debug!(table, n_filters = filters.len(), "Store::query: called");
        self.ensure_table(table)?;

        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare(&format!("SELECT data, index_fields FROM \"{table}\" ORDER BY updated_at DESC"))?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut out = Vec::new();
        for row in rows {
            let (data, index_fields) = row?;
            let fields: HashMap<String, IndexValue> = serde_json::from_str(&index_fields)?;
            if filters.iter().all(|f| f.matches(fields.get(&f.field))) {
                out.push(serde_json::from_str(&data)?);
            }
        }
        Ok(out)
    }

    pub fn get_or_err<T: Record>(&self, id: &str) -> Result<T> {
        self.get(id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: String,
        name: String,
        count: i64,
        updated_at: i64,
    }

    impl Record for Widget {
        fn id(&self) -> &str {
            &self.id
        }
        fn updated_at(&self) -> i64 {
            self.updated_at
        }
        fn collection_name() -> &'static str {
            "widgets"
        }
        fn indexed_fields(&self) -> HashMap<String, IndexValue> {
            let mut fields = HashMap::new();
            fields.insert("name".to_string(), IndexValue::String(self.name.clone()));
            fields.insert("count".to_string(), IndexValue::Int(self.count));
            fields
        }
    }

    #[test]
    fn put_then_get_roundtrips() {
        let store = Store::open_in_memory().unwrap();
        let widget = Widget { id: "w1".into(), name: "gadget".into(), count: 3, updated_at: 1 };
        store.put(&widget).unwrap();
        let fetched: Widget = store.get("w1").unwrap().unwrap();
        assert_eq!(fetched, widget);
    }

    #[test]
    fn put_upserts_existing_id() {
        let store = Store::open_in_memory().unwrap();
        let mut widget = Widget { id: "w1".into(), name: "gadget".into(), count: 3, updated_at: 1 };
        store.put(&widget).unwrap();
        widget.count = 9;
        widget.updated_at = 2;
        store.put(&widget).unwrap();

        let all: Vec<Widget> = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].count, 9);
    }

    #[test]
    fn delete_removes_record() {
        let store = Store::open_in_memory().unwrap();
        let widget = Widget { id: "w1".into(), name: "gadget".into(), count: 3, updated_at: 1 };
        store.put(&widget).unwrap();
        store.delete::<Widget>("w1").unwrap();
        assert!(store.get::<Widget>("w1").unwrap().is_none());
    }

    #[test]
    fn query_filters_by_indexed_field() {
        let store = Store::open_in_memory().unwrap();
        store.put(&Widget { id: "w1".into(), name: "gadget".into(), count: 3, updated_at: 1 }).unwrap();
        store.put(&Widget { id: "w2".into(), name: "gizmo".into(), count: 7, updated_at: 2 }).unwrap();

        let found: Vec<Widget> =
            store.query(&[Filter::eq("name", IndexValue::String("gizmo".to_string()))]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "w2");
    }

    #[test]
    fn get_or_err_reports_missing_id() {
        let store = Store::open_in_memory().unwrap();
        let err = store.get_or_err::<Widget>("missing").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
