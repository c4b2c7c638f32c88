//! The `Record` trait every stored type implements, plus the value type used
//! for its secondary-index fields.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A value usable in an indexed field, and therefore in a [`crate::Filter`].
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

/// A type that can be persisted in a [`crate::Store`].
///
/// `indexed_fields` exposes a subset of the record's data for filtering
/// without deserializing every row; the full record is still stored as JSON
/// and returned in full on every read.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn collection_name() -> &'static str;
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
