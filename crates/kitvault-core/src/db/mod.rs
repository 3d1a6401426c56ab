//! Database module using CozoDB for kit, voice, and sample storage
//!
//! This module provides:
//! - Relational storage with one row per sample keyed by (kit, voice, slot)
//! - Typed query builders that generate CozoScript internally
//! - Multi-statement scripts for single-transaction multi-row mutations
//!
//! # Architecture
//!
//! CozoDB executes every query block of one script inside a single
//! transaction, which is what the slot engine leans on: a move that shifts a
//! handful of rows and flips a kit's dirty flag is one `run_script` call, and
//! partial application is never observable.

mod batch;
mod queries;
mod schema;

pub use batch::{BatchQuery, SlotKey, SlotPlan};
pub use queries::{KitQuery, SampleQuery, VoiceQuery};
pub use schema::{KitRow, SampleRow, VoiceRow};

use cozo::{DataValue, DbInstance, NamedRows};
use std::collections::BTreeMap;
use std::path::Path;

/// Database connection wrapper
pub struct KitDb {
    db: DbInstance,
}

impl KitDb {
    /// Open or create a database at the given path
    ///
    /// Uses the SQLite backend for persistence.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let db = DbInstance::new("sqlite", path, "")
            .map_err(|e| DbError::Open(e.to_string()))?;

        let kit_db = Self { db };
        kit_db.ensure_schema()?;

        Ok(kit_db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, DbError> {
        let db = DbInstance::new("mem", "", "")
            .map_err(|e| DbError::Open(e.to_string()))?;

        let kit_db = Self { db };
        kit_db.ensure_schema()?;

        Ok(kit_db)
    }

    /// Ensure all required relations exist
    fn ensure_schema(&self) -> Result<(), DbError> {
        schema::create_all_relations(&self.db)?;
        Ok(())
    }

    /// Run a mutating CozoScript query
    pub fn run_script(
        &self,
        script: &str,
        params: BTreeMap<String, DataValue>,
    ) -> Result<NamedRows, DbError> {
        self.db
            .run_script(script, params, cozo::ScriptMutability::Mutable)
            .map_err(|e| DbError::Query(e.to_string()))
    }

    /// Run a read-only query
    pub fn run_query(
        &self,
        script: &str,
        params: BTreeMap<String, DataValue>,
    ) -> Result<NamedRows, DbError> {
        self.db
            .run_script(script, params, cozo::ScriptMutability::Immutable)
            .map_err(|e| DbError::Query(e.to_string()))
    }

    /// Get the underlying DbInstance for advanced usage
    pub fn inner(&self) -> &DbInstance {
        &self.db
    }
}

/// Database errors
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Failed to open database: {0}")]
    Open(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Helper macro for creating parameter maps
#[macro_export]
macro_rules! params {
    () => {
        std::collections::BTreeMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::BTreeMap::new();
        $(
            map.insert($key.to_string(), cozo::DataValue::from($value));
        )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = KitDb::in_memory().unwrap();
        let result = db.run_query("?[x] := x = 1", params!()).unwrap();
        assert_eq!(result.rows.len(), 1);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let db = KitDb::in_memory().unwrap();
        // Creating relations twice must not error
        db.ensure_schema().unwrap();
    }
}
