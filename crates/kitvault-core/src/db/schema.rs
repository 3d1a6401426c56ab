//! CozoDB schema definitions for kitvault
//!
//! Three relations hold the whole data model:
//!
//! - `kits` keyed by name, with alias, flags, and an optional step pattern
//! - `voices` keyed by (kit, voice); exactly 4 per kit, created with it
//! - `samples` keyed by (kit, voice, slot); one row per sample reference
//!
//! Step patterns and captured WAV metadata are stored as JSON strings.

use cozo::DbInstance;
use serde::{Deserialize, Serialize};

use super::DbError;
use crate::types::{StepPattern, WavMeta};

/// Database row for a kit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KitRow {
    pub name: String,
    pub alias: Option<String>,
    pub editable: bool,
    pub locked: bool,
    /// Set by every successful mutation, cleared when a device sync completes
    pub modified_since_sync: bool,
    pub step_pattern: Option<StepPattern>,
}

impl KitRow {
    /// A freshly created kit: editable, unlocked, never synced
    pub fn new(name: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            name: name.into(),
            alias,
            editable: true,
            locked: false,
            modified_since_sync: true,
            step_pattern: None,
        }
    }
}

/// Database row for a voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceRow {
    pub kit: String,
    pub voice: u8,
    pub alias: Option<String>,
}

/// Database row for a sample reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub kit: String,
    pub voice: u8,
    pub slot: u8,
    /// Stable identity minted at insert; survives moves
    pub id: i64,
    pub filename: String,
    /// Authoritative origin file
    pub source_path: String,
    pub is_stereo: bool,
    pub wav_meta: Option<WavMeta>,
}

// ============================================================================
// Schema Creation
// ============================================================================

/// Get the set of existing relation names in the database
fn get_existing_relations(
    db: &DbInstance,
) -> Result<std::collections::HashSet<String>, DbError> {
    let result = db
        .run_script(
            "::relations",
            Default::default(),
            cozo::ScriptMutability::Immutable,
        )
        .map_err(|e| DbError::Schema(e.to_string()))?;

    let mut relations = std::collections::HashSet::new();
    for row in result.rows {
        if let Some(name) = row.first().and_then(|v| v.get_str()) {
            relations.insert(name.to_string());
        }
    }
    Ok(relations)
}

/// Create all required relations in the database (idempotent)
pub fn create_all_relations(db: &DbInstance) -> Result<(), DbError> {
    let existing = get_existing_relations(db)?;
    log::debug!("Existing relations: {:?}", existing);

    if !existing.contains("kits") {
        log::debug!("Creating 'kits' relation");
        create_kits_relation(db)?;
    }
    if !existing.contains("voices") {
        log::debug!("Creating 'voices' relation");
        create_voices_relation(db)?;
    }
    if !existing.contains("samples") {
        log::debug!("Creating 'samples' relation");
        create_samples_relation(db)?;
    }

    Ok(())
}

fn run_schema(db: &DbInstance, script: &str) -> Result<(), DbError> {
    db.run_script(script, Default::default(), cozo::ScriptMutability::Mutable)
        .map_err(|e| DbError::Schema(e.to_string()))?;
    Ok(())
}

fn create_kits_relation(db: &DbInstance) -> Result<(), DbError> {
    run_schema(
        db,
        r#"
        {:create kits {
            name: String =>
            alias: String?,
            editable: Bool,
            locked: Bool,
            modified_since_sync: Bool,
            step_pattern: String?
        }}
    "#,
    )
}

fn create_voices_relation(db: &DbInstance) -> Result<(), DbError> {
    run_schema(
        db,
        r#"
        {:create voices {
            kit: String,
            voice: Int =>
            alias: String?
        }}
    "#,
    )
}

fn create_samples_relation(db: &DbInstance) -> Result<(), DbError> {
    run_schema(
        db,
        r#"
        {:create samples {
            kit: String,
            voice: Int,
            slot: Int =>
            id: Int,
            filename: String,
            source_path: String,
            is_stereo: Bool,
            wav_meta: String?
        }}
    "#,
    )
}
