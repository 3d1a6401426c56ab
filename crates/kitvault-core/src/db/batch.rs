//! Single-transaction multi-row mutations
//!
//! CozoDB executes all query blocks of one script inside one transaction, so
//! each operation here assembles its blocks (row removals, row writes, kit
//! dirty-flag updates) and commits with a single `run_script` call. This is
//! the primitive the move/reindex engine and the undo coordinator sit on:
//! however many rows an operation touches, either all of them change or none.

use super::queries::{sample_row_value, step_pattern_value};
use super::schema::{KitRow, SampleRow};
use super::{DbError, KitDb};
use crate::types::NUM_VOICES;
use cozo::DataValue;
use std::collections::BTreeMap;

/// Key of one sample row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotKey {
    pub kit: String,
    pub voice: u8,
    pub slot: u8,
}

impl SlotKey {
    pub fn new(kit: impl Into<String>, voice: u8, slot: u8) -> Self {
        Self {
            kit: kit.into(),
            voice,
            slot,
        }
    }
}

/// One transaction's worth of slot mutations
///
/// Removals are applied before writes, so a plan may move a row by removing
/// its old key and writing it under a new one. Every kit in `dirty_kits` gets
/// its modified-since-sync flag set in the same transaction.
#[derive(Debug, Clone, Default)]
pub struct SlotPlan {
    pub removals: Vec<SlotKey>,
    pub writes: Vec<SampleRow>,
    pub dirty_kits: Vec<String>,
}

impl SlotPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a kit dirty, once
    pub fn touch_kit(&mut self, kit: &str) {
        if !self.dirty_kits.iter().any(|k| k == kit) {
            self.dirty_kits.push(kit.to_string());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.writes.is_empty()
    }
}

/// Batch operations over kits, voices, and samples
pub struct BatchQuery;

impl BatchQuery {
    /// Apply a slot plan in one transaction
    pub fn apply_slot_plan(db: &KitDb, plan: &SlotPlan) -> Result<(), DbError> {
        if plan.is_empty() {
            return Ok(());
        }

        let mut script = String::new();
        let mut params = BTreeMap::new();

        if !plan.removals.is_empty() {
            let keys: Vec<DataValue> = plan
                .removals
                .iter()
                .map(|k| {
                    DataValue::List(vec![
                        DataValue::Str(k.kit.clone().into()),
                        DataValue::from(k.voice as i64),
                        DataValue::from(k.slot as i64),
                    ])
                })
                .collect();
            params.insert("removals".to_string(), DataValue::List(keys));
            script.push_str(
                r#"
                {
                    ?[kit, voice, slot] <- $removals
                    :rm samples {kit, voice, slot}
                }
            "#,
            );
        }

        if !plan.writes.is_empty() {
            let rows: Vec<DataValue> = plan
                .writes
                .iter()
                .map(sample_row_value)
                .collect::<Result<_, _>>()?;
            params.insert("writes".to_string(), DataValue::List(rows));
            script.push_str(
                r#"
                {
                    ?[kit, voice, slot, id, filename, source_path, is_stereo, wav_meta] <- $writes
                    :put samples {kit, voice, slot => id, filename, source_path, is_stereo, wav_meta}
                }
            "#,
            );
        }

        if !plan.dirty_kits.is_empty() {
            let kits: Vec<DataValue> = plan
                .dirty_kits
                .iter()
                .map(|k| DataValue::Str(k.clone().into()))
                .collect();
            params.insert("dirty".to_string(), DataValue::List(kits));
            script.push_str(
                r#"
                {
                    ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                        *kits{name, alias, editable, locked, step_pattern},
                        name in $dirty,
                        modified_since_sync = true
                    :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
                }
            "#,
            );
        }

        log::debug!(
            "BatchQuery::apply_slot_plan: {} removals, {} writes, {} dirty kits",
            plan.removals.len(),
            plan.writes.len(),
            plan.dirty_kits.len()
        );

        db.run_script(&script, params)?;
        Ok(())
    }

    /// Create a kit and its 4 voices in one transaction
    pub fn create_kit(db: &KitDb, kit: &KitRow) -> Result<(), DbError> {
        let voices: Vec<DataValue> = (1..=NUM_VOICES)
            .map(|v| {
                DataValue::List(vec![
                    DataValue::Str(kit.name.clone().into()),
                    DataValue::from(v as i64),
                    DataValue::Null,
                ])
            })
            .collect();

        let mut params = BTreeMap::new();
        params.insert("name".to_string(), DataValue::Str(kit.name.clone().into()));
        params.insert(
            "alias".to_string(),
            kit.alias
                .as_deref()
                .map(DataValue::from)
                .unwrap_or(DataValue::Null),
        );
        params.insert("editable".to_string(), DataValue::Bool(kit.editable));
        params.insert("locked".to_string(), DataValue::Bool(kit.locked));
        params.insert(
            "modified_since_sync".to_string(),
            DataValue::Bool(kit.modified_since_sync),
        );
        params.insert(
            "step_pattern".to_string(),
            step_pattern_value(kit.step_pattern.as_ref())?,
        );
        params.insert("voices".to_string(), DataValue::List(voices));

        db.run_script(
            r#"
            {
                ?[name, alias, editable, locked, modified_since_sync, step_pattern] <- [[
                    $name, $alias, $editable, $locked, $modified_since_sync, $step_pattern
                ]]
                :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
            }
            {
                ?[kit, voice, alias] <- $voices
                :put voices {kit, voice => alias}
            }
        "#,
            params,
        )?;

        Ok(())
    }

    /// Delete a kit with cascading delete of its voices and samples
    pub fn delete_kit(db: &KitDb, name: &str) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), DataValue::from(name));

        db.run_script(
            r#"
            {
                ?[kit, voice, slot] := *samples{kit, voice, slot}, kit = $name
                :rm samples {kit, voice, slot}
            }
            {
                ?[kit, voice] := *voices{kit, voice}, kit = $name
                :rm voices {kit, voice}
            }
            {
                ?[name] := name = $name
                :rm kits {name}
            }
        "#,
            params,
        )?;

        Ok(())
    }

    /// Set a voice alias and mark the owning kit modified, in one transaction
    pub fn set_voice_alias(
        db: &KitDb,
        kit: &str,
        voice: u8,
        alias: Option<&str>,
    ) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("voice".to_string(), DataValue::from(voice as i64));
        params.insert(
            "alias".to_string(),
            alias.map(DataValue::from).unwrap_or(DataValue::Null),
        );

        db.run_script(
            r#"
            {
                ?[kit, voice, alias] <- [[$kit, $voice, $alias]]
                :put voices {kit, voice => alias}
            }
            {
                ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                    *kits{name, alias, editable, locked, step_pattern},
                    name = $kit,
                    modified_since_sync = true
                :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
            }
        "#,
            params,
        )?;

        Ok(())
    }

    /// Commit a planned kit layout wholesale: every existing sample row of the
    /// kit is replaced by `entries` in one transaction
    ///
    /// When two entries target the same (voice, slot), the last one wins;
    /// this mirrors the import path's observed behavior and is deliberate.
    pub fn commit_kit_plan(
        db: &KitDb,
        kit: &str,
        entries: &[SampleRow],
    ) -> Result<(), DbError> {
        let mut dedup: BTreeMap<(u8, u8), SampleRow> = BTreeMap::new();
        for entry in entries {
            let mut row = entry.clone();
            row.kit = kit.to_string();
            dedup.insert((row.voice, row.slot), row);
        }

        let rows: Vec<DataValue> = dedup
            .values()
            .map(sample_row_value)
            .collect::<Result<_, _>>()?;

        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("rows".to_string(), DataValue::List(rows));

        let mut script = String::from(
            r#"
            {
                ?[kit, voice, slot] := *samples{kit, voice, slot}, kit = $kit
                :rm samples {kit, voice, slot}
            }
        "#,
        );
        if !dedup.is_empty() {
            script.push_str(
                r#"
                {
                    ?[kit, voice, slot, id, filename, source_path, is_stereo, wav_meta] <- $rows
                    :put samples {kit, voice, slot => id, filename, source_path, is_stereo, wav_meta}
                }
            "#,
            );
        }
        script.push_str(
            r#"
            {
                ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                    *kits{name, alias, editable, locked, step_pattern},
                    name = $kit,
                    modified_since_sync = true
                :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
            }
        "#,
        );

        log::info!(
            "BatchQuery::commit_kit_plan: kit='{}' rewriting {} rows",
            kit,
            dedup.len()
        );

        db.run_script(&script, params)?;
        Ok(())
    }
}
