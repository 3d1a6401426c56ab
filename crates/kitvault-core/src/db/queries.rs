//! Query builders and helpers for CozoDB
//!
//! This module provides typed query APIs that generate CozoScript internally.
//! Kit metadata updates fold the modified-since-sync flip into the same query
//! so a flag change is one transaction like everything else.

use super::schema::{KitRow, SampleRow, VoiceRow};
use super::{DbError, KitDb};
use crate::types::{StepPattern, WavMeta};
use cozo::{DataValue, NamedRows};
use std::collections::BTreeMap;

// ============================================================================
// Kit Queries
// ============================================================================

/// Query builder for kits
pub struct KitQuery;

impl KitQuery {
    /// Get a kit by name
    pub fn get(db: &KitDb, name: &str) -> Result<Option<KitRow>, DbError> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), DataValue::from(name));

        let result = db.run_query(
            r#"
            ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                *kits{name, alias, editable, locked, modified_since_sync, step_pattern},
                name = $name
        "#,
            params,
        )?;

        Ok(rows_to_kits(&result)?.into_iter().next())
    }

    /// Get all kits, ordered by name
    pub fn get_all(db: &KitDb) -> Result<Vec<KitRow>, DbError> {
        let result = db.run_query(
            r#"
            ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                *kits{name, alias, editable, locked, modified_since_sync, step_pattern}
            :order name
        "#,
            BTreeMap::new(),
        )?;

        rows_to_kits(&result)
    }

    /// Insert or update a kit row
    pub fn upsert(db: &KitDb, kit: &KitRow) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), DataValue::Str(kit.name.clone().into()));
        params.insert("alias".to_string(), opt_str_value(kit.alias.as_deref()));
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

        db.run_script(
            r#"
            ?[name, alias, editable, locked, modified_since_sync, step_pattern] <- [[
                $name, $alias, $editable, $locked, $modified_since_sync, $step_pattern
            ]]
            :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
        "#,
            params,
        )?;

        Ok(())
    }

    /// Update a single boolean flag of a kit
    ///
    /// Supported fields: editable, locked, modified_since_sync. Changing
    /// editable or locked also marks the kit modified; setting
    /// modified_since_sync writes the value verbatim (the sync path clears it).
    pub fn update_flag(
        db: &KitDb,
        name: &str,
        field: &str,
        value: bool,
    ) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), DataValue::from(name));
        params.insert("value".to_string(), DataValue::Bool(value));

        let query = match field {
            "editable" => {
                r#"
                    ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                        *kits{name, alias, locked, step_pattern},
                        name = $name,
                        editable = $value,
                        modified_since_sync = true
                    :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
                "#
            }
            "locked" => {
                r#"
                    ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                        *kits{name, alias, editable, step_pattern},
                        name = $name,
                        locked = $value,
                        modified_since_sync = true
                    :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
                "#
            }
            "modified_since_sync" => {
                r#"
                    ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                        *kits{name, alias, editable, locked, step_pattern},
                        name = $name,
                        modified_since_sync = $value
                    :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
                "#
            }
            _ => {
                return Err(DbError::Query(format!(
                    "Unknown or immutable kit flag: {}",
                    field
                )));
            }
        };

        db.run_script(query, params)?;
        Ok(())
    }

    /// Set or clear a kit's alias, marking the kit modified
    pub fn set_alias(db: &KitDb, name: &str, alias: Option<&str>) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), DataValue::from(name));
        params.insert("alias".to_string(), opt_str_value(alias));

        db.run_script(
            r#"
            ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                *kits{name, editable, locked, step_pattern},
                name = $name,
                alias = $alias,
                modified_since_sync = true
            :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
        "#,
            params,
        )?;

        Ok(())
    }

    /// Set or clear a kit's step pattern, marking the kit modified
    pub fn set_step_pattern(
        db: &KitDb,
        name: &str,
        pattern: Option<&StepPattern>,
    ) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("name".to_string(), DataValue::from(name));
        params.insert("step_pattern".to_string(), step_pattern_value(pattern)?);

        db.run_script(
            r#"
            ?[name, alias, editable, locked, modified_since_sync, step_pattern] :=
                *kits{name, alias, editable, locked},
                name = $name,
                step_pattern = $step_pattern,
                modified_since_sync = true
            :put kits {name => alias, editable, locked, modified_since_sync, step_pattern}
        "#,
            params,
        )?;

        Ok(())
    }

    /// Count kits in the database
    pub fn count(db: &KitDb) -> Result<usize, DbError> {
        let result = db.run_query(
            r#"
            ?[count(name)] := *kits{name}
        "#,
            BTreeMap::new(),
        )?;

        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.get_int())
            .unwrap_or(0) as usize)
    }
}

// ============================================================================
// Voice Queries
// ============================================================================

/// Query builder for voices
pub struct VoiceQuery;

impl VoiceQuery {
    /// Get the 4 voices of a kit, ordered by voice number
    pub fn get_for_kit(db: &KitDb, kit: &str) -> Result<Vec<VoiceRow>, DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));

        let result = db.run_query(
            r#"
            ?[kit, voice, alias] := *voices{kit, voice, alias}, kit = $kit
            :order voice
        "#,
            params,
        )?;

        rows_to_voices(&result)
    }

    /// Get a single voice row
    pub fn get(db: &KitDb, kit: &str, voice: u8) -> Result<Option<VoiceRow>, DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("voice".to_string(), DataValue::from(voice as i64));

        let result = db.run_query(
            r#"
            ?[kit, voice, alias] := *voices{kit, voice, alias}, kit = $kit, voice = $voice
        "#,
            params,
        )?;

        Ok(rows_to_voices(&result)?.into_iter().next())
    }
}

// ============================================================================
// Sample Queries
// ============================================================================

/// Query builder for sample rows
pub struct SampleQuery;

impl SampleQuery {
    /// Get the sample at an exact (kit, voice, slot), if any
    pub fn get(
        db: &KitDb,
        kit: &str,
        voice: u8,
        slot: u8,
    ) -> Result<Option<SampleRow>, DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("voice".to_string(), DataValue::from(voice as i64));
        params.insert("slot".to_string(), DataValue::from(slot as i64));

        let result = db.run_query(
            r#"
            ?[kit, voice, slot, id, filename, source_path, is_stereo, wav_meta] :=
                *samples{kit, voice, slot, id, filename, source_path, is_stereo, wav_meta},
                kit = $kit, voice = $voice, slot = $slot
        "#,
            params,
        )?;

        Ok(rows_to_samples(&result)?.into_iter().next())
    }

    /// Get every sample of one voice, ordered by slot
    pub fn get_voice(db: &KitDb, kit: &str, voice: u8) -> Result<Vec<SampleRow>, DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("voice".to_string(), DataValue::from(voice as i64));

        let result = db.run_query(
            r#"
            ?[kit, voice, slot, id, filename, source_path, is_stereo, wav_meta] :=
                *samples{kit, voice, slot, id, filename, source_path, is_stereo, wav_meta},
                kit = $kit, voice = $voice
            :order slot
        "#,
            params,
        )?;

        rows_to_samples(&result)
    }

    /// Get every sample of a kit, ordered by (voice, slot)
    pub fn get_kit(db: &KitDb, kit: &str) -> Result<Vec<SampleRow>, DbError> {
        log::debug!("SampleQuery::get_kit: querying kit='{}'", kit);

        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));

        let result = db.run_query(
            r#"
            ?[kit, voice, slot, id, filename, source_path, is_stereo, wav_meta] :=
                *samples{kit, voice, slot, id, filename, source_path, is_stereo, wav_meta},
                kit = $kit
            :order voice, slot
        "#,
            params,
        )?;

        let samples = rows_to_samples(&result)?;
        log::debug!(
            "SampleQuery::get_kit: found {} samples for kit='{}'",
            samples.len(),
            kit
        );
        Ok(samples)
    }

    /// Get every sample in the database, ordered by (kit, voice, slot)
    pub fn get_all(db: &KitDb) -> Result<Vec<SampleRow>, DbError> {
        let result = db.run_query(
            r#"
            ?[kit, voice, slot, id, filename, source_path, is_stereo, wav_meta] :=
                *samples{kit, voice, slot, id, filename, source_path, is_stereo, wav_meta}
            :order kit, voice, slot
        "#,
            BTreeMap::new(),
        )?;

        rows_to_samples(&result)
    }

    /// Insert or update a single sample row
    pub fn upsert(db: &KitDb, sample: &SampleRow) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("row".to_string(), sample_row_value(sample)?);

        db.run_script(
            r#"
            ?[kit, voice, slot, id, filename, source_path, is_stereo, wav_meta] <- [$row]
            :put samples {kit, voice, slot => id, filename, source_path, is_stereo, wav_meta}
        "#,
            params,
        )?;

        Ok(())
    }

    /// Delete a single sample row
    pub fn delete(db: &KitDb, kit: &str, voice: u8, slot: u8) -> Result<(), DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("voice".to_string(), DataValue::from(voice as i64));
        params.insert("slot".to_string(), DataValue::from(slot as i64));

        db.run_script(
            r#"
            ?[kit, voice, slot] <- [[$kit, $voice, $slot]]
            :rm samples {kit, voice, slot}
        "#,
            params,
        )?;

        Ok(())
    }

    /// Count the samples of one voice
    pub fn count_voice(db: &KitDb, kit: &str, voice: u8) -> Result<usize, DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("voice".to_string(), DataValue::from(voice as i64));

        let result = db.run_query(
            r#"
            ?[count(slot)] := *samples{kit, voice, slot}, kit = $kit, voice = $voice
        "#,
            params,
        )?;

        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.get_int())
            .unwrap_or(0) as usize)
    }

    /// Highest occupied slot of one voice, if any
    pub fn max_slot(db: &KitDb, kit: &str, voice: u8) -> Result<Option<u8>, DbError> {
        let mut params = BTreeMap::new();
        params.insert("kit".to_string(), DataValue::from(kit));
        params.insert("voice".to_string(), DataValue::from(voice as i64));

        let result = db.run_query(
            r#"
            ?[max(slot)] := *samples{kit, voice, slot}, kit = $kit, voice = $voice
        "#,
            params,
        )?;

        Ok(result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(|v| v.get_int())
            .map(|s| s as u8))
    }
}

// ============================================================================
// Value Helpers
// ============================================================================

fn opt_str_value(s: Option<&str>) -> DataValue {
    s.map(DataValue::from).unwrap_or(DataValue::Null)
}

fn value_to_bool(v: &DataValue) -> Option<bool> {
    match v {
        DataValue::Bool(b) => Some(*b),
        _ => None,
    }
}

fn value_to_opt_string(v: &DataValue) -> Option<String> {
    v.get_str().map(|s| s.to_string())
}

pub(super) fn step_pattern_value(p: Option<&StepPattern>) -> Result<DataValue, DbError> {
    match p {
        Some(p) => {
            let json =
                serde_json::to_string(p).map_err(|e| DbError::Serialization(e.to_string()))?;
            Ok(DataValue::Str(json.into()))
        }
        None => Ok(DataValue::Null),
    }
}

pub(super) fn wav_meta_value(m: Option<&WavMeta>) -> Result<DataValue, DbError> {
    match m {
        Some(m) => {
            let json =
                serde_json::to_string(m).map_err(|e| DbError::Serialization(e.to_string()))?;
            Ok(DataValue::Str(json.into()))
        }
        None => Ok(DataValue::Null),
    }
}

/// Full write-order row for the samples relation
pub(super) fn sample_row_value(s: &SampleRow) -> Result<DataValue, DbError> {
    Ok(DataValue::List(vec![
        DataValue::Str(s.kit.clone().into()),
        DataValue::from(s.voice as i64),
        DataValue::from(s.slot as i64),
        DataValue::from(s.id),
        DataValue::Str(s.filename.clone().into()),
        DataValue::Str(s.source_path.clone().into()),
        DataValue::Bool(s.is_stereo),
        wav_meta_value(s.wav_meta.as_ref())?,
    ]))
}

fn malformed(relation: &str, column: &str) -> DbError {
    DbError::Serialization(format!("malformed {} row: bad {}", relation, column))
}

fn rows_to_kits(result: &NamedRows) -> Result<Vec<KitRow>, DbError> {
    result
        .rows
        .iter()
        .map(|row| {
            let name = row
                .first()
                .and_then(|v| v.get_str())
                .ok_or_else(|| malformed("kits", "name"))?
                .to_string();
            let alias = row.get(1).and_then(value_to_opt_string);
            let editable = row
                .get(2)
                .and_then(value_to_bool)
                .ok_or_else(|| malformed("kits", "editable"))?;
            let locked = row
                .get(3)
                .and_then(value_to_bool)
                .ok_or_else(|| malformed("kits", "locked"))?;
            let modified_since_sync = row
                .get(4)
                .and_then(value_to_bool)
                .ok_or_else(|| malformed("kits", "modified_since_sync"))?;
            let step_pattern = match row.get(5).and_then(|v| v.get_str()) {
                Some(json) => Some(
                    serde_json::from_str(json)
                        .map_err(|e| DbError::Serialization(e.to_string()))?,
                ),
                None => None,
            };
            Ok(KitRow {
                name,
                alias,
                editable,
                locked,
                modified_since_sync,
                step_pattern,
            })
        })
        .collect()
}

fn rows_to_voices(result: &NamedRows) -> Result<Vec<VoiceRow>, DbError> {
    result
        .rows
        .iter()
        .map(|row| {
            let kit = row
                .first()
                .and_then(|v| v.get_str())
                .ok_or_else(|| malformed("voices", "kit"))?
                .to_string();
            let voice = row
                .get(1)
                .and_then(|v| v.get_int())
                .ok_or_else(|| malformed("voices", "voice"))? as u8;
            let alias = row.get(2).and_then(value_to_opt_string);
            Ok(VoiceRow { kit, voice, alias })
        })
        .collect()
}

pub(super) fn rows_to_samples(result: &NamedRows) -> Result<Vec<SampleRow>, DbError> {
    result
        .rows
        .iter()
        .map(|row| {
            let kit = row
                .first()
                .and_then(|v| v.get_str())
                .ok_or_else(|| malformed("samples", "kit"))?
                .to_string();
            let voice = row
                .get(1)
                .and_then(|v| v.get_int())
                .ok_or_else(|| malformed("samples", "voice"))? as u8;
            let slot = row
                .get(2)
                .and_then(|v| v.get_int())
                .ok_or_else(|| malformed("samples", "slot"))? as u8;
            let id = row
                .get(3)
                .and_then(|v| v.get_int())
                .ok_or_else(|| malformed("samples", "id"))?;
            let filename = row
                .get(4)
                .and_then(|v| v.get_str())
                .ok_or_else(|| malformed("samples", "filename"))?
                .to_string();
            let source_path = row
                .get(5)
                .and_then(|v| v.get_str())
                .ok_or_else(|| malformed("samples", "source_path"))?
                .to_string();
            let is_stereo = row
                .get(6)
                .and_then(value_to_bool)
                .ok_or_else(|| malformed("samples", "is_stereo"))?;
            let wav_meta = match row.get(7).and_then(|v| v.get_str()) {
                Some(json) => Some(
                    serde_json::from_str(json)
                        .map_err(|e| DbError::Serialization(e.to_string()))?,
                ),
                None => None,
            };
            Ok(SampleRow {
                kit,
                voice,
                slot,
                id,
                filename,
                source_path,
                is_stereo,
                wav_meta,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kit: &str, voice: u8, slot: u8, name: &str) -> SampleRow {
        SampleRow {
            kit: kit.to_string(),
            voice,
            slot,
            id: (voice as i64) * 100 + slot as i64,
            filename: name.to_string(),
            source_path: format!("/samples/{}", name),
            is_stereo: false,
            wav_meta: None,
        }
    }

    #[test]
    fn test_kit_crud() {
        let db = KitDb::in_memory().unwrap();

        let kit = KitRow::new("A0", Some("Breaks".to_string()));
        KitQuery::upsert(&db, &kit).unwrap();

        let retrieved = KitQuery::get(&db, "A0").unwrap().unwrap();
        assert_eq!(retrieved, kit);
        assert_eq!(KitQuery::count(&db).unwrap(), 1);
        assert!(KitQuery::get(&db, "B0").unwrap().is_none());
    }

    #[test]
    fn test_kit_flag_update_marks_modified() {
        let db = KitDb::in_memory().unwrap();

        let mut kit = KitRow::new("A0", None);
        kit.modified_since_sync = false;
        KitQuery::upsert(&db, &kit).unwrap();

        KitQuery::update_flag(&db, "A0", "locked", true).unwrap();
        let row = KitQuery::get(&db, "A0").unwrap().unwrap();
        assert!(row.locked);
        assert!(row.modified_since_sync);

        // clearing the sync flag writes it verbatim
        KitQuery::update_flag(&db, "A0", "modified_since_sync", false).unwrap();
        let row = KitQuery::get(&db, "A0").unwrap().unwrap();
        assert!(!row.modified_since_sync);
        assert!(row.locked);

        assert!(KitQuery::update_flag(&db, "A0", "name", true).is_err());
    }

    #[test]
    fn test_kit_step_pattern_roundtrip() {
        let db = KitDb::in_memory().unwrap();
        KitQuery::upsert(&db, &KitRow::new("C3", None)).unwrap();

        let mut pattern = crate::types::StepPattern::silent();
        pattern.0[0][0] = 127;
        pattern.0[3][15] = 64;
        KitQuery::set_step_pattern(&db, "C3", Some(&pattern)).unwrap();

        let row = KitQuery::get(&db, "C3").unwrap().unwrap();
        assert_eq!(row.step_pattern, Some(pattern));

        KitQuery::set_step_pattern(&db, "C3", None).unwrap();
        let row = KitQuery::get(&db, "C3").unwrap().unwrap();
        assert!(row.step_pattern.is_none());
    }

    #[test]
    fn test_sample_ordering() {
        let db = KitDb::in_memory().unwrap();

        SampleQuery::upsert(&db, &sample("A0", 2, 1, "hat.wav")).unwrap();
        SampleQuery::upsert(&db, &sample("A0", 1, 3, "kick.wav")).unwrap();
        SampleQuery::upsert(&db, &sample("A0", 1, 0, "snare.wav")).unwrap();

        let rows = SampleQuery::get_kit(&db, "A0").unwrap();
        let coords: Vec<(u8, u8)> = rows.iter().map(|s| (s.voice, s.slot)).collect();
        assert_eq!(coords, vec![(1, 0), (1, 3), (2, 1)]);
    }

    #[test]
    fn test_sample_wav_meta_roundtrip() {
        let db = KitDb::in_memory().unwrap();

        let mut s = sample("A0", 1, 0, "pad.wav");
        s.is_stereo = true;
        s.wav_meta = Some(WavMeta {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 24,
        });
        SampleQuery::upsert(&db, &s).unwrap();

        let row = SampleQuery::get(&db, "A0", 1, 0).unwrap().unwrap();
        assert_eq!(row, s);
    }

    #[test]
    fn test_max_slot_and_count() {
        let db = KitDb::in_memory().unwrap();
        assert_eq!(SampleQuery::max_slot(&db, "A0", 1).unwrap(), None);
        assert_eq!(SampleQuery::count_voice(&db, "A0", 1).unwrap(), 0);

        SampleQuery::upsert(&db, &sample("A0", 1, 0, "a.wav")).unwrap();
        SampleQuery::upsert(&db, &sample("A0", 1, 4, "b.wav")).unwrap();
        assert_eq!(SampleQuery::max_slot(&db, "A0", 1).unwrap(), Some(4));
        assert_eq!(SampleQuery::count_voice(&db, "A0", 1).unwrap(), 2);

        SampleQuery::delete(&db, "A0", 1, 4).unwrap();
        assert_eq!(SampleQuery::max_slot(&db, "A0", 1).unwrap(), Some(0));
    }
}
