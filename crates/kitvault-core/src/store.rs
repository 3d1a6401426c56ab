//! Slot store: transactional CRUD over kits, voices, and sample rows
//!
//! Storage-level operations with no policy beyond "what you write is what is
//! read": occupancy and range are checked, but editability, stereo pairing,
//! and contiguity belong to the layers above. Every successful mutation flips
//! the owning kit's modified-since-sync flag inside the same transaction.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::db::{BatchQuery, KitDb, KitQuery, KitRow, SampleQuery, SampleRow, SlotKey, SlotPlan, VoiceQuery, VoiceRow};
use crate::error::{KitError, KitResult};
use crate::types::{ChangeSet, StepPattern, WavMeta};
use crate::validate;

/// Payload for inserting a new sample reference
#[derive(Debug, Clone)]
pub struct NewSample {
    pub filename: String,
    pub source_path: String,
    pub is_stereo: bool,
    pub wav_meta: Option<WavMeta>,
}

/// Generate a stable sample identity from its insert coordinates and origin
pub(crate) fn mint_sample_id(kit: &str, voice: u8, slot: u8, source_path: &str) -> i64 {
    let mut hasher = DefaultHasher::new();
    kit.hash(&mut hasher);
    voice.hash(&mut hasher);
    slot.hash(&mut hasher);
    source_path.hash(&mut hasher);
    (hasher.finish() as i64).abs()
}

/// Storage operations over the kit database
pub struct SlotStore;

impl SlotStore {
    // ========================================================================
    // Kit Operations
    // ========================================================================

    /// Create a kit and its 4 voices atomically
    pub fn create_kit(db: &KitDb, name: &str, alias: Option<&str>) -> KitResult<KitRow> {
        validate::validate_kit_name(name)?;
        if KitQuery::get(db, name)?.is_some() {
            return Err(KitError::KitExists(name.to_string()));
        }

        let kit = KitRow::new(name, alias.map(|s| s.to_string()));
        BatchQuery::create_kit(db, &kit)?;
        log::info!("SlotStore::create_kit: created '{}'", name);
        Ok(kit)
    }

    /// Delete a kit with cascading delete of its voices and samples
    pub fn delete_kit(db: &KitDb, name: &str) -> KitResult<()> {
        Self::get_kit(db, name)?;
        BatchQuery::delete_kit(db, name)?;
        log::info!("SlotStore::delete_kit: deleted '{}'", name);
        Ok(())
    }

    /// Get a kit by name
    pub fn get_kit(db: &KitDb, name: &str) -> KitResult<KitRow> {
        KitQuery::get(db, name)?.ok_or_else(|| KitError::KitNotFound(name.to_string()))
    }

    /// All kits, ordered by name
    pub fn list_kits(db: &KitDb) -> KitResult<Vec<KitRow>> {
        Ok(KitQuery::get_all(db)?)
    }

    pub fn set_kit_alias(db: &KitDb, name: &str, alias: Option<&str>) -> KitResult<()> {
        Self::get_kit(db, name)?;
        KitQuery::set_alias(db, name, alias)?;
        Ok(())
    }

    pub fn set_kit_editable(db: &KitDb, name: &str, editable: bool) -> KitResult<()> {
        Self::get_kit(db, name)?;
        KitQuery::update_flag(db, name, "editable", editable)?;
        Ok(())
    }

    pub fn set_kit_locked(db: &KitDb, name: &str, locked: bool) -> KitResult<()> {
        Self::get_kit(db, name)?;
        KitQuery::update_flag(db, name, "locked", locked)?;
        Ok(())
    }

    /// Store or clear a kit's step pattern
    pub fn set_step_pattern(
        db: &KitDb,
        name: &str,
        pattern: Option<&StepPattern>,
    ) -> KitResult<()> {
        if let Some(p) = pattern {
            validate::validate_step_pattern(p)?;
        }
        Self::get_kit(db, name)?;
        KitQuery::set_step_pattern(db, name, pattern)?;
        Ok(())
    }

    /// Clear a kit's modified-since-sync flag after a completed device sync
    pub fn mark_kit_synced(db: &KitDb, name: &str) -> KitResult<()> {
        Self::get_kit(db, name)?;
        KitQuery::update_flag(db, name, "modified_since_sync", false)?;
        log::debug!("SlotStore::mark_kit_synced: '{}'", name);
        Ok(())
    }

    // ========================================================================
    // Voice Operations
    // ========================================================================

    /// The 4 voices of a kit
    pub fn voices(db: &KitDb, kit: &str) -> KitResult<Vec<VoiceRow>> {
        Self::get_kit(db, kit)?;
        Ok(VoiceQuery::get_for_kit(db, kit)?)
    }

    pub fn set_voice_alias(
        db: &KitDb,
        kit: &str,
        voice: u8,
        alias: Option<&str>,
    ) -> KitResult<()> {
        validate::validate_voice(voice)?;
        Self::get_kit(db, kit)?;
        BatchQuery::set_voice_alias(db, kit, voice, alias)?;
        Ok(())
    }

    // ========================================================================
    // Sample Operations
    // ========================================================================

    /// Insert a sample at an unoccupied (voice, slot)
    pub fn add_sample(
        db: &KitDb,
        kit: &str,
        voice: u8,
        slot: u8,
        data: NewSample,
    ) -> KitResult<SampleRow> {
        validate::validate_voice_and_slot(voice, slot)?;
        Self::get_kit(db, kit)?;
        if SampleQuery::get(db, kit, voice, slot)?.is_some() {
            return Err(validate::ValidationError::SlotOccupied { voice, slot }.into());
        }

        let row = SampleRow {
            kit: kit.to_string(),
            voice,
            slot,
            id: mint_sample_id(kit, voice, slot, &data.source_path),
            filename: data.filename,
            source_path: data.source_path,
            is_stereo: data.is_stereo,
            wav_meta: data.wav_meta,
        };

        let mut plan = SlotPlan::new();
        plan.writes.push(row.clone());
        plan.touch_kit(kit);
        BatchQuery::apply_slot_plan(db, &plan)?;

        log::info!(
            "SlotStore::add_sample: '{}' voice {} slot {} <- {}",
            kit,
            voice,
            slot,
            row.filename
        );
        Ok(row)
    }

    /// Overwrite an occupied slot, returning the new and previous rows
    pub fn replace_sample(
        db: &KitDb,
        kit: &str,
        voice: u8,
        slot: u8,
        data: NewSample,
    ) -> KitResult<(SampleRow, SampleRow)> {
        validate::validate_voice_and_slot(voice, slot)?;
        Self::get_kit(db, kit)?;
        let old = SampleQuery::get(db, kit, voice, slot)?.ok_or_else(|| {
            KitError::SampleNotFound {
                kit: kit.to_string(),
                voice,
                slot,
            }
        })?;

        let row = SampleRow {
            kit: kit.to_string(),
            voice,
            slot,
            id: mint_sample_id(kit, voice, slot, &data.source_path),
            filename: data.filename,
            source_path: data.source_path,
            is_stereo: data.is_stereo,
            wav_meta: data.wav_meta,
        };

        Self::put_sample_row(db, &row)?;

        log::info!(
            "SlotStore::replace_sample: '{}' voice {} slot {}: {} -> {}",
            kit,
            voice,
            slot,
            old.filename,
            row.filename
        );
        Ok((row, old))
    }

    /// Write a sample row verbatim (upsert) and dirty its kit
    ///
    /// Used by replay paths that re-materialize previously captured rows.
    pub fn put_sample_row(db: &KitDb, row: &SampleRow) -> KitResult<()> {
        let mut plan = SlotPlan::new();
        plan.writes.push(row.clone());
        plan.touch_kit(&row.kit);
        BatchQuery::apply_slot_plan(db, &plan)?;
        Ok(())
    }

    /// Remove the sample at (voice, slot)
    ///
    /// With `reindex`, every sample above the removed slot is shifted down by
    /// one in the same transaction, keeping the voice gapless. Without it the
    /// gap is left in place; only the undo coordinator uses that mode, right
    /// before it overwrites the voice from a snapshot.
    pub fn delete_sample(
        db: &KitDb,
        kit: &str,
        voice: u8,
        slot: u8,
        reindex: bool,
    ) -> KitResult<(SampleRow, ChangeSet)> {
        validate::validate_voice_and_slot(voice, slot)?;
        let rows = SampleQuery::get_voice(db, kit, voice)?;
        let target = rows
            .iter()
            .find(|r| r.slot == slot)
            .cloned()
            .ok_or_else(|| KitError::SampleNotFound {
                kit: kit.to_string(),
                voice,
                slot,
            })?;

        let mut plan = SlotPlan::new();
        let mut changes = ChangeSet::new();
        plan.removals.push(SlotKey::new(kit, voice, slot));
        changes.push(kit, voice, slot);

        if reindex {
            for row in rows.iter().filter(|r| r.slot > slot) {
                plan.removals.push(SlotKey::new(kit, voice, row.slot));
                let mut shifted = row.clone();
                shifted.slot -= 1;
                changes.push(kit, voice, row.slot);
                changes.push(kit, voice, shifted.slot);
                plan.writes.push(shifted);
            }
        }
        plan.touch_kit(kit);
        BatchQuery::apply_slot_plan(db, &plan)?;

        log::info!(
            "SlotStore::delete_sample: '{}' voice {} slot {} (reindex={})",
            kit,
            voice,
            slot,
            reindex
        );
        Ok((target, changes))
    }

    /// The sample at (voice, slot), if any
    pub fn get_sample(
        db: &KitDb,
        kit: &str,
        voice: u8,
        slot: u8,
    ) -> KitResult<Option<SampleRow>> {
        Ok(SampleQuery::get(db, kit, voice, slot)?)
    }

    /// Every sample of a kit, sorted by (voice, slot)
    pub fn get_kit_samples(db: &KitDb, kit: &str) -> KitResult<Vec<SampleRow>> {
        Ok(SampleQuery::get_kit(db, kit)?)
    }

    /// Every sample of one voice, sorted by slot
    pub fn get_voice_samples(db: &KitDb, kit: &str, voice: u8) -> KitResult<Vec<SampleRow>> {
        Ok(SampleQuery::get_voice(db, kit, voice)?)
    }

    /// Every sample in the database, sorted by (kit, voice, slot)
    pub fn get_all_samples(db: &KitDb) -> KitResult<Vec<SampleRow>> {
        Ok(SampleQuery::get_all(db)?)
    }
}
