//! Move/reindex engine
//!
//! Relocates one sample to a new (voice, slot) while preserving per-voice
//! contiguity and the 12-slot ceiling. Every move is planned over an
//! in-memory read of the affected voices and applied in a single
//! transaction, so a failure on either half of a cross-voice move rolls back
//! the whole thing. Only insert (shift-to-make-room) semantics exist here;
//! a target slot past the end of a voice clamps to the append position, the
//! way a list splice would.

use crate::db::{BatchQuery, KitDb, SampleQuery, SampleRow, SlotKey, SlotPlan};
use crate::error::{KitError, KitResult};
use crate::store::SlotStore;
use crate::types::{ChangeSet, NUM_SLOTS, NUM_VOICES};
use crate::validate::{self, ValidationError};

/// The move/reindex engine
pub struct MoveEngine;

impl MoveEngine {
    /// Move a sample within one kit, shifting neighbours to keep both voices
    /// gapless
    pub fn move_sample(
        db: &KitDb,
        kit: &str,
        from_voice: u8,
        from_slot: u8,
        to_voice: u8,
        to_slot: u8,
    ) -> KitResult<ChangeSet> {
        validate::validate_voice_and_slot(from_voice, from_slot)?;
        validate::validate_voice_and_slot(to_voice, to_slot)?;

        let moved = SampleQuery::get(db, kit, from_voice, from_slot)?.ok_or_else(|| {
            KitError::SampleNotFound {
                kit: kit.to_string(),
                voice: from_voice,
                slot: from_slot,
            }
        })?;

        let changes = if from_voice == to_voice {
            let rows = SampleQuery::get_voice(db, kit, from_voice)?;
            let max_slot = rows.iter().map(|r| r.slot).max().unwrap_or(0);
            let to_slot = to_slot.min(max_slot);
            if from_slot == to_slot {
                return Ok(ChangeSet::new());
            }
            Self::check_stereo_placement(db, &moved, kit, to_voice, to_slot)?;
            let (plan, changes) = plan_same_voice(kit, from_voice, &rows, from_slot, to_slot);
            BatchQuery::apply_slot_plan(db, &plan)?;
            changes
        } else {
            Self::relocate(db, &moved, kit, to_voice, to_slot)?
        };

        log::info!(
            "MoveEngine::move_sample: '{}' {}:{} -> {}:{} ({} rows changed)",
            kit,
            from_voice,
            from_slot,
            to_voice,
            to_slot,
            changes.len()
        );
        Ok(changes)
    }

    /// Move a sample into a different kit; both kits are marked modified
    pub fn move_sample_between_kits(
        db: &KitDb,
        from_kit: &str,
        from_voice: u8,
        from_slot: u8,
        to_kit: &str,
        to_voice: u8,
        to_slot: u8,
    ) -> KitResult<ChangeSet> {
        if from_kit == to_kit {
            return Self::move_sample(db, from_kit, from_voice, from_slot, to_voice, to_slot);
        }

        validate::validate_voice_and_slot(from_voice, from_slot)?;
        validate::validate_voice_and_slot(to_voice, to_slot)?;
        SlotStore::get_kit(db, from_kit)?;
        SlotStore::get_kit(db, to_kit)?;

        let moved = SampleQuery::get(db, from_kit, from_voice, from_slot)?.ok_or_else(|| {
            KitError::SampleNotFound {
                kit: from_kit.to_string(),
                voice: from_voice,
                slot: from_slot,
            }
        })?;

        let changes = Self::relocate(db, &moved, to_kit, to_voice, to_slot)?;
        log::info!(
            "MoveEngine::move_sample_between_kits: {}:{}:{} -> {}:{}:{}",
            from_kit,
            from_voice,
            from_slot,
            to_kit,
            to_voice,
            to_slot
        );
        Ok(changes)
    }

    /// Close every gap in a voice, shifting samples down to the lowest free
    /// slots; returns an empty change set when the voice is already gapless
    pub fn compact_voice(db: &KitDb, kit: &str, voice: u8) -> KitResult<ChangeSet> {
        validate::validate_voice(voice)?;
        let rows = SampleQuery::get_voice(db, kit, voice)?;

        let mut plan = SlotPlan::new();
        let mut changes = ChangeSet::new();
        for (idx, row) in rows.iter().enumerate() {
            let new_slot = idx as u8;
            if row.slot != new_slot {
                plan.removals.push(SlotKey::new(kit, voice, row.slot));
                let mut shifted = row.clone();
                shifted.slot = new_slot;
                changes.push(kit, voice, row.slot);
                changes.push(kit, voice, new_slot);
                plan.writes.push(shifted);
            }
        }
        if plan.is_empty() {
            return Ok(changes);
        }
        plan.touch_kit(kit);
        BatchQuery::apply_slot_plan(db, &plan)?;

        log::info!(
            "MoveEngine::compact_voice: '{}' voice {} ({} rows changed)",
            kit,
            voice,
            changes.len()
        );
        Ok(changes)
    }

    /// Insert a row at its recorded slot, shifting occupants at or above it
    /// up by one
    ///
    /// This is the inverse of a reindexing delete; the undo coordinator uses
    /// it to put a removed sample back where it was.
    pub fn insert_with_shift(db: &KitDb, row: SampleRow) -> KitResult<ChangeSet> {
        validate::validate_voice_and_slot(row.voice, row.slot)?;
        let rows = SampleQuery::get_voice(db, &row.kit, row.voice)?;

        let mut plan = SlotPlan::new();
        let mut changes = ChangeSet::new();
        for r in rows.iter().filter(|r| r.slot >= row.slot) {
            if r.slot + 1 >= NUM_SLOTS {
                return Err(ValidationError::SlotOutOfRange(r.slot + 1).into());
            }
            plan.removals.push(SlotKey::new(&row.kit, row.voice, r.slot));
            let mut shifted = r.clone();
            shifted.slot += 1;
            changes.push(&row.kit, row.voice, r.slot);
            changes.push(&row.kit, row.voice, shifted.slot);
            plan.writes.push(shifted);
        }
        changes.push(&row.kit, row.voice, row.slot);
        plan.touch_kit(&row.kit);
        plan.writes.push(row);
        BatchQuery::apply_slot_plan(db, &plan)?;
        Ok(changes)
    }

    /// Stereo pairing rules for placing a sample at (voice, slot) of
    /// `dest_kit`
    ///
    /// `exclude` names the row being relocated, if any, so its current
    /// position does not count as occupancy. Shared by the move paths and
    /// the add path.
    pub fn check_placement(
        db: &KitDb,
        dest_kit: &str,
        to_voice: u8,
        to_slot: u8,
        is_stereo: bool,
        exclude: Option<(&str, u8, u8)>,
    ) -> KitResult<()> {
        let excluded = |voice: u8, slot: u8| {
            exclude.is_some_and(|(k, v, s)| k == dest_kit && v == voice && s == slot)
        };

        let paired: Vec<u8> = if is_stereo && to_voice < NUM_VOICES {
            SampleQuery::get_voice(db, dest_kit, to_voice + 1)?
                .iter()
                .filter(|r| !excluded(to_voice + 1, r.slot))
                .map(|r| r.slot)
                .collect()
        } else {
            Vec::new()
        };
        validate::validate_stereo_move(is_stereo, to_voice, to_slot, &paired)?;

        // The destination slot must not be claimed by a stereo sample one
        // voice below, either
        if to_voice >= 2 {
            let prev_stereo: Vec<u8> = SampleQuery::get_voice(db, dest_kit, to_voice - 1)?
                .iter()
                .filter(|r| r.is_stereo)
                .filter(|r| !excluded(to_voice - 1, r.slot))
                .map(|r| r.slot)
                .collect();
            validate::check_pair_claimed(to_voice, to_slot, &prev_stereo)?;
        }

        Ok(())
    }

    /// Placement check for a row being relocated
    fn check_stereo_placement(
        db: &KitDb,
        moved: &SampleRow,
        dest_kit: &str,
        to_voice: u8,
        to_slot: u8,
    ) -> KitResult<()> {
        Self::check_placement(
            db,
            dest_kit,
            to_voice,
            to_slot,
            moved.is_stereo,
            Some((moved.kit.as_str(), moved.voice, moved.slot)),
        )
    }

    /// Remove the moved row from its source voice (compacting above it) and
    /// splice it into the destination voice, in one transaction
    ///
    /// The stereo rules are checked against the effective (clamped) target
    /// slot, before any write.
    fn relocate(
        db: &KitDb,
        moved: &SampleRow,
        to_kit: &str,
        to_voice: u8,
        to_slot: u8,
    ) -> KitResult<ChangeSet> {
        let src_rows = SampleQuery::get_voice(db, &moved.kit, moved.voice)?;
        let dest_rows = SampleQuery::get_voice(db, to_kit, to_voice)?;
        if dest_rows.len() >= NUM_SLOTS as usize {
            return Err(ValidationError::SlotOutOfRange(NUM_SLOTS).into());
        }
        let to_slot = to_slot.min(dest_rows.len() as u8);
        Self::check_stereo_placement(db, moved, to_kit, to_voice, to_slot)?;

        let mut plan = SlotPlan::new();
        let mut changes = ChangeSet::new();

        // source voice: remove, then compact everything above
        plan.removals
            .push(SlotKey::new(&moved.kit, moved.voice, moved.slot));
        changes.push(&moved.kit, moved.voice, moved.slot);
        for r in src_rows.iter().filter(|r| r.slot > moved.slot) {
            plan.removals.push(SlotKey::new(&moved.kit, moved.voice, r.slot));
            let mut shifted = r.clone();
            shifted.slot -= 1;
            changes.push(&moved.kit, moved.voice, r.slot);
            changes.push(&moved.kit, moved.voice, shifted.slot);
            plan.writes.push(shifted);
        }

        // destination voice: make room at or above the target slot
        for r in dest_rows.iter().filter(|r| r.slot >= to_slot) {
            if r.slot + 1 >= NUM_SLOTS {
                return Err(ValidationError::SlotOutOfRange(r.slot + 1).into());
            }
            plan.removals.push(SlotKey::new(to_kit, to_voice, r.slot));
            let mut shifted = r.clone();
            shifted.slot += 1;
            changes.push(to_kit, to_voice, r.slot);
            changes.push(to_kit, to_voice, shifted.slot);
            plan.writes.push(shifted);
        }

        let mut new_row = moved.clone();
        new_row.kit = to_kit.to_string();
        new_row.voice = to_voice;
        new_row.slot = to_slot;
        changes.push(to_kit, to_voice, to_slot);
        plan.writes.push(new_row);

        plan.touch_kit(&moved.kit);
        plan.touch_kit(to_kit);
        BatchQuery::apply_slot_plan(db, &plan)?;
        Ok(changes)
    }
}

/// Plan a same-voice move from `from` to `to` as bounded slot shifts
///
/// Backward moves shift [to, from) up by one; forward moves shift (from, to]
/// down by one; the moved row lands at `to`. Never touches more than
/// |to - from| + 1 rows.
fn plan_same_voice(
    kit: &str,
    voice: u8,
    rows: &[SampleRow],
    from: u8,
    to: u8,
) -> (SlotPlan, ChangeSet) {
    let max_slot = rows.iter().map(|r| r.slot).max().unwrap_or(0);
    let to = to.min(max_slot);

    let mut plan = SlotPlan::new();
    let mut changes = ChangeSet::new();
    if to == from {
        return (plan, changes);
    }

    let target = rows.iter().find(|r| r.slot == from).cloned();
    let Some(target) = target else {
        return (plan, changes);
    };

    if to < from {
        for r in rows.iter().filter(|r| r.slot >= to && r.slot < from) {
            plan.removals.push(SlotKey::new(kit, voice, r.slot));
            let mut shifted = r.clone();
            shifted.slot += 1;
            changes.push(kit, voice, r.slot);
            changes.push(kit, voice, shifted.slot);
            plan.writes.push(shifted);
        }
    } else {
        for r in rows.iter().filter(|r| r.slot > from && r.slot <= to) {
            plan.removals.push(SlotKey::new(kit, voice, r.slot));
            let mut shifted = r.clone();
            shifted.slot -= 1;
            changes.push(kit, voice, r.slot);
            changes.push(kit, voice, shifted.slot);
            plan.writes.push(shifted);
        }
    }

    plan.removals.push(SlotKey::new(kit, voice, from));
    let mut moved = target;
    moved.slot = to;
    changes.push(kit, voice, from);
    changes.push(kit, voice, to);
    plan.writes.push(moved);
    plan.touch_kit(kit);

    (plan, changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{NewSample, SlotStore};
    use crate::validate::ValidationError;

    fn new_sample(name: &str) -> NewSample {
        NewSample {
            filename: name.to_string(),
            source_path: format!("/samples/{}", name),
            is_stereo: false,
            wav_meta: None,
        }
    }

    fn stereo_sample(name: &str) -> NewSample {
        NewSample {
            is_stereo: true,
            ..new_sample(name)
        }
    }

    fn db_with_kit(name: &str) -> KitDb {
        let db = KitDb::in_memory().unwrap();
        SlotStore::create_kit(&db, name, None).unwrap();
        db
    }

    fn fill_voice(db: &KitDb, kit: &str, voice: u8, names: &[&str]) {
        for (slot, name) in names.iter().enumerate() {
            SlotStore::add_sample(db, kit, voice, slot as u8, new_sample(name)).unwrap();
        }
    }

    fn voice_names(db: &KitDb, kit: &str, voice: u8) -> Vec<String> {
        SlotStore::get_voice_samples(db, kit, voice)
            .unwrap()
            .iter()
            .map(|r| r.filename.clone())
            .collect()
    }

    fn voice_slots(db: &KitDb, kit: &str, voice: u8) -> Vec<u8> {
        SlotStore::get_voice_samples(db, kit, voice)
            .unwrap()
            .iter()
            .map(|r| r.slot)
            .collect()
    }

    #[test]
    fn test_same_voice_backward_move() {
        // S1..S6 at slots 0-5, move slot 5 to slot 3
        let db = db_with_kit("A0");
        fill_voice(&db, "A0", 1, &["s1", "s2", "s3", "s4", "s5", "s6"]);

        let changes = MoveEngine::move_sample(&db, "A0", 1, 5, 1, 3).unwrap();

        assert_eq!(voice_names(&db, "A0", 1), vec!["s1", "s2", "s3", "s6", "s4", "s5"]);
        assert_eq!(voice_slots(&db, "A0", 1), vec![0, 1, 2, 3, 4, 5]);
        // slots 3..=5 changed, 0..=2 did not
        assert!(changes.contains("A0", 1, 3));
        assert!(changes.contains("A0", 1, 4));
        assert!(changes.contains("A0", 1, 5));
        assert!(!changes.contains("A0", 1, 2));
    }

    #[test]
    fn test_same_voice_forward_move() {
        // move S2 from slot 1 to slot 4
        let db = db_with_kit("A0");
        fill_voice(&db, "A0", 1, &["s1", "s2", "s3", "s4", "s5", "s6"]);

        MoveEngine::move_sample(&db, "A0", 1, 1, 1, 4).unwrap();

        assert_eq!(voice_names(&db, "A0", 1), vec!["s1", "s3", "s4", "s5", "s2", "s6"]);
        assert_eq!(voice_slots(&db, "A0", 1), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_cross_voice_move_compacts_and_splices() {
        // voice 1 has 6 samples, voice 2 has 1; move (1,3) to (2,0)
        let db = db_with_kit("A0");
        fill_voice(&db, "A0", 1, &["s1", "s2", "s3", "s4", "s5", "s6"]);
        fill_voice(&db, "A0", 2, &["t1"]);

        let changes = MoveEngine::move_sample(&db, "A0", 1, 3, 2, 0).unwrap();

        assert_eq!(voice_names(&db, "A0", 1), vec!["s1", "s2", "s3", "s5", "s6"]);
        assert_eq!(voice_slots(&db, "A0", 1), vec![0, 1, 2, 3, 4]);
        assert_eq!(voice_names(&db, "A0", 2), vec!["s4", "t1"]);
        assert_eq!(voice_slots(&db, "A0", 2), vec![0, 1]);
        assert!(changes.contains("A0", 2, 0));
        assert!(changes.contains("A0", 2, 1));
    }

    #[test]
    fn test_move_to_same_place_is_noop() {
        let db = db_with_kit("A0");
        fill_voice(&db, "A0", 1, &["s1", "s2"]);
        let changes = MoveEngine::move_sample(&db, "A0", 1, 1, 1, 1).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_target_past_end_clamps_to_append() {
        let db = db_with_kit("A0");
        fill_voice(&db, "A0", 1, &["s1", "s2", "s3"]);

        MoveEngine::move_sample(&db, "A0", 1, 0, 1, 9).unwrap();
        assert_eq!(voice_names(&db, "A0", 1), vec!["s2", "s3", "s1"]);
        assert_eq!(voice_slots(&db, "A0", 1), vec![0, 1, 2]);
    }

    #[test]
    fn test_stereo_sample_cannot_move_to_voice_4() {
        let db = db_with_kit("A0");
        SlotStore::add_sample(&db, "A0", 1, 0, stereo_sample("pad.wav")).unwrap();
        let before = SlotStore::get_kit_samples(&db, "A0").unwrap();

        let err = MoveEngine::move_sample(&db, "A0", 1, 0, 4, 0).unwrap_err();
        assert!(matches!(
            err,
            KitError::Validation(ValidationError::VoiceHasNoPair(4))
        ));
        // store left unmodified
        assert_eq!(SlotStore::get_kit_samples(&db, "A0").unwrap(), before);
    }

    #[test]
    fn test_stereo_conflict_with_paired_voice() {
        let db = db_with_kit("A0");
        SlotStore::add_sample(&db, "A0", 1, 0, stereo_sample("pad.wav")).unwrap();
        SlotStore::add_sample(&db, "A0", 3, 0, new_sample("hat.wav")).unwrap();

        let err = MoveEngine::move_sample(&db, "A0", 1, 0, 2, 0).unwrap_err();
        assert!(matches!(
            err,
            KitError::Validation(ValidationError::StereoSlotConflict { voice: 2, slot: 0 })
        ));

        // a free paired slot is fine
        SlotStore::add_sample(&db, "A0", 2, 0, new_sample("clap.wav")).unwrap();
        MoveEngine::move_sample(&db, "A0", 1, 0, 2, 1).unwrap();
        assert_eq!(voice_names(&db, "A0", 2), vec!["clap.wav", "pad.wav"]);
        assert_eq!(voice_slots(&db, "A0", 2), vec![0, 1]);
    }

    #[test]
    fn test_mono_move_onto_pair_claimed_slot_fails() {
        let db = db_with_kit("A0");
        SlotStore::add_sample(&db, "A0", 1, 0, stereo_sample("pad.wav")).unwrap();
        SlotStore::add_sample(&db, "A0", 3, 0, new_sample("hat.wav")).unwrap();

        // voice 2 slot 0 is claimed by the stereo pad on voice 1
        let err = MoveEngine::move_sample(&db, "A0", 3, 0, 2, 0).unwrap_err();
        assert!(matches!(
            err,
            KitError::Validation(ValidationError::StereoSlotConflict { voice: 2, slot: 0 })
        ));
    }

    #[test]
    fn test_destination_full_fails() {
        let db = db_with_kit("A0");
        let names: Vec<String> = (0..12).map(|i| format!("d{}.wav", i)).collect();
        let refs: Vec<&str> = names.iter().map(|s| s.as_str()).collect();
        fill_voice(&db, "A0", 2, &refs);
        SlotStore::add_sample(&db, "A0", 1, 0, new_sample("x.wav")).unwrap();

        let err = MoveEngine::move_sample(&db, "A0", 1, 0, 2, 0).unwrap_err();
        assert!(matches!(
            err,
            KitError::Validation(ValidationError::SlotOutOfRange(12))
        ));
    }

    #[test]
    fn test_cross_kit_move_dirties_both_kits() {
        let db = db_with_kit("A0");
        SlotStore::create_kit(&db, "B1", None).unwrap();
        fill_voice(&db, "A0", 1, &["s1", "s2"]);
        SlotStore::mark_kit_synced(&db, "A0").unwrap();
        SlotStore::mark_kit_synced(&db, "B1").unwrap();

        let changes =
            MoveEngine::move_sample_between_kits(&db, "A0", 1, 0, "B1", 3, 0).unwrap();

        assert_eq!(voice_names(&db, "A0", 1), vec!["s2"]);
        assert_eq!(voice_names(&db, "B1", 3), vec!["s1"]);
        assert_eq!(changes.kits().len(), 2);
        assert!(SlotStore::get_kit(&db, "A0").unwrap().modified_since_sync);
        assert!(SlotStore::get_kit(&db, "B1").unwrap().modified_since_sync);
    }

    #[test]
    fn test_compact_voice_closes_gaps() {
        let db = db_with_kit("A0");
        SlotStore::add_sample(&db, "A0", 1, 2, new_sample("a.wav")).unwrap();
        SlotStore::add_sample(&db, "A0", 1, 5, new_sample("b.wav")).unwrap();
        SlotStore::add_sample(&db, "A0", 1, 9, new_sample("c.wav")).unwrap();

        let changes = MoveEngine::compact_voice(&db, "A0", 1).unwrap();
        assert_eq!(voice_slots(&db, "A0", 1), vec![0, 1, 2]);
        assert_eq!(voice_names(&db, "A0", 1), vec!["a.wav", "b.wav", "c.wav"]);
        assert!(!changes.is_empty());

        // already gapless: no-op
        let changes = MoveEngine::compact_voice(&db, "A0", 1).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_insert_with_shift_restores_room() {
        let db = db_with_kit("A0");
        fill_voice(&db, "A0", 1, &["a.wav", "b.wav", "c.wav"]);
        let (removed, _) = SlotStore::delete_sample(&db, "A0", 1, 1, true).unwrap();
        assert_eq!(voice_names(&db, "A0", 1), vec!["a.wav", "c.wav"]);

        MoveEngine::insert_with_shift(&db, removed).unwrap();
        assert_eq!(voice_names(&db, "A0", 1), vec!["a.wav", "b.wav", "c.wav"]);
        assert_eq!(voice_slots(&db, "A0", 1), vec![0, 1, 2]);
    }
}
