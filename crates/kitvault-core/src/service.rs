//! High-level kit service
//!
//! The statically typed operation contract consumed by the surrounding
//! application: one method per operation, each returning an explicit result.
//! The service owns the database handle and the edit session of the
//! currently open kit, enforces editability before any write, captures
//! snapshots before reindexing mutations, and records undo actions for them.
//!
//! Mutations take `&mut self`, so one service value is one writer.

use std::path::Path;

use crate::config::DB_FILENAME;
use crate::db::{BatchQuery, KitDb, KitRow, SampleRow, VoiceRow};
use crate::error::{KitError, KitResult};
use crate::moves::MoveEngine;
use crate::store::{NewSample, SlotStore};
use crate::types::{ChangeSet, StepPattern};
use crate::undo::{EditSession, StateSnapshot, UndoAction};
use crate::validate;

/// Options for adding a sample
#[derive(Debug, Clone, Default)]
pub struct AddSampleOptions {
    /// Overwrite an occupied slot instead of failing
    pub replace: bool,
    /// Override the stereo flag derived from the file's channel count
    pub force_stereo: Option<bool>,
}

/// One entry of a bulk kit plan commit
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub voice: u8,
    pub slot: u8,
    pub sample: NewSample,
}

/// Kit management service
pub struct KitService {
    db: KitDb,
    session: Option<EditSession>,
}

impl KitService {
    /// Open the service over a library directory
    ///
    /// The database file is created at `library_root/kitvault.db`.
    pub fn open(library_root: impl AsRef<Path>) -> KitResult<Self> {
        let library_root = library_root.as_ref();
        std::fs::create_dir_all(library_root).map_err(|e| {
            KitError::Storage(crate::db::DbError::Open(format!(
                "Failed to create library directory: {}",
                e
            )))
        })?;

        let db_path = library_root.join(DB_FILENAME);
        log::info!("Opening kit database at {:?}", db_path);
        let db = KitDb::open(&db_path)?;

        Ok(Self { db, session: None })
    }

    /// Create an in-memory service (for testing)
    pub fn in_memory() -> KitResult<Self> {
        Ok(Self {
            db: KitDb::in_memory()?,
            session: None,
        })
    }

    /// Get the underlying database for advanced queries
    ///
    /// Use this sparingly - prefer the domain methods.
    pub fn db(&self) -> &KitDb {
        &self.db
    }

    // ========================================================================
    // Kit Operations
    // ========================================================================

    /// Create a kit with its 4 voices
    pub fn create_kit(&mut self, name: &str, alias: Option<&str>) -> KitResult<KitRow> {
        SlotStore::create_kit(&self.db, name, alias)
    }

    /// Delete a kit and everything in it; closes the session if it was open
    pub fn delete_kit(&mut self, name: &str) -> KitResult<()> {
        SlotStore::delete_kit(&self.db, name)?;
        if self.session.as_ref().is_some_and(|s| s.kit() == name) {
            self.session = None;
        }
        Ok(())
    }

    pub fn get_kit(&self, name: &str) -> KitResult<KitRow> {
        SlotStore::get_kit(&self.db, name)
    }

    pub fn list_kits(&self) -> KitResult<Vec<KitRow>> {
        SlotStore::list_kits(&self.db)
    }

    /// Open a kit for editing, constructing a fresh session
    ///
    /// The undo and redo stacks belong to the session, so switching kits
    /// discards them.
    pub fn open_kit(&mut self, name: &str) -> KitResult<KitRow> {
        let kit = SlotStore::get_kit(&self.db, name)?;
        log::info!("KitService::open_kit: '{}'", name);
        self.session = Some(EditSession::new(name));
        Ok(kit)
    }

    /// The currently open kit, if any
    pub fn open_kit_name(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.kit())
    }

    pub fn close_kit(&mut self) {
        self.session = None;
    }

    pub fn set_kit_alias(&mut self, name: &str, alias: Option<&str>) -> KitResult<()> {
        SlotStore::set_kit_alias(&self.db, name, alias)
    }

    pub fn set_kit_editable(&mut self, name: &str, editable: bool) -> KitResult<()> {
        SlotStore::set_kit_editable(&self.db, name, editable)
    }

    pub fn set_kit_locked(&mut self, name: &str, locked: bool) -> KitResult<()> {
        SlotStore::set_kit_locked(&self.db, name, locked)
    }

    pub fn set_step_pattern(
        &mut self,
        name: &str,
        pattern: Option<&StepPattern>,
    ) -> KitResult<()> {
        self.guard_editable(name)?;
        SlotStore::set_step_pattern(&self.db, name, pattern)
    }

    /// Clear a kit's modified-since-sync flag after a completed device sync
    pub fn mark_kit_synced(&mut self, name: &str) -> KitResult<()> {
        SlotStore::mark_kit_synced(&self.db, name)
    }

    // ========================================================================
    // Voice Operations
    // ========================================================================

    pub fn voices(&self, kit: &str) -> KitResult<Vec<VoiceRow>> {
        SlotStore::voices(&self.db, kit)
    }

    pub fn set_voice_alias(
        &mut self,
        kit: &str,
        voice: u8,
        alias: Option<&str>,
    ) -> KitResult<()> {
        self.guard_editable(kit)?;
        SlotStore::set_voice_alias(&self.db, kit, voice, alias)
    }

    // ========================================================================
    // Sample Operations
    // ========================================================================

    /// Add a sample file reference at (voice, slot)
    ///
    /// The file is verified (existence, extension, WAV magic) and its header
    /// format captured; the stereo flag follows the channel count unless
    /// overridden. With `replace` set, an occupied slot is overwritten and
    /// the previous sample becomes the undo payload.
    pub fn add_sample(
        &mut self,
        kit: &str,
        voice: u8,
        slot: u8,
        file_path: &Path,
        options: AddSampleOptions,
    ) -> KitResult<SampleRow> {
        self.guard_editable(kit)?;
        validate::validate_voice_and_slot(voice, slot)?;

        let wav_meta = validate::validate_sample_file(file_path)?;
        let is_stereo = options
            .force_stereo
            .unwrap_or_else(|| wav_meta.map(|m| m.is_stereo()).unwrap_or(false));
        MoveEngine::check_placement(&self.db, kit, voice, slot, is_stereo, None)?;

        let filename = file_path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.display().to_string());
        let data = NewSample {
            filename,
            source_path: file_path.display().to_string(),
            is_stereo,
            wav_meta,
        };

        let occupied = SlotStore::get_sample(&self.db, kit, voice, slot)?.is_some();
        if occupied && options.replace {
            let (new, old) = SlotStore::replace_sample(&self.db, kit, voice, slot, data)?;
            self.record_action(UndoAction::ReplaceSample {
                old,
                new: new.clone(),
            });
            Ok(new)
        } else {
            let row = SlotStore::add_sample(&self.db, kit, voice, slot, data)?;
            self.record_action(UndoAction::AddSample {
                sample: row.clone(),
            });
            Ok(row)
        }
    }

    /// Delete the sample at (voice, slot), reindexing the voice
    pub fn delete_sample(&mut self, kit: &str, voice: u8, slot: u8) -> KitResult<ChangeSet> {
        self.guard_editable(kit)?;
        let (deleted, changes) = SlotStore::delete_sample(&self.db, kit, voice, slot, true)?;
        self.record_action(UndoAction::DeleteSample { sample: deleted });
        Ok(changes)
    }

    /// Move a sample within one kit
    pub fn move_sample(
        &mut self,
        kit: &str,
        from_voice: u8,
        from_slot: u8,
        to_voice: u8,
        to_slot: u8,
    ) -> KitResult<ChangeSet> {
        self.guard_editable(kit)?;

        let snapshot = StateSnapshot::capture(
            &self.db,
            &[(kit.to_string(), from_voice), (kit.to_string(), to_voice)],
        )?;
        let changes =
            MoveEngine::move_sample(&self.db, kit, from_voice, from_slot, to_voice, to_slot)?;
        if !changes.is_empty() {
            self.record_action(UndoAction::MoveSample {
                kit: kit.to_string(),
                from_voice,
                from_slot,
                to_voice,
                to_slot,
                snapshot,
            });
        }
        Ok(changes)
    }

    /// Move a sample into a different kit; both kits are marked modified
    pub fn move_sample_between_kits(
        &mut self,
        from_kit: &str,
        from_voice: u8,
        from_slot: u8,
        to_kit: &str,
        to_voice: u8,
        to_slot: u8,
    ) -> KitResult<ChangeSet> {
        if from_kit == to_kit {
            return self.move_sample(from_kit, from_voice, from_slot, to_voice, to_slot);
        }
        self.guard_editable(from_kit)?;
        self.guard_editable(to_kit)?;

        let snapshot = StateSnapshot::capture(
            &self.db,
            &[
                (from_kit.to_string(), from_voice),
                (to_kit.to_string(), to_voice),
            ],
        )?;
        let changes = MoveEngine::move_sample_between_kits(
            &self.db, from_kit, from_voice, from_slot, to_kit, to_voice, to_slot,
        )?;
        if !changes.is_empty() {
            self.record_action(UndoAction::MoveSampleBetweenKits {
                from_kit: from_kit.to_string(),
                from_voice,
                from_slot,
                to_kit: to_kit.to_string(),
                to_voice,
                to_slot,
                snapshot,
            });
        }
        Ok(changes)
    }

    /// Close every gap in a voice
    pub fn compact_slots(&mut self, kit: &str, voice: u8) -> KitResult<ChangeSet> {
        self.guard_editable(kit)?;

        let snapshot = StateSnapshot::capture(&self.db, &[(kit.to_string(), voice)])?;
        let changes = MoveEngine::compact_voice(&self.db, kit, voice)?;
        if !changes.is_empty() {
            self.record_action(UndoAction::CompactSlots {
                kit: kit.to_string(),
                voice,
                snapshot,
            });
        }
        Ok(changes)
    }

    /// Commit a planned kit layout wholesale, replacing every sample row of
    /// the kit in one transaction
    ///
    /// Duplicate (voice, slot) targets resolve last-write-wins. A bulk
    /// rewrite invalidates any recorded history for the kit, so its session
    /// restarts fresh.
    pub fn commit_kit_plan(&mut self, kit: &str, entries: &[PlanEntry]) -> KitResult<()> {
        self.guard_editable(kit)?;

        let mut rows = Vec::with_capacity(entries.len());
        for entry in entries {
            validate::validate_voice_and_slot(entry.voice, entry.slot)?;
            rows.push(SampleRow {
                kit: kit.to_string(),
                voice: entry.voice,
                slot: entry.slot,
                id: 0,
                filename: entry.sample.filename.clone(),
                source_path: entry.sample.source_path.clone(),
                is_stereo: entry.sample.is_stereo,
                wav_meta: entry.sample.wav_meta,
            });
        }
        // mint identities after validation
        for row in &mut rows {
            row.id = crate::store::mint_sample_id(kit, row.voice, row.slot, &row.source_path);
        }

        BatchQuery::commit_kit_plan(&self.db, kit, &rows)?;

        if self.session.as_ref().is_some_and(|s| s.kit() == kit) {
            self.session = Some(EditSession::new(kit));
        }
        Ok(())
    }

    pub fn get_sample(&self, kit: &str, voice: u8, slot: u8) -> KitResult<Option<SampleRow>> {
        SlotStore::get_sample(&self.db, kit, voice, slot)
    }

    pub fn kit_samples(&self, kit: &str) -> KitResult<Vec<SampleRow>> {
        SlotStore::get_kit_samples(&self.db, kit)
    }

    pub fn voice_samples(&self, kit: &str, voice: u8) -> KitResult<Vec<SampleRow>> {
        SlotStore::get_voice_samples(&self.db, kit, voice)
    }

    pub fn all_samples(&self) -> KitResult<Vec<SampleRow>> {
        SlotStore::get_all_samples(&self.db)
    }

    // ========================================================================
    // Undo / Redo
    // ========================================================================

    /// Reverse the most recent action of the open kit
    ///
    /// Returns Ok(None) when no kit is open or there is nothing to undo.
    pub fn undo(&mut self) -> KitResult<Option<ChangeSet>> {
        match self.session.as_mut() {
            Some(session) => session.undo(&self.db),
            None => Ok(None),
        }
    }

    /// Reapply the most recently undone action of the open kit
    pub fn redo(&mut self) -> KitResult<Option<ChangeSet>> {
        match self.session.as_mut() {
            Some(session) => session.redo(&self.db),
            None => Ok(None),
        }
    }

    pub fn can_undo(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.can_undo())
    }

    pub fn can_redo(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.can_redo())
    }

    /// Record an externally built action against the open kit
    ///
    /// Actions touching other kits only are dropped; cross-kit moves record
    /// as long as one side is the open kit.
    pub fn record_action(&mut self, action: UndoAction) {
        if let Some(session) = self.session.as_mut() {
            if action.kits().contains(&session.kit()) {
                session.record(action);
            }
        }
    }

    // ========================================================================
    // Internal
    // ========================================================================

    /// A mutation target must exist, be editable, and not be locked
    fn guard_editable(&self, kit: &str) -> KitResult<KitRow> {
        let row = SlotStore::get_kit(&self.db, kit)?;
        if row.locked {
            return Err(KitError::KitLocked(kit.to_string()));
        }
        if !row.editable {
            return Err(KitError::KitNotEditable(kit.to_string()));
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(dir: &TempDir, name: &str, channels: u16) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..64 {
            for _ in 0..channels {
                writer.write_sample(0i16).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    fn service_with_kit(name: &str) -> KitService {
        let mut service = KitService::in_memory().unwrap();
        service.create_kit(name, None).unwrap();
        service.open_kit(name).unwrap();
        service
    }

    #[test]
    fn test_open_on_disk_database() {
        let dir = TempDir::new().unwrap();
        let mut service = KitService::open(dir.path().join("library")).unwrap();
        service.create_kit("A0", Some("Breaks")).unwrap();
        assert_eq!(service.list_kits().unwrap().len(), 1);
        assert!(dir.path().join("library").join(DB_FILENAME).exists());
    }

    #[test]
    fn test_add_sample_from_file_captures_format() {
        let dir = TempDir::new().unwrap();
        let mono = write_wav(&dir, "kick.wav", 1);
        let stereo = write_wav(&dir, "pad.wav", 2);
        let mut service = service_with_kit("A0");

        let row = service
            .add_sample("A0", 1, 0, &mono, AddSampleOptions::default())
            .unwrap();
        assert_eq!(row.filename, "kick.wav");
        assert!(!row.is_stereo);
        assert_eq!(row.wav_meta.unwrap().sample_rate, 44100);

        let row = service
            .add_sample("A0", 2, 0, &stereo, AddSampleOptions::default())
            .unwrap();
        assert!(row.is_stereo);

        // channel count can be overridden
        let forced = service
            .add_sample(
                "A0",
                1,
                1,
                &stereo,
                AddSampleOptions {
                    force_stereo: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!forced.is_stereo);
    }

    #[test]
    fn test_add_stereo_to_voice_4_fails() {
        let dir = TempDir::new().unwrap();
        let stereo = write_wav(&dir, "pad.wav", 2);
        let mut service = service_with_kit("A0");

        let err = service
            .add_sample("A0", 4, 0, &stereo, AddSampleOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            KitError::Validation(crate::validate::ValidationError::VoiceHasNoPair(4))
        ));
        assert!(service.kit_samples("A0").unwrap().is_empty());
    }

    #[test]
    fn test_locked_and_uneditable_kits_reject_mutations() {
        let dir = TempDir::new().unwrap();
        let wav = write_wav(&dir, "kick.wav", 1);
        let mut service = service_with_kit("A0");

        service.set_kit_locked("A0", true).unwrap();
        assert!(matches!(
            service.add_sample("A0", 1, 0, &wav, AddSampleOptions::default()),
            Err(KitError::KitLocked(_))
        ));

        service.set_kit_locked("A0", false).unwrap();
        service.set_kit_editable("A0", false).unwrap();
        assert!(matches!(
            service.delete_sample("A0", 1, 0),
            Err(KitError::KitNotEditable(_))
        ));
    }

    #[test]
    fn test_replace_records_old_sample_for_undo() {
        let dir = TempDir::new().unwrap();
        let first = write_wav(&dir, "first.wav", 1);
        let second = write_wav(&dir, "second.wav", 1);
        let mut service = service_with_kit("A0");

        service
            .add_sample("A0", 1, 0, &first, AddSampleOptions::default())
            .unwrap();
        service
            .add_sample(
                "A0",
                1,
                0,
                &second,
                AddSampleOptions {
                    replace: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(
            service.get_sample("A0", 1, 0).unwrap().unwrap().filename,
            "second.wav"
        );

        service.undo().unwrap().unwrap();
        assert_eq!(
            service.get_sample("A0", 1, 0).unwrap().unwrap().filename,
            "first.wav"
        );
    }

    #[test]
    fn test_move_undo_redo_through_facade() {
        let dir = TempDir::new().unwrap();
        let mut service = service_with_kit("A0");
        for i in 0..6 {
            let wav = write_wav(&dir, &format!("s{}.wav", i + 1), 1);
            service
                .add_sample("A0", 1, i, &wav, AddSampleOptions::default())
                .unwrap();
        }
        let names = |service: &KitService| -> Vec<String> {
            service
                .voice_samples("A0", 1)
                .unwrap()
                .iter()
                .map(|r| r.filename.clone())
                .collect()
        };
        let before = names(&service);

        service.move_sample("A0", 1, 5, 1, 3).unwrap();
        assert_eq!(
            names(&service),
            vec!["s1.wav", "s2.wav", "s3.wav", "s6.wav", "s4.wav", "s5.wav"]
        );

        service.undo().unwrap().unwrap();
        assert_eq!(names(&service), before);

        service.redo().unwrap().unwrap();
        assert_eq!(
            names(&service),
            vec!["s1.wav", "s2.wav", "s3.wav", "s6.wav", "s4.wav", "s5.wav"]
        );
    }

    #[test]
    fn test_open_kit_clears_history() {
        let dir = TempDir::new().unwrap();
        let wav = write_wav(&dir, "kick.wav", 1);
        let mut service = service_with_kit("A0");
        service.create_kit("B0", None).unwrap();

        service
            .add_sample("A0", 1, 0, &wav, AddSampleOptions::default())
            .unwrap();
        assert!(service.can_undo());

        service.open_kit("B0").unwrap();
        assert!(!service.can_undo());
        assert!(service.undo().unwrap().is_none());
    }

    #[test]
    fn test_undo_without_open_kit_is_noop() {
        let mut service = KitService::in_memory().unwrap();
        service.create_kit("A0", None).unwrap();
        assert!(service.undo().unwrap().is_none());
    }

    #[test]
    fn test_commit_kit_plan_rewrites_and_resets_history() {
        let dir = TempDir::new().unwrap();
        let wav = write_wav(&dir, "old.wav", 1);
        let mut service = service_with_kit("A0");
        service
            .add_sample("A0", 3, 0, &wav, AddSampleOptions::default())
            .unwrap();
        assert!(service.can_undo());

        let sample = |name: &str| NewSample {
            filename: name.to_string(),
            source_path: format!("/samples/{}", name),
            is_stereo: false,
            wav_meta: None,
        };
        let entries = vec![
            PlanEntry { voice: 1, slot: 0, sample: sample("a.wav") },
            PlanEntry { voice: 1, slot: 1, sample: sample("b.wav") },
            PlanEntry { voice: 1, slot: 0, sample: sample("winner.wav") },
        ];
        service.commit_kit_plan("A0", &entries).unwrap();

        let rows = service.kit_samples("A0").unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["winner.wav", "b.wav"]);
        assert!(!service.can_undo());
    }

    #[test]
    fn test_compact_slots_undo_round_trip() {
        let mut service = service_with_kit("A0");
        // seed a gapped voice through the store, the way a non-reindexing
        // delete leaves one
        for slot in [0u8, 3, 8] {
            let data = crate::store::NewSample {
                filename: format!("g{}.wav", slot),
                source_path: format!("/samples/g{}.wav", slot),
                is_stereo: false,
                wav_meta: None,
            };
            crate::store::SlotStore::add_sample(service.db(), "A0", 1, slot, data).unwrap();
        }

        let changes = service.compact_slots("A0", 1).unwrap();
        assert!(!changes.is_empty());
        let slots: Vec<u8> = service
            .voice_samples("A0", 1)
            .unwrap()
            .iter()
            .map(|r| r.slot)
            .collect();
        assert_eq!(slots, vec![0, 1, 2]);

        service.undo().unwrap().unwrap();
        let slots: Vec<u8> = service
            .voice_samples("A0", 1)
            .unwrap()
            .iter()
            .map(|r| r.slot)
            .collect();
        assert_eq!(slots, vec![0, 3, 8]);
    }

    #[test]
    fn test_delete_kit_closes_session() {
        let mut service = service_with_kit("A0");
        assert_eq!(service.open_kit_name(), Some("A0"));
        service.delete_kit("A0").unwrap();
        assert_eq!(service.open_kit_name(), None);
    }

    #[test]
    fn test_cross_kit_move_records_on_open_kit() {
        let dir = TempDir::new().unwrap();
        let wav = write_wav(&dir, "kick.wav", 1);
        let mut service = service_with_kit("A0");
        service.create_kit("B0", None).unwrap();
        service
            .add_sample("A0", 1, 0, &wav, AddSampleOptions::default())
            .unwrap();

        service
            .move_sample_between_kits("A0", 1, 0, "B0", 2, 0)
            .unwrap();
        assert!(service.get_sample("B0", 2, 0).unwrap().is_some());

        service.undo().unwrap().unwrap();
        assert!(service.get_sample("B0", 2, 0).unwrap().is_none());
        assert!(service.get_sample("A0", 1, 0).unwrap().is_some());
    }
}
