//! Session-scoped undo/redo for slot mutations
//!
//! Two most-recent-first stacks, owned by an explicit per-open-kit session.
//! Add, replace, and delete actions carry the exact sample payloads they
//! touched; move and compact actions carry a snapshot of every affected
//! voice taken before the mutation, because their reindexing side effects
//! touch rows the user never named, and replaying shift arithmetic backwards
//! does not restore those rows' original slot numbers. Undoing such an
//! action deletes every current row of the affected voices without
//! reindexing and rewrites the snapshot rows at their exact original slots,
//! all in one transaction.

use crate::db::{BatchQuery, KitDb, SampleQuery, SampleRow, SlotKey, SlotPlan};
use crate::error::{KitError, KitResult};
use crate::moves::MoveEngine;
use crate::store::SlotStore;
use crate::types::ChangeSet;
use crate::validate::ValidationError;

/// Every sample row of the affected voice(s), captured immediately before a
/// reindexing mutation
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    voices: Vec<(String, u8)>,
    rows: Vec<SampleRow>,
}

impl StateSnapshot {
    /// Capture the current rows of the given (kit, voice) pairs
    pub fn capture(db: &KitDb, voices: &[(String, u8)]) -> KitResult<Self> {
        let mut scope: Vec<(String, u8)> = Vec::new();
        let mut rows = Vec::new();
        for (kit, voice) in voices {
            let key = (kit.clone(), *voice);
            if !scope.contains(&key) {
                rows.extend(SampleQuery::get_voice(db, kit, *voice)?);
                scope.push(key);
            }
        }
        Ok(Self {
            voices: scope,
            rows,
        })
    }

    pub fn voices(&self) -> &[(String, u8)] {
        &self.voices
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }
}

/// One reversible action, with everything needed to run it in either
/// direction
#[derive(Debug, Clone)]
pub enum UndoAction {
    AddSample {
        sample: SampleRow,
    },
    ReplaceSample {
        old: SampleRow,
        new: SampleRow,
    },
    DeleteSample {
        sample: SampleRow,
    },
    MoveSample {
        kit: String,
        from_voice: u8,
        from_slot: u8,
        to_voice: u8,
        to_slot: u8,
        snapshot: StateSnapshot,
    },
    MoveSampleBetweenKits {
        from_kit: String,
        from_voice: u8,
        from_slot: u8,
        to_kit: String,
        to_voice: u8,
        to_slot: u8,
        snapshot: StateSnapshot,
    },
    CompactSlots {
        kit: String,
        voice: u8,
        snapshot: StateSnapshot,
    },
}

impl UndoAction {
    /// The kit names this action touches
    pub fn kits(&self) -> Vec<&str> {
        match self {
            Self::AddSample { sample }
            | Self::ReplaceSample { old: sample, .. }
            | Self::DeleteSample { sample } => vec![sample.kit.as_str()],
            Self::MoveSample { kit, .. } | Self::CompactSlots { kit, .. } => {
                vec![kit.as_str()]
            }
            Self::MoveSampleBetweenKits {
                from_kit, to_kit, ..
            } => vec![from_kit.as_str(), to_kit.as_str()],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::AddSample { .. } => "add sample",
            Self::ReplaceSample { .. } => "replace sample",
            Self::DeleteSample { .. } => "delete sample",
            Self::MoveSample { .. } => "move sample",
            Self::MoveSampleBetweenKits { .. } => "move sample between kits",
            Self::CompactSlots { .. } => "compact slots",
        }
    }
}

/// Replay mutual exclusion: a second undo/redo cannot start while one is in
/// flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayState {
    Idle,
    Undoing,
    Redoing,
}

/// Per-open-kit action history
///
/// Constructed fresh whenever the open kit changes, which is what clears
/// both stacks.
#[derive(Debug)]
pub struct EditSession {
    kit: String,
    undo_stack: Vec<UndoAction>,
    redo_stack: Vec<UndoAction>,
    state: ReplayState,
}

impl EditSession {
    pub fn new(kit: impl Into<String>) -> Self {
        Self {
            kit: kit.into(),
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            state: ReplayState::Idle,
        }
    }

    /// The kit this session belongs to
    pub fn kit(&self) -> &str {
        &self.kit
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Record a completed external mutation; empties the redo stack
    ///
    /// Replays never record: the replay paths call the store and engine
    /// directly, and a record arriving while a replay is in flight is
    /// dropped.
    pub fn record(&mut self, action: UndoAction) {
        if self.state != ReplayState::Idle {
            log::warn!("EditSession::record: dropping action recorded during a replay");
            return;
        }
        log::debug!("EditSession::record: {}", action.label());
        self.undo_stack.push(action);
        self.redo_stack.clear();
    }

    /// Reverse the most recent action
    ///
    /// Returns Ok(None) when there is nothing to undo or a replay is already
    /// in flight. On success the action moves to the redo stack; on failure
    /// both stacks are left as they were and the error is surfaced.
    pub fn undo(&mut self, db: &KitDb) -> KitResult<Option<ChangeSet>> {
        if self.state != ReplayState::Idle {
            log::warn!("EditSession::undo: replay already in flight");
            return Ok(None);
        }
        let Some(action) = self.undo_stack.pop() else {
            return Ok(None);
        };

        self.state = ReplayState::Undoing;
        log::debug!("EditSession::undo: reversing {}", action.label());
        let result = apply_inverse(db, &action);
        self.state = ReplayState::Idle;

        match result {
            Ok(changes) => {
                self.redo_stack.push(action);
                Ok(Some(changes))
            }
            Err(e) => {
                self.undo_stack.push(action);
                Err(KitError::UndoReplay(e.to_string()))
            }
        }
    }

    /// Reapply the most recently undone action
    pub fn redo(&mut self, db: &KitDb) -> KitResult<Option<ChangeSet>> {
        if self.state != ReplayState::Idle {
            log::warn!("EditSession::redo: replay already in flight");
            return Ok(None);
        }
        let Some(action) = self.redo_stack.pop() else {
            return Ok(None);
        };

        self.state = ReplayState::Redoing;
        log::debug!("EditSession::redo: reapplying {}", action.label());
        let result = apply_forward(db, &action);
        self.state = ReplayState::Idle;

        match result {
            Ok(changes) => {
                self.undo_stack.push(action);
                Ok(Some(changes))
            }
            Err(e) => {
                self.redo_stack.push(action);
                Err(KitError::UndoReplay(e.to_string()))
            }
        }
    }
}

/// Execute the inverse of an action
fn apply_inverse(db: &KitDb, action: &UndoAction) -> KitResult<ChangeSet> {
    match action {
        UndoAction::AddSample { sample } => {
            let (_, changes) =
                SlotStore::delete_sample(db, &sample.kit, sample.voice, sample.slot, true)?;
            Ok(changes)
        }
        UndoAction::DeleteSample { sample } => {
            MoveEngine::insert_with_shift(db, sample.clone())
        }
        UndoAction::ReplaceSample { old, .. } => {
            SlotStore::put_sample_row(db, old)?;
            let mut changes = ChangeSet::new();
            changes.push(&old.kit, old.voice, old.slot);
            Ok(changes)
        }
        UndoAction::MoveSample { snapshot, .. }
        | UndoAction::MoveSampleBetweenKits { snapshot, .. }
        | UndoAction::CompactSlots { snapshot, .. } => restore_snapshot(db, snapshot),
    }
}

/// Re-execute the forward direction of an action
fn apply_forward(db: &KitDb, action: &UndoAction) -> KitResult<ChangeSet> {
    match action {
        UndoAction::AddSample { sample } => {
            if SampleQuery::get(db, &sample.kit, sample.voice, sample.slot)?.is_some() {
                return Err(ValidationError::SlotOccupied {
                    voice: sample.voice,
                    slot: sample.slot,
                }
                .into());
            }
            SlotStore::put_sample_row(db, sample)?;
            let mut changes = ChangeSet::new();
            changes.push(&sample.kit, sample.voice, sample.slot);
            Ok(changes)
        }
        UndoAction::DeleteSample { sample } => {
            let (_, changes) =
                SlotStore::delete_sample(db, &sample.kit, sample.voice, sample.slot, true)?;
            Ok(changes)
        }
        UndoAction::ReplaceSample { new, .. } => {
            SlotStore::put_sample_row(db, new)?;
            let mut changes = ChangeSet::new();
            changes.push(&new.kit, new.voice, new.slot);
            Ok(changes)
        }
        UndoAction::MoveSample {
            kit,
            from_voice,
            from_slot,
            to_voice,
            to_slot,
            ..
        } => MoveEngine::move_sample(db, kit, *from_voice, *from_slot, *to_voice, *to_slot),
        UndoAction::MoveSampleBetweenKits {
            from_kit,
            from_voice,
            from_slot,
            to_kit,
            to_voice,
            to_slot,
            ..
        } => MoveEngine::move_sample_between_kits(
            db, from_kit, *from_voice, *from_slot, to_kit, *to_voice, *to_slot,
        ),
        UndoAction::CompactSlots { kit, voice, .. } => {
            MoveEngine::compact_voice(db, kit, *voice)
        }
    }
}

/// Overwrite the snapshot's voices with their captured rows, in one
/// transaction: every current row is deleted without reindexing, then every
/// snapshot row is rewritten at its exact original slot
fn restore_snapshot(db: &KitDb, snapshot: &StateSnapshot) -> KitResult<ChangeSet> {
    let mut plan = SlotPlan::new();
    let mut changes = ChangeSet::new();

    for (kit, voice) in snapshot.voices() {
        for row in SampleQuery::get_voice(db, kit, *voice)? {
            plan.removals.push(SlotKey::new(kit.as_str(), *voice, row.slot));
            changes.push(kit, *voice, row.slot);
        }
        plan.touch_kit(kit);
    }
    for row in snapshot.rows() {
        changes.push(&row.kit, row.voice, row.slot);
        plan.writes.push(row.clone());
    }

    BatchQuery::apply_slot_plan(db, &plan)?;
    Ok(changes)
}
