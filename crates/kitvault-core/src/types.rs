//! Common types for kitvault
//!
//! This module contains the fundamental types used throughout the kitvault
//! core: voice/slot bounds, kit step patterns, captured WAV metadata, and
//! change reporting for slot mutations.

use serde::{Deserialize, Serialize};

/// Number of playback voices per kit (voices are numbered 1..=4)
pub const NUM_VOICES: u8 = 4;

/// Number of sample slots per voice (slots are numbered 0..=11)
pub const NUM_SLOTS: u8 = 12;

/// Rows in a kit step pattern, one per voice
pub const STEP_PATTERN_ROWS: usize = 4;

/// Steps per row in a kit step pattern
pub const STEP_PATTERN_STEPS: usize = 16;

/// Maximum step velocity
pub const MAX_VELOCITY: u8 = 127;

/// A kit step pattern: 4 rows of 16 step velocities (0-127)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPattern(pub [[u8; STEP_PATTERN_STEPS]; STEP_PATTERN_ROWS]);

impl StepPattern {
    /// Create an all-zero (silent) pattern
    pub fn silent() -> Self {
        Self([[0; STEP_PATTERN_STEPS]; STEP_PATTERN_ROWS])
    }

    /// Get the velocity at (row, step), if in range
    pub fn velocity(&self, row: usize, step: usize) -> Option<u8> {
        self.0.get(row).and_then(|r| r.get(step)).copied()
    }
}

/// Audio format captured from a WAV header sniff
///
/// Populated from the `fmt ` chunk when present; the audio data itself is
/// never decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavMeta {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavMeta {
    /// Whether the file carries more than one channel
    pub fn is_stereo(&self) -> bool {
        self.channels > 1
    }
}

/// One slot coordinate within a kit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotCoord {
    pub kit: String,
    pub voice: u8,
    pub slot: u8,
}

impl SlotCoord {
    pub fn new(kit: impl Into<String>, voice: u8, slot: u8) -> Self {
        Self {
            kit: kit.into(),
            voice,
            slot,
        }
    }
}

/// The set of slot coordinates whose occupant changed during one operation
///
/// Callers use this to know what to refresh; the undo coordinator uses it to
/// report which kits a replay touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    changed: Vec<SlotCoord>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a changed coordinate; duplicates are dropped
    pub fn push(&mut self, kit: &str, voice: u8, slot: u8) {
        let coord = SlotCoord::new(kit, voice, slot);
        if !self.changed.contains(&coord) {
            self.changed.push(coord);
        }
    }

    /// Absorb another change set
    pub fn merge(&mut self, other: ChangeSet) {
        for coord in other.changed {
            if !self.changed.contains(&coord) {
                self.changed.push(coord);
            }
        }
    }

    pub fn contains(&self, kit: &str, voice: u8, slot: u8) -> bool {
        self.changed
            .iter()
            .any(|c| c.kit == kit && c.voice == voice && c.slot == slot)
    }

    pub fn coords(&self) -> &[SlotCoord] {
        &self.changed
    }

    /// Unique kit names touched by this change set, in first-seen order
    pub fn kits(&self) -> Vec<String> {
        let mut kits: Vec<String> = Vec::new();
        for coord in &self.changed {
            if !kits.contains(&coord.kit) {
                kits.push(coord.kit.clone());
            }
        }
        kits
    }

    pub fn len(&self) -> usize {
        self.changed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}
