// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! User-editable audio parameters shared between the control thread and the scheduler.
//!
//! Each audio-producing entity (track, pattern, metronome, master) owns a
//! [`PlaybackParameters`]. The control thread is the only writer. Setters clamp their
//! input, compute every derived value, and only then publish each field with a single
//! atomic store, so the scheduler can read them every tick without taking a lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// The lowest volume, in dB. A volume at this level is auto-muted.
pub const MIN_VOLUME_DB: f32 = -60.0;

/// The highest volume, in dB.
pub const MAX_VOLUME_DB: f32 = 6.0;

pub const DEFAULT_VOLUME_DB: f32 = 0.0;

/// The lowest pitch offset, in semitones.
pub const MIN_PITCH: f32 = -12.0;

/// The highest pitch offset, in semitones.
pub const MAX_PITCH: f32 = 12.0;

pub const DEFAULT_PITCH: f32 = 0.0;

/// Pan runs from 0 (full left) to 1 (full right).
pub const MIN_PAN: f32 = 0.0;
pub const MAX_PAN: f32 = 1.0;
pub const CENTER_PAN: f32 = 0.5;

/// Makeup gain for square-root panning, so a centered sound doesn't dip in loudness.
pub const PAN_GAIN: f32 = 1.15;

/// Clamps a volume to the supported range. NaN becomes the default volume.
pub fn clamp_volume(db: f32) -> f32 {
    if db.is_nan() {
        return DEFAULT_VOLUME_DB;
    }
    db.clamp(MIN_VOLUME_DB, MAX_VOLUME_DB)
}

/// Clamps a pitch offset to the supported range. NaN becomes the default pitch.
pub fn clamp_pitch(semitones: f32) -> f32 {
    if semitones.is_nan() {
        return DEFAULT_PITCH;
    }
    semitones.clamp(MIN_PITCH, MAX_PITCH)
}

/// Clamps a pan position to [0, 1]. NaN becomes center.
pub fn clamp_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        return CENTER_PAN;
    }
    pan.clamp(MIN_PAN, MAX_PAN)
}

/// Converts decibels to a linear amplitude.
pub fn db_to_amplitude(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Converts a pitch offset in semitones to a frequency ratio.
pub fn semitones_to_ratio(semitones: f32) -> f32 {
    2f32.powf(semitones / 12.0)
}

/// Returns the (left, right) channel gains for a pan position.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = clamp_pan(pan);
    ((1.0 - pan).sqrt() * PAN_GAIN, pan.sqrt() * PAN_GAIN)
}

/// An f32 that can be shared between threads.
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(value: f32) -> Self {
        AtomicF32(AtomicU32::new(value.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

/// A point-in-time copy of every parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParameterSnapshot {
    pub volume_db: f32,
    pub amplitude: f32,
    pub pitch: f32,
    pub pitch_ratio: f32,
    pub pan: f32,
    pub left_gain: f32,
    pub right_gain: f32,
    pub muted: bool,
    pub solo: bool,
    pub auto_muted: bool,
    pub solo_muted: bool,
    pub enabled: bool,
}

/// Volume, pitch, pan, mute and solo state for one audio entity.
pub struct PlaybackParameters {
    volume_db: AtomicF32,
    /// Linear gain derived from the volume.
    amplitude: AtomicF32,
    pitch: AtomicF32,
    /// Frequency ratio derived from the pitch.
    pitch_ratio: AtomicF32,
    pan: AtomicF32,
    left_gain: AtomicF32,
    right_gain: AtomicF32,
    muted: AtomicBool,
    solo: AtomicBool,
    /// True when the volume is at the minimum.
    auto_muted: AtomicBool,
    /// True when a sibling is soloed and this entity isn't. Maintained by the owner of
    /// the sibling group through [`apply_solo_group`].
    solo_muted: AtomicBool,
    /// False when the entity shouldn't play at all, regardless of mute and solo.
    enabled: AtomicBool,
}

impl PlaybackParameters {
    /// Creates parameters at the default volume, pitch and pan.
    pub fn new() -> PlaybackParameters {
        let (left, right) = pan_gains(CENTER_PAN);
        PlaybackParameters {
            volume_db: AtomicF32::new(DEFAULT_VOLUME_DB),
            amplitude: AtomicF32::new(db_to_amplitude(DEFAULT_VOLUME_DB)),
            pitch: AtomicF32::new(DEFAULT_PITCH),
            pitch_ratio: AtomicF32::new(1.0),
            pan: AtomicF32::new(CENTER_PAN),
            left_gain: AtomicF32::new(left),
            right_gain: AtomicF32::new(right),
            muted: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            auto_muted: AtomicBool::new(false),
            solo_muted: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    /// Sets the volume in dB. Returns true if the volume changed, in which case the owner
    /// should push [`PlaybackParameters::amplitude`] to the backend right away.
    pub fn set_volume(&self, db: f32) -> bool {
        let db = clamp_volume(db);
        if db == self.volume_db.load() {
            return false;
        }
        let amplitude = db_to_amplitude(db);
        let auto_muted = db == MIN_VOLUME_DB;

        self.volume_db.store(db);
        self.amplitude.store(amplitude);
        self.auto_muted.store(auto_muted, Ordering::Release);
        true
    }

    pub fn volume(&self) -> f32 {
        self.volume_db.load()
    }

    /// Returns the linear gain for the current volume.
    pub fn amplitude(&self) -> f32 {
        self.amplitude.load()
    }

    /// Sets the pitch offset in semitones. Returns true if it changed.
    pub fn set_pitch(&self, semitones: f32) -> bool {
        let semitones = clamp_pitch(semitones);
        if semitones == self.pitch.load() {
            return false;
        }
        let ratio = semitones_to_ratio(semitones);

        self.pitch.store(semitones);
        self.pitch_ratio.store(ratio);
        true
    }

    pub fn pitch(&self) -> f32 {
        self.pitch.load()
    }

    /// Returns the frequency ratio for the current pitch.
    pub fn pitch_ratio(&self) -> f32 {
        self.pitch_ratio.load()
    }

    /// Sets the pan position. Returns true if it changed, in which case the owner should
    /// push [`PlaybackParameters::gains`] to the backend right away.
    pub fn set_pan(&self, pan: f32) -> bool {
        let pan = clamp_pan(pan);
        if pan == self.pan.load() {
            return false;
        }
        let (left, right) = pan_gains(pan);

        self.pan.store(pan);
        self.left_gain.store(left);
        self.right_gain.store(right);
        true
    }

    pub fn pan(&self) -> f32 {
        self.pan.load()
    }

    /// Returns the (left, right) channel gains for the current pan.
    pub fn gains(&self) -> (f32, f32) {
        (self.left_gain.load(), self.right_gain.load())
    }

    /// Returns true if the mute state changed.
    pub fn set_muted(&self, muted: bool) -> bool {
        self.muted.swap(muted, Ordering::AcqRel) != muted
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Sets the solo flag. Returns true if it changed, in which case the owner must
    /// recompute its sibling group with [`apply_solo_group`].
    pub fn set_solo(&self, solo: bool) -> bool {
        self.solo.swap(solo, Ordering::AcqRel) != solo
    }

    pub fn is_solo(&self) -> bool {
        self.solo.load(Ordering::Acquire)
    }

    pub fn is_auto_muted(&self) -> bool {
        self.auto_muted.load(Ordering::Acquire)
    }

    pub fn is_solo_muted(&self) -> bool {
        self.solo_muted.load(Ordering::Acquire)
    }

    fn set_solo_muted(&self, solo_muted: bool) {
        self.solo_muted.store(solo_muted, Ordering::Release);
    }

    /// Returns true if the enabled state changed.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.enabled.swap(enabled, Ordering::AcqRel) != enabled
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns true if the entity should currently be heard.
    pub fn is_audible(&self) -> bool {
        !self.is_muted() && !self.is_auto_muted() && !self.is_solo_muted() && self.is_enabled()
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        let (left_gain, right_gain) = self.gains();
        ParameterSnapshot {
            volume_db: self.volume(),
            amplitude: self.amplitude(),
            pitch: self.pitch(),
            pitch_ratio: self.pitch_ratio(),
            pan: self.pan(),
            left_gain,
            right_gain,
            muted: self.is_muted(),
            solo: self.is_solo(),
            auto_muted: self.is_auto_muted(),
            solo_muted: self.is_solo_muted(),
            enabled: self.is_enabled(),
        }
    }
}

impl Default for PlaybackParameters {
    fn default() -> Self {
        Self::new()
    }
}

/// Recomputes solo-mute across a group of siblings: if any sibling is soloed, every
/// sibling that isn't soloed is solo-muted. Otherwise nobody is.
pub fn apply_solo_group(group: &[&PlaybackParameters]) {
    let any_solo = group.iter().any(|params| params.is_solo());
    for params in group {
        params.set_solo_muted(any_solo && !params.is_solo());
    }
}
