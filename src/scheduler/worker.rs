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
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, span, trace, Level};

use super::{tick_interval_ms, PlayMode, PlaybackEvent};
use crate::audio::thread_priority::configure_thread_priority;
use crate::audio::{Backend, OperationSet, COMMIT_NOW};
use crate::metronome::Metronome;
use crate::playsync::Signal;
use crate::sequence::{is_playable, Pattern, Project, SUBTICKS_PER_QUARTER};

/// Events buffered for the host before new ones are dropped.
pub(crate) const EVENT_CAPACITY: usize = 1024;

/// How often the level monitor posts peak levels.
pub(crate) const LEVEL_INTERVAL: Duration = Duration::from_millis(50);

/// Waits out the time between subticks.
pub(crate) trait Pace: Send {
    /// Forgets the previous deadline. Called when a session starts.
    fn reset(&mut self);

    /// Waits until one interval after the previous deadline.
    fn wait(&mut self, interval: Duration);
}

/// Paces subticks against absolute deadlines with spin_sleep, so time spent triggering
/// voices doesn't accumulate as drift. If a tick runs late the schedule restarts from now
/// rather than rushing to catch up.
#[derive(Default)]
pub(crate) struct SpinPace {
    deadline: Option<Instant>,
}

impl Pace for SpinPace {
    fn reset(&mut self) {
        self.deadline = None;
    }

    fn wait(&mut self, interval: Duration) {
        let now = Instant::now();
        let next = self.deadline.map_or(now + interval, |deadline| deadline + interval);
        let next = next.max(now);
        self.deadline = Some(next);
        spin_sleep::sleep(next.saturating_duration_since(Instant::now()));
    }
}

/// Scheduler state shared between the control thread and the workers.
pub(crate) struct Shared {
    pub(crate) project: Arc<Project>,
    pub(crate) metronome: Option<Arc<Metronome>>,
    pub(crate) backend: Arc<dyn Backend>,
    events: Sender<PlaybackEvent>,
    tempo: AtomicU32,
    /// Bumped by every start and stop, so a worker can tell its session was replaced.
    session: AtomicU64,
    pattern_running: AtomicBool,
    song_running: AtomicBool,
    /// One-way flag telling every worker to exit.
    pub(crate) closing: AtomicBool,
    operation_set: AtomicU32,
    /// Serializes start, stop and session completion.
    pub(crate) control: Mutex<()>,
    pub(crate) pattern_signal: Signal,
    pub(crate) song_signal: Signal,
    pub(crate) monitor_signal: Signal,
    /// Thread priority for the tick workers.
    pub(crate) priority: u8,
    pub(crate) rt: bool,
}

impl Shared {
    pub(crate) fn new(
        project: Arc<Project>,
        metronome: Option<Arc<Metronome>>,
        backend: Arc<dyn Backend>,
        tempo: u32,
        priority: u8,
        rt: bool,
    ) -> (Shared, Receiver<PlaybackEvent>) {
        let (events, receiver) = crossbeam_channel::bounded(EVENT_CAPACITY);
        let shared = Shared {
            project,
            metronome,
            backend,
            events,
            tempo: AtomicU32::new(tempo),
            session: AtomicU64::new(0),
            pattern_running: AtomicBool::new(false),
            song_running: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            operation_set: AtomicU32::new(COMMIT_NOW),
            control: Mutex::new(()),
            pattern_signal: Signal::new(),
            song_signal: Signal::new(),
            monitor_signal: Signal::new(),
            priority,
            rt,
        };
        (shared, receiver)
    }

    fn flag(&self, mode: PlayMode) -> &AtomicBool {
        match mode {
            PlayMode::Pattern => &self.pattern_running,
            PlayMode::Song => &self.song_running,
        }
    }

    pub(crate) fn signal(&self, mode: PlayMode) -> &Signal {
        match mode {
            PlayMode::Pattern => &self.pattern_signal,
            PlayMode::Song => &self.song_signal,
        }
    }

    /// Sets a mode's running flag. Callers hold the control lock.
    pub(crate) fn set_running(&self, mode: PlayMode, running: bool) {
        self.flag(mode).store(running, Ordering::Release);
    }

    /// Returns true if the mode's flag is set, regardless of closing.
    pub(crate) fn flagged(&self, mode: PlayMode) -> bool {
        self.flag(mode).load(Ordering::Acquire)
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Returns true while the mode should keep playing.
    pub(crate) fn is_running(&self, mode: PlayMode) -> bool {
        self.flagged(mode) && !self.is_closing()
    }

    pub(crate) fn any_running(&self) -> bool {
        self.is_running(PlayMode::Pattern) || self.is_running(PlayMode::Song)
    }

    pub(crate) fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }

    /// Starts a new session. Callers hold the control lock.
    pub(crate) fn bump_session(&self) -> u64 {
        self.session.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn tempo(&self) -> u32 {
        self.tempo.load(Ordering::Acquire)
    }

    pub(crate) fn set_tempo(&self, tempo: u32) {
        self.tempo.store(tempo, Ordering::Release);
    }

    /// The sleep between subticks at the current tempo.
    pub(crate) fn interval(&self) -> Duration {
        Duration::from_millis(tick_interval_ms(self.tempo()))
    }

    /// Returns the next operation set. Never returns [`COMMIT_NOW`].
    pub(crate) fn next_operation_set(&self) -> OperationSet {
        loop {
            let operation_set = self
                .operation_set
                .fetch_add(1, Ordering::AcqRel)
                .wrapping_add(1);
            if operation_set != COMMIT_NOW {
                return operation_set;
            }
        }
    }

    /// Posts an event to the host without blocking. Dropped if the host has fallen
    /// behind or stopped listening.
    pub(crate) fn post(&self, event: PlaybackEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            trace!(?event, "Event channel full, dropping event");
        }
    }
}

/// Triggers everything due at one playable subtick as a single operation set: the
/// metronome first, then every audible track with a step here, then the commit.
pub(crate) fn play_tick(
    shared: &Shared,
    patterns: &[Arc<Pattern>],
    pattern_index: Option<usize>,
    gate_patterns: bool,
    quarter: usize,
    position: usize,
) {
    let operation_set = shared.next_operation_set();

    if let Some(metronome) = &shared.metronome {
        metronome.play(position, operation_set);
    }

    for pattern in patterns {
        if gate_patterns && !pattern.params().is_audible() {
            continue;
        }
        let state = pattern.read();
        let timeline = state.timeline();
        if !timeline.covers(quarter) || !timeline.rate().contains(position) {
            continue;
        }
        for track in state.tracks() {
            let Some(velocity) = track.steps().velocity(quarter, position) else {
                continue;
            };
            if !track.params().is_audible() {
                continue;
            }
            if let Err(e) = track
                .pool()
                .play(velocity, track.params().pitch_ratio(), operation_set)
            {
                debug!(
                    err = %e,
                    pattern = pattern.name(),
                    instrument = track.instrument(),
                    "Unable to trigger step"
                );
            }
        }
    }

    shared.backend.commit(operation_set);
    trace!(operation_set, quarter, position, "Committed tick");
    shared.post(PlaybackEvent::Tick {
        pattern: pattern_index,
        quarter,
        position,
    });
}

/// Walks the 24 subticks of one quarter note, triggering the playable ones and sleeping
/// after every subtick. Returns false if the session stopped partway.
fn play_quarter(
    shared: &Shared,
    mode: PlayMode,
    session: u64,
    patterns: &[Arc<Pattern>],
    pattern_index: Option<usize>,
    quarter: usize,
    pace: &mut dyn Pace,
) -> bool {
    let gate_patterns = mode == PlayMode::Song;
    for position in 0..SUBTICKS_PER_QUARTER {
        if !shared.is_running(mode) || shared.session() != session {
            return false;
        }
        if is_playable(position) {
            play_tick(
                shared,
                patterns,
                pattern_index,
                gate_patterns,
                quarter,
                position,
            );
        }
        pace.wait(shared.interval());
    }
    true
}

/// Plays the active pattern once from start to end. Returns false if the session
/// should end.
pub(crate) fn pattern_pass(shared: &Shared, session: u64, pace: &mut dyn Pace) -> bool {
    let index = shared.project.active_pattern();
    let Some(pattern) = shared.project.pattern(index) else {
        info!(index, "No pattern to play");
        return false;
    };
    let total = pattern.quarter_notes();
    let patterns = [pattern];

    for quarter in 0..total {
        shared.post(PlaybackEvent::Counter(format!("{}/{}", quarter + 1, total)));
        if !play_quarter(
            shared,
            PlayMode::Pattern,
            session,
            &patterns,
            Some(index),
            quarter,
            pace,
        ) {
            return false;
        }
    }
    true
}

/// Plays every song position once. Each position runs for the longest of its patterns;
/// shorter patterns drop out once they've run out of quarter notes. Returns false if
/// the session should end.
pub(crate) fn song_pass(shared: &Shared, session: u64, pace: &mut dyn Pace) -> bool {
    let max_position = shared.project.max_song_position();
    let mut played = false;

    for position in 1..=max_position {
        if !shared.is_running(PlayMode::Song) || shared.session() != session {
            return false;
        }
        let patterns = shared.project.song_patterns(position);
        let Some(total) = patterns.iter().map(|pattern| pattern.quarter_notes()).max() else {
            continue;
        };
        played = true;
        shared.post(PlaybackEvent::SongPosition(position));

        for quarter in 0..total {
            shared.post(PlaybackEvent::Counter(format!(
                "{}:{}/{}",
                position,
                quarter + 1,
                total
            )));
            if !play_quarter(
                shared,
                PlayMode::Song,
                session,
                &patterns,
                None,
                quarter,
                pace,
            ) {
                return false;
            }
        }
    }

    if !played {
        info!("Song is empty, nothing to play");
    }
    played
}

/// The body of the pattern and song workers. Parks on the mode's signal between sessions
/// and exits once closing is set.
pub(crate) fn run_player(shared: Arc<Shared>, mode: PlayMode, mut pace: impl Pace) {
    let span = span!(Level::INFO, "scheduler worker", mode = %mode);
    let _enter = span.enter();

    configure_thread_priority(shared.priority, shared.rt);
    info!("Worker started");

    loop {
        if shared.is_closing() {
            break;
        }
        shared.signal(mode).wait();
        if shared.is_closing() {
            break;
        }

        let session = shared.session();
        if !shared.is_running(mode) {
            continue;
        }

        info!(session, tempo = shared.tempo(), "Session started");
        shared.post(PlaybackEvent::Started(mode));
        pace.reset();
        while shared.is_running(mode) && shared.session() == session {
            let more = match mode {
                PlayMode::Pattern => pattern_pass(&shared, session, &mut pace),
                PlayMode::Song => song_pass(&shared, session, &mut pace),
            };
            if !more {
                break;
            }
        }

        {
            // Only clear the flag if nobody restarted or stopped us in the meantime.
            let _control = shared.control.lock();
            if shared.session() == session {
                shared.set_running(mode, false);
            }
        }
        info!(session, "Session ended");
        shared.post(PlaybackEvent::Stopped(mode));
    }

    info!("Worker exiting");
}

/// The body of the level monitor. Posts peak levels while any session runs.
pub(crate) fn run_monitor(shared: Arc<Shared>) {
    let span = span!(Level::INFO, "level monitor");
    let _enter = span.enter();
    debug!("Worker started");

    loop {
        if shared.is_closing() {
            break;
        }
        shared.monitor_signal.wait();

        while shared.any_running() {
            shared.post(PlaybackEvent::Levels(shared.backend.levels()));
            shared.monitor_signal.wait_timeout(LEVEL_INTERVAL);
        }
    }

    debug!("Worker exiting");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Doesn't wait at all.
    pub(crate) struct NoPace;

    impl Pace for NoPace {
        fn reset(&mut self) {}

        fn wait(&mut self, _: Duration) {}
    }

    #[test]
    fn test_operation_sets_skip_commit_now() {
        let backend = crate::audio::mock::Backend::shared("mock");
        let ctx = crate::audio::AudioContext::new(backend.clone(), Default::default());
        let project = Arc::new(Project::new(&ctx));
        let (shared, _events) = Shared::new(project, None, backend, 120, 70, false);

        assert_eq!(shared.next_operation_set(), 1);
        assert_eq!(shared.next_operation_set(), 2);

        shared.operation_set.store(u32::MAX - 1, Ordering::Release);
        assert_eq!(shared.next_operation_set(), u32::MAX);
        assert_eq!(shared.next_operation_set(), 1);
    }

    #[test]
    fn test_undrained_events_are_dropped() {
        let backend = crate::audio::mock::Backend::shared("mock");
        let ctx = crate::audio::AudioContext::new(backend.clone(), Default::default());
        let project = Arc::new(Project::new(&ctx));
        let (shared, events) = Shared::new(project, None, backend, 120, 70, false);

        for position in 0..EVENT_CAPACITY + 10 {
            shared.post(PlaybackEvent::SongPosition(position));
        }
        assert_eq!(events.len(), EVENT_CAPACITY);
        assert_eq!(events.try_recv(), Ok(PlaybackEvent::SongPosition(0)));

        // Room again once the host catches up.
        shared.post(PlaybackEvent::Counter("1/4".to_string()));
        assert_eq!(events.len(), EVENT_CAPACITY);

        drop(events);
        shared.post(PlaybackEvent::SongPosition(0));
    }

    #[test]
    fn test_spin_pace_waits_an_interval() {
        let mut pace = SpinPace::default();
        let start = Instant::now();
        pace.wait(Duration::from_millis(5));
        pace.wait(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
