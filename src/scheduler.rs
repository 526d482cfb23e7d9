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

//! The tick scheduler.
//!
//! Two long-lived workers, one for pattern mode and one for song mode, walk the subtick
//! grid at the current tempo and trigger voices for every selected step. A third worker
//! posts output levels while anything is playing. Workers park on a [`Signal`] between
//! sessions; the control thread only flips flags and raises signals, so starting and
//! stopping never blocks on audio.
//!
//! [`Signal`]: crate::playsync::Signal

mod events;
mod worker;

use std::{
    io,
    sync::{atomic::Ordering, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::info;

pub use events::{PlayMode, PlaybackEvent};

use crate::audio::{
    thread_priority::{rt_scheduling_enabled, scheduler_thread_priority},
    Backend,
};
use crate::metronome::Metronome;
use crate::sequence::{Project, TickRate, SUBTICKS_PER_QUARTER};
use worker::{Shared, SpinPace};

pub const MIN_TEMPO: u32 = 40;
pub const MAX_TEMPO: u32 = 240;
pub const DEFAULT_TEMPO: u32 = 120;

/// Milliseconds between subticks at the given tempo, truncated.
pub fn tick_interval_ms(tempo: u32) -> u64 {
    let tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO) as u64;
    60_000 / tempo / SUBTICKS_PER_QUARTER as u64
}

/// What the scheduler is doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running(PlayMode),
    Shutdown,
}

/// Owns the scheduler workers. Dropping it shuts them down.
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns the workers, parked until the first start. Playback events are delivered on
    /// the returned receiver.
    pub fn new(
        project: Arc<Project>,
        metronome: Option<Arc<Metronome>>,
        backend: Arc<dyn Backend>,
        tempo: u32,
    ) -> io::Result<(Scheduler, Receiver<PlaybackEvent>)> {
        let (shared, events) = Shared::new(
            project,
            metronome,
            backend,
            tempo.clamp(MIN_TEMPO, MAX_TEMPO),
            scheduler_thread_priority(),
            rt_scheduling_enabled(),
        );
        // Built before spawning so an early return joins whatever already started.
        let scheduler = Scheduler {
            shared: Arc::new(shared),
            workers: Mutex::new(Vec::with_capacity(3)),
        };

        for mode in [PlayMode::Pattern, PlayMode::Song] {
            let shared = scheduler.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("tambala-{}", mode))
                .spawn(move || worker::run_player(shared, mode, SpinPace::default()))?;
            scheduler.workers.lock().push(handle);
        }
        let shared = scheduler.shared.clone();
        let handle = thread::Builder::new()
            .name("tambala-levels".to_string())
            .spawn(move || worker::run_monitor(shared))?;
        scheduler.workers.lock().push(handle);

        info!(tempo = scheduler.tempo(), "Scheduler ready");
        Ok((scheduler, events))
    }

    /// Starts a session in the given mode, stopping the other mode if it's running.
    /// Returns false if the mode is already running or the scheduler is shut down.
    pub fn start(&self, mode: PlayMode) -> bool {
        let _control = self.shared.control.lock();
        if self.shared.is_closing() || self.shared.flagged(mode) {
            return false;
        }

        let other = match mode {
            PlayMode::Pattern => PlayMode::Song,
            PlayMode::Song => PlayMode::Pattern,
        };
        self.shared.set_running(other, false);
        let session = self.shared.bump_session();
        self.shared.set_running(mode, true);
        self.shared.signal(mode).set();
        self.shared.monitor_signal.set();

        info!(%mode, session, "Starting playback");
        true
    }

    /// Stops whatever is running. The current subtick's sleep finishes before the worker
    /// notices. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        let _control = self.shared.control.lock();
        let was_running =
            self.shared.flagged(PlayMode::Pattern) || self.shared.flagged(PlayMode::Song);
        self.shared.set_running(PlayMode::Pattern, false);
        self.shared.set_running(PlayMode::Song, false);
        self.shared.bump_session();
        if was_running {
            info!("Stopping playback");
        }
        was_running
    }

    /// Sets the tempo in beats per minute, clamped to the supported range. Takes effect
    /// from the next subtick. Returns the tempo used.
    pub fn set_tempo(&self, tempo: u32) -> u32 {
        let tempo = tempo.clamp(MIN_TEMPO, MAX_TEMPO);
        self.shared.set_tempo(tempo);
        info!(tempo, "Tempo changed");
        tempo
    }

    pub fn tempo(&self) -> u32 {
        self.shared.tempo()
    }

    /// The sleep between subticks at the current tempo.
    pub fn tick_interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Sets the metronome subdivision. Returns None if there's no metronome.
    pub fn set_metronome_frequency(&self, ticks: usize) -> Option<TickRate> {
        self.shared
            .metronome
            .as_ref()
            .map(|metronome| metronome.set_frequency(ticks))
    }

    /// Turns the metronome on or off. Returns false if there's no metronome.
    pub fn set_metronome_active(&self, active: bool) -> bool {
        match &self.shared.metronome {
            Some(metronome) => {
                metronome.set_active(active);
                true
            }
            None => false,
        }
    }

    /// Returns true while either mode is running.
    pub fn is_active(&self) -> bool {
        self.shared.any_running()
    }

    pub fn state(&self) -> SchedulerState {
        if self.shared.is_closing() {
            SchedulerState::Shutdown
        } else if self.shared.is_running(PlayMode::Pattern) {
            SchedulerState::Running(PlayMode::Pattern)
        } else if self.shared.is_running(PlayMode::Song) {
            SchedulerState::Running(PlayMode::Song)
        } else {
            SchedulerState::Idle
        }
    }

    /// Stops playback and joins the workers. Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let _control = self.shared.control.lock();
            if self.shared.closing.swap(true, Ordering::AcqRel) {
                return;
            }
            self.shared.set_running(PlayMode::Pattern, false);
            self.shared.set_running(PlayMode::Song, false);
            self.shared.bump_session();
        }
        self.shared.pattern_signal.set();
        self.shared.song_signal.set();
        self.shared.monitor_signal.set();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Scheduler worker panicked");
            }
        }
        info!("Scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
