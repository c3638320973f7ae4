//! Musical time bookkeeping.
//!
//! The tick position is never advanced step by step. Instead an anchor pair (tick, instant) is
//! captured whenever the rate of ticks changes, and the current position is derived from it.

use crate::{sequence::DivisionType, track::Track};
use std::time::{Duration, Instant};

pub(super) struct Transport {
    pub running: bool,
    anchor_tick: f64,
    anchor_time: Instant,
    tempo_bpm: f32,
    tempo_factor: f32,
    /// Division type and resolution of the current sequence, if any.
    pub timebase: Option<(DivisionType, u16)>,
    pub tick_length: i64,
    pub loop_start: i64,
    pub loop_end: i64,
    pub loop_count: i32,
    /// The playable track must be rebuilt before playing on.
    pub refresh: bool,
    /// Tick the worker must resume playing from after a refresh, instead of where it was.
    pub seek: Option<i64>,
}
impl Transport {
    pub fn new(tempo_bpm: f32) -> Transport {
        Transport {
            running: false,
            anchor_tick: 0.0,
            anchor_time: Instant::now(),
            tempo_bpm,
            tempo_factor: 1.0,
            timebase: None,
            tick_length: 0,
            loop_start: 0,
            loop_end: super::LOOP_END_UNSPECIFIED,
            loop_count: 0,
            refresh: false,
            seek: None,
        }
    }

    /// Ticks per microsecond at the current tempo, ignoring the tempo factor.
    ///
    /// Zero if there is no sequence.
    pub fn ticks_per_us(&self) -> f64 {
        match self.timebase {
            Some((DivisionType::Ppq, res)) => self.tempo_bpm as f64 / 60.0 * res as f64 / 1e6,
            Some((smpte, res)) => smpte.as_f32() as f64 * res as f64 / 1e6,
            None => 0.0,
        }
    }

    /// The speed at which the position advances, in ticks per microsecond of wall time.
    fn rate(&self) -> f64 {
        self.ticks_per_us() * self.tempo_factor as f64
    }

    pub fn position_at(&self, now: Instant) -> f64 {
        if self.running {
            let elapsed = now.saturating_duration_since(self.anchor_time);
            self.anchor_tick + elapsed.as_secs_f64() * 1e6 * self.rate()
        } else {
            self.anchor_tick
        }
    }

    /// Capture the current position as the new anchor.
    ///
    /// Must be called before anything that changes the rate or the running state.
    pub fn rebase(&mut self, now: Instant) {
        self.anchor_tick = self.position_at(now);
        self.anchor_time = now;
    }

    /// Jump to a tick, making the worker resume from it.
    pub fn seek(&mut self, tick: i64, now: Instant) {
        self.jump(tick, now);
        self.seek = Some(tick);
        self.refresh = true;
    }

    /// Jump to a tick without rebuilding the playable track.
    pub fn jump(&mut self, tick: i64, now: Instant) {
        self.anchor_tick = tick as f64;
        self.anchor_time = now;
    }

    pub fn set_running(&mut self, running: bool, now: Instant) {
        self.rebase(now);
        self.running = running;
    }

    pub fn tempo_bpm(&self) -> f32 {
        self.tempo_bpm
    }

    pub fn set_tempo_bpm(&mut self, bpm: f32, now: Instant) {
        self.rebase(now);
        self.tempo_bpm = bpm;
    }

    pub fn tempo_factor(&self) -> f32 {
        self.tempo_factor
    }

    pub fn set_tempo_factor(&mut self, factor: f32, now: Instant) {
        self.rebase(now);
        self.tempo_factor = factor;
    }

    pub fn set_timebase(&mut self, timebase: Option<(DivisionType, u16)>, now: Instant) {
        self.rebase(now);
        self.timebase = timebase;
    }

    /// The wall-clock instant at which the position reaches `tick`.
    ///
    /// `None` if the position is not advancing, or advances too slowly to ever get there.
    pub fn due_time(&self, tick: i64) -> Option<Instant> {
        let rate = self.rate();
        if !self.running || !rate.is_finite() || rate <= 0.0 {
            return None;
        }
        let us = ((tick as f64 - self.anchor_tick) / rate).max(0.0);
        let delay = Duration::try_from_secs_f64(us / 1e6).ok()?;
        self.anchor_time.checked_add(delay)
    }

    /// The inclusive span of ticks that plays.
    ///
    /// Events outside of it are skipped on every pass, the last one included.
    pub fn play_span(&self) -> (i64, i64) {
        let end = if self.loop_end == super::LOOP_END_UNSPECIFIED {
            self.tick_length
        } else {
            self.loop_end
        };
        (self.loop_start, end)
    }

    /// Whether the play span repeats again after `loops_done` restarts.
    pub fn loops_left(&self, loops_done: i32) -> bool {
        self.loop_count == super::LOOP_CONTINUOUSLY || loops_done < self.loop_count
    }
}

/// Scratch state of an ongoing recording.
pub(super) struct Recording {
    pub start_tick: f64,
    pub start_time: Instant,
    pub track: Track,
}
