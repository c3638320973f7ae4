//! The playback thread.
//!
//! The thread owns a merged, filtered copy of the sequence (the playable track) and a cursor
//! into it. Everything else lives in `Shared`, and every change there is followed by a command
//! that interrupts whatever the thread is waiting for.

use super::Shared;
use crate::{
    message::Message,
    prelude::*,
    track::{merge_tracks, MidiEvent, Track},
};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Instant;

/// Wakeups for the playback thread.
///
/// State changes are applied before the command is sent, so commands carry no data.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Reschedule,
    Close,
}

enum Wake {
    /// The awaited tick was reached at the given instant.
    Due(Instant),
    /// Something changed, state must be reevaluated.
    Interrupted,
    Close,
}

struct Player {
    shared: Arc<Shared>,
    inbox: Receiver<Command>,
    playable: Track,
    /// Index of the next event to play.
    cursor: usize,
    /// Lowest tick not yet played.
    next_tick: i64,
    loops_done: i32,
}

pub(super) fn run(shared: Arc<Shared>, inbox: Receiver<Command>) {
    log::debug!("playback thread started");
    let mut player = Player {
        shared,
        inbox,
        playable: Track::new(),
        cursor: 0,
        next_tick: 0,
        loops_done: 0,
    };
    while player.step() {}
    log::debug!("playback thread exiting");
}

impl Player {
    /// Play, or wait for, whatever comes next. Returns `false` once the thread must exit.
    fn step(&mut self) -> bool {
        if !lock(&self.shared.transport).running {
            return self.wait_for_command();
        }
        self.refresh_if_needed();
        let ((start, end), loops_left) = {
            let transport = lock(&self.shared.transport);
            (transport.play_span(), transport.loops_left(self.loops_done))
        };

        match self.playable.get(self.cursor).map(MidiEvent::tick) {
            Some(tick) if tick < start => {
                self.cursor += 1;
                true
            }
            Some(tick) if tick <= end => match self.sleep_until(tick) {
                Wake::Due(_) => {
                    self.play_batch(tick);
                    true
                }
                Wake::Interrupted => true,
                Wake::Close => false,
            },
            //Nothing left to play in this pass
            _ if loops_left => {
                //A pass lasts at least one tick
                match self.sleep_until(end.max(start + 1)) {
                    Wake::Due(at) => {
                        self.restart_loop(start, end, at);
                        true
                    }
                    Wake::Interrupted => true,
                    Wake::Close => false,
                }
            }
            _ if self.shared.is_recording() => self.wait_for_command(),
            _ => {
                lock(&self.shared.transport).set_running(false, Instant::now());
                log::debug!("end of sequence reached, playback stopped");
                true
            }
        }
    }

    /// Block until any command arrives.
    fn wait_for_command(&self) -> bool {
        !matches!(self.inbox.recv(), Ok(Command::Close) | Err(_))
    }

    /// Sleep until the position reaches `tick`, or until a command interrupts the sleep.
    fn sleep_until(&self, tick: i64) -> Wake {
        let due = lock(&self.shared.transport).due_time(tick);
        let due = match due {
            Some(due) => due,
            None => {
                return match self.inbox.recv() {
                    Ok(Command::Close) | Err(_) => Wake::Close,
                    Ok(_) => Wake::Interrupted,
                }
            }
        };
        let now = Instant::now();
        if due <= now {
            match self.inbox.try_recv() {
                Ok(Command::Close) | Err(TryRecvError::Disconnected) => Wake::Close,
                Ok(_) => Wake::Interrupted,
                Err(TryRecvError::Empty) => Wake::Due(due),
            }
        } else {
            match self.inbox.recv_timeout(due - now) {
                Ok(Command::Close) | Err(RecvTimeoutError::Disconnected) => Wake::Close,
                Ok(_) => Wake::Interrupted,
                Err(RecvTimeoutError::Timeout) => Wake::Due(due),
            }
        }
    }

    /// Play every event at `tick`.
    fn play_batch(&mut self, tick: i64) {
        let shared = &self.shared;
        let mut played = 0;
        for ev in self.playable.events()[self.cursor..]
            .iter()
            .take_while(|ev| ev.tick() == tick)
        {
            dispatch(shared, ev.message());
            played += 1;
        }
        self.cursor += played;
        self.next_tick = tick + 1;
    }

    fn restart_loop(&mut self, start: i64, end: i64, due: Instant) {
        //Keep the pass length exact, unless playback began past the loop end
        let at = if self.next_tick > end + 1 {
            Instant::now()
        } else {
            due
        };
        lock(&self.shared.transport).jump(start, at);
        self.cursor = self
            .playable
            .events()
            .partition_point(|ev| ev.tick() < start);
        self.next_tick = start;
        self.loops_done += 1;
        log::debug!("loop pass {} restarting at tick {}", self.loops_done, start);
    }

    /// Rebuild the playable track if the sequence, the track filter or the position changed.
    fn refresh_if_needed(&mut self) {
        let (seek, position) = {
            let mut transport = lock(&self.shared.transport);
            if !transport.refresh {
                return;
            }
            transport.refresh = false;
            (
                transport.seek.take(),
                transport.position_at(Instant::now()).ceil() as i64,
            )
        };
        let resume = match seek {
            Some(tick) => {
                self.loops_done = 0;
                tick
            }
            None => self.next_tick.max(position),
        };
        let filter = self.shared.track_filter();
        self.playable = match lock(&self.shared.sequence).as_ref() {
            Some(seq) => merge_tracks(seq.tracks(), &filter),
            None => Track::new(),
        };
        self.cursor = self
            .playable
            .events()
            .partition_point(|ev| ev.tick() < resume);
        self.next_tick = resume;
        log::trace!(
            "playable track rebuilt with {} events, resuming at tick {}",
            self.playable.len(),
            resume
        );
        self.catch_up();
    }

    /// Bring the sinks to the state they would be in had the sequence been played up to the
    /// cursor: replay tempo, controller, program and sysex events, but no notes.
    fn catch_up(&self) {
        let mut replayed = 0;
        for ev in &self.playable.events()[..self.cursor] {
            match ev.message() {
                Message::Meta(meta) => {
                    if let Some(mpq) = meta.tempo_mpq().filter(|&mpq| mpq > 0) {
                        apply_tempo(&self.shared, mpq);
                    }
                }
                Message::Short(short) if short.is_note() => {}
                msg => {
                    self.shared.send_to_receivers(msg);
                    replayed += 1;
                }
            }
        }
        if replayed > 0 {
            log::trace!("caught up {} events", replayed);
        }
    }
}

fn apply_tempo(shared: &Shared, mpq: u32) {
    let bpm = 60_000_000.0 / mpq as f32;
    lock(&shared.transport).set_tempo_bpm(bpm, Instant::now());
}

/// Play a single event.
///
/// Tempo changes only reach the meta listeners. Everything else goes to every sink and then to
/// the interested listeners.
fn dispatch(shared: &Shared, message: &Message) {
    if let Message::Meta(meta) = message {
        if let Some(mpq) = meta.tempo_mpq().filter(|&mpq| mpq > 0) {
            log::trace!("tempo change to {} us per quarter note", mpq);
            apply_tempo(shared, mpq);
            shared.listeners.fire(message);
            return;
        }
    }
    log::trace!("playing {:02X?}", message.as_bytes());
    shared.send_to_receivers(message);
    shared.listeners.fire(message);
}
