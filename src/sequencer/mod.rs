//! Real-time playback and recording of a [`Sequence`](struct.Sequence.html).
//!
//! A [`Sequencer`](struct.Sequencer.html) owns one background worker between `open` and
//! `close`. The worker walks a merged view of the sequence tracks, sleeping until every event is
//! due and then forwarding it to the sinks obtained from the device registry.
//!
//! Every public method takes `&self` and applies its change synchronously. The worker is only
//! woken up to notice the change, so getters reflect setters immediately.

use crate::{
    device::{DeviceRegistry, Receiver, Transmitter, NO_TIMESTAMP},
    message::Message,
    prelude::*,
    sequence::Sequence,
    track::{MidiEvent, RecordChannels, Track, TrackFilter},
};
use crossbeam_channel::Sender;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Weak,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

pub use self::listeners::{ControllerEventListener, MetaEventListener};
use self::{
    listeners::{guarded, Listeners},
    transport::{Recording, Transport},
    worker::Command,
};

mod listeners;
#[cfg(test)]
mod test;
mod transport;
mod worker;

/// Loop count that repeats the loop forever.
pub const LOOP_CONTINUOUSLY: i32 = -1;

/// Loop end point that stands for the end of the sequence.
pub const LOOP_END_UNSPECIFIED: i64 = -1;

/// Tunables of a sequencer, fixed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct SequencerConfig {
    /// Name of the playback thread.
    pub thread_name: String,
    /// Tempo used until a tempo is set or a tempo meta event is played.
    pub initial_tempo_bpm: f32,
}
impl Default for SequencerConfig {
    fn default() -> SequencerConfig {
        SequencerConfig {
            thread_name: "midiseq-sequencer".to_string(),
            initial_tempo_bpm: 120.0,
        }
    }
}

/// State shared between the public handle, the worker and the recording receiver.
///
/// Lock order is `sequence` before `transport`. The `recording` lock is never held together with
/// `transport`.
pub(crate) struct Shared {
    open: AtomicBool,
    sequence: Mutex<Option<Sequence>>,
    receivers: Mutex<Vec<Arc<dyn Receiver>>>,
    transmitters: Mutex<Vec<Arc<dyn Transmitter>>>,
    listeners: Listeners,
    mute: Mutex<BTreeSet<usize>>,
    solo: Mutex<BTreeSet<usize>>,
    record_enable: Mutex<HashMap<usize, RecordChannels>>,
    transport: Mutex<Transport>,
    recording: Mutex<Option<Recording>>,
}
impl Shared {
    /// Snapshot of the per-track merge state.
    fn track_filter(&self) -> TrackFilter {
        TrackFilter {
            mute: lock(&self.mute).clone(),
            solo: lock(&self.solo).clone(),
            record_enable: lock(&self.record_enable).clone(),
        }
    }

    /// Forward a message to every sink, without a timestamp.
    fn send_to_receivers(&self, message: &Message) {
        let receivers = lock(&self.receivers).clone();
        for receiver in receivers {
            guarded("receiver", || receiver.send(message, NO_TIMESTAMP));
        }
    }

    fn is_recording(&self) -> bool {
        lock(&self.recording).is_some()
    }

    /// Handle a message coming from one of the sources.
    ///
    /// The message is captured only while recording, but listeners always hear it.
    fn record(&self, message: &Message) {
        let now = Instant::now();
        let ticks_per_us = {
            let transport = lock(&self.transport);
            transport.ticks_per_us() * transport.tempo_factor() as f64
        };
        if let Some(recording) = lock(&self.recording).as_mut() {
            let elapsed = now.saturating_duration_since(recording.start_time);
            let tick = recording.start_tick + elapsed.as_secs_f64() * 1e6 * ticks_per_us;
            log::trace!("recorded {:02X?} at tick {:.1}", message.as_bytes(), tick);
            recording
                .track
                .add(MidiEvent::new(message.clone(), tick.round() as i64));
        }
        self.listeners.fire(message);
    }
}

/// Sink installed on every source while the sequencer is open.
struct RecordingReceiver {
    shared: Weak<Shared>,
}
impl Receiver for RecordingReceiver {
    fn send(&self, message: &Message, _timestamp: i64) {
        if let Some(shared) = self.shared.upgrade() {
            shared.record(message);
        }
    }
}

struct WorkerHandle {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

/// Plays a sequence to the sinks of a device registry, and records from its sources.
///
/// Tracks are referred to by index into `Sequence::tracks`.
pub struct Sequencer {
    registry: Arc<DeviceRegistry>,
    config: SequencerConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<WorkerHandle>>,
}
impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("open", &self.is_open())
            .field("running", &self.is_running())
            .field("recording", &self.is_recording())
            .field("tick_position", &self.get_tick_position())
            .finish()
    }
}
impl Sequencer {
    /// Create a closed sequencer with the default configuration.
    pub fn new(registry: Arc<DeviceRegistry>) -> Sequencer {
        Sequencer::with_config(registry, SequencerConfig::default())
    }

    pub fn with_config(registry: Arc<DeviceRegistry>, config: SequencerConfig) -> Sequencer {
        let transport = Transport::new(config.initial_tempo_bpm);
        Sequencer {
            registry,
            config,
            shared: Arc::new(Shared {
                open: AtomicBool::new(false),
                sequence: Mutex::new(None),
                receivers: Mutex::new(Vec::new()),
                transmitters: Mutex::new(Vec::new()),
                listeners: Listeners::default(),
                mute: Mutex::new(BTreeSet::new()),
                solo: Mutex::new(BTreeSet::new()),
                record_enable: Mutex::new(HashMap::new()),
                transport: Mutex::new(transport),
                recording: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    fn notify(&self, command: Command) {
        if let Some(worker) = lock(&self.worker).as_ref() {
            //The worker only exits after `Close`, so a failed send means it is already gone
            let _ = worker.commands.send(command);
        }
    }

    /// Acquire the sinks and sources of the registry and start the playback thread.
    ///
    /// Opening an open sequencer does nothing.
    pub fn open(&self) -> Result<()> {
        let mut handle = lock(&self.worker);
        if handle.is_some() {
            return Ok(());
        }
        let receivers = self.registry.receivers();
        let transmitters = self.registry.transmitters();
        let recorder: Arc<dyn Receiver> = Arc::new(RecordingReceiver {
            shared: Arc::downgrade(&self.shared),
        });
        for transmitter in transmitters.iter() {
            transmitter.set_receiver(Some(recorder.clone()));
        }
        let (commands, inbox) = crossbeam_channel::unbounded();
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || worker::run(shared, inbox))
            .context(err_device!("failed to spawn the playback thread"));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                for transmitter in transmitters.iter() {
                    transmitter.set_receiver(None);
                }
                return Err(err);
            }
        };
        log::debug!(
            "sequencer opened with {} receivers and {} transmitters",
            receivers.len(),
            transmitters.len()
        );
        *lock(&self.shared.receivers) = receivers;
        *lock(&self.shared.transmitters) = transmitters;
        self.shared.open.store(true, Ordering::SeqCst);
        *handle = Some(WorkerHandle {
            commands,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Stop playback, terminate the playback thread and release every sink, source and listener.
    ///
    /// Closing a closed sequencer does nothing.
    pub fn close(&self) {
        let handle = lock(&self.worker).take();
        let mut handle = match handle {
            Some(handle) => handle,
            None => return,
        };
        self.stop();
        let _ = handle.commands.send(Command::Close);
        if let Some(thread) = handle.thread.take() {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                log::warn!("playback thread panicked");
            }
        }
        let receivers = mem::take(&mut *lock(&self.shared.receivers));
        for receiver in receivers {
            guarded("receiver", || receiver.close());
        }
        let transmitters = mem::take(&mut *lock(&self.shared.transmitters));
        for transmitter in transmitters {
            guarded("transmitter", || {
                transmitter.set_receiver(None);
                transmitter.close();
            });
        }
        self.shared.listeners.clear();
        self.shared.open.store(false, Ordering::SeqCst);
        log::debug!("sequencer closed");
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// The sinks acquired on `open`.
    pub fn receivers(&self) -> Vec<Arc<dyn Receiver>> {
        lock(&self.shared.receivers).clone()
    }

    /// The sources acquired on `open`.
    pub fn transmitters(&self) -> Vec<Arc<dyn Transmitter>> {
        lock(&self.shared.transmitters).clone()
    }

    /* Sequence */

    /// Replace the sequence to play, or clear it with `None`.
    ///
    /// The tick position is kept, so playback continues from the same tick of the new sequence.
    pub fn set_sequence(&self, sequence: Option<Sequence>) {
        let timebase = sequence
            .as_ref()
            .map(|seq| (seq.division_type(), seq.resolution()));
        let tick_length = sequence.as_ref().map_or(0, Sequence::tick_length);
        {
            let mut seq = lock(&self.shared.sequence);
            *seq = sequence;
            let mut transport = lock(&self.shared.transport);
            transport.set_timebase(timebase, Instant::now());
            transport.tick_length = tick_length;
            transport.refresh = true;
        }
        log::debug!("sequence replaced, {} ticks long", tick_length);
        self.notify(Command::Reschedule);
    }

    /// A copy of the current sequence, including any recorded events.
    pub fn get_sequence(&self) -> Option<Sequence> {
        lock(&self.shared.sequence).clone()
    }

    /// Borrow the current sequence without copying it.
    pub fn with_sequence<R>(&self, f: impl FnOnce(Option<&Sequence>) -> R) -> R {
        f(lock(&self.shared.sequence).as_ref())
    }

    /// Edit the current sequence in place.
    ///
    /// Playback picks up the changes from the current position.
    pub fn with_sequence_mut<R>(&self, f: impl FnOnce(Option<&mut Sequence>) -> R) -> R {
        let out;
        {
            let mut seq = lock(&self.shared.sequence);
            out = f(seq.as_mut());
            let tick_length = seq.as_ref().map_or(0, Sequence::tick_length);
            let mut transport = lock(&self.shared.transport);
            transport.tick_length = tick_length;
            transport.refresh = true;
        }
        self.notify(Command::Reschedule);
        out
    }

    /* Transport */

    /// Start playing from the current position.
    pub fn start(&self) -> Result<()> {
        ensure!(self.is_open(), err_device!("sequencer is not open"));
        {
            let mut transport = lock(&self.shared.transport);
            if transport.running {
                return Ok(());
            }
            let now = Instant::now();
            let from = transport.position_at(now).ceil() as i64;
            transport.set_running(true, now);
            transport.seek(from, now);
            log::debug!("playback started at tick {}", from);
        }
        self.notify(Command::Start);
        Ok(())
    }

    /// Stop playing, and recording if a recording is in progress.
    ///
    /// The position stays where playback stopped.
    pub fn stop(&self) {
        self.stop_recording();
        let was_running = {
            let mut transport = lock(&self.shared.transport);
            let was_running = transport.running;
            transport.set_running(false, Instant::now());
            was_running
        };
        if was_running {
            log::debug!("playback stopped");
        }
        self.notify(Command::Stop);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.transport).running
    }

    /// Start playing and capture every message coming from the sources into the tracks enabled
    /// with `record_enable`.
    pub fn start_recording(&self) -> Result<()> {
        self.start()?;
        let now = Instant::now();
        let start_tick = lock(&self.shared.transport).position_at(now);
        let mut recording = lock(&self.shared.recording);
        if recording.is_none() {
            *recording = Some(Recording {
                start_tick,
                start_time: now,
                track: Track::new(),
            });
            log::debug!("recording started at tick {:.1}", start_tick);
        }
        Ok(())
    }

    /// Stop capturing, and merge the captured messages into the record-enabled tracks.
    ///
    /// Every event on a record-enabled channel that falls within the recorded span is replaced
    /// by what was captured. Playback goes on.
    pub fn stop_recording(&self) {
        let recording = match lock(&self.shared.recording).take() {
            Some(recording) => recording,
            None => return,
        };
        let end_tick = lock(&self.shared.transport).position_at(Instant::now());
        let (from, to) = (
            recording.start_tick.floor() as i64,
            end_tick.ceil() as i64,
        );
        let record_enable = lock(&self.shared.record_enable).clone();
        {
            let mut seq = lock(&self.shared.sequence);
            if let Some(seq) = seq.as_mut() {
                for (&idx, channels) in record_enable.iter() {
                    let track = match seq.track_mut(idx) {
                        Some(track) => track,
                        None => continue,
                    };
                    track.retain(|ev| {
                        !(channels.is_recordable(ev.message())
                            && ev.tick() >= from
                            && ev.tick() <= to)
                    });
                    track.extend_and_sort(
                        recording
                            .track
                            .iter()
                            .filter(|ev| channels.is_recordable(ev.message()))
                            .cloned(),
                    );
                }
            }
            let tick_length = seq.as_ref().map_or(0, Sequence::tick_length);
            let mut transport = lock(&self.shared.transport);
            transport.tick_length = tick_length;
            transport.refresh = true;
        }
        log::debug!(
            "recording stopped, {} events captured between ticks {} and {}",
            recording.track.len(),
            from,
            to
        );
        self.notify(Command::Reschedule);
    }

    pub fn is_recording(&self) -> bool {
        self.shared.is_recording()
    }

    /* Position */

    /// The current position, in ticks.
    pub fn get_tick_position(&self) -> i64 {
        lock(&self.shared.transport).position_at(Instant::now()) as i64
    }

    /// Move to a tick. Playback resumes from there if running.
    pub fn set_tick_position(&self, tick: i64) -> Result<()> {
        ensure!(tick >= 0, err_param!("tick position must not be negative"));
        lock(&self.shared.transport).seek(tick, Instant::now());
        self.notify(Command::Reschedule);
        Ok(())
    }

    /// The current position, in microseconds at the current tempo.
    pub fn get_microsecond_position(&self) -> i64 {
        let transport = lock(&self.shared.transport);
        let ticks_per_us = transport.ticks_per_us();
        if ticks_per_us > 0.0 {
            (transport.position_at(Instant::now()) / ticks_per_us) as i64
        } else {
            0
        }
    }

    /// Move to the tick that the given microsecond falls on, at the current tempo.
    pub fn set_microsecond_position(&self, us: i64) -> Result<()> {
        ensure!(us >= 0, err_param!("microsecond position must not be negative"));
        let tick = {
            let transport = lock(&self.shared.transport);
            (us as f64 * transport.ticks_per_us()) as i64
        };
        self.set_tick_position(tick)
    }

    /// The length of the sequence in ticks, or `0` without a sequence.
    pub fn get_tick_length(&self) -> i64 {
        lock(&self.shared.transport).tick_length
    }

    /// The length of the sequence in microseconds at the current tempo, or `0` without a
    /// sequence.
    pub fn get_microsecond_length(&self) -> i64 {
        let transport = lock(&self.shared.transport);
        let ticks_per_us = transport.ticks_per_us();
        if ticks_per_us > 0.0 {
            (transport.tick_length as f64 / ticks_per_us) as i64
        } else {
            0
        }
    }

    /* Tempo */

    pub fn get_tempo_in_bpm(&self) -> f32 {
        lock(&self.shared.transport).tempo_bpm()
    }

    pub fn set_tempo_in_bpm(&self, bpm: f32) -> Result<()> {
        ensure!(bpm > 0.0 && bpm.is_finite(), err_param!("tempo must be positive"));
        lock(&self.shared.transport).set_tempo_bpm(bpm, Instant::now());
        self.notify(Command::Reschedule);
        Ok(())
    }

    /// The tempo in microseconds per quarter note.
    pub fn get_tempo_in_mpq(&self) -> f32 {
        60_000_000.0 / self.get_tempo_in_bpm()
    }

    pub fn set_tempo_in_mpq(&self, mpq: f32) -> Result<()> {
        ensure!(mpq > 0.0 && mpq.is_finite(), err_param!("tempo must be positive"));
        self.set_tempo_in_bpm(60_000_000.0 / mpq)
    }

    pub fn get_tempo_factor(&self) -> f32 {
        lock(&self.shared.transport).tempo_factor()
    }

    /// Scale the playback speed without touching the tempo.
    pub fn set_tempo_factor(&self, factor: f32) -> Result<()> {
        ensure!(
            factor > 0.0 && factor.is_finite(),
            err_param!("tempo factor must be positive")
        );
        lock(&self.shared.transport).set_tempo_factor(factor, Instant::now());
        self.notify(Command::Reschedule);
        Ok(())
    }

    /* Looping */

    pub fn get_loop_start_point(&self) -> i64 {
        lock(&self.shared.transport).loop_start
    }

    pub fn set_loop_start_point(&self, tick: i64) -> Result<()> {
        {
            let mut transport = lock(&self.shared.transport);
            ensure!(tick >= 0, err_param!("loop start must not be negative"));
            ensure!(
                tick <= transport.tick_length,
                err_param!("loop start is past the end of the sequence")
            );
            ensure!(
                transport.loop_end == LOOP_END_UNSPECIFIED || tick <= transport.loop_end,
                err_param!("loop start is past the loop end")
            );
            transport.loop_start = tick;
        }
        self.notify(Command::Reschedule);
        Ok(())
    }

    /// The loop end point, or `LOOP_END_UNSPECIFIED` to loop until the end of the sequence.
    pub fn get_loop_end_point(&self) -> i64 {
        lock(&self.shared.transport).loop_end
    }

    pub fn set_loop_end_point(&self, tick: i64) -> Result<()> {
        {
            let mut transport = lock(&self.shared.transport);
            ensure!(
                tick >= LOOP_END_UNSPECIFIED,
                err_param!("loop end must not be negative")
            );
            ensure!(
                tick <= transport.tick_length,
                err_param!("loop end is past the end of the sequence")
            );
            ensure!(
                tick == LOOP_END_UNSPECIFIED || transport.loop_start <= tick,
                err_param!("loop end is before the loop start")
            );
            transport.loop_end = tick;
        }
        self.notify(Command::Reschedule);
        Ok(())
    }

    /// How many times the loop repeats after the first pass, or `LOOP_CONTINUOUSLY`.
    pub fn get_loop_count(&self) -> i32 {
        lock(&self.shared.transport).loop_count
    }

    pub fn set_loop_count(&self, count: i32) -> Result<()> {
        ensure!(
            count >= 0 || count == LOOP_CONTINUOUSLY,
            err_param!("loop count must be positive or LOOP_CONTINUOUSLY")
        );
        lock(&self.shared.transport).loop_count = count;
        self.notify(Command::Reschedule);
        Ok(())
    }

    /* Listeners */

    /// Listen for meta messages.
    ///
    /// Listeners hear the messages played from the sequence, and every message arriving from
    /// the sources while the sequencer is open, whether or not it is being recorded.
    /// Returns `false` if the listener was already registered.
    pub fn add_meta_event_listener(&self, listener: Arc<dyn MetaEventListener>) -> bool {
        self.shared.listeners.add_meta(listener)
    }

    pub fn remove_meta_event_listener(&self, listener: &Arc<dyn MetaEventListener>) {
        self.shared.listeners.remove_meta(listener)
    }

    /// Listen for control changes of the given controller numbers.
    ///
    /// Like meta listeners, controller listeners hear both played messages and every message
    /// arriving from the sources while open, even when nothing is being recorded.
    /// Returns every controller number the listener is registered for afterwards.
    pub fn add_controller_event_listener(
        &self,
        listener: Arc<dyn ControllerEventListener>,
        controllers: &[u8],
    ) -> Result<Vec<u8>> {
        self.shared.listeners.add_controller(listener, controllers)
    }

    /// Stop listening for the given controller numbers.
    ///
    /// Returns the controller numbers the listener is still registered for.
    pub fn remove_controller_event_listener(
        &self,
        listener: &Arc<dyn ControllerEventListener>,
        controllers: &[u8],
    ) -> Vec<u8> {
        self.shared.listeners.remove_controller(listener, controllers)
    }

    /* Per-track state */

    /// Record on a channel of a track, or on all channels with `-1`.
    pub fn record_enable(&self, track: usize, channel: i32) -> Result<()> {
        {
            let mut record_enable = lock(&self.shared.record_enable);
            let mut channels = record_enable.get(&track).copied().unwrap_or_default();
            channels.enable(channel)?;
            record_enable.insert(track, channels);
        }
        self.mark_stale();
        Ok(())
    }

    /// Stop recording on a track, or on every track with `None`.
    pub fn record_disable(&self, track: Option<usize>) {
        {
            let mut record_enable = lock(&self.shared.record_enable);
            match track {
                Some(track) => {
                    record_enable.remove(&track);
                }
                None => record_enable.clear(),
            }
        }
        self.mark_stale();
    }

    pub fn set_track_mute(&self, track: usize, mute: bool) {
        set_flag(&self.shared.mute, track, mute);
        self.mark_stale();
    }

    pub fn get_track_mute(&self, track: usize) -> bool {
        lock(&self.shared.mute).contains(&track)
    }

    pub fn set_track_solo(&self, track: usize, solo: bool) {
        set_flag(&self.shared.solo, track, solo);
        self.mark_stale();
    }

    pub fn get_track_solo(&self, track: usize) -> bool {
        lock(&self.shared.solo).contains(&track)
    }

    /// Make the worker rebuild the playable track from the current position.
    fn mark_stale(&self) {
        lock(&self.shared.transport).refresh = true;
        self.notify(Command::Reschedule);
    }
}
impl Drop for Sequencer {
    fn drop(&mut self) {
        self.close();
    }
}

fn set_flag(set: &Mutex<BTreeSet<usize>>, track: usize, on: bool) {
    let mut set = lock(set);
    if on {
        set.insert(track);
    } else {
        set.remove(&track);
    }
}
