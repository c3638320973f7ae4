//! Time-ordered event containers and the merge that turns a multi-track sequence into one
//! playable stream.

use crate::{message::Message, prelude::*};
use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap, HashMap},
};

/// A message stamped with the tick at which it should fire.
///
/// Events are immutable once created. A tick of `-1` means "no timestamp".
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct MidiEvent {
    message: Message,
    tick: i64,
}
impl MidiEvent {
    #[inline]
    pub fn new(message: impl Into<Message>, tick: i64) -> MidiEvent {
        MidiEvent {
            message: message.into(),
            tick,
        }
    }

    #[inline]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[inline]
    pub fn tick(&self) -> i64 {
        self.tick
    }

    #[inline]
    pub fn into_message(self) -> Message {
        self.message
    }
}

/// An ordered list of events.
///
/// Events are always kept in non-decreasing tick order. Events sharing a tick keep the order in
/// which they were added.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Track {
    events: Vec<MidiEvent>,
}
impl Track {
    #[inline]
    pub fn new() -> Track {
        Track::default()
    }

    /// Insert an event after every event with a tick lower or equal to its own.
    pub fn add(&mut self, event: MidiEvent) {
        let idx = self.events.partition_point(|ev| ev.tick <= event.tick);
        self.events.insert(idx, event);
    }

    /// Remove the first event equal to `event`. Returns whether an event was removed.
    pub fn remove(&mut self, event: &MidiEvent) -> bool {
        match self.events.iter().position(|ev| ev == event) {
            Some(idx) => {
                self.events.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove the event at the given index.
    pub fn remove_at(&mut self, index: usize) -> Option<MidiEvent> {
        if index < self.events.len() {
            Some(self.events.remove(index))
        } else {
            None
        }
    }

    /// Keep only the events for which the predicate returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&MidiEvent) -> bool) {
        self.events.retain(keep);
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&MidiEvent> {
        self.events.get(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[inline]
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<MidiEvent> {
        self.events.iter()
    }

    /// The length of this track in ticks: the highest tick of any of its events, or `0` if the
    /// track is empty.
    pub fn ticks(&self) -> i64 {
        self.events.iter().map(|ev| ev.tick).max().unwrap_or(0).max(0)
    }

    /// Add many events at once, restoring tick order with a single stable sort.
    pub(crate) fn extend_and_sort(&mut self, events: impl IntoIterator<Item = MidiEvent>) {
        self.events.extend(events);
        self.events.sort_by_key(|ev| ev.tick);
    }

    /// Append an event the caller knows sorts after every existing event.
    fn push_sorted(&mut self, event: MidiEvent) {
        debug_assert!(self.events.last().map_or(true, |last| last.tick <= event.tick));
        self.events.push(event);
    }
}
impl<'a> IntoIterator for &'a Track {
    type Item = &'a MidiEvent;
    type IntoIter = std::slice::Iter<'a, MidiEvent>;
    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// The set of channels a track records on.
///
/// Enabling channel `-1` records all channels, and also any non-channel message.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Hash)]
pub struct RecordChannels {
    all: bool,
    mask: u16,
}
impl RecordChannels {
    /// Record on all 16 channels.
    pub const ALL: RecordChannels = RecordChannels {
        all: true,
        mask: 0xFFFF,
    };

    /// Enable a channel, or every channel if `channel` is `-1`.
    pub fn enable(&mut self, channel: i32) -> Result<()> {
        match channel {
            -1 => *self = RecordChannels::ALL,
            0..=15 => self.mask |= 1 << channel,
            _ => bail!(err_param!("record channel must be -1 or in range 0..=15")),
        }
        Ok(())
    }

    #[inline]
    pub fn contains(&self, channel: u4) -> bool {
        self.mask & (1 << channel.as_int()) != 0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.all && self.mask == 0
    }

    /// Whether a recorded message belongs on a track with this set of channels.
    ///
    /// Channel messages are recorded when their channel is enabled.
    /// Other messages are always recorded once any channel is enabled.
    pub fn is_recordable(&self, message: &Message) -> bool {
        if self.all {
            return true;
        }
        match message.channel() {
            Some(channel) => self.contains(channel),
            None => !self.is_empty(),
        }
    }
}

/// Per-track state that decides which events make it into a merged playback stream.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct TrackFilter {
    pub mute: BTreeSet<usize>,
    pub solo: BTreeSet<usize>,
    pub record_enable: HashMap<usize, RecordChannels>,
}
impl TrackFilter {
    /// A track is audible unless it is muted, or some other track is soloed and it is not.
    pub fn is_audible(&self, track: usize) -> bool {
        !self.mute.contains(&track) && (self.solo.is_empty() || self.solo.contains(&track))
    }

    /// Whether an event of the given track should be played.
    ///
    /// Channel messages on record-enabled channels are left out, since those channels are being
    /// replaced by the recording.
    pub fn admits(&self, track: usize, event: &MidiEvent) -> bool {
        if !self.is_audible(track) {
            return false;
        }
        match (self.record_enable.get(&track), event.message().channel()) {
            (Some(rec), Some(channel)) => !rec.contains(channel),
            _ => true,
        }
    }
}

/// Stable k-way merge of several tracks into one.
///
/// Ties on the same tick are broken by track index first, and then by position within the
/// track.
pub fn merge_tracks(tracks: &[Track], filter: &TrackFilter) -> Track {
    let mut merged = Track {
        events: Vec::with_capacity(tracks.iter().map(Track::len).sum()),
    };
    //Next event index of every track, ordered by (tick, track, index)
    let mut heap: BinaryHeap<Reverse<(i64, usize, usize)>> =
        BinaryHeap::with_capacity(tracks.len());
    let push_next = |heap: &mut BinaryHeap<Reverse<(i64, usize, usize)>>,
                     track_idx: usize,
                     mut ev_idx: usize| {
        let track = &tracks[track_idx];
        while let Some(ev) = track.events.get(ev_idx) {
            if filter.admits(track_idx, ev) {
                heap.push(Reverse((ev.tick, track_idx, ev_idx)));
                return;
            }
            ev_idx += 1;
        }
    };
    for track_idx in 0..tracks.len() {
        push_next(&mut heap, track_idx, 0);
    }
    while let Some(Reverse((_tick, track_idx, ev_idx))) = heap.pop() {
        merged.push_sorted(tracks[track_idx].events[ev_idx].clone());
        push_next(&mut heap, track_idx, ev_idx + 1);
    }
    merged
}
