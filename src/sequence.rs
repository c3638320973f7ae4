//! Multi-track sequences and their timing base.

use crate::{prelude::*, track::Track};

/// The time base of a sequence.
///
/// PPQ sequences count ticks per quarter note and depend on tempo.
/// SMPTE sequences count ticks per frame of video, at a fixed frame rate.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum DivisionType {
    /// Pulses (ticks) per quarter note.
    Ppq,
    /// 24 frames per second.
    Smpte24,
    /// 25 frames per second.
    Smpte25,
    /// 29.97 frames per second, also known as 30-drop.
    Smpte30Drop,
    /// 30 frames per second.
    Smpte30,
}
impl DivisionType {
    /// The conventional numeric value of this division type: `0.0` for PPQ, and the frame rate
    /// for SMPTE.
    pub fn as_f32(self) -> f32 {
        match self {
            DivisionType::Ppq => 0.0,
            DivisionType::Smpte24 => 24.0,
            DivisionType::Smpte25 => 25.0,
            DivisionType::Smpte30Drop => 29.97,
            DivisionType::Smpte30 => 30.0,
        }
    }

    /// Inverse of `as_f32`.
    pub fn from_f32(value: f32) -> Result<DivisionType> {
        const ALL: [DivisionType; 5] = [
            DivisionType::Ppq,
            DivisionType::Smpte24,
            DivisionType::Smpte25,
            DivisionType::Smpte30Drop,
            DivisionType::Smpte30,
        ];
        ALL.iter()
            .copied()
            .find(|div| div.as_f32() == value)
            .ok_or_else(|| err_division!("division type is not PPQ, 24, 25, 29.97 or 30").into())
    }

    #[inline]
    pub fn is_smpte(self) -> bool {
        self != DivisionType::Ppq
    }

    /// The frame rate as stored in file headers, with 30-drop stored as 29.
    pub(crate) fn smpte_fps(self) -> Option<u8> {
        match self {
            DivisionType::Ppq => None,
            DivisionType::Smpte24 => Some(24),
            DivisionType::Smpte25 => Some(25),
            DivisionType::Smpte30Drop => Some(29),
            DivisionType::Smpte30 => Some(30),
        }
    }

    pub(crate) fn from_smpte_fps(fps: u8) -> Option<DivisionType> {
        match fps {
            24 => Some(DivisionType::Smpte24),
            25 => Some(DivisionType::Smpte25),
            29 => Some(DivisionType::Smpte30Drop),
            30 => Some(DivisionType::Smpte30),
            _ => None,
        }
    }

    /// The highest resolution representable in a file header for this division type.
    pub(crate) fn max_resolution(self) -> u16 {
        if self.is_smpte() {
            0xFF
        } else {
            u15::max_value().as_int()
        }
    }
}

/// An instrument, identified by its bank and program.
///
/// Only used as an opaque identifier: no instrument or soundbank resolution is done.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash, Default)]
pub struct Patch {
    pub bank: u16,
    pub program: u7,
}
impl Patch {
    #[inline]
    pub fn new(bank: u16, program: u7) -> Patch {
        Patch { bank, program }
    }
}

/// A timing base plus an ordered list of tracks.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Sequence {
    division_type: DivisionType,
    resolution: u16,
    tracks: Vec<Track>,
}
impl Sequence {
    /// Create an empty sequence.
    ///
    /// `resolution` is in ticks per quarter note for PPQ, or ticks per frame for SMPTE.
    /// It must be non-zero and fit in a file header (15 bits for PPQ, 8 bits for SMPTE).
    pub fn new(division_type: DivisionType, resolution: u16) -> Result<Sequence> {
        ensure!(
            resolution > 0 && resolution <= division_type.max_resolution(),
            err_param!("resolution out of range for the division type")
        );
        Ok(Sequence {
            division_type,
            resolution,
            tracks: Vec::new(),
        })
    }

    /// Create a sequence with `track_count` empty tracks.
    pub fn with_tracks(
        division_type: DivisionType,
        resolution: u16,
        track_count: usize,
    ) -> Result<Sequence> {
        let mut seq = Sequence::new(division_type, resolution)?;
        seq.tracks.resize_with(track_count, Track::new);
        Ok(seq)
    }

    #[inline]
    pub fn division_type(&self) -> DivisionType {
        self.division_type
    }

    #[inline]
    pub fn resolution(&self) -> u16 {
        self.resolution
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[inline]
    pub fn tracks_mut(&mut self) -> &mut [Track] {
        &mut self.tracks
    }

    #[inline]
    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    #[inline]
    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    /// Append a new empty track and return it.
    pub fn create_track(&mut self) -> &mut Track {
        self.tracks.push(Track::new());
        let last = self.tracks.len() - 1;
        &mut self.tracks[last]
    }

    /// Append an existing track.
    pub fn add_track(&mut self, track: Track) {
        self.tracks.push(track);
    }

    /// Remove the track at `index`, shifting later tracks down.
    pub fn delete_track(&mut self, index: usize) -> Option<Track> {
        if index < self.tracks.len() {
            Some(self.tracks.remove(index))
        } else {
            None
        }
    }

    /// The length of the sequence in ticks: the length of its longest track.
    pub fn tick_length(&self) -> i64 {
        self.tracks.iter().map(Track::ticks).max().unwrap_or(0)
    }

    /// The length of the sequence in microseconds.
    ///
    /// PPQ sequences are measured at a reference tempo of 120 BPM, that is, two quarter notes
    /// per second.
    pub fn microsecond_length(&self) -> i64 {
        let units_per_second = match self.division_type {
            DivisionType::Ppq => 2.0,
            smpte => smpte.as_f32() as f64,
        };
        (1_000_000.0 * self.tick_length() as f64 / (units_per_second * self.resolution as f64))
            as i64
    }

    /// The instruments this sequence uses.
    ///
    /// Instrument resolution is not supported, so this list is always empty.
    pub fn patch_list(&self) -> Vec<Patch> {
        Vec::new()
    }
}
