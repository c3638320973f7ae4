//! # Overview
//!
//! `midiseq` decodes, encodes, stores and plays back MIDI data:
//!
//! - Discrete MIDI messages ([`Message`](enum.Message.html)), in their three flavors: short
//!   channel/system messages, meta messages and system-exclusive messages.
//! - Raw, undelimited byte streams, framed into messages by [`MidiStream`](struct.MidiStream.html).
//! - Time-ordered tracks and multi-track sequences ([`Track`](struct.Track.html),
//!   [`Sequence`](struct.Sequence.html)).
//! - Standard Midi Files, through the [`smf`](smf/index.html) module.
//! - Real-time playback and recording through the [`Sequencer`](struct.Sequencer.html).
//!
//! Usage for reading and rewriting a file is as simple as:
//!
//! ```rust,no_run
//! use midiseq::smf;
//!
//! let sequence = smf::read_file("song.mid", smf::ReadOptions::default()).unwrap();
//! for (i, track) in sequence.tracks().iter().enumerate() {
//!     println!("track {} has {} events", i, track.len());
//! }
//! smf::write_file(&sequence, 1, "song-rewritten.mid").unwrap();
//! ```
//!
//! # Playing a sequence
//!
//! The sequencer obtains its sinks (`Receiver`s) and sources (`Transmitter`s) from an explicit
//! [`DeviceRegistry`](struct.DeviceRegistry.html) owned by the application:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use midiseq::{smf, DeviceRegistry, Sequencer};
//!
//! let registry = Arc::new(DeviceRegistry::new());
//! // registry.add_device(...) with the transport bindings of your platform
//! let sequencer = Sequencer::new(registry);
//! sequencer.open().unwrap();
//! sequencer.set_sequence(Some(smf::read_file("song.mid", Default::default()).unwrap()));
//! sequencer.start().unwrap();
//! ```
//!
//! # About features
//!
//! - The `strict` feature
//!
//!   By default `midiseq` will attempt to plow through non-standard and even obviously corrupted
//!   files, throwing away any unreadable data.
//!   Enabling the `strict` feature makes [`ReadOptions::default`](smf/struct.ReadOptions.html)
//!   reject uncompliant files with `ErrorKind::MalformedFile` errors.
//!   Strictness can also be chosen per read.
//!
//! - The `parallel` feature
//!
//!   Enabled by default. Track chunks of large files are parsed in parallel through `rayon`.
//!
//! # Logging
//!
//! The crate logs through the `log` facade and never installs a logger on its own.

macro_rules! bail {
    ($err:expr) => {{
        return Err($err.into());
    }};
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !$cond {
            bail!($err)
        }
    }};
}

/// All of the errors this crate produces.
#[macro_use]
mod error;

mod prelude {
    pub(crate) use crate::{
        error::{ErrorKind, Result, ResultExt, StdResult},
        primitive::{u14, u15, u24, u4, u7, IntRead, SplitChecked},
    };
    pub(crate) use std::{
        fmt, io, mem,
        sync::{Arc, Mutex, MutexGuard},
    };

    /// Lock a mutex, recovering the data if a previous holder panicked.
    pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

mod device;
mod message;
mod primitive;
mod riff;
mod sequence;
mod sequencer;
pub mod smf;
mod stream;
mod track;

pub use crate::{
    device::{
        DeviceInfo, DeviceRegistry, MidiDevice, Receiver, StreamTransmitter, Transmitter,
        NO_TIMESTAMP,
    },
    error::{Error, ErrorKind, Result},
    message::{
        ChannelMessage, Message, MetaKind, MetaMessage, PitchBend, ShortMessage, SysexMessage,
    },
    sequence::{DivisionType, Patch, Sequence},
    sequencer::{
        ControllerEventListener, MetaEventListener, Sequencer, SequencerConfig,
        LOOP_CONTINUOUSLY, LOOP_END_UNSPECIFIED,
    },
    stream::MidiStream,
    track::{merge_tracks, MidiEvent, RecordChannels, Track, TrackFilter},
};

/// Exotically-sized integers used by the MIDI standard.
pub mod num {
    pub use crate::primitive::{u14, u15, u24, u4, u7};
}

/// MIDI variable-length quantities: 7 bits per byte, big-endian, with a continuation bit.
pub mod vlq {
    pub use crate::primitive::{
        decode_vlq as decode, encode_vlq as encode, vlq_len as len, write_vlq as write,
    };
}
