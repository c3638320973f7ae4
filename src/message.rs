//! The three flavors of MIDI messages and their parsers.
//!
//! Every message keeps its raw wire bytes as the canonical representation. Typed views such as
//! [`ChannelMessage`](enum.ChannelMessage.html) and [`MetaKind`](enum.MetaKind.html) are derived
//! from those bytes on demand.

use crate::{
    prelude::*,
    primitive::{push_vlq, read_vlq},
};

/// Any MIDI message: a short channel/system message, a meta message or a system-exclusive message.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub enum Message {
    /// A channel voice, system common or system realtime message of 1 to 3 bytes.
    Short(ShortMessage),
    /// A file-only meta message, with status `0xFF`.
    Meta(MetaMessage),
    /// A system-exclusive message or sysex continuation, with status `0xF0` or `0xF7`.
    Sysex(SysexMessage),
}
impl Message {
    /// Classify and validate a complete message from its raw bytes.
    ///
    /// A lone `0xFF` byte is a system reset short message; `0xFF` followed by more bytes is a
    /// meta message.
    pub fn parse(raw: &[u8]) -> Result<Message> {
        let status = *raw
            .first()
            .ok_or(err_truncated!("empty message, no status byte"))?;
        Ok(match status {
            0xFF if raw.len() > 1 => Message::Meta(MetaMessage::parse(raw)?),
            0xF0 | 0xF7 => Message::Sysex(SysexMessage::parse(raw)?),
            _ => Message::Short(ShortMessage::parse(raw)?),
        })
    }

    /// The raw serialized bytes of this message.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Short(msg) => msg.as_bytes(),
            Message::Meta(msg) => msg.as_bytes(),
            Message::Sysex(msg) => msg.as_bytes(),
        }
    }

    /// The first byte of the message. Its top bit is always set.
    #[inline]
    pub fn status(&self) -> u8 {
        self.as_bytes()[0]
    }

    /// The total length of the message in bytes, including the status byte.
    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Messages are never empty, since they always carry at least a status byte.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// If this is a channel voice message, the channel it is addressed to.
    pub fn channel(&self) -> Option<u4> {
        match self {
            Message::Short(msg) if msg.is_channel() => Some(msg.channel()),
            _ => None,
        }
    }

    /// Whether this is a tempo change meta message.
    pub fn is_tempo(&self) -> bool {
        match self {
            Message::Meta(meta) => meta.tempo_mpq().is_some(),
            _ => false,
        }
    }
}
impl From<ShortMessage> for Message {
    fn from(msg: ShortMessage) -> Message {
        Message::Short(msg)
    }
}
impl From<MetaMessage> for Message {
    fn from(msg: MetaMessage) -> Message {
        Message::Meta(msg)
    }
}
impl From<SysexMessage> for Message {
    fn from(msg: SysexMessage) -> Message {
        Message::Sysex(msg)
    }
}

/// Short messages have a length that is fully determined by their status byte.
///
/// Returns `None` for statuses that cannot start a short message: the sysex delimiters
/// `0xF0` and `0xF7`, and the undefined system common statuses `0xF4` and `0xF5`.
pub(crate) fn short_msg_len(status: u8) -> Option<usize> {
    const LENGTH_BY_STATUS: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 3, 3, 3, 3, 2, 2, 3, 0];
    match status {
        0x80..=0xEF => Some(LENGTH_BY_STATUS[(status >> 4) as usize] as usize),
        0xF1 | 0xF3 => Some(2),
        0xF2 => Some(3),
        0xF6 | 0xF8..=0xFF => Some(1),
        _ => None,
    }
}

/// A channel voice, system common or system realtime message.
///
/// Holds 1 to 3 bytes, depending on the status.
/// Data bytes beyond the length implied by the status are always zero.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct ShortMessage {
    raw: [u8; 3],
    len: u8,
}
impl Default for ShortMessage {
    /// A note on for middle C on the first channel, at full velocity.
    fn default() -> ShortMessage {
        ShortMessage {
            raw: [0x90, 0x3C, 0x7F],
            len: 3,
        }
    }
}
impl ShortMessage {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
    pub const MIDI_TIME_CODE: u8 = 0xF1;
    pub const SONG_POSITION_POINTER: u8 = 0xF2;
    pub const SONG_SELECT: u8 = 0xF3;
    pub const TUNE_REQUEST: u8 = 0xF6;
    pub const TIMING_CLOCK: u8 = 0xF8;
    pub const START: u8 = 0xFA;
    pub const CONTINUE: u8 = 0xFB;
    pub const STOP: u8 = 0xFC;
    pub const ACTIVE_SENSING: u8 = 0xFE;
    pub const SYSTEM_RESET: u8 = 0xFF;

    /// Build a message out of its status and data bytes.
    ///
    /// The length is derived from the status. `data2` (and `data1` for 1-byte messages) is
    /// range-checked but otherwise ignored when the status does not use it.
    pub fn new(status: u8, data1: u8, data2: u8) -> Result<ShortMessage> {
        let len = short_msg_len(status).ok_or(err_malformed_msg!(
            "status byte is not a channel or system short message"
        ))?;
        u7::check_int(data1)?;
        u7::check_int(data2)?;
        let mut raw = [status, 0, 0];
        if len >= 2 {
            raw[1] = data1;
        }
        if len >= 3 {
            raw[2] = data2;
        }
        Ok(ShortMessage {
            raw,
            len: len as u8,
        })
    }

    /// Build a channel voice message out of a command (high nibble) and a channel.
    pub fn with_channel(command: u8, channel: u8, data1: u8, data2: u8) -> Result<ShortMessage> {
        ensure!(
            (0x80..=0xE0).contains(&command) && command & 0x0F == 0,
            err_malformed_msg!("command is not a channel voice command")
        );
        let channel = u4::try_from(channel).ok_or(err_param!("channel out of range 0..=15"))?;
        ShortMessage::new(command | channel.as_int(), data1, data2)
    }

    /// Replace the contents of this message.
    ///
    /// On failure the message is left untouched.
    pub fn set_message(&mut self, status: u8, data1: u8, data2: u8) -> Result<()> {
        *self = ShortMessage::new(status, data1, data2)?;
        Ok(())
    }

    /// Parse a short message from the start of `raw`.
    ///
    /// Exactly as many bytes as the status implies are consumed, extra bytes are ignored.
    pub fn parse(raw: &[u8]) -> Result<ShortMessage> {
        let status = *raw
            .first()
            .ok_or(err_truncated!("no status byte"))?;
        let len = short_msg_len(status).ok_or(err_malformed_msg!(
            "status byte is not a channel or system short message"
        ))?;
        let bytes = raw
            .get(..len)
            .ok_or(err_truncated!("short message missing data bytes"))?;
        ShortMessage::new(
            status,
            bytes.get(1).copied().unwrap_or(0),
            bytes.get(2).copied().unwrap_or(0),
        )
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.raw[0]
    }

    /// Whether this is a channel voice message (status `0x80..=0xEF`).
    #[inline]
    pub fn is_channel(&self) -> bool {
        self.status() < 0xF0
    }

    /// The command part of the status.
    ///
    /// For channel messages this is the high nibble, for system messages the whole status byte.
    #[inline]
    pub fn command(&self) -> u8 {
        if self.is_channel() {
            self.status() & 0xF0
        } else {
            self.status()
        }
    }

    /// The channel part of the status. Meaningless for system messages.
    #[inline]
    pub fn channel(&self) -> u4 {
        u4::new(self.status())
    }

    #[inline]
    pub fn data1(&self) -> u8 {
        self.raw[1]
    }

    #[inline]
    pub fn data2(&self) -> u8 {
        self.raw[2]
    }

    /// The amount of data bytes following the status.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.len() - 1
    }

    /// Whether this is a control change, which is what controller listeners are keyed on.
    #[inline]
    pub fn is_control_change(&self) -> bool {
        self.command() == Self::CONTROL_CHANGE
    }

    /// Whether this is a note on or note off message.
    #[inline]
    pub fn is_note(&self) -> bool {
        self.command() == Self::NOTE_ON || self.command() == Self::NOTE_OFF
    }

    /// A typed view of a channel voice message, or `None` for system messages.
    pub fn kind(&self) -> Option<ChannelMessage> {
        let data = [u7::new(self.data1()), u7::new(self.data2())];
        Some(match self.status() >> 4 {
            0x8 => ChannelMessage::NoteOff {
                key: data[0],
                vel: data[1],
            },
            0x9 => ChannelMessage::NoteOn {
                key: data[0],
                vel: data[1],
            },
            0xA => ChannelMessage::Aftertouch {
                key: data[0],
                vel: data[1],
            },
            0xB => ChannelMessage::Controller {
                controller: data[0],
                value: data[1],
            },
            0xC => ChannelMessage::ProgramChange { program: data[0] },
            0xD => ChannelMessage::ChannelAftertouch { vel: data[0] },
            0xE => {
                //Pitch bend data is little-endian
                let lsb = data[0].as_int() as u16;
                let msb = data[1].as_int() as u16;
                ChannelMessage::PitchBend {
                    bend: PitchBend(u14::new(msb << 7 | lsb)),
                }
            }
            _ => return None,
        })
    }
}

/// A typed view over a channel voice message.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum ChannelMessage {
    /// Stop playing a note.
    NoteOff { key: u7, vel: u7 },
    /// Start playing a note.
    ///
    /// By convention a velocity of 0 is equivalent to a `NoteOff`.
    NoteOn { key: u7, vel: u7 },
    /// Modify the velocity of a note after it has been played.
    Aftertouch { key: u7, vel: u7 },
    /// Modify the value of a MIDI controller.
    Controller { controller: u7, value: u7 },
    /// Change the program (instrument) of a channel.
    ProgramChange { program: u7 },
    /// Change the velocity of all notes playing in a channel at once.
    ChannelAftertouch { vel: u7 },
    /// Set the pitch bend for the whole channel.
    PitchBend { bend: PitchBend },
}
impl ChannelMessage {
    /// The raw status nibble for this message type.
    pub fn status_nibble(&self) -> u8 {
        match self {
            ChannelMessage::NoteOff { .. } => 0x8,
            ChannelMessage::NoteOn { .. } => 0x9,
            ChannelMessage::Aftertouch { .. } => 0xA,
            ChannelMessage::Controller { .. } => 0xB,
            ChannelMessage::ProgramChange { .. } => 0xC,
            ChannelMessage::ChannelAftertouch { .. } => 0xD,
            ChannelMessage::PitchBend { .. } => 0xE,
        }
    }

    /// Address this message to a channel, producing the wire message.
    pub fn to_short(&self, channel: u4) -> ShortMessage {
        let (data1, data2, len) = match *self {
            ChannelMessage::NoteOff { key, vel }
            | ChannelMessage::NoteOn { key, vel }
            | ChannelMessage::Aftertouch { key, vel } => (key.as_int(), vel.as_int(), 3),
            ChannelMessage::Controller { controller, value } => {
                (controller.as_int(), value.as_int(), 3)
            }
            ChannelMessage::ProgramChange { program } => (program.as_int(), 0, 2),
            ChannelMessage::ChannelAftertouch { vel } => (vel.as_int(), 0, 2),
            ChannelMessage::PitchBend { bend } => {
                let raw = bend.0.as_int();
                ((raw & 0x7F) as u8, (raw >> 7) as u8, 3)
            }
        };
        ShortMessage {
            raw: [self.status_nibble() << 4 | channel.as_int(), data1, data2],
            len,
        }
    }
}

/// The value of a pitch bend, represented as 14 bits.
///
/// A value of `0x0000` indicates full bend downwards.
/// A value of `0x2000` indicates no bend.
/// A value of `0x3FFF` indicates full bend upwards.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct PitchBend(pub u14);
impl PitchBend {
    /// The middle value of `0x2000`, indicating no bend.
    #[inline]
    pub const fn mid_raw_value() -> PitchBend {
        PitchBend(u14::new(0x2000))
    }

    /// Create a `PitchBend` value from an int in the range `[-0x2000, 0x1FFF]`.
    ///
    /// Integers outside this range will be clamped.
    #[inline]
    pub fn from_int(int: i16) -> PitchBend {
        PitchBend(u14::new((int.clamp(-0x2000, 0x1FFF) + 0x2000) as u16))
    }

    /// Returns an int in the range `[-0x2000, 0x1FFF]`.
    #[inline]
    pub fn as_int(self) -> i16 {
        self.0.as_int() as i16 - 0x2000
    }

    /// Returns an `f32` in the range `[-1.0, 1.0)`.
    #[inline]
    pub fn as_f32(self) -> f32 {
        self.as_int() as f32 * (1.0 / 0x2000 as f32)
    }
}

/// A meta message: `0xFF`, a type byte, a variable-length data length and the data itself.
///
/// Meta messages only live in files and sequences, they are never sent to a device.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct MetaMessage {
    raw: Vec<u8>,
    data_start: usize,
}
impl MetaMessage {
    pub const TEMPO: u8 = 0x51;
    pub const END_OF_TRACK: u8 = 0x2F;

    /// Build a meta message out of its type and data.
    ///
    /// The length header is always computed from `data`.
    pub fn new(meta_type: u8, data: &[u8]) -> Result<MetaMessage> {
        let meta_type = u7::check_int(meta_type)
            .context(err_malformed_msg!("meta message type out of range 0..=127"))?;
        let len = u32::try_from(data.len())
            .map_err(|_| err_malformed_msg!("meta message data too long"))?;
        Ok(MetaMessage::build(meta_type, len, data))
    }

    fn build(meta_type: u7, len: u32, data: &[u8]) -> MetaMessage {
        let mut raw = Vec::with_capacity(2 + 5 + data.len());
        raw.push(0xFF);
        raw.push(meta_type.as_int());
        push_vlq(len, &mut raw);
        let data_start = raw.len();
        raw.extend_from_slice(data);
        MetaMessage { raw, data_start }
    }

    /// A tempo change, in microseconds per quarter note.
    pub fn tempo(mpq: u24) -> MetaMessage {
        MetaMessage::build(u7::new(Self::TEMPO), 3, &mpq.as_int().to_be_bytes()[1..])
    }

    /// The End-of-Track marker that terminates every track chunk.
    pub fn end_of_track() -> MetaMessage {
        MetaMessage::build(u7::new(Self::END_OF_TRACK), 0, &[])
    }

    /// Replace the contents of this message.
    ///
    /// On failure the message is left untouched.
    pub fn set_message(&mut self, meta_type: u8, data: &[u8]) -> Result<()> {
        *self = MetaMessage::new(meta_type, data)?;
        Ok(())
    }

    /// Parse a complete meta message, including its `0xFF` status.
    ///
    /// The declared length must match the amount of trailing data exactly.
    pub fn parse(raw: &[u8]) -> Result<MetaMessage> {
        let mut rest = raw;
        ensure!(
            u8::read(&mut rest)? == 0xFF,
            err_malformed_msg!("meta message status must be 0xFF")
        );
        let meta_type = u8::read(&mut rest).context(err_malformed_msg!("missing meta type"))?;
        let meta_type = u7::check_int(meta_type)?;
        let len = read_vlq(&mut rest)
            .context(err_malformed_msg!("failed to read meta message length"))?;
        ensure!(
            len as usize == rest.len(),
            err_malformed_msg!("meta message length disagrees with its data")
        );
        Ok(MetaMessage::build(meta_type, len, rest))
    }

    /// Read a meta message out of a track body, where the length delimits the message.
    ///
    /// `raw` starts right after the `0xFF` status byte and is advanced past the message.
    pub(crate) fn read(raw: &mut &[u8]) -> Result<MetaMessage> {
        let meta_type = u8::read(raw).context(err_malformed_msg!("missing meta type"))?;
        let meta_type = u7::check_int(meta_type)?;
        let len = read_vlq(raw).context(err_malformed_msg!("failed to read meta message length"))?;
        let data = raw
            .split_checked(len as usize)
            .ok_or(err_malformed_msg!("meta message length exceeds the available data"))?;
        Ok(MetaMessage::build(meta_type, len, data))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn meta_type(&self) -> u8 {
        self.raw[1]
    }

    /// The data bytes, after the length header.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.raw[self.data_start..]
    }

    #[inline]
    pub fn is_end_of_track(&self) -> bool {
        self.meta_type() == Self::END_OF_TRACK
    }

    /// If this is a well-formed tempo message, its microseconds per quarter note.
    pub fn tempo_mpq(&self) -> Option<u32> {
        match (self.meta_type(), self.data()) {
            (Self::TEMPO, &[a, b, c]) => Some(u32::from_be_bytes([0, a, b, c])),
            _ => None,
        }
    }

    /// A typed view of the message contents.
    ///
    /// Messages of a known type but with too little data are reported as `MetaKind::Unknown`.
    pub fn kind(&self) -> MetaKind<'_> {
        let data = self.data();
        match (self.meta_type(), data) {
            (0x00, &[hi, lo, ..]) => MetaKind::TrackNumber(Some(u16::from_be_bytes([hi, lo]))),
            (0x00, _) => MetaKind::TrackNumber(None),
            (0x01, _) => MetaKind::Text(data),
            (0x02, _) => MetaKind::Copyright(data),
            (0x03, _) => MetaKind::TrackName(data),
            (0x04, _) => MetaKind::InstrumentName(data),
            (0x05, _) => MetaKind::Lyric(data),
            (0x06, _) => MetaKind::Marker(data),
            (0x07, _) => MetaKind::CuePoint(data),
            (0x08, _) => MetaKind::ProgramName(data),
            (0x09, _) => MetaKind::DeviceName(data),
            (0x20, &[chan, ..]) => MetaKind::MidiChannel(u4::new(chan)),
            (0x21, &[port, ..]) => MetaKind::MidiPort(u7::new(port)),
            (0x2F, _) => MetaKind::EndOfTrack,
            (0x51, &[a, b, c, ..]) => MetaKind::Tempo(u24::new(u32::from_be_bytes([0, a, b, c]))),
            (0x54, &[hour, minute, second, frame, subframe, ..]) => MetaKind::SmpteOffset {
                hour,
                minute,
                second,
                frame,
                subframe,
            },
            (0x58, &[num, den, clocks, thirtyseconds, ..]) => {
                MetaKind::TimeSignature(num, den, clocks, thirtyseconds)
            }
            (0x59, &[sharps, minor, ..]) => MetaKind::KeySignature(sharps as i8, minor != 0),
            (0x7F, _) => MetaKind::SequencerSpecific(data),
            (other, _) => MetaKind::Unknown(other, data),
        }
    }
}

/// A typed view over a meta message.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MetaKind<'a> {
    /// The sequence number. Can be empty, defaulting to the track index.
    TrackNumber(Option<u16>),
    /// Arbitrary text associated to an instant.
    Text(&'a [u8]),
    Copyright(&'a [u8]),
    TrackName(&'a [u8]),
    InstrumentName(&'a [u8]),
    Lyric(&'a [u8]),
    Marker(&'a [u8]),
    CuePoint(&'a [u8]),
    ProgramName(&'a [u8]),
    DeviceName(&'a [u8]),
    /// The MIDI channel that following events are intended for.
    MidiChannel(u4),
    /// The MIDI port that this track was intended to be played with.
    MidiPort(u7),
    /// Obligatory at track end.
    EndOfTrack,
    /// Amount of microseconds per quarter note.
    Tempo(u24),
    /// The SMPTE time at which the track should start.
    SmpteOffset {
        hour: u8,
        minute: u8,
        second: u8,
        frame: u8,
        subframe: u8,
    },
    /// Numerator, denominator (as a power of two), MIDI clocks per click and 32nd notes per
    /// quarter note.
    TimeSignature(u8, u8, u8, u8),
    /// Negative numbers indicate flats and positive numbers sharps.
    /// `true` indicates a minor scale.
    KeySignature(i8, bool),
    /// Arbitrary data intended for the sequencer.
    SequencerSpecific(&'a [u8]),
    /// An unknown or malformed meta message, with its raw type byte.
    Unknown(u8, &'a [u8]),
}

/// A system-exclusive message (`0xF0`) or a sysex continuation/escape (`0xF7`), followed by raw
/// data bytes.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct SysexMessage {
    raw: Vec<u8>,
}
impl Default for SysexMessage {
    /// An empty `F0 F7` exclusive.
    fn default() -> SysexMessage {
        SysexMessage {
            raw: vec![Self::SYSTEM_EXCLUSIVE, Self::SPECIAL_SYSTEM_EXCLUSIVE],
        }
    }
}
impl SysexMessage {
    pub const SYSTEM_EXCLUSIVE: u8 = 0xF0;
    pub const SPECIAL_SYSTEM_EXCLUSIVE: u8 = 0xF7;

    /// Build a sysex message out of its status byte and data.
    pub fn new(status: u8, data: &[u8]) -> Result<SysexMessage> {
        ensure!(
            status == Self::SYSTEM_EXCLUSIVE || status == Self::SPECIAL_SYSTEM_EXCLUSIVE,
            err_malformed_msg!("sysex status must be 0xF0 or 0xF7")
        );
        let mut raw = Vec::with_capacity(1 + data.len());
        raw.push(status);
        raw.extend_from_slice(data);
        Ok(SysexMessage { raw })
    }

    /// Replace the contents of this message.
    ///
    /// On failure the message is left untouched.
    pub fn set_message(&mut self, status: u8, data: &[u8]) -> Result<()> {
        *self = SysexMessage::new(status, data)?;
        Ok(())
    }

    /// Parse a complete sysex message, status included.
    pub fn parse(raw: &[u8]) -> Result<SysexMessage> {
        let (&status, data) = raw
            .split_first()
            .ok_or(err_truncated!("empty sysex message"))?;
        SysexMessage::new(status, data)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn status(&self) -> u8 {
        self.raw[0]
    }

    /// The data bytes after the status. For a complete exclusive this includes the closing `0xF7`.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.raw[1..]
    }
}
