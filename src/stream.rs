//! Framing of raw, undelimited MIDI byte streams into discrete messages.
//!
//! This sort of stream is what comes out of a serial MIDI cable or a byte-oriented transport:
//! there are no delimiters in between messages, the length of each message is implied by its
//! status byte, and system-exclusive messages may span any amount of input chunks.
//!
//! Handles the usual quirks of raw streams:
//!
//! - Running status for channel voice messages.
//! - System Realtime bytes (`0xF8..=0xFF`) interleaved anywhere, even in the middle of other
//!   messages. They are emitted immediately and do not disturb the message being framed.
//! - Messages split across calls to [`feed`](struct.MidiStream.html#method.feed).

use crate::message::{short_msg_len, Message, ShortMessage, SysexMessage};

/// Longest system-exclusive message that will be accumulated before being dropped.
const MAX_SYSEX_LEN: usize = 256 * 1024;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum State {
    /// Waiting for a status byte, or for data under running status.
    AwaitingStatus,
    /// A short message was started and is waiting for this many total bytes.
    Partial(usize),
    /// Inside a system-exclusive message, waiting for the closing `0xF7`.
    AccumulatingSysex,
}

/// A streaming raw MIDI parser, taking raw, undelimited MIDI bytes and producing messages.
///
/// Calling `feed` with many small slices is equivalent to calling `feed` once with their
/// concatenation.
#[derive(Clone, Debug)]
pub struct MidiStream {
    buf: Vec<u8>,
    state: State,
    running_status: Option<u8>,
}
impl Default for MidiStream {
    fn default() -> MidiStream {
        MidiStream::new()
    }
}
impl MidiStream {
    /// Create a fresh stream parser.
    #[inline]
    pub fn new() -> MidiStream {
        MidiStream {
            buf: Vec::new(),
            state: State::AwaitingStatus,
            running_status: None,
        }
    }

    /// Whether a partial message or an unterminated sysex is currently buffered.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.state != State::AwaitingStatus
    }

    /// Feeds a slice of bytes to the stream, calling `handle_msg` whenever a complete message is
    /// framed.
    ///
    /// Some calls may produce no messages at all, others as many as bytes fed in.
    pub fn feed(&mut self, bytes: &[u8], mut handle_msg: impl FnMut(Message)) {
        for &byte in bytes {
            self.feed_byte(byte, &mut handle_msg);
        }
    }

    /// Indicates to the stream that this is a message boundary, such as when the source closes.
    ///
    /// Any incomplete message is discarded, and running status is cleared.
    pub fn flush(&mut self) {
        if self.is_pending() {
            log::trace!(
                "discarding {} bytes of incomplete midi message on flush",
                self.buf.len()
            );
        }
        self.buf.clear();
        self.state = State::AwaitingStatus;
        self.running_status = None;
    }

    fn feed_byte(&mut self, byte: u8, handle_msg: &mut impl FnMut(Message)) {
        if byte >= 0xF8 {
            //System Realtime, invisible to the rest of the stream state
            emit_short(&[byte], handle_msg);
            return;
        }
        match self.state {
            State::AccumulatingSysex => {
                self.buf.push(byte);
                if byte == 0xF7 {
                    self.state = State::AwaitingStatus;
                    match SysexMessage::parse(&self.buf) {
                        Ok(msg) => handle_msg(Message::Sysex(msg)),
                        Err(err) => log::trace!("dropping unframeable sysex: {}", err),
                    }
                    self.buf.clear();
                } else if self.buf.len() > MAX_SYSEX_LEN {
                    log::warn!("dropping sysex message longer than {} bytes", MAX_SYSEX_LEN);
                    self.buf.clear();
                    self.state = State::AwaitingStatus;
                }
            }
            _ if byte < 0x80 => self.feed_data(byte, handle_msg),
            State::Partial(_) => {
                log::trace!(
                    "status {:#04x} interrupted an incomplete message, dropping {:02x?}",
                    byte,
                    self.buf
                );
                self.buf.clear();
                self.state = State::AwaitingStatus;
                self.feed_status(byte, handle_msg);
            }
            State::AwaitingStatus => self.feed_status(byte, handle_msg),
        }
    }

    fn feed_data(&mut self, byte: u8, handle_msg: &mut impl FnMut(Message)) {
        match self.state {
            State::Partial(expected) => {
                self.buf.push(byte);
                if self.buf.len() >= expected {
                    self.state = State::AwaitingStatus;
                    emit_short(&self.buf, handle_msg);
                    self.buf.clear();
                }
            }
            _ => match self.running_status.and_then(|s| Some((s, short_msg_len(s)?))) {
                Some((status, expected)) => {
                    self.buf.clear();
                    self.buf.push(status);
                    self.state = State::Partial(expected);
                    self.feed_data(byte, handle_msg);
                }
                None => log::trace!("dropping data byte {:#04x} with no status", byte),
            },
        }
    }

    fn feed_status(&mut self, status: u8, handle_msg: &mut impl FnMut(Message)) {
        match status {
            0xF0 => {
                self.running_status = None;
                self.buf.clear();
                self.buf.push(status);
                self.state = State::AccumulatingSysex;
            }
            _ => match short_msg_len(status) {
                Some(1) => {
                    self.running_status = None;
                    emit_short(&[status], handle_msg);
                }
                Some(len) => {
                    self.running_status = if status < 0xF0 { Some(status) } else { None };
                    self.buf.clear();
                    self.buf.push(status);
                    self.state = State::Partial(len);
                }
                None => {
                    //Stray end-of-exclusive or undefined system common status
                    self.running_status = None;
                    log::trace!("dropping undefined or stray status byte {:#04x}", status);
                }
            },
        }
    }
}

fn emit_short(raw: &[u8], handle_msg: &mut impl FnMut(Message)) {
    match ShortMessage::parse(raw) {
        Ok(msg) => handle_msg(Message::Short(msg)),
        Err(err) => log::trace!("dropping unframeable message {:02x?}: {}", raw, err),
    }
}
